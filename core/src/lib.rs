pub mod backend;
pub mod crud;
pub mod database_info;
pub mod db_pool;
pub mod error;
pub mod query_builder;
pub mod record;
pub mod schema;
pub mod traits;
pub mod utils;
pub mod value;

pub use backend::{Backend, Credentials};
pub use database_info::{DatabaseInfo, DbDriver};
pub use db_pool::{DbPool, PoolOptions, PoolStats, PooledConnection};
pub use error::{Result, SqlxModelError};
pub use query_builder::QueryBuilder;
pub use record::Record;
pub use schema::{ColumnType, Field, FieldDefault, Schema};
pub use traits::Model;
pub use value::{Param, Statement, Value};
