//! 数据库后端抽象
//!
//! 连接池和 CRUD 引擎只通过 [`Backend`] 与数据库交互：打开连接、探活、关闭、
//! 执行语句、读取行。线协议完全交给 sqlx 驱动。

use serde::{Deserialize, Serialize};

use crate::database_info::DatabaseInfo;
use crate::error::{Result, SqlxModelError};
use crate::schema::ColumnType;
use crate::value::{Statement, Value};

/// 数据库连接凭据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// 数据库名；SQLite 下为数据库文件路径
    #[serde(alias = "db")]
    pub database: String,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3306,
            user: String::new(),
            password: String::new(),
            database: String::new(),
        }
    }
}

impl Credentials {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            database: database.into(),
        }
    }

    /// SQLite 只需要文件路径
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            database: path.into(),
            ..Default::default()
        }
    }
}

/// 数据库客户端协作者
///
/// 注意：此 trait 的方法都是关联函数，连接状态全部保存在 `Self::Connection` 中
#[async_trait::async_trait]
pub trait Backend: DatabaseInfo + Send + Sync + 'static {
    type Connection: Send + 'static;

    /// 打开一个新连接；任何失败都以 `SqlxModelError::Connection` 返回
    async fn connect(credentials: &Credentials) -> Result<Self::Connection>;

    /// 轻量级探活；失败表示连接已不可用
    async fn ping(conn: &mut Self::Connection) -> Result<()>;

    /// 优雅关闭连接
    async fn close(conn: Self::Connection) -> Result<()>;

    /// 执行语句，返回受影响行数
    async fn execute(conn: &mut Self::Connection, statement: &Statement) -> Result<u64>;

    /// 执行查询，按 `columns` 给出的列类型逐列解码
    async fn fetch_all(
        conn: &mut Self::Connection,
        statement: &Statement,
        columns: &[ColumnType],
    ) -> Result<Vec<Vec<Value>>>;
}

/// 宏：将语句的绑定参数依次应用到 sqlx 查询上
///
/// NULL 按列类型绑定，避免 PostgreSQL 因参数类型不符拒绝语句
macro_rules! apply_params {
    ($query:ident, $statement:expr) => {
        for param in &$statement.params {
            $query = match (&param.value, param.column_type) {
                (Value::Null, ColumnType::Text) => $query.bind(None::<String>),
                (Value::Null, ColumnType::Integer) => $query.bind(None::<i64>),
                (Value::Null, ColumnType::Float) => $query.bind(None::<f64>),
                (Value::Null, ColumnType::Boolean) => $query.bind(None::<bool>),
                (Value::Null, ColumnType::Timestamp) => {
                    $query.bind(None::<chrono::DateTime<chrono::Utc>>)
                }
                (Value::Null, ColumnType::Blob) => $query.bind(None::<Vec<u8>>),
                (Value::Text(s), _) => $query.bind(s.clone()),
                (Value::Integer(i), _) => $query.bind(*i),
                (Value::Float(f), _) => $query.bind(*f),
                (Value::Bool(b), _) => $query.bind(*b),
                (Value::Timestamp(t), _) => $query.bind(*t),
                (Value::Blob(b), _) => $query.bind(b.clone()),
            };
        }
    };
}

/// 宏：为 sqlx 驱动生成 Backend 实现
///
/// 绑定和解码逻辑对三种数据库完全一致，只有连接参数不同，由 `$connect` 函数提供
macro_rules! impl_sqlx_backend {
    ($feature:literal, $db:ty, $conn:ty, $row:ty, $connect:path) => {
        #[cfg(feature = $feature)]
        #[async_trait::async_trait]
        impl Backend for $db {
            type Connection = $conn;

            async fn connect(credentials: &Credentials) -> Result<Self::Connection> {
                $connect(credentials)
                    .await
                    .map_err(SqlxModelError::Connection)
            }

            async fn ping(conn: &mut Self::Connection) -> Result<()> {
                use sqlx::Connection as _;
                conn.ping().await.map_err(SqlxModelError::Connection)
            }

            async fn close(conn: Self::Connection) -> Result<()> {
                use sqlx::Connection as _;
                Ok(conn.close().await?)
            }

            async fn execute(conn: &mut Self::Connection, statement: &Statement) -> Result<u64> {
                let mut query = sqlx::query::<$db>(&statement.sql);
                apply_params!(query, statement);
                let result = query.execute(&mut *conn).await?;
                Ok(result.rows_affected())
            }

            async fn fetch_all(
                conn: &mut Self::Connection,
                statement: &Statement,
                columns: &[ColumnType],
            ) -> Result<Vec<Vec<Value>>> {
                use sqlx::Row as _;

                let mut query = sqlx::query::<$db>(&statement.sql);
                apply_params!(query, statement);
                let rows: Vec<$row> = query.fetch_all(&mut *conn).await?;

                let mut decoded = Vec::with_capacity(rows.len());
                for row in &rows {
                    let mut values = Vec::with_capacity(columns.len());
                    for (idx, column_type) in columns.iter().enumerate() {
                        let value = match column_type {
                            ColumnType::Text => row.try_get::<Option<String>, _>(idx)?.map(Value::Text),
                            ColumnType::Integer => row.try_get::<Option<i64>, _>(idx)?.map(Value::Integer),
                            ColumnType::Float => row.try_get::<Option<f64>, _>(idx)?.map(Value::Float),
                            ColumnType::Boolean => row.try_get::<Option<bool>, _>(idx)?.map(Value::Bool),
                            ColumnType::Timestamp => row
                                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)?
                                .map(Value::Timestamp),
                            ColumnType::Blob => row.try_get::<Option<Vec<u8>>, _>(idx)?.map(Value::Blob),
                        };
                        values.push(value.unwrap_or(Value::Null));
                    }
                    decoded.push(values);
                }
                Ok(decoded)
            }
        }
    };
}

#[cfg(feature = "mysql")]
async fn connect_mysql(credentials: &Credentials) -> sqlx::Result<sqlx::MySqlConnection> {
    use sqlx::ConnectOptions as _;
    sqlx::mysql::MySqlConnectOptions::new()
        .host(&credentials.host)
        .port(credentials.port)
        .username(&credentials.user)
        .password(&credentials.password)
        .database(&credentials.database)
        .connect()
        .await
}

#[cfg(feature = "postgres")]
async fn connect_postgres(credentials: &Credentials) -> sqlx::Result<sqlx::PgConnection> {
    use sqlx::ConnectOptions as _;
    sqlx::postgres::PgConnectOptions::new()
        .host(&credentials.host)
        .port(credentials.port)
        .username(&credentials.user)
        .password(&credentials.password)
        .database(&credentials.database)
        .connect()
        .await
}

#[cfg(feature = "sqlite")]
async fn connect_sqlite(credentials: &Credentials) -> sqlx::Result<sqlx::SqliteConnection> {
    use sqlx::ConnectOptions as _;
    sqlx::sqlite::SqliteConnectOptions::new()
        .filename(&credentials.database)
        .create_if_missing(true)
        .connect()
        .await
}

impl_sqlx_backend!(
    "mysql",
    sqlx::MySql,
    sqlx::MySqlConnection,
    sqlx::mysql::MySqlRow,
    connect_mysql
);
impl_sqlx_backend!(
    "postgres",
    sqlx::Postgres,
    sqlx::PgConnection,
    sqlx::postgres::PgRow,
    connect_postgres
);
impl_sqlx_backend!(
    "sqlite",
    sqlx::Sqlite,
    sqlx::SqliteConnection,
    sqlx::sqlite::SqliteRow,
    connect_sqlite
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_from_config_section() {
        // 与 config_default 中 db 段相同的字段名
        let creds: Credentials = serde_json::from_str(
            r#"{"host":"127.0.0.1","port":3306,"user":"www-data","password":"1234","db":"awesome"}"#,
        )
        .unwrap();
        assert_eq!(
            creds,
            Credentials::new("127.0.0.1", 3306, "www-data", "1234", "awesome")
        );
    }

    #[test]
    fn test_credentials_defaults() {
        let creds: Credentials = serde_json::from_str(r#"{"database":"awesome.db"}"#).unwrap();
        assert_eq!(creds.host, "127.0.0.1");
        assert_eq!(creds.port, 3306);
        assert_eq!(creds, Credentials::sqlite("awesome.db"));
    }
}
