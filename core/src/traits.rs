use std::sync::{Arc, OnceLock};

use crate::backend::Backend;
use crate::crud;
use crate::db_pool::DbPool;
use crate::error::Result;
use crate::query_builder::QueryBuilder;
use crate::record::Record;
use crate::schema::{Field, Schema};
use crate::value::Value;

/// Model trait 定义了模型的基本元数据
///
/// 实现者声明表名、字段列表和一个属于该类型的 Schema 缓存；
/// Schema 在第一次使用时构建一次，之后所有实例共享同一个 `Arc<Schema>`。
///
/// ```rust,ignore
/// struct User;
///
/// impl Model for User {
///     const TABLE: &'static str = "users";
///
///     fn fields() -> Vec<Field> {
///         vec![
///             Field::new("id", ColumnType::Text).primary_key().default_with(next_id),
///             Field::new("name", ColumnType::Text),
///         ]
///     }
///
///     fn schema_cell() -> &'static OnceLock<Arc<Schema>> {
///         static SCHEMA: OnceLock<Arc<Schema>> = OnceLock::new();
///         &SCHEMA
///     }
/// }
///
/// let mut user = User::new_record()?.with("name", "Test")?;
/// user.save(&pool).await?;
/// let found = User::find(&pool, user.primary_key().cloned().unwrap()).await?;
/// ```
#[async_trait::async_trait]
pub trait Model: Sized + Send + Sync + 'static {
    /// 表名
    const TABLE: &'static str;

    /// 字段声明，按列顺序
    fn fields() -> Vec<Field>;

    /// 该模型类型独占的 Schema 缓存
    fn schema_cell() -> &'static OnceLock<Arc<Schema>>;

    /// 获取（必要时构建）Schema
    ///
    /// 字段声明不合法时返回 `SqlxModelError::Schema`，且不会缓存
    fn schema() -> Result<Arc<Schema>> {
        let cell = Self::schema_cell();
        if let Some(schema) = cell.get() {
            return Ok(Arc::clone(schema));
        }
        let built = Arc::new(Schema::build(Self::TABLE, Self::fields())?);
        // 并发首次访问时只保留先写入的那个
        Ok(Arc::clone(cell.get_or_init(|| built)))
    }

    /// 创建一条空记录
    fn new_record() -> Result<Record> {
        Ok(Record::new(Self::schema()?))
    }

    /// 按主键查询
    async fn find<B, K>(pool: &DbPool<B>, key: K) -> Result<Option<Record>>
    where
        B: Backend,
        K: Into<Value> + Send,
    {
        let schema = Self::schema()?;
        crud::find(pool, &schema, &key.into()).await
    }

    /// 按谓词查询
    async fn find_all<B: Backend>(
        pool: &DbPool<B>,
        predicate: Option<&QueryBuilder>,
    ) -> Result<Vec<Record>> {
        let schema = Self::schema()?;
        crud::find_all(pool, &schema, predicate).await
    }

    /// 按谓词计数
    async fn count<B: Backend>(pool: &DbPool<B>, predicate: Option<&QueryBuilder>) -> Result<i64> {
        let schema = Self::schema()?;
        crud::count(pool, &schema, predicate).await
    }

    /// 按主键删除
    async fn remove<B, K>(pool: &DbPool<B>, key: K) -> Result<u64>
    where
        B: Backend,
        K: Into<Value> + Send,
    {
        let schema = Self::schema()?;
        crud::remove(pool, &schema, &key.into()).await
    }

    /// 建表（已存在时不做任何事）
    async fn create_table<B: Backend>(pool: &DbPool<B>) -> Result<()> {
        let schema = Self::schema()?;
        crud::create_table(pool, &schema).await
    }
}
