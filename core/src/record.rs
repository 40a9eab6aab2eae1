//! 模型实例
//!
//! `Record` 是一行数据在内存中的表示：共享一个只读的 [`Schema`]，每个字段一个值槽。
//! 读写都按 Schema 校验，持久化操作全部委托给 [`crate::crud`]。

use std::fmt;
use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::backend::Backend;
use crate::crud;
use crate::db_pool::DbPool;
use crate::error::{Result, SqlxModelError};
use crate::query_builder::QueryBuilder;
use crate::schema::Schema;
use crate::value::Value;

#[derive(Clone)]
pub struct Record {
    schema: Arc<Schema>,
    /// 与 `schema.fields()` 一一对应；`None` 表示尚未设置
    values: Vec<Option<Value>>,
}

impl Record {
    pub fn new(schema: Arc<Schema>) -> Self {
        let values = vec![None; schema.fields().len()];
        Self { schema, values }
    }

    /// 按 Schema 列顺序把一行数据物化为记录
    pub(crate) fn from_row(schema: Arc<Schema>, row: Vec<Value>) -> Self {
        let mut values: Vec<Option<Value>> = row.into_iter().map(Some).collect();
        values.resize(schema.fields().len(), None);
        Self { schema, values }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub(crate) fn slots(&self) -> &[Option<Value>] {
        &self.values
    }

    /// 插入成功后写回解析出的值，只填充原先未设置的字段
    pub(crate) fn fill_resolved(&mut self, resolved: Vec<Value>) {
        for (slot, value) in self.values.iter_mut().zip(resolved) {
            if slot.is_none() && !value.is_null() {
                *slot = Some(value);
            }
        }
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.schema
            .index_of(name)
            .ok_or_else(|| self.schema.unknown_field(name))
    }

    /// 读取字段值，字段未设置时返回 `None`
    pub fn get(&self, name: &str) -> Result<Option<&Value>> {
        let idx = self.index_of(name)?;
        Ok(self.values[idx].as_ref())
    }

    /// 读取文本字段
    pub fn get_str(&self, name: &str) -> Result<Option<&str>> {
        Ok(self.get(name)?.and_then(Value::as_str))
    }

    /// 设置字段值；字段不存在返回 `UnknownField`，类型不符返回 `InvalidValue`
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let idx = self.index_of(name)?;
        let value = value.into();
        let field = &self.schema.fields()[idx];
        if !value.is_compatible(field.column_type()) {
            return Err(SqlxModelError::InvalidValue {
                field: field.name().to_string(),
                expected: field.column_type(),
                found: value.kind_name().to_string(),
            });
        }
        self.values[idx] = Some(value);
        Ok(())
    }

    /// builder 形式的 `set`
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Result<Self> {
        self.set(name, value)?;
        Ok(self)
    }

    pub fn unset(&mut self, name: &str) -> Result<()> {
        let idx = self.index_of(name)?;
        self.values[idx] = None;
        Ok(())
    }

    pub fn is_set(&self, name: &str) -> Result<bool> {
        Ok(self.get(name)?.is_some())
    }

    /// 清空全部字段，下一次 save 会重新求默认值
    pub fn reset(&mut self) {
        self.values.iter_mut().for_each(|slot| *slot = None);
    }

    /// 主键值；未设置或为 NULL 时返回 `None`
    pub fn primary_key(&self) -> Option<&Value> {
        self.values[self.schema.primary_key_index()]
            .as_ref()
            .filter(|value| !value.is_null())
    }

    /// 已设置的字段，按声明顺序
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> + '_ {
        self.schema
            .fields()
            .iter()
            .zip(&self.values)
            .filter_map(|(field, value)| value.as_ref().map(|v| (field.name(), v)))
    }

    /// 插入（INSERT）这条记录
    pub async fn save<B: Backend>(&mut self, pool: &DbPool<B>) -> Result<()> {
        crud::insert(pool, self).await?;
        Ok(())
    }

    /// 按主键更新，返回受影响行数
    pub async fn update<B: Backend>(&self, pool: &DbPool<B>) -> Result<u64> {
        crud::update(pool, self).await
    }

    /// 按主键删除，返回受影响行数
    pub async fn remove<B: Backend>(&self, pool: &DbPool<B>) -> Result<u64> {
        let key = self.primary_key().ok_or_else(|| SqlxModelError::MissingKey {
            table: self.schema.table().to_string(),
            key: self.schema.primary_key().name().to_string(),
        })?;
        crud::remove(pool, &self.schema, key).await
    }

    /// 按主键查询
    pub async fn find<B: Backend>(
        pool: &DbPool<B>,
        schema: &Arc<Schema>,
        key: impl Into<Value>,
    ) -> Result<Option<Record>> {
        crud::find(pool, schema, &key.into()).await
    }

    pub async fn find_all<B: Backend>(
        pool: &DbPool<B>,
        schema: &Arc<Schema>,
        predicate: Option<&QueryBuilder>,
    ) -> Result<Vec<Record>> {
        crud::find_all(pool, schema, predicate).await
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("table", &self.schema.table())
            .field("values", &self.iter().collect::<Vec<_>>())
            .finish()
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.schema.table() == other.schema.table() && self.values == other.values
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnType, Field};

    fn schema() -> Arc<Schema> {
        Arc::new(
            Schema::build(
                "users",
                vec![
                    Field::new("id", ColumnType::Text).primary_key(),
                    Field::new("name", ColumnType::Text),
                    Field::new("admin", ColumnType::Boolean).default_value(false),
                ],
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_set_and_get() {
        let mut record = Record::new(schema());
        assert_eq!(record.get("name").unwrap(), None);

        record.set("name", "Test").unwrap();
        assert_eq!(record.get_str("name").unwrap(), Some("Test"));
        assert!(record.is_set("name").unwrap());
        assert!(!record.is_set("admin").unwrap());
    }

    #[test]
    fn test_unknown_field() {
        let mut record = Record::new(schema());
        let err = record.set("nickname", "x").unwrap_err();
        assert!(matches!(
            err,
            SqlxModelError::UnknownField { ref table, ref field } if table == "users" && field == "nickname"
        ));
        assert!(record.get("nickname").is_err());
        assert!(record.unset("nickname").is_err());
    }

    #[test]
    fn test_type_mismatch() {
        let mut record = Record::new(schema());
        let err = record.set("admin", "yes").unwrap_err();
        assert!(matches!(err, SqlxModelError::InvalidValue { .. }));
        // NULL 对任何列都合法
        record.set("admin", Value::Null).unwrap();
    }

    #[test]
    fn test_primary_key_and_reset() {
        let mut record = Record::new(schema()).with("id", "k1").unwrap();
        assert_eq!(record.primary_key(), Some(&Value::from("k1")));

        record.set("id", Value::Null).unwrap();
        assert_eq!(record.primary_key(), None);

        record.set("name", "Test").unwrap();
        record.reset();
        assert_eq!(record.iter().count(), 0);
    }

    #[test]
    fn test_fill_resolved_keeps_unset_nulls_absent() {
        let mut record = Record::new(schema()).with("name", "Test").unwrap();
        record.fill_resolved(vec![
            Value::from("generated"),
            Value::from("ignored"),
            Value::Null,
        ]);
        assert_eq!(record.get_str("id").unwrap(), Some("generated"));
        assert_eq!(record.get_str("name").unwrap(), Some("Test"));
        assert_eq!(record.get("admin").unwrap(), None);
    }

    #[test]
    fn test_serialize_only_set_fields() {
        let record = Record::new(schema())
            .with("id", "k1")
            .unwrap()
            .with("name", "Test")
            .unwrap();
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"id":"k1","name":"Test"}"#);
    }

    #[test]
    fn test_from_row_positional() {
        let record = Record::from_row(
            schema(),
            vec![Value::from("k1"), Value::Null, Value::from(true)],
        );
        assert_eq!(record.get("name").unwrap(), Some(&Value::Null));
        assert_eq!(record.get("admin").unwrap(), Some(&Value::from(true)));
    }
}
