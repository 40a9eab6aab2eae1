//! 字段描述与模型 Schema
//!
//! 模型通过显式的字段列表声明：[`Schema::build`] 校验字段列表并返回不可变的 Schema，
//! 之后所有的 SQL 生成和行映射都只读取 Schema。

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::database_info::DbDriver;
use crate::error::{Result, SqlxModelError};
use crate::utils::is_safe_identifier;
use crate::value::Value;

/// 列存储类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Blob,
}

impl ColumnType {
    /// 建表时使用的默认 SQL 类型
    pub fn sql_type(&self, driver: DbDriver) -> &'static str {
        match (driver, self) {
            (DbDriver::MySql, ColumnType::Text) => "VARCHAR(255)",
            (DbDriver::MySql, ColumnType::Integer) => "BIGINT",
            (DbDriver::MySql, ColumnType::Float) => "DOUBLE",
            (DbDriver::MySql, ColumnType::Boolean) => "BOOLEAN",
            (DbDriver::MySql, ColumnType::Timestamp) => "DATETIME(6)",
            (DbDriver::MySql, ColumnType::Blob) => "LONGBLOB",
            (DbDriver::Postgres, ColumnType::Text) => "TEXT",
            (DbDriver::Postgres, ColumnType::Integer) => "BIGINT",
            (DbDriver::Postgres, ColumnType::Float) => "DOUBLE PRECISION",
            (DbDriver::Postgres, ColumnType::Boolean) => "BOOLEAN",
            (DbDriver::Postgres, ColumnType::Timestamp) => "TIMESTAMPTZ",
            (DbDriver::Postgres, ColumnType::Blob) => "BYTEA",
            (DbDriver::Sqlite, ColumnType::Text) => "TEXT",
            (DbDriver::Sqlite, ColumnType::Integer) => "INTEGER",
            (DbDriver::Sqlite, ColumnType::Float) => "REAL",
            (DbDriver::Sqlite, ColumnType::Boolean) => "BOOLEAN",
            (DbDriver::Sqlite, ColumnType::Timestamp) => "DATETIME",
            (DbDriver::Sqlite, ColumnType::Blob) => "BLOB",
        }
    }
}

/// 字段默认值：常量，或在插入时才求值的生成函数
#[derive(Clone)]
pub enum FieldDefault {
    Value(Value),
    Generator(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl FieldDefault {
    /// 求默认值；生成函数每次调用都会重新求值
    pub fn resolve(&self) -> Value {
        match self {
            FieldDefault::Value(v) => v.clone(),
            FieldDefault::Generator(f) => f(),
        }
    }
}

impl fmt::Debug for FieldDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldDefault::Value(v) => f.debug_tuple("Value").field(v).finish(),
            FieldDefault::Generator(_) => f.write_str("Generator(..)"),
        }
    }
}

/// 字段描述：一个模型属性到一个数据库列的映射
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    column_type: ColumnType,
    primary_key: bool,
    nullable: bool,
    default: Option<FieldDefault>,
    ddl: Option<String>,
}

impl Field {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            primary_key: false,
            nullable: true,
            default: None,
            ddl: None,
        }
    }

    /// 标记为主键（主键总是 NOT NULL）
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// 常量默认值
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(FieldDefault::Value(value.into()));
        self
    }

    /// 生成函数默认值，在插入时求值
    pub fn default_with<F, V>(mut self, generator: F) -> Self
    where
        F: Fn() -> V + Send + Sync + 'static,
        V: Into<Value>,
    {
        self.default = Some(FieldDefault::Generator(Arc::new(move || generator().into())));
        self
    }

    /// 覆盖建表时的列类型，例如 `VARCHAR(50)`、`MEDIUMTEXT`
    pub fn ddl(mut self, ddl: impl Into<String>) -> Self {
        self.ddl = Some(ddl.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn default(&self) -> Option<&FieldDefault> {
        self.default.as_ref()
    }

    /// 列定义中使用的 SQL 类型
    pub fn sql_type(&self, driver: DbDriver) -> String {
        match &self.ddl {
            Some(ddl) => ddl.clone(),
            None => self.column_type.sql_type(driver).to_string(),
        }
    }
}

/// 模型 Schema：一张表的完整列映射，构建后不可变
#[derive(Debug)]
pub struct Schema {
    table: String,
    fields: Vec<Field>,
    primary_key: usize,
    non_key: Vec<usize>,
}

impl Schema {
    /// 校验字段列表并构建 Schema
    ///
    /// - 表名和字段名必须是安全标识符
    /// - 字段名不能重复
    /// - 有且只有一个主键
    /// - 常量默认值的类型必须与列类型一致
    ///
    /// 列顺序固定为声明顺序。
    pub fn build(table: impl Into<String>, fields: Vec<Field>) -> Result<Schema> {
        let table = table.into();
        if !is_safe_identifier(&table) {
            return Err(SqlxModelError::Schema(format!(
                "Invalid table name '{}'",
                table
            )));
        }

        let mut seen = HashSet::new();
        let mut primary_key = None;
        for (index, field) in fields.iter().enumerate() {
            if !is_safe_identifier(&field.name) {
                return Err(SqlxModelError::Schema(format!(
                    "Invalid field name '{}' in table '{}'",
                    field.name, table
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(SqlxModelError::Schema(format!(
                    "Duplicate field '{}' in table '{}'",
                    field.name, table
                )));
            }
            if field.primary_key {
                if let Some(existing) = primary_key {
                    let existing: &Field = &fields[existing];
                    return Err(SqlxModelError::Schema(format!(
                        "Duplicate primary key '{}' in table '{}' (already '{}')",
                        field.name, table, existing.name
                    )));
                }
                primary_key = Some(index);
            }
            if let Some(FieldDefault::Value(value)) = &field.default {
                if !value.is_compatible(field.column_type) {
                    return Err(SqlxModelError::Schema(format!(
                        "Default of field '{}' is {} but the column is {:?}",
                        field.name,
                        value.kind_name(),
                        field.column_type
                    )));
                }
            }
        }

        let primary_key = primary_key.ok_or_else(|| {
            SqlxModelError::Schema(format!("Primary key not found in table '{}'", table))
        })?;
        let non_key = (0..fields.len()).filter(|&i| i != primary_key).collect();

        Ok(Schema {
            table,
            fields,
            primary_key,
            non_key,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// 全部字段，按声明顺序
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn primary_key(&self) -> &Field {
        &self.fields[self.primary_key]
    }

    pub fn primary_key_index(&self) -> usize {
        self.primary_key
    }

    /// 非主键字段，按声明顺序
    pub fn non_key_fields(&self) -> impl Iterator<Item = &Field> + '_ {
        self.non_key.iter().map(move |&i| &self.fields[i])
    }

    pub fn non_key_indices(&self) -> &[usize] {
        &self.non_key
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn column_types(&self) -> Vec<ColumnType> {
        self.fields.iter().map(|f| f.column_type).collect()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.index_of(name).map(|i| &self.fields[i])
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub(crate) fn unknown_field(&self, name: &str) -> SqlxModelError {
        SqlxModelError::UnknownField {
            table: self.table.clone(),
            field: name.to_string(),
        }
    }

    /// 生成 `CREATE TABLE IF NOT EXISTS` 语句
    pub fn create_table_sql(&self, driver: DbDriver) -> String {
        let mut lines: Vec<String> = self
            .fields
            .iter()
            .map(|field| {
                let mut line = format!(
                    "    {} {}",
                    driver.escape_identifier(&field.name),
                    field.sql_type(driver)
                );
                if !field.nullable {
                    line.push_str(" NOT NULL");
                }
                line
            })
            .collect();
        lines.push(format!(
            "    PRIMARY KEY ({})",
            driver.escape_identifier(&self.primary_key().name)
        ));

        let mut sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
            driver.escape_identifier(&self.table),
            lines.join(",\n")
        );
        if driver == DbDriver::MySql {
            sql.push_str(" ENGINE=InnoDB DEFAULT CHARSET=utf8mb4");
        }
        sql.push(';');
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_fields() -> Vec<Field> {
        vec![
            Field::new("id", ColumnType::Text)
                .primary_key()
                .ddl("VARCHAR(50)"),
            Field::new("email", ColumnType::Text).not_null(),
            Field::new("password", ColumnType::Text),
            Field::new("admin", ColumnType::Boolean).default_value(false),
            Field::new("name", ColumnType::Text),
            Field::new("image", ColumnType::Text),
            Field::new("created_at", ColumnType::Float),
        ]
    }

    #[test]
    fn test_build_fixes_declaration_order() {
        let schema = Schema::build("users", user_fields()).unwrap();
        assert_eq!(schema.table(), "users");
        assert_eq!(
            schema.column_names(),
            vec!["id", "email", "password", "admin", "name", "image", "created_at"]
        );
        assert_eq!(schema.primary_key().name(), "id");
        assert_eq!(schema.primary_key_index(), 0);
        let non_key: Vec<&str> = schema.non_key_fields().map(|f| f.name()).collect();
        assert_eq!(
            non_key,
            vec!["email", "password", "admin", "name", "image", "created_at"]
        );
    }

    #[test]
    fn test_build_is_idempotent() {
        let fields = user_fields();
        let a = Schema::build("users", fields.clone()).unwrap();
        let b = Schema::build("users", fields).unwrap();
        assert_eq!(a.column_names(), b.column_names());
        assert_eq!(a.primary_key_index(), b.primary_key_index());
        assert_eq!(a.non_key_indices(), b.non_key_indices());
    }

    #[test]
    fn test_primary_key_not_last_position() {
        let schema = Schema::build(
            "comments",
            vec![
                Field::new("content", ColumnType::Text),
                Field::new("id", ColumnType::Integer).primary_key(),
                Field::new("blog_id", ColumnType::Text),
            ],
        )
        .unwrap();
        assert_eq!(schema.primary_key_index(), 1);
        assert_eq!(schema.non_key_indices(), &[0, 2]);
    }

    #[test]
    fn test_missing_primary_key() {
        let err = Schema::build("users", vec![Field::new("name", ColumnType::Text)]).unwrap_err();
        assert!(matches!(err, SqlxModelError::Schema(_)));
    }

    #[test]
    fn test_two_primary_keys() {
        let err = Schema::build(
            "users",
            vec![
                Field::new("id", ColumnType::Text).primary_key(),
                Field::new("email", ColumnType::Text).primary_key(),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, SqlxModelError::Schema(msg) if msg.contains("email")));
    }

    #[test]
    fn test_duplicate_field() {
        let err = Schema::build(
            "users",
            vec![
                Field::new("id", ColumnType::Text).primary_key(),
                Field::new("name", ColumnType::Text),
                Field::new("name", ColumnType::Text),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, SqlxModelError::Schema(msg) if msg.contains("Duplicate field")));
    }

    #[test]
    fn test_unsafe_identifiers() {
        assert!(Schema::build(
            "users; --",
            vec![Field::new("id", ColumnType::Text).primary_key()]
        )
        .is_err());
        assert!(Schema::build(
            "users",
            vec![Field::new("id) VALUES", ColumnType::Text).primary_key()]
        )
        .is_err());
    }

    #[test]
    fn test_default_type_mismatch() {
        let err = Schema::build(
            "users",
            vec![
                Field::new("id", ColumnType::Text).primary_key(),
                Field::new("admin", ColumnType::Boolean).default_value("no"),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, SqlxModelError::Schema(_)));
    }

    #[test]
    fn test_generator_is_evaluated_on_every_resolve() {
        use std::sync::atomic::{AtomicI64, Ordering};
        static COUNTER: AtomicI64 = AtomicI64::new(0);
        let field = Field::new("seq", ColumnType::Integer)
            .default_with(|| COUNTER.fetch_add(1, Ordering::SeqCst));
        let default = field.default().unwrap();
        let first = default.resolve();
        let second = default.resolve();
        assert_ne!(first, second);
    }

    #[test]
    fn test_create_table_sql_sqlite() {
        let schema = Schema::build(
            "users",
            vec![
                Field::new("id", ColumnType::Text)
                    .primary_key()
                    .ddl("VARCHAR(50)"),
                Field::new("admin", ColumnType::Boolean).not_null(),
                Field::new("created_at", ColumnType::Timestamp),
            ],
        )
        .unwrap();
        assert_eq!(
            schema.create_table_sql(DbDriver::Sqlite),
            "CREATE TABLE IF NOT EXISTS \"users\" (\n    \"id\" VARCHAR(50) NOT NULL,\n    \"admin\" BOOLEAN NOT NULL,\n    \"created_at\" DATETIME,\n    PRIMARY KEY (\"id\")\n);"
        );
    }

    #[test]
    fn test_create_table_sql_mysql() {
        let schema = Schema::build(
            "blogs",
            vec![
                Field::new("id", ColumnType::Integer).primary_key(),
                Field::new("content", ColumnType::Text).ddl("MEDIUMTEXT"),
            ],
        )
        .unwrap();
        let sql = schema.create_table_sql(DbDriver::MySql);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS `blogs` ("));
        assert!(sql.contains("`id` BIGINT NOT NULL"));
        assert!(sql.contains("`content` MEDIUMTEXT"));
        assert!(sql.ends_with("ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;"));
    }
}
