//! 数据访问引擎
//!
//! 语句构建（纯函数，不访问数据库）与执行分开：`*_statement` 只负责把 Schema 和值
//! 翻译成参数化 SQL，`insert` / `update` / `remove` / `find` 等异步函数各自借出一个连接，
//! 执行完毕即归还。值一律通过占位符绑定，不会拼接进 SQL 文本。

use std::sync::Arc;

use crate::backend::Backend;
use crate::database_info::DbDriver;
use crate::db_pool::DbPool;
use crate::error::{Result, SqlxModelError};
use crate::query_builder::QueryBuilder;
use crate::record::Record;
use crate::schema::{ColumnType, Schema};
use crate::value::{Param, Statement, Value};

/// 为插入解析每个字段的值：显式值优先，其次是默认值（生成器此时才求值），否则为 NULL
pub fn resolve_insert_values(schema: &Schema, slots: &[Option<Value>]) -> Vec<Value> {
    schema
        .fields()
        .iter()
        .enumerate()
        .map(|(idx, field)| match slots.get(idx).and_then(|slot| slot.as_ref()) {
            Some(value) => value.clone(),
            None => field
                .default()
                .map(|default| default.resolve())
                .unwrap_or(Value::Null),
        })
        .collect()
}

/// INSERT 语句，只包含非 NULL 的列，按声明顺序
///
/// `values` 必须与 `schema.fields()` 一一对应
pub fn insert_statement(schema: &Schema, values: &[Value], driver: DbDriver) -> Statement {
    let table = driver.escape_identifier(schema.table());

    let mut columns = Vec::new();
    let mut placeholders = Vec::new();
    let mut params = Vec::new();
    for (field, value) in schema.fields().iter().zip(values) {
        if value.is_null() {
            continue;
        }
        columns.push(driver.escape_identifier(field.name()));
        placeholders.push(driver.placeholder(params.len()));
        params.push(Param::new(value.clone(), field.column_type()));
    }

    let sql = if columns.is_empty() {
        match driver {
            DbDriver::MySql => format!("INSERT INTO {} () VALUES ()", table),
            DbDriver::Postgres | DbDriver::Sqlite => {
                format!("INSERT INTO {} DEFAULT VALUES", table)
            }
        }
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders.join(", ")
        )
    };

    Statement::new(sql, params)
}

/// UPDATE 语句：SET 全部非主键列，WHERE 主键
///
/// 主键未设置返回 `MissingKey`；没有非主键列时返回 `None`（无需执行任何语句）
pub fn update_statement(
    schema: &Schema,
    slots: &[Option<Value>],
    driver: DbDriver,
) -> Result<Option<Statement>> {
    let key = slots
        .get(schema.primary_key_index())
        .and_then(|slot| slot.as_ref())
        .filter(|value| !value.is_null())
        .ok_or_else(|| missing_key(schema))?;
    let key = key_param(schema, key)?;

    if schema.non_key_indices().is_empty() {
        return Ok(None);
    }

    let mut assignments = Vec::with_capacity(schema.non_key_indices().len());
    let mut params = Vec::with_capacity(schema.non_key_indices().len() + 1);
    for &idx in schema.non_key_indices() {
        let field = &schema.fields()[idx];
        let value = slots
            .get(idx)
            .and_then(|slot| slot.clone())
            .unwrap_or(Value::Null);
        assignments.push(format!(
            "{} = {}",
            driver.escape_identifier(field.name()),
            driver.placeholder(params.len())
        ));
        params.push(Param::new(value, field.column_type()));
    }

    let sql = format!(
        "UPDATE {} SET {} WHERE {} = {}",
        driver.escape_identifier(schema.table()),
        assignments.join(", "),
        driver.escape_identifier(schema.primary_key().name()),
        driver.placeholder(params.len())
    );
    params.push(key);

    Ok(Some(Statement::new(sql, params)))
}

/// DELETE 语句，按主键删除
pub fn delete_statement(schema: &Schema, key: &Value, driver: DbDriver) -> Result<Statement> {
    let key = key_param(schema, key)?;
    let sql = format!(
        "DELETE FROM {} WHERE {} = {}",
        driver.escape_identifier(schema.table()),
        driver.escape_identifier(schema.primary_key().name()),
        driver.placeholder(0)
    );
    Ok(Statement::new(sql, vec![key]))
}

/// 按主键查询单行
pub fn select_by_key_statement(
    schema: &Schema,
    key: &Value,
    driver: DbDriver,
) -> Result<Statement> {
    let key = key_param(schema, key)?;
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = {}",
        select_list(schema, driver),
        driver.escape_identifier(schema.table()),
        driver.escape_identifier(schema.primary_key().name()),
        driver.placeholder(0)
    );
    Ok(Statement::new(sql, vec![key]))
}

/// 按谓词查询，列顺序即 Schema 的声明顺序
pub fn select_statement(
    schema: &Schema,
    predicate: Option<&QueryBuilder>,
    driver: DbDriver,
) -> Result<Statement> {
    let mut sql = format!(
        "SELECT {} FROM {}",
        select_list(schema, driver),
        driver.escape_identifier(schema.table())
    );
    let params = apply_predicate(schema, predicate, driver, &mut sql, true)?;
    Ok(Statement::new(sql, params))
}

/// 按谓词计数；ORDER BY / LIMIT / OFFSET 对计数没有意义，忽略
pub fn count_statement(
    schema: &Schema,
    predicate: Option<&QueryBuilder>,
    driver: DbDriver,
) -> Result<Statement> {
    let mut sql = format!(
        "SELECT COUNT(*) FROM {}",
        driver.escape_identifier(schema.table())
    );
    let params = apply_predicate(schema, predicate, driver, &mut sql, false)?;
    Ok(Statement::new(sql, params))
}

fn select_list(schema: &Schema, driver: DbDriver) -> String {
    schema
        .column_names()
        .into_iter()
        .map(|name| driver.escape_identifier(name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn apply_predicate(
    schema: &Schema,
    predicate: Option<&QueryBuilder>,
    driver: DbDriver,
    sql: &mut String,
    with_tail: bool,
) -> Result<Vec<Param>> {
    let Some(builder) = predicate else {
        return Ok(Vec::new());
    };

    // 先校验字段名，任何未知字段都不生成语句
    if let Some(unknown) = builder
        .field_names()
        .into_iter()
        .find(|name| !schema.has_field(name))
    {
        return Err(schema.unknown_field(unknown));
    }

    if builder.has_conditions() {
        let (where_sql, _) = builder.build_where_sql(driver, 0);
        sql.push_str(" WHERE ");
        sql.push_str(&where_sql);
    }
    if with_tail {
        sql.push_str(&builder.build_tail_sql(driver));
    }

    builder
        .field_binds()
        .map(|(name, value)| predicate_param(schema, name, value))
        .collect()
}

/// 谓词绑定值按所比较字段的列类型绑定，NULL 因此也带正确的 SQL 类型
fn predicate_param(schema: &Schema, name: Option<&str>, value: &Value) -> Result<Param> {
    let Some(name) = name else {
        return Ok(Param::infer(value.clone()));
    };
    let field = schema
        .field(name)
        .ok_or_else(|| schema.unknown_field(name))?;
    if !value.is_compatible(field.column_type()) {
        return Err(SqlxModelError::InvalidValue {
            field: field.name().to_string(),
            expected: field.column_type(),
            found: value.kind_name().to_string(),
        });
    }
    Ok(Param::new(value.clone(), field.column_type()))
}

fn key_param(schema: &Schema, key: &Value) -> Result<Param> {
    let field = schema.primary_key();
    if key.is_null() {
        return Err(missing_key(schema));
    }
    if !key.is_compatible(field.column_type()) {
        return Err(SqlxModelError::InvalidValue {
            field: field.name().to_string(),
            expected: field.column_type(),
            found: key.kind_name().to_string(),
        });
    }
    Ok(Param::new(key.clone(), field.column_type()))
}

fn missing_key(schema: &Schema) -> SqlxModelError {
    SqlxModelError::MissingKey {
        table: schema.table().to_string(),
        key: schema.primary_key().name().to_string(),
    }
}

/// 插入记录，返回受影响行数
///
/// 默认值在此刻求值并写回记录，调用方因此能看到生成的主键
pub async fn insert<B: Backend>(pool: &DbPool<B>, record: &mut Record) -> Result<u64> {
    let values = resolve_insert_values(record.schema(), record.slots());
    let statement = insert_statement(record.schema(), &values, pool.driver());

    let affected = pool.execute(&statement).await?;
    record.fill_resolved(values);
    Ok(affected)
}

/// 按主键更新全部非主键列，返回受影响行数
///
/// 主键未设置时返回 `MissingKey`，不会发出任何语句
pub async fn update<B: Backend>(pool: &DbPool<B>, record: &Record) -> Result<u64> {
    match update_statement(record.schema(), record.slots(), pool.driver())? {
        Some(statement) => pool.execute(&statement).await,
        None => Ok(0),
    }
}

/// 按主键删除；没有匹配行时返回 0，不视为错误
pub async fn remove<B: Backend>(pool: &DbPool<B>, schema: &Schema, key: &Value) -> Result<u64> {
    let statement = delete_statement(schema, key, pool.driver())?;
    pool.execute(&statement).await
}

/// 按主键查询，没有匹配行时返回 `None`
pub async fn find<B: Backend>(
    pool: &DbPool<B>,
    schema: &Arc<Schema>,
    key: &Value,
) -> Result<Option<Record>> {
    let statement = select_by_key_statement(schema, key, pool.driver())?;
    let rows = pool.fetch_all(&statement, &schema.column_types()).await?;
    Ok(rows
        .into_iter()
        .next()
        .map(|row| Record::from_row(Arc::clone(schema), row)))
}

/// 按谓词查询全部匹配行；`predicate` 为 `None` 时返回整张表
pub async fn find_all<B: Backend>(
    pool: &DbPool<B>,
    schema: &Arc<Schema>,
    predicate: Option<&QueryBuilder>,
) -> Result<Vec<Record>> {
    let statement = select_statement(schema, predicate, pool.driver())?;
    let rows = pool.fetch_all(&statement, &schema.column_types()).await?;
    Ok(rows
        .into_iter()
        .map(|row| Record::from_row(Arc::clone(schema), row))
        .collect())
}

/// 按谓词计数
pub async fn count<B: Backend>(
    pool: &DbPool<B>,
    schema: &Schema,
    predicate: Option<&QueryBuilder>,
) -> Result<i64> {
    let statement = count_statement(schema, predicate, pool.driver())?;
    let rows = pool.fetch_all(&statement, &[ColumnType::Integer]).await?;
    Ok(rows
        .first()
        .and_then(|row| row.first())
        .and_then(Value::as_i64)
        .unwrap_or(0))
}

/// 按 Schema 建表（`CREATE TABLE IF NOT EXISTS`）
pub async fn create_table<B: Backend>(pool: &DbPool<B>, schema: &Schema) -> Result<()> {
    let statement = Statement::new(schema.create_table_sql(pool.driver()), Vec::new());
    pool.execute(&statement).await?;
    Ok(())
}
