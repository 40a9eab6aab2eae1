use std::fmt::Write;

use crate::database_info::DbDriver;
use crate::value::Value;

/// 条件类型：AND 或 OR
#[derive(Debug, Clone, Copy, PartialEq)]
enum ConditionType {
    And,
    Or,
}

/// SQL 操作符枚举
#[derive(Debug, Clone, PartialEq)]
enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Like,
    IsNull,
    IsNotNull,
    /// IN (?, ?, ...)，参数为绑定值个数
    In(usize),
    /// NOT IN (?, ?, ...)，参数为绑定值个数
    NotIn(usize),
    /// BETWEEN ? AND ?
    Between,
}

impl Operator {
    /// 将条件转换为 SQL 字符串，并推进绑定索引
    fn to_sql(&self, driver: DbDriver, column: &str, bind_index: &mut usize) -> String {
        let mut next = || {
            let p = driver.placeholder(*bind_index);
            *bind_index += 1;
            p
        };
        match self {
            Operator::Eq => format!("{} = {}", column, next()),
            Operator::Ne => format!("{} != {}", column, next()),
            Operator::Gt => format!("{} > {}", column, next()),
            Operator::Ge => format!("{} >= {}", column, next()),
            Operator::Lt => format!("{} < {}", column, next()),
            Operator::Le => format!("{} <= {}", column, next()),
            Operator::Like => format!("{} LIKE {}", column, next()),
            Operator::IsNull => format!("{} IS NULL", column),
            Operator::IsNotNull => format!("{} IS NOT NULL", column),
            // 空列表：IN () 不是合法 SQL，改写为恒假 / 恒真条件
            Operator::In(0) => "1 = 0".to_string(),
            Operator::NotIn(0) => "1 = 1".to_string(),
            Operator::In(n) | Operator::NotIn(n) => {
                let placeholders: Vec<String> = (0..*n).map(|_| next()).collect();
                let keyword = if matches!(self, Operator::In(_)) {
                    "IN"
                } else {
                    "NOT IN"
                };
                format!("{} {} ({})", column, keyword, placeholders.join(", "))
            }
            Operator::Between => {
                let low = next();
                let high = next();
                format!("{} BETWEEN {} AND {}", column, low, high)
            }
        }
    }
}

/// 条件项：可以是单个条件或条件组
#[derive(Debug, Clone)]
enum ConditionItem {
    /// 单个条件：(field, operator, condition_type)
    /// 注意：绑定值存储在 QueryBuilder 的 binds 字段中，不在此处
    Single(String, Operator, ConditionType),
    /// 条件组：(嵌套的 QueryBuilder, condition_type)
    Group(Box<QueryBuilder>, ConditionType),
}

/// 查询谓词构建器，用于 find_all / count
///
/// 只描述 WHERE / ORDER BY / LIMIT / OFFSET 部分，SELECT 列表和表名由 Schema 决定。
/// 所有值都通过绑定参数传递，绝不拼接进 SQL。
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    conditions: Vec<ConditionItem>,
    order_by: Vec<(String, bool)>, // (field, ascending)
    binds: Vec<Value>,
    /// 与 `binds` 一一对应：值所比较的字段；LIKE 模式为 `None`，按文本绑定
    bind_fields: Vec<Option<String>>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, field: &str, op: Operator, ct: ConditionType, values: Vec<Value>) -> Self {
        let typed = (op != Operator::Like).then(|| field.to_string());
        self.bind_fields
            .extend(std::iter::repeat(typed).take(values.len()));
        self.conditions
            .push(ConditionItem::Single(field.to_string(), op, ct));
        self.binds.extend(values);
        self
    }

    pub fn and_eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.push(field, Operator::Eq, ConditionType::And, vec![value.into()])
    }

    pub fn and_ne(self, field: &str, value: impl Into<Value>) -> Self {
        self.push(field, Operator::Ne, ConditionType::And, vec![value.into()])
    }

    pub fn and_gt(self, field: &str, value: impl Into<Value>) -> Self {
        self.push(field, Operator::Gt, ConditionType::And, vec![value.into()])
    }

    pub fn and_ge(self, field: &str, value: impl Into<Value>) -> Self {
        self.push(field, Operator::Ge, ConditionType::And, vec![value.into()])
    }

    pub fn and_lt(self, field: &str, value: impl Into<Value>) -> Self {
        self.push(field, Operator::Lt, ConditionType::And, vec![value.into()])
    }

    pub fn and_le(self, field: &str, value: impl Into<Value>) -> Self {
        self.push(field, Operator::Le, ConditionType::And, vec![value.into()])
    }

    // ========== OR 条件方法 ==========
    pub fn or_eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.push(field, Operator::Eq, ConditionType::Or, vec![value.into()])
    }

    pub fn or_ne(self, field: &str, value: impl Into<Value>) -> Self {
        self.push(field, Operator::Ne, ConditionType::Or, vec![value.into()])
    }

    pub fn or_gt(self, field: &str, value: impl Into<Value>) -> Self {
        self.push(field, Operator::Gt, ConditionType::Or, vec![value.into()])
    }

    pub fn or_lt(self, field: &str, value: impl Into<Value>) -> Self {
        self.push(field, Operator::Lt, ConditionType::Or, vec![value.into()])
    }

    /// LIKE 包含匹配（%value%）
    pub fn and_like(self, field: &str, value: impl Into<String>) -> Self {
        let pattern = format!("%{}%", value.into());
        self.push(field, Operator::Like, ConditionType::And, vec![pattern.into()])
    }

    /// LIKE 前缀匹配（value%）
    pub fn and_like_prefix(self, field: &str, value: impl Into<String>) -> Self {
        let pattern = format!("{}%", value.into());
        self.push(field, Operator::Like, ConditionType::And, vec![pattern.into()])
    }

    /// LIKE 自定义模式匹配（不添加 %）
    pub fn and_like_custom(self, field: &str, pattern: impl Into<String>) -> Self {
        let pattern: String = pattern.into();
        self.push(field, Operator::Like, ConditionType::And, vec![pattern.into()])
    }

    pub fn or_like(self, field: &str, value: impl Into<String>) -> Self {
        let pattern = format!("%{}%", value.into());
        self.push(field, Operator::Like, ConditionType::Or, vec![pattern.into()])
    }

    pub fn and_in<V: Into<Value>>(self, field: &str, values: Vec<V>) -> Self {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.push(field, Operator::In(values.len()), ConditionType::And, values)
    }

    /// NOT IN 查询
    pub fn and_not_in<V: Into<Value>>(self, field: &str, values: Vec<V>) -> Self {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.push(field, Operator::NotIn(values.len()), ConditionType::And, values)
    }

    pub fn or_in<V: Into<Value>>(self, field: &str, values: Vec<V>) -> Self {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.push(field, Operator::In(values.len()), ConditionType::Or, values)
    }

    pub fn and_is_null(self, field: &str) -> Self {
        self.push(field, Operator::IsNull, ConditionType::And, Vec::new())
    }

    pub fn and_is_not_null(self, field: &str) -> Self {
        self.push(field, Operator::IsNotNull, ConditionType::And, Vec::new())
    }

    pub fn or_is_null(self, field: &str) -> Self {
        self.push(field, Operator::IsNull, ConditionType::Or, Vec::new())
    }

    /// BETWEEN 范围查询
    pub fn and_between(self, field: &str, min: impl Into<Value>, max: impl Into<Value>) -> Self {
        self.push(
            field,
            Operator::Between,
            ConditionType::And,
            vec![min.into(), max.into()],
        )
    }

    /// AND 条件分组：创建一个用 AND 连接的条件组
    /// 示例：`builder.and_group(|b| b.and_eq("a", 1).or_eq("b", 2))`
    /// 生成：`AND (a = ? OR b = ?)`
    pub fn and_group<F>(self, f: F) -> Self
    where
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        self.group(f(QueryBuilder::new()), ConditionType::And)
    }

    /// OR 条件分组：创建一个用 OR 连接的条件组
    pub fn or_group<F>(self, f: F) -> Self
    where
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        self.group(f(QueryBuilder::new()), ConditionType::Or)
    }

    fn group(mut self, group_builder: QueryBuilder, ct: ConditionType) -> Self {
        // 合并嵌套 builder 的 binds
        self.binds.extend(group_builder.binds.iter().cloned());
        self.bind_fields
            .extend(group_builder.bind_fields.iter().cloned());
        self.conditions
            .push(ConditionItem::Group(Box::new(group_builder), ct));
        self
    }

    pub fn order_by(mut self, field: &str, ascending: bool) -> Self {
        self.order_by.push((field.to_string(), ascending));
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }

    /// 是否有实际条件；不含任何条件的分组不算
    pub fn has_conditions(&self) -> bool {
        self.conditions.iter().any(|item| match item {
            ConditionItem::Single(..) => true,
            ConditionItem::Group(group, _) => group.has_conditions(),
        })
    }

    /// WHERE 条件的绑定值，按占位符顺序
    pub fn binds(&self) -> &[Value] {
        &self.binds
    }

    /// 绑定值及其比较的字段，按占位符顺序；LIKE 模式的字段为 `None`
    pub fn field_binds(&self) -> impl Iterator<Item = (Option<&str>, &Value)> + '_ {
        self.bind_fields
            .iter()
            .map(|field| field.as_deref())
            .zip(&self.binds)
    }

    /// 条件和排序中引用的全部字段名（含嵌套分组）
    pub fn field_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        for item in &self.conditions {
            match item {
                ConditionItem::Single(field, _, _) => names.push(field.as_str()),
                ConditionItem::Group(group, _) => names.extend(group.field_names()),
            }
        }
        names.extend(self.order_by.iter().map(|(field, _)| field.as_str()));
        names
    }

    /// 生成条件部分的 SQL（不包含 WHERE 关键字）
    /// 返回 (sql, 下一个绑定索引)
    pub fn build_where_sql(&self, driver: DbDriver, start_bind_index: usize) -> (String, usize) {
        let mut sql = String::new();
        let mut bind_index = start_bind_index;
        let mut first = true;

        for item in &self.conditions {
            let condition_type = match item {
                ConditionItem::Single(_, _, ct) => *ct,
                // 空分组不生成任何 SQL，连接符也一并跳过
                ConditionItem::Group(group, _) if !group.has_conditions() => continue,
                ConditionItem::Group(_, ct) => *ct,
            };

            // 第一个条件不需要连接符
            if !std::mem::replace(&mut first, false) {
                sql.push_str(match condition_type {
                    ConditionType::And => " AND ",
                    ConditionType::Or => " OR ",
                });
            }

            match item {
                ConditionItem::Single(field, op, _) => {
                    let escaped_field = driver.escape_identifier(field);
                    sql.push_str(&op.to_sql(driver, &escaped_field, &mut bind_index));
                }
                ConditionItem::Group(group_builder, _) => {
                    // 递归处理分组条件
                    let (group_sql, next_index) =
                        group_builder.build_where_sql(driver, bind_index);
                    sql.push('(');
                    sql.push_str(&group_sql);
                    sql.push(')');
                    bind_index = next_index;
                }
            }
        }

        (sql, bind_index)
    }

    /// 生成 ORDER BY / LIMIT / OFFSET 部分（带前导空格），没有时返回空串
    pub fn build_tail_sql(&self, driver: DbDriver) -> String {
        let mut sql = String::new();

        if !self.order_by.is_empty() {
            let parts: Vec<String> = self
                .order_by
                .iter()
                .map(|(field, ascending)| {
                    let escaped_field = driver.escape_identifier(field);
                    if *ascending {
                        escaped_field
                    } else {
                        format!("{} DESC", escaped_field)
                    }
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&parts.join(", "));
        }

        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => {
                let _ = write!(sql, " LIMIT {} OFFSET {}", limit, offset);
            }
            (Some(limit), None) => {
                let _ = write!(sql, " LIMIT {}", limit);
            }
            // MySQL / SQLite 的 OFFSET 必须跟在 LIMIT 之后
            (None, Some(offset)) => match driver {
                DbDriver::MySql => {
                    let _ = write!(sql, " LIMIT {} OFFSET {}", u64::MAX, offset);
                }
                DbDriver::Sqlite => {
                    let _ = write!(sql, " LIMIT -1 OFFSET {}", offset);
                }
                DbDriver::Postgres => {
                    let _ = write!(sql, " OFFSET {}", offset);
                }
            },
            (None, None) => {}
        }

        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize(sql: &str) -> String {
        sql.replace('`', "").replace('\"', "")
    }

    fn where_sql(builder: &QueryBuilder, driver: DbDriver) -> String {
        normalize(&builder.build_where_sql(driver, 0).0)
    }

    #[test]
    fn test_and_eq() {
        let builder = QueryBuilder::new().and_eq("id", 1).and_eq("name", "Test");
        assert_eq!(
            where_sql(&builder, DbDriver::MySql),
            "id = ? AND name = ?"
        );
        assert_eq!(builder.binds().len(), 2);
    }

    #[test]
    fn test_comparisons() {
        let builder = QueryBuilder::new()
            .and_gt("age", 18)
            .and_ge("score", 60)
            .and_lt("age", 65)
            .and_le("score", 100)
            .and_ne("status", 0);
        assert_eq!(
            where_sql(&builder, DbDriver::Sqlite),
            "age > ? AND score >= ? AND age < ? AND score <= ? AND status != ?"
        );
    }

    #[test]
    fn test_or_conditions() {
        let builder = QueryBuilder::new()
            .and_eq("admin", false)
            .or_eq("id", "a")
            .or_eq("id", "b");
        assert_eq!(
            where_sql(&builder, DbDriver::MySql),
            "admin = ? OR id = ? OR id = ?"
        );
    }

    #[test]
    fn test_like_variants() {
        let builder = QueryBuilder::new()
            .and_like("name", "es")
            .and_like_prefix("email", "test")
            .and_like_custom("image", "about:_lank");
        assert_eq!(
            where_sql(&builder, DbDriver::MySql),
            "name LIKE ? AND email LIKE ? AND image LIKE ?"
        );
        assert_eq!(
            builder.binds(),
            &[
                Value::from("%es%"),
                Value::from("test%"),
                Value::from("about:_lank")
            ]
        );
    }

    #[test]
    fn test_in_and_not_in() {
        let builder = QueryBuilder::new()
            .and_in("id", vec![1, 2, 3])
            .and_not_in("status", vec![0]);
        assert_eq!(
            where_sql(&builder, DbDriver::MySql),
            "id IN (?, ?, ?) AND status NOT IN (?)"
        );
        assert_eq!(builder.binds().len(), 4);
    }

    #[test]
    fn test_empty_in_list() {
        let empty: Vec<i64> = Vec::new();
        let builder = QueryBuilder::new()
            .and_in("id", empty.clone())
            .and_not_in("id", empty);
        assert_eq!(where_sql(&builder, DbDriver::MySql), "1 = 0 AND 1 = 1");
        assert!(builder.binds().is_empty());
    }

    #[test]
    fn test_null_checks() {
        let builder = QueryBuilder::new()
            .and_is_null("image")
            .and_is_not_null("email")
            .or_is_null("name");
        assert_eq!(
            where_sql(&builder, DbDriver::Postgres),
            "image IS NULL AND email IS NOT NULL OR name IS NULL"
        );
        assert!(builder.binds().is_empty());
    }

    #[test]
    fn test_between_postgres() {
        let builder = QueryBuilder::new()
            .and_eq("user_id", "u1")
            .and_between("created_at", 1.0, 2.0);
        assert_eq!(
            where_sql(&builder, DbDriver::Postgres),
            "user_id = $1 AND created_at BETWEEN $2 AND $3"
        );
    }

    #[test]
    fn test_groups_and_placeholder_numbering() {
        let builder = QueryBuilder::new()
            .and_eq("admin", true)
            .and_group(|b| b.and_eq("name", "a").or_eq("name", "b"))
            .or_group(|b| b.and_in("id", vec!["x", "y"]));
        assert_eq!(
            where_sql(&builder, DbDriver::Postgres),
            "admin = $1 AND (name = $2 OR name = $3) OR (id IN ($4, $5))"
        );
        assert_eq!(
            builder.binds(),
            &[
                Value::Bool(true),
                Value::from("a"),
                Value::from("b"),
                Value::from("x"),
                Value::from("y"),
            ]
        );
    }

    #[test]
    fn test_start_bind_index() {
        let builder = QueryBuilder::new().and_eq("id", 1);
        let (sql, next) = builder.build_where_sql(DbDriver::Postgres, 3);
        assert_eq!(normalize(&sql), "id = $4");
        assert_eq!(next, 4);
    }

    #[test]
    fn test_tail_order_limit_offset() {
        let builder = QueryBuilder::new()
            .order_by("created_at", false)
            .order_by("name", true)
            .limit(10)
            .offset(20);
        assert_eq!(
            normalize(&builder.build_tail_sql(DbDriver::MySql)),
            " ORDER BY created_at DESC, name LIMIT 10 OFFSET 20"
        );
    }

    #[test]
    fn test_offset_without_limit() {
        let builder = QueryBuilder::new().offset(5);
        assert_eq!(
            builder.build_tail_sql(DbDriver::Sqlite),
            " LIMIT -1 OFFSET 5"
        );
        assert_eq!(builder.build_tail_sql(DbDriver::Postgres), " OFFSET 5");
        assert_eq!(
            builder.build_tail_sql(DbDriver::MySql),
            " LIMIT 18446744073709551615 OFFSET 5"
        );
    }

    #[test]
    fn test_empty_builder() {
        let builder = QueryBuilder::new();
        assert!(!builder.has_conditions());
        assert_eq!(builder.build_where_sql(DbDriver::MySql, 0).0, "");
        assert_eq!(builder.build_tail_sql(DbDriver::MySql), "");
    }

    #[test]
    fn test_empty_groups_are_skipped() {
        let builder = QueryBuilder::new()
            .and_eq("name", "a")
            .and_group(|b| b)
            .or_group(|b| b.and_group(|b| b))
            .and_eq("admin", true);
        assert!(builder.has_conditions());
        assert_eq!(
            where_sql(&builder, DbDriver::Postgres),
            "name = $1 AND admin = $2"
        );

        let builder = QueryBuilder::new().and_group(|b| b).or_eq("name", "a");
        assert_eq!(where_sql(&builder, DbDriver::MySql), "name = ?");

        let builder = QueryBuilder::new().and_group(|b| b.or_group(|b| b));
        assert!(!builder.has_conditions());
        assert_eq!(where_sql(&builder, DbDriver::MySql), "");
    }

    #[test]
    fn test_field_binds_follow_placeholders() {
        let builder = QueryBuilder::new()
            .and_eq("admin", Value::Null)
            .and_like("name", "Te")
            .and_group(|b| b.and_between("score", 1.0, 2.0));
        let binds: Vec<(Option<&str>, &Value)> = builder.field_binds().collect();
        assert_eq!(
            binds,
            vec![
                (Some("admin"), &Value::Null),
                (None, &Value::from("%Te%")),
                (Some("score"), &Value::from(1.0)),
                (Some("score"), &Value::from(2.0)),
            ]
        );
    }

    #[test]
    fn test_field_names_include_groups_and_order() {
        let builder = QueryBuilder::new()
            .and_eq("a", 1)
            .and_group(|b| b.and_eq("b", 2))
            .order_by("c", true);
        assert_eq!(builder.field_names(), vec!["a", "b", "c"]);
    }
}
