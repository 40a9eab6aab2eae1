//! 博客应用的数据模型：用户、日志、评论

use std::sync::{Arc, OnceLock};

use chrono::Utc;
use sqlxmodel::{ColumnType, Field, Model, Schema};
use uuid::Uuid;

/// 生成 50 位主键：15 位毫秒时间戳 + 32 位 uuid + `000`
///
/// 以时间戳开头，按主键排序即按创建时间排序
pub fn next_id() -> String {
    format!(
        "{:015}{}000",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple()
    )
}

fn id_field() -> Field {
    Field::new("id", ColumnType::Text)
        .primary_key()
        .ddl("VARCHAR(50)")
        .default_with(next_id)
}

fn created_at_field() -> Field {
    Field::new("created_at", ColumnType::Timestamp)
        .not_null()
        .default_with(Utc::now)
}

fn varchar(name: &str, len: u32) -> Field {
    Field::new(name, ColumnType::Text)
        .not_null()
        .ddl(format!("VARCHAR({})", len))
}

pub struct User;

impl Model for User {
    const TABLE: &'static str = "users";

    fn fields() -> Vec<Field> {
        vec![
            id_field(),
            varchar("email", 50),
            varchar("password", 50),
            Field::new("admin", ColumnType::Boolean)
                .not_null()
                .default_value(false),
            varchar("name", 50),
            varchar("image", 500),
            created_at_field(),
        ]
    }

    fn schema_cell() -> &'static OnceLock<Arc<Schema>> {
        static SCHEMA: OnceLock<Arc<Schema>> = OnceLock::new();
        &SCHEMA
    }
}

pub struct Blog;

impl Model for Blog {
    const TABLE: &'static str = "blogs";

    fn fields() -> Vec<Field> {
        vec![
            id_field(),
            varchar("user_id", 50),
            varchar("user_name", 50),
            varchar("user_image", 500),
            varchar("name", 50),
            varchar("summary", 200),
            Field::new("content", ColumnType::Text).not_null().ddl("TEXT"),
            created_at_field(),
        ]
    }

    fn schema_cell() -> &'static OnceLock<Arc<Schema>> {
        static SCHEMA: OnceLock<Arc<Schema>> = OnceLock::new();
        &SCHEMA
    }
}

pub struct Comment;

impl Model for Comment {
    const TABLE: &'static str = "comments";

    fn fields() -> Vec<Field> {
        vec![
            id_field(),
            varchar("blog_id", 50),
            varchar("user_id", 50),
            varchar("user_name", 50),
            varchar("user_image", 500),
            Field::new("content", ColumnType::Text).not_null().ddl("TEXT"),
            created_at_field(),
        ]
    }

    fn schema_cell() -> &'static OnceLock<Arc<Schema>> {
        static SCHEMA: OnceLock<Arc<Schema>> = OnceLock::new();
        &SCHEMA
    }
}
