//! 数据库信息抽象层
//!
//! 提供统一的接口来访问不同数据库的特性，如占位符、标识符转义等。

use serde::{Deserialize, Serialize};

use crate::error::{Result, SqlxModelError};

/// 数据库驱动类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbDriver {
    #[serde(alias = "mariadb")]
    MySql,
    #[serde(alias = "postgresql")]
    Postgres,
    Sqlite,
}

impl DbDriver {
    /// 获取占位符字符串
    ///
    /// * MySQL/SQLite: `"?"`
    /// * PostgreSQL: `"$1"`, `"$2"`, ... (index + 1)
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            DbDriver::MySql | DbDriver::Sqlite => "?".to_string(),
            DbDriver::Postgres => format!("${}", index + 1),
        }
    }

    /// 转义 SQL 标识符（表名、列名等）
    ///
    /// * MySQL: `` `name` ``
    /// * PostgreSQL/SQLite: `"name"`
    pub fn escape_identifier(&self, name: &str) -> String {
        match self {
            DbDriver::MySql => format!("`{}`", name),
            DbDriver::Postgres | DbDriver::Sqlite => format!("\"{}\"", name),
        }
    }
}

impl std::str::FromStr for DbDriver {
    type Err = SqlxModelError;

    /// 解析驱动名（不区分大小写），例如配置文件或环境变量中的 `mysql`
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(DbDriver::MySql),
            "postgres" | "postgresql" => Ok(DbDriver::Postgres),
            "sqlite" => Ok(DbDriver::Sqlite),
            other => Err(SqlxModelError::Configuration(format!(
                "Unsupported database driver: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for DbDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DbDriver::MySql => "mysql",
            DbDriver::Postgres => "postgres",
            DbDriver::Sqlite => "sqlite",
        };
        f.write_str(name)
    }
}

/// 数据库信息 trait
///
/// 每个后端类型（`sqlx::MySql`, `sqlx::Postgres`, `sqlx::Sqlite`，以及测试中的模拟后端）
/// 都需要实现此 trait，以提供数据库特定的 SQL 方言。
pub trait DatabaseInfo {
    /// 获取数据库驱动类型
    fn get_driver() -> DbDriver;

    fn placeholder(index: usize) -> String {
        Self::get_driver().placeholder(index)
    }

    fn escape_identifier(name: &str) -> String {
        Self::get_driver().escape_identifier(name)
    }
}

// ========== MySQL 实现 ==========

#[cfg(feature = "mysql")]
impl DatabaseInfo for sqlx::MySql {
    fn get_driver() -> DbDriver {
        DbDriver::MySql
    }
}

// ========== PostgreSQL 实现 ==========

#[cfg(feature = "postgres")]
impl DatabaseInfo for sqlx::Postgres {
    fn get_driver() -> DbDriver {
        DbDriver::Postgres
    }
}

// ========== SQLite 实现 ==========

#[cfg(feature = "sqlite")]
impl DatabaseInfo for sqlx::Sqlite {
    fn get_driver() -> DbDriver {
        DbDriver::Sqlite
    }
}
