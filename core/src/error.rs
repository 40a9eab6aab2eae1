use std::time::Duration;

use thiserror::Error;

use crate::schema::ColumnType;

#[derive(Debug, Error)]
pub enum SqlxModelError {
    /// 无法建立或借出数据库连接
    #[error("Connection error: {0}")]
    Connection(#[source] sqlx::Error),
    /// 等待空闲连接超时
    #[error("Timed out after {0:?} waiting for a pooled connection")]
    PoolExhausted(Duration),
    /// 连接池已关闭
    #[error("Connection pool has been closed")]
    PoolClosed,
    /// 模型声明不合法
    #[error("Invalid schema: {0}")]
    Schema(String),
    /// 主键重复或其他数据库约束冲突
    #[error("Constraint violation: {0}")]
    Constraint(#[source] sqlx::Error),
    /// update / remove 时主键未设置
    #[error("Primary key '{key}' of table '{table}' is not set")]
    MissingKey { table: String, key: String },
    /// 字段不在模型中
    #[error("Field '{field}' does not exist in table '{table}'")]
    UnknownField { table: String, field: String },
    /// 值类型与列类型不匹配
    #[error("Field '{field}' expects {expected:?} but got {found}")]
    InvalidValue {
        field: String,
        expected: ColumnType,
        found: String,
    },
    /// 连接池参数不合法
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    /// 其他数据库错误，原样向上传递
    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl SqlxModelError {
    /// 连接层面的错误：连接状态未知，不能再放回连接池
    pub fn is_connection_error(&self) -> bool {
        matches!(self, SqlxModelError::Connection(_))
    }

    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, SqlxModelError::Constraint(_))
    }
}

impl From<sqlx::Error> for SqlxModelError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                // SQLSTATE 23xxx 是标准的完整性约束错误类别（MySQL / PostgreSQL）
                let sqlstate_23 = db_err
                    .code()
                    .map(|code| code.starts_with("23"))
                    .unwrap_or(false);
                if sqlstate_23 || !matches!(db_err.kind(), sqlx::error::ErrorKind::Other) {
                    SqlxModelError::Constraint(err)
                } else {
                    SqlxModelError::Database(err)
                }
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => SqlxModelError::Connection(err),
            _ => SqlxModelError::Database(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, SqlxModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_is_connection_error() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err = SqlxModelError::from(sqlx::Error::Io(io));
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_protocol_error_is_connection_error() {
        let err = SqlxModelError::from(sqlx::Error::Protocol("bad packet".to_string()));
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_row_not_found_is_database_error() {
        let err = SqlxModelError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, SqlxModelError::Database(_)));
        assert!(!err.is_connection_error());
    }

    #[test]
    fn test_missing_key_message() {
        let err = SqlxModelError::MissingKey {
            table: "users".to_string(),
            key: "id".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Primary key 'id' of table 'users' is not set"
        );
    }
}
