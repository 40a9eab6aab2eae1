//! 连接池
//!
//! `DbPool` 持有有限数量的活动连接，在所有模型之间共享。借出的连接以
//! [`PooledConnection`] 守卫的形式返回，守卫被 drop 时连接归还（或丢弃）。

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::backend::{Backend, Credentials};
use crate::database_info::{DatabaseInfo, DbDriver};
use crate::error::{Result, SqlxModelError};
use crate::schema::ColumnType;
use crate::value::{Statement, Value};

/// 连接池参数
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolOptions {
    /// 创建时立即打开的连接数
    pub min_size: usize,
    /// 同时存在的连接上限
    pub max_size: usize,
    /// 等待空闲连接的超时时间，配置文件中以秒表示；None 表示一直等待
    #[serde(deserialize_with = "deserialize_timeout")]
    pub acquire_timeout: Option<Duration>,
    /// 借出空闲连接前先 ping 一次
    pub test_before_acquire: bool,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 10,
            acquire_timeout: None,
            test_before_acquire: true,
        }
    }
}

impl PoolOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_size(mut self, min_size: usize) -> Self {
        self.min_size = min_size;
        self
    }

    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    pub fn test_before_acquire(mut self, enabled: bool) -> Self {
        self.test_before_acquire = enabled;
        self
    }

    /// 要求 `0 < min_size <= max_size`
    pub fn validate(&self) -> Result<()> {
        if self.min_size == 0 {
            return Err(SqlxModelError::Configuration(
                "min_size must be greater than 0".to_string(),
            ));
        }
        if self.min_size > self.max_size {
            return Err(SqlxModelError::Configuration(format!(
                "min_size ({}) must not exceed max_size ({})",
                self.min_size, self.max_size
            )));
        }
        if self.max_size > Semaphore::MAX_PERMITS {
            return Err(SqlxModelError::Configuration(format!(
                "max_size ({}) is too large",
                self.max_size
            )));
        }
        Ok(())
    }
}

fn deserialize_timeout<'de, D>(deserializer: D) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Option::<f64>::deserialize(deserializer)? {
        None => Ok(None),
        Some(secs) if secs.is_finite() && secs >= 0.0 => Ok(Some(Duration::from_secs_f64(secs))),
        Some(secs) => Err(D::Error::custom(format!(
            "acquire_timeout must be a non-negative number of seconds, got {}",
            secs
        ))),
    }
}

/// 连接池快照
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub lent: usize,
    pub max_size: usize,
}

struct PoolState<C> {
    idle: VecDeque<C>,
    /// 已借出或正在为借出者打开的连接数
    lent: usize,
    closed: bool,
}

struct PoolInner<B: Backend> {
    credentials: Credentials,
    options: PoolOptions,
    /// 公平信号量：许可数即 max_size，等待者按到达顺序获得许可
    semaphore: Arc<Semaphore>,
    state: Mutex<PoolState<B::Connection>>,
}

impl<B: Backend> PoolInner<B> {
    fn lock_state(&self) -> MutexGuard<'_, PoolState<B::Connection>> {
        // 临界区内没有会 panic 的操作，中毒时状态依然一致
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// 数据库连接池句柄，克隆开销很小，所有克隆共享同一组连接
pub struct DbPool<B: Backend> {
    inner: Arc<PoolInner<B>>,
}

impl<B: Backend> Clone for DbPool<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Backend> fmt::Debug for DbPool<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbPool")
            .field("driver", &B::get_driver())
            .field("options", &self.inner.options)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<B: Backend> DbPool<B> {
    /// 创建连接池并立即打开 `min_size` 个连接
    ///
    /// 任何一个连接打开失败时，已打开的连接会先被关闭，然后返回错误
    pub async fn create(credentials: Credentials, options: PoolOptions) -> Result<Self> {
        options.validate()?;

        let mut idle = VecDeque::with_capacity(options.max_size);
        for _ in 0..options.min_size {
            match B::connect(&credentials).await {
                Ok(conn) => idle.push_back(conn),
                Err(err) => {
                    warn!(
                        error = %err,
                        opened = idle.len(),
                        "failed to open initial connections, closing the ones already opened"
                    );
                    for conn in idle {
                        close_quietly::<B>(conn).await;
                    }
                    return Err(err);
                }
            }
        }

        info!(
            driver = %B::get_driver(),
            host = %credentials.host,
            database = %credentials.database,
            min_size = options.min_size,
            max_size = options.max_size,
            "connection pool created"
        );

        Ok(Self {
            inner: Arc::new(PoolInner {
                semaphore: Arc::new(Semaphore::new(options.max_size)),
                state: Mutex::new(PoolState {
                    idle,
                    lent: 0,
                    closed: false,
                }),
                credentials,
                options,
            }),
        })
    }

    /// 借出一个连接
    ///
    /// 有空闲连接时直接返回；否则在未达上限时打开新连接；已达上限则按 FIFO 顺序等待。
    /// 等待超过 `acquire_timeout` 返回 `PoolExhausted`，连接池关闭后返回 `PoolClosed`。
    /// 在等待期间 drop 返回的 future 不会影响连接池状态。
    pub async fn acquire(&self) -> Result<PooledConnection<B>> {
        let permit = self.acquire_permit().await?;

        let idle = {
            let mut state = self.inner.lock_state();
            if state.closed {
                return Err(SqlxModelError::PoolClosed);
            }
            state.lent += 1;
            state.idle.pop_front()
        };

        // 从这里开始由守卫负责归还计数和许可，后续 await 被取消也不会泄漏
        let mut guard = PooledConnection {
            conn: None,
            pool: Arc::clone(&self.inner),
            broken: false,
            _permit: permit,
        };

        if let Some(conn) = idle {
            guard.conn = Some(conn);
            if !self.inner.options.test_before_acquire {
                return Ok(guard);
            }
            match guard.ping().await {
                Ok(()) => return Ok(guard),
                Err(err) => {
                    warn!(error = %err, "idle connection failed health check, opening a replacement");
                    if let Some(dead) = guard.conn.take() {
                        close_quietly::<B>(dead).await;
                    }
                    guard.broken = false;
                }
            }
        }

        let conn = B::connect(&self.inner.credentials).await?;
        debug!(driver = %B::get_driver(), "opened new connection");
        guard.conn = Some(conn);
        Ok(guard)
    }

    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        let semaphore = Arc::clone(&self.inner.semaphore);
        let permit = match self.inner.options.acquire_timeout {
            Some(limit) => match tokio::time::timeout(limit, semaphore.acquire_owned()).await {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(timeout = ?limit, "timed out waiting for a pooled connection");
                    return Err(SqlxModelError::PoolExhausted(limit));
                }
            },
            None => semaphore.acquire_owned().await,
        };
        permit.map_err(|_| SqlxModelError::PoolClosed)
    }

    /// 借出连接执行一条语句，返回受影响行数
    pub async fn execute(&self, statement: &Statement) -> Result<u64> {
        let mut conn = self.acquire().await?;
        conn.execute(statement).await
    }

    /// 借出连接执行一条查询
    pub async fn fetch_all(
        &self,
        statement: &Statement,
        columns: &[ColumnType],
    ) -> Result<Vec<Vec<Value>>> {
        let mut conn = self.acquire().await?;
        conn.fetch_all(statement, columns).await
    }

    /// 关闭连接池
    ///
    /// 唤醒所有等待者并返回 `PoolClosed`，关闭全部空闲连接；
    /// 仍被借出的连接在归还时关闭。重复调用无副作用。
    pub async fn close_all(&self) {
        self.inner.semaphore.close();
        let idle: Vec<B::Connection> = {
            let mut state = self.inner.lock_state();
            state.closed = true;
            state.idle.drain(..).collect()
        };

        let count = idle.len();
        for conn in idle {
            close_quietly::<B>(conn).await;
        }
        info!(driver = %B::get_driver(), closed = count, "connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock_state().closed
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock_state();
        PoolStats {
            idle: state.idle.len(),
            lent: state.lent,
            max_size: self.inner.options.max_size,
        }
    }

    pub fn driver(&self) -> DbDriver {
        B::get_driver()
    }

    pub fn options(&self) -> &PoolOptions {
        &self.inner.options
    }
}

/// 借出的连接
///
/// drop 即归还：连接回到空闲队列；若已标记损坏或连接池已关闭则关闭连接。
/// 语句执行过程中 future 被取消时，连接保持损坏标记，不会被再次借出。
pub struct PooledConnection<B: Backend> {
    conn: Option<B::Connection>,
    pool: Arc<PoolInner<B>>,
    broken: bool,
    // 最后释放，保证连接先回到空闲队列，下一个等待者才被唤醒
    _permit: OwnedSemaphorePermit,
}

impl<B: Backend> PooledConnection<B> {
    /// 执行语句，返回受影响行数
    pub async fn execute(&mut self, statement: &Statement) -> Result<u64> {
        debug!(sql = %statement.sql, params = statement.params.len(), "execute");
        let was_broken = self.broken;
        let conn = self.conn.as_mut().ok_or(SqlxModelError::PoolClosed)?;

        self.broken = true;
        let result = B::execute(conn, statement).await;
        self.broken = was_broken || matches!(&result, Err(err) if err.is_connection_error());
        result
    }

    /// 执行查询，按 `columns` 的列类型解码每一行
    pub async fn fetch_all(
        &mut self,
        statement: &Statement,
        columns: &[ColumnType],
    ) -> Result<Vec<Vec<Value>>> {
        debug!(sql = %statement.sql, params = statement.params.len(), "fetch");
        let was_broken = self.broken;
        let conn = self.conn.as_mut().ok_or(SqlxModelError::PoolClosed)?;

        self.broken = true;
        let result = B::fetch_all(conn, statement, columns).await;
        self.broken = was_broken || matches!(&result, Err(err) if err.is_connection_error());
        result
    }

    async fn ping(&mut self) -> Result<()> {
        let conn = self.conn.as_mut().ok_or(SqlxModelError::PoolClosed)?;
        self.broken = true;
        B::ping(conn).await?;
        self.broken = false;
        Ok(())
    }

    /// 标记为损坏，归还时关闭而不是放回空闲队列
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// 底层驱动连接
    pub fn raw(&mut self) -> Option<&mut B::Connection> {
        self.conn.as_mut()
    }
}

impl<B: Backend> fmt::Debug for PooledConnection<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("driver", &B::get_driver())
            .field("broken", &self.broken)
            .finish()
    }
}

impl<B: Backend> Drop for PooledConnection<B> {
    fn drop(&mut self) {
        let conn = self.conn.take();
        let mut state = self.pool.lock_state();
        state.lent = state.lent.saturating_sub(1);

        let Some(conn) = conn else {
            return;
        };
        if self.broken || state.closed {
            drop(state);
            debug!(broken = self.broken, "discarding connection on release");
            discard::<B>(conn);
        } else {
            state.idle.push_back(conn);
        }
    }
}

async fn close_quietly<B: Backend>(conn: B::Connection) {
    if let Err(err) = B::close(conn).await {
        debug!(error = %err, "error while closing connection");
    }
}

/// 在 drop 中无法 await，交给当前运行时后台关闭；没有运行时则直接丢弃
fn discard<B: Backend>(conn: B::Connection) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(close_quietly::<B>(conn));
        }
        Err(_) => drop(conn),
    }
}
