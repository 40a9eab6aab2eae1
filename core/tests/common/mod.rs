//! 测试用的内存后端
//!
//! 每个测试通过 `MockDb::register()` 拿到独立的状态，状态按 `Credentials::database` 查找，
//! 因此多个测试可以并行运行而互不干扰。

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use sqlxmodel::{
    Backend, ColumnType, Credentials, DatabaseInfo, DbDriver, Result, SqlxModelError, Statement,
    Value,
};

#[derive(Default)]
pub struct MockState {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    next_id: AtomicUsize,
    pub fail_connect: AtomicBool,
    /// 已打开这么多个连接之后，后续连接全部失败
    pub fail_after: Mutex<Option<usize>>,
    /// ping / 执行语句都会失败的连接 id
    pub dead: Mutex<HashSet<usize>>,
    pub statements: Mutex<Vec<String>>,
    pub execute_delay: Mutex<Option<Duration>>,
}

impl MockState {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn kill(&self, id: usize) {
        self.dead.lock().unwrap().insert(id);
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    pub fn set_execute_delay(&self, delay: Duration) {
        *self.execute_delay.lock().unwrap() = Some(delay);
    }

    pub fn fail_after(&self, opened: usize) {
        *self.fail_after.lock().unwrap() = Some(opened);
    }

    fn is_dead(&self, id: usize) -> bool {
        self.dead.lock().unwrap().contains(&id)
    }
}

fn registry() -> &'static Mutex<HashMap<String, Arc<MockState>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<MockState>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn lookup(database: &str) -> Arc<MockState> {
    registry()
        .lock()
        .unwrap()
        .get(database)
        .cloned()
        .expect("mock database was not registered")
}

fn connection_lost() -> SqlxModelError {
    SqlxModelError::Connection(sqlx::Error::Io(std::io::Error::new(
        std::io::ErrorKind::ConnectionReset,
        "connection reset by mock",
    )))
}

pub struct MockDb;

pub struct MockConnection {
    pub id: usize,
    state: Arc<MockState>,
}

impl MockDb {
    /// 注册一个新的模拟数据库，返回对应的凭据和状态
    pub fn register() -> (Credentials, Arc<MockState>) {
        let name = format!("mock-{}", uuid::Uuid::new_v4().simple());
        let state = Arc::new(MockState::default());
        registry()
            .lock()
            .unwrap()
            .insert(name.clone(), Arc::clone(&state));
        let credentials = Credentials::new("127.0.0.1", 3306, "www-data", "1234", name);
        (credentials, state)
    }
}

impl DatabaseInfo for MockDb {
    fn get_driver() -> DbDriver {
        DbDriver::Sqlite
    }
}

#[async_trait::async_trait]
impl Backend for MockDb {
    type Connection = MockConnection;

    async fn connect(credentials: &Credentials) -> Result<MockConnection> {
        let state = lookup(&credentials.database);
        let limit_reached = state
            .fail_after
            .lock()
            .unwrap()
            .map(|limit| state.opened() >= limit)
            .unwrap_or(false);
        if state.fail_connect.load(Ordering::SeqCst) || limit_reached {
            return Err(SqlxModelError::Connection(sqlx::Error::Io(
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused by mock"),
            )));
        }
        state.opened.fetch_add(1, Ordering::SeqCst);
        let id = state.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection { id, state })
    }

    async fn ping(conn: &mut MockConnection) -> Result<()> {
        if conn.state.is_dead(conn.id) {
            return Err(connection_lost());
        }
        Ok(())
    }

    async fn close(conn: MockConnection) -> Result<()> {
        conn.state.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn execute(conn: &mut MockConnection, statement: &Statement) -> Result<u64> {
        conn.state
            .statements
            .lock()
            .unwrap()
            .push(statement.sql.clone());
        let delay = *conn.state.execute_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if conn.state.is_dead(conn.id) {
            return Err(connection_lost());
        }
        Ok(1)
    }

    async fn fetch_all(
        conn: &mut MockConnection,
        statement: &Statement,
        _columns: &[ColumnType],
    ) -> Result<Vec<Vec<Value>>> {
        conn.state
            .statements
            .lock()
            .unwrap()
            .push(statement.sql.clone());
        if conn.state.is_dead(conn.id) {
            return Err(connection_lost());
        }
        Ok(Vec::new())
    }
}

/// 等待后台任务（例如 drop 时派生的关闭任务）完成
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within 1s");
}
