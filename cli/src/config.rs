//! 应用配置
//!
//! 加载顺序：内置默认值 → 覆盖文件（TOML，按表递归合并）→ 环境变量（含 `.env`）。

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlxmodel::{Credentials, DbDriver, PoolOptions};

/// 未指定 `--config` 时，若当前目录存在此文件则自动加载
pub const DEFAULT_OVERRIDE_FILE: &str = "config_override.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub debug: bool,
    pub db: DbConfig,
    pub session: SessionConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            debug: true,
            db: DbConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub driver: DbDriver,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// SQLite 下为数据库文件路径；覆盖文件中也可以写作 `db`
    pub database: String,
    pub min_size: usize,
    pub max_size: usize,
    /// 秒；不设置表示一直等待
    pub acquire_timeout: Option<f64>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            driver: DbDriver::MySql,
            host: "127.0.0.1".to_string(),
            port: 3306,
            user: "www-data".to_string(),
            password: "1234".to_string(),
            database: "awesome".to_string(),
            min_size: 1,
            max_size: 10,
            acquire_timeout: None,
        }
    }
}

impl DbConfig {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(
            self.host.clone(),
            self.port,
            self.user.clone(),
            self.password.clone(),
            self.database.clone(),
        )
    }

    pub fn pool_options(&self) -> Result<PoolOptions> {
        let mut options = PoolOptions::new()
            .min_size(self.min_size)
            .max_size(self.max_size);
        if let Some(secs) = self.acquire_timeout {
            let timeout = Duration::try_from_secs_f64(secs)
                .with_context(|| format!("Invalid db.acquire_timeout: {}", secs))?;
            options = options.acquire_timeout(timeout);
        }
        options.validate()?;
        Ok(options)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub secret: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret: "Awesome".to_string(),
        }
    }
}

/// 加载配置
///
/// `path` 显式给出时文件必须存在；否则仅在 [`DEFAULT_OVERRIDE_FILE`] 存在时使用它
pub fn load(path: Option<&Path>) -> Result<AppConfig> {
    let overlay = match path {
        Some(path) => Some(
            fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {:?}", path))?,
        ),
        None => {
            let default = Path::new(DEFAULT_OVERRIDE_FILE);
            if default.exists() {
                Some(
                    fs::read_to_string(default)
                        .with_context(|| format!("Failed to read config file {:?}", default))?,
                )
            } else {
                None
            }
        }
    };

    let mut config = match overlay {
        Some(text) => merge_override(&text)?,
        None => AppConfig::default(),
    };
    apply_env(&mut config, |key| std::env::var(key).ok())?;
    Ok(config)
}

/// 把 TOML 覆盖内容合并到默认配置上，覆盖中未出现的键保持默认值
pub fn merge_override(text: &str) -> Result<AppConfig> {
    let mut base =
        toml::Value::try_from(AppConfig::default()).context("Failed to encode default config")?;
    let mut overlay: toml::Value =
        toml::from_str(text).context("Failed to parse config override")?;
    rename_db_name_key(&mut overlay);
    merge(&mut base, overlay);
    base.try_into().context("Invalid configuration")
}

/// 覆盖文件里的 `[db] db = ...` 等同于 `database`，两者同时出现时 `database` 优先
fn rename_db_name_key(overlay: &mut toml::Value) {
    let Some(db) = overlay.get_mut("db").and_then(toml::Value::as_table_mut) else {
        return;
    };
    if let Some(name) = db.remove("db") {
        db.entry("database").or_insert(name);
    }
}

/// 递归合并：两边都是表时逐键合并，否则覆盖值直接替换
pub fn merge(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// 用环境变量覆盖单个数据库配置项
pub fn apply_env<F>(config: &mut AppConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(driver) = lookup("DB_DRIVER") {
        config.db.driver = driver.parse()?;
    }
    if let Some(host) = lookup("DB_HOST") {
        config.db.host = host;
    }
    if let Some(port) = lookup("DB_PORT") {
        config.db.port = port
            .parse()
            .with_context(|| format!("Invalid DB_PORT: {}", port))?;
    }
    if let Some(user) = lookup("DB_USER") {
        config.db.user = user;
    }
    if let Some(password) = lookup("DB_PASSWORD") {
        config.db.password = password;
    }
    if let Some(database) = lookup("DB_NAME") {
        config.db.database = database;
    }
    Ok(())
}
