//! 日志初始化
//!
//!   sqlxmodel-cli --debug ...              # 控制台输出 debug 日志（含每条 SQL）
//!   RUST_LOG=sqlxmodel=debug sqlxmodel-cli # 细粒度控制

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// `debug` 为真时默认级别为 debug，否则为 info；显式设置的 RUST_LOG 总是优先
pub fn init_tracing(debug: bool) -> Result<()> {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(debug)
        .compact()
        .try_init()
        .map_err(|err| anyhow!(err))
}
