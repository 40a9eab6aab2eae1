mod config;
mod models;
mod tracing_setup;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sqlxmodel::{Backend, DbDriver, DbPool, Model};
use tracing::{debug, info};

use config::AppConfig;
use models::{Blog, Comment, User};

#[derive(Parser, Debug)]
#[command(name = "sqlxmodel-cli")]
#[command(about = "Smoke test and schema tools for sqlxmodel")]
#[command(version)]
struct Args {
    /// TOML override file merged over the built-in defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Debug logging (prints every SQL statement)
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Save a user, find it by key, remove it and check that it is gone
    Smoke {
        /// Create the users / blogs / comments tables first
        #[arg(long)]
        init_schema: bool,
    },
    /// Print CREATE TABLE statements for the configured driver
    Schema,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    dotenvy::dotenv().ok();
    let config = config::load(args.config.as_deref())?;
    tracing_setup::init_tracing(args.debug || config.debug)?;

    match args.command {
        Command::Config => {
            let text = toml::to_string_pretty(&config).context("Failed to encode config")?;
            println!("{}", text);
        }
        Command::Schema => print_schema(config.db.driver)?,
        Command::Smoke { init_schema } => match config.db.driver {
            DbDriver::MySql => smoke::<sqlx::MySql>(&config, init_schema).await?,
            DbDriver::Postgres => smoke::<sqlx::Postgres>(&config, init_schema).await?,
            DbDriver::Sqlite => smoke::<sqlx::Sqlite>(&config, init_schema).await?,
        },
    }

    Ok(())
}

fn print_schema(driver: DbDriver) -> Result<()> {
    for schema in [User::schema()?, Blog::schema()?, Comment::schema()?] {
        println!("{}\n", schema.create_table_sql(driver));
    }
    Ok(())
}

async fn smoke<B: Backend>(config: &AppConfig, init_schema: bool) -> Result<()> {
    println!(
        "🔌 Connecting to {} database '{}' at {}:{}",
        config.db.driver, config.db.database, config.db.host, config.db.port
    );
    let pool = DbPool::<B>::create(config.db.credentials(), config.db.pool_options()?)
        .await
        .context("Failed to create connection pool")?;
    info!(driver = %config.db.driver, stats = ?pool.stats(), "pool ready");

    let result = run_smoke(&pool, init_schema).await;
    pool.close_all().await;
    info!(ok = result.is_ok(), "smoke finished, pool closed");
    result
}

async fn run_smoke<B: Backend>(pool: &DbPool<B>, init_schema: bool) -> Result<()> {
    if init_schema {
        println!("📋 Creating tables...");
        User::create_table(pool).await.context("Failed to create users")?;
        Blog::create_table(pool).await.context("Failed to create blogs")?;
        Comment::create_table(pool)
            .await
            .context("Failed to create comments")?;
    }

    let mut user = User::new_record()?
        .with("name", "Test")?
        .with("email", "test1@example.com")?
        .with("password", "123")?
        .with("image", "about:blank")?;
    user.save(pool).await.context("Failed to save user")?;

    let key = user
        .primary_key()
        .cloned()
        .context("Saved user has no primary key")?;
    println!("✅ Saved user {:?}", key.as_str().unwrap_or_default());

    let found = User::find(pool, key.clone())
        .await?
        .context("Saved user was not found")?;
    if found.get_str("name")? != Some("Test") {
        bail!("Found user has unexpected name: {:?}", found.get("name")?);
    }
    debug!(user = ?found, "found saved user");
    println!("{}", serde_json::to_string_pretty(&found)?);

    found.remove(pool).await.context("Failed to remove user")?;
    if User::find(pool, key).await?.is_some() {
        bail!("User is still present after remove");
    }
    println!("✅ Removed user, lookup returns nothing");

    Ok(())
}
