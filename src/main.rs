use slog::o;
use slog::Drain;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

/// Build an `Error::Internal` from a format string
macro_rules! se {
    ($($arg:tt)*) => {
        crate::error::Error::Internal(format!($($arg)*))
    };
}

mod auth;
mod config;
mod crypto;
mod error;
mod identity;
mod logging;
mod models;
mod recommend;
mod service;
mod spotify;
mod store;
#[cfg(test)]
mod testing;
mod utils;

use config::{env_or, Config};

lazy_static::lazy_static! {
    // The "base" logger that all modules should branch off of
    pub static ref BASE_LOG: slog::Logger = {
        let level: slog::Level = env_or("LOG_LEVEL", "INFO")
                .parse()
                .unwrap_or(slog::Level::Info);
        let format = env_or("LOG_FORMAT", "json").to_lowercase();
        if format.trim() == "pretty" {
            let decorator = slog_term::TermDecorator::new().build();
            let drain = slog_term::CompactFormat::new(decorator).build().fuse();
            let drain = slog_async::Async::new(drain).build().fuse();
            let drain = slog::LevelFilter::new(drain, level).fuse();
            slog::Logger::root(drain, o!())
        } else {
            let drain = slog_json::Json::default(std::io::stderr()).fuse();
            let drain = slog_async::Async::new(drain).build().fuse();
            let drain = slog::LevelFilter::new(drain, level).fuse();
            slog::Logger::root(drain, o!())
        }
    };

    // Base logger
    pub static ref LOG: slog::Logger = BASE_LOG.new(slog::o!("app" => "dailytune"));
}

#[async_std::main]
async fn main() -> anyhow::Result<()> {
    // try sourcing a .env if one exists
    dotenv::dotenv().ok();
    let config = Config::load()?;
    config.initialize()?;

    let cipher = crypto::Cipher::new(config.enc_key.as_bytes())?;
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.db_url)
        .await?;
    let store = Arc::new(store::PgStore::new(
        pool,
        cipher,
        config.session_expiration_seconds,
    )?);
    store.migrate().await?;
    slog::info!(LOG, "database ready");

    let ctx = service::Context {
        spotify: Arc::new(spotify::SpotifyClient::new(&config)),
        tokens: store.clone(),
        recommendations: store.clone(),
        identity: store,
        pending: identity::PendingConnections::new(config.pending_connection_seconds),
        config: Arc::new(config),
    };
    service::start(ctx).await?;
    Ok(())
}
