//! Operational sweep deleting expired authorization states.
//!
//! States are normally deleted on consumption; abandoned flows leave rows
//! behind until this sweep (or the next deployment's cron) removes them.

use std::sync::Arc;

use anyhow::{Context, Result};
use connections::{config::ConfigLoader, db, repositories::AuthorizationStateRepository};

#[tokio::main]
async fn main() -> Result<()> {
    let loader = ConfigLoader::new();
    let config = loader.load().context("loading configuration")?;

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;

    let state_repo = AuthorizationStateRepository::new(Arc::new(db));
    let removed = state_repo
        .cleanup_expired()
        .await
        .context("deleting expired authorization states")?;

    println!("Removed {} expired authorization state(s).", removed);

    Ok(())
}
