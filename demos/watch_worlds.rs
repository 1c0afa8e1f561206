//! Follow the worlds contract of a live node and print every checkpoint.
//!
//! Run with: `cargo run --example watch_worlds [ACCOUNT]`
//!
//! **Requires** `STICKEMALL_WS_URL` and the three `STICKEMALL_*_ADDRESS`
//! variables. Without `ACCOUNT` every minted world is listed; with it, only
//! the worlds that account owns or may edit. Stop with Ctrl-C.

use std::sync::Arc;

use alloy::primitives::Address;
use stickem_sync::domain::worlds::{self, WorldsFold};
use stickem_sync::{EventNormalizer, EventsEffect, RpcConfig, RpcLogSource, SyncStatus, rpc};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = RpcConfig::from_env()?;
    let fold = match std::env::args().nth(1) {
        Some(account) => WorldsFold::watching(account.parse::<Address>()?),
        None => WorldsFold::minted(),
    };

    let provider = rpc::connect(&config.ws_url).await?;
    let source = RpcLogSource::new(provider, config.worlds);
    let normalizer = EventNormalizer::new(worlds::schema()?);

    let handle = EventsEffect::new(Arc::new(source), normalizer, fold).start(
        stickem_sync::Checkpoint::genesis(),
        |checkpoint| {
            println!(
                "block {:?}: {} worlds",
                checkpoint.last_processed_block,
                checkpoint.state.worlds.len()
            );
            for world in checkpoint.state.worlds.iter() {
                println!(
                    "  world {} owned={:?} allowed={:?}",
                    world.world_id, world.owned, world.allowed
                );
            }
        },
    );

    if let SyncStatus::Failed(reason) = handle.synced().await {
        eprintln!("catch-up failed: {reason}");
    } else {
        tokio::signal::ctrl_c().await?;
    }
    handle.shutdown().await?;
    Ok(())
}
