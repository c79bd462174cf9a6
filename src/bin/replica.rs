//! Pool Replica Program
//!
//! Keeps the configured pools in sync with the chain: cold starts every replica, then
//! polls `eth_getLogs` for new blocks and hands each log to the replicas watching it.
//!
//! Polling only ever asks for blocks past the last range, and `eth_getLogs` answers from
//! the canonical chain, so it never hands back a log flagged `removed`. A reorg under
//! the head reaches the replicas only when the replacement logs arrive out of order
//! (an ordering anomaly) or through `invalidate`. A subscription source delivering
//! `removed` logs would reach `ReplicaSet::reorged`.
use alloy::providers::{Provider, ProviderBuilder};
use anyhow::{bail, Context, Result};
use pool_replica::{RawLog, ReplicaBuilder, ReplicaConfig, RpcStateReader, StateReader};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// The number of blocks to query in one call to get_logs
const STEP_SIZE: u64 = 2_000;
const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Initialize logging
    let filter = EnvFilter::builder().parse(
        "info,pool_replica=debug,alloy_transport_http=off,alloy_rpc_client=off,hyper_util=off,reqwest=off",
    )?;
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let rpc_url = std::env::var("RPC_URL").context("RPC_URL must be set")?;
    let config_path =
        std::env::var("REPLICA_CONFIG").unwrap_or_else(|_| "replica.json".to_string());
    let config = ReplicaConfig::from_file(&config_path)
        .with_context(|| format!("Failed to load {config_path}"))?;

    let provider = Arc::new(ProviderBuilder::new().connect_http(rpc_url.parse()?));
    let chain_id = provider.get_chain_id().await?;
    if chain_id != config.chain.id() {
        bail!(
            "{config_path} replicates {} pools but the node serves chain {chain_id}",
            config.chain
        );
    }
    let reader: Arc<dyn StateReader> = Arc::new(RpcStateReader::new(provider.clone()));
    let replicas = ReplicaBuilder::from_config(config).build(reader)?;

    // Everything up to the current head is covered by the cold start builds
    let mut from_block = provider.get_block_number().await? + 1;
    let results = replicas.initialize().await;
    for (replica, result) in replicas.replicas().iter().zip(results) {
        if let Err(e) = result {
            warn!(pool = replica.name(), %e, "Cold start failed, retrying in the background");
        }
    }

    let filter = replicas.filter();
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                replicas.shutdown();
                break;
            }
        }

        let head = match provider.get_block_number().await {
            Ok(head) => head,
            Err(e) => {
                warn!(%e, "Failed to fetch the head block");
                continue;
            }
        };

        while from_block <= head {
            let to_block = (from_block + STEP_SIZE - 1).min(head);
            let range = filter.clone().from_block(from_block).to_block(to_block);
            let logs = match provider.get_logs(&range).await {
                Ok(logs) => logs,
                Err(e) => {
                    warn!(from_block, to_block, %e, "Failed to fetch logs");
                    break;
                }
            };

            for log in &logs {
                let raw = match RawLog::try_from(log) {
                    Ok(raw) => raw,
                    Err(e) => {
                        debug!(%e, "Skipping log");
                        continue;
                    }
                };
                // Only a subscription source sets this, see the module docs
                if log.removed {
                    replicas.reorged(&raw);
                    continue;
                }
                for (index, outcome) in replicas.dispatch(&raw) {
                    debug!(
                        pool = replicas.replicas()[index].name(),
                        block = raw.block_number,
                        index = raw.log_index,
                        ?outcome,
                        "Dispatched log"
                    );
                }
            }
            from_block = to_block + 1;
        }

        for (pool, phase) in replicas.phases() {
            debug!(%pool, ?phase, "Replica phase");
        }
    }

    Ok(())
}
