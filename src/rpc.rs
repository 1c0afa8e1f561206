//! JSON-RPC log source over a WebSocket provider.
//!
//! [`RpcLogSource`] answers historical queries with `eth_getLogs` and live
//! subscriptions with `eth_subscribe("logs")`. Node-side log subscriptions
//! cannot start in the past, so a subscription is opened first and the gap
//! `from_block..=head` is back-filled with a historical query; both are
//! chained into one stream and overlaps are left to the consumer's dedup.

use std::fmt;

use alloy::primitives::{Address, TxHash};
use alloy::providers::{DynProvider, Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::Log;
use tokio_stream::StreamExt;

use crate::error::{ConfigError, SourceError};
use crate::event::{Event, EventNormalizer, LogFilter};
use crate::source::{LiveSubscription, LogSource, SourceFuture};

/// WebSocket endpoint of the node.
pub const WS_URL_ENV: &str = "STICKEMALL_WS_URL";
/// Address of the worlds contract.
pub const WORLDS_ADDRESS_ENV: &str = "STICKEMALL_WORLDS_ADDRESS";
/// Address of the worlds management contract.
pub const WORLDS_MANAGEMENT_ADDRESS_ENV: &str = "STICKEMALL_WORLDS_MANAGEMENT_ADDRESS";
/// Address of the economy contract.
pub const ECONOMY_ADDRESS_ENV: &str = "STICKEMALL_ECONOMY_ADDRESS";

/// Node endpoint and contract addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcConfig {
    /// WebSocket URL of the node.
    pub ws_url: String,
    /// Worlds contract (ERC-721 of worlds).
    pub worlds: Address,
    /// Worlds management contract (album definitions).
    pub worlds_management: Address,
    /// Economy contract (ERC-1155 of albums, packs and stickers).
    pub economy: Address,
}

impl RpcConfig {
    /// Read the configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] for an unset variable and
    /// [`ConfigError::Invalid`] for an address that does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            ws_url: required(WS_URL_ENV)?,
            worlds: address_var(WORLDS_ADDRESS_ENV)?,
            worlds_management: address_var(WORLDS_MANAGEMENT_ADDRESS_ENV)?,
            economy: address_var(ECONOMY_ADDRESS_ENV)?,
        })
    }
}

fn required(var: &'static str) -> Result<String, ConfigError> {
    std::env::var(var).map_err(|_| ConfigError::Missing(var))
}

fn address_var(var: &'static str) -> Result<Address, ConfigError> {
    parse_address(var, &required(var)?)
}

fn parse_address(var: &'static str, raw: &str) -> Result<Address, ConfigError> {
    raw.trim().parse().map_err(|e| ConfigError::Invalid {
        var,
        reason: format!("{e}"),
    })
}

/// Connect a type-erased WebSocket provider.
///
/// # Errors
///
/// Returns [`SourceError::Rpc`] if the connection cannot be established.
pub async fn connect(ws_url: &str) -> Result<DynProvider, SourceError> {
    let provider = ProviderBuilder::new()
        .connect_ws(WsConnect::new(ws_url))
        .await
        .map_err(|e| SourceError::rpc("connect", e))?;
    Ok(DynProvider::new(provider))
}

/// A [`LogSource`] for one contract, backed by a JSON-RPC provider.
///
/// `Clone` is cheap: the provider is shared.
#[derive(Clone)]
pub struct RpcLogSource {
    provider: DynProvider,
    address: Address,
}

impl fmt::Debug for RpcLogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcLogSource")
            .field("address", &self.address)
            .finish()
    }
}

impl RpcLogSource {
    /// Bind `provider` to the contract at `address`.
    pub fn new(provider: DynProvider, address: Address) -> Self {
        Self { provider, address }
    }

    /// The contract address logs are read from.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Fetch a transaction receipt and decode its logs.
    ///
    /// Logs of other contracts and logs unknown to the normalizer's schema
    /// are skipped. Used for immediate feedback after a write.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Rpc`] if the request fails or the receipt is
    /// not available yet.
    pub async fn receipt_events(
        &self,
        tx_hash: TxHash,
        normalizer: &EventNormalizer,
    ) -> Result<Vec<Event>, SourceError> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| SourceError::rpc("eth_getTransactionReceipt", e))?
            .ok_or_else(|| {
                SourceError::rpc("eth_getTransactionReceipt", format!("no receipt for {tx_hash}"))
            })?;

        let own: Vec<Log> = receipt
            .logs()
            .iter()
            .filter(|log| log.inner.address == self.address)
            .cloned()
            .collect();
        Ok(normalizer.decode_receipt(&own))
    }

    async fn get_logs(
        &self,
        filter: &LogFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, SourceError> {
        let rpc_filter = filter
            .to_rpc_filter(self.address)
            .from_block(from_block)
            .to_block(to_block);
        self.provider
            .get_logs(&rpc_filter)
            .await
            .map_err(|e| SourceError::rpc("eth_getLogs", e))
    }
}

impl LogSource for RpcLogSource {
    fn head_block(&self) -> SourceFuture<'_, u64> {
        Box::pin(async move {
            self.provider
                .get_block_number()
                .await
                .map_err(|e| SourceError::rpc("eth_blockNumber", e))
        })
    }

    fn query_logs<'a>(
        &'a self,
        filter: &'a LogFilter,
        from_block: u64,
        to_block: u64,
    ) -> SourceFuture<'a, Vec<Log>> {
        Box::pin(self.get_logs(filter, from_block, to_block))
    }

    fn subscribe<'a>(
        &'a self,
        filter: &'a LogFilter,
        from_block: u64,
    ) -> SourceFuture<'a, LiveSubscription> {
        Box::pin(async move {
            let subscription = self
                .provider
                .subscribe_logs(&filter.to_rpc_filter(self.address))
                .await
                .map_err(|e| SourceError::rpc("eth_subscribe", e))?;
            let id = *subscription.local_id();

            let provider = self.provider.clone();
            let release = move || async move {
                if let Err(e) = provider.unsubscribe(id).await {
                    tracing::warn!(subscription = %id, error = %e, "unsubscribe failed");
                }
            };

            let backfill = match self.head_block().await {
                Ok(head) if from_block <= head => {
                    match self.get_logs(filter, from_block, head).await {
                        Ok(logs) => logs,
                        Err(e) => {
                            release().await;
                            return Err(e);
                        }
                    }
                }
                Ok(_) => Vec::new(),
                Err(e) => {
                    release().await;
                    return Err(e);
                }
            };
            tracing::debug!(
                event = %filter.event,
                from_block,
                backfilled = backfill.len(),
                "log subscription opened"
            );

            let stream = tokio_stream::iter(backfill).chain(subscription.into_stream());
            Ok(LiveSubscription::new(stream).with_unsubscribe(release))
        })
    }
}
