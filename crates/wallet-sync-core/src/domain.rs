use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::networks::UNKNOWN_NETWORK;

/// Balance shown before the first refresh completes.
pub const DEFAULT_BALANCE: &str = "0.0";

/// Identity of one resolved provider pair. A new id is minted on every resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointKind {
    /// `ws://` / `wss://` endpoint kept open for the lifetime of the provider.
    Streaming,
    /// `http://` / `https://` endpoint polled at the configured interval.
    Polling,
    /// The injected wallet's own connection.
    Injected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSpec {
    pub kind: EndpointKind,
    pub url: Option<String>,
    pub polling_interval_ms: Option<u64>,
}

impl EndpointSpec {
    pub fn injected() -> Self {
        Self {
            kind: EndpointKind::Injected,
            url: None,
            polling_interval_ms: None,
        }
    }

    pub fn label(&self) -> &str {
        self.url.as_deref().unwrap_or("injected")
    }
}

/// Snapshot-side view of the aggregate provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderHandle {
    pub id: ProviderId,
    pub candidates: Vec<EndpointKind>,
    pub quorum: usize,
}

/// Snapshot-side view of the signer. Always backed by the injected candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerHandle {
    pub provider: ProviderId,
    pub address: Address,
    pub source: EndpointKind,
}

impl SignerHandle {
    pub fn injected(provider: ProviderId, address: Address) -> Self {
        Self {
            provider,
            address,
            source: EndpointKind::Injected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub has_provider: bool,
    pub is_authorized: bool,
    pub is_known_wallet_kind: bool,
    /// `Address::ZERO` means no account.
    pub account: Address,
    /// 0 means unset.
    pub chain_id: u64,
    pub network_name: String,
    /// Human-readable native balance, e.g. `"1.5"`.
    pub balance: String,
    pub current_block: u64,
    pub last_balance_block: u64,
    pub signer: Option<SignerHandle>,
    pub provider: Option<ProviderHandle>,
    pub provider_urls: Vec<String>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            has_provider: false,
            is_authorized: false,
            is_known_wallet_kind: false,
            account: Address::ZERO,
            chain_id: 0,
            network_name: UNKNOWN_NETWORK.to_owned(),
            balance: DEFAULT_BALANCE.to_owned(),
            current_block: 0,
            last_balance_block: 0,
            signer: None,
            provider: None,
            provider_urls: Vec::new(),
        }
    }
}
