use alloy::primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::EndpointSpec;

#[derive(Debug, Error)]
pub enum PortError {
    #[error("port not implemented: {0}")]
    NotImplemented(&'static str),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("policy error: {0}")]
    Policy(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderEventKind {
    AccountsChanged,
    ChainChanged,
}

/// Raw wallet notification payloads, exactly as the wallet emits them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletEvent {
    /// Hex-string chain id.
    ChainChanged(String),
    AccountsChanged(Vec<String>),
}

impl WalletEvent {
    pub fn kind(&self) -> ProviderEventKind {
        match self {
            WalletEvent::ChainChanged(_) => ProviderEventKind::ChainChanged,
            WalletEvent::AccountsChanged(_) => ProviderEventKind::AccountsChanged,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEvent {
    pub sequence: u64,
    pub subscription: SubscriptionId,
    pub event: WalletEvent,
}

/// Capability over the injected wallet.
///
/// Listeners are registered with [`subscribe`](Self::subscribe); notifications for
/// active subscriptions queue up inside the gateway until
/// [`drain_events`](Self::drain_events) collects them. Notifications are never
/// delivered for a subscription after [`unsubscribe`](Self::unsubscribe).
pub trait WalletGateway {
    fn is_present(&self) -> bool;
    /// The injected object self-identifies as MetaMask.
    fn is_known_wallet_kind(&self) -> bool;
    /// `eth_accounts`: never prompts.
    fn query_accounts(&self) -> Result<Vec<Address>, PortError>;
    /// `eth_requestAccounts`: may prompt and may be rejected.
    fn request_accounts(&self) -> Result<Vec<Address>, PortError>;
    fn subscribe(&self, kind: ProviderEventKind) -> Result<SubscriptionId, PortError>;
    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), PortError>;
    fn drain_events(&self) -> Result<Vec<ProviderEvent>, PortError>;
}

/// Read-only chain access, implemented by every provider candidate.
pub trait ChainReader {
    fn block_number(&self) -> Result<u64, PortError>;
    fn chain_id(&self) -> Result<u64, PortError>;
    fn balance(&self, account: Address) -> Result<U256, PortError>;
}

/// Builds one provider candidate per planned endpoint.
pub trait CandidateFactory {
    type Candidate: ChainReader + Clone;

    fn connect(&self, endpoint: &EndpointSpec) -> Result<Self::Candidate, PortError>;
}
