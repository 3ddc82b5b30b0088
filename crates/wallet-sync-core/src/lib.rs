pub mod balance;
pub mod contract;
pub mod domain;
pub mod endpoints;
pub mod networks;
pub mod ports;
pub mod state_machine;
pub mod synchronizer;

pub use balance::{BalancePolicy, BalanceRequest, DEFAULT_BALANCE_UPDATE_INTERVAL};
pub use contract::{load_contract, parse_abi, BoundContract, ContractAddress, ContractBinder};
pub use domain::{
    ConnectionState, EndpointKind, EndpointSpec, ProviderHandle, ProviderId, SignerHandle,
    DEFAULT_BALANCE,
};
pub use endpoints::{endpoint_kind, plan_endpoints, ConfigError, FallbackProvider};
pub use networks::{network_name, parse_chain_id, UNKNOWN_NETWORK};
pub use ports::{
    CandidateFactory, ChainReader, PortError, ProviderEvent, ProviderEventKind, SubscriptionId,
    WalletEvent, WalletGateway,
};
pub use state_machine::{Applied, StateStore, Transition, TransitionError};
pub use synchronizer::{Subscriptions, SyncError, SyncOptions, Synchronizer};
