pub mod candidates;
pub mod config;
pub mod eip1193;
pub mod rpc;
pub mod runtime;

pub use candidates::{RpcCandidate, RpcCandidateFactory};
pub use config::SyncConfig;
pub use eip1193::Eip1193Adapter;
pub use rpc::{HttpEndpoint, WsEndpoint};
pub use runtime::{DriverError, SyncDriver, SyncHandle};
