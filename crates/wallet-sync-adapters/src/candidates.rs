use std::time::Duration;

use alloy::primitives::{Address, U256};
use tracing::debug;

use wallet_sync_core::{
    CandidateFactory, ChainReader, EndpointKind, EndpointSpec, PortError, WalletGateway,
};

use crate::eip1193::Eip1193Adapter;
use crate::rpc::{HttpEndpoint, WsEndpoint};

#[derive(Debug, Clone)]
pub enum RpcCandidate {
    Streaming(WsEndpoint),
    Polling(HttpEndpoint),
    Injected(Eip1193Adapter),
}

impl RpcCandidate {
    pub fn kind(&self) -> EndpointKind {
        match self {
            RpcCandidate::Streaming(_) => EndpointKind::Streaming,
            RpcCandidate::Polling(_) => EndpointKind::Polling,
            RpcCandidate::Injected(_) => EndpointKind::Injected,
        }
    }

    fn reader(&self) -> &dyn ChainReader {
        match self {
            RpcCandidate::Streaming(ws) => ws,
            RpcCandidate::Polling(http) => http,
            RpcCandidate::Injected(wallet) => wallet,
        }
    }
}

impl ChainReader for RpcCandidate {
    fn block_number(&self) -> Result<u64, PortError> {
        self.reader().block_number()
    }

    fn chain_id(&self) -> Result<u64, PortError> {
        self.reader().chain_id()
    }

    fn balance(&self, account: Address) -> Result<U256, PortError> {
        self.reader().balance(account)
    }
}

/// Connects planned endpoints: WebSocket for streaming, HTTP for polling,
/// and the shared wallet adapter for the injected slot.
#[derive(Debug, Clone)]
pub struct RpcCandidateFactory {
    injected: Eip1193Adapter,
    timeout: Duration,
}

impl RpcCandidateFactory {
    pub fn new(injected: Eip1193Adapter, timeout: Duration) -> Self {
        Self { injected, timeout }
    }
}

impl CandidateFactory for RpcCandidateFactory {
    type Candidate = RpcCandidate;

    fn connect(&self, endpoint: &EndpointSpec) -> Result<RpcCandidate, PortError> {
        let url = || {
            endpoint.url.as_deref().ok_or_else(|| {
                PortError::Validation(format!("{:?} endpoint without url", endpoint.kind))
            })
        };
        let candidate = match endpoint.kind {
            EndpointKind::Streaming => {
                RpcCandidate::Streaming(WsEndpoint::connect(url()?, self.timeout)?)
            }
            EndpointKind::Polling => {
                let interval = endpoint.polling_interval_ms.unwrap_or(4_000);
                RpcCandidate::Polling(HttpEndpoint::new(url()?, interval, self.timeout)?)
            }
            EndpointKind::Injected => {
                if !self.injected.is_present() {
                    return Err(PortError::NotFound("no injected wallet".to_owned()));
                }
                RpcCandidate::Injected(self.injected.clone())
            }
        };
        debug!(endpoint = endpoint.label(), kind = ?endpoint.kind, "candidate built");
        Ok(candidate)
    }
}
