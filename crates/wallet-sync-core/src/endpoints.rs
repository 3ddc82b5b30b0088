use alloy::primitives::{Address, U256};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::domain::{EndpointKind, EndpointSpec, ProviderHandle, ProviderId};
use crate::ports::{CandidateFactory, ChainReader, PortError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("wrong endpoint url {url:?}: must be ws(s) or http(s)")]
    UnsupportedScheme { url: String },
    #[error("malformed endpoint url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

pub fn endpoint_kind(raw: &str) -> Result<EndpointKind, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        url: raw.to_owned(),
        reason: e.to_string(),
    })?;
    let kind = match url.scheme() {
        "ws" | "wss" => EndpointKind::Streaming,
        "http" | "https" => EndpointKind::Polling,
        _ => {
            return Err(ConfigError::UnsupportedScheme {
                url: raw.to_owned(),
            })
        }
    };
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConfigError::InvalidUrl {
            url: raw.to_owned(),
            reason: "missing host".to_owned(),
        });
    }
    Ok(kind)
}

/// One candidate per configured url, in order, followed by the injected wallet.
pub fn plan_endpoints(
    urls: &[String],
    polling_interval_ms: u64,
) -> Result<Vec<EndpointSpec>, ConfigError> {
    let mut specs = Vec::with_capacity(urls.len() + 1);
    for url in urls {
        let kind = endpoint_kind(url)?;
        specs.push(EndpointSpec {
            kind,
            url: Some(url.clone()),
            polling_interval_ms: (kind == EndpointKind::Polling).then_some(polling_interval_ms),
        });
    }
    specs.push(EndpointSpec::injected());
    Ok(specs)
}

#[derive(Debug, Clone)]
struct Slot<C> {
    spec: EndpointSpec,
    reader: C,
}

/// Aggregate over provider candidates. Reads go to candidates in priority
/// order and the first answer wins; the aggregate is healthy while at least
/// `quorum` candidates answer.
#[derive(Debug, Clone)]
pub struct FallbackProvider<C> {
    id: ProviderId,
    quorum: usize,
    slots: Vec<Slot<C>>,
}

impl<C> FallbackProvider<C>
where
    C: ChainReader + Clone,
{
    /// Connects every planned candidate. Remote candidates that fail to connect
    /// are skipped; the injected candidate is mandatory since the signer
    /// derives from it.
    pub fn connect<F>(
        id: ProviderId,
        specs: &[EndpointSpec],
        factory: &F,
    ) -> Result<Self, PortError>
    where
        F: CandidateFactory<Candidate = C>,
    {
        let mut slots = Vec::with_capacity(specs.len());
        for spec in specs {
            match factory.connect(spec) {
                Ok(reader) => {
                    debug!(
                        provider = id.0,
                        endpoint = spec.label(),
                        kind = ?spec.kind,
                        "candidate connected"
                    );
                    slots.push(Slot {
                        spec: spec.clone(),
                        reader,
                    });
                }
                Err(e) if spec.kind == EndpointKind::Injected => return Err(e),
                Err(e) => {
                    warn!(
                        provider = id.0,
                        endpoint = spec.label(),
                        error = %e,
                        "skipping candidate"
                    );
                }
            }
        }
        if !slots.iter().any(|s| s.spec.kind == EndpointKind::Injected) {
            return Err(PortError::NotFound(
                "injected wallet candidate missing from plan".to_owned(),
            ));
        }
        info!(provider = id.0, candidates = slots.len(), "fallback provider assembled");
        Ok(Self {
            id,
            quorum: 1,
            slots,
        })
    }

    pub fn id(&self) -> ProviderId {
        self.id
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn candidate_kinds(&self) -> Vec<EndpointKind> {
        self.slots.iter().map(|s| s.spec.kind).collect()
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &EndpointSpec> {
        self.slots.iter().map(|s| &s.spec)
    }

    pub fn handle(&self) -> ProviderHandle {
        ProviderHandle {
            id: self.id,
            candidates: self.candidate_kinds(),
            quorum: self.quorum,
        }
    }

    pub fn injected(&self) -> Option<&C> {
        self.slots
            .iter()
            .find(|s| s.spec.kind == EndpointKind::Injected)
            .map(|s| &s.reader)
    }

    pub fn is_healthy(&self) -> bool {
        self.slots
            .iter()
            .filter(|s| s.reader.block_number().is_ok())
            .count()
            >= self.quorum
    }

    /// Rebuilds every polling candidate with the new interval. Candidates that
    /// fail to reconnect keep their previous connection. Returns how many were
    /// rebuilt.
    pub fn set_polling_interval<F>(&mut self, factory: &F, interval_ms: u64) -> usize
    where
        F: CandidateFactory<Candidate = C>,
    {
        let mut rebuilt = 0;
        for slot in self
            .slots
            .iter_mut()
            .filter(|s| s.spec.kind == EndpointKind::Polling)
        {
            let spec = EndpointSpec {
                polling_interval_ms: Some(interval_ms),
                ..slot.spec.clone()
            };
            match factory.connect(&spec) {
                Ok(reader) => {
                    *slot = Slot { spec, reader };
                    rebuilt += 1;
                }
                Err(e) => {
                    warn!(
                        provider = self.id.0,
                        endpoint = slot.spec.label(),
                        error = %e,
                        "polling candidate rebuild failed"
                    );
                }
            }
        }
        rebuilt
    }

    fn first_ok<T>(
        &self,
        op: &'static str,
        read: impl Fn(&C) -> Result<T, PortError>,
    ) -> Result<T, PortError> {
        let mut last_err = None;
        for slot in &self.slots {
            match read(&slot.reader) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    debug!(
                        provider = self.id.0,
                        endpoint = slot.spec.label(),
                        op,
                        error = %e,
                        "candidate read failed"
                    );
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            PortError::Transport(format!("{op}: no provider candidates"))
        }))
    }
}

impl<C> ChainReader for FallbackProvider<C>
where
    C: ChainReader + Clone,
{
    fn block_number(&self) -> Result<u64, PortError> {
        self.first_ok("block_number", |c| c.block_number())
    }

    fn chain_id(&self) -> Result<u64, PortError> {
        self.first_ok("chain_id", |c| c.chain_id())
    }

    fn balance(&self, account: Address) -> Result<U256, PortError> {
        self.first_ok("balance", |c| c.balance(account))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_decides_endpoint_kind() {
        assert_eq!(endpoint_kind("wss://a").expect("wss"), EndpointKind::Streaming);
        assert_eq!(endpoint_kind("WS://a").expect("ws"), EndpointKind::Streaming);
        assert_eq!(endpoint_kind("https://b").expect("https"), EndpointKind::Polling);
        assert_eq!(endpoint_kind("http://b").expect("http"), EndpointKind::Polling);
        assert!(matches!(
            endpoint_kind("ipc:///tmp/geth.ipc"),
            Err(ConfigError::UnsupportedScheme { .. })
        ));
        assert!(endpoint_kind("localhost:8545").is_err());
    }

    #[test]
    fn malformed_urls_are_config_errors() {
        for raw in ["https://", "http://exa mple.com", "wss://[::1", "ws://", "not a url"] {
            assert!(
                matches!(endpoint_kind(raw), Err(ConfigError::InvalidUrl { .. })),
                "{raw} should be rejected"
            );
        }
        let urls = vec!["https://ok".to_owned(), "https://".to_owned()];
        assert!(matches!(
            plan_endpoints(&urls, 1_000),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn plan_appends_injected_candidate() {
        let urls = vec!["wss://a".to_owned(), "https://b".to_owned()];
        let plan = plan_endpoints(&urls, 4_000).expect("plan");
        let kinds: Vec<_> = plan.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EndpointKind::Streaming,
                EndpointKind::Polling,
                EndpointKind::Injected
            ]
        );
        assert_eq!(plan[0].polling_interval_ms, None);
        assert_eq!(plan[1].polling_interval_ms, Some(4_000));
    }

    #[test]
    fn empty_plan_still_has_injected_candidate() {
        let plan = plan_endpoints(&[], 4_000).expect("plan");
        assert_eq!(plan, vec![EndpointSpec::injected()]);
    }

    #[test]
    fn bad_scheme_fails_the_whole_plan() {
        let urls = vec!["https://ok".to_owned(), "ftp://nope".to_owned()];
        let err = plan_endpoints(&urls, 1_000).expect_err("must fail");
        assert_eq!(
            err,
            ConfigError::UnsupportedScheme {
                url: "ftp://nope".to_owned()
            }
        );
    }
}
