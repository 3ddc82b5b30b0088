#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use alloy::primitives::{Address, U256};

use wallet_sync_core::{
    CandidateFactory, ChainReader, EndpointKind, EndpointSpec, PortError, ProviderEvent,
    ProviderEventKind, SubscriptionId, SyncOptions, Synchronizer, WalletEvent, WalletGateway,
};

#[derive(Debug, Default)]
pub struct FakeWallet {
    pub present: bool,
    pub metamask: bool,
    /// What `eth_accounts` reports.
    pub authorized: Vec<Address>,
    /// What an approved `eth_requestAccounts` grants.
    pub grantable: Vec<Address>,
    pub reject_prompts: bool,
    pub prompts: usize,
    pub fail_accounts_query: bool,
    next_sub: u64,
    subs: BTreeMap<SubscriptionId, ProviderEventKind>,
    seq: u64,
    queue: Vec<ProviderEvent>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeGateway {
    inner: Arc<Mutex<FakeWallet>>,
}

impl FakeGateway {
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn present() -> Self {
        let gw = Self::default();
        gw.with(|w| {
            w.present = true;
            w.metamask = true;
            w.grantable = vec![account_a()];
        });
        gw
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut FakeWallet) -> R) -> R {
        let mut g = self.inner.lock().expect("fake wallet lock");
        f(&mut g)
    }

    pub fn emit(&self, event: WalletEvent) {
        self.with(|w| {
            let kind = event.kind();
            let targets: Vec<SubscriptionId> = w
                .subs
                .iter()
                .filter(|(_, k)| **k == kind)
                .map(|(id, _)| *id)
                .collect();
            for subscription in targets {
                w.seq += 1;
                let sequence = w.seq;
                w.queue.push(ProviderEvent {
                    sequence,
                    subscription,
                    event: event.clone(),
                });
            }
        });
    }

    pub fn emit_chain(&self, raw: &str) {
        self.emit(WalletEvent::ChainChanged(raw.to_owned()));
    }

    pub fn emit_accounts(&self, accounts: &[Address]) {
        self.emit(WalletEvent::AccountsChanged(
            accounts.iter().map(|a| a.to_string()).collect(),
        ));
    }

    /// Queues an event for a subscription id regardless of whether it is active.
    pub fn push_raw(&self, subscription: SubscriptionId, event: WalletEvent) {
        self.with(|w| {
            w.seq += 1;
            let sequence = w.seq;
            w.queue.push(ProviderEvent {
                sequence,
                subscription,
                event,
            });
        });
    }

    pub fn active_subscriptions(&self) -> usize {
        self.with(|w| w.subs.len())
    }

    pub fn prompts(&self) -> usize {
        self.with(|w| w.prompts)
    }
}

impl WalletGateway for FakeGateway {
    fn is_present(&self) -> bool {
        self.with(|w| w.present)
    }

    fn is_known_wallet_kind(&self) -> bool {
        self.with(|w| w.metamask)
    }

    fn query_accounts(&self) -> Result<Vec<Address>, PortError> {
        self.with(|w| {
            if w.fail_accounts_query {
                return Err(PortError::Transport("eth_accounts unavailable".to_owned()));
            }
            Ok(w.authorized.clone())
        })
    }

    fn request_accounts(&self) -> Result<Vec<Address>, PortError> {
        self.with(|w| {
            w.prompts += 1;
            if w.reject_prompts {
                return Err(PortError::Rejected("User rejected the request.".to_owned()));
            }
            w.authorized = w.grantable.clone();
            Ok(w.authorized.clone())
        })
    }

    fn subscribe(&self, kind: ProviderEventKind) -> Result<SubscriptionId, PortError> {
        self.with(|w| {
            w.next_sub += 1;
            let id = SubscriptionId(w.next_sub);
            w.subs.insert(id, kind);
            Ok(id)
        })
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), PortError> {
        self.with(|w| {
            w.subs
                .remove(&id)
                .map(|_| ())
                .ok_or_else(|| PortError::NotFound(format!("subscription {}", id.0)))
        })
    }

    fn drain_events(&self) -> Result<Vec<ProviderEvent>, PortError> {
        Ok(self.with(|w| std::mem::take(&mut w.queue)))
    }
}

#[derive(Debug)]
pub struct FakeChainState {
    pub block: u64,
    pub chain_id: u64,
    pub balances: HashMap<Address, U256>,
    pub fail_reads: bool,
}

#[derive(Debug, Clone)]
pub struct FakeChain {
    inner: Arc<Mutex<FakeChainState>>,
}

impl Default for FakeChain {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeChainState {
                block: 100,
                chain_id: 1,
                balances: HashMap::new(),
                fail_reads: false,
            })),
        }
    }
}

impl FakeChain {
    pub fn with<R>(&self, f: impl FnOnce(&mut FakeChainState) -> R) -> R {
        let mut g = self.inner.lock().expect("fake chain lock");
        f(&mut g)
    }

    pub fn set_block(&self, block: u64) {
        self.with(|c| c.block = block);
    }

    pub fn set_balance(&self, account: Address, wei: U256) {
        self.with(|c| {
            c.balances.insert(account, wei);
        });
    }
}

#[derive(Debug, Clone)]
pub struct FakeCandidate {
    pub spec: EndpointSpec,
    chain: FakeChain,
}

impl ChainReader for FakeCandidate {
    fn block_number(&self) -> Result<u64, PortError> {
        self.chain.with(|c| {
            if c.fail_reads {
                return Err(PortError::Transport("offline".to_owned()));
            }
            Ok(c.block)
        })
    }

    fn chain_id(&self) -> Result<u64, PortError> {
        self.chain.with(|c| {
            if c.fail_reads {
                return Err(PortError::Transport("offline".to_owned()));
            }
            Ok(c.chain_id)
        })
    }

    fn balance(&self, account: Address) -> Result<U256, PortError> {
        self.chain.with(|c| {
            if c.fail_reads {
                return Err(PortError::Transport("offline".to_owned()));
            }
            Ok(c.balances.get(&account).copied().unwrap_or_default())
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeFactory {
    pub chain: FakeChain,
    pub connected: Arc<Mutex<Vec<EndpointSpec>>>,
    pub refuse: Arc<Mutex<Vec<EndpointKind>>>,
}

impl FakeFactory {
    pub fn connected(&self) -> Vec<EndpointSpec> {
        self.connected.lock().expect("connected lock").clone()
    }

    pub fn refuse(&self, kind: EndpointKind) {
        self.refuse.lock().expect("refuse lock").push(kind);
    }
}

impl CandidateFactory for FakeFactory {
    type Candidate = FakeCandidate;

    fn connect(&self, endpoint: &EndpointSpec) -> Result<FakeCandidate, PortError> {
        if self
            .refuse
            .lock()
            .expect("refuse lock")
            .contains(&endpoint.kind)
        {
            return Err(PortError::Transport(format!(
                "connect refused: {}",
                endpoint.label()
            )));
        }
        self.connected
            .lock()
            .expect("connected lock")
            .push(endpoint.clone());
        Ok(FakeCandidate {
            spec: endpoint.clone(),
            chain: self.chain.clone(),
        })
    }
}

pub type TestSynchronizer = Synchronizer<FakeGateway, FakeFactory>;

pub fn new_synchronizer(
    gateway: &FakeGateway,
    factory: &FakeFactory,
    options: SyncOptions,
) -> TestSynchronizer {
    Synchronizer::new(gateway.clone(), factory.clone(), options)
}

pub fn options(interval: u64) -> SyncOptions {
    SyncOptions {
        balance_update_interval: interval,
        ..SyncOptions::default()
    }
}

pub fn account_a() -> Address {
    "0x1000000000000000000000000000000000000001"
        .parse()
        .expect("valid account a")
}

pub fn account_b() -> Address {
    "0x2000000000000000000000000000000000000002"
        .parse()
        .expect("valid account b")
}

pub fn eth(n: u64) -> U256 {
    U256::from(n) * U256::from(10u64).pow(U256::from(18u64))
}
