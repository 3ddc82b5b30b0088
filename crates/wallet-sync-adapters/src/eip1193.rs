use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use alloy::primitives::{Address, U256};
use serde_json::Value;
use tracing::{debug, warn};

use wallet_sync_core::{
    ChainReader, PortError, ProviderEvent, ProviderEventKind, SubscriptionId, WalletEvent,
    WalletGateway,
};

use crate::rpc::{accounts_from, quantity_u256, quantity_u64, request_body, response_result};
use crate::SyncConfig;

/// Injected-wallet gateway.
///
/// Three runtimes sit behind one type: no wallet at all, an in-memory wallet
/// driven through the `debug_*` methods, and a proxy that relays EIP-1193
/// requests as JSON-RPC to a real wallet. Clones share state.
#[derive(Debug, Clone)]
pub struct Eip1193Adapter {
    mode: WalletMode,
    state: Arc<Mutex<WalletState>>,
}

#[derive(Debug, Clone)]
enum WalletMode {
    Absent,
    Deterministic,
    Proxy(ProxyRuntime),
}

#[derive(Debug, Clone)]
struct ProxyRuntime {
    base_url: String,
    client: reqwest::blocking::Client,
    next_id: Arc<AtomicU64>,
}

#[derive(Debug, Clone)]
struct WalletState {
    is_metamask: bool,
    /// What `eth_accounts` reports.
    accounts: Vec<Address>,
    /// What an approved `eth_requestAccounts` grants.
    grantable: Vec<Address>,
    reject_prompts: bool,
    prompts: usize,
    chain_id: u64,
    block: u64,
    balances: HashMap<Address, U256>,
    next_subscription: u64,
    subscriptions: BTreeMap<SubscriptionId, ProviderEventKind>,
    event_seq: u64,
    events: Vec<ProviderEvent>,
    /// Last raw values seen through the proxy, diffed on every drain.
    seen_accounts: Option<Vec<String>>,
    seen_chain: Option<String>,
}

impl Default for WalletState {
    fn default() -> Self {
        Self {
            is_metamask: true,
            accounts: Vec::new(),
            grantable: vec![Address::repeat_byte(0x11)],
            reject_prompts: false,
            prompts: 0,
            chain_id: 1,
            block: 1,
            balances: HashMap::new(),
            next_subscription: 0,
            subscriptions: BTreeMap::new(),
            event_seq: 0,
            events: Vec::new(),
            seen_accounts: None,
            seen_chain: None,
        }
    }
}

impl WalletState {
    /// Queues `event` once per active subscription of its kind.
    fn emit(&mut self, event: WalletEvent) {
        let kind = event.kind();
        let targets: Vec<SubscriptionId> = self
            .subscriptions
            .iter()
            .filter(|(_, k)| **k == kind)
            .map(|(id, _)| *id)
            .collect();
        for subscription in targets {
            self.event_seq = self.event_seq.saturating_add(1);
            self.events.push(ProviderEvent {
                sequence: self.event_seq,
                subscription,
                event: event.clone(),
            });
        }
    }

    fn set_accounts(&mut self, accounts: Vec<Address>) {
        if self.accounts != accounts {
            self.emit(WalletEvent::AccountsChanged(
                accounts.iter().map(|a| a.to_string()).collect(),
            ));
        }
        self.accounts = accounts;
    }
}

impl Default for Eip1193Adapter {
    fn default() -> Self {
        Self::deterministic()
    }
}

impl Eip1193Adapter {
    /// No injected wallet: every request fails and `is_present` is false.
    pub fn absent() -> Self {
        Self {
            mode: WalletMode::Absent,
            state: Arc::new(Mutex::new(WalletState::default())),
        }
    }

    /// In-memory wallet on chain 1 with nothing authorized yet.
    pub fn deterministic() -> Self {
        Self {
            mode: WalletMode::Deterministic,
            state: Arc::new(Mutex::new(WalletState::default())),
        }
    }

    /// Proxy runtime pointed at `base_url`.
    pub fn proxy(base_url: &str, timeout: std::time::Duration) -> Result<Self, PortError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PortError::Transport(format!("eip1193 proxy client init failed: {e}")))?;
        Ok(Self {
            mode: WalletMode::Proxy(ProxyRuntime {
                base_url: base_url.to_owned(),
                client,
                next_id: Arc::new(AtomicU64::new(1)),
            }),
            state: Arc::new(Mutex::new(WalletState::default())),
        })
    }

    pub fn with_config(config: &SyncConfig) -> Result<Self, PortError> {
        match config.eip1193_proxy_url.as_deref() {
            Some(url) => Self::proxy(url, config.rpc_timeout()),
            None => Ok(Self::deterministic()),
        }
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self.mode, WalletMode::Proxy(_))
    }

    fn lock(&self) -> Result<MutexGuard<'_, WalletState>, PortError> {
        self.state
            .lock()
            .map_err(|e| PortError::Transport(format!("wallet lock poisoned: {e}")))
    }

    fn check_present(&self) -> Result<(), PortError> {
        if let WalletMode::Absent = self.mode {
            return Err(PortError::NotFound("no injected wallet".to_owned()));
        }
        Ok(())
    }

    fn proxy_call(&self, method: &str, params: Value) -> Result<Value, PortError> {
        let proxy = match &self.mode {
            WalletMode::Proxy(proxy) => proxy,
            _ => {
                return Err(PortError::NotImplemented(
                    "eip1193 proxy runtime not enabled",
                ))
            }
        };
        let id = proxy.next_id.fetch_add(1, Ordering::Relaxed);
        let response = proxy
            .client
            .post(&proxy.base_url)
            .json(&request_body(id, method, params))
            .send()
            .map_err(|e| PortError::Transport(format!("eip1193 proxy request failed: {e}")))?;
        let status = response.status();
        let body: Value = response
            .json()
            .map_err(|e| PortError::Transport(format!("eip1193 proxy json decode failed: {e}")))?;
        if !status.is_success() {
            return Err(PortError::Transport(format!(
                "eip1193 proxy status {status}: {body}"
            )));
        }
        response_result(body)
    }

    /// Polls the proxied wallet and turns differences from the last poll
    /// into notifications. The first poll only records a baseline.
    fn refresh_proxy_snapshot(&self) -> Result<(), PortError> {
        let raw = self.proxy_call("eth_accounts", serde_json::json!([]))?;
        let accounts: Vec<String> = accounts_from(&raw)?.iter().map(|a| a.to_string()).collect();
        let chain = match self.proxy_call("eth_chainId", serde_json::json!([]))? {
            Value::String(s) => s,
            other => other.to_string(),
        };

        let mut g = self.lock()?;
        match g.seen_accounts.replace(accounts.clone()) {
            Some(previous) if previous != accounts => {
                g.emit(WalletEvent::AccountsChanged(accounts));
            }
            _ => {}
        }
        match g.seen_chain.replace(chain.clone()) {
            Some(previous) if previous != chain => g.emit(WalletEvent::ChainChanged(chain)),
            _ => {}
        }
        Ok(())
    }

    pub fn prompts(&self) -> Result<usize, PortError> {
        Ok(self.lock()?.prompts)
    }

    pub fn active_subscriptions(&self) -> Result<usize, PortError> {
        Ok(self.lock()?.subscriptions.len())
    }

    /// Simulates the user switching (or disconnecting) accounts in the wallet.
    pub fn debug_inject_accounts_changed(&self, accounts: Vec<Address>) -> Result<(), PortError> {
        let mut g = self.lock()?;
        g.grantable = accounts.clone();
        g.emit(WalletEvent::AccountsChanged(
            accounts.iter().map(|a| a.to_string()).collect(),
        ));
        g.accounts = accounts;
        Ok(())
    }

    /// Simulates a network switch; the notification carries a hex chain id.
    pub fn debug_inject_chain_changed(&self, chain_id: u64) -> Result<(), PortError> {
        let mut g = self.lock()?;
        g.chain_id = chain_id;
        g.emit(WalletEvent::ChainChanged(format!("{chain_id:#x}")));
        Ok(())
    }

    pub fn debug_set_grantable(&self, accounts: Vec<Address>) -> Result<(), PortError> {
        self.lock()?.grantable = accounts;
        Ok(())
    }

    pub fn debug_reject_prompts(&self, reject: bool) -> Result<(), PortError> {
        self.lock()?.reject_prompts = reject;
        Ok(())
    }

    pub fn debug_set_metamask(&self, is_metamask: bool) -> Result<(), PortError> {
        self.lock()?.is_metamask = is_metamask;
        Ok(())
    }

    pub fn debug_set_block(&self, block: u64) -> Result<(), PortError> {
        self.lock()?.block = block;
        Ok(())
    }

    pub fn debug_mine_blocks(&self, count: u64) -> Result<u64, PortError> {
        let mut g = self.lock()?;
        g.block = g.block.saturating_add(count);
        Ok(g.block)
    }

    pub fn debug_set_balance(&self, account: Address, wei: U256) -> Result<(), PortError> {
        self.lock()?.balances.insert(account, wei);
        Ok(())
    }
}

impl WalletGateway for Eip1193Adapter {
    fn is_present(&self) -> bool {
        !matches!(self.mode, WalletMode::Absent)
    }

    fn is_known_wallet_kind(&self) -> bool {
        match self.mode {
            WalletMode::Absent => false,
            WalletMode::Deterministic => self.lock().map(|g| g.is_metamask).unwrap_or(false),
            WalletMode::Proxy(_) => {
                match self.proxy_call("web3_clientVersion", serde_json::json!([])) {
                    Ok(version) => version
                        .as_str()
                        .is_some_and(|v| v.to_ascii_lowercase().starts_with("metamask")),
                    Err(e) => {
                        debug!(error = %e, "web3_clientVersion unavailable");
                        false
                    }
                }
            }
        }
    }

    fn query_accounts(&self) -> Result<Vec<Address>, PortError> {
        self.check_present()?;
        if self.is_proxy() {
            return accounts_from(&self.proxy_call("eth_accounts", serde_json::json!([]))?);
        }
        Ok(self.lock()?.accounts.clone())
    }

    fn request_accounts(&self) -> Result<Vec<Address>, PortError> {
        self.check_present()?;
        if self.is_proxy() {
            return accounts_from(&self.proxy_call("eth_requestAccounts", serde_json::json!([]))?);
        }
        let mut g = self.lock()?;
        g.prompts += 1;
        if g.reject_prompts {
            return Err(PortError::Rejected("User rejected the request.".to_owned()));
        }
        let granted = g.grantable.clone();
        g.set_accounts(granted.clone());
        Ok(granted)
    }

    fn subscribe(&self, kind: ProviderEventKind) -> Result<SubscriptionId, PortError> {
        self.check_present()?;
        if self.is_proxy() {
            let seeded = {
                let g = self.lock()?;
                g.seen_accounts.is_some() && g.seen_chain.is_some()
            };
            if !seeded {
                if let Err(e) = self.refresh_proxy_snapshot() {
                    warn!(error = %e, "proxy baseline snapshot failed");
                }
            }
        }
        let mut g = self.lock()?;
        g.next_subscription += 1;
        let id = SubscriptionId(g.next_subscription);
        g.subscriptions.insert(id, kind);
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), PortError> {
        let mut g = self.lock()?;
        g.subscriptions
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| PortError::NotFound(format!("subscription {}", id.0)))
    }

    fn drain_events(&self) -> Result<Vec<ProviderEvent>, PortError> {
        self.check_present()?;
        if self.is_proxy() {
            self.refresh_proxy_snapshot()?;
        }
        let mut g = self.lock()?;
        Ok(std::mem::take(&mut g.events))
    }
}

/// The injected wallet doubles as the last-resort chain reader.
impl ChainReader for Eip1193Adapter {
    fn block_number(&self) -> Result<u64, PortError> {
        self.check_present()?;
        if self.is_proxy() {
            return quantity_u64(&self.proxy_call("eth_blockNumber", serde_json::json!([]))?);
        }
        Ok(self.lock()?.block)
    }

    fn chain_id(&self) -> Result<u64, PortError> {
        self.check_present()?;
        if self.is_proxy() {
            return quantity_u64(&self.proxy_call("eth_chainId", serde_json::json!([]))?);
        }
        Ok(self.lock()?.chain_id)
    }

    fn balance(&self, account: Address) -> Result<U256, PortError> {
        self.check_present()?;
        if self.is_proxy() {
            let params = serde_json::json!([account.to_string(), "latest"]);
            return quantity_u256(&self.proxy_call("eth_getBalance", params)?);
        }
        Ok(self
            .lock()?
            .balances
            .get(&account)
            .copied()
            .unwrap_or_default())
    }
}
