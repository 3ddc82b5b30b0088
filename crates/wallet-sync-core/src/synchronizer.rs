//! Keeps a [`ConnectionState`] in step with an injected wallet and the
//! provider pair derived from it.
//!
//! The synchronizer performs no I/O scheduling of its own. A driver calls
//! [`Synchronizer::start`] once, then [`pump`](Synchronizer::pump) and
//! [`poll_block`](Synchronizer::poll_block) on every tick, runs the
//! [`BalanceRequest`]s it hands out wherever it likes and feeds the outcome
//! back through [`complete_balance`](Synchronizer::complete_balance).
//! Every completion is checked against the current state before it is
//! applied, so out-of-order or post-teardown results are dropped.

use alloy::primitives::{utils::format_ether, Address, U256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::balance::{BalancePolicy, BalanceRequest, DEFAULT_BALANCE_UPDATE_INTERVAL};
use crate::domain::{ConnectionState, ProviderId, SignerHandle};
use crate::endpoints::{plan_endpoints, ConfigError, FallbackProvider};
use crate::networks::{network_name, parse_chain_id};
use crate::ports::{
    CandidateFactory, ChainReader, PortError, ProviderEventKind, SubscriptionId, WalletEvent,
    WalletGateway,
};
use crate::state_machine::{Applied, StateStore, Transition, TransitionError};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("transition rejected: {0}")]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Port(#[from] PortError),
    #[error("synchronizer has been torn down")]
    Unmounted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    pub provider_urls: Vec<String>,
    pub polling_interval_ms: u64,
    pub balance_update_interval: u64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            provider_urls: Vec::new(),
            polling_interval_ms: 4_000,
            balance_update_interval: DEFAULT_BALANCE_UPDATE_INTERVAL,
        }
    }
}

/// Listeners currently attached. `blocks` names the provider whose new-block
/// notifications are accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subscriptions {
    pub chain: Option<SubscriptionId>,
    pub accounts: Option<SubscriptionId>,
    pub blocks: Option<ProviderId>,
}

impl Subscriptions {
    pub fn is_empty(&self) -> bool {
        self.chain.is_none() && self.accounts.is_none() && self.blocks.is_none()
    }
}

pub struct Synchronizer<G, F>
where
    G: WalletGateway,
    F: CandidateFactory,
{
    gateway: G,
    factory: F,
    options: SyncOptions,
    policy: BalancePolicy,
    store: StateStore,
    subscriptions: Subscriptions,
    provider: Option<FallbackProvider<F::Candidate>>,
    next_provider_id: u64,
    pending_balance: Option<BalanceRequest>,
    /// Most recent read handed out, kept after it completes so a head that
    /// has not moved does not trigger another read.
    last_issued: Option<BalanceRequest>,
    /// Account the stored balance was read for.
    balance_account: Option<Address>,
    started: bool,
    mounted: bool,
}

impl<G, F> Synchronizer<G, F>
where
    G: WalletGateway,
    F: CandidateFactory,
{
    pub fn new(gateway: G, factory: F, options: SyncOptions) -> Self {
        let policy = BalancePolicy::new(options.balance_update_interval);
        Self {
            gateway,
            factory,
            options,
            policy,
            store: StateStore::new(),
            subscriptions: Subscriptions::default(),
            provider: None,
            next_provider_id: 0,
            pending_balance: None,
            last_issued: None,
            balance_account: None,
            started: false,
            mounted: true,
        }
    }

    pub fn snapshot(&self) -> &ConnectionState {
        self.store.snapshot()
    }

    pub fn current_block(&self) -> u64 {
        self.store.snapshot().current_block
    }

    pub fn revision(&self) -> u64 {
        self.store.revision()
    }

    pub fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn provider(&self) -> Option<&FallbackProvider<F::Candidate>> {
        self.provider.as_ref()
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    fn apply(&mut self, transition: Transition) -> Result<Applied, SyncError> {
        let name = transition.name();
        let outcome = self.store.apply(transition)?;
        debug!(transition = name, ?outcome, revision = self.store.revision(), "state transition");
        Ok(outcome)
    }

    /// Presence check, listener setup and the passive authorization probe.
    /// Runs once; later calls are no-ops.
    pub fn start(&mut self) -> Result<(), SyncError> {
        if !self.mounted {
            return Err(SyncError::Unmounted);
        }
        if self.started {
            return Ok(());
        }
        self.started = true;

        let present = self.gateway.is_present();
        self.apply(Transition::SetHasProvider(present))?;
        if !present {
            info!("no injected wallet detected");
            return Ok(());
        }
        let known = self.gateway.is_known_wallet_kind();
        self.apply(Transition::SetIsKnownWalletKind(known))?;
        self.attach_wallet_listeners();
        self.probe_authorization()
    }

    fn attach_wallet_listeners(&mut self) {
        if self.subscriptions.chain.is_none() {
            match self.gateway.subscribe(ProviderEventKind::ChainChanged) {
                Ok(id) => {
                    debug!(subscription = id.0, "chainChanged listener attached");
                    self.subscriptions.chain = Some(id);
                }
                Err(e) => warn!(error = %e, "chainChanged listener not attached"),
            }
        }
        if self.subscriptions.accounts.is_none() {
            match self.gateway.subscribe(ProviderEventKind::AccountsChanged) {
                Ok(id) => {
                    debug!(subscription = id.0, "accountsChanged listener attached");
                    self.subscriptions.accounts = Some(id);
                }
                Err(e) => warn!(error = %e, "accountsChanged listener not attached"),
            }
        }
    }

    fn detach_wallet_listeners(&mut self) {
        for id in [
            self.subscriptions.chain.take(),
            self.subscriptions.accounts.take(),
        ]
        .into_iter()
        .flatten()
        {
            match self.gateway.unsubscribe(id) {
                Ok(()) => debug!(subscription = id.0, "wallet listener detached"),
                Err(e) => warn!(subscription = id.0, error = %e, "wallet listener detach failed"),
            }
        }
    }

    fn probe_authorization(&mut self) -> Result<(), SyncError> {
        match self.gateway.query_accounts() {
            Ok(accounts) => self.apply_accounts(&accounts),
            Err(e) => {
                warn!(error = %e, "eth_accounts probe failed");
                Ok(())
            }
        }
    }

    fn apply_accounts(&mut self, accounts: &[Address]) -> Result<(), SyncError> {
        match accounts.first() {
            Some(account) => self.apply(Transition::SetAuthorized(*account))?,
            None => self.apply(Transition::ClearAuthorization)?,
        };
        self.reconcile_provider()
    }

    /// Requests account access. A declined or failed prompt resets the
    /// state to unauthorized and still returns `Ok`; only a provider
    /// configuration error is reported.
    pub fn login(&mut self) -> Result<(), SyncError> {
        if !self.login_due() {
            return Ok(());
        }
        let result = self.gateway.request_accounts();
        self.complete_login(result)
    }

    /// Whether a login prompt should be issued now: a wallet is present and
    /// no account is authorized yet.
    pub fn login_due(&self) -> bool {
        let state = self.store.snapshot();
        let due = self.mounted && state.has_provider && !state.is_authorized;
        if !due {
            debug!(
                mounted = self.mounted,
                has_provider = state.has_provider,
                is_authorized = state.is_authorized,
                "login skipped"
            );
        }
        due
    }

    /// Applies the outcome of an `eth_requestAccounts` prompt started after
    /// [`login_due`](Self::login_due) returned true.
    pub fn complete_login(
        &mut self,
        result: Result<Vec<Address>, PortError>,
    ) -> Result<(), SyncError> {
        if !self.mounted {
            debug!("login result after teardown dropped");
            return Ok(());
        }
        match result {
            Ok(accounts) => self.apply_accounts(&accounts),
            Err(e) if self.store.snapshot().is_authorized => {
                debug!(error = %e, "prompt failed after authorization arrived by event");
                Ok(())
            }
            Err(e) => {
                info!(error = %e, "login not granted");
                self.apply(Transition::ClearAuthorization)?;
                self.reconcile_provider()
            }
        }
    }

    /// Drains wallet notifications and applies them in arrival order.
    /// Returns how many were applied.
    pub fn pump(&mut self) -> Result<usize, SyncError> {
        if !self.mounted || !self.store.snapshot().has_provider {
            return Ok(0);
        }
        self.attach_wallet_listeners();

        let events = match self.gateway.drain_events() {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "draining wallet events failed");
                return Ok(0);
            }
        };

        let mut handled = 0;
        for event in events {
            let active = match event.event.kind() {
                ProviderEventKind::ChainChanged => self.subscriptions.chain,
                ProviderEventKind::AccountsChanged => self.subscriptions.accounts,
            };
            if active != Some(event.subscription) {
                debug!(
                    sequence = event.sequence,
                    subscription = event.subscription.0,
                    "dropping event from detached listener"
                );
                continue;
            }
            match event.event {
                WalletEvent::ChainChanged(raw) => self.on_chain_changed(&raw)?,
                WalletEvent::AccountsChanged(raw) => self.on_accounts_changed(&raw)?,
            }
            handled += 1;
        }
        Ok(handled)
    }

    fn on_chain_changed(&mut self, raw: &str) -> Result<(), SyncError> {
        match parse_chain_id(raw) {
            Ok(id) => {
                info!(chain_id = id, "chain changed");
                self.apply(Transition::SetChain {
                    id,
                    name: network_name(id).to_owned(),
                })?;
            }
            Err(e) => warn!(payload = raw, error = %e, "undecodable chainChanged payload"),
        }
        Ok(())
    }

    fn on_accounts_changed(&mut self, raw: &[String]) -> Result<(), SyncError> {
        let first = match raw.first().map(|s| s.parse::<Address>()).transpose() {
            Ok(first) => first,
            Err(e) => {
                warn!(error = %e, "undecodable accountsChanged payload");
                return Ok(());
            }
        };
        info!(account = ?first, "accounts changed");
        let accounts: Vec<Address> = first.into_iter().collect();
        self.apply_accounts(&accounts)
    }

    /// Brings the provider pair in line with the authorization state:
    /// resolve when authorized without a pair, release when unauthorized,
    /// rebind the signer when the account moved.
    fn reconcile_provider(&mut self) -> Result<(), SyncError> {
        let state = self.store.snapshot();
        let (authorized, account) = (state.is_authorized, state.account);
        let signer_account = state.signer.as_ref().map(|s| s.address);

        match (self.provider.as_ref().map(|p| p.id()), authorized) {
            (None, true) => self.resolve_provider(account),
            (Some(_), false) => self.release_provider(),
            (Some(id), true) if signer_account != Some(account) => {
                info!(provider = id.0, %account, "rebinding signer");
                self.apply(Transition::SetSigner(SignerHandle::injected(id, account)))?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn resolve_provider(&mut self, account: Address) -> Result<(), SyncError> {
        let specs = plan_endpoints(&self.options.provider_urls, self.options.polling_interval_ms)?;
        let id = ProviderId(self.next_provider_id + 1);
        let provider = match FallbackProvider::connect(id, &specs, &self.factory) {
            Ok(provider) => provider,
            Err(e) => {
                warn!(error = %e, "provider resolution failed; retrying on next trigger");
                return Ok(());
            }
        };
        self.next_provider_id = id.0;

        self.apply(Transition::SetProvider {
            provider: provider.handle(),
            signer: SignerHandle::injected(id, account),
            urls: self.options.provider_urls.clone(),
        })?;
        info!(provider = id.0, candidates = provider.len(), %account, "provider set");
        self.provider = Some(provider);
        self.subscriptions.blocks = Some(id);
        self.pending_balance = None;
        self.probe_network()
    }

    fn release_provider(&mut self) -> Result<(), SyncError> {
        if let Some(provider) = self.provider.take() {
            info!(provider = provider.id().0, "provider released");
        }
        self.subscriptions.blocks = None;
        self.pending_balance = None;
        self.last_issued = None;
        self.balance_account = None;
        self.apply(Transition::ReleaseProvider)?;
        Ok(())
    }

    fn probe_network(&mut self) -> Result<(), SyncError> {
        let Some(provider) = self.provider.as_ref() else {
            return Ok(());
        };
        match provider.chain_id() {
            Ok(id) => {
                self.apply(Transition::SetChain {
                    id,
                    name: network_name(id).to_owned(),
                })?;
            }
            Err(e) => warn!(error = %e, "network probe failed"),
        }
        Ok(())
    }

    /// Reads the head from the active provider and dispatches it as a
    /// new-block notification. Retries a failed resolution first.
    pub fn poll_block(&mut self) -> Result<Option<BalanceRequest>, SyncError> {
        if !self.mounted {
            return Ok(None);
        }
        if self.provider.is_none() && self.store.snapshot().is_authorized {
            self.reconcile_provider()?;
        }
        let Some(provider) = self.provider.as_ref() else {
            return Ok(None);
        };
        let id = provider.id();
        match provider.block_number() {
            Ok(height) => self.on_new_block(id, height),
            Err(e) => {
                warn!(provider = id.0, error = %e, "block poll failed");
                Ok(None)
            }
        }
    }

    /// Applies a new-block notification from provider `provider`. Returns a
    /// balance read to perform when the throttle allows one.
    pub fn on_new_block(
        &mut self,
        provider: ProviderId,
        height: u64,
    ) -> Result<Option<BalanceRequest>, SyncError> {
        if !self.mounted || self.subscriptions.blocks != Some(provider) {
            debug!(provider = provider.0, height, "ignoring block from stale listener");
            return Ok(None);
        }
        if self.apply(Transition::SetBlock(height))? == Applied::Stale {
            return Ok(None);
        }

        let state = self.store.snapshot();
        if !state.is_authorized {
            return Ok(None);
        }
        let account = state.account;
        let issued_at_height = self
            .last_issued
            .is_some_and(|r| r.provider == provider && r.account == account && r.block >= height);
        if issued_at_height {
            return Ok(None);
        }
        let pending = self
            .pending_balance
            .filter(|p| p.account == account && p.provider == provider);
        let due = match pending {
            Some(p) => self
                .policy
                .should_refresh(height, state.last_balance_block.max(p.block)),
            None if self.balance_account != Some(account) => true,
            None => self.policy.should_refresh(height, state.last_balance_block),
        };
        if !due {
            return Ok(None);
        }

        let request = BalanceRequest {
            provider,
            account,
            block: height,
        };
        debug!(provider = provider.0, %account, block = height, "balance refresh due");
        self.pending_balance = Some(request);
        self.last_issued = Some(request);
        Ok(Some(request))
    }

    /// Clone of the provider a request was issued against, for running the
    /// read off the event loop. `None` once that provider is gone.
    pub fn balance_reader(
        &self,
        request: &BalanceRequest,
    ) -> Option<FallbackProvider<F::Candidate>> {
        self.provider
            .as_ref()
            .filter(|p| p.id() == request.provider)
            .cloned()
    }

    /// Performs the read for `request` inline.
    pub fn read_balance(&self, request: &BalanceRequest) -> Result<U256, PortError> {
        let provider = self
            .provider
            .as_ref()
            .filter(|p| p.id() == request.provider)
            .ok_or_else(|| {
                PortError::NotFound(format!("provider {} released", request.provider.0))
            })?;
        provider.balance(request.account)
    }

    /// Applies a finished balance read unless the state has moved on.
    pub fn complete_balance(
        &mut self,
        request: BalanceRequest,
        result: Result<U256, PortError>,
    ) -> Result<Applied, SyncError> {
        if !self.mounted {
            debug!(block = request.block, "balance result after teardown dropped");
            return Ok(Applied::Stale);
        }
        if self.pending_balance == Some(request) {
            self.pending_balance = None;
        }
        let wei = match result {
            Ok(wei) => wei,
            Err(e) => {
                warn!(block = request.block, error = %e, "balance read failed");
                return Ok(Applied::Unchanged);
            }
        };

        let state = self.store.snapshot();
        if self.subscriptions.blocks != Some(request.provider)
            || !state.is_authorized
            || state.account != request.account
        {
            debug!(
                block = request.block,
                account = %request.account,
                "balance result for stale context dropped"
            );
            return Ok(Applied::Stale);
        }

        let value = format_ether(wei);
        let outcome = self.apply(Transition::SetBalance {
            value,
            block: request.block,
        })?;
        if outcome != Applied::Stale {
            self.balance_account = Some(request.account);
        }
        Ok(outcome)
    }

    /// Rebuilds polling candidates of the live provider with a new cadence.
    /// The provider handle stays the same.
    pub fn set_polling_interval(&mut self, interval_ms: u64) {
        if !self.mounted {
            return;
        }
        self.options.polling_interval_ms = interval_ms;
        if let Some(provider) = self.provider.as_mut() {
            let rebuilt = provider.set_polling_interval(&self.factory, interval_ms);
            info!(provider = provider.id().0, rebuilt, interval_ms, "polling interval updated");
        }
    }

    /// Swaps the fallback endpoint list. A different list releases the
    /// current pair and resolves a fresh one.
    pub fn replace_endpoints(&mut self, urls: Vec<String>) -> Result<(), SyncError> {
        if !self.mounted {
            return Err(SyncError::Unmounted);
        }
        if urls == self.options.provider_urls {
            return Ok(());
        }
        self.options.provider_urls = urls;
        if self.provider.is_some() {
            self.release_provider()?;
        }
        self.reconcile_provider()
    }

    /// Detaches every listener and stops accepting results. Idempotent.
    pub fn shutdown(&mut self) {
        if !self.mounted {
            return;
        }
        self.detach_wallet_listeners();
        self.subscriptions.blocks = None;
        self.pending_balance = None;
        self.provider = None;
        self.mounted = false;
        info!("synchronizer torn down");
    }
}

impl<G, F> Drop for Synchronizer<G, F>
where
    G: WalletGateway,
    F: CandidateFactory,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}
