//! Event loop around a [`Synchronizer`].
//!
//! The synchronizer and its adapters do blocking I/O, so every call into it
//! runs under [`tokio::task::block_in_place`]. Balance reads and the login
//! prompt go to the blocking pool and come back as completions, so a prompt
//! left open by the user does not hold up events or blocks. This needs the
//! multi-threaded runtime.

use std::time::Duration;

use alloy::primitives::{Address, U256};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{block_in_place, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use wallet_sync_core::{
    BalanceRequest, CandidateFactory, ChainReader, ConnectionState, PortError, SyncError,
    Synchronizer, WalletGateway,
};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("sync driver stopped")]
    Closed,
    #[error("sync driver failed: {0}")]
    Fatal(String),
}

type Reply = oneshot::Sender<Result<(), DriverError>>;

#[derive(Debug)]
enum Command {
    Login(Reply),
    SetPollingInterval(u64, Reply),
    ReplaceEndpoints(Vec<String>, Reply),
    Shutdown,
}

/// Consumer side of a running driver: the latest snapshot plus the actions.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl SyncHandle {
    pub fn snapshot(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn current_block(&self) -> u64 {
        self.state.borrow().current_block
    }

    /// Receiver notified on every published state change.
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub async fn login(&self) -> Result<(), DriverError> {
        self.request(Command::Login).await
    }

    pub async fn set_polling_interval(&self, interval_ms: u64) -> Result<(), DriverError> {
        self.request(|reply| Command::SetPollingInterval(interval_ms, reply))
            .await
    }

    pub async fn replace_endpoints(&self, urls: Vec<String>) -> Result<(), DriverError> {
        self.request(|reply| Command::ReplaceEndpoints(urls, reply))
            .await
    }

    /// Asks the driver to tear down. Returns once the request is queued.
    pub async fn shutdown(&self) -> Result<(), DriverError> {
        self.commands
            .send(Command::Shutdown)
            .await
            .map_err(|_| DriverError::Closed)
    }

    async fn request(&self, build: impl FnOnce(Reply) -> Command) -> Result<(), DriverError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| DriverError::Closed)?;
        rx.await.map_err(|_| DriverError::Closed)?
    }
}

type Completion = (BalanceRequest, Result<U256, PortError>);
type LoginOutcome = Result<Vec<Address>, PortError>;

pub struct SyncDriver<G, F>
where
    G: WalletGateway,
    F: CandidateFactory,
{
    sync: Synchronizer<G, F>,
    tick: Duration,
}

impl<G, F> SyncDriver<G, F>
where
    G: WalletGateway + Clone + Send + 'static,
    F: CandidateFactory + Send + 'static,
    F::Candidate: Send + 'static,
{
    pub fn new(sync: Synchronizer<G, F>, tick: Duration) -> Self {
        Self { sync, tick }
    }

    /// Starts the loop on the current runtime. The join handle resolves when
    /// the driver stops; a configuration or transition error ends it with `Err`.
    pub fn spawn(self) -> (SyncHandle, JoinHandle<Result<(), SyncError>>) {
        let (commands, rx) = mpsc::channel(32);
        let (state_tx, state) = watch::channel(self.sync.snapshot().clone());
        let join = tokio::spawn(self.run(rx, state_tx));
        (SyncHandle { commands, state }, join)
    }

    async fn run(
        self,
        mut commands: mpsc::Receiver<Command>,
        state: watch::Sender<ConnectionState>,
    ) -> Result<(), SyncError> {
        let mut sync = self.sync;
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();
        let (login_tx, mut login_rx) = mpsc::unbounded_channel::<LoginOutcome>();
        // callers waiting on the prompt in flight
        let mut login_waiters: Vec<Reply> = Vec::new();
        let mut published = sync.revision();
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut outcome = block_in_place(|| sync.start());
        publish(&sync, &state, &mut published);
        info!(tick_ms = self.tick.as_millis() as u64, "sync driver running");

        while outcome.is_ok() {
            tokio::select! {
                command = commands.recv() => match command {
                    None | Some(Command::Shutdown) => break,
                    Some(Command::Login(reply)) => {
                        if !login_waiters.is_empty() {
                            login_waiters.push(reply);
                        } else if sync.login_due() {
                            dispatch_login(&sync, &login_tx);
                            login_waiters.push(reply);
                        } else {
                            let _ = reply.send(Ok(()));
                        }
                    }
                    Some(Command::SetPollingInterval(interval_ms, reply)) => {
                        block_in_place(|| sync.set_polling_interval(interval_ms));
                        let _ = reply.send(Ok(()));
                    }
                    Some(Command::ReplaceEndpoints(urls, reply)) => {
                        outcome = block_in_place(|| sync.replace_endpoints(urls));
                        publish(&sync, &state, &mut published);
                        answer(reply, &outcome);
                    }
                },
                _ = ticker.tick() => {
                    outcome = block_in_place(|| tick(&mut sync)).map(|due| {
                        if let Some(request) = due {
                            dispatch_balance(&sync, request, &done_tx);
                        }
                    });
                }
                Some((request, result)) = done_rx.recv() => {
                    outcome = block_in_place(|| sync.complete_balance(request, result))
                        .map(|_| ());
                }
                Some(result) = login_rx.recv() => {
                    outcome = block_in_place(|| sync.complete_login(result));
                    publish(&sync, &state, &mut published);
                    for reply in login_waiters.drain(..) {
                        answer(reply, &outcome);
                    }
                }
            }
            publish(&sync, &state, &mut published);
        }

        for reply in login_waiters.drain(..) {
            let _ = reply.send(Err(DriverError::Closed));
        }

        if let Err(e) = &outcome {
            error!(error = %e, "sync driver stopping on fatal error");
        }
        block_in_place(move || {
            sync.shutdown();
            state.send_replace(sync.snapshot().clone());
            drop(sync);
        });
        info!("sync driver stopped");
        outcome
    }
}

fn tick<G, F>(sync: &mut Synchronizer<G, F>) -> Result<Option<BalanceRequest>, SyncError>
where
    G: WalletGateway,
    F: CandidateFactory,
{
    sync.pump()?;
    sync.poll_block()
}

fn dispatch_balance<G, F>(
    sync: &Synchronizer<G, F>,
    request: BalanceRequest,
    done: &mpsc::UnboundedSender<Completion>,
) where
    G: WalletGateway,
    F: CandidateFactory,
    F::Candidate: Send + 'static,
{
    let Some(reader) = sync.balance_reader(&request) else {
        return;
    };
    let done = done.clone();
    debug!(block = request.block, "dispatching balance read");
    tokio::task::spawn_blocking(move || {
        let result = reader.balance(request.account);
        let _ = done.send((request, result));
    });
}

fn dispatch_login<G, F>(
    sync: &Synchronizer<G, F>,
    done: &mpsc::UnboundedSender<LoginOutcome>,
) where
    G: WalletGateway + Clone + Send + 'static,
    F: CandidateFactory,
{
    let gateway = sync.gateway().clone();
    let done = done.clone();
    debug!("dispatching login prompt");
    tokio::task::spawn_blocking(move || {
        let _ = done.send(gateway.request_accounts());
    });
}

fn answer(reply: Reply, outcome: &Result<(), SyncError>) {
    let response = match outcome {
        Ok(()) => Ok(()),
        Err(e) => Err(DriverError::Fatal(e.to_string())),
    };
    let _ = reply.send(response);
}

fn publish<G, F>(
    sync: &Synchronizer<G, F>,
    state: &watch::Sender<ConnectionState>,
    published: &mut u64,
) where
    G: WalletGateway,
    F: CandidateFactory,
{
    if sync.revision() != *published {
        *published = sync.revision();
        state.send_replace(sync.snapshot().clone());
    }
}
