//! wallet-sync: mirrors an injected wallet's connection state and logs every change.

use eyre::WrapErr;
use tracing::{info, warn};

use wallet_sync_adapters::{Eip1193Adapter, RpcCandidateFactory, SyncConfig, SyncDriver};
use wallet_sync_core::Synchronizer;

fn main() -> eyre::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting wallet-sync");

    let config = SyncConfig::from_env().wrap_err("loading configuration")?;
    info!(
        endpoints = ?config.provider_urls,
        proxy = ?config.eip1193_proxy_url,
        balance_update_interval = config.balance_update_interval,
        "configuration loaded"
    );

    // Blocking clients are built outside the async runtime.
    let wallet = Eip1193Adapter::with_config(&config).wrap_err("initializing wallet adapter")?;
    let factory = RpcCandidateFactory::new(wallet.clone(), config.rpc_timeout());
    let sync = Synchronizer::new(wallet, factory, config.to_options());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .wrap_err("building tokio runtime")?;
    runtime.block_on(run(sync, config))
}

async fn run(
    sync: Synchronizer<Eip1193Adapter, RpcCandidateFactory>,
    config: SyncConfig,
) -> eyre::Result<()> {
    let (handle, join) = SyncDriver::new(sync, config.tick()).spawn();
    let mut updates = handle.watch();

    if let Err(e) = handle.login().await {
        warn!(error = %e, "login failed");
    }

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = updates.borrow_and_update().clone();
                info!(
                    has_provider = state.has_provider,
                    authorized = state.is_authorized,
                    account = %state.account,
                    network = %state.network_name,
                    chain_id = state.chain_id,
                    block = state.current_block,
                    balance = %state.balance,
                    "connection state"
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received; shutting down");
                if let Err(e) = handle.shutdown().await {
                    warn!(error = %e, "shutdown request not delivered");
                }
                break;
            }
        }
    }

    join.await
        .wrap_err("sync driver panicked")?
        .wrap_err("sync driver failed")?;
    info!("wallet-sync stopped");
    Ok(())
}
