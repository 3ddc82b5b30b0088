mod common;

use std::time::Duration;

use alloy::primitives::utils::format_ether;
use wallet_sync_adapters::{
    Eip1193Adapter, HttpEndpoint, RpcCandidate, RpcCandidateFactory, WsEndpoint,
};
use wallet_sync_core::{
    CandidateFactory, ChainReader, EndpointKind, EndpointSpec, PortError, SyncOptions,
    Synchronizer,
};

use common::{account_a, calls_to, eth, shared_node, spawn_http_node, spawn_ws_node};

const TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn http_endpoint_reads_chain() {
    let node = shared_node();
    node.lock().expect("node").balances.insert(account_a(), eth(4));
    let url = spawn_http_node(node);

    let http = HttpEndpoint::new(&url, 4_000, TIMEOUT).expect("endpoint");
    assert_eq!(http.block_number().expect("block"), 100);
    assert_eq!(http.chain_id().expect("chain"), 1);
    assert_eq!(http.balance(account_a()).expect("balance"), eth(4));
}

#[test]
fn http_head_is_cached_for_polling_interval() {
    let node = shared_node();
    let url = spawn_http_node(node.clone());
    let http = HttpEndpoint::new(&url, 60_000, TIMEOUT).expect("endpoint");

    assert_eq!(http.block_number().expect("block"), 100);
    node.lock().expect("node").block = 101;
    assert_eq!(http.block_number().expect("cached"), 100);
    assert_eq!(calls_to(&node, "eth_blockNumber"), 1);

    let fresh = HttpEndpoint::new(&url, 0, TIMEOUT).expect("endpoint");
    assert_eq!(fresh.block_number().expect("block"), 101);
    assert_eq!(fresh.block_number().expect("block"), 101);
    assert_eq!(calls_to(&node, "eth_blockNumber"), 3);
}

#[test]
fn unknown_method_is_a_transport_error() {
    let url = spawn_http_node(shared_node());
    let http = HttpEndpoint::new(&url, 4_000, TIMEOUT).expect("endpoint");
    let err = http
        .call("eth_mining", serde_json::json!([]))
        .expect_err("unsupported");
    assert!(matches!(err, PortError::Transport(_)));
}

#[test]
fn ws_endpoint_skips_unrelated_frames() {
    let node = shared_node();
    node.lock().expect("node").balances.insert(account_a(), eth(1));
    let url = spawn_ws_node(node);

    let ws = WsEndpoint::connect(&url, TIMEOUT).expect("connect");
    assert_eq!(ws.block_number().expect("block"), 100);
    assert_eq!(ws.chain_id().expect("chain"), 1);
    assert_eq!(ws.balance(account_a()).expect("balance"), eth(1));
}

#[test]
fn ws_connect_failure_is_reported() {
    let err = WsEndpoint::connect("ws://127.0.0.1:1", TIMEOUT).expect_err("nothing listening");
    assert!(matches!(err, PortError::Transport(_)));
}

#[test]
fn factory_builds_candidate_per_kind() {
    let node = shared_node();
    let http_url = spawn_http_node(node.clone());
    let ws_url = spawn_ws_node(node);
    let factory = RpcCandidateFactory::new(Eip1193Adapter::deterministic(), TIMEOUT);

    let ws = factory
        .connect(&EndpointSpec {
            kind: EndpointKind::Streaming,
            url: Some(ws_url),
            polling_interval_ms: None,
        })
        .expect("streaming");
    assert_eq!(ws.kind(), EndpointKind::Streaming);

    let http = factory
        .connect(&EndpointSpec {
            kind: EndpointKind::Polling,
            url: Some(http_url),
            polling_interval_ms: Some(1_000),
        })
        .expect("polling");
    let RpcCandidate::Polling(endpoint) = &http else {
        panic!("expected polling candidate");
    };
    assert_eq!(endpoint.polling_interval(), Duration::from_secs(1));

    let injected = factory
        .connect(&EndpointSpec::injected())
        .expect("injected");
    assert_eq!(injected.kind(), EndpointKind::Injected);
}

#[test]
fn factory_requires_present_wallet_for_injected_slot() {
    let factory = RpcCandidateFactory::new(Eip1193Adapter::absent(), TIMEOUT);
    assert!(matches!(
        factory.connect(&EndpointSpec::injected()),
        Err(PortError::NotFound(_))
    ));
}

#[test]
fn synchronizer_prefers_configured_endpoint_over_wallet() {
    let node = shared_node();
    {
        let mut n = node.lock().expect("node");
        n.balances.insert(account_a(), eth(9));
        n.chain_id = 5;
    }
    let url = spawn_http_node(node.clone());

    let wallet = Eip1193Adapter::deterministic();
    wallet
        .debug_inject_accounts_changed(vec![account_a()])
        .expect("authorize");
    wallet.debug_set_balance(account_a(), eth(1)).expect("balance");

    let factory = RpcCandidateFactory::new(wallet.clone(), TIMEOUT);
    let options = SyncOptions {
        provider_urls: vec![url],
        ..SyncOptions::default()
    };
    let mut sync = Synchronizer::new(wallet, factory, options);
    sync.start().expect("start");

    let state = sync.snapshot();
    let handle = state.provider.as_ref().expect("provider");
    assert_eq!(
        handle.candidates,
        vec![EndpointKind::Polling, EndpointKind::Injected]
    );
    assert_eq!(state.network_name, "Goerli");

    let request = sync.poll_block().expect("poll").expect("refresh due");
    assert_eq!(request.block, 100);
    let result = sync.read_balance(&request);
    sync.complete_balance(request, result).expect("complete");
    assert_eq!(sync.snapshot().balance, format_ether(eth(9)));
    assert!(calls_to(&node, "eth_getBalance") >= 1);
}
