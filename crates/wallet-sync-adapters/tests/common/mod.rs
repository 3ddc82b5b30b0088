#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Read;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use serde_json::{json, Value};
use tiny_http::{Response, Server};
use tungstenite::Message;

/// Just enough of an Ethereum node (and a proxied wallet) to answer the
/// calls the adapters make.
#[derive(Debug)]
pub struct MockNode {
    pub block: u64,
    pub chain_id: u64,
    pub balances: HashMap<Address, U256>,
    pub accounts: Vec<String>,
    pub grant: Vec<String>,
    pub reject_prompts: bool,
    pub client_version: String,
    /// How long `eth_requestAccounts` keeps the prompt open.
    pub prompt_delay: Option<Duration>,
    pub calls: Vec<String>,
}

impl Default for MockNode {
    fn default() -> Self {
        Self {
            block: 100,
            chain_id: 1,
            balances: HashMap::new(),
            accounts: Vec::new(),
            grant: vec![account_a().to_string()],
            reject_prompts: false,
            client_version: "MetaMask/v11.16.0".to_owned(),
            prompt_delay: None,
            calls: Vec::new(),
        }
    }
}

pub type SharedNode = Arc<Mutex<MockNode>>;

pub fn shared_node() -> SharedNode {
    Arc::new(Mutex::new(MockNode::default()))
}

pub fn calls_to(node: &SharedNode, method: &str) -> usize {
    node.lock()
        .expect("node lock")
        .calls
        .iter()
        .filter(|m| *m == method)
        .count()
}

fn answer(node: &SharedNode, request: &Value) -> Value {
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let params = request.get("params").cloned().unwrap_or(json!([]));

    let delay = {
        let mut n = node.lock().expect("node lock");
        n.calls.push(method.clone());
        n.prompt_delay.filter(|_| method == "eth_requestAccounts")
    };
    if let Some(delay) = delay {
        thread::sleep(delay);
    }

    let mut n = node.lock().expect("node lock");
    let result = match method.as_str() {
        "eth_blockNumber" => Ok(json!(format!("0x{:x}", n.block))),
        "eth_chainId" => Ok(json!(format!("0x{:x}", n.chain_id))),
        "eth_getBalance" => {
            let account: Address = params[0]
                .as_str()
                .and_then(|s| s.parse().ok())
                .unwrap_or(Address::ZERO);
            let wei = n.balances.get(&account).copied().unwrap_or_default();
            Ok(json!(format!("0x{wei:x}")))
        }
        "eth_accounts" => Ok(json!(n.accounts)),
        "eth_requestAccounts" if n.reject_prompts => {
            Err(json!({"code": 4001, "message": "User rejected the request."}))
        }
        "eth_requestAccounts" => {
            n.accounts = n.grant.clone();
            Ok(json!(n.accounts))
        }
        "web3_clientVersion" => Ok(json!(n.client_version)),
        _ => Err(json!({"code": -32601, "message": "method not found"})),
    };
    match result {
        Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
        Err(error) => json!({"jsonrpc": "2.0", "id": id, "error": error}),
    }
}

/// Serves JSON-RPC over HTTP until the process exits, one thread per request
/// so a slow prompt does not hold up other calls. Returns the base url.
pub fn spawn_http_node(node: SharedNode) -> String {
    let server = Server::http("127.0.0.1:0").expect("start server");
    let url = format!("http://{}", server.server_addr());

    thread::spawn(move || {
        while let Ok(mut req) = server.recv() {
            let node = node.clone();
            thread::spawn(move || {
                let mut body = String::new();
                let _ = req.as_reader().read_to_string(&mut body);
                let payload = match serde_json::from_str::<Value>(&body) {
                    Ok(request) => answer(&node, &request),
                    Err(_) => json!({
                        "jsonrpc": "2.0",
                        "id": null,
                        "error": {"code": -32700, "message": "parse error"}
                    }),
                };
                let _ = req.respond(Response::from_string(payload.to_string()));
            });
        }
    });

    url
}

/// Serves JSON-RPC over one WebSocket connection. Every reply is preceded by
/// an unsolicited subscription frame.
pub fn spawn_ws_node(node: SharedNode) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ws");
    let url = format!("ws://{}", listener.local_addr().expect("ws addr"));

    thread::spawn(move || {
        let Ok((stream, _)) = listener.accept() else {
            return;
        };
        let Ok(mut socket) = tungstenite::accept(stream) else {
            return;
        };
        while let Ok(frame) = socket.read() {
            let Message::Text(text) = frame else {
                continue;
            };
            let Ok(request) = serde_json::from_str::<Value>(&text) else {
                continue;
            };
            let push = json!({
                "jsonrpc": "2.0",
                "method": "eth_subscription",
                "params": {"subscription": "0x1", "result": {"number": "0x0"}}
            });
            if socket.send(Message::Text(push.to_string())).is_err() {
                break;
            }
            let reply = answer(&node, &request);
            if socket.send(Message::Text(reply.to_string())).is_err() {
                break;
            }
        }
    });

    url
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
