use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use alloy::primitives::{Address, U256};
use serde_json::Value;
use tracing::{debug, trace};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use wallet_sync_core::{parse_chain_id, ChainReader, PortError};

/// EIP-1193 code for a request the user declined.
pub const USER_REJECTED: i64 = 4001;

pub fn request_body(id: u64, method: &str, params: Value) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

/// Extracts `result` from a JSON-RPC response, mapping error objects.
pub fn response_result(body: Value) -> Result<Value, PortError> {
    if let Some(err) = body.get("error") {
        let code = err.get("code").and_then(Value::as_i64);
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_owned();
        if code == Some(USER_REJECTED) {
            return Err(PortError::Rejected(message));
        }
        return Err(PortError::Transport(format!("rpc error {code:?}: {message}")));
    }
    body.get("result")
        .cloned()
        .ok_or_else(|| PortError::Transport("rpc response missing result".to_owned()))
}

/// Accepts `0x` hex quantities, decimal strings and plain numbers.
pub fn quantity_u64(value: &Value) -> Result<u64, PortError> {
    if let Some(n) = value.as_u64() {
        return Ok(n);
    }
    let s = value
        .as_str()
        .ok_or_else(|| PortError::Validation(format!("quantity expected, got {value}")))?;
    parse_chain_id(s)
}

pub fn quantity_u256(value: &Value) -> Result<U256, PortError> {
    if let Some(n) = value.as_u64() {
        return Ok(U256::from(n));
    }
    let s = value
        .as_str()
        .ok_or_else(|| PortError::Validation(format!("quantity expected, got {value}")))?;
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => U256::from_str_radix(hex, 16),
        None => U256::from_str_radix(s, 10),
    };
    parsed.map_err(|e| PortError::Validation(format!("invalid quantity {s:?}: {e}")))
}

pub fn accounts_from(value: &Value) -> Result<Vec<Address>, PortError> {
    let arr = value
        .as_array()
        .ok_or_else(|| PortError::Transport("accounts: array expected".to_owned()))?;
    arr.iter()
        .map(|item| {
            item.as_str()
                .ok_or_else(|| PortError::Transport("accounts: string expected".to_owned()))?
                .parse::<Address>()
                .map_err(|e| PortError::Validation(format!("invalid account address: {e}")))
        })
        .collect()
}

fn balance_params(account: Address) -> Value {
    serde_json::json!([account.to_string(), "latest"])
}

/// Request/response endpoint. The head block is cached for one polling
/// interval so repeated reads inside a tick cost one round trip.
#[derive(Debug, Clone)]
pub struct HttpEndpoint {
    url: String,
    client: reqwest::blocking::Client,
    polling_interval: Duration,
    next_id: Arc<AtomicU64>,
    head: Arc<Mutex<Option<(Instant, u64)>>>,
}

impl HttpEndpoint {
    pub fn new(url: &str, polling_interval_ms: u64, timeout: Duration) -> Result<Self, PortError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PortError::Transport(format!("http client init failed: {e}")))?;
        Ok(Self {
            url: url.to_owned(),
            client,
            polling_interval: Duration::from_millis(polling_interval_ms),
            next_id: Arc::new(AtomicU64::new(1)),
            head: Arc::new(Mutex::new(None)),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn polling_interval(&self) -> Duration {
        self.polling_interval
    }

    pub fn call(&self, method: &str, params: Value) -> Result<Value, PortError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self
            .client
            .post(&self.url)
            .json(&request_body(id, method, params))
            .send()
            .map_err(|e| PortError::Transport(format!("{method} request failed: {e}")))?;
        let status = response.status();
        let body: Value = response
            .json()
            .map_err(|e| PortError::Transport(format!("{method} json decode failed: {e}")))?;
        if !status.is_success() {
            return Err(PortError::Transport(format!("{method}: status {status}: {body}")));
        }
        response_result(body)
    }
}

impl ChainReader for HttpEndpoint {
    fn block_number(&self) -> Result<u64, PortError> {
        let mut head = self
            .head
            .lock()
            .map_err(|e| PortError::Transport(format!("head cache lock poisoned: {e}")))?;
        if let Some((at, height)) = *head {
            if at.elapsed() < self.polling_interval {
                trace!(url = %self.url, height, "cached head");
                return Ok(height);
            }
        }
        let height = quantity_u64(&self.call("eth_blockNumber", serde_json::json!([]))?)?;
        *head = Some((Instant::now(), height));
        Ok(height)
    }

    fn chain_id(&self) -> Result<u64, PortError> {
        quantity_u64(&self.call("eth_chainId", serde_json::json!([]))?)
    }

    fn balance(&self, account: Address) -> Result<U256, PortError> {
        quantity_u256(&self.call("eth_getBalance", balance_params(account))?)
    }
}

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

/// Long-lived WebSocket endpoint. One request is in flight at a time;
/// frames that do not answer it are skipped.
///
/// Only request/response is used over the socket. It never issues
/// `eth_subscribe("newHeads")`, so the head is read by polling
/// `eth_blockNumber` on the driver tick like any other candidate. The gain
/// over HTTP is the reused connection, not pushed blocks.
#[derive(Clone)]
pub struct WsEndpoint {
    url: String,
    socket: Arc<Mutex<Socket>>,
    next_id: Arc<AtomicU64>,
}

impl WsEndpoint {
    pub fn connect(url: &str, timeout: Duration) -> Result<Self, PortError> {
        let (socket, _response) = tungstenite::connect(url)
            .map_err(|e| PortError::Transport(format!("ws connect {url} failed: {e}")))?;
        set_read_timeout(&socket, timeout)?;
        debug!(url, "websocket endpoint connected");
        Ok(Self {
            url: url.to_owned(),
            socket: Arc::new(Mutex::new(socket)),
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn call(&self, method: &str, params: Value) -> Result<Value, PortError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut socket = self
            .socket
            .lock()
            .map_err(|e| PortError::Transport(format!("ws lock poisoned: {e}")))?;
        socket
            .send(Message::Text(request_body(id, method, params).to_string()))
            .map_err(|e| PortError::Transport(format!("{method} send failed: {e}")))?;

        loop {
            let frame = socket
                .read()
                .map_err(|e| PortError::Transport(format!("{method} read failed: {e}")))?;
            let text = match frame {
                Message::Text(text) => text,
                Message::Close(_) => {
                    return Err(PortError::Transport(format!("{}: socket closed", self.url)))
                }
                _ => continue,
            };
            let body: Value = serde_json::from_str(&text)
                .map_err(|e| PortError::Transport(format!("{method} json decode failed: {e}")))?;
            if body.get("id").and_then(Value::as_u64) != Some(id) {
                trace!(url = %self.url, "skipping unrelated frame");
                continue;
            }
            return response_result(body);
        }
    }
}

impl std::fmt::Debug for WsEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsEndpoint").field("url", &self.url).finish()
    }
}

fn set_read_timeout(socket: &Socket, timeout: Duration) -> Result<(), PortError> {
    let stream = match socket.get_ref() {
        MaybeTlsStream::Plain(stream) => stream,
        MaybeTlsStream::Rustls(tls) => tls.get_ref(),
        _ => return Ok(()),
    };
    stream
        .set_read_timeout(Some(timeout))
        .map_err(|e| PortError::Transport(format!("ws read timeout: {e}")))
}

impl ChainReader for WsEndpoint {
    fn block_number(&self) -> Result<u64, PortError> {
        quantity_u64(&self.call("eth_blockNumber", serde_json::json!([]))?)
    }

    fn chain_id(&self) -> Result<u64, PortError> {
        quantity_u64(&self.call("eth_chainId", serde_json::json!([]))?)
    }

    fn balance(&self, account: Address) -> Result<U256, PortError> {
        quantity_u256(&self.call("eth_getBalance", balance_params(account))?)
    }
}
