use crate::ports::PortError;

pub const UNKNOWN_NETWORK: &str = "unknown";

pub fn network_name(chain_id: u64) -> &'static str {
    match chain_id {
        1 => "Mainnet",
        3 => "Ropsten",
        4 => "Rinkeby",
        5 => "Goerli",
        42 => "Kovan",
        _ => UNKNOWN_NETWORK,
    }
}

/// Decodes a chain id as delivered by `chainChanged` / `eth_chainId`:
/// `0x`-prefixed hex or a plain decimal string.
pub fn parse_chain_id(raw: &str) -> Result<u64, PortError> {
    let raw = raw.trim();
    if raw.starts_with("0x") || raw.starts_with("0X") {
        u64::from_str_radix(&raw[2..], 16)
            .map_err(|e| PortError::Validation(format!("invalid hex chain id {raw:?}: {e}")))
    } else {
        raw.parse()
            .map_err(|e| PortError::Validation(format!("invalid chain id {raw:?}: {e}")))
    }
}
