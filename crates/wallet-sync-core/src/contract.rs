use std::collections::BTreeMap;
use std::sync::Arc;

use alloy::dyn_abi::{DynSolType, JsonAbiExt};
use alloy::json_abi::{Function, JsonAbi};
use alloy::primitives::{Address, Bytes};
use tracing::debug;

use crate::domain::{ConnectionState, SignerHandle};
use crate::ports::PortError;

/// Where a contract lives: one address everywhere, or per chain id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractAddress {
    Fixed(Address),
    ByChain(BTreeMap<u64, Address>),
}

impl ContractAddress {
    pub fn resolve(&self, chain_id: u64) -> Option<Address> {
        match self {
            ContractAddress::Fixed(address) => Some(*address),
            ContractAddress::ByChain(table) => table.get(&chain_id).copied(),
        }
    }
}

impl From<Address> for ContractAddress {
    fn from(address: Address) -> Self {
        ContractAddress::Fixed(address)
    }
}

/// A contract ABI bound to an address and the signer that will send to it.
#[derive(Debug, Clone)]
pub struct BoundContract {
    pub address: Address,
    pub abi: Arc<JsonAbi>,
    pub signer: SignerHandle,
    /// Chain the address was resolved for; `None` for [`load_contract`].
    pub chain_id: Option<u64>,
}

impl BoundContract {
    /// ABI-encodes a call. `method_signature` is either a bare name (first
    /// overload wins) or a full `name(type,...)` signature. Arguments are
    /// Solidity literals as a command line would take them: `0xdead...`,
    /// `100`, `[1,2]`, `(true,"x")`.
    pub fn encode_call(&self, method_signature: &str, args: &[String]) -> Result<Bytes, PortError> {
        let function = select_function(&self.abi, method_signature)?;
        if function.inputs.len() != args.len() {
            return Err(PortError::Validation(format!(
                "{} takes {} arguments, got {}",
                function.name,
                function.inputs.len(),
                args.len()
            )));
        }

        let values = function
            .inputs
            .iter()
            .zip(args)
            .map(|(input, arg)| {
                let ty = DynSolType::parse(&input.selector_type()).map_err(|e| {
                    PortError::Validation(format!("unsupported type '{}': {e}", input.ty))
                })?;
                ty.coerce_str(arg).map_err(|e| {
                    PortError::Validation(format!("arg '{}' parse failed: {e}", input.name))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        function
            .abi_encode_input(&values)
            .map(Bytes::from)
            .map_err(|e| PortError::Validation(format!("abi encoding failed: {e}")))
    }
}

pub fn parse_abi(abi_json: &str) -> Result<JsonAbi, PortError> {
    serde_json::from_str(abi_json)
        .map_err(|e| PortError::Validation(format!("invalid abi json: {e}")))
}

/// Binds `abi` at an explicit address.
pub fn load_contract(address: Address, abi: Arc<JsonAbi>, signer: SignerHandle) -> BoundContract {
    BoundContract {
        address,
        abi,
        signer,
        chain_id: None,
    }
}

/// Memoized binding for a contract that follows the connection: recomputes
/// only when the signer or the chain id changes.
#[derive(Debug)]
pub struct ContractBinder {
    address: ContractAddress,
    abi: Arc<JsonAbi>,
    inputs: Option<(u64, Option<SignerHandle>)>,
    bound: Option<BoundContract>,
    recomputed: usize,
}

impl ContractBinder {
    pub fn new(address: impl Into<ContractAddress>, abi: JsonAbi) -> Self {
        Self {
            address: address.into(),
            abi: Arc::new(abi),
            inputs: None,
            bound: None,
            recomputed: 0,
        }
    }

    /// Current binding for `state`, or `None` while there is no signer, no
    /// chain, or no address for the chain.
    pub fn bind(&mut self, state: &ConnectionState) -> Option<&BoundContract> {
        let inputs = (state.chain_id, state.signer.clone());
        if self.inputs.as_ref() != Some(&inputs) {
            self.bound = self.compute(inputs.0, inputs.1.as_ref());
            self.inputs = Some(inputs);
            self.recomputed += 1;
        }
        self.bound.as_ref()
    }

    /// How many times the binding was rebuilt.
    pub fn recomputed(&self) -> usize {
        self.recomputed
    }

    fn compute(&self, chain_id: u64, signer: Option<&SignerHandle>) -> Option<BoundContract> {
        let signer = signer?;
        if chain_id == 0 {
            return None;
        }
        let Some(address) = self.address.resolve(chain_id) else {
            debug!(chain_id, "no contract address for chain");
            return None;
        };
        Some(BoundContract {
            address,
            abi: Arc::clone(&self.abi),
            signer: signer.clone(),
            chain_id: Some(chain_id),
        })
    }
}

fn select_function<'a>(
    abi: &'a JsonAbi,
    method_signature: &str,
) -> Result<&'a Function, PortError> {
    let name = method_signature
        .split_once('(')
        .map_or(method_signature, |(name, _)| name);
    let overloads = abi
        .function(name)
        .ok_or_else(|| PortError::Validation(format!("method not found: {name}")))?;

    let found = if name.len() == method_signature.len() {
        overloads.first()
    } else {
        overloads.iter().find(|f| f.signature() == method_signature)
    };
    found.ok_or_else(|| {
        PortError::Validation(format!("method signature not found: {method_signature}"))
    })
}
