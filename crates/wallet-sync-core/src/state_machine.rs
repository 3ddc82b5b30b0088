use alloy::primitives::Address;
use thiserror::Error;

use crate::domain::{ConnectionState, ProviderHandle, ProviderId, SignerHandle};

/// The closed set of state mutations. Each variant replaces only the fields it names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    SetHasProvider(bool),
    SetIsKnownWalletKind(bool),
    /// Applying the zero address is the same as [`Transition::ClearAuthorization`].
    SetAuthorized(Address),
    ClearAuthorization,
    /// Installs a provider and its signer together.
    SetProvider {
        provider: ProviderHandle,
        signer: SignerHandle,
        urls: Vec<String>,
    },
    /// Drops provider and signer together.
    ReleaseProvider,
    /// Rebinds the signer of the current provider.
    SetSigner(SignerHandle),
    SetBalance {
        value: String,
        block: u64,
    },
    SetChain {
        id: u64,
        name: String,
    },
    SetBlock(u64),
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::SetHasProvider(_) => "set_has_provider",
            Transition::SetIsKnownWalletKind(_) => "set_is_known_wallet_kind",
            Transition::SetAuthorized(_) => "set_authorized",
            Transition::ClearAuthorization => "clear_authorization",
            Transition::SetProvider { .. } => "set_provider",
            Transition::ReleaseProvider => "release_provider",
            Transition::SetSigner(_) => "set_signer",
            Transition::SetBalance { .. } => "set_balance",
            Transition::SetChain { .. } => "set_chain",
            Transition::SetBlock(_) => "set_block",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Changed,
    Unchanged,
    /// Payload refers to a block the state has already moved past; ignored.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("set_signer requires an active provider")]
    NoProvider,
    #[error("signer bound to provider {signer:?} but active provider is {active:?}")]
    SignerMismatch {
        signer: ProviderId,
        active: ProviderId,
    },
    #[error("state invariant violated: {0}")]
    Invariant(&'static str),
}

/// Single owner of [`ConnectionState`]. Mutation only through [`StateStore::apply`].
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    state: ConnectionState,
    revision: u64,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> &ConnectionState {
        &self.state
    }

    /// Number of transitions that changed the state.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn apply(&mut self, transition: Transition) -> Result<Applied, TransitionError> {
        let mut next = self.state.clone();
        match transition {
            Transition::SetHasProvider(value) => next.has_provider = value,
            Transition::SetIsKnownWalletKind(value) => next.is_known_wallet_kind = value,
            Transition::SetAuthorized(account) if account != Address::ZERO => {
                next.account = account;
                next.is_authorized = true;
            }
            Transition::SetAuthorized(_) | Transition::ClearAuthorization => {
                next.account = Address::ZERO;
                next.is_authorized = false;
            }
            Transition::SetProvider {
                provider,
                signer,
                urls,
            } => {
                if signer.provider != provider.id {
                    return Err(TransitionError::SignerMismatch {
                        signer: signer.provider,
                        active: provider.id,
                    });
                }
                next.provider = Some(provider);
                next.signer = Some(signer);
                next.provider_urls = urls;
            }
            Transition::ReleaseProvider => {
                next.provider = None;
                next.signer = None;
            }
            Transition::SetSigner(signer) => {
                let active = next.provider.as_ref().ok_or(TransitionError::NoProvider)?.id;
                if signer.provider != active {
                    return Err(TransitionError::SignerMismatch {
                        signer: signer.provider,
                        active,
                    });
                }
                next.signer = Some(signer);
            }
            Transition::SetBalance { value, block } => {
                if block < next.last_balance_block || block > next.current_block {
                    return Ok(Applied::Stale);
                }
                next.balance = value;
                next.last_balance_block = block;
            }
            Transition::SetChain { id, name } => {
                next.chain_id = id;
                next.network_name = name;
            }
            Transition::SetBlock(height) => {
                if height < next.last_balance_block {
                    return Ok(Applied::Stale);
                }
                next.current_block = height;
            }
        }

        if next == self.state {
            return Ok(Applied::Unchanged);
        }
        check_invariants(&next)?;
        self.state = next;
        self.revision += 1;
        Ok(Applied::Changed)
    }
}

pub fn check_invariants(state: &ConnectionState) -> Result<(), TransitionError> {
    if (state.account == Address::ZERO) == state.is_authorized {
        return Err(TransitionError::Invariant(
            "account must be zero exactly when unauthorized",
        ));
    }
    if state.provider.is_some() != state.signer.is_some() {
        return Err(TransitionError::Invariant(
            "provider and signer must be present together",
        ));
    }
    if state.last_balance_block > state.current_block {
        return Err(TransitionError::Invariant(
            "balance block cannot be ahead of current block",
        ));
    }
    Ok(())
}
