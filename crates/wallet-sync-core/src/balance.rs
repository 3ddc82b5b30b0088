use alloy::primitives::Address;

use crate::domain::ProviderId;

pub const DEFAULT_BALANCE_UPDATE_INTERVAL: u64 = 10;

/// Block-count throttle for balance reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalancePolicy {
    /// 0 refreshes on every new block.
    pub update_interval_blocks: u64,
}

impl Default for BalancePolicy {
    fn default() -> Self {
        Self {
            update_interval_blocks: DEFAULT_BALANCE_UPDATE_INTERVAL,
        }
    }
}

impl BalancePolicy {
    pub fn new(update_interval_blocks: u64) -> Self {
        Self {
            update_interval_blocks,
        }
    }

    pub fn should_refresh(&self, block: u64, last_balance_block: u64) -> bool {
        block > last_balance_block.saturating_add(self.update_interval_blocks)
    }
}

/// A balance read issued for `account` against provider `provider` at height `block`.
/// The result is only applied if all three still match when it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceRequest {
    pub provider: ProviderId,
    pub account: Address,
    pub block: u64,
}
