use crate::types::TxStatus;

/// Finality rule a bridge applies before treating a transaction as settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilityPolicy {
    /// Settled once included with at least `n` confirmations.
    Confirmations(u64),
    /// Settled once at or below the chain's last irreversible height.
    Irreversible,
}

impl StabilityPolicy {
    pub fn is_stable(&self, status: &TxStatus) -> bool {
        if status.block_height == 0 {
            return false;
        }
        match self {
            StabilityPolicy::Confirmations(n) => status.confirmations >= *n,
            StabilityPolicy::Irreversible => status
                .irreversible_height
                .is_some_and(|lib| status.block_height <= lib),
        }
    }
}
