//! In-Memory Swap Registration Service

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::{BridgeError, Result};
use crate::registrar::RegistrationService;
use crate::types::SwapType;

/// A registration accepted by [`MockRegistrationService`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Registration {
    pub swap_type: SwapType,
    pub tx_hash: String,
    pub pair_id: String,
}

#[derive(Default)]
pub struct MockRegistrationService {
    accepted: Mutex<Vec<Registration>>,
    known: Mutex<HashSet<Registration>>,
    failures: AtomicU32,
    calls: AtomicUsize,
}

impl MockRegistrationService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next `n` calls with a transient error.
    pub fn fail_next(&self, n: u32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Accepted registrations, in arrival order.
    pub fn registrations(&self) -> Vec<Registration> {
        self.accepted
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn count_for(&self, tx_hash: &str, pair_id: &str) -> usize {
        self.registrations()
            .iter()
            .filter(|r| r.tx_hash == tx_hash && r.pair_id == pair_id)
            .count()
    }
}

#[async_trait]
impl RegistrationService for MockRegistrationService {
    async fn register(&self, swap_type: SwapType, tx_hash: &str, pair_id: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BridgeError::Rpc("mock swap server unavailable".into()));
        }

        let registration = Registration {
            swap_type,
            tx_hash: tx_hash.to_string(),
            pair_id: pair_id.to_string(),
        };
        if !self
            .known
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(registration.clone())
        {
            return Err(BridgeError::AlreadyRegistered);
        }
        self.accepted
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(registration);
        Ok(())
    }
}
