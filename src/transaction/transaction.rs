use std::collections::HashSet;

use parking_lot::{Mutex, MutexGuard};

use crate::storage::page::RecordId;

pub type TransactionId = i64;
pub const INVALID_TRANSACTION_ID: TransactionId = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Aborted,
    Committed,
}

/// A transaction as the lock manager sees it: an id (monotonically
/// increasing, so a smaller id means an older transaction), a two-phase
/// locking state, and the sets of records it holds locks on. The lock sets
/// live behind mutexes so the lock manager can maintain them through a
/// shared reference.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    state: Mutex<TransactionState>,
    shared_lock_set: Mutex<HashSet<RecordId>>,
    exclusive_lock_set: Mutex<HashSet<RecordId>>,
}

impl Transaction {
    pub fn new(id: TransactionId) -> Self {
        Self {
            id,
            state: Mutex::new(TransactionState::Growing),
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    pub fn shared_lock_set(&self) -> MutexGuard<'_, HashSet<RecordId>> {
        self.shared_lock_set.lock()
    }

    pub fn exclusive_lock_set(&self) -> MutexGuard<'_, HashSet<RecordId>> {
        self.exclusive_lock_set.lock()
    }
}
