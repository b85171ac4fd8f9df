use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use log::{debug, trace};
use parking_lot::{Condvar, Mutex};

use crate::storage::page::RecordId;
use crate::transaction::{Transaction, TransactionId, TransactionState, INVALID_TRANSACTION_ID};

#[derive(Debug)]
struct RidLockInner {
    // transaction ids currently holding the shared lock; the minimum is
    // the oldest
    rd_txn_q: BTreeSet<TransactionId>,
    wr_txn_id: TransactionId,
}

#[derive(Debug)]
struct RidLock {
    inner: Mutex<RidLockInner>,
    condvar: Condvar,
}

impl RidLock {
    fn new() -> Self {
        Self {
            inner: Mutex::new(RidLockInner {
                rd_txn_q: BTreeSet::new(),
                wr_txn_id: INVALID_TRANSACTION_ID,
            }),
            condvar: Condvar::new(),
        }
    }
}

/// Tuple-level shared/exclusive lock manager implementing two-phase locking
/// with wait-die deadlock prevention: an older transaction (smaller id)
/// waits for a younger lock holder, a younger requester dies immediately.
/// Dying does not change the transaction's state; the caller may retry with
/// the same id.
#[derive(Debug)]
pub struct LockManager {
    strict_2pl: bool,
    rid_map: Mutex<HashMap<RecordId, Arc<RidLock>>>,
}

impl LockManager {
    pub fn new(strict_2pl: bool) -> Self {
        Self {
            strict_2pl,
            rid_map: Mutex::new(HashMap::new()),
        }
    }

    /// Acquires the shared lock on `rid`, blocking while a writer holds it.
    /// Fails outside the growing phase, or immediately (die) when the
    /// writer is older than `txn`.
    pub fn lock_shared(&self, txn: &Transaction, rid: RecordId) -> bool {
        if txn.state() != TransactionState::Growing {
            return false;
        }

        let rid_lock = self.rid_lock(rid);
        let mut inner = rid_lock.inner.lock();

        if inner.wr_txn_id != INVALID_TRANSACTION_ID && inner.wr_txn_id < txn.id() {
            trace!("txn {} dies waiting for shared lock on {:?}", txn.id(), rid);
            return false;
        }

        while inner.wr_txn_id != INVALID_TRANSACTION_ID {
            rid_lock.condvar.wait(&mut inner);
        }

        inner.rd_txn_q.insert(txn.id());
        txn.shared_lock_set().insert(rid);
        trace!("txn {} granted shared lock on {:?}", txn.id(), rid);
        true
    }

    /// Acquires the exclusive lock on `rid`, blocking while any other
    /// transaction holds it. Fails outside the growing phase, or
    /// immediately (die) when the writer or the oldest reader is older
    /// than `txn`.
    pub fn lock_exclusive(&self, txn: &Transaction, rid: RecordId) -> bool {
        if txn.state() != TransactionState::Growing {
            return false;
        }

        let rid_lock = self.rid_lock(rid);
        let mut inner = rid_lock.inner.lock();

        if self.must_die(&inner, txn.id()) {
            trace!(
                "txn {} dies waiting for exclusive lock on {:?}",
                txn.id(),
                rid
            );
            return false;
        }

        while inner.wr_txn_id != INVALID_TRANSACTION_ID || !inner.rd_txn_q.is_empty() {
            rid_lock.condvar.wait(&mut inner);
        }

        inner.wr_txn_id = txn.id();
        txn.exclusive_lock_set().insert(rid);
        trace!("txn {} granted exclusive lock on {:?}", txn.id(), rid);
        true
    }

    /// Upgrades a held shared lock to exclusive. A transaction that does
    /// not hold the shared lock is aborted. On die the shared lock is
    /// restored, so a failed upgrade leaves the transaction exactly where
    /// it was.
    pub fn lock_upgrade(&self, txn: &Transaction, rid: RecordId) -> bool {
        if txn.state() != TransactionState::Growing {
            return false;
        }

        let rid_lock = self.rid_lock(rid);
        let mut inner = rid_lock.inner.lock();

        if !txn.shared_lock_set().contains(&rid) {
            txn.set_state(TransactionState::Aborted);
            debug!(
                "txn {} aborted: upgrade on {:?} without the shared lock",
                txn.id(),
                rid
            );
            return false;
        }

        inner.rd_txn_q.remove(&txn.id());
        txn.shared_lock_set().remove(&rid);

        if self.must_die(&inner, txn.id()) {
            inner.rd_txn_q.insert(txn.id());
            txn.shared_lock_set().insert(rid);
            trace!("txn {} dies upgrading lock on {:?}", txn.id(), rid);
            return false;
        }

        while inner.wr_txn_id != INVALID_TRANSACTION_ID || !inner.rd_txn_q.is_empty() {
            rid_lock.condvar.wait(&mut inner);
        }

        inner.wr_txn_id = txn.id();
        txn.exclusive_lock_set().insert(rid);
        trace!("txn {} upgraded lock on {:?}", txn.id(), rid);
        true
    }

    /// Releases one lock. The first unlock moves a growing transaction to
    /// the shrinking phase. Under strict two-phase locking the release is
    /// deferred to `release_all` and this is a no-op that reports success.
    pub fn unlock(&self, txn: &Transaction, rid: RecordId) -> bool {
        if txn.state() == TransactionState::Growing {
            txn.set_state(TransactionState::Shrinking);
        }

        if self.strict_2pl && txn.state() == TransactionState::Shrinking {
            return true;
        }

        let Some(rid_lock) = self.try_rid_lock(rid) else {
            return false;
        };

        {
            let mut inner = rid_lock.inner.lock();
            if txn.exclusive_lock_set().remove(&rid) {
                inner.wr_txn_id = INVALID_TRANSACTION_ID;
            } else {
                inner.rd_txn_q.remove(&txn.id());
                txn.shared_lock_set().remove(&rid);
            }
        }
        rid_lock.condvar.notify_all();
        trace!("txn {} released lock on {:?}", txn.id(), rid);
        true
    }

    /// Releases every lock the transaction still holds. The transaction
    /// manager calls this at commit or abort; under strict two-phase
    /// locking this is the only point where exclusive locks come off.
    pub fn release_all(&self, txn: &Transaction) {
        let exclusive: Vec<RecordId> = txn.exclusive_lock_set().drain().collect();
        for rid in exclusive {
            if let Some(rid_lock) = self.try_rid_lock(rid) {
                {
                    let mut inner = rid_lock.inner.lock();
                    if inner.wr_txn_id == txn.id() {
                        inner.wr_txn_id = INVALID_TRANSACTION_ID;
                    }
                }
                rid_lock.condvar.notify_all();
            }
        }

        let shared: Vec<RecordId> = txn.shared_lock_set().drain().collect();
        for rid in shared {
            if let Some(rid_lock) = self.try_rid_lock(rid) {
                {
                    let mut inner = rid_lock.inner.lock();
                    inner.rd_txn_q.remove(&txn.id());
                }
                rid_lock.condvar.notify_all();
            }
        }
        debug!("txn {} released all locks", txn.id());
    }

    /// The wait-die test for writers: die when the current writer or the
    /// oldest reader is older than the requester.
    fn must_die(&self, inner: &RidLockInner, txn_id: TransactionId) -> bool {
        if inner.wr_txn_id != INVALID_TRANSACTION_ID && inner.wr_txn_id < txn_id {
            return true;
        }
        match inner.rd_txn_q.first() {
            Some(oldest_reader) => *oldest_reader < txn_id,
            None => false,
        }
    }

    fn rid_lock(&self, rid: RecordId) -> Arc<RidLock> {
        let mut map = self.rid_map.lock();
        map.entry(rid)
            .or_insert_with(|| Arc::new(RidLock::new()))
            .clone()
    }

    fn try_rid_lock(&self, rid: RecordId) -> Option<Arc<RidLock>> {
        self.rid_map.lock().get(&rid).cloned()
    }
}
