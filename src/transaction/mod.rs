mod lock_manager;
mod transaction;

pub use lock_manager::LockManager;
pub use transaction::{
    Transaction, TransactionId, TransactionState, INVALID_TRANSACTION_ID,
};
