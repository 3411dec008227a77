//! Transaction / Escrow Coordinator (§4.4).

mod coordinator;
mod rating;
mod transaction;

pub use coordinator::TransactionCoordinator;
pub use rating::Rating;
pub use transaction::{Transaction, TransactionSource, TransactionStatus};
