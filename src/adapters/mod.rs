//! External adapter contracts (§6 "External Adapter Contracts"). Every
//! trait here is a seam the cores depend on; none of them are implemented
//! as production storage/payment/identity systems in this crate (those are
//! Non-goals). The in-memory implementations are reference/test doubles,
//! the same way the teacher repo keeps a `Mock` broker alongside its real
//! `ProfitDLL`/`Polymarket` adapters.

pub mod capability;
pub mod identity;
pub mod notifier;
pub mod payments;
pub mod persistence;
pub mod scoring;

pub use capability::{CapabilityLookup, CapabilityRecord, CapabilityStatus, InMemoryCapabilities};
pub use identity::{Identity, InMemoryIdentity};
pub use notifier::{InMemoryNotifier, Notifier};
pub use payments::{HoldRef, InMemoryPayments, Payments};
pub use persistence::{InMemoryPersistence, Persistence};
pub use scoring::{InMemoryScoring, Scoring};
