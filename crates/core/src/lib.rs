//! `wallet-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod clock;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::{AuditInfo, Entity};
pub use error::{DomainError, DomainResult};
pub use id::{AccountId, EntryId, TransactionId, UserId};
pub use value_object::ValueObject;
