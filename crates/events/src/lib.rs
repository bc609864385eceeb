//! Domain events and their in-process publication.
//!
//! Events are produced by ledger operations and handed to an [`EventBus`]
//! only after the unit of work that produced them has committed.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
