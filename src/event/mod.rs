//! Event Log & Bus subsystem.

mod bus;
mod store;
mod types;

pub use bus::{EventBus, SubscriptionHandle, Subscriber};
pub use store::EventStore;
pub use types::{Event, EventPayload, EventTier, EventType, Mode, Stage};
