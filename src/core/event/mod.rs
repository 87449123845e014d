// Event module - In-process publish/subscribe and the engine event types
pub mod bus;
pub mod events;
pub mod logger;

pub use bus::{EventBus, SubscriptionId};
pub use events::{topics, EngineEvent};
pub use logger::EventLogger;
