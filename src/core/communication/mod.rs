// Communication module - Adapter contract, captured records and the engine
pub mod engine;
pub mod message;
pub mod transport;

pub use engine::SessionEngine;
pub use message::{Direction, MessageRecord};
pub use transport::{ConnectionAdapter, ConnectionSink, PeerEvent, TransportKind};
