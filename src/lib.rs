//! CommHub Library
//!
//! Session engine for TCP client, TCP listener and serial endpoints:
//! per-session traffic capture, automatic TCP reconnection and live event
//! fan-out to observers.

pub mod cli;
pub mod core;
pub mod domain;
pub mod infrastructure;

pub use core::broadcast::{Broadcaster, ObserverCommand, ObserverReply};
pub use core::communication::{Direction, MessageRecord, SessionEngine, TransportKind};
pub use core::event::{topics, EngineEvent, EventBus};
pub use core::session::{SessionDescriptor, SessionId, SessionInfo, SessionStatus};
pub use core::store::{MessageHistory, StoreManager};
pub use domain::config::CommHubConfig;
pub use domain::error::{CommHubError, CommHubResult};
pub use infrastructure::observer::ObserverServer;
