// Session module - Registry, lifecycle state and reconnection
pub mod reconnect;
pub mod registry;
pub mod session;
pub mod state;

pub use reconnect::{ReconnectPolicy, ReconnectState, ReconnectSupervisor};
pub use registry::SessionRegistry;
pub use session::{Session, SessionDescriptor, SessionId, SessionInfo, SessionRuntime};
pub use state::SessionStatus;
