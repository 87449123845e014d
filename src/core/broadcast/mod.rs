// Broadcast module - Observer subscriptions and fan-out
pub mod broadcaster;
pub mod observer;
pub mod pump;

pub use broadcaster::Broadcaster;
pub use observer::{ObserverHandle, Outbound};
pub use pump::{run_read_pump, run_write_pump, CommandHandler, ObserverCommand, ObserverReply};
