// Observer module - WebSocket listener feeding the broadcaster
pub mod server;

pub use server::ObserverServer;
