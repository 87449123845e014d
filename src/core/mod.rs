// Core module - Session engine, stores and event distribution
pub mod broadcast;
pub mod communication;
pub mod event;
pub mod session;
pub mod store;
