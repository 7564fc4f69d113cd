pub mod config;
pub mod dashboard;
pub mod deploy;
pub mod error;
pub mod hub;
pub mod node;
pub mod notify;
pub mod queue;
pub mod shutdown;
pub mod store;
