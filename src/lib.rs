pub mod error;
pub mod config;
pub mod channel;
pub mod consent;
pub mod identity;
pub mod session;
pub mod api;
pub mod context;
pub mod server;
