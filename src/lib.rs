//! Blockchain transaction gateway: nonce coordination library

pub mod blockchain;
pub mod config;
pub mod lifecycle;
pub mod nonce;
pub mod observability;
pub mod storage;

pub use config::schema::GatewayConfig;
pub use lifecycle::{Gateway, Shutdown};
pub use nonce::{NonceCoordinator, NonceError};
