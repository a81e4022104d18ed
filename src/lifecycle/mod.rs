//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Open shared stores → Build coordinators → init against oracles
//!
//! Running (reconciler.rs):
//!     Periodic tick → reconcile every known address on every chain
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop reconciler → Close coordinators → Last owner closes store
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then storage, then coordinators
//! - Ordered shutdown: background tasks first, then coordinators, then stores

pub mod reconciler;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use reconciler::Reconciler;
pub use shutdown::Shutdown;
pub use startup::{Gateway, StartupError};
