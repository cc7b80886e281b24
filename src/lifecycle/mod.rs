//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → wait_for_signal resolves
//!
//! Shutdown (shutdown.rs):
//!     trigger → HTTP and admin listeners stop accepting → in-flight requests drain
//! ```

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
