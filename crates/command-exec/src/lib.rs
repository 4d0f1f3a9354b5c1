//! Run a shell command with an optional timeout.
//!
//! # Architecture
//!
//! ```text
//! RunParams            ← command text, shell, environment, working dir
//!     │ start()
//!     ▼
//! RunningCommand       ← child process + background stdout/stderr readers
//!     │ wait_with_cancel(token)
//!     ▼
//! ExecOutcome          ← Completed(ExecResponse) | Cancelled(ExecResponse)
//! ```
//!
//! [`run_command_with_timeout`] wires a [`Clock`] timer to the cancellation
//! token and races it against process exit.

pub mod clock;
pub mod error;
pub mod process;
pub mod timeout;

pub use clock::{Clock, ManualClock, WallClock};
pub use error::ExecError;
pub use process::{ExecOutcome, ExecResponse, RunParams, RunningCommand, DEFAULT_SHELL};
pub use timeout::run_command_with_timeout;

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, ExecError>;
