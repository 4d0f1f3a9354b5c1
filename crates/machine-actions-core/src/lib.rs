//! Watches the actions enqueued for one agent and runs them, one at a
//! time.
//!
//! ```text
//! Facade ──batches of ids──▶ MachineActionsWorker ──(name, params)──▶ HandleAction
//!   ▲                              │                                      │
//!   └──── begin / finish ──────────┘                   HandlerRegistry ── juju-run
//!                                                                          │
//!                                                     command_exec::run_command_with_timeout
//! ```

pub mod action;
pub mod config;
pub mod error;
pub mod facade;
pub mod handler;
pub mod memory;
pub mod params;
pub mod tag;
pub mod worker;

pub use action::{Action, ActionRecord, ActionStatus, FinishStatus, Params, Results, RunningAction};
pub use config::{BatchPolicy, Settings, WorkerConfig, WorkerConfigBuilder};
pub use error::{ConfigError, FacadeError, HandlerError, Result, TagError, WorkerError};
pub use facade::{Facade, NotificationStream};
pub use handler::{HandleAction, HandlerRegistry, JujuRunHandler, JUJU_RUN_ACTION_NAME};
pub use memory::MemoryFacade;
pub use params::RunActionParams;
pub use tag::{ActionTag, AgentTag};
pub use worker::{MachineActionsWorker, WorkerState, STARTUP_CANCEL_MESSAGE};
