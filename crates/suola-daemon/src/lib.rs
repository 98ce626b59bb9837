//! Suola Daemon - out-of-process signature transport
//!
//! Runs a worker process and exchanges newline-framed requests and
//! responses with it over its standard streams.
//!
//! - [`ProcessSupervisor`]: spawn in a dedicated process group, liveness
//!   monitor, SIGTERM-then-SIGKILL teardown
//! - [`SubprocessChannel`]: serialized request/response exchange with a
//!   readiness-based, bounded wait on stdout and stderr
//! - [`Request`]: line framing of positional and `key=value` arguments
//!
//! # Lifecycle
//!
//! ```text
//! Starting ──► Running ──► Stopping ──► Stopped
//!                 │                        ▲
//!                 └──── unexpected exit ───┘
//! ```
//!
//! Process groups and signals make this crate Unix-only.

pub mod channel;
pub mod config;
pub mod error;
pub mod protocol;
pub mod supervisor;

pub use channel::SubprocessChannel;
pub use config::{DEFAULT_READY_MARKER, DEFAULT_RUNNER, DaemonConfig};
pub use error::{DaemonError, DaemonResult};
pub use protocol::Request;
pub use supervisor::{ProcessSupervisor, StopOutcome, WorkerFault, WorkerState, WorkerStdio};
