//! # Suola - URL signatures from a sandboxed rule engine
//!
//! Suola computes a stable signature for a URL by handing it to a
//! WebAssembly rule engine. The engine owns every rule; this crate owns
//! the boundary around it.
//!
//! ## Quick Start
//!
//! ```no_run
//! use suola::prelude::*;
//!
//! let service = SignatureService::new(
//!     ServiceConfig::new()
//!         .with_guest(GuestConfig::default().with_rule_source("/etc/suola/rules.yaml")),
//! )?;
//!
//! match service.signature_of("https://example.com/test-article")? {
//!     Some(signature) => println!("{signature}"),
//!     None => println!("no rule matched"),
//! }
//! # Ok::<(), suola::SignatureError>(())
//! ```
//!
//! ## Transports
//!
//! | Kind | Crate | Runs the engine |
//! |---|---|---|
//! | `guest` (default) | `suola-guest` | in a Wasmtime store inside this process |
//! | `daemon` | `suola-daemon` | in a supervised worker process over stdio |
//!
//! ## Failure Policy
//!
//! [`SignatureService::signature_of`] returns an error only for bad input.
//! A URL with no matching rule gives `None`. Transport faults are logged at
//! error level and also give `None`. Use
//! [`SignatureService::try_signature_of`] to see every failure.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    Your Application                     │
//! ├─────────────────────────────────────────────────────────┤
//! │                 suola (SignatureService)                │
//! │                             │                           │
//! │            ┌────────────────┴────────────────┐          │
//! │            │ suola-guest      │ suola-daemon │          │
//! │            │ (memory pool,    │ (supervisor, │          │
//! │            │  invoker)        │  channel)    │          │
//! │            └──────────────────┴──────────────┘          │
//! ├─────────────────────────────────────────────────────────┤
//! │              Wasmtime  /  worker process                │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod service;
pub mod transport;

pub use config::{ServiceConfig, TransportKind};
pub use error::{ErrorKind, Result, SignatureError};
pub use metrics::{CallOutcome, MetricsSnapshot, ServiceMetrics};
pub use service::SignatureService;
pub use transport::{DaemonTransport, SignatureTransport, parse_response};

// Re-export from sub-crates
pub use suola_daemon;
pub use suola_guest;

/// Prelude module for convenient imports.
pub mod prelude {
    // Main types
    pub use crate::{
        ErrorKind, ServiceConfig, SignatureError, SignatureService, SignatureTransport,
        TransportKind,
    };

    // Transport configuration
    pub use suola_daemon::DaemonConfig;
    pub use suola_guest::{GuestConfig, GuestInvoker};

    // Common std types
    pub use std::time::Duration;
}
