//! siteward - process supervision and content conversion for a served directory tree
//!
//! Keeps a small set of cooperating local processes (reverse proxy, web
//! server, content converter) alive, and continuously converts a watched
//! content tree into rendered pages stored for the web tier to read.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Layered configuration (defaults, env, runtime overrides)
//! - [`process`] - Child process launching, management, and PID records
//! - [`supervisor`] - Health-check loop, restart policy, graceful shutdown
//! - [`watcher`] - Filesystem watching and event debouncing
//! - [`convert`] - Page/media conversion and the worker pool
//! - [`render`] - Template registry and markdown rendering
//! - [`store`] - SQLite content and event stores (WAL)
//! - [`models`] - Core data structures and types
//!
//! # Example
//!
//! ```no_run
//! use siteward::config::Config;
//! use siteward::store::ContentStore;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let store = ContentStore::open(config.paths.content_db())?;
//!     println!("{} pages stored", store.count()?);
//!     Ok(())
//! }
//! ```

pub mod commands;
pub mod config;
pub mod convert;
pub mod error;
pub mod models;
pub mod process;
pub mod render;
pub mod store;
pub mod supervisor;
pub mod watcher;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::models::{
        AllowedMethods, ContentRecord, ConversionTask, ManagedProcess, ProcessState, ServiceDef,
        TaskKind,
    };
    pub use crate::process::{PidRecord, ProcessManager};
    pub use crate::store::{ContentStore, LogStore};
    pub use crate::supervisor::Supervisor;
}

// Direct re-exports for convenience
pub use models::{ContentRecord, ManagedProcess, ProcessState, ServiceDef};
