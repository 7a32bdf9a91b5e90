//! Console command implementations
//!
//! One module per operator-facing subcommand, plus the two hidden
//! entrypoints the stack launches internally: `supervise` (the detached
//! control loop) and `convert` (the watcher + worker pool process).

pub mod convert;
pub mod restart;
pub mod start;
pub mod status;
pub mod stop;
pub mod supervise;
