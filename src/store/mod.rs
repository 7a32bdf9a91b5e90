//! Persistence layer
//!
//! Two independent SQLite databases, both in WAL mode so the web tier can
//! read while converters write:
//!
//! - [`ContentStore`]: rendered pages keyed by content key
//! - [`LogStore`]: append-only operator event log with size-capped pruning

pub mod content;
pub mod log;

pub use content::ContentStore;
pub use log::{LogEvent, LogStore};

use std::time::Duration;

/// Retry a closure while SQLite reports the database busy or locked.
///
/// WAL mode mostly avoids writer/reader contention, but checkpoints and
/// concurrent writers can still surface SQLITE_BUSY. Bounded backoff keeps
/// a transient lock from failing a conversion.
pub(crate) fn with_busy_retry<T>(
    mut op: impl FnMut() -> rusqlite::Result<T>,
) -> rusqlite::Result<T> {
    const MAX_ATTEMPTS: u32 = 5;
    let mut delay = Duration::from_millis(50);

    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if crate::error::is_busy(&e) && attempt + 1 < MAX_ATTEMPTS => {
                attempt += 1;
                tracing::debug!(attempt, "Database busy, retrying");
                std::thread::sleep(delay);
                delay = delay.saturating_mul(2);
            }
            Err(e) => return Err(e),
        }
    }
}
