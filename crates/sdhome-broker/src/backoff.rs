//! Bounded reconnect backoff shared by the ingestion worker, the state-sync
//! worker, and the publisher's connection supervisor (§4.1, §4.4, §5):
//! starts at ~5s, doubles on each consecutive failure, capped at 60s, and
//! resets to the initial value once a connection succeeds.

use std::time::Duration;

pub const INITIAL: Duration = Duration::from_secs(5);
pub const MAX: Duration = Duration::from_secs(60);

pub fn next(current: Duration) -> Duration {
    (current * 2).min(MAX)
}
