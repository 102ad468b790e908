//! Builds lexicographically-sortable secondary-index keys that iterate
//! newest-first under redb's ascending `Table::range`.

use chrono::{DateTime, Utc};

/// `{inverted_millis:020}#{id}` — ascending iteration over this string
/// visits events in descending timestamp order, falling back to `id` to
/// keep keys unique for same-millisecond events.
pub fn descending_key(timestamp: DateTime<Utc>, id: &str) -> String {
    let inverted = i64::MAX - timestamp.timestamp_millis();
    format!("{inverted:020}#{id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_timestamp_sorts_first() {
        let now = Utc::now();
        let earlier = now - chrono::Duration::seconds(5);
        let key_now = descending_key(now, "a");
        let key_earlier = descending_key(earlier, "b");
        assert!(key_now < key_earlier);
    }
}
