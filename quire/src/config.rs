// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration of a document host.
//!
//! All durations are deadlines or quiet periods measured from the moment a document session
//! observed the relevant event, see the documentation of every field.
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of events buffered per document before slow subscribers start lagging.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 1024;

/// Default maximum size in bytes for a revision payload or awareness signal.
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 4 * 1024 * 1024;

/// Configuration parameters for hosting documents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of events buffered per document.
    ///
    /// Subscribers falling further behind receive a "lagged" error and need to catch up by
    /// reading the revision log.
    pub broadcast_capacity: usize,

    /// Maximum size in bytes of a payload or awareness signal. Larger submissions are rejected as
    /// malformed.
    pub max_payload_size: usize,

    /// Deadline for durably appending a revision. Submissions exceeding it fail and leave the
    /// document version untouched.
    pub append_timeout: Duration,

    /// Quiet period without new revisions before a requested commit executes.
    pub commit_debounce: Duration,

    /// Maximum time a commit can be postponed by debouncing after the first uncommitted revision.
    pub max_commit_delay: Duration,

    /// Delay before a failed, requested commit is attempted again.
    pub commit_retry_delay: Duration,

    /// Deadline for folding revisions and saving the committed document.
    pub commit_timeout: Duration,

    /// Request a debounced commit after every accepted revision.
    pub auto_commit: bool,

    /// Delete revisions from the log once they were folded into a committed document.
    pub prune_committed: bool,

    /// Sessions without activity for this long, without subscribers and without pending work are
    /// evicted from memory.
    pub idle_timeout: Duration,

    /// Interval of the background task evicting idle sessions. `None` disables the task, eviction
    /// can still be triggered manually.
    pub eviction_interval: Option<Duration>,

    /// Editing state of documents which were never explicitly enabled or disabled.
    pub editable_by_default: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            append_timeout: Duration::from_secs(5),
            commit_debounce: Duration::from_secs(2),
            max_commit_delay: Duration::from_secs(30),
            commit_retry_delay: Duration::from_secs(5),
            commit_timeout: Duration::from_secs(30),
            auto_commit: true,
            prune_committed: false,
            idle_timeout: Duration::from_secs(5 * 60),
            eviction_interval: Some(Duration::from_secs(60)),
            editable_by_default: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::Config;

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let config: Config = serde_json::from_str(
            r#"{
                "prune_committed": true,
                "commit_debounce": { "secs": 1, "nanos": 500000000 },
                "eviction_interval": null
            }"#,
        )
        .unwrap();

        assert!(config.prune_committed);
        assert_eq!(config.commit_debounce, Duration::from_millis(1500));
        assert_eq!(config.eviction_interval, None);
        assert_eq!(config.max_payload_size, Config::default().max_payload_size);
        assert!(config.editable_by_default);
    }
}
