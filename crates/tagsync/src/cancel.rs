//! Version stamps for rejecting stale search responses.
//!
//! Every search takes a fresh version from the tracker. A response is only
//! applied if its version is still the active one when it arrives; earlier
//! searches are not aborted, their results are simply ignored.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Tracks the active search version.
///
/// Call `next_version()` (or `begin()`) when a new search starts. Any stamp
/// taken before that call reports itself as superseded from then on.
#[derive(Debug, Default, Clone)]
pub struct SearchVersionTracker {
    active_version: Arc<AtomicU64>,
}

impl SearchVersionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the active version and returns the new version number.
    pub fn next_version(&self) -> u64 {
        self.active_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns the current active version without incrementing.
    pub fn current_version(&self) -> u64 {
        self.active_version.load(Ordering::SeqCst)
    }

    /// Starts a new search and returns its stamp.
    pub fn begin(&self) -> VersionStamp {
        let version = self.next_version();
        VersionStamp {
            active_version: Arc::clone(&self.active_version),
            version,
        }
    }
}

/// The version a request was issued under.
#[derive(Debug, Clone)]
pub struct VersionStamp {
    active_version: Arc<AtomicU64>,
    version: u64,
}

impl VersionStamp {
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns `Some(())` while this stamp is still the active version,
    /// `None` once a newer search has started. Usable with `?`.
    #[inline]
    pub fn is_current(&self) -> Option<()> {
        if self.version == self.active_version.load(Ordering::SeqCst) {
            Some(())
        } else {
            None
        }
    }

    pub fn is_superseded(&self) -> bool {
        self.is_current().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_increase_monotonically() {
        let tracker = SearchVersionTracker::new();
        assert_eq!(tracker.current_version(), 0);
        assert_eq!(tracker.next_version(), 1);
        assert_eq!(tracker.next_version(), 2);
        assert_eq!(tracker.current_version(), 2);
    }

    #[test]
    fn newer_search_supersedes_older_stamp() {
        let tracker = SearchVersionTracker::new();
        let first = tracker.begin();
        assert!(first.is_current().is_some());

        let second = tracker.begin();
        assert!(first.is_superseded());
        assert!(second.is_current().is_some());
        assert_eq!(second.version(), first.version() + 1);
    }

    #[test]
    fn cloned_tracker_shares_versions() {
        let tracker = SearchVersionTracker::new();
        let stamp = tracker.begin();
        tracker.clone().next_version();
        assert!(stamp.is_superseded());
    }
}
