//! Debounce state for paths that are still being written.
//!
//! The tracker is a plain state machine driven by the caller's clock. Each
//! tracked path has a deadline of `min(last_seen + quiet, first_seen + max_wait)`;
//! once the deadline passes the path is emitted exactly once and forgotten.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct Pending {
    first_seen: Instant,
    last_seen: Instant,
}

#[derive(Debug)]
pub struct StabilityTracker {
    quiet_interval: Duration,
    max_wait: Duration,
    pending: HashMap<PathBuf, Pending>,
}

impl StabilityTracker {
    pub fn new(quiet_interval: Duration, max_wait: Duration) -> Self {
        Self {
            quiet_interval,
            max_wait: max_wait.max(quiet_interval),
            pending: HashMap::new(),
        }
    }

    /// Records an event for `path`. Returns `true` when the path was not
    /// already waiting.
    pub fn observe(&mut self, path: PathBuf, now: Instant) -> bool {
        match self.pending.get_mut(&path) {
            Some(entry) => {
                entry.last_seen = entry.last_seen.max(now);
                false
            }
            None => {
                self.pending.insert(
                    path,
                    Pending {
                        first_seen: now,
                        last_seen: now,
                    },
                );
                true
            }
        }
    }

    pub fn cancel(&mut self, path: &Path) -> bool {
        self.pending.remove(path).is_some()
    }

    /// Removes and returns every path whose deadline is at or before `now`,
    /// earliest deadline first.
    pub fn due(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut ready: Vec<(Instant, PathBuf)> = self
            .pending
            .iter()
            .map(|(path, entry)| (self.deadline(entry), path))
            .filter(|(deadline, _)| *deadline <= now)
            .map(|(deadline, path)| (deadline, path.clone()))
            .collect();
        ready.sort();

        for (_, path) in &ready {
            self.pending.remove(path);
        }
        ready.into_iter().map(|(_, path)| path).collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|e| self.deadline(e)).min()
    }

    pub fn is_tracked(&self, path: &Path) -> bool {
        self.pending.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn deadline(&self, entry: &Pending) -> Instant {
        (entry.last_seen + self.quiet_interval).min(entry.first_seen + self.max_wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUIET: Duration = Duration::from_secs(2);
    const MAX_WAIT: Duration = Duration::from_secs(30);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_burst_emits_once_after_quiet_interval() {
        let start = Instant::now();
        let mut tracker = StabilityTracker::new(QUIET, MAX_WAIT);
        let path = PathBuf::from("/in/a.csv");

        assert!(tracker.observe(path.clone(), start));
        for step in 1..=5 {
            assert!(!tracker.observe(path.clone(), start + ms(step * 200)));
        }
        assert_eq!(tracker.len(), 1);

        // Last event at +1000ms, so nothing is due before +3000ms.
        assert!(tracker.due(start + ms(2999)).is_empty());
        assert_eq!(tracker.next_deadline(), Some(start + ms(3000)));
        assert_eq!(tracker.due(start + ms(3000)), vec![path.clone()]);
        assert!(tracker.due(start + ms(60_000)).is_empty());
        assert!(!tracker.is_tracked(&path));
    }

    #[test]
    fn test_continuous_writes_hit_the_ceiling() {
        let start = Instant::now();
        let mut tracker = StabilityTracker::new(QUIET, MAX_WAIT);
        let path = PathBuf::from("/in/growing.csv");

        let mut emitted = Vec::new();
        let mut t = 0;
        while t <= 40_000 {
            let now = start + ms(t);
            emitted.extend(tracker.due(now).into_iter().map(|p| (t, p)));
            tracker.observe(path.clone(), now);
            t += 500;
        }

        assert_eq!(emitted.first().map(|(t, _)| *t), Some(30_000));
        // After the forced emission the same path starts a fresh burst.
        assert_eq!(emitted.iter().filter(|(t, _)| *t < 30_500).count(), 1);
    }

    #[test]
    fn test_two_files_emit_independently() {
        let start = Instant::now();
        let mut tracker = StabilityTracker::new(QUIET, MAX_WAIT);
        let a = PathBuf::from("/in/a.csv");
        let b = PathBuf::from("/in/b.csv");

        tracker.observe(a.clone(), start);
        tracker.observe(b.clone(), start + ms(500));

        assert_eq!(tracker.due(start + ms(2000)), vec![a]);
        assert_eq!(tracker.due(start + ms(2500)), vec![b]);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_cancel_drops_pending_path() {
        let start = Instant::now();
        let mut tracker = StabilityTracker::new(QUIET, MAX_WAIT);
        let path = PathBuf::from("/in/gone.csv");

        tracker.observe(path.clone(), start);
        assert!(tracker.cancel(&path));
        assert!(!tracker.cancel(&path));
        assert!(tracker.due(start + MAX_WAIT).is_empty());
        assert_eq!(tracker.next_deadline(), None);
    }

    #[test]
    fn test_max_wait_never_below_quiet_interval() {
        let start = Instant::now();
        let mut tracker = StabilityTracker::new(QUIET, ms(100));
        tracker.observe(PathBuf::from("/in/a.csv"), start);
        assert_eq!(tracker.next_deadline(), Some(start + QUIET));
    }
}
