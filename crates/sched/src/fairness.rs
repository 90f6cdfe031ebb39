//! Rolling time-window statistics backing the weighted round-robin
//! admission across priority classes.
//!
//! Busy time is accumulated per priority into a ring of fixed-duration
//! windows; expired windows age out, so the budgets react to recent
//! behavior rather than the whole process lifetime. The first
//! scheduling pass only considers a class while it has not exceeded its
//! configured share of the time left over from higher classes; a second
//! unconditional pass guarantees forward progress regardless.

use std::time::{Duration, Instant};

use crate::types::Priority;

/// Per-priority busy time over the retained windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimeStat {
    /// Time spent at exactly each priority.
    pub at: [Duration; Priority::COUNT],
    /// Time spent at each priority and every higher one.
    pub cumulative: [Duration; Priority::COUNT],
}

impl TimeStat {
    /// `ratio[p] * cumulative[p] >= 100 * at[p]` — the class has not
    /// exceeded its budgeted share. Trivially true while idle.
    pub fn within_budget(&self, priority: Priority, ratios: &[u32; Priority::COUNT]) -> bool {
        let p = priority.index();
        u128::from(ratios[p]) * self.cumulative[p].as_nanos()
            >= 100 * self.at[p].as_nanos()
    }
}

pub(crate) struct FairnessAccountant {
    windows: Vec<[Duration; Priority::COUNT]>,
    current: usize,
    window_len: Duration,
    window_started: Instant,
}

impl FairnessAccountant {
    pub fn new(window_len: Duration, window_count: usize) -> Self {
        Self {
            windows: vec![[Duration::ZERO; Priority::COUNT]; window_count.max(1)],
            current: 0,
            window_len,
            window_started: Instant::now(),
        }
    }

    /// Rotate expired windows out of the ring.
    fn advance(&mut self, now: Instant) {
        let mut rotations = 0;
        while now.duration_since(self.window_started) >= self.window_len {
            rotations += 1;
            if rotations > self.windows.len() {
                // idle longer than the whole ring: drop everything
                self.windows.iter_mut().for_each(|w| *w = [Duration::ZERO; Priority::COUNT]);
                self.window_started = now;
                return;
            }
            self.current = (self.current + 1) % self.windows.len();
            self.windows[self.current] = [Duration::ZERO; Priority::COUNT];
            self.window_started += self.window_len;
        }
    }

    /// Account `elapsed` of entry-point execution at `priority`.
    pub fn add(&mut self, priority: Priority, elapsed: Duration, now: Instant) {
        self.advance(now);
        self.windows[self.current][priority.index()] += elapsed;
    }

    /// Sum the retained windows into per-priority and cumulative totals.
    pub fn snapshot(&mut self, now: Instant) -> TimeStat {
        self.advance(now);
        let mut at = [Duration::ZERO; Priority::COUNT];
        for window in &self.windows {
            for (p, &t) in window.iter().enumerate() {
                at[p] += t;
            }
        }
        let mut cumulative = [Duration::ZERO; Priority::COUNT];
        let mut running = Duration::ZERO;
        for p in 0..Priority::COUNT {
            running += at[p];
            cumulative[p] = running;
        }
        TimeStat { at, cumulative }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATIOS: [u32; 3] = [100, 75, 100];

    #[test]
    fn idle_accountant_passes_every_class() {
        let mut acc = FairnessAccountant::new(Duration::from_millis(125), 16);
        let stat = acc.snapshot(Instant::now());
        for p in Priority::ALL {
            assert!(stat.within_budget(p, &RATIOS));
        }
    }

    #[test]
    fn normal_class_blocked_beyond_its_share() {
        let mut acc = FairnessAccountant::new(Duration::from_secs(10), 4);
        let now = Instant::now();
        // High ran 100ms, Normal ran 400ms: Normal holds 80% of the
        // High+Normal total, above its 75% budget.
        acc.add(Priority::High, Duration::from_millis(100), now);
        acc.add(Priority::Normal, Duration::from_millis(400), now);
        let stat = acc.snapshot(now);
        assert!(stat.within_budget(Priority::High, &RATIOS));
        assert!(!stat.within_budget(Priority::Normal, &RATIOS));
        // Low has a 100% floor of everything left over
        assert!(stat.within_budget(Priority::Low, &RATIOS));
    }

    #[test]
    fn normal_class_allowed_within_its_share() {
        let mut acc = FairnessAccountant::new(Duration::from_secs(10), 4);
        let now = Instant::now();
        acc.add(Priority::High, Duration::from_millis(300), now);
        acc.add(Priority::Normal, Duration::from_millis(300), now);
        let stat = acc.snapshot(now);
        // Normal holds 50% of High+Normal, below the 75% budget.
        assert!(stat.within_budget(Priority::Normal, &RATIOS));
    }

    #[test]
    fn cumulative_includes_higher_classes_only() {
        let mut acc = FairnessAccountant::new(Duration::from_secs(10), 4);
        let now = Instant::now();
        acc.add(Priority::High, Duration::from_millis(10), now);
        acc.add(Priority::Low, Duration::from_millis(30), now);
        let stat = acc.snapshot(now);
        assert_eq!(stat.cumulative[Priority::High.index()], Duration::from_millis(10));
        assert_eq!(stat.cumulative[Priority::Normal.index()], Duration::from_millis(10));
        assert_eq!(stat.cumulative[Priority::Low.index()], Duration::from_millis(40));
    }

    #[test]
    fn old_windows_age_out() {
        let window = Duration::from_millis(50);
        let mut acc = FairnessAccountant::new(window, 4);
        let start = Instant::now();
        acc.add(Priority::Normal, Duration::from_millis(400), start);

        // after the whole ring has rotated, the stat is empty again
        let later = start + window * 8;
        let stat = acc.snapshot(later);
        assert_eq!(stat.at[Priority::Normal.index()], Duration::ZERO);
        assert!(stat.within_budget(Priority::Normal, &RATIOS));
    }
}
