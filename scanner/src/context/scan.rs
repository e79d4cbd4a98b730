// Metrea LLC Intellectual Property
// Originally developed by Raw Socket Labs LLC

//! Ordered, cyclic iteration over scan targets.
//!
//! Two modes: the preferred frequency-manager mode pulls the ordered entry
//! list from the external store and refreshes it periodically; the legacy
//! mode steps the enabled frequency ranges by the configured interval.

use crate::ports::FrequencyManagerPort;
use crate::ScanError;
use shared::{FrequencyRange, ScanEntry, TuningProfile};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::Blacklist;

/// How long a pulled scan list stays valid before it is re-fetched.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Entries within this distance of the previous position keep their slot
/// across a refresh.
const RELOCATE_TOLERANCE_HZ: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn from_scan_up(up: bool) -> Self {
        if up {
            Direction::Up
        } else {
            Direction::Down
        }
    }

    pub fn flipped(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }

    pub fn is_up(self) -> bool {
        self == Direction::Up
    }
}

/// A selected scan target.
#[derive(Debug, Clone)]
pub struct ScanTarget {
    pub frequency: f64,
    pub profile: Option<Arc<TuningProfile>>,
    pub single: bool,
    /// Tuner gain to apply when this selection enters a new legacy range.
    pub gain_change: Option<f32>,
}

pub enum ScanTargets {
    Manager {
        entries: Vec<ScanEntry>,
        index: usize,
        last_refresh: Instant,
    },
    Legacy {
        ranges: Vec<FrequencyRange>,
        range_idx: usize,
        interval: f64,
        current: f64,
    },
}

impl ScanTargets {
    /// Build from the frequency manager's current scan list.
    pub fn manager(fm: &dyn FrequencyManagerPort) -> Result<Self, ScanError> {
        let entries = fm.scan_list();
        if entries.is_empty() {
            return Err(ScanError::EmptyScanList);
        }
        info!(entries = entries.len(), "loaded frequency manager scan list");
        Ok(Self::Manager {
            entries,
            index: 0,
            last_refresh: Instant::now(),
        })
    }

    /// Build a legacy band stepper. Disabled or inverted ranges are
    /// skipped; with no usable ranges the single `[start, stop]` range is
    /// used.
    pub fn legacy(
        ranges: &[FrequencyRange],
        start_freq: f64,
        stop_freq: f64,
        interval: f64,
    ) -> Result<Self, ScanError> {
        let mut usable: Vec<FrequencyRange> =
            ranges.iter().filter(|r| r.enabled && r.is_valid()).cloned().collect();
        if usable.is_empty() {
            if start_freq >= stop_freq {
                return Err(ScanError::EmptyScanList);
            }
            usable.push(FrequencyRange::new("default", start_freq, stop_freq));
        }
        let current = usable[0].start_freq;
        info!(ranges = usable.len(), start = current, "legacy band scanning");
        Ok(Self::Legacy {
            ranges: usable,
            range_idx: 0,
            interval,
            current,
        })
    }

    pub fn is_manager(&self) -> bool {
        matches!(self, Self::Manager { .. })
    }

    /// Select the starting target: the first non-blacklisted entry in
    /// manager mode, the first range start in legacy mode.
    pub fn initial(&mut self, blacklist: &Blacklist) -> Result<ScanTarget, ScanError> {
        match self {
            Self::Manager { entries, index, .. } => {
                let start = entries
                    .iter()
                    .position(|e| !blacklist.contains(e.frequency))
                    .ok_or(ScanError::AllBlacklisted)?;
                *index = start;
                let e = &entries[start];
                Ok(ScanTarget {
                    frequency: e.frequency,
                    profile: e.profile.clone(),
                    single: e.single,
                    gain_change: None,
                })
            }
            Self::Legacy { ranges, range_idx, current, .. } => {
                *range_idx = 0;
                *current = ranges[0].start_freq;
                Ok(ScanTarget {
                    frequency: *current,
                    profile: None,
                    single: false,
                    gain_change: Some(ranges[0].gain),
                })
            }
        }
    }

    /// Re-pull the manager scan list when the refresh interval has
    /// elapsed, keeping the position at the entry nearest the current
    /// frequency. Returns true when the list was replaced (cached profile
    /// references are then stale).
    pub fn maybe_refresh(
        &mut self,
        fm: Option<&dyn FrequencyManagerPort>,
        current_freq: f64,
    ) -> Result<bool, ScanError> {
        let Self::Manager { entries, index, last_refresh } = self else {
            return Ok(false);
        };
        let Some(fm) = fm else { return Ok(false) };
        if last_refresh.elapsed() < REFRESH_INTERVAL {
            return Ok(false);
        }
        *last_refresh = Instant::now();

        let fresh = fm.scan_list();
        if fresh.is_empty() {
            return Err(ScanError::EmptyScanList);
        }
        *index = fresh
            .iter()
            .position(|e| (e.frequency - current_freq).abs() < RELOCATE_TOLERANCE_HZ)
            .unwrap_or_else(|| (*index).min(fresh.len() - 1));
        debug!(entries = fresh.len(), index = *index, "refreshed scan list");
        *entries = fresh;
        Ok(true)
    }

    /// Step to the next target in `direction`.
    ///
    /// Manager mode skips blacklisted entries, bounded by one full pass;
    /// legacy mode steps by the interval and wraps across ranges, carrying
    /// the new range's gain.
    pub fn advance(
        &mut self,
        direction: Direction,
        blacklist: &Blacklist,
    ) -> Result<ScanTarget, ScanError> {
        match self {
            Self::Manager { entries, index, .. } => {
                let len = entries.len();
                for _ in 0..len {
                    *index = match direction {
                        Direction::Up => (*index + 1) % len,
                        Direction::Down => (*index + len - 1) % len,
                    };
                    let e = &entries[*index];
                    if blacklist.contains(e.frequency) {
                        debug!(freq = e.frequency, "skipping blacklisted entry");
                        continue;
                    }
                    return Ok(ScanTarget {
                        frequency: e.frequency,
                        profile: e.profile.clone(),
                        single: e.single,
                        gain_change: None,
                    });
                }
                Err(ScanError::AllBlacklisted)
            }
            Self::Legacy { ranges, range_idx, interval, current } => {
                let mut gain_change = None;
                match direction {
                    Direction::Up => {
                        *current += *interval;
                        if *current > ranges[*range_idx].stop_freq {
                            *range_idx = (*range_idx + 1) % ranges.len();
                            *current = ranges[*range_idx].start_freq;
                            gain_change = Some(ranges[*range_idx].gain);
                        }
                    }
                    Direction::Down => {
                        *current -= *interval;
                        if *current < ranges[*range_idx].start_freq {
                            *range_idx = (*range_idx + ranges.len() - 1) % ranges.len();
                            *current = ranges[*range_idx].stop_freq;
                            gain_change = Some(ranges[*range_idx].gain);
                        }
                    }
                }
                Ok(ScanTarget {
                    frequency: *current,
                    profile: None,
                    single: false,
                    gain_change,
                })
            }
        }
    }

    /// Bounds of the active legacy range, if any; used to limit the
    /// candidate sweep.
    pub fn active_bounds(&self) -> Option<(f64, f64)> {
        match self {
            Self::Manager { .. } => None,
            Self::Legacy { ranges, range_idx, .. } => {
                let r = &ranges[*range_idx];
                Some((r.start_freq, r.stop_freq))
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Manager { entries, .. } => entries.len(),
            Self::Legacy { ranges, .. } => ranges.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
