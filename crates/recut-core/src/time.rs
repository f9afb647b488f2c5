// crates/recut-core/src/time.rs
//
// The effective⇄source time model. The output ("effective") timeline is the
// source timeline with trim intervals excised; every timestamp in this module
// is an integer microsecond count.
//
// The mapping runs effective→source (not the other way around) so the export
// loop can iterate output frames as a dense 0..total_frames sequence and ask
// "which source instant does frame i show?" — trims never produce gaps on the
// output side.

use serde::{Deserialize, Serialize};

use crate::error::ExportError;
use crate::spec::FrameRate;

// ── Intervals ─────────────────────────────────────────────────────────────────

/// Half-open interval `[start_us, end_us)` of source time removed from the
/// output. Invariant: `start_us < end_us`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start_us: u64,
    pub end_us:   u64,
}

impl TimeInterval {
    pub fn new(start_us: u64, end_us: u64) -> Self {
        Self { start_us, end_us }
    }

    pub fn len_us(&self) -> u64 {
        self.end_us.saturating_sub(self.start_us)
    }

    /// Half-open containment: `end_us` itself is outside the interval.
    pub fn contains(&self, t_us: u64) -> bool {
        t_us >= self.start_us && t_us < self.end_us
    }

    pub fn is_valid(&self) -> bool {
        self.start_us < self.end_us
    }
}

// ── Trim set ──────────────────────────────────────────────────────────────────

/// Ordered set of trim intervals as authored. May contain overlapping or
/// abutting entries in any order; `normalized()` produces the canonical form
/// the `TimeMap` scans.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimSet {
    pub intervals: Vec<TimeInterval>,
}

impl TrimSet {
    pub fn new(intervals: Vec<TimeInterval>) -> Self {
        Self { intervals }
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Sum of trimmed source time, computed on the normalized form so
    /// overlapping authored intervals are not double-counted.
    pub fn trimmed_us(&self) -> u64 {
        self.normalized().iter().map(TimeInterval::len_us).sum()
    }

    /// Sorted by `start_us`, with overlapping or abutting (within 1 µs)
    /// intervals merged. The result is pairwise disjoint.
    pub fn normalized(&self) -> Vec<TimeInterval> {
        let mut sorted: Vec<TimeInterval> =
            self.intervals.iter().copied().filter(TimeInterval::is_valid).collect();
        sorted.sort_by_key(|iv| iv.start_us);

        let mut merged: Vec<TimeInterval> = Vec::with_capacity(sorted.len());
        for iv in sorted {
            match merged.last_mut() {
                // `+ 1`: intervals separated by less than a microsecond count
                // as abutting and collapse into one.
                Some(last) if iv.start_us <= last.end_us.saturating_add(1) => {
                    last.end_us = last.end_us.max(iv.end_us);
                }
                _ => merged.push(iv),
            }
        }
        merged
    }
}

// ── TimeMap ───────────────────────────────────────────────────────────────────

/// Bijection between output time and source time for a given trim set.
pub struct TimeMap {
    rate:      FrameRate,
    period_us: u64,
    trims:     Vec<TimeInterval>,
}

impl TimeMap {
    pub fn new(rate: FrameRate, trims: &TrimSet) -> Self {
        Self {
            rate,
            period_us: rate.period_us(),
            trims:     trims.normalized(),
        }
    }

    /// One output frame period in integer microseconds.
    pub fn period_us(&self) -> u64 {
        self.period_us
    }

    pub fn trims(&self) -> &[TimeInterval] {
        &self.trims
    }

    /// Output timeline length: source duration minus total trimmed time.
    /// Trims longer than the source are a spec error, not a clamp.
    pub fn effective_duration_us(&self, source_duration_us: u64) -> Result<u64, ExportError> {
        let trimmed: u64 = self.trims.iter().map(TimeInterval::len_us).sum();
        if trimmed > source_duration_us {
            return Err(ExportError::InvalidSpec(format!(
                "trims remove {trimmed} µs from a {source_duration_us} µs source"
            )));
        }
        Ok(source_duration_us - trimmed)
    }

    /// Number of output frames: `ceil(effective_duration · fps)`, computed on
    /// the exact rational rate so a 3 s source at 30 fps yields 90 frames,
    /// not 91 from the rounded integer period.
    pub fn total_frames(&self, source_duration_us: u64) -> Result<u64, ExportError> {
        let eff = self.effective_duration_us(source_duration_us)? as u128;
        let num = self.rate.num as u128;
        let den = self.rate.den as u128 * 1_000_000;
        Ok(((eff * num + den - 1) / den) as u64)
    }

    /// Map an output timestamp to the source instant it shows.
    ///
    /// Scans normalized trims in ascending order; every trim that starts at or
    /// before the running candidate shifts it forward by the trim's length.
    /// Because trims are disjoint and sorted, a single pass is exact.
    pub fn source_time_of(&self, effective_ts_us: u64) -> u64 {
        let mut candidate = effective_ts_us;
        for trim in &self.trims {
            if trim.start_us <= candidate {
                candidate += trim.len_us();
            }
        }
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(fps: u32, trims: &[(u64, u64)]) -> TimeMap {
        let set = TrimSet::new(trims.iter().map(|&(s, e)| TimeInterval::new(s, e)).collect());
        TimeMap::new(FrameRate::fps(fps), &set)
    }

    #[test]
    fn identity_without_trims() {
        let m = map(30, &[]);
        assert_eq!(m.source_time_of(0), 0);
        assert_eq!(m.source_time_of(2_966_637), 2_966_637);
        assert_eq!(m.total_frames(3_000_000).unwrap(), 90);
    }

    #[test]
    fn single_interior_trim() {
        // 10 s source, [3.0 s, 5.0 s) removed, 25 fps.
        let m = map(25, &[(3_000_000, 5_000_000)]);
        assert_eq!(m.effective_duration_us(10_000_000).unwrap(), 8_000_000);
        assert_eq!(m.total_frames(10_000_000).unwrap(), 200);
        assert_eq!(m.source_time_of(2_960_000), 2_960_000);
        assert_eq!(m.source_time_of(3_000_000), 5_000_000);
        assert_eq!(m.source_time_of(7_999_999), 9_999_999);
    }

    #[test]
    fn abutting_trims_merge() {
        let m = map(30, &[(0, 1_000_000), (1_000_000, 2_000_000)]);
        assert_eq!(m.trims(), &[TimeInterval::new(0, 2_000_000)]);
        assert_eq!(m.source_time_of(0), 2_000_000);
    }

    #[test]
    fn overlapping_trims_merge_and_count_once() {
        let set = TrimSet::new(vec![
            TimeInterval::new(2_000_000, 6_000_000),
            TimeInterval::new(4_000_000, 8_000_000),
        ]);
        assert_eq!(set.normalized(), vec![TimeInterval::new(2_000_000, 8_000_000)]);
        assert_eq!(set.trimmed_us(), 6_000_000);
    }

    #[test]
    fn unsorted_input_normalizes() {
        let m = map(30, &[(5_000_000, 6_000_000), (1_000_000, 2_000_000)]);
        assert_eq!(
            m.trims(),
            &[
                TimeInterval::new(1_000_000, 2_000_000),
                TimeInterval::new(5_000_000, 6_000_000),
            ]
        );
    }

    #[test]
    fn monotonic_non_decreasing() {
        let m = map(30, &[(1_000_000, 2_000_000), (4_000_000, 4_500_000)]);
        let mut prev = 0;
        for eff in (0..8_000_000).step_by(10_007) {
            let src = m.source_time_of(eff);
            assert!(src >= prev, "source_time_of regressed at eff={eff}");
            prev = src;
        }
    }

    #[test]
    fn frame_instants_never_land_inside_a_trim() {
        let m = map(30, &[(500_000, 1_200_000), (2_000_000, 2_000_001), (3_333_333, 4_000_000)]);
        let period = m.period_us();
        for k in 0..200u64 {
            let src = m.source_time_of(k * period);
            for trim in m.trims() {
                assert!(
                    !trim.contains(src),
                    "frame {k} mapped to {src} inside [{}, {})",
                    trim.start_us,
                    trim.end_us
                );
            }
        }
    }

    #[test]
    fn projection_round_trip_is_identity() {
        // Project source→effective outside trims, then map back.
        let m = map(30, &[(1_000_000, 2_000_000), (3_000_000, 3_500_000)]);
        for src in [0, 999_999, 2_000_000, 2_750_000, 3_500_000, 9_000_000] {
            let removed: u64 = m
                .trims()
                .iter()
                .filter(|t| t.end_us <= src)
                .map(TimeInterval::len_us)
                .sum();
            let eff = src - removed;
            assert_eq!(m.source_time_of(eff), src, "round trip broke at src={src}");
        }
    }

    #[test]
    fn trims_longer_than_source_are_an_error() {
        let m = map(30, &[(0, 5_000_000)]);
        assert!(matches!(
            m.effective_duration_us(3_000_000),
            Err(ExportError::InvalidSpec(_))
        ));
    }

    #[test]
    fn zero_length_effective_yields_zero_frames() {
        let m = map(30, &[(0, 3_000_000)]);
        assert_eq!(m.total_frames(3_000_000).unwrap(), 0);
    }

    #[test]
    fn fractional_rates_round_frame_count_up() {
        let m = TimeMap::new(FrameRate::new(30_000, 1_001), &TrimSet::default());
        // 1 s at 29.97 fps → 30 frames.
        assert_eq!(m.total_frames(1_000_000).unwrap(), 30);
    }
}
