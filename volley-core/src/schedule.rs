use std::time::Duration;

use super::config::Stage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSnapshot {
    pub index: usize,
    pub count: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

/// Piecewise-linear VU target curve.
///
/// Each stage ramps from the previous stage's target (or `start` for the first one) to its own
/// target. The value is recomputed from the elapsed time alone, in integer nanoseconds, so
/// there is no accumulated drift.
#[derive(Debug, Clone)]
pub struct StageSchedule {
    start: u64,
    stages: Vec<Stage>,
    cumulative_ends: Vec<Duration>,
}

impl StageSchedule {
    pub fn new(start: u64, stages: Vec<Stage>) -> Self {
        let mut cumulative_ends = Vec::with_capacity(stages.len());
        let mut acc = Duration::ZERO;
        for s in &stages {
            acc = acc.saturating_add(s.duration);
            cumulative_ends.push(acc);
        }

        Self {
            start,
            stages,
            cumulative_ends,
        }
    }

    /// Fixed mode: `vus` held flat for `duration`.
    pub fn constant(vus: u64, duration: Duration) -> Self {
        Self::new(
            vus,
            vec![Stage {
                duration,
                target: vus,
            }],
        )
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.cumulative_ends
            .last()
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_done(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    /// Highest target anywhere on the curve.
    pub fn peak(&self) -> u64 {
        self.stages
            .iter()
            .map(|s| s.target)
            .fold(self.start, u64::max)
    }

    /// Index of the stage running at `elapsed`, skipping zero-length stages. `None` once the
    /// schedule is over.
    fn stage_index(&self, elapsed: Duration) -> Option<usize> {
        let idx = self.cumulative_ends.partition_point(|end| *end <= elapsed);
        (idx < self.stages.len()).then_some(idx)
    }

    fn stage_bounds(&self, idx: usize) -> (Duration, Duration, u64, u64) {
        let stage_start = match idx {
            0 => Duration::ZERO,
            i => self.cumulative_ends[i - 1],
        };
        let start_target = match idx {
            0 => self.start,
            i => self.stages[i - 1].target,
        };
        (
            stage_start,
            self.cumulative_ends[idx],
            start_target,
            self.stages[idx].target,
        )
    }

    /// Target concurrency at `elapsed`, or `None` after the last stage has ended.
    ///
    /// `target_prev + (target_next - target_prev) * (t - stage_start) / stage_duration`,
    /// rounded half away from zero and clamped to the stage endpoints.
    pub fn target_at(&self, elapsed: Duration) -> Option<u64> {
        let idx = self.stage_index(elapsed)?;
        let (stage_start, stage_end, start_target, end_target) = self.stage_bounds(idx);

        let num_t = elapsed.saturating_sub(stage_start).as_nanos() as i128;
        let den = stage_end.saturating_sub(stage_start).as_nanos() as i128;

        let start_i = start_target as i128;
        let delta = end_target as i128 - start_i;
        let step = div_round(delta.saturating_mul(num_t), den.max(1));

        let lo = start_target.min(end_target) as i128;
        let hi = start_target.max(end_target) as i128;
        Some((start_i + step).clamp(lo, hi) as u64)
    }

    pub fn stage_snapshot_at(&self, elapsed: Duration) -> Option<StageSnapshot> {
        let idx = self.stage_index(elapsed)?;
        let (stage_start, stage_end, start_target, end_target) = self.stage_bounds(idx);
        let stage_elapsed = elapsed.saturating_sub(stage_start);

        Some(StageSnapshot {
            index: idx,
            count: self.stages.len(),
            stage_elapsed,
            stage_remaining: stage_end.saturating_sub(stage_start).saturating_sub(stage_elapsed),
            start_target,
            end_target,
            current_target: self.target_at(elapsed)?,
        })
    }
}

fn div_round(num: i128, den: i128) -> i128 {
    let half = den / 2;
    if num >= 0 {
        (num + half) / den
    } else {
        -((-num + half) / den)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn stage(s: u64, target: u64) -> Stage {
        Stage {
            duration: secs(s),
            target,
        }
    }

    #[test]
    fn ramp_from_zero_hits_midpoint() {
        let sched = StageSchedule::new(0, vec![stage(10, 10)]);
        assert_eq!(sched.target_at(Duration::ZERO), Some(0));
        assert_eq!(sched.target_at(secs(5)), Some(5));
        assert_eq!(sched.target_at(Duration::from_millis(9_999)), Some(10));
        assert_eq!(sched.target_at(secs(10)), None);
        assert!(sched.is_done(secs(10)));
    }

    #[test]
    fn boundaries_equal_endpoint_targets() {
        let sched = StageSchedule::new(0, vec![stage(60, 100), stage(120, 100), stage(60, 500)]);
        assert_eq!(sched.target_at(secs(60)), Some(100));
        assert_eq!(sched.target_at(secs(180)), Some(100));
        assert_eq!(sched.target_at(secs(90)), Some(100));
        assert_eq!(sched.target_at(secs(210)), Some(300));
        assert_eq!(sched.total_duration(), secs(240));
        assert_eq!(sched.peak(), 500);
    }

    #[test]
    fn target_is_monotonic_within_each_stage() {
        let sched = StageSchedule::new(3, vec![stage(7, 50), stage(11, 2), stage(5, 2)]);
        let mut prev: Option<(usize, u64)> = None;
        let mut t = Duration::ZERO;
        while let Some(cur) = sched.target_at(t) {
            let snap = sched
                .stage_snapshot_at(t)
                .unwrap_or_else(|| panic!("snapshot at {t:?}"));
            let lo = snap.start_target.min(snap.end_target);
            let hi = snap.start_target.max(snap.end_target);
            assert!((lo..=hi).contains(&cur), "t={t:?} cur={cur}");

            if let Some((idx, p)) = prev
                && idx == snap.index
            {
                if snap.end_target >= snap.start_target {
                    assert!(cur >= p, "t={t:?}");
                } else {
                    assert!(cur <= p, "t={t:?}");
                }
            }
            prev = Some((snap.index, cur));
            t += Duration::from_millis(37);
        }
    }

    #[test]
    fn rounds_half_away_from_zero() {
        let up = StageSchedule::new(0, vec![stage(10, 3)]);
        assert_eq!(up.target_at(secs(5)), Some(2));

        let down = StageSchedule::new(3, vec![stage(10, 0)]);
        assert_eq!(down.target_at(secs(5)), Some(1));
    }

    #[test]
    fn zero_length_stage_jumps_to_its_target() {
        let sched = StageSchedule::new(0, vec![stage(0, 20), stage(10, 20)]);
        assert_eq!(sched.target_at(Duration::ZERO), Some(20));
        assert_eq!(sched.target_at(secs(4)), Some(20));
    }

    #[test]
    fn constant_schedule_is_flat() {
        let sched = StageSchedule::constant(4, secs(2));
        assert_eq!(sched.target_at(Duration::ZERO), Some(4));
        assert_eq!(sched.target_at(Duration::from_millis(1_999)), Some(4));
        assert_eq!(sched.target_at(secs(2)), None);
    }

    #[test]
    fn stage_snapshot_reports_position() {
        let sched = StageSchedule::new(0, vec![stage(10, 10), stage(10, 0)]);
        let snap = sched
            .stage_snapshot_at(secs(12))
            .unwrap_or_else(|| panic!("snapshot"));
        assert_eq!(snap.index, 1);
        assert_eq!(snap.count, 2);
        assert_eq!(snap.stage_elapsed, secs(2));
        assert_eq!(snap.stage_remaining, secs(8));
        assert_eq!(snap.start_target, 10);
        assert_eq!(snap.end_target, 0);
        assert_eq!(snap.current_target, 8);
        assert!(sched.stage_snapshot_at(secs(20)).is_none());
    }
}
