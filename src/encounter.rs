//! One-dimensional periodic index of bacterial positions.

use crate::model::AgentId;
use rand::prelude::*;

#[derive(Debug, Clone, Copy)]
struct Interval {
    lo: f64,
    hi: f64,
    id: AgentId,
    gen_idx: usize,
}

/// A bacterium found inside an encounter window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    pub id: AgentId,
    pub gen_idx: usize,
}

/// Interval index over the circle `[0, 1)`.
///
/// Each bacterium occupies an interval of width `agent_width` centered at
/// its position. Intervals crossing 0 or 1 are stored together with their
/// wrapped image, so range queries on `[0, 1]` see them on both sides.
#[derive(Debug, Default)]
pub struct EncounterIndex {
    agent_width: f64,
    intervals: Vec<Interval>,
}

impl EncounterIndex {
    pub fn new(agent_width: f64) -> Self {
        Self {
            agent_width,
            intervals: Vec::new(),
        }
    }

    /// Place every agent at a fresh uniform position and rebuild the index.
    pub fn rebuild<I, R>(&mut self, agents: I, rng: &mut R)
    where
        I: IntoIterator<Item = (AgentId, usize)>,
        R: Rng + ?Sized,
    {
        self.intervals.clear();
        for (id, gen_idx) in agents {
            let pos = rng.random::<f64>();
            self.push(id, gen_idx, pos);
        }
        self.sort();
    }

    /// Insert a single agent at a known position.
    #[cfg(test)]
    pub fn insert(&mut self, id: AgentId, gen_idx: usize, pos: f64) {
        self.push(id, gen_idx, pos);
        self.sort();
    }

    /// All agents whose interval meets the circular window `[pos - radius, pos + radius]`.
    ///
    /// Hits are unique and ordered by id.
    pub fn encounter(&self, pos: f64, radius: f64) -> Vec<Hit> {
        let mut hits = Vec::new();
        let lo = pos - radius;
        let hi = pos + radius;
        if 2.0 * radius >= 1.0 {
            self.query(0.0, 1.0, &mut hits);
        } else if lo < 0.0 {
            self.query(0.0, hi, &mut hits);
            self.query(1.0 + lo, 1.0, &mut hits);
        } else if hi > 1.0 {
            self.query(0.0, hi - 1.0, &mut hits);
            self.query(lo, 1.0, &mut hits);
        } else {
            self.query(lo, hi, &mut hits);
        }
        hits.sort_by_key(|hit| hit.id);
        hits.dedup_by_key(|hit| hit.id);
        hits
    }

    fn push(&mut self, id: AgentId, gen_idx: usize, pos: f64) {
        let half = self.agent_width / 2.0;
        let interval = Interval {
            lo: pos - half,
            hi: pos + half,
            id,
            gen_idx,
        };
        self.intervals.push(interval);
        if interval.lo < 0.0 {
            self.intervals.push(shifted(interval, 1.0));
        }
        if interval.hi > 1.0 {
            self.intervals.push(shifted(interval, -1.0));
        }
    }

    fn sort(&mut self) {
        self.intervals.sort_by(|a, b| a.lo.total_cmp(&b.lo).then(a.id.cmp(&b.id)));
    }

    fn query(&self, lo: f64, hi: f64, hits: &mut Vec<Hit>) {
        // Every interval has the same width, so only those starting in
        // `[lo - agent_width, hi]` can intersect the range.
        let start = self
            .intervals
            .partition_point(|interval| interval.lo < lo - self.agent_width);
        hits.extend(
            self.intervals[start..]
                .iter()
                .take_while(|interval| interval.lo <= hi)
                .filter(|interval| interval.hi >= lo)
                .map(|interval| Hit {
                    id: interval.id,
                    gen_idx: interval.gen_idx,
                }),
        );
    }
}

fn shifted(interval: Interval, offset: f64) -> Interval {
    Interval {
        lo: interval.lo + offset,
        hi: interval.hi + offset,
        ..interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha12Rng;

    fn ids(hits: &[Hit]) -> Vec<AgentId> {
        hits.iter().map(|hit| hit.id).collect()
    }

    #[test]
    fn finds_agents_inside_window() {
        let mut index = EncounterIndex::new(0.0001);
        index.insert(1, 0, 0.30);
        index.insert(2, 1, 0.50);
        index.insert(3, 0, 0.505);
        index.insert(4, 1, 0.70);
        assert_eq!(ids(&index.encounter(0.5, 0.01)), vec![2, 3]);
        assert_eq!(index.encounter(0.5, 0.01)[1].gen_idx, 0);
        assert!(index.encounter(0.1, 0.01).is_empty());
    }

    #[test]
    fn window_crossing_zero_wraps() {
        let eps = 0.001;
        let mut index = EncounterIndex::new(0.0001);
        index.insert(1, 0, 1.0 - eps);
        index.insert(2, 0, 0.5);
        assert_eq!(ids(&index.encounter(eps, 4.0 * eps)), vec![1]);
    }

    #[test]
    fn window_crossing_one_wraps() {
        let eps = 0.001;
        let mut index = EncounterIndex::new(0.0001);
        index.insert(1, 1, eps);
        index.insert(2, 1, 0.5);
        assert_eq!(ids(&index.encounter(1.0 - eps, 4.0 * eps)), vec![1]);
    }

    #[test]
    fn interval_straddling_boundary_is_found_from_both_sides() {
        let mut index = EncounterIndex::new(0.01);
        index.insert(7, 0, 0.999);
        assert_eq!(ids(&index.encounter(0.002, 0.001)), vec![7]);
        assert_eq!(ids(&index.encounter(0.995, 0.001)), vec![7]);
    }

    #[test]
    fn wide_window_returns_everything_once() {
        let mut rng = ChaCha12Rng::seed_from_u64(11);
        let mut index = EncounterIndex::new(0.0001);
        index.rebuild((1..=50).map(|id| (id, 0)), &mut rng);
        let hits = index.encounter(0.3, 0.5);
        assert_eq!(ids(&hits), (1..=50).collect::<Vec<_>>());
    }

    #[test]
    fn rebuild_replaces_previous_positions() {
        let mut rng = ChaCha12Rng::seed_from_u64(5);
        let mut index = EncounterIndex::new(0.0);
        index.rebuild((1..=10).map(|id| (id, 1)), &mut rng);
        index.rebuild((1..=3).map(|id| (id, 1)), &mut rng);
        assert_eq!(ids(&index.encounter(0.0, 0.5)), vec![1, 2, 3]);
    }
}
