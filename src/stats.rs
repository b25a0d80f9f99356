use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Running mean and sample standard deviation of a stream of values.
#[derive(Debug, Default, Clone)]
pub struct Accumulator {
    n_vals: usize,
    mean: f64,
    sq_dev_sum: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccumulatorReport {
    pub n_vals: usize,
    pub mean: f64,
    pub std_dev: f64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value. NaN values are skipped.
    pub fn add(&mut self, val: f64) {
        if val.is_nan() {
            return;
        }
        self.n_vals += 1;

        let dev_before = val - self.mean;
        self.mean += dev_before / self.n_vals as f64;
        self.sq_dev_sum += dev_before * (val - self.mean);
    }

    /// Mean is NaN without values, standard deviation is NaN with fewer than two.
    pub fn report(&self) -> AccumulatorReport {
        AccumulatorReport {
            n_vals: self.n_vals,
            mean: if self.n_vals > 0 { self.mean } else { f64::NAN },
            std_dev: if self.n_vals > 1 {
                (self.sq_dev_sum / (self.n_vals - 1) as f64).sqrt()
            } else {
                f64::NAN
            },
        }
    }
}

/// One [`Accumulator`] per component of a vector-valued sample, kept
/// separately for every group key.
///
/// Used to summarise phage affinities split by the genotype of the host
/// they were released from.
#[derive(Debug, Clone)]
pub struct GroupedAccumulator<K> {
    n_dims: usize,
    groups: BTreeMap<K, Vec<Accumulator>>,
}

impl<K: Ord + Clone> GroupedAccumulator<K> {
    pub fn new(n_dims: usize) -> Self {
        Self {
            n_dims,
            groups: BTreeMap::new(),
        }
    }

    /// Add a sample to the group `key`. Components past `n_dims` are ignored.
    pub fn add(&mut self, key: K, vals: &[f64]) {
        let n_dims = self.n_dims;
        let accs = self
            .groups
            .entry(key)
            .or_insert_with(|| vec![Accumulator::new(); n_dims]);
        for (acc, &val) in accs.iter_mut().zip(vals) {
            acc.add(val);
        }
    }

    pub fn report(&self) -> BTreeMap<K, Vec<AccumulatorReport>> {
        self.groups
            .iter()
            .map(|(key, accs)| (key.clone(), accs.iter().map(Accumulator::report).collect()))
            .collect()
    }
}
