use crate::config::{Config, N_GEN};
use crate::model::{AgentId, Breed, SPIKE_IN_PARENT};
use crate::record::StepRecord;
use crate::stats::{Accumulator, AccumulatorReport, GroupedAccumulator};
use anyhow::{Context, Result};
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Summary of one observable.
#[derive(Debug, Serialize, Deserialize)]
pub enum Report {
    Accumulated(Vec<AccumulatorReport>),
    /// Per-component summaries keyed by the genotype of the last host.
    ByHost(BTreeMap<Option<usize>, Vec<AccumulatorReport>>),
}

/// An observable computed from step records.
pub trait Obs {
    fn name(&self) -> &'static str;
    fn update(&mut self, record: &StepRecord);
    fn report(&self) -> Report;
}

/// Number of phage or of bacteria per step.
pub struct PopSize {
    name: &'static str,
    count: fn(&StepRecord) -> usize,
    acc: Accumulator,
}

impl PopSize {
    pub fn phage() -> Self {
        Self {
            name: "n_phage",
            count: |record| record.model.phage,
            acc: Accumulator::new(),
        }
    }

    pub fn bacteria() -> Self {
        Self {
            name: "n_bacteria",
            count: |record| record.model.bacteria,
            acc: Accumulator::new(),
        }
    }
}

impl Obs for PopSize {
    fn name(&self) -> &'static str {
        self.name
    }

    fn update(&mut self, record: &StepRecord) {
        self.acc.add((self.count)(record) as f64);
    }

    fn report(&self) -> Report {
        Report::Accumulated(vec![self.acc.report()])
    }
}

/// Mean phage affinity for each bacterial genotype.
pub struct AvgAffinity {
    acc_vec: Vec<Accumulator>,
}

impl AvgAffinity {
    pub fn new() -> Self {
        let mut acc_vec = Vec::new();
        acc_vec.resize_with(N_GEN, Accumulator::new);
        Self { acc_vec }
    }
}

impl Obs for AvgAffinity {
    fn name(&self) -> &'static str {
        "avg_affinity"
    }

    fn update(&mut self, record: &StepRecord) {
        // Steps without phage have no affinity.
        if record.model.phage == 0 {
            return;
        }
        self.acc_vec[0].add(record.model.avg_affinity_0);
        self.acc_vec[1].add(record.model.avg_affinity_1);
    }

    fn report(&self) -> Report {
        Report::Accumulated(self.acc_vec.iter().map(|acc| acc.report()).collect())
    }
}

/// Phage affinities split by the genotype of the host each phage was
/// released from. Founders and spike-in phage have no host.
///
/// Needs per-agent records.
pub struct AffinityByHost {
    grouped: GroupedAccumulator<Option<usize>>,
}

impl AffinityByHost {
    pub fn new() -> Self {
        Self {
            grouped: GroupedAccumulator::new(N_GEN),
        }
    }
}

impl Obs for AffinityByHost {
    fn name(&self) -> &'static str {
        "affinity_by_host"
    }

    fn update(&mut self, record: &StepRecord) {
        for agent in record.agents.iter().filter(|agent| agent.breed == Breed::Phage) {
            self.grouped
                .add(agent.last_infected, &[agent.affinity_0, agent.affinity_1]);
        }
    }

    fn report(&self) -> Report {
        Report::ByHost(self.grouped.report())
    }
}

/// Live descendants of the spike-in phage per step, in total and among
/// those released from a genotype 0 host.
///
/// Needs per-agent records. Steps without them are skipped.
pub struct SpikeInLineage {
    lineage: BTreeSet<AgentId>,
    descendants: Accumulator,
    descendants_in_0: Accumulator,
}

impl SpikeInLineage {
    pub fn new() -> Self {
        Self {
            lineage: BTreeSet::new(),
            descendants: Accumulator::new(),
            descendants_in_0: Accumulator::new(),
        }
    }
}

impl Obs for SpikeInLineage {
    fn name(&self) -> &'static str {
        "spike_in_lineage"
    }

    fn update(&mut self, record: &StepRecord) {
        if record.agents.is_empty() {
            return;
        }
        let mut n_desc = 0;
        let mut n_desc_in_0 = 0;
        for agent in record.agents.iter().filter(|agent| agent.breed == Breed::Phage) {
            let Some(parent_id) = agent.parent_id else {
                continue;
            };
            if parent_id == SPIKE_IN_PARENT || self.lineage.contains(&parent_id) {
                self.lineage.insert(agent.agent_id);
            }
            if self.lineage.contains(&agent.agent_id) {
                n_desc += 1;
                if agent.last_infected == Some(0) {
                    n_desc_in_0 += 1;
                }
            }
        }
        self.descendants.add(n_desc as f64);
        self.descendants_in_0.add(n_desc_in_0 as f64);
    }

    fn report(&self) -> Report {
        Report::Accumulated(vec![
            self.descendants.report(),
            self.descendants_in_0.report(),
        ])
    }
}

/// Fraction of phage with methylation 0, 1 and none.
pub struct PhageMethylation {
    acc_vec: Vec<Accumulator>,
}

impl PhageMethylation {
    pub fn new() -> Self {
        let mut acc_vec = Vec::new();
        acc_vec.resize_with(N_GEN + 1, Accumulator::new);
        Self { acc_vec }
    }
}

impl Obs for PhageMethylation {
    fn name(&self) -> &'static str {
        "phage_methylation"
    }

    fn update(&mut self, record: &StepRecord) {
        let model = &record.model;
        if model.phage == 0 {
            return;
        }
        let n_phage = model.phage as f64;
        let counts = [model.phage_meth_0, model.phage_meth_1, model.phage_meth_none];
        for (acc, count) in self.acc_vec.iter_mut().zip(counts) {
            acc.add(count as f64 / n_phage);
        }
    }

    fn report(&self) -> Report {
        Report::Accumulated(self.acc_vec.iter().map(|acc| acc.report()).collect())
    }
}

/// Lysis and restriction events per step.
pub struct EventRates {
    lysed: Accumulator,
    degraded: Accumulator,
    excluded: Accumulator,
}

impl EventRates {
    pub fn new() -> Self {
        Self {
            lysed: Accumulator::new(),
            degraded: Accumulator::new(),
            excluded: Accumulator::new(),
        }
    }
}

impl Obs for EventRates {
    fn name(&self) -> &'static str {
        "event_rates"
    }

    fn update(&mut self, record: &StepRecord) {
        let events = &record.model.events;
        self.lysed.add(events.lysed as f64);
        self.degraded.add(events.degraded as f64);
        self.excluded.add(events.excluded as f64);
    }

    fn report(&self) -> Report {
        Report::Accumulated(vec![
            self.lysed.report(),
            self.degraded.report(),
            self.excluded.report(),
        ])
    }
}

pub struct Analyzer {
    cfg: Config,
    obs_ptr_vec: Vec<Box<dyn Obs>>,
}

impl Analyzer {
    pub fn new(cfg: Config) -> Self {
        let obs_ptr_vec: Vec<Box<dyn Obs>> = vec![
            Box::new(PopSize::phage()),
            Box::new(PopSize::bacteria()),
            Box::new(AvgAffinity::new()),
            Box::new(AffinityByHost::new()),
            Box::new(SpikeInLineage::new()),
            Box::new(PhageMethylation::new()),
            Box::new(EventRates::new()),
        ];
        Self { cfg, obs_ptr_vec }
    }

    pub fn update(&mut self, record: &StepRecord) {
        for obs in &mut self.obs_ptr_vec {
            obs.update(record);
        }
    }

    pub fn add_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);

        for _ in 0..self.cfg.output.steps_per_file {
            let record: StepRecord =
                decode::from_read(&mut reader).context("failed to read record")?;
            self.update(&record);
        }
        Ok(())
    }

    pub fn reports(&self) -> BTreeMap<&'static str, Report> {
        self.obs_ptr_vec
            .iter()
            .map(|obs| (obs.name(), obs.report()))
            .collect()
    }

    pub fn save_results<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);

        encode::write_named(&mut writer, &self.reports()).context("failed to serialize results")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }
}
