//! Per-step observations of the simulation.

use crate::config::Config;
use crate::model::{AgentId, Bacterium, Breed, Phage, Scheduled};
use crate::schedule::Schedule;
use serde::{Deserialize, Serialize};

/// Observation of a single agent at a given step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub step: usize,
    pub agent_id: AgentId,
    pub breed: Breed,
    pub genotype: usize,
    pub methylation: Option<usize>,
    /// Parent of a phage; none for bacteria.
    pub parent_id: Option<AgentId>,
    /// Genotype of the host a phage was released from.
    pub last_infected: Option<usize>,
    /// Affinity for genotype 0 of the phage, or of the infecting phage for bacteria.
    pub affinity_0: f64,
    /// Affinity for genotype 1 of the phage, or of the infecting phage for bacteria.
    pub affinity_1: f64,
    /// Steps left before inactivation; none for bacteria.
    pub inactivation: Option<i64>,
    /// Phage currently infecting a bacterium.
    pub infecting_phage_id: Option<AgentId>,
}

impl AgentRecord {
    fn from_phage(step: usize, phage: &Phage) -> Self {
        Self {
            step,
            agent_id: phage.id(),
            breed: Breed::Phage,
            genotype: phage.genotype(),
            methylation: phage.methylation(),
            parent_id: Some(phage.parent()),
            last_infected: phage.last_infected(),
            affinity_0: phage.affinity().get(0),
            affinity_1: phage.affinity().get(1),
            inactivation: Some(phage.inactivation()),
            infecting_phage_id: None,
        }
    }

    fn from_bacterium(step: usize, bacterium: &Bacterium) -> Self {
        let phage = bacterium.phage();
        Self {
            step,
            agent_id: bacterium.id(),
            breed: Breed::Bacterium,
            genotype: bacterium.genotype(),
            methylation: bacterium.methylation(),
            parent_id: None,
            last_infected: None,
            affinity_0: phage.map_or(f64::NAN, |phage| phage.affinity().get(0)),
            affinity_1: phage.map_or(f64::NAN, |phage| phage.affinity().get(1)),
            inactivation: None,
            infecting_phage_id: phage.map(|phage| phage.id()),
        }
    }
}

/// Events that happened during one step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepEvents {
    /// Phage removed by inactivation.
    pub inactivated: usize,
    /// Phage that adsorbed to an uninfected bacterium.
    pub attached: usize,
    /// Phage lost on an already infected bacterium.
    pub excluded: usize,
    /// Infections cleared by restriction.
    pub degraded: usize,
    /// Bacteria lysed.
    pub lysed: usize,
    /// Phage released by lysis.
    pub burst: usize,
    /// Bacteria recruited at the end of the step.
    pub recruited: usize,
}

/// Observation of the whole population at a given step.
///
/// Counts are taken at the start of the step; `events` describe the step itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub step: usize,
    pub phage: usize,
    pub bacteria: usize,
    pub phage_meth_0: usize,
    pub phage_meth_1: usize,
    pub phage_meth_none: usize,
    pub bacteria_meth_0: usize,
    pub bacteria_meth_1: usize,
    /// Mean phage affinity for genotype 0 (NaN without phage).
    pub avg_affinity_0: f64,
    /// Mean phage affinity for genotype 1 (NaN without phage).
    pub avg_affinity_1: f64,
    pub events: StepEvents,
}

impl ModelRecord {
    pub fn collect(step: usize, schedule: &Schedule) -> Self {
        let by_meth = |breed: Breed, meth: Option<usize>| {
            schedule.filtered_count(breed, |agent| agent.methylation() == meth)
        };
        Self {
            step,
            phage: schedule.count(Breed::Phage),
            bacteria: schedule.count(Breed::Bacterium),
            phage_meth_0: by_meth(Breed::Phage, Some(0)),
            phage_meth_1: by_meth(Breed::Phage, Some(1)),
            phage_meth_none: by_meth(Breed::Phage, None),
            bacteria_meth_0: by_meth(Breed::Bacterium, Some(0)),
            bacteria_meth_1: by_meth(Breed::Bacterium, Some(1)),
            avg_affinity_0: mean(schedule.phages().map(|phage| phage.affinity().get(0))),
            avg_affinity_1: mean(schedule.phages().map(|phage| phage.affinity().get(1))),
            events: StepEvents::default(),
        }
    }
}

fn mean<I: Iterator<Item = f64>>(vals: I) -> f64 {
    let (n_vals, sum) = vals.fold((0usize, 0.0), |(n, s), val| (n + 1, s + val));
    if n_vals == 0 {
        return f64::NAN;
    }
    sum / n_vals as f64
}

/// Everything observed at one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub model: ModelRecord,
    /// Agent records; empty when agent output is disabled.
    pub agents: Vec<AgentRecord>,
}

impl StepRecord {
    pub fn collect(step: usize, schedule: &Schedule, with_agents: bool) -> Self {
        let agents = if with_agents {
            schedule
                .phages()
                .map(|phage| AgentRecord::from_phage(step, phage))
                .chain(
                    schedule
                        .bacteria()
                        .map(|bacterium| AgentRecord::from_bacterium(step, bacterium)),
                )
                .collect()
        } else {
            Vec::new()
        };
        Self {
            model: ModelRecord::collect(step, schedule),
            agents,
        }
    }
}

/// All records of a run together with the parameters that produced them.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunRecords {
    pub cfg: Config,
    pub steps: Vec<StepRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolvable::{Mutator, TraitVector};
    use crate::model::FOUNDER_PARENT;

    fn phage(id: AgentId, methylation: Option<usize>, affinity: [f64; 2]) -> Phage {
        let mutator = Mutator::new(0.0, 0.0, None).unwrap();
        let affinity = TraitVector::new(affinity.to_vec(), &mutator);
        Phage::new(id, 1, methylation, 2, affinity, FOUNDER_PARENT, None).unwrap()
    }

    #[test]
    fn empty_population_reports_nan_affinity() {
        let record = ModelRecord::collect(0, &Schedule::new());
        assert_eq!(record.phage, 0);
        assert!(record.avg_affinity_0.is_nan());
        assert!(record.avg_affinity_1.is_nan());
    }

    #[test]
    fn counts_and_means() {
        let mut schedule = Schedule::new();
        schedule.add(phage(1, Some(0), [0.2, 0.8])).unwrap();
        schedule.add(phage(2, Some(1), [0.4, 0.6])).unwrap();
        schedule.add(phage(3, None, [0.6, 0.4])).unwrap();
        schedule.add(Bacterium::new(4, 1, 0.0).unwrap()).unwrap();

        let record = ModelRecord::collect(3, &schedule);
        assert_eq!(record.step, 3);
        assert_eq!((record.phage, record.bacteria), (3, 1));
        assert_eq!(
            (record.phage_meth_0, record.phage_meth_1, record.phage_meth_none),
            (1, 1, 1)
        );
        assert_eq!((record.bacteria_meth_0, record.bacteria_meth_1), (0, 1));
        assert!((record.avg_affinity_0 - 0.4).abs() < 1e-12);
        assert!((record.avg_affinity_1 - 0.6).abs() < 1e-12);
    }

    #[test]
    fn bacterium_rows_report_infecting_phage() {
        let mut schedule = Schedule::new();
        let mut bacterium = Bacterium::new(4, 0, 0.0).unwrap();
        bacterium.infect(phage(9, Some(0), [0.3, 0.7])).unwrap();
        schedule.add(bacterium).unwrap();
        schedule.add(Bacterium::new(5, 0, 0.0).unwrap()).unwrap();

        let record = StepRecord::collect(0, &schedule, true);
        assert_eq!(record.agents.len(), 2);
        let infected = &record.agents[0];
        assert_eq!(infected.infecting_phage_id, Some(9));
        assert_eq!(infected.affinity_0, 0.3);
        assert_eq!(infected.parent_id, None);
        let uninfected = &record.agents[1];
        assert_eq!(uninfected.infecting_phage_id, None);
        assert!(uninfected.affinity_0.is_nan());

        assert!(StepRecord::collect(0, &schedule, false).agents.is_empty());
    }
}
