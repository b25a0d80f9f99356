use crate::model::{Agent, AgentId, Bacterium, Breed, Phage, Scheduled};
use anyhow::{Result, bail};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Live agents, partitioned by breed and keyed by id.
///
/// Ordered maps keep iteration independent of hashing, so that a seeded
/// run always activates agents in the same order.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Schedule {
    phages: BTreeMap<AgentId, Phage>,
    bacteria: BTreeMap<AgentId, Bacterium>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an agent.
    ///
    /// # Errors
    /// Returns an error if an agent of the same breed already has its id.
    pub fn add(&mut self, agent: impl Into<Agent>) -> Result<()> {
        match agent.into() {
            Agent::Phage(phage) => {
                let id = phage.id();
                if self.phages.contains_key(&id) {
                    bail!("phage id {id} is already scheduled");
                }
                self.phages.insert(id, phage);
            }
            Agent::Bacterium(bacterium) => {
                let id = bacterium.id();
                if self.bacteria.contains_key(&id) {
                    bail!("bacterium id {id} is already scheduled");
                }
                self.bacteria.insert(id, bacterium);
            }
        }
        Ok(())
    }

    pub fn remove_phage(&mut self, id: AgentId) -> Option<Phage> {
        self.phages.remove(&id)
    }

    pub fn remove_bacterium(&mut self, id: AgentId) -> Option<Bacterium> {
        self.bacteria.remove(&id)
    }

    pub fn phage_mut(&mut self, id: AgentId) -> Option<&mut Phage> {
        self.phages.get_mut(&id)
    }

    pub fn bacterium_mut(&mut self, id: AgentId) -> Option<&mut Bacterium> {
        self.bacteria.get_mut(&id)
    }

    pub fn phages(&self) -> impl Iterator<Item = &Phage> {
        self.phages.values()
    }

    pub fn bacteria(&self) -> impl Iterator<Item = &Bacterium> {
        self.bacteria.values()
    }

    pub fn count(&self, breed: Breed) -> usize {
        match breed {
            Breed::Phage => self.phages.len(),
            Breed::Bacterium => self.bacteria.len(),
        }
    }

    pub fn filtered_count<F>(&self, breed: Breed, pred: F) -> usize
    where
        F: Fn(&dyn Scheduled) -> bool,
    {
        match breed {
            Breed::Phage => self.phages.values().filter(|&agent| pred(agent)).count(),
            Breed::Bacterium => self.bacteria.values().filter(|&agent| pred(agent)).count(),
        }
    }

    /// Ids of the live agents of `breed`, in random order.
    ///
    /// Activation iterates over this snapshot, so agents added or removed
    /// during a pass never disturb it.
    pub fn snapshot<R: Rng + ?Sized>(&self, breed: Breed, rng: &mut R) -> Vec<AgentId> {
        let mut ids: Vec<_> = match breed {
            Breed::Phage => live_ids(&self.phages),
            Breed::Bacterium => live_ids(&self.bacteria),
        };
        ids.shuffle(rng);
        ids
    }
}

fn live_ids<T: Scheduled>(agents: &BTreeMap<AgentId, T>) -> Vec<AgentId> {
    agents
        .values()
        .filter(|agent| !agent.is_dead())
        .map(|agent| agent.id())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolvable::{Mutator, TraitVector};
    use crate::model::FOUNDER_PARENT;
    use rand_chacha::ChaCha12Rng;

    fn phage(id: AgentId, methylation: Option<usize>) -> Phage {
        let mutator = Mutator::new(0.0, 0.0, None).unwrap();
        let affinity = TraitVector::new(vec![0.5, 0.5], &mutator);
        Phage::new(id, 0, methylation, 3, affinity, FOUNDER_PARENT, None).unwrap()
    }

    #[test]
    fn counts_by_breed_and_filter() {
        let mut schedule = Schedule::new();
        schedule.add(phage(1, Some(0))).unwrap();
        schedule.add(phage(2, Some(1))).unwrap();
        schedule.add(phage(3, None)).unwrap();
        schedule.add(Bacterium::new(4, 0, 0.5).unwrap()).unwrap();
        schedule.add(Bacterium::new(5, 1, 0.5).unwrap()).unwrap();

        assert_eq!(schedule.count(Breed::Phage), 3);
        assert_eq!(schedule.count(Breed::Bacterium), 2);
        assert_eq!(
            schedule.filtered_count(Breed::Phage, |agent| agent.methylation() == Some(1)),
            1
        );
        assert_eq!(
            schedule.filtered_count(Breed::Bacterium, |agent| agent.genotype() == 1),
            1
        );
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut schedule = Schedule::new();
        schedule.add(phage(1, Some(0))).unwrap();
        assert!(schedule.add(phage(1, Some(1))).is_err());
        assert!(schedule.add(Bacterium::new(1, 0, 0.5).unwrap()).is_ok());
    }

    #[test]
    fn snapshot_excludes_dead_agents() {
        let mut rng = ChaCha12Rng::seed_from_u64(21);
        let mut schedule = Schedule::new();
        for id in 1..=20 {
            schedule.add(phage(id, Some(0))).unwrap();
        }
        schedule.phage_mut(7).unwrap().mark_dead();
        let mut ids = schedule.snapshot(Breed::Phage, &mut rng);
        ids.sort();
        assert_eq!(ids, (1..=20).filter(|&id| id != 7).collect::<Vec<_>>());
    }

    #[test]
    fn removal_during_pass_leaves_snapshot_intact() {
        let mut rng = ChaCha12Rng::seed_from_u64(22);
        let mut schedule = Schedule::new();
        for id in 1..=5 {
            schedule.add(phage(id, Some(0))).unwrap();
        }
        let ids = schedule.snapshot(Breed::Phage, &mut rng);
        let mut visited = 0;
        for id in ids {
            if schedule.remove_phage(id).is_some() {
                visited += 1;
            }
            schedule.add(phage(100 + id, Some(0))).unwrap();
        }
        assert_eq!(visited, 5);
        assert_eq!(schedule.count(Breed::Phage), 5);
    }
}
