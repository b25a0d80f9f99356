//! Agents of the simulation and their per-step behavior.

use crate::config::Inheritance;
use crate::encounter::EncounterIndex;
use crate::evolvable::{Mutator, TraitVector};
use crate::schedule::Schedule;
use anyhow::{Result, bail};
use rand::prelude::*;
use serde::{Deserialize, Serialize};

/// Unique agent identifier; 0 is never a valid id.
pub type AgentId = i64;

/// Parent id of founder phage.
pub const FOUNDER_PARENT: AgentId = 0;
/// Parent id shared by spiked-in phage.
pub const SPIKE_IN_PARENT: AgentId = -1;

/// Kind of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Breed {
    Phage,
    Bacterium,
}

/// Capabilities shared by every scheduled agent.
pub trait Scheduled {
    fn id(&self) -> AgentId;
    fn genotype(&self) -> usize;
    fn methylation(&self) -> Option<usize>;
    fn is_dead(&self) -> bool;
}

/// A free phage particle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phage {
    id: AgentId,
    genotype: usize,
    methylation: Option<usize>,
    affinity: TraitVector,
    inactivation: i64,
    parent: AgentId,
    last_infected: Option<usize>,
    dead: bool,
}

/// Outcome of a phage activation.
#[derive(Debug, PartialEq)]
pub enum PhageAction {
    /// The phage is inactivated and leaves the schedule.
    Expire,
    /// Nothing happened.
    Idle,
    /// The phage adsorbed to this bacterium.
    Land(AgentId),
}

impl Phage {
    pub fn new(
        id: AgentId,
        genotype: usize,
        methylation: Option<usize>,
        inactivation: i64,
        affinity: TraitVector,
        parent: AgentId,
        last_infected: Option<usize>,
    ) -> Result<Self> {
        if id == 0 {
            bail!("phage id must be nonzero");
        }
        Ok(Self {
            id,
            genotype,
            methylation,
            affinity,
            inactivation,
            parent,
            last_infected,
            dead: false,
        })
    }

    pub fn affinity(&self) -> &TraitVector {
        &self.affinity
    }

    pub fn inactivation(&self) -> i64 {
        self.inactivation
    }

    pub fn parent(&self) -> AgentId {
        self.parent
    }

    pub fn last_infected(&self) -> Option<usize> {
        self.last_infected
    }

    /// Mark this phage as spent; it will not be activated again.
    pub fn mark_dead(&mut self) {
        self.dead = true;
    }

    /// Count down towards inactivation, then try to meet a bacterium.
    pub fn activate<R: Rng + ?Sized>(
        &mut self,
        index: &EncounterIndex,
        encounter_width: f64,
        rng: &mut R,
    ) -> PhageAction {
        self.inactivation -= 1;
        if self.inactivation < 0 || self.dead {
            return PhageAction::Expire;
        }
        match self.infect(index, encounter_width, rng) {
            Some(id) => PhageAction::Land(id),
            None => PhageAction::Idle,
        }
    }

    fn infect<R: Rng + ?Sized>(
        &self,
        index: &EncounterIndex,
        encounter_width: f64,
        rng: &mut R,
    ) -> Option<AgentId> {
        let pos = rng.random::<f64>();
        let mut hits = index.encounter(pos, encounter_width / 2.0);
        hits.shuffle(rng);
        // First success wins.
        hits.into_iter()
            .find(|hit| rng.random_bool(self.affinity.get(hit.gen_idx)))
            .map(|hit| hit.id)
    }
}

impl Scheduled for Phage {
    fn id(&self) -> AgentId {
        self.id
    }

    fn genotype(&self) -> usize {
        self.genotype
    }

    fn methylation(&self) -> Option<usize> {
        self.methylation
    }

    fn is_dead(&self) -> bool {
        self.dead
    }
}

/// A bacterium carrying the restriction-modification system of its genotype.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bacterium {
    id: AgentId,
    genotype: usize,
    methylation: Option<usize>,
    degrade_foreign: f64,
    phage: Option<Phage>,
    established: bool,
    lysed: bool,
}

/// Outcome of a bacterium activation.
#[derive(Debug, PartialEq)]
pub enum BacteriumAction {
    /// Nothing happened.
    Idle,
    /// The infecting phage was destroyed.
    Degrade,
    /// The cell bursts and must be replaced by offspring phage.
    Lyse,
}

impl Bacterium {
    pub fn new(id: AgentId, genotype: usize, degrade_foreign: f64) -> Result<Self> {
        if id == 0 {
            bail!("bacterium id must be nonzero");
        }
        if !(0.0..=1.0).contains(&degrade_foreign) {
            bail!("degradation probability must be in [0, 1], but is {degrade_foreign}");
        }
        Ok(Self {
            id,
            genotype,
            methylation: Some(genotype),
            degrade_foreign,
            phage: None,
            established: false,
            lysed: false,
        })
    }

    pub fn phage(&self) -> Option<&Phage> {
        self.phage.as_ref()
    }

    pub fn established(&self) -> bool {
        self.established
    }

    /// Take up `phage`, or hand it back if the cell is already occupied.
    pub fn infect(&mut self, mut phage: Phage) -> Result<(), Phage> {
        phage.mark_dead();
        if self.phage.is_some() {
            return Err(phage);
        }
        self.phage = Some(phage);
        Ok(())
    }

    /// Resolve an infection: degrade the phage, lyse, or wait.
    pub fn activate<R: Rng + ?Sized>(&mut self, latency: f64, rng: &mut R) -> BacteriumAction {
        if self.phage.is_none() {
            return BacteriumAction::Idle;
        }
        if self.maybe_degrade(rng) {
            self.phage = None;
            return BacteriumAction::Degrade;
        }
        if rng.random_bool(latency) {
            self.lysed = true;
            return BacteriumAction::Lyse;
        }
        BacteriumAction::Idle
    }

    fn maybe_degrade<R: Rng + ?Sized>(&mut self, rng: &mut R) -> bool {
        let Some(phage) = &self.phage else {
            return false;
        };
        if self.established || self.methylation == phage.methylation {
            return false;
        }
        if rng.random_bool(self.degrade_foreign) {
            return true;
        }
        self.established = true;
        false
    }

    /// Consume the cell and release `burst_size` offspring of its phage.
    pub fn lyse<F, R>(
        self,
        mut next_id: F,
        burst_size: usize,
        inheritance: Inheritance,
        inactivation: i64,
        mutator: &Mutator,
        rng: &mut R,
    ) -> Result<Vec<Phage>>
    where
        F: FnMut() -> AgentId,
        R: Rng + ?Sized,
    {
        let Some(parent) = self.phage else {
            bail!("bacterium {} lysed without a phage", self.id);
        };
        let mut offspring = Vec::with_capacity(burst_size);
        for _ in 0..burst_size {
            let methylation = inheritance.offspring_methylation(parent.methylation, self.methylation, rng);
            let affinity = parent.affinity.copy_with_mutation(mutator, rng);
            offspring.push(Phage::new(
                next_id(),
                parent.genotype,
                methylation,
                inactivation,
                affinity,
                parent.id,
                Some(self.genotype),
            )?);
        }
        Ok(offspring)
    }
}

impl Scheduled for Bacterium {
    fn id(&self) -> AgentId {
        self.id
    }

    fn genotype(&self) -> usize {
        self.genotype
    }

    fn methylation(&self) -> Option<usize> {
        self.methylation
    }

    fn is_dead(&self) -> bool {
        self.lysed
    }
}

impl Inheritance {
    /// Methylation of one offspring of a phage with methylation `parent`
    /// released from a host with methylation `host`.
    pub fn offspring_methylation<R: Rng + ?Sized>(
        &self,
        parent: Option<usize>,
        host: Option<usize>,
        rng: &mut R,
    ) -> Option<usize> {
        match *self {
            Inheritance::Genetic => parent,
            Inheritance::Random => Some(rng.random_range(0..2)),
            Inheritance::Epigenetic(p) => {
                if rng.random_bool(p) {
                    host
                } else {
                    None
                }
            }
        }
    }
}

/// Either kind of agent, owned.
#[derive(Debug, Clone)]
pub enum Agent {
    Phage(Phage),
    Bacterium(Bacterium),
}

impl From<Phage> for Agent {
    fn from(phage: Phage) -> Self {
        Agent::Phage(phage)
    }
}

impl From<Bacterium> for Agent {
    fn from(bacterium: Bacterium) -> Self {
        Agent::Bacterium(bacterium)
    }
}

/// State of the simulation between steps.
#[derive(Debug, Serialize, Deserialize)]
pub struct State {
    /// Number of completed steps.
    pub step: usize,
    /// Last id handed out.
    pub last_id: AgentId,
    /// Scheduled agents.
    pub schedule: Schedule,
}

impl State {
    pub fn next_id(&mut self) -> AgentId {
        self.last_id += 1;
        self.last_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha12Rng;

    fn plain_mutator() -> Mutator {
        Mutator::new(0.0, 0.0, None).unwrap()
    }

    fn phage(id: AgentId, methylation: Option<usize>, affinity: [f64; 2]) -> Phage {
        let affinity = TraitVector::new(affinity.to_vec(), &plain_mutator());
        Phage::new(id, 0, methylation, 3, affinity, FOUNDER_PARENT, None).unwrap()
    }

    #[test]
    fn zero_ids_are_rejected() {
        let affinity = TraitVector::new(vec![0.5, 0.5], &plain_mutator());
        assert!(Phage::new(0, 0, None, 1, affinity, FOUNDER_PARENT, None).is_err());
        assert!(Bacterium::new(0, 0, 0.5).is_err());
        assert!(Bacterium::new(1, 0, 1.5).is_err());
    }

    #[test]
    fn phage_expires_after_inactivation_time() {
        let mut rng = ChaCha12Rng::seed_from_u64(0);
        let index = EncounterIndex::new(0.0001);
        let mut phage = phage(1, Some(0), [1.0, 1.0]);
        for _ in 0..3 {
            assert_eq!(phage.activate(&index, 0.01, &mut rng), PhageAction::Idle);
        }
        assert_eq!(phage.activate(&index, 0.01, &mut rng), PhageAction::Expire);
    }

    #[test]
    fn dead_phage_expires() {
        let mut rng = ChaCha12Rng::seed_from_u64(0);
        let index = EncounterIndex::new(0.0001);
        let mut phage = phage(1, Some(0), [1.0, 1.0]);
        phage.mark_dead();
        assert_eq!(phage.activate(&index, 0.01, &mut rng), PhageAction::Expire);
    }

    #[test]
    fn phage_lands_on_susceptible_genotype_only() {
        let mut rng = ChaCha12Rng::seed_from_u64(4);
        let mut index = EncounterIndex::new(0.0001);
        index.insert(10, 0, 0.25);
        index.insert(11, 1, 0.75);
        let mut phage = phage(1, Some(0), [0.0, 1.0]);
        phage.inactivation = 1000;
        for _ in 0..200 {
            assert_ne!(phage.activate(&index, 1.0, &mut rng), PhageAction::Land(10));
        }
        assert_eq!(phage.activate(&index, 1.0, &mut rng), PhageAction::Land(11));
    }

    #[test]
    fn occupied_bacterium_excludes_second_phage() {
        let mut bacterium = Bacterium::new(5, 0, 0.0).unwrap();
        assert!(bacterium.infect(phage(1, Some(0), [1.0, 1.0])).is_ok());
        let rejected = bacterium.infect(phage(2, Some(0), [1.0, 1.0])).unwrap_err();
        assert_eq!(rejected.id(), 2);
        assert!(rejected.is_dead());
        assert_eq!(bacterium.phage().map(|phage| phage.id()), Some(1));
    }

    #[test]
    fn matching_methylation_is_never_degraded() {
        let mut rng = ChaCha12Rng::seed_from_u64(9);
        let mut bacterium = Bacterium::new(5, 1, 1.0).unwrap();
        bacterium.infect(phage(1, Some(1), [1.0, 1.0])).unwrap();
        assert_eq!(bacterium.activate(0.0, &mut rng), BacteriumAction::Idle);
        assert!(!bacterium.established());
        assert_eq!(bacterium.activate(1.0, &mut rng), BacteriumAction::Lyse);
        assert!(bacterium.is_dead());
    }

    #[test]
    fn foreign_phage_is_degraded_with_certainty() {
        let mut rng = ChaCha12Rng::seed_from_u64(9);
        let mut bacterium = Bacterium::new(5, 1, 1.0).unwrap();
        bacterium.infect(phage(1, None, [1.0, 1.0])).unwrap();
        assert_eq!(bacterium.activate(1.0, &mut rng), BacteriumAction::Degrade);
        assert!(bacterium.phage().is_none());
        assert!(!bacterium.is_dead());
    }

    #[test]
    fn surviving_foreign_phage_establishes() {
        let mut rng = ChaCha12Rng::seed_from_u64(9);
        let mut bacterium = Bacterium::new(5, 0, 0.0).unwrap();
        bacterium.infect(phage(1, Some(1), [1.0, 1.0])).unwrap();
        assert_eq!(bacterium.activate(0.0, &mut rng), BacteriumAction::Idle);
        assert!(bacterium.established());
        // Once established the degradation probability no longer matters.
        bacterium.degrade_foreign = 1.0;
        assert_eq!(bacterium.activate(0.0, &mut rng), BacteriumAction::Idle);
        assert!(bacterium.phage().is_some());
    }

    #[test]
    fn lysis_releases_burst_with_lineage() {
        let mut rng = ChaCha12Rng::seed_from_u64(3);
        let mut bacterium = Bacterium::new(5, 1, 0.0).unwrap();
        bacterium.infect(phage(42, Some(0), [0.2, 0.8])).unwrap();
        let mut last_id = 100;
        let offspring = bacterium
            .lyse(
                || {
                    last_id += 1;
                    last_id
                },
                4,
                Inheritance::Epigenetic(1.0),
                7,
                &plain_mutator(),
                &mut rng,
            )
            .unwrap();
        assert_eq!(offspring.len(), 4);
        let ids: Vec<_> = offspring.iter().map(|phage| phage.id()).collect();
        assert_eq!(ids, vec![101, 102, 103, 104]);
        for phage in &offspring {
            assert_eq!(phage.parent(), 42);
            assert_eq!(phage.last_infected(), Some(1));
            assert_eq!(phage.methylation(), Some(1));
            assert_eq!(phage.inactivation(), 7);
            assert_eq!(phage.affinity().vals(), &[0.2, 0.8]);
            assert!(!phage.is_dead());
        }
    }

    #[test]
    fn genetic_inheritance_copies_parent() {
        let mut rng = ChaCha12Rng::seed_from_u64(13);
        for parent in [Some(0), Some(1), None] {
            for _ in 0..1000 {
                let methylation = Inheritance::Genetic.offspring_methylation(parent, Some(1), &mut rng);
                assert_eq!(methylation, parent);
            }
        }
    }

    #[test]
    fn random_inheritance_is_balanced() {
        let mut rng = ChaCha12Rng::seed_from_u64(17);
        let n_draws = 20_000;
        let n_ones = (0..n_draws)
            .filter(|_| Inheritance::Random.offspring_methylation(Some(0), Some(0), &mut rng) == Some(1))
            .count();
        let frac = n_ones as f64 / n_draws as f64;
        assert!((frac - 0.5).abs() < 0.02, "fraction of methylation 1 is {frac}");
    }

    #[test]
    fn epigenetic_inheritance_mixes_host_and_none() {
        let mut rng = ChaCha12Rng::seed_from_u64(19);
        let n_draws = 20_000;
        let draws: Vec<_> = (0..n_draws)
            .map(|_| Inheritance::Epigenetic(0.25).offspring_methylation(Some(0), Some(1), &mut rng))
            .collect();
        assert!(draws.iter().all(|&m| m == Some(1) || m.is_none()));
        let frac = draws.iter().filter(|m| m.is_some()).count() as f64 / n_draws as f64;
        assert!((frac - 0.25).abs() < 0.02, "fraction inheriting host methylation is {frac}");
    }
}
