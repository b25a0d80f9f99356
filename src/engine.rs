use crate::config::Config;
use crate::encounter::EncounterIndex;
use crate::evolvable::{BoundaryCurve, Mutator, TraitVector};
use crate::model::{
    Bacterium, BacteriumAction, Breed, FOUNDER_PARENT, Phage, PhageAction, SPIKE_IN_PARENT,
    Scheduled, State,
};
use crate::record::{RunRecords, StepEvents, StepRecord};
use crate::schedule::Schedule;
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rand_distr::Bernoulli;
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Simulation engine.
///
/// Holds the configuration, current state, and random number generator,
/// and provides methods to initialize, run, save, and load simulations.
/// The encounter index and mutation kernel are derived from the
/// configuration and rebuilt whenever an engine is assembled.
pub struct Engine {
    cfg: Config,
    state: State,
    rng: ChaCha12Rng,
    index: EncounterIndex,
    mutator: Mutator,
    records: Vec<StepRecord>,
}

#[derive(Serialize)]
struct CheckpointRef<'a> {
    cfg: &'a Config,
    state: &'a State,
    rng: &'a ChaCha12Rng,
}

#[derive(Deserialize)]
struct Checkpoint {
    cfg: Config,
    state: State,
    rng: ChaCha12Rng,
}

impl Engine {
    /// Create a new `Engine` with the given configuration and a random initial state.
    ///
    /// With a configured seed, run `run_idx` draws from its own stream of that seed.
    pub fn generate_initial_condition(cfg: Config, run_idx: usize) -> Result<Self> {
        let rng = match cfg.init.seed {
            Some(seed) => {
                let mut rng = ChaCha12Rng::seed_from_u64(seed);
                rng.set_stream(run_idx as u64);
                rng
            }
            None => ChaCha12Rng::try_from_os_rng()?,
        };

        let state = State {
            step: 0,
            last_id: 0,
            schedule: Schedule::new(),
        };
        let mut engine = Self::assemble(cfg, state, rng)?;

        engine.add_phage().context("failed to add founder phage")?;
        engine
            .add_bacteria(engine.cfg.init.n_bacteria)
            .context("failed to add founder bacteria")?;
        if engine.cfg.spike_in.is_some() {
            engine.add_spike_in().context("failed to add spike-in phage")?;
        }

        Ok(engine)
    }

    fn assemble(cfg: Config, state: State, rng: ChaCha12Rng) -> Result<Self> {
        cfg.validate().context("failed to validate config")?;

        let boundary = cfg.model.boundary_curve.clone().map(BoundaryCurve::new);
        let mutator = Mutator::new(
            cfg.model.phage_mutation_step,
            cfg.model.phage_mutation_freq,
            boundary,
        )?;
        let index = EncounterIndex::new(cfg.model.agent_width);

        Ok(Self {
            cfg,
            state,
            rng,
            index,
            mutator,
            records: Vec::new(),
        })
    }

    pub fn cfg(&self) -> &Config {
        &self.cfg
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Records collected since the last call to [`Engine::take_records`].
    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    pub fn take_records(&mut self) -> Vec<StepRecord> {
        std::mem::take(&mut self.records)
    }

    /// Hand over the collected records together with the configuration.
    pub fn into_records(self) -> RunRecords {
        RunRecords {
            cfg: self.cfg,
            steps: self.records,
        }
    }

    /// Perform `n_steps` steps, keeping the records of every step.
    pub fn run(&mut self, n_steps: usize) -> Result<()> {
        for _ in 0..n_steps {
            self.step().context("failed to perform step")?;
        }
        Ok(())
    }

    /// Perform the simulation and save the resulting records to a binary file.
    pub fn perform_simulation<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);

        let n_steps = self.cfg.output.steps_per_file;
        let steps_per_log = (n_steps / 10).max(1);
        for i_step in 0..n_steps {
            self.step().context("failed to perform step")?;

            for record in self.records.drain(..) {
                encode::write(&mut writer, &record).context("failed to serialize record")?;
            }

            if (i_step + 1) % steps_per_log == 0 || i_step + 1 == n_steps {
                let progress = 100.0 * (i_step + 1) as f64 / n_steps as f64;
                log::info!("completed {progress:06.2}%");
            }
        }

        writer.flush().context("failed to flush writer stream")?;

        Ok(())
    }

    /// Save a checkpoint of the entire engine state.
    ///
    /// Can be used to resume the simulation later.
    pub fn save_checkpoint<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        let checkpoint = CheckpointRef {
            cfg: &self.cfg,
            state: &self.state,
            rng: &self.rng,
        };
        encode::write(&mut writer, &checkpoint).context("failed to serialize engine")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }

    /// Load a previously saved engine checkpoint.
    pub fn load_checkpoint<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);
        let checkpoint: Checkpoint =
            decode::from_read(&mut reader).context("failed to deserialize engine")?;
        Self::assemble(checkpoint.cfg, checkpoint.state, checkpoint.rng)
    }

    /// Perform one step.
    ///
    /// An error leaves the engine in an unspecified state; the step must be
    /// discarded rather than resumed.
    pub fn step(&mut self) -> Result<()> {
        let mut record = StepRecord::collect(
            self.state.step,
            &self.state.schedule,
            self.cfg.output.save_agents,
        );

        // Shuffle the location of every bacterium.
        self.index.rebuild(
            self.state
                .schedule
                .bacteria()
                .map(|bacterium| (bacterium.id(), bacterium.genotype())),
            &mut self.rng,
        );

        let mut events = StepEvents::default();

        self.activate_phages(&mut events)
            .context("failed to activate phage")?;

        self.activate_bacteria(&mut events)
            .context("failed to activate bacteria")?;

        // Recruits join after activation, so they first act next step.
        events.recruited = self.cfg.model.bacteria_per_step;
        self.add_bacteria(self.cfg.model.bacteria_per_step)
            .context("failed to recruit bacteria")?;

        log::debug!(
            "step {}: {} phage, {} bacteria, {events:?}",
            self.state.step,
            self.state.schedule.count(Breed::Phage),
            self.state.schedule.count(Breed::Bacterium),
        );

        record.model.events = events;
        self.records.push(record);
        self.state.step += 1;

        Ok(())
    }

    fn activate_phages(&mut self, events: &mut StepEvents) -> Result<()> {
        let encounter_width = self.cfg.model.encounter_width;

        let ids = self.state.schedule.snapshot(Breed::Phage, &mut self.rng);
        for id in ids {
            let phage = self
                .state
                .schedule
                .phage_mut(id)
                .with_context(|| format!("phage {id} is not scheduled"))?;

            match phage.activate(&self.index, encounter_width, &mut self.rng) {
                PhageAction::Idle => {}
                PhageAction::Expire => {
                    self.state.schedule.remove_phage(id);
                    events.inactivated += 1;
                }
                PhageAction::Land(host_id) => {
                    let phage = self
                        .state
                        .schedule
                        .remove_phage(id)
                        .with_context(|| format!("phage {id} is not scheduled"))?;
                    let host = self
                        .state
                        .schedule
                        .bacterium_mut(host_id)
                        .with_context(|| format!("bacterium {host_id} is not scheduled"))?;
                    // An occupied host keeps its phage and the newcomer is lost.
                    match host.infect(phage) {
                        Ok(()) => events.attached += 1,
                        Err(_) => events.excluded += 1,
                    }
                }
            }
        }

        Ok(())
    }

    fn activate_bacteria(&mut self, events: &mut StepEvents) -> Result<()> {
        let latency = self.cfg.model.latency;
        let burst_size = self.cfg.model.phage_burst_size;
        let inheritance = self.cfg.model.epi_inheritance;
        let inactivation = self.cfg.model.phage_inactivation_time;

        let ids = self.state.schedule.snapshot(Breed::Bacterium, &mut self.rng);
        for id in ids {
            let host = self
                .state
                .schedule
                .bacterium_mut(id)
                .with_context(|| format!("bacterium {id} is not scheduled"))?;

            match host.activate(latency, &mut self.rng) {
                BacteriumAction::Idle => {}
                BacteriumAction::Degrade => events.degraded += 1,
                BacteriumAction::Lyse => {
                    let host = self
                        .state
                        .schedule
                        .remove_bacterium(id)
                        .with_context(|| format!("bacterium {id} is not scheduled"))?;
                    let offspring = host.lyse(
                        || self.state.next_id(),
                        burst_size,
                        inheritance,
                        inactivation,
                        &self.mutator,
                        &mut self.rng,
                    )?;

                    events.lysed += 1;
                    events.burst += offspring.len();
                    for phage in offspring {
                        self.state.schedule.add(phage)?;
                    }
                }
            }
        }

        Ok(())
    }

    fn add_phage(&mut self) -> Result<()> {
        // Founders start with affinity according to a symmetric matrix.
        let off_diag = self.cfg.model.phage_off_diagonal;
        let affinity = [[1.0 - off_diag, off_diag], [off_diag, 1.0 - off_diag]];

        let meth_dist = Bernoulli::new(self.cfg.init.fraction_p_m1)?;
        let gen_dist = Bernoulli::new(self.cfg.init.fraction_p_g1)?;

        for _ in 0..self.cfg.init.n_phage {
            let methylation = usize::from(meth_dist.sample(&mut self.rng));
            let genotype = usize::from(gen_dist.sample(&mut self.rng));
            let affinity = TraitVector::new(affinity[genotype].to_vec(), &self.mutator);
            let phage = Phage::new(
                self.state.next_id(),
                genotype,
                Some(methylation),
                self.cfg.model.phage_inactivation_time,
                affinity,
                FOUNDER_PARENT,
                None,
            )?;
            self.state.schedule.add(phage)?;
        }

        Ok(())
    }

    fn add_bacteria(&mut self, n_bacteria: usize) -> Result<()> {
        let gen_dist = Bernoulli::new(self.cfg.init.fraction_b_m1)?;

        for _ in 0..n_bacteria {
            let genotype = usize::from(gen_dist.sample(&mut self.rng));
            let bacterium = Bacterium::new(
                self.state.next_id(),
                genotype,
                self.cfg.model.re_degrade_foreign[genotype],
            )?;
            self.state.schedule.add(bacterium)?;
        }

        Ok(())
    }

    fn add_spike_in(&mut self) -> Result<()> {
        let Some(spike_in) = self.cfg.spike_in.clone() else {
            return Ok(());
        };
        let affinity = TraitVector::new(
            vec![spike_in.affinity_0, 1.0 - spike_in.affinity_0],
            &self.mutator,
        );

        // Spiked-in phage carry fixed negative ids so their lineage stays traceable.
        for i_phage in 1..self.cfg.model.phage_burst_size {
            let phage = Phage::new(
                -10 * i_phage as i64,
                0,
                Some(spike_in.methylation),
                self.cfg.model.phage_inactivation_time,
                affinity.clone(),
                SPIKE_IN_PARENT,
                None,
            )?;
            self.state.schedule.add(phage)?;
        }

        Ok(())
    }
}
