use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Number of bacterial genotypes (and of methylation patterns).
pub const N_GEN: usize = 2;

/// Simulation configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Parameters of the infection dynamics.
    pub model: ModelConfig,
    /// Parameters of the initial population.
    pub init: InitConfig,
    /// Extra phage seeded at initialization, if any.
    pub spike_in: Option<SpikeInConfig>,
    /// Parameters controlling what is written to disk.
    pub output: OutputConfig,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of steps a free phage survives before inactivation.
    pub phage_inactivation_time: i64,
    /// Number of phage released by each lysis.
    pub phage_burst_size: usize,
    /// Founder affinity for the genotype a phage was not adapted to.
    pub phage_off_diagonal: f64,
    /// Size of a single affinity mutation.
    pub phage_mutation_step: f64,
    /// Per-component probability of an affinity mutation.
    pub phage_mutation_freq: f64,
    /// Probability of degrading a foreign phage (vector `N_GEN`, by bacterial genotype).
    pub re_degrade_foreign: Vec<f64>,
    /// Number of bacteria recruited at the end of every step.
    pub bacteria_per_step: usize,
    /// Width of the window in which a phage meets bacteria.
    pub encounter_width: f64,
    /// Width of the interval occupied by one bacterium.
    #[serde(default = "default_agent_width")]
    pub agent_width: f64,
    /// Per-step probability that an established infection lyses its host.
    pub latency: f64,
    /// How offspring acquire their methylation.
    pub epi_inheritance: Inheritance,
    /// Upper boundary of admissible affinity vectors (points of dimension `N_GEN`).
    #[serde(default)]
    pub boundary_curve: Option<Vec<Vec<f64>>>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct InitConfig {
    /// Initial number of phage.
    pub n_phage: usize,
    /// Initial number of bacteria.
    pub n_bacteria: usize,
    /// Fraction of founder phage with methylation 1.
    pub fraction_p_m1: f64,
    /// Fraction of founder phage with genotype 1.
    pub fraction_p_g1: f64,
    /// Fraction of bacteria (founders and recruits) with genotype 1.
    pub fraction_b_m1: f64,
    /// Base seed; run `k` draws from stream `k` of this seed.
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SpikeInConfig {
    /// Affinity of the spiked-in phage for genotype 0.
    pub affinity_0: f64,
    /// Methylation of the spiked-in phage.
    pub methylation: usize,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Number of steps simulated (and records written) per trajectory file.
    pub steps_per_file: usize,
    /// Write per-agent records in addition to model records.
    #[serde(default = "default_save_agents")]
    pub save_agents: bool,
}

fn default_agent_width() -> f64 {
    0.0001
}

fn default_save_agents() -> bool {
    true
}

/// Methylation inheritance mode of phage offspring.
///
/// Encoded in the configuration as a single number:
/// `-1` is genetic, `-2` is random and any `p` in `(0, 1]` is epigenetic.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub enum Inheritance {
    /// Offspring copy the methylation of the infecting phage.
    Genetic,
    /// Offspring draw their methylation uniformly from `{0, 1}`.
    Random,
    /// Offspring take the host methylation with probability `p`, otherwise none.
    Epigenetic(f64),
}

impl TryFrom<f64> for Inheritance {
    type Error = anyhow::Error;

    fn try_from(val: f64) -> Result<Self> {
        if val == -1.0 {
            Ok(Self::Genetic)
        } else if val == -2.0 {
            Ok(Self::Random)
        } else if val > 0.0 && val <= 1.0 {
            Ok(Self::Epigenetic(val))
        } else {
            bail!("inheritance mode must be -1, -2 or in the range (0, 1], but is {val}")
        }
    }
}

impl From<Inheritance> for f64 {
    fn from(inheritance: Inheritance) -> Self {
        match inheritance {
            Inheritance::Genetic => -1.0,
            Inheritance::Random => -2.0,
            Inheritance::Epigenetic(p) => p,
        }
    }
}

impl Config {
    /// Load a [`Config`] from a file.
    ///
    /// The file must be TOML-encoded and contain a serialized [`Config`].
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents = fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate a [`Config`] from a TOML string.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.model.validate().context("invalid model parameters")?;
        self.init.validate().context("invalid initial parameters")?;
        if let Some(spike_in) = &self.spike_in {
            spike_in.validate().context("invalid spike-in parameters")?;
        }
        check_num(self.output.steps_per_file, 1..1_000_000)
            .context("invalid number of steps per file")?;
        Ok(())
    }
}

impl ModelConfig {
    fn validate(&self) -> Result<()> {
        check_num(self.phage_inactivation_time, 0..10_000)
            .context("invalid phage inactivation time")?;
        check_num(self.phage_burst_size, 1..10_000).context("invalid phage burst size")?;
        check_num(self.phage_off_diagonal, 0.0..=1.0).context("invalid off-diagonal affinity")?;
        check_num(self.phage_mutation_step, 0.0..=1.0).context("invalid mutation step")?;
        check_num(self.phage_mutation_freq, 0.0..=1.0).context("invalid mutation frequency")?;
        check_vec(&self.re_degrade_foreign, N_GEN)
            .context("invalid foreign degradation probabilities")?;
        check_num(self.bacteria_per_step, 0..100_000).context("invalid bacteria per step")?;
        check_num(self.encounter_width, 0.0..=1.0).context("invalid encounter width")?;
        check_num(self.agent_width, 0.0..1.0).context("invalid agent width")?;
        check_num(self.latency, 0.0..=1.0).context("invalid latency")?;
        if let Inheritance::Epigenetic(p) = self.epi_inheritance {
            check_num(p, f64::MIN_POSITIVE..=1.0).context("invalid inheritance probability")?;
        }
        if let Some(curve) = &self.boundary_curve {
            if curve.is_empty() {
                bail!("boundary curve must have at least one point");
            }
            for (i_pnt, pnt) in curve.iter().enumerate() {
                check_vec(pnt, N_GEN).with_context(|| format!("invalid boundary point {i_pnt}"))?;
            }
        }
        Ok(())
    }
}

impl InitConfig {
    fn validate(&self) -> Result<()> {
        check_num(self.n_phage, 0..1_000_000).context("invalid initial number of phage")?;
        check_num(self.n_bacteria, 0..1_000_000).context("invalid initial number of bacteria")?;
        check_num(self.fraction_p_m1, 0.0..=1.0).context("invalid phage methylation fraction")?;
        check_num(self.fraction_p_g1, 0.0..=1.0).context("invalid phage genotype fraction")?;
        check_num(self.fraction_b_m1, 0.0..=1.0).context("invalid bacteria genotype fraction")?;
        Ok(())
    }
}

impl SpikeInConfig {
    fn validate(&self) -> Result<()> {
        check_num(self.affinity_0, 0.0..=1.0).context("invalid spike-in affinity")?;
        check_num(self.methylation, 0..N_GEN).context("invalid spike-in methylation")?;
        Ok(())
    }
}

pub fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

fn check_vec(vec: &[f64], exp_len: usize) -> Result<()> {
    // Ensure vector has expected length.
    let len = vec.len();
    if len != exp_len {
        bail!("vector length must be {exp_len}, but is {len}");
    }
    // Every element is a probability.
    for (i_ele, &ele) in vec.iter().enumerate() {
        check_num(ele, 0.0..=1.0).with_context(|| format!("invalid element {i_ele}"))?;
    }
    Ok(())
}
