use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Simulation configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    pub model: ModelConfig,
    pub disease: DiseaseConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub init: InitConfig,
    pub output: OutputConfig,
}

/// Physical parameters of the particle system.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Initial number of particles.
    pub population_size: usize,
    /// Domain size `[width, height]`.
    pub domain: [f64; 2],
    /// Radius of every particle (also the contact radius).
    pub radius: f64,
    /// Mass of every particle.
    #[serde(default = "default_mass")]
    pub mass: f64,
    /// Initial momentum magnitude.
    pub initial_momentum: f64,
    /// Time step.
    pub dt: f64,
    /// Optional time horizon.
    #[serde(default)]
    pub max_time: Option<f64>,
    /// Velocity response along the contact normal.
    #[serde(default)]
    pub collision_response: CollisionResponse,
}

/// Disease parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct DiseaseConfig {
    /// Probability of transmission per contact.
    pub contact_prob: f64,
    /// Probability that a symptomatic particle dies.
    pub mortality_rate: f64,
    /// Duration from infection to symptom onset.
    pub incubation: DurationLaw,
    /// Duration from symptom onset to death.
    pub death_after_symptoms: DurationLaw,
    /// Duration from symptom onset to recovery.
    pub recovery_after_symptoms: DurationLaw,
}

/// Measures taken against the epidemic.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Fraction of the population immobilized from the start.
    #[serde(default)]
    pub preventive_confinement: f64,
    /// Immobilize particles while they show symptoms.
    #[serde(default)]
    pub symptomatic_confinement: bool,
    /// Fraction of the population immune to infection.
    #[serde(default)]
    pub vaccination: f64,
}

/// Initial condition parameters.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct InitConfig {
    /// Seed of the random number generator (OS entropy if absent).
    #[serde(default)]
    pub seed: Option<u64>,
    /// Positions of the initially infected particles.
    ///
    /// A single patient zero at a random position if empty.
    #[serde(default)]
    pub patients_zero: Vec<[f64; 2]>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Number of steps between simulation saves.
    pub steps_per_save: usize,
    /// Number of saves written per file.
    pub saves_per_file: usize,
}

/// Velocity change applied to both particles along the contact normal.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionResponse {
    /// Flip the normal component.
    Reflect,
    /// Remove the normal component.
    #[default]
    Absorb,
}

/// Probability law of a stage duration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DurationLaw {
    /// Uniform over `[min, max]`, sampled directly.
    Range { min: f64, max: f64 },
    /// Distribution family fitted to a `(mean, std_dev)` pair, sampled
    /// through a tabulated CDF.
    Fitted {
        family: Family,
        mean: f64,
        std_dev: f64,
    },
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Uniform,
    Lognormal,
    Gamma,
}

fn default_mass() -> f64 {
    1.0
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
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;

        let config: Config = toml::from_str(&contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.model.validate().context("invalid model parameters")?;
        self.disease
            .validate()
            .context("invalid disease parameters")?;
        self.policy.validate().context("invalid policy parameters")?;

        let n_zero = self.init.patients_zero.len();
        check_num(n_zero, 0..=self.model.population_size)
            .context("invalid number of patients zero")?;
        let [width, height] = self.model.domain;
        for (i_pos, &[x, y]) in self.init.patients_zero.iter().enumerate() {
            check_num(x, 0.0..=width)
                .and_then(|_| check_num(y, 0.0..=height))
                .with_context(|| format!("invalid position of patient zero {i_pos}"))?;
        }

        check_num(self.output.steps_per_save, 1..10_000)
            .context("invalid number of steps per save")?;
        check_num(self.output.saves_per_file, 1..1_000_000)
            .context("invalid number of saves per file")?;

        let speed = self.initial_speed();
        if speed * self.model.dt >= self.model.radius {
            log::warn!(
                "particles travel {} per step, more than their radius {}; collisions may be missed",
                speed * self.model.dt,
                self.model.radius
            );
        }

        Ok(())
    }

    /// Initial speed of every moving particle.
    pub fn initial_speed(&self) -> f64 {
        self.model.initial_momentum / self.model.mass
    }
}

impl ModelConfig {
    fn validate(&self) -> Result<()> {
        check_num(self.population_size, 1..100_000).context("invalid population size")?;
        check_pos(self.radius).context("invalid radius")?;
        check_pos(self.mass).context("invalid mass")?;
        check_num(self.initial_momentum, 0.0..f64::INFINITY)
            .context("invalid initial momentum")?;
        check_pos(self.dt).context("invalid time step")?;
        for len in self.domain {
            check_num(len, 2.0 * self.radius..f64::INFINITY)
                .context("invalid domain size (must fit one particle)")?;
        }
        if let Some(max_time) = self.max_time {
            check_pos(max_time).context("invalid time horizon")?;
        }
        Ok(())
    }
}

impl DiseaseConfig {
    fn validate(&self) -> Result<()> {
        check_num(self.contact_prob, 0.0..=1.0).context("invalid contact probability")?;
        check_num(self.mortality_rate, 0.0..=1.0).context("invalid mortality rate")?;
        self.incubation
            .validate()
            .context("invalid incubation law")?;
        self.death_after_symptoms
            .validate()
            .context("invalid death law")?;
        self.recovery_after_symptoms
            .validate()
            .context("invalid recovery law")?;
        Ok(())
    }
}

impl PolicyConfig {
    fn validate(&self) -> Result<()> {
        check_num(self.preventive_confinement, 0.0..=1.0)
            .context("invalid preventive confinement fraction")?;
        check_num(self.vaccination, 0.0..=1.0).context("invalid vaccination fraction")?;
        if self.preventive_confinement > 0.0 && self.vaccination > 0.0 {
            bail!("preventive confinement and vaccination are mutually exclusive");
        }
        Ok(())
    }
}

impl DurationLaw {
    fn validate(&self) -> Result<()> {
        match *self {
            DurationLaw::Range { min, max } => {
                check_num(min, 0.0..f64::INFINITY).context("invalid minimum")?;
                check_num(max, min..f64::INFINITY).context("invalid maximum")?;
            }
            DurationLaw::Fitted {
                family,
                mean,
                std_dev,
            } => {
                check_pos(mean).context("invalid mean")?;
                check_pos(std_dev).context("invalid standard deviation")?;
                if family == Family::Uniform && mean < 3.0_f64.sqrt() * std_dev {
                    bail!("uniform law would produce negative durations");
                }
            }
        }
        Ok(())
    }

    /// Mean duration of the law.
    pub fn mean(&self) -> f64 {
        match *self {
            DurationLaw::Range { min, max } => 0.5 * (min + max),
            DurationLaw::Fitted { mean, .. } => mean,
        }
    }
}

fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

fn check_pos(num: f64) -> Result<()> {
    if !(num.is_finite() && num > 0.0) {
        bail!("number must be finite and positive, but is {num:?}");
    }
    Ok(())
}
