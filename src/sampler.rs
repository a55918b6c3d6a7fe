use crate::config::{DiseaseConfig, DurationLaw, Family};
use anyhow::{Context, Result, bail};
use rand::prelude::*;
use rand_distr::Uniform;
use serde::{Deserialize, Serialize};

/// Number of tabulated points of a [`LawTable`].
const TABLE_LEN: usize = 2048;
/// Standard deviations above the mean covered by a [`LawTable`].
const TABLE_SPAN: f64 = 8.0;

/// Tabulated cumulative distribution of a stage duration.
///
/// Built once from a distribution family and a `(mean, std_dev)` pair,
/// read-only thereafter.
#[derive(Debug, Clone)]
pub struct LawTable {
    xs: Vec<f64>,
    cdf: Vec<f64>,
}

impl LawTable {
    pub fn new(family: Family, mean: f64, std_dev: f64) -> Result<Self> {
        let kernel = Kernel::new(family, mean, std_dev);
        let (lo, hi) = kernel.support(mean, std_dev);

        // The extended grid covers twice the tabulated range, so the tail
        // mass beyond the table is accounted for in the normalization.
        let h = (hi - lo) / (TABLE_LEN - 1) as f64;
        let n_ext = 2 * TABLE_LEN;

        let mut xs = Vec::with_capacity(n_ext);
        let mut cdf = Vec::with_capacity(n_ext);
        let mut acc = 0.0;
        xs.push(lo);
        cdf.push(0.0);
        for i_x in 1..n_ext {
            let x = lo + i_x as f64 * h;
            acc += kernel.eval(x - 0.5 * h) * h;
            xs.push(x);
            cdf.push(acc);
        }

        let total = acc;
        if !total.is_finite() || total <= 0.0 {
            bail!("{family:?} law with mean {mean} and std_dev {std_dev} cannot be tabulated");
        }
        cdf.iter_mut().for_each(|val| *val /= total);
        xs.truncate(TABLE_LEN);
        cdf.truncate(TABLE_LEN);

        Ok(Self { xs, cdf })
    }

    /// First tabulated duration whose cumulative probability reaches `u`.
    ///
    /// Saturates at the largest tabulated duration.
    pub fn invert(&self, u: f64) -> f64 {
        self.cdf
            .iter()
            .position(|&p| p >= u)
            .map_or(self.max_x(), |i_x| self.xs[i_x])
    }

    pub fn max_x(&self) -> f64 {
        self.xs.last().copied().unwrap_or(0.0)
    }

    /// Mean of the tabulated law.
    pub fn mean(&self) -> f64 {
        let mut mean = 0.0;
        for (x, p) in self.xs.windows(2).zip(self.cdf.windows(2)) {
            mean += 0.5 * (x[0] + x[1]) * (p[1] - p[0]);
        }
        mean
    }
}

/// Unnormalized density of a distribution family.
enum Kernel {
    Uniform { lo: f64, hi: f64 },
    Lognormal { mu: f64, sigma: f64 },
    Gamma { shape: f64, scale: f64, ln_peak: f64 },
}

impl Kernel {
    fn new(family: Family, mean: f64, std_dev: f64) -> Self {
        match family {
            Family::Uniform => {
                let half_width = 3.0_f64.sqrt() * std_dev;
                Kernel::Uniform {
                    lo: mean - half_width,
                    hi: mean + half_width,
                }
            }
            Family::Lognormal => {
                let sigma_2 = (1.0 + (std_dev / mean).powi(2)).ln();
                Kernel::Lognormal {
                    mu: mean.ln() - 0.5 * sigma_2,
                    sigma: sigma_2.sqrt(),
                }
            }
            Family::Gamma => {
                let shape = (mean / std_dev).powi(2);
                let scale = std_dev.powi(2) / mean;
                // Log-density at the mode, so the kernel peaks at one.
                let ln_peak = if shape > 1.0 {
                    let mode = (shape - 1.0) * scale;
                    (shape - 1.0) * mode.ln() - mode / scale
                } else {
                    0.0
                };
                Kernel::Gamma {
                    shape,
                    scale,
                    ln_peak,
                }
            }
        }
    }

    fn support(&self, mean: f64, std_dev: f64) -> (f64, f64) {
        match *self {
            Kernel::Uniform { lo, hi } => (lo.max(0.0), hi),
            _ => (0.0, mean + TABLE_SPAN * std_dev),
        }
    }

    fn eval(&self, x: f64) -> f64 {
        match *self {
            Kernel::Uniform { lo, hi } => {
                if (lo..=hi).contains(&x) {
                    1.0
                } else {
                    0.0
                }
            }
            Kernel::Lognormal { mu, sigma } => {
                if x <= 0.0 {
                    return 0.0;
                }
                let z = (x.ln() - mu) / sigma;
                (-0.5 * z * z).exp() / x
            }
            Kernel::Gamma {
                shape,
                scale,
                ln_peak,
            } => {
                if x <= 0.0 {
                    return 0.0;
                }
                ((shape - 1.0) * x.ln() - x / scale - ln_peak).exp()
            }
        }
    }
}

/// Sampler of one stage duration.
#[derive(Debug, Clone)]
pub enum DurationSampler {
    Range { dist: Uniform<f64>, mean: f64 },
    Table(LawTable),
}

impl DurationSampler {
    pub fn new(law: &DurationLaw) -> Result<Self> {
        let sampler = match *law {
            DurationLaw::Range { min, max } => DurationSampler::Range {
                dist: Uniform::new_inclusive(min, max)?,
                mean: law.mean(),
            },
            DurationLaw::Fitted {
                family,
                mean,
                std_dev,
            } => DurationSampler::Table(
                LawTable::new(family, mean, std_dev).context("failed to construct law table")?,
            ),
        };
        Ok(sampler)
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match self {
            DurationSampler::Range { dist, .. } => dist.sample(rng),
            DurationSampler::Table(table) => {
                let u: f64 = rng.random();
                table.invert(u)
            }
        }
    }

    pub fn mean(&self) -> f64 {
        match self {
            DurationSampler::Range { mean, .. } => *mean,
            DurationSampler::Table(table) => table.mean(),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum Stage {
    Incubation,
    Death,
    Recovery,
}

/// Stage duration drawn during the simulation.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct SampledDuration {
    pub stage: Stage,
    pub time: f64,
    pub value: f64,
}

/// Samplers of the three stage durations.
#[derive(Debug, Clone)]
pub struct StageSamplers {
    pub incubation: DurationSampler,
    pub death: DurationSampler,
    pub recovery: DurationSampler,
}

impl StageSamplers {
    pub fn new(cfg: &DiseaseConfig) -> Result<Self> {
        Ok(Self {
            incubation: DurationSampler::new(&cfg.incubation)
                .context("failed to construct incubation sampler")?,
            death: DurationSampler::new(&cfg.death_after_symptoms)
                .context("failed to construct death sampler")?,
            recovery: DurationSampler::new(&cfg.recovery_after_symptoms)
                .context("failed to construct recovery sampler")?,
        })
    }

    pub fn get(&self, stage: Stage) -> &DurationSampler {
        match stage {
            Stage::Incubation => &self.incubation,
            Stage::Death => &self.death,
            Stage::Recovery => &self.recovery,
        }
    }
}
