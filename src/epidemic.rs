//! Disease transmission and the per-particle health state machine.

use crate::config::Config;
use crate::model::{HealthState, Outcome, Particle};
use crate::sampler::{SampledDuration, Stage, StageSamplers};
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_distr::Bernoulli;

/// Health state change produced by [`Disease::advance`].
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Transition {
    None,
    Onset,
    Recovery,
    Death,
}

/// Disease parameters ready for sampling.
#[derive(Debug, Clone)]
pub struct Disease {
    contact: Bernoulli,
    mortality: Bernoulli,
    mortality_rate: f64,
    samplers: StageSamplers,
    symptomatic_confinement: bool,
}

impl Disease {
    pub fn new(cfg: &Config) -> Result<Self> {
        let disease = &cfg.disease;
        Ok(Self {
            contact: Bernoulli::new(disease.contact_prob)
                .context("invalid contact probability")?,
            mortality: Bernoulli::new(disease.mortality_rate)
                .context("invalid mortality rate")?,
            mortality_rate: disease.mortality_rate,
            samplers: StageSamplers::new(disease).context("failed to construct samplers")?,
            symptomatic_confinement: cfg.policy.symptomatic_confinement,
        })
    }

    pub fn symptomatic_confinement(&self) -> bool {
        self.symptomatic_confinement
    }

    /// Expected time from symptom onset to death or recovery.
    pub fn mean_infection_duration(&self) -> f64 {
        self.mortality_rate * self.samplers.death.mean()
            + (1.0 - self.mortality_rate) * self.samplers.recovery.mean()
    }

    fn sample_stage<R: Rng + ?Sized>(
        &self,
        stage: Stage,
        time: f64,
        rng: &mut R,
        log: &mut Vec<SampledDuration>,
    ) -> f64 {
        let value = self.samplers.get(stage).sample(rng);
        log.push(SampledDuration { stage, time, value });
        value
    }

    /// Attempt transmission from `src` to `dst`.
    ///
    /// A draw is made only if `src` is infected and `dst` can be infected.
    /// Returns whether `dst` was infected.
    pub fn transmit<R: Rng + ?Sized>(
        &self,
        particles: &mut [Particle],
        src: usize,
        dst: usize,
        time: f64,
        rng: &mut R,
        log: &mut Vec<SampledDuration>,
    ) -> Result<bool> {
        if !particles[src].is_infected() || !particles[dst].can_be_infected() {
            return Ok(false);
        }
        if !self.contact.sample(rng) {
            return Ok(false);
        }

        let incubation = self.sample_stage(Stage::Incubation, time, rng, log);
        particles[dst]
            .infect(time, incubation)
            .context("failed to infect particle")?;
        particles[src].record_infection();

        Ok(true)
    }

    /// Advance the health state of one particle to `time`.
    ///
    /// Healthy, recovered and dead particles are left untouched.
    pub fn advance<R: Rng + ?Sized>(
        &self,
        part: &mut Particle,
        time: f64,
        rng: &mut R,
        log: &mut Vec<SampledDuration>,
    ) -> Result<Transition> {
        match part.state() {
            HealthState::InfectedAsymptomatic => {
                let infection_time = part.infection_time().context("missing infection time")?;
                if time - infection_time < part.incubation() {
                    return Ok(Transition::None);
                }

                let will_die = self.mortality.sample(rng);
                let stage = if will_die {
                    Stage::Death
                } else {
                    Stage::Recovery
                };
                let duration = self.sample_stage(stage, time, rng, log);
                part.develop_symptoms(Outcome { will_die, duration })?;

                Ok(Transition::Onset)
            }
            HealthState::InfectedSymptomatic => {
                let onset_time = part.onset_time().context("missing infection time")?;
                let outcome = part.outcome().context("missing outcome")?;
                if time - onset_time < outcome.duration {
                    return Ok(Transition::None);
                }

                if outcome.will_die {
                    part.die()?;
                    Ok(Transition::Death)
                } else {
                    part.recover()?;
                    Ok(Transition::Recovery)
                }
            }
            HealthState::Healthy | HealthState::Recovered | HealthState::Dead => {
                Ok(Transition::None)
            }
        }
    }
}
