use crate::collision::{self, Contact};
use crate::config::{CollisionResponse, Config};
use crate::epidemic::{Disease, Transition};
use crate::model::{HealthState, Particle};
use crate::sampler::SampledDuration;
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_distr::Uniform;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

/// Particle data stored in a [`Snapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticleRecord {
    pub id: usize,
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    pub state: u8,
}

/// State of the population after a completed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub time: f64,
    pub step: usize,
    pub r_factor: f64,
    pub particles: Vec<ParticleRecord>,
}

/// Collection of live particles.
///
/// Owns the particles exclusively and orchestrates one simulation step.
#[derive(Serialize, Deserialize)]
pub struct Population {
    particles: Vec<Particle>,
    domain: [f64; 2],
    radius: f64,
    momentum: f64,
    response: CollisionResponse,
    r_factor: f64,
    sampled: Vec<SampledDuration>,
}

impl Population {
    /// Create a population at time 0.
    ///
    /// Healthy particles are placed uniformly in the domain with a random
    /// heading. Patients zero are infected at time 0 with no incubation, at
    /// the configured positions or at a random one.
    pub fn new<R: Rng + ?Sized>(cfg: &Config, rng: &mut R) -> Result<Self> {
        let model = &cfg.model;
        let speed = model.initial_momentum / model.mass;

        let x_dist = Uniform::new_inclusive(0.0, model.domain[0])?;
        let y_dist = Uniform::new_inclusive(0.0, model.domain[1])?;
        let angle_dist = Uniform::new(0.0, TAU)?;

        let mut particles = Vec::with_capacity(model.population_size);
        for id in 0..model.population_size {
            let pos = [x_dist.sample(rng), y_dist.sample(rng)];
            let vel = heading(angle_dist.sample(rng), speed);
            particles.push(Particle::new(id, pos, vel, model.radius, model.mass));
        }

        let n_zero = cfg.init.patients_zero.len().max(1);
        let i_zero_vec = rand::seq::index::sample(rng, model.population_size, n_zero);
        for (k, i_zero) in i_zero_vec.iter().enumerate() {
            let part = &mut particles[i_zero];
            if let Some(&pos) = cfg.init.patients_zero.get(k) {
                let [x, y] = part.pos();
                part.displace([pos[0] - x, pos[1] - y]);
            }
            part.infect(0.0, 0.0)
                .context("failed to infect patient zero")?;
        }

        Ok(Self {
            particles,
            domain: model.domain,
            radius: model.radius,
            momentum: model.initial_momentum,
            response: model.collision_response,
            r_factor: 0.0,
            sampled: Vec::new(),
        })
    }

    #[cfg(test)]
    pub fn from_particles(
        particles: Vec<Particle>,
        domain: [f64; 2],
        radius: f64,
        momentum: f64,
    ) -> Self {
        Self {
            particles,
            domain,
            radius,
            momentum,
            response: CollisionResponse::Reflect,
            r_factor: 0.0,
            sampled: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn r_factor(&self) -> f64 {
        self.r_factor
    }

    /// Perform one simulation step at `time`.
    pub fn step<R: Rng + ?Sized>(
        &mut self,
        time: f64,
        dt: f64,
        disease: &Disease,
        rng: &mut R,
    ) -> Result<()> {
        self.move_all(dt);
        self.resolve_wall_collisions();
        self.resolve_particle_collisions(time, disease, rng)
            .context("failed to resolve particle collisions")?;
        self.advance_health_states(time, disease, rng)
            .context("failed to advance health states")?;
        self.remove_dead();
        self.compute_r_factor(time, disease);
        Ok(())
    }

    pub fn move_all(&mut self, dt: f64) {
        for part in &mut self.particles {
            part.advance_position(dt);
        }
    }

    pub fn resolve_wall_collisions(&mut self) {
        collision::resolve_walls(&mut self.particles, self.domain);
    }

    /// Resolve pairwise collisions, transmitting the disease on contact.
    pub fn resolve_particle_collisions<R: Rng + ?Sized>(
        &mut self,
        time: f64,
        disease: &Disease,
        rng: &mut R,
    ) -> Result<usize> {
        let sampled = &mut self.sampled;
        collision::resolve_pairs(
            &mut self.particles,
            self.domain,
            self.radius,
            self.response,
            |particles, &Contact { i, j, .. }| {
                disease.transmit(particles, i, j, time, rng, sampled)?;
                disease.transmit(particles, j, i, time, rng, sampled)?;
                Ok(())
            },
        )
    }

    /// Advance every particle's health state to `time`.
    pub fn advance_health_states<R: Rng + ?Sized>(
        &mut self,
        time: f64,
        disease: &Disease,
        rng: &mut R,
    ) -> Result<()> {
        let angle_dist = Uniform::new(0.0, TAU)?;

        for i_part in 0..self.particles.len() {
            let part = &mut self.particles[i_part];
            let transition = disease
                .advance(part, time, rng, &mut self.sampled)
                .with_context(|| format!("failed to advance particle {}", part.id()))?;

            match transition {
                Transition::Onset => {
                    if disease.symptomatic_confinement() {
                        self.confine_symptomatic();
                    }
                }
                Transition::Recovery => {
                    if disease.symptomatic_confinement() && !part.is_prev_confined() {
                        let speed = self.momentum / part.mass();
                        part.set_vel(heading(angle_dist.sample(rng), speed));
                    }
                }
                Transition::Death | Transition::None => {}
            }
        }

        Ok(())
    }

    fn confine_symptomatic(&mut self) {
        for part in &mut self.particles {
            if part.state() == HealthState::InfectedSymptomatic {
                part.freeze();
            }
        }
    }

    /// Remove dead particles and return how many were removed.
    pub fn remove_dead(&mut self) -> usize {
        let n_part = self.particles.len();
        self.particles
            .retain(|part| part.state() != HealthState::Dead);
        n_part - self.particles.len()
    }

    /// Freeze and flag the first `round(fraction * size)` particles by id.
    pub fn set_preventive_confinement(&mut self, fraction: f64) {
        let n_confined = self.count_of(fraction);
        for part in &mut self.particles {
            if part.id() < n_confined {
                part.confine_preventively();
            }
        }
    }

    /// Vaccinate the first `round(fraction * size)` particles by id.
    pub fn apply_vaccination(&mut self, fraction: f64) {
        let n_vaccinated = self.count_of(fraction);
        for part in &mut self.particles {
            if part.id() < n_vaccinated {
                part.vaccinate();
            }
        }
    }

    fn count_of(&self, fraction: f64) -> usize {
        (fraction * self.particles.len() as f64).round() as usize
    }

    /// Point-in-time estimate of the effective reproduction number.
    pub fn compute_r_factor(&mut self, time: f64, disease: &Disease) -> f64 {
        let mean_duration = disease.mean_infection_duration();

        let mut n_infected = 0;
        let mut transmissions = 0.0;
        for part in self.particles.iter().filter(|part| part.is_infected()) {
            n_infected += 1;
            let infected_for = part.infection_time().map_or(0.0, |t_inf| time - t_inf);
            if infected_for > 0.0 {
                transmissions += mean_duration * part.infections_caused() as f64 / infected_for;
            }
        }

        self.r_factor = if n_infected == 0 {
            0.0
        } else {
            transmissions / n_infected as f64
        };
        self.r_factor
    }

    pub fn is_anyone_infected(&self) -> bool {
        self.particles.iter().any(|part| part.is_infected())
    }

    pub fn count(&self, state: HealthState) -> usize {
        self.particles
            .iter()
            .filter(|part| part.state() == state)
            .count()
    }

    /// Take the stage durations sampled since the last call.
    pub fn drain_sampled(&mut self) -> Vec<SampledDuration> {
        std::mem::take(&mut self.sampled)
    }

    pub fn snapshot(&self, time: f64, step: usize) -> Snapshot {
        let particles = self
            .particles
            .iter()
            .map(|part| {
                let [x, y] = part.pos();
                let [vx, vy] = part.vel();
                ParticleRecord {
                    id: part.id(),
                    x,
                    y,
                    vx,
                    vy,
                    state: part.state().code(),
                }
            })
            .collect();
        Snapshot {
            time,
            step,
            r_factor: self.r_factor,
            particles,
        }
    }
}

fn heading(angle: f64, speed: f64) -> [f64; 2] {
    [speed * angle.cos(), speed * angle.sin()]
}
