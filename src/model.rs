use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Health state of a particle.
///
/// `Dead` only flags a particle for removal at the end of the step.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum HealthState {
    Healthy,
    InfectedAsymptomatic,
    InfectedSymptomatic,
    Recovered,
    Dead,
}

impl HealthState {
    /// Numeric code used in snapshots.
    pub fn code(self) -> u8 {
        match self {
            HealthState::Healthy => 0,
            HealthState::InfectedAsymptomatic => 1,
            HealthState::InfectedSymptomatic => 2,
            HealthState::Recovered => 3,
            HealthState::Dead => 4,
        }
    }

    pub fn is_infected(self) -> bool {
        matches!(
            self,
            HealthState::InfectedAsymptomatic | HealthState::InfectedSymptomatic
        )
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Axis {
    X,
    Y,
}

/// Outcome of the disease, fixed at symptom onset.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct Outcome {
    pub will_die: bool,
    /// Time from symptom onset to death or recovery.
    pub duration: f64,
}

/// Particle of the simulation.
///
/// Radius and mass never change after creation. The epidemiological timers
/// are only ever set by the state transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Particle {
    id: usize,
    pos: [f64; 2],
    vel: [f64; 2],
    radius: f64,
    mass: f64,

    state: HealthState,
    infection_time: Option<f64>,
    incubation: f64,
    outcome: Option<Outcome>,

    prev_confined: bool,
    vaccinated: bool,

    infections_caused: usize,
}

impl Particle {
    /// Create a new healthy particle.
    pub fn new(id: usize, pos: [f64; 2], vel: [f64; 2], radius: f64, mass: f64) -> Self {
        Self {
            id,
            pos,
            vel,
            radius,
            mass,
            state: HealthState::Healthy,
            infection_time: None,
            incubation: 0.0,
            outcome: None,
            prev_confined: false,
            vaccinated: false,
            infections_caused: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn pos(&self) -> [f64; 2] {
        self.pos
    }

    pub fn vel(&self) -> [f64; 2] {
        self.vel
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    pub fn is_infected(&self) -> bool {
        self.state.is_infected()
    }

    pub fn infection_time(&self) -> Option<f64> {
        self.infection_time
    }

    pub fn incubation(&self) -> f64 {
        self.incubation
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    pub fn is_prev_confined(&self) -> bool {
        self.prev_confined
    }

    pub fn is_vaccinated(&self) -> bool {
        self.vaccinated
    }

    pub fn infections_caused(&self) -> usize {
        self.infections_caused
    }

    /// Euler step of the position.
    pub fn advance_position(&mut self, dt: f64) {
        self.pos[0] += self.vel[0] * dt;
        self.pos[1] += self.vel[1] * dt;
    }

    /// Negate the velocity component along `axis`.
    pub fn reflect(&mut self, axis: Axis) {
        match axis {
            Axis::X => self.vel[0] = -self.vel[0],
            Axis::Y => self.vel[1] = -self.vel[1],
        }
    }

    pub fn freeze(&mut self) {
        self.vel = [0.0, 0.0];
    }

    pub fn set_vel(&mut self, vel: [f64; 2]) {
        self.vel = vel;
    }

    pub fn displace(&mut self, delta: [f64; 2]) {
        self.pos[0] += delta[0];
        self.pos[1] += delta[1];
    }

    /// Freeze the particle for the whole run.
    pub fn confine_preventively(&mut self) {
        self.freeze();
        self.prev_confined = true;
    }

    pub fn vaccinate(&mut self) {
        self.vaccinated = true;
    }

    pub fn can_be_infected(&self) -> bool {
        self.state == HealthState::Healthy && !self.is_vaccinated()
    }

    /// Healthy -> InfectedAsymptomatic.
    pub fn infect(&mut self, time: f64, incubation: f64) -> Result<()> {
        if !self.can_be_infected() {
            bail!(
                "particle {} cannot be infected (state {:?}, vaccinated {})",
                self.id,
                self.state,
                self.vaccinated
            );
        }
        self.state = HealthState::InfectedAsymptomatic;
        self.infection_time = Some(time);
        self.incubation = incubation;
        Ok(())
    }

    /// InfectedAsymptomatic -> InfectedSymptomatic.
    pub fn develop_symptoms(&mut self, outcome: Outcome) -> Result<()> {
        if self.state != HealthState::InfectedAsymptomatic {
            bail!(
                "particle {} cannot develop symptoms from state {:?}",
                self.id,
                self.state
            );
        }
        self.state = HealthState::InfectedSymptomatic;
        self.outcome = Some(outcome);
        Ok(())
    }

    /// InfectedSymptomatic -> Recovered.
    pub fn recover(&mut self) -> Result<()> {
        self.conclude(false)?;
        self.state = HealthState::Recovered;
        Ok(())
    }

    /// InfectedSymptomatic -> Dead.
    pub fn die(&mut self) -> Result<()> {
        self.conclude(true)?;
        self.state = HealthState::Dead;
        Ok(())
    }

    fn conclude(&self, death: bool) -> Result<()> {
        if self.state != HealthState::InfectedSymptomatic {
            bail!(
                "particle {} cannot conclude its disease from state {:?}",
                self.id,
                self.state
            );
        }
        match self.outcome {
            Some(outcome) if outcome.will_die == death => Ok(()),
            _ => bail!(
                "particle {} outcome {:?} does not allow this conclusion",
                self.id,
                self.outcome
            ),
        }
    }

    pub fn record_infection(&mut self) {
        self.infections_caused += 1;
    }

    /// Time of symptom onset, if infected.
    pub fn onset_time(&self) -> Option<f64> {
        self.infection_time.map(|time| time + self.incubation)
    }
}
