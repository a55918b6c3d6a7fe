use crate::config::Config;
use crate::model::HealthState;
use crate::population::Snapshot;
use crate::sampler::{SampledDuration, Stage, StageSamplers};
use crate::stats::Accumulator;
use anyhow::{Context, Result};
use rmp_serde::decode;
use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter},
    path::Path,
};

pub trait Obs {
    fn update(&mut self, snapshot: &Snapshot) -> Result<()>;
    fn report(&self) -> serde_json::Value;
}

/// Number of particles per health state code.
fn count_states(snapshot: &Snapshot) -> [usize; 5] {
    let mut counts = [0; 5];
    for part in &snapshot.particles {
        if let Some(count) = counts.get_mut(part.state as usize) {
            *count += 1;
        }
    }
    counts
}

fn code(state: HealthState) -> usize {
    state.code() as usize
}

/// Population and R curves over time.
pub struct Curves {
    n_initial: usize,
    time: Vec<f64>,
    healthy: Vec<usize>,
    asymptomatic: Vec<usize>,
    symptomatic: Vec<usize>,
    recovered: Vec<usize>,
    dead: Vec<usize>,
    r_factor: Vec<f64>,
}

impl Curves {
    pub fn new(cfg: &Config) -> Self {
        Self {
            n_initial: cfg.model.population_size,
            time: Vec::new(),
            healthy: Vec::new(),
            asymptomatic: Vec::new(),
            symptomatic: Vec::new(),
            recovered: Vec::new(),
            dead: Vec::new(),
            r_factor: Vec::new(),
        }
    }
}

impl Obs for Curves {
    fn update(&mut self, snapshot: &Snapshot) -> Result<()> {
        let counts = count_states(snapshot);
        self.time.push(snapshot.time);
        self.healthy.push(counts[code(HealthState::Healthy)]);
        self.asymptomatic
            .push(counts[code(HealthState::InfectedAsymptomatic)]);
        self.symptomatic
            .push(counts[code(HealthState::InfectedSymptomatic)]);
        self.recovered.push(counts[code(HealthState::Recovered)]);
        self.dead
            .push(self.n_initial.saturating_sub(snapshot.particles.len()));
        self.r_factor.push(snapshot.r_factor);
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({
            "curves": {
                "time": self.time,
                "healthy": self.healthy,
                "asymptomatic": self.asymptomatic,
                "symptomatic": self.symptomatic,
                "recovered": self.recovered,
                "dead": self.dead,
                "r_factor": self.r_factor,
            }
        })
    }
}

/// Summary of the outbreak.
pub struct Outbreak {
    n_initial: usize,
    peak_infected: usize,
    peak_time: f64,
    final_time: f64,
    deaths: usize,
    recovered: usize,
    r_factor: Accumulator,
    max_r_factor: f64,
}

impl Outbreak {
    pub fn new(cfg: &Config) -> Self {
        Self {
            n_initial: cfg.model.population_size,
            peak_infected: 0,
            peak_time: 0.0,
            final_time: 0.0,
            deaths: 0,
            recovered: 0,
            r_factor: Accumulator::new(),
            max_r_factor: 0.0,
        }
    }
}

impl Obs for Outbreak {
    fn update(&mut self, snapshot: &Snapshot) -> Result<()> {
        let counts = count_states(snapshot);
        let infected = counts[code(HealthState::InfectedAsymptomatic)]
            + counts[code(HealthState::InfectedSymptomatic)];
        if infected > self.peak_infected {
            self.peak_infected = infected;
            self.peak_time = snapshot.time;
        }
        if infected > 0 {
            self.r_factor.add(snapshot.r_factor);
            self.max_r_factor = self.max_r_factor.max(snapshot.r_factor);
        }
        self.final_time = snapshot.time;
        self.deaths = self.n_initial.saturating_sub(snapshot.particles.len());
        self.recovered = counts[code(HealthState::Recovered)];
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({
            "outbreak": {
                "peak_infected": self.peak_infected,
                "peak_time": self.peak_time,
                "final_time": self.final_time,
                "deaths": self.deaths,
                "recovered": self.recovered,
                "r_factor": self.r_factor.report(),
                "max_r_factor": self.max_r_factor,
            }
        })
    }
}

/// Sampled stage durations compared with the configured laws.
pub struct StageDurations {
    expected: [f64; 3],
    acc_vec: [Accumulator; 3],
}

const STAGES: [Stage; 3] = [Stage::Incubation, Stage::Death, Stage::Recovery];

impl StageDurations {
    pub fn new(cfg: &Config) -> Result<Self> {
        let samplers = StageSamplers::new(&cfg.disease)?;
        Ok(Self {
            expected: STAGES.map(|stage| samplers.get(stage).mean()),
            acc_vec: Default::default(),
        })
    }

    pub fn add(&mut self, sampled: &SampledDuration) {
        let i_stage = match sampled.stage {
            Stage::Incubation => 0,
            Stage::Death => 1,
            Stage::Recovery => 2,
        };
        self.acc_vec[i_stage].add(sampled.value);
    }

    pub fn report(&self) -> serde_json::Value {
        let reports: Vec<_> = STAGES
            .iter()
            .zip(self.expected.iter().zip(&self.acc_vec))
            .map(|(stage, (expected, acc))| {
                serde_json::json!({
                    "stage": format!("{stage:?}"),
                    "expected_mean": expected,
                    "sampled": acc.report(),
                })
            })
            .collect();
        serde_json::json!({ "durations": reports })
    }
}

pub struct Analyzer {
    obs_ptr_vec: Vec<Box<dyn Obs>>,
    durations: StageDurations,
}

impl Analyzer {
    pub fn new(cfg: &Config) -> Result<Self> {
        let obs_ptr_vec: Vec<Box<dyn Obs>> =
            vec![Box::new(Curves::new(cfg)), Box::new(Outbreak::new(cfg))];
        let durations = StageDurations::new(cfg).context("failed to construct durations")?;
        Ok(Self {
            obs_ptr_vec,
            durations,
        })
    }

    pub fn add_trajectory_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let mut reader = open_reader(file)?;

        while !reader.fill_buf().context("failed to read file")?.is_empty() {
            let snapshot: Snapshot =
                decode::from_read(&mut reader).context("failed to read snapshot")?;
            for obs in &mut self.obs_ptr_vec {
                obs.update(&snapshot).context("failed to update observable")?;
            }
        }
        Ok(())
    }

    pub fn add_durations_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let mut reader = open_reader(file)?;

        while !reader.fill_buf().context("failed to read file")?.is_empty() {
            let sampled_vec: Vec<SampledDuration> =
                decode::from_read(&mut reader).context("failed to read sampled durations")?;
            for sampled in &sampled_vec {
                self.durations.add(sampled);
            }
        }
        Ok(())
    }

    pub fn save_results<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let writer = BufWriter::new(file);

        let mut reports: Vec<_> = self.obs_ptr_vec.iter().map(|obs| obs.report()).collect();
        reports.push(self.durations.report());
        serde_json::to_writer_pretty(writer, &reports).context("failed to write results")?;
        Ok(())
    }
}

fn open_reader<P: AsRef<Path>>(file: P) -> Result<BufReader<File>> {
    let file = file.as_ref();
    let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
    Ok(BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::population::ParticleRecord;

    fn snapshot(time: f64, states: &[u8], r_factor: f64) -> Snapshot {
        let particles = states
            .iter()
            .enumerate()
            .map(|(id, &state)| ParticleRecord {
                id,
                x: 0.0,
                y: 0.0,
                vx: 0.0,
                vy: 0.0,
                state,
            })
            .collect();
        Snapshot {
            time,
            step: 0,
            r_factor,
            particles,
        }
    }

    #[test]
    fn outbreak_tracks_peak_and_deaths() {
        let mut cfg = test_config();
        cfg.model.population_size = 4;
        let mut outbreak = Outbreak::new(&cfg);

        outbreak.update(&snapshot(0.0, &[1, 0, 0, 0], 0.0)).unwrap();
        outbreak.update(&snapshot(0.2, &[2, 1, 1, 0], 3.0)).unwrap();
        outbreak.update(&snapshot(0.4, &[3, 2, 0], 1.0)).unwrap();
        outbreak.update(&snapshot(0.6, &[3, 3, 0], 0.0)).unwrap();

        assert_eq!(outbreak.peak_infected, 3);
        assert_eq!(outbreak.peak_time, 0.2);
        assert_eq!(outbreak.final_time, 0.6);
        assert_eq!(outbreak.deaths, 1);
        assert_eq!(outbreak.recovered, 2);
        assert_eq!(outbreak.max_r_factor, 3.0);
        assert_eq!(outbreak.r_factor.report().n_vals, 3);
    }

    #[test]
    fn curves_count_states() {
        let mut cfg = test_config();
        cfg.model.population_size = 3;
        let mut curves = Curves::new(&cfg);
        curves.update(&snapshot(0.0, &[0, 1, 3], 0.5)).unwrap();
        curves.update(&snapshot(0.2, &[2, 3], 0.0)).unwrap();

        assert_eq!(curves.healthy, vec![1, 0]);
        assert_eq!(curves.asymptomatic, vec![1, 0]);
        assert_eq!(curves.symptomatic, vec![0, 1]);
        assert_eq!(curves.recovered, vec![1, 1]);
        assert_eq!(curves.dead, vec![0, 1]);
        assert_eq!(curves.r_factor, vec![0.5, 0.0]);
    }

    #[test]
    fn empty_durations_report_zero() {
        let durations = StageDurations::new(&test_config()).unwrap();
        let report = durations.report();
        for entry in report["durations"].as_array().unwrap() {
            assert_eq!(entry["sampled"]["mean"], 0.0);
            assert_eq!(entry["sampled"]["std_dev"], 0.0);
        }
        assert_eq!(report["durations"][0]["expected_mean"], 2.5);
    }
}
