use crate::config::Config;
use crate::epidemic::Disease;
use crate::model::HealthState;
use crate::population::Population;
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Simulation engine.
///
/// Holds the configuration, current population, and random number generator,
/// and provides methods to initialize, run, save, and load simulations.
#[derive(Serialize, Deserialize)]
pub struct Engine {
    cfg: Config,
    population: Population,
    rng: ChaCha12Rng,
    n_steps: usize,
    finished: bool,
}

impl Engine {
    /// Create a new `Engine` with the given configuration and a random initial state.
    ///
    /// With a configured seed, run `run_idx` uses the seed offset by its index.
    pub fn generate_initial_condition(cfg: Config, run_idx: usize) -> Result<Self> {
        let mut rng = match cfg.init.seed {
            Some(seed) => ChaCha12Rng::seed_from_u64(seed.wrapping_add(run_idx as u64)),
            None => ChaCha12Rng::try_from_os_rng()?,
        };

        let mut population =
            Population::new(&cfg, &mut rng).context("failed to construct population")?;
        population.set_preventive_confinement(cfg.policy.preventive_confinement);
        population.apply_vaccination(cfg.policy.vaccination);

        Ok(Self {
            cfg,
            population,
            rng,
            n_steps: 0,
            finished: false,
        })
    }

    pub fn cfg(&self) -> &Config {
        &self.cfg
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Perform the simulation and save the resulting snapshots to a binary file.
    ///
    /// Stops early, after saving a final snapshot, once the run is finished.
    /// Stage durations sampled meanwhile are written to `durations_file`.
    pub fn perform_simulation<P: AsRef<Path>, Q: AsRef<Path>>(
        &mut self,
        trajectory_file: P,
        durations_file: Q,
    ) -> Result<()> {
        let disease = Disease::new(&self.cfg).context("failed to construct disease")?;

        let mut trajectory_writer = create_writer(trajectory_file)?;
        let mut durations_writer = create_writer(durations_file)?;

        let n_initial = self.cfg.model.population_size;

        for i_save in 0..self.cfg.output.saves_per_file {
            for _ in 0..self.cfg.output.steps_per_save {
                self.perform_step(&disease)
                    .with_context(|| format!("failed to perform step {}", self.n_steps))?;
                if self.finished {
                    break;
                }
            }

            let (time, step) = self.last_step();
            let snapshot = self.population.snapshot(time, step);
            encode::write(&mut trajectory_writer, &snapshot)
                .context("failed to serialize snapshot")?;

            let sampled = self.population.drain_sampled();
            encode::write(&mut durations_writer, &sampled)
                .context("failed to serialize sampled durations")?;

            let progress = 100.0 * (i_save + 1) as f64 / self.cfg.output.saves_per_file as f64;
            log::info!(
                "completed {progress:06.2}% (t = {time:.2}, population = {}, infected = {}, deaths = {}, R = {:.3})",
                self.population.len(),
                self.population.count(HealthState::InfectedAsymptomatic)
                    + self.population.count(HealthState::InfectedSymptomatic),
                n_initial - self.population.len(),
                self.population.r_factor()
            );

            if self.finished {
                log::info!("epidemic ended at t = {time:.2} after {} steps", step + 1);
                break;
            }
        }

        trajectory_writer
            .flush()
            .context("failed to flush trajectory writer")?;
        durations_writer
            .flush()
            .context("failed to flush durations writer")?;

        Ok(())
    }

    /// Save a checkpoint of the entire engine state.
    ///
    /// Can be used to resume the simulation later.
    pub fn save_checkpoint<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let mut writer = create_writer(file)?;
        encode::write_named(&mut writer, &self).context("failed to serialize engine")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }

    /// Load a previously saved engine checkpoint.
    pub fn load_checkpoint<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);
        let engine = decode::from_read(&mut reader).context("failed to deserialize engine")?;
        Ok(engine)
    }

    fn perform_step(&mut self, disease: &Disease) -> Result<()> {
        let dt = self.cfg.model.dt;
        let time = self.n_steps as f64 * dt;

        self.population
            .step(time, dt, disease, &mut self.rng)
            .context("failed to advance population")?;
        self.n_steps += 1;

        log::debug!(
            "step {} at t = {time:.2}: population = {}, R = {:.3}",
            self.n_steps - 1,
            self.population.len(),
            self.population.r_factor()
        );

        // Stop once nobody is infected or the next step would pass the horizon.
        let next_time = self.n_steps as f64 * dt;
        let past_horizon = self
            .cfg
            .model
            .max_time
            .is_some_and(|max_time| next_time > max_time);
        self.finished = !self.population.is_anyone_infected() || past_horizon;

        Ok(())
    }

    /// Time and index of the last completed step.
    fn last_step(&self) -> (f64, usize) {
        let step = self.n_steps.saturating_sub(1);
        (step as f64 * self.cfg.model.dt, step)
    }
}

fn create_writer<P: AsRef<Path>>(file: P) -> Result<BufWriter<File>> {
    let file = file.as_ref();
    let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
    Ok(BufWriter::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DurationLaw;
    use crate::config::tests::test_config;
    use crate::population::Snapshot;
    use crate::sampler::SampledDuration;
    use std::{env, fs, io::BufRead, path::PathBuf};

    fn test_dir(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!("epicollide-engine-{name}"));
        fs::remove_dir_all(&dir).ok();
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn read_stream<T: serde::de::DeserializeOwned>(file: &Path) -> Vec<T> {
        let mut reader = BufReader::new(File::open(file).unwrap());
        let mut vals = Vec::new();
        while !reader.fill_buf().unwrap().is_empty() {
            vals.push(decode::from_read(&mut reader).unwrap());
        }
        vals
    }

    fn run_to_end(mut engine: Engine, dir: &Path) -> (Vec<Snapshot>, Vec<SampledDuration>) {
        let mut snapshots = Vec::new();
        let mut durations = Vec::new();
        let mut i_file = 0;
        while !engine.is_finished() {
            let trajectory = dir.join(format!("trajectory-{i_file}.msgpack"));
            let sampled = dir.join(format!("durations-{i_file}.msgpack"));
            engine.perform_simulation(&trajectory, &sampled).unwrap();
            snapshots.extend(read_stream::<Snapshot>(&trajectory));
            for chunk in read_stream::<Vec<SampledDuration>>(&sampled) {
                durations.extend(chunk);
            }
            i_file += 1;
            assert!(i_file < 1000, "run did not finish");
        }
        (snapshots, durations)
    }

    #[test]
    fn same_seed_gives_same_run() {
        let dir = test_dir("seed");
        let cfg = test_config();
        let (a, _) = run_to_end(Engine::generate_initial_condition(cfg.clone(), 0).unwrap(), &dir);
        let (b, _) = run_to_end(Engine::generate_initial_condition(cfg, 0).unwrap(), &dir);

        assert_eq!(a.len(), b.len());
        let last_a = a.last().unwrap();
        let last_b = b.last().unwrap();
        assert_eq!(last_a.step, last_b.step);
        assert_eq!(last_a.particles.len(), last_b.particles.len());
        for (pa, pb) in last_a.particles.iter().zip(&last_b.particles) {
            assert_eq!((pa.id, pa.x, pa.y, pa.state), (pb.id, pb.x, pb.y, pb.state));
        }
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn zero_mortality_run_ends_by_recovery() {
        let dir = test_dir("mortality");
        let mut cfg = test_config();
        cfg.disease.mortality_rate = 0.0;
        let engine = Engine::generate_initial_condition(cfg.clone(), 0).unwrap();
        let (snapshots, durations) = run_to_end(engine, &dir);

        for (i_snap, snap) in snapshots.iter().enumerate() {
            assert_eq!(snap.step, i_snap);
            assert_eq!(snap.particles.len(), cfg.model.population_size);
            assert!(snap.particles.iter().all(|p| p.state != 4));
        }
        let last = snapshots.last().unwrap();
        assert!(last.particles.iter().all(|p| p.state != 1 && p.state != 2));
        assert!(last.particles.iter().any(|p| p.state == 3));
        assert_eq!(last.r_factor, 0.0);
        assert!(!durations.is_empty());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn full_confinement_keeps_everyone_still() {
        let dir = test_dir("confinement");
        let mut cfg = test_config();
        cfg.policy.preventive_confinement = 1.0;
        let engine = Engine::generate_initial_condition(cfg, 0).unwrap();
        let (snapshots, _) = run_to_end(engine, &dir);

        let first = &snapshots[0];
        for snap in &snapshots {
            for (part, part_0) in snap.particles.iter().zip(&first.particles) {
                assert_eq!((part.vx, part.vy), (0.0, 0.0));
                assert_eq!(part.id, part_0.id);
            }
        }
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn full_vaccination_stops_spread() {
        let dir = test_dir("vaccination");
        let mut cfg = test_config();
        cfg.model.population_size = 100;
        cfg.model.radius = 0.05;
        cfg.policy.vaccination = 1.0;
        let engine = Engine::generate_initial_condition(cfg.clone(), 0).unwrap();
        let (snapshots, durations) = run_to_end(engine, &dir);

        for snap in &snapshots {
            let n_infected = snap.particles.iter().filter(|p| p.state == 1 || p.state == 2).count();
            assert!(n_infected <= 1);
            assert!(snap.particles.len() >= cfg.model.population_size - 1);
        }
        // Only the outcome duration of patient zero was ever sampled.
        assert_eq!(durations.len(), 1);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn horizon_stops_the_run() {
        let dir = test_dir("horizon");
        let mut cfg = test_config();
        cfg.model.max_time = Some(1.0);
        cfg.disease.recovery_after_symptoms = DurationLaw::Range { min: 50.0, max: 60.0 };
        cfg.disease.death_after_symptoms = DurationLaw::Range { min: 50.0, max: 60.0 };
        let engine = Engine::generate_initial_condition(cfg, 0).unwrap();
        let (snapshots, _) = run_to_end(engine, &dir);

        let last = snapshots.last().unwrap();
        assert_eq!(last.step, 5);
        assert!(last.time <= 1.0 + 1e-9);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn checkpoint_round_trip_resumes() {
        let dir = test_dir("checkpoint");
        let mut cfg = test_config();
        cfg.output.saves_per_file = 3;
        let mut engine = Engine::generate_initial_condition(cfg.clone(), 0).unwrap();
        engine
            .perform_simulation(dir.join("t0.msgpack"), dir.join("d0.msgpack"))
            .unwrap();
        engine.save_checkpoint(dir.join("checkpoint.msgpack")).unwrap();

        let mut resumed = Engine::load_checkpoint(dir.join("checkpoint.msgpack")).unwrap();
        assert_eq!(resumed.cfg(), &cfg);
        assert_eq!(resumed.n_steps, 3);
        resumed
            .perform_simulation(dir.join("t1.msgpack"), dir.join("d1.msgpack"))
            .unwrap();
        let snapshots: Vec<Snapshot> = read_stream(&dir.join("t1.msgpack"));
        assert_eq!(snapshots[0].step, 3);
        fs::remove_dir_all(&dir).ok();
    }
}
