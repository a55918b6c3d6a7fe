use std::{
    env, fs,
    path::{Path, PathBuf},
    process::{Command, Output},
};

const CONFIG: &str = r#"
[model]
population_size = 120
domain = [1.0, 1.0]
radius = 0.02
initial_momentum = 0.05
dt = 0.2

[disease]
contact_prob = 0.8
mortality_rate = 0.1
incubation = { min = 1.0, max = 4.0 }
death_after_symptoms = { family = "gamma", mean = 2.0, std_dev = 0.5 }
recovery_after_symptoms = { family = "lognormal", mean = 4.0, std_dev = 1.0 }

[policy]
symptomatic_confinement = true

[init]
seed = 42
patients_zero = [[0.5, 0.5]]

[output]
steps_per_save = 2
saves_per_file = 16
"#;

fn setup_dir(name: &str, config: &str) -> PathBuf {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join(name);

    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");
    fs::write(test_dir.join("config.toml"), config).expect("failed to write config file");

    test_dir
}

fn run_bin(sim_dir: &Path, args: &[&str]) -> Output {
    let bin = PathBuf::from(env!("CARGO_BIN_EXE_epicollide"));
    let sim_dir = sim_dir
        .to_str()
        .expect("failed to convert test directory to string");

    Command::new(bin)
        .arg("--sim-dir")
        .arg(sim_dir)
        .args(args)
        .output()
        .expect("failed to execute command")
}

fn assert_success(output: &Output, args: &[&str]) {
    let stdout_str = String::from_utf8_lossy(&output.stdout);
    let stderr_str = String::from_utf8_lossy(&output.stderr);
    assert!(
        output.status.success(),
        "failed to run binary with {args:?}\nstdout:\n{stdout_str}\nstderr:\n{stderr_str}\n"
    );
}

#[test]
fn basic_workflow() {
    let test_dir = setup_dir("basic_workflow", CONFIG);

    for args in [
        &["create"][..],
        &["create", "--to-end"],
        &["resume", "--run-idx", "0"],
        &["resume", "--run-idx", "0", "--to-end"],
        &["resume", "--run-idx", "0"],
        &["resume", "--run-idx", "1"],
        &["analyze"],
    ] {
        assert_success(&run_bin(&test_dir, args), args);
    }

    for run in ["run-0000", "run-0001"] {
        let run_dir = test_dir.join(run);
        assert!(run_dir.join("checkpoint.msgpack").is_file());
        assert!(run_dir.join("trajectory-0000.msgpack").is_file());
        assert!(run_dir.join("durations-0000.msgpack").is_file());

        let results = fs::read_to_string(run_dir.join("results.json"))
            .expect("failed to read results file");
        let results: serde_json::Value =
            serde_json::from_str(&results).expect("failed to parse results file");
        let outbreak = &results[1]["outbreak"];
        assert!(outbreak["peak_infected"].as_u64().unwrap() >= 1);
        assert_eq!(results[2]["durations"].as_array().unwrap().len(), 3);
    }

    // Run 0 was simulated to the end: its last snapshot has no infected particle.
    let results = fs::read_to_string(test_dir.join("run-0000").join("results.json")).unwrap();
    let results: serde_json::Value = serde_json::from_str(&results).unwrap();
    let curves = &results[0]["curves"];
    let asymptomatic = curves["asymptomatic"].as_array().unwrap();
    let symptomatic = curves["symptomatic"].as_array().unwrap();
    assert_eq!(asymptomatic.last().unwrap(), 0);
    assert_eq!(symptomatic.last().unwrap(), 0);

    assert_success(&run_bin(&test_dir, &["clean"]), &["clean"]);
    assert!(!test_dir.join("run-0000").exists());
    assert!(!test_dir.join("run-0001").exists());

    fs::remove_dir_all(&test_dir).ok();
}

#[test]
fn invalid_config_is_rejected() {
    let config = CONFIG.replace("contact_prob = 0.8", "contact_prob = 1.8");
    let test_dir = setup_dir("invalid_config", &config);

    let output = run_bin(&test_dir, &["create"]);
    assert!(!output.status.success());
    assert!(!test_dir.join("run-0000").exists());

    fs::remove_dir_all(&test_dir).ok();
}

#[test]
fn resume_of_missing_run_fails() {
    let test_dir = setup_dir("missing_run", CONFIG);

    let output = run_bin(&test_dir, &["resume", "--run-idx", "3"]);
    assert!(!output.status.success());

    fs::remove_dir_all(&test_dir).ok();
}
