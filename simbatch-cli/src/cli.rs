//! Application definition.

extern crate simplelog;

use std::env;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{App, Arg, ArgGroup, ArgMatches};
use colored::*;
use simbatch_core::job::DEFAULT_PACKAGES_DIR;
use simbatch_core::{ConditionReplay, JobSet, Package};
use simbatch_net::{ExecutionReport, JobOutcome, Manager, RunFlags, RunMode, SimulatorWorker};

use crate::config::Config;

pub const VERSION: &'static str = env!("CARGO_PKG_VERSION");
pub const AUTHORS: &'static str = env!("CARGO_PKG_AUTHORS");

/// Output plugins installed next to the binary, relative to its directory.
const INSTALL_STREAMS_DIR: &str = "../lib/simbatch/streams";

pub fn app<'a, 'b>() -> App<'a, 'b> {
    App::new("simbatch")
        .version(VERSION)
        .author(AUTHORS)
        .about("Run batches of simulation experiments, locally or on simulator workers.")
        .arg(Arg::with_name("files")
            .value_name("FILES")
            .multiple(true)
            .help("Experiment files to run"))
        .arg(Arg::with_name("manager")
            .short("m")
            .long("manager")
            .help("Distribute the experiments over the configured workers"))
        .arg(Arg::with_name("simulator")
            .short("s")
            .long("simulator")
            .help("Serve experiments for a manager until interrupted"))
        .arg(Arg::with_name("justrun")
            .short("j")
            .long("justrun")
            .help("Run every experiment in this process, one after another (default)"))
        .group(ArgGroup::with_name("mode")
            .args(&["manager", "simulator", "justrun"]))
        .arg(Arg::with_name("allinlocal")
            .short("l")
            .long("allinlocal")
            .help("In manager mode, run every experiment locally"))
        .arg(Arg::with_name("save-result")
            .short("o")
            .long("save-result")
            .help("Write the post-run experiment back to its file"))
        .arg(Arg::with_name("processor")
            .short("n")
            .long("processor")
            .takes_value(true)
            .value_name("N")
            .help("Number of experiments running at the same time"))
        .arg(Arg::with_name("port")
            .short("p")
            .long("port")
            .takes_value(true)
            .value_name("PORT")
            .help("Port the simulator listens on"))
        .arg(Arg::with_name("package")
            .short("P")
            .long("package")
            .takes_value(true)
            .value_name("NAME")
            .help("Resolve experiment files in the given package"))
        .arg(Arg::with_name("path")
            .long("path")
            .takes_value(true)
            .multiple(true)
            .number_of_values(1)
            .value_name("DIR")
            .help("Add a directory to every plugin search path"))
        .arg(Arg::with_name("path-stream")
            .long("path-stream")
            .takes_value(true)
            .multiple(true)
            .number_of_values(1)
            .value_name("DIR")
            .help("Add a directory to the output plugin search path"))
        .arg(Arg::with_name("config")
            .long("config")
            .takes_value(true)
            .value_name("PATH")
            .help("Path to the configuration file (defaults to ./simbatch.toml)"))
        .arg(Arg::with_name("verbosity")
            .long("verbosity")
            .short("v")
            .takes_value(true)
            .default_value("warn")
            .value_name("verb")
            .help("Set the verbosity of the log output"))
}

pub fn app_matches() -> ArgMatches<'static> {
    app().get_matches()
}

/// Runs the program, returning whether every job completed.
pub fn start(matches: ArgMatches) -> Result<bool> {
    setup_log_verbosity(&matches);
    let mut config = Config::load(matches.value_of("config"))?;
    apply_overrides(&mut config, &matches)?;

    let package = match matches.value_of("package") {
        Some(name) => Some(package(name, &config)?),
        None => None,
    };
    let stream_dirs = stream_search_dirs(&matches, &config, package.as_ref());
    debug!("output plugin search dirs: {:?}", stream_dirs);
    let simulator = ConditionReplay::with_search_dirs(stream_dirs);

    let mode = run_mode(&matches);
    if mode == RunMode::Simulator {
        start_simulator(simulator, &config)?;
        return Ok(true);
    }

    let current_dir = env::current_dir()?;
    let files: Vec<String> = match (matches.values_of("files"), &package) {
        (Some(files), _) => files.map(|f| f.to_string()).collect(),
        (None, Some(package)) => package
            .experiments()
            .into_iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect(),
        (None, None) => Vec::new(),
    };
    if files.is_empty() {
        warn!("no experiment files given");
        return Ok(true);
    }
    let jobs = JobSet::from_args(&files, &current_dir, package.as_ref())?;

    let manager = Manager::new(simulator)
        .with_endpoints(config.endpoints()?)
        .with_timeout(config.timeout());
    let report = manager.run(&jobs, mode, &run_flags(&matches, &config))?;
    print_report(&jobs, &report);
    Ok(report.success())
}

fn setup_log_verbosity(matches: &ArgMatches) {
    use self::simplelog::{LevelFilter, TermLogger};
    let level_filter = match matches.value_of("verbosity") {
        Some(s) => match s {
            "0" | "none" => LevelFilter::Off,
            "1" | "err" | "error" | "min" => LevelFilter::Error,
            "2" | "warn" | "warning" | "default" => LevelFilter::Warn,
            "3" | "info" => LevelFilter::Info,
            "4" | "debug" => LevelFilter::Debug,
            "5" | "trace" | "max" | "all" => LevelFilter::Trace,
            _ => LevelFilter::Warn,
        },
        _ => LevelFilter::Warn,
    };
    let mut config_builder = simplelog::ConfigBuilder::new();
    let logger_conf = config_builder
        .set_time_level(LevelFilter::Error)
        .set_target_level(LevelFilter::Debug)
        .set_location_level(LevelFilter::Error)
        .set_time_format_str("%H:%M:%S%.6f")
        .build();
    let _ = TermLogger::init(level_filter, logger_conf, simplelog::TerminalMode::Mixed);
}

/// Command line values take precedence over the config file.
fn apply_overrides(config: &mut Config, matches: &ArgMatches) -> Result<()> {
    if let Some(n) = matches.value_of("processor") {
        config.manager.worker_count = n
            .parse()
            .with_context(|| format!("invalid processor count '{}'", n))?;
    }
    if let Some(port) = matches.value_of("port") {
        config.simulator.port = port
            .parse()
            .with_context(|| format!("invalid port '{}'", port))?;
    }
    Ok(())
}

fn run_mode(matches: &ArgMatches) -> RunMode {
    if matches.is_present("simulator") {
        RunMode::Simulator
    } else if matches.is_present("manager") {
        RunMode::Manager
    } else {
        RunMode::Local
    }
}

fn run_flags(matches: &ArgMatches, config: &Config) -> RunFlags {
    RunFlags {
        all_in_local: matches.is_present("allinlocal"),
        save_result: matches.is_present("save-result"),
        worker_count: config.manager.worker_count.max(1),
    }
}

fn package(name: &str, config: &Config) -> Result<Package> {
    let package = match &config.paths.packages {
        Some(root) => Package::new(name, root),
        None => Package::in_home(name)
            .with_context(|| format!("failed locating {}", DEFAULT_PACKAGES_DIR))?,
    };
    if !package.dir().is_dir() {
        return Err(anyhow::anyhow!(
            "package '{}' not found in {}",
            name,
            package.root.display()
        ));
    }
    Ok(package)
}

/// Output plugin directories, in search order.
fn stream_search_dirs(
    matches: &ArgMatches,
    config: &Config,
    package: Option<&Package>,
) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    for arg in &["path-stream", "path"] {
        if let Some(values) = matches.values_of(arg) {
            dirs.extend(values.map(PathBuf::from));
        }
    }
    dirs.extend(config.paths.streams.iter().cloned());
    if let Some(package) = package {
        dirs.push(package.dir().join("plugins").join("output"));
    }
    if let Some(dir) = install_dir() {
        dirs.push(dir.join(INSTALL_STREAMS_DIR));
    }
    dirs
}

fn install_dir() -> Option<PathBuf> {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}

fn start_simulator(simulator: ConditionReplay, config: &Config) -> Result<()> {
    let port = config.simulator.port;
    let mut worker = SimulatorWorker::bind_with_backlog(port, config.simulator.backlog, simulator)
        .with_context(|| format!("failed binding simulator to port {}", port))?;
    println!("Simulator listening on port {}", worker.local_port()?);

    // run a loop allowing graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("failed setting Ctrl-C handler")?;

    worker.serve_until(&running)?;
    println!("Simulator stopped");
    Ok(())
}

fn print_report(jobs: &JobSet, report: &ExecutionReport) {
    for (job, outcome) in jobs.iter().zip(report.outcomes()) {
        match outcome {
            JobOutcome::Completed(_) => println!("{} {}", "ok".green(), job),
            JobOutcome::Failed(failure) => println!("{} {}: {}", "failed".red(), job, failure),
        }
    }
    let summary = format!(
        "{} job(s): {} completed, {} failed in {:.2?}",
        report.len(),
        report.completed(),
        report.failed(),
        report.elapsed()
    );
    if report.success() {
        println!("{}", summary);
    } else {
        println!("{}", summary.yellow());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simbatch_core::{Experiment, Value};

    fn matches(args: &[&str]) -> ArgMatches<'static> {
        let mut argv = vec!["simbatch"];
        argv.extend_from_slice(args);
        app().get_matches_from(argv)
    }

    #[test]
    fn mode_selection() {
        assert_eq!(run_mode(&matches(&[])), RunMode::Local);
        assert_eq!(run_mode(&matches(&["-j"])), RunMode::Local);
        assert_eq!(run_mode(&matches(&["-m"])), RunMode::Manager);
        assert_eq!(run_mode(&matches(&["--simulator"])), RunMode::Simulator);
        assert!(app()
            .get_matches_from_safe(vec!["simbatch", "-m", "-s"])
            .is_err());
    }

    #[test]
    fn flags_override_config() {
        let m = matches(&["-m", "-l", "-o", "-n", "4", "-p", "9000", "a.exp"]);
        let mut config = Config::default();
        apply_overrides(&mut config, &m).unwrap();
        assert_eq!(config.simulator.port, 9000);
        assert_eq!(
            run_flags(&m, &config),
            RunFlags {
                all_in_local: true,
                save_result: true,
                worker_count: 4,
            }
        );

        let bad = matches(&["-n", "many"]);
        assert!(apply_overrides(&mut Config::default(), &bad).is_err());
    }

    #[test]
    fn stream_dirs_keep_search_order() {
        let m = matches(&["--path-stream", "/a", "--path", "/b", "--path-stream", "/c"]);
        let mut config = Config::default();
        config.paths.streams.push(PathBuf::from("/d"));
        let package = Package::new("pkg", "/pkgs");
        let dirs = stream_search_dirs(&m, &config, Some(&package));
        assert_eq!(
            &dirs[..5],
            &[
                PathBuf::from("/a"),
                PathBuf::from("/c"),
                PathBuf::from("/b"),
                PathBuf::from("/d"),
                PathBuf::from("/pkgs/pkg/plugins/output"),
            ]
        );
    }

    #[test]
    fn just_run_saves_results() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.exp");
        Experiment::new("a", 5.).unwrap().write_to(&path).unwrap();
        let config = dir.path().join("none.toml");
        std::fs::write(&config, "").unwrap();

        let m = matches(&[
            "-j",
            "-o",
            "--config",
            config.to_str().unwrap(),
            path.to_str().unwrap(),
        ]);
        assert!(start(m).unwrap());

        let saved = Experiment::from_path(&path).unwrap();
        let results = saved.results.unwrap();
        assert_eq!(results.as_map().unwrap()["name"], Value::from("a"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("none.toml");
        std::fs::write(&config, "").unwrap();
        let missing = dir.path().join("missing.exp");
        let m = matches(&["--config", config.to_str().unwrap(), missing.to_str().unwrap()]);
        assert!(start(m).is_err());
    }

    #[test]
    fn package_experiments_are_the_default_job_set() {
        let dir = tempfile::tempdir().unwrap();
        let package = Package::new("pkg", dir.path());
        std::fs::create_dir_all(package.exp_dir()).unwrap();
        for name in &["x", "y"] {
            Experiment::new(name, 1.)
                .unwrap()
                .write_to(&package.exp_dir().join(format!("{}.exp", name)))
                .unwrap();
        }
        let config = dir.path().join("simbatch.toml");
        std::fs::write(
            &config,
            format!("[paths]\npackages = {:?}\n", dir.path().to_str().unwrap()),
        )
        .unwrap();

        let m = matches(&["-P", "pkg", "--config", config.to_str().unwrap()]);
        assert!(start(m).unwrap());

        let m = matches(&["-P", "nope", "--config", config.to_str().unwrap()]);
        assert!(start(m).is_err());
    }
}
