//! Execution manager.
//!
//! Turns a job set into an [`ExecutionReport`], running every job either
//! through the local simulation capability or on remote simulator workers.
//! A failed job never stops the others, and the report always holds one
//! outcome per job in job set order.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use simbatch_core::{Experiment, Job, JobSet, JobState, Simulator, Value};

use crate::error::{Error, Result};
use crate::frame;
use crate::msg::{
    ErrorResponse, MessageType, RemoteErrorKind, RunExperimentRequest, RunExperimentResponse,
};
use crate::transport::Socket;

/// Address of a simulator worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: &str, port: u16) -> Self {
        Endpoint {
            host: host.to_string(),
            port,
        }
    }
}

impl FromStr for Endpoint {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidEndpoint(s.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| Error::InvalidEndpoint(s.to_string()))?;
        if host.is_empty() {
            return Err(Error::InvalidEndpoint(s.to_string()));
        }
        Ok(Endpoint::new(host, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Run every job in this process, one after another.
    Local,
    /// Distribute jobs over the configured workers.
    Manager,
    /// Serve jobs for a manager. Not a job set mode, see
    /// [`SimulatorWorker`](crate::SimulatorWorker).
    Simulator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFlags {
    /// Run locally even when workers are configured.
    pub all_in_local: bool,
    /// Write the post-run experiment state back to each job's file.
    pub save_result: bool,
    /// Number of jobs running at the same time.
    pub worker_count: usize,
}

impl Default for RunFlags {
    fn default() -> Self {
        RunFlags {
            all_in_local: false,
            save_result: false,
            worker_count: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Connection,
    Protocol,
    Simulation,
    Io,
}

/// Reason a job failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl ToString) -> Self {
        Failure {
            kind,
            message: message.to_string(),
        }
    }

    /// Classifies an error raised while talking to a worker.
    fn from_exchange(error: Error) -> Self {
        let kind = match &error {
            Error::Remote {
                kind: RemoteErrorKind::Simulation,
                ..
            } => FailureKind::Simulation,
            Error::Remote { .. } => FailureKind::Protocol,
            e if e.is_protocol_error() => FailureKind::Protocol,
            _ => FailureKind::Connection,
        };
        let message = match error {
            Error::Remote { message, .. } => message,
            e => e.to_string(),
        };
        Failure { kind, message }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} error: {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(Value),
    Failed(Failure),
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed(_))
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            JobOutcome::Failed(f) => Some(f),
            _ => None,
        }
    }
}

/// Outcome of a whole run, one entry per job in job set order.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    success: bool,
    outcomes: Vec<JobOutcome>,
    elapsed: Duration,
}

impl ExecutionReport {
    /// True only if every job completed.
    pub fn success(&self) -> bool {
        self.success
    }

    pub fn outcomes(&self) -> &[JobOutcome] {
        &self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn completed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_completed()).count()
    }

    pub fn failed(&self) -> usize {
        self.len() - self.completed()
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

/// Collects outcomes as they arrive. Every cell is written exactly once.
pub struct ReportBuilder {
    cells: Vec<Option<JobOutcome>>,
    started: Instant,
}

impl ReportBuilder {
    pub fn new(len: usize) -> Self {
        ReportBuilder {
            cells: vec![None; len],
            started: Instant::now(),
        }
    }

    pub fn record(&mut self, index: usize, outcome: JobOutcome) -> Result<()> {
        let cell = self
            .cells
            .get_mut(index)
            .ok_or_else(|| Error::Other(format!("no job with index {}", index)))?;
        if cell.is_some() {
            return Err(Error::Other(format!(
                "outcome of job {} recorded twice",
                index
            )));
        }
        *cell = Some(outcome);
        Ok(())
    }

    pub fn finish(self) -> Result<ExecutionReport> {
        let elapsed = self.started.elapsed();
        let mut outcomes = Vec::with_capacity(self.cells.len());
        for (index, cell) in self.cells.into_iter().enumerate() {
            outcomes.push(
                cell.ok_or_else(|| Error::Other(format!("job {} has no outcome", index)))?,
            );
        }
        Ok(ExecutionReport {
            success: outcomes.iter().all(|o| o.is_completed()),
            outcomes,
            elapsed,
        })
    }
}

/// Free endpoints, handed out in FIFO order.
struct EndpointPool {
    free: Mutex<VecDeque<usize>>,
    released: Condvar,
}

impl EndpointPool {
    fn new(count: usize) -> Self {
        EndpointPool {
            free: Mutex::new((0..count).collect()),
            released: Condvar::new(),
        }
    }

    /// Blocks until an endpoint with no job in flight is available.
    fn acquire(&self) -> Result<usize> {
        let mut free = self.free.lock().map_err(|_| poisoned())?;
        loop {
            if let Some(index) = free.pop_front() {
                return Ok(index);
            }
            free = self.released.wait(free).map_err(|_| poisoned())?;
        }
    }

    fn release(&self, index: usize) {
        if let Ok(mut free) = self.free.lock() {
            free.push_back(index);
        }
        self.released.notify_one();
    }
}

fn poisoned() -> Error {
    Error::Other("endpoint pool lock poisoned".to_string())
}

/// Where a single job runs.
#[derive(Clone, Copy)]
enum Target<'a> {
    Local,
    Remote(&'a Endpoint),
}

pub struct Manager<S: Simulator> {
    simulator: S,
    endpoints: Vec<Endpoint>,
    timeout: Option<Duration>,
    compress: bool,
}

impl<S: Simulator> Manager<S> {
    pub fn new(simulator: S) -> Self {
        Manager {
            simulator,
            endpoints: Vec::new(),
            timeout: None,
            compress: cfg!(feature = "lz4"),
        }
    }

    pub fn with_endpoints(mut self, endpoints: Vec<Endpoint>) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Bounds every blocking read and write on worker connections.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Runs every job of the set and reports all outcomes.
    pub fn run(&self, jobs: &JobSet, mode: RunMode, flags: &RunFlags) -> Result<ExecutionReport> {
        match mode {
            RunMode::Simulator => Err(Error::InvalidMode(
                "simulator mode serves jobs for a manager and has no job set to run".to_string(),
            )),
            RunMode::Local => {
                info!("running {} job(s) locally", jobs.len());
                self.run_sequential(jobs, flags)
            }
            RunMode::Manager if flags.all_in_local || self.endpoints.is_empty() => {
                info!(
                    "running {} job(s) locally on {} thread(s)",
                    jobs.len(),
                    flags.worker_count.max(1)
                );
                self.run_parallel(jobs, flags, None)
            }
            RunMode::Manager => {
                info!(
                    "dispatching {} job(s) to {} worker(s)",
                    jobs.len(),
                    self.endpoints.len()
                );
                let pool = EndpointPool::new(self.endpoints.len());
                self.run_parallel(jobs, flags, Some(&pool))
            }
        }
    }

    fn run_sequential(&self, jobs: &JobSet, flags: &RunFlags) -> Result<ExecutionReport> {
        let mut report = ReportBuilder::new(jobs.len());
        for (index, job) in jobs.iter().enumerate() {
            report.record(index, self.execute(index, job, flags, Target::Local))?;
        }
        report.finish()
    }

    /// Runs jobs on a set of threads pulling job indices in order. With a
    /// pool, each job first takes a free endpoint and gives it back when
    /// done, so no endpoint ever has two jobs in flight.
    fn run_parallel(
        &self,
        jobs: &JobSet,
        flags: &RunFlags,
        pool: Option<&EndpointPool>,
    ) -> Result<ExecutionReport> {
        let mut threads = flags.worker_count.max(1).min(jobs.len().max(1));
        if pool.is_some() {
            threads = threads.min(self.endpoints.len());
        }

        let next = AtomicUsize::new(0);
        let next = &next;
        let (sender, receiver) = mpsc::channel();
        let mut report = ReportBuilder::new(jobs.len());

        thread::scope(|scope| -> Result<()> {
            for _ in 0..threads {
                let sender = sender.clone();
                scope.spawn(move || loop {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let job = match jobs.get(index) {
                        Some(j) => j,
                        None => break,
                    };
                    let outcome = match pool {
                        Some(pool) => match pool.acquire() {
                            Ok(endpoint) => {
                                let target = Target::Remote(&self.endpoints[endpoint]);
                                let outcome = self.execute(index, job, flags, target);
                                pool.release(endpoint);
                                outcome
                            }
                            Err(e) => {
                                JobOutcome::Failed(Failure::new(FailureKind::Connection, e))
                            }
                        },
                        None => self.execute(index, job, flags, Target::Local),
                    };
                    if sender.send((index, outcome)).is_err() {
                        break;
                    }
                });
            }
            drop(sender);
            for (index, outcome) in receiver {
                report.record(index, outcome)?;
            }
            Ok(())
        })?;

        report.finish()
    }

    /// Runs a single job to a terminal state.
    fn execute(&self, index: usize, job: &Job, flags: &RunFlags, target: Target) -> JobOutcome {
        let mut state = JobState::Pending;
        let outcome = match self.transition(index, job, &mut state, JobState::Dispatched) {
            Ok(()) => match target {
                Target::Local => self.run_local(job, flags.save_result),
                Target::Remote(endpoint) => self.run_remote(endpoint, job, flags.save_result),
            },
            Err(e) => Err(Failure::new(FailureKind::Io, e)),
        };

        let outcome = outcome.and_then(|(result, saved)| {
            if let Some(experiment) = saved {
                experiment
                    .write_to(&job.path)
                    .map_err(|e| Failure::new(FailureKind::Io, e))?;
                debug!("job {}: saved results to {}", index, job);
            }
            Ok(result)
        });

        match outcome {
            Ok(result) => {
                let _ = self.transition(index, job, &mut state, JobState::Completed);
                JobOutcome::Completed(result)
            }
            Err(failure) => {
                let _ = self.transition(index, job, &mut state, JobState::Failed);
                warn!("job {} ({}) failed: {}", index, job.name(), failure);
                JobOutcome::Failed(failure)
            }
        }
    }

    fn transition(
        &self,
        index: usize,
        job: &Job,
        state: &mut JobState,
        next: JobState,
    ) -> simbatch_core::Result<()> {
        debug!("job {} ({}): {:?} -> {:?}", index, job.name(), state, next);
        state.advance(next)
    }

    /// Returns the result and, when saving, the experiment to write back.
    fn run_local(
        &self,
        job: &Job,
        save_result: bool,
    ) -> std::result::Result<(Value, Option<Experiment>), Failure> {
        let mut experiment =
            Experiment::from_path(&job.path).map_err(|e| Failure::new(FailureKind::Io, e))?;
        let result = simbatch_core::run_isolated(&self.simulator, &experiment)
            .map_err(|e| match e {
                simbatch_core::Error::Simulation(message) => {
                    Failure::new(FailureKind::Simulation, message)
                }
                e => Failure::new(FailureKind::Simulation, e),
            })?;
        if save_result {
            experiment.results = Some(result.clone());
            Ok((result, Some(experiment)))
        } else {
            Ok((result, None))
        }
    }

    fn run_remote(
        &self,
        endpoint: &Endpoint,
        job: &Job,
        save_result: bool,
    ) -> std::result::Result<(Value, Option<Experiment>), Failure> {
        let experiment =
            Experiment::from_path(&job.path).map_err(|e| Failure::new(FailureKind::Io, e))?;
        let request = RunExperimentRequest {
            job: job.name(),
            experiment,
            save_result,
        };
        info!("dispatching {} to {}", job.name(), endpoint);
        let response = self
            .exchange(endpoint, &request)
            .map_err(Failure::from_exchange)?;

        let state = match (save_result, response.state) {
            (false, _) => None,
            (true, Some(state)) => Some(state),
            (true, None) => {
                let mut experiment = request.experiment;
                experiment.results = Some(response.result.clone());
                Some(experiment)
            }
        };
        Ok((response.result, state))
    }

    /// One connect, send, receive, close cycle.
    fn exchange(
        &self,
        endpoint: &Endpoint,
        request: &RunExperimentRequest,
    ) -> Result<RunExperimentResponse> {
        let mut socket = Socket::open()?;
        if self.timeout.is_some() {
            socket.set_timeout(self.timeout)?;
        }
        socket.connect(&endpoint.host, endpoint.port)?;
        frame::send_payload(&mut socket, request, self.compress)?;
        let msg = frame::recv_msg(&mut socket)?;
        let _ = socket.shutdown();
        socket.close();

        match msg.type_ {
            MessageType::RunExperimentResponse => msg.unpack_payload(),
            MessageType::ErrorResponse => {
                let error: ErrorResponse = msg.unpack_payload()?;
                Err(Error::Remote {
                    kind: error.kind,
                    message: error.message,
                })
            }
            other => Err(Error::Protocol(format!(
                "unexpected reply of type {:?}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_jobs(dir: &std::path::Path, names: &[&str]) -> JobSet {
        for name in names {
            let experiment = Experiment::new(name.trim_end_matches(".exp"), 1.).unwrap();
            experiment.write_to(&dir.join(name)).unwrap();
        }
        JobSet::from_args(names, dir, None).unwrap()
    }

    fn echo_name(e: &Experiment) -> simbatch_core::Result<Value> {
        if e.name == "bad" {
            return Err(simbatch_core::Error::Simulation("diverged".to_string()));
        }
        Ok(Value::from(e.name.as_str()))
    }

    fn panic_on_bad(e: &Experiment) -> simbatch_core::Result<Value> {
        if e.name == "bad" {
            panic!("kernel fault");
        }
        Ok(Value::from(e.name.as_str()))
    }

    #[test]
    fn local_run_keeps_order_and_goes_on_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = write_jobs(dir.path(), &["a.exp", "bad.exp", "c.exp"]);

        let report = Manager::new(echo_name)
            .run(&jobs, RunMode::Local, &RunFlags::default())
            .unwrap();
        assert_eq!(report.len(), 3);
        assert!(!report.success());
        assert_eq!(report.outcomes()[0], JobOutcome::Completed(Value::from("a")));
        assert_eq!(
            report.outcomes()[1],
            JobOutcome::Failed(Failure::new(FailureKind::Simulation, "diverged"))
        );
        assert_eq!(report.outcomes()[2], JobOutcome::Completed(Value::from("c")));
        assert_eq!((report.completed(), report.failed()), (2, 1));
    }

    #[test]
    fn parallel_local_run_reports_in_job_order() {
        let dir = tempfile::tempdir().unwrap();
        let names = ["j0.exp", "j1.exp", "j2.exp", "j3.exp", "j4.exp"];
        let jobs = write_jobs(dir.path(), &names);
        let flags = RunFlags {
            worker_count: 3,
            ..RunFlags::default()
        };

        let report = Manager::new(echo_name)
            .run(&jobs, RunMode::Manager, &flags)
            .unwrap();
        assert!(report.success());
        for (i, outcome) in report.outcomes().iter().enumerate() {
            assert_eq!(outcome, &JobOutcome::Completed(Value::from(format!("j{}", i))));
        }
    }

    #[test]
    fn panicking_job_fails_alone() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = write_jobs(dir.path(), &["a.exp", "bad.exp", "c.exp"]);
        let parallel = RunFlags {
            worker_count: 2,
            ..RunFlags::default()
        };

        for (mode, flags) in &[
            (RunMode::Local, RunFlags::default()),
            (RunMode::Manager, parallel),
        ] {
            let report = Manager::new(panic_on_bad).run(&jobs, *mode, flags).unwrap();
            assert_eq!(report.len(), 3);
            assert_eq!((report.completed(), report.failed()), (2, 1));
            let failure = report.outcomes()[1].failure().unwrap();
            assert_eq!(failure.kind, FailureKind::Simulation);
            assert!(failure.message.contains("kernel fault"));
            assert_eq!(report.outcomes()[2], JobOutcome::Completed(Value::from("c")));
        }
    }

    #[test]
    fn save_result_overwrites_file() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = write_jobs(dir.path(), &["a.exp"]);
        let flags = RunFlags {
            save_result: true,
            ..RunFlags::default()
        };

        Manager::new(echo_name)
            .run(&jobs, RunMode::Local, &flags)
            .unwrap();
        let saved = Experiment::from_path(&dir.path().join("a.exp")).unwrap();
        assert_eq!(saved.results, Some(Value::from("a")));
    }

    #[test]
    fn failed_save_fails_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = write_jobs(dir.path(), &["a.exp"]);
        // a directory in place of the temporary file makes the write fail
        fs::create_dir(dir.path().join("a.exp.tmp")).unwrap();
        let flags = RunFlags {
            save_result: true,
            ..RunFlags::default()
        };

        let report = Manager::new(echo_name)
            .run(&jobs, RunMode::Local, &flags)
            .unwrap();
        assert_eq!(report.outcomes()[0].failure().unwrap().kind, FailureKind::Io);
    }

    #[test]
    fn unreadable_experiment_fails_only_its_job() {
        let dir = tempfile::tempdir().unwrap();
        let mut jobs = write_jobs(dir.path(), &["a.exp"]).jobs().to_vec();
        fs::write(dir.path().join("broken.exp"), "<experiment").unwrap();
        jobs.insert(
            0,
            simbatch_core::resolve_job("broken.exp", dir.path(), None).unwrap(),
        );

        let report = Manager::new(echo_name)
            .run(&JobSet::from_jobs(jobs), RunMode::Local, &RunFlags::default())
            .unwrap();
        assert_eq!(report.outcomes()[0].failure().unwrap().kind, FailureKind::Io);
        assert!(report.outcomes()[1].is_completed());
    }

    #[test]
    fn simulator_mode_is_not_a_job_set_mode() {
        let err = Manager::new(echo_name)
            .run(&JobSet::default(), RunMode::Simulator, &RunFlags::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidMode(_)));
    }

    #[test]
    fn empty_job_set_succeeds() {
        let report = Manager::new(echo_name)
            .run(&JobSet::default(), RunMode::Manager, &RunFlags::default())
            .unwrap();
        assert!(report.success());
        assert!(report.is_empty());
    }

    #[test]
    fn report_cells_are_written_once() {
        let mut builder = ReportBuilder::new(2);
        builder.record(1, JobOutcome::Completed(Value::Null)).unwrap();
        assert!(builder.record(1, JobOutcome::Completed(Value::Null)).is_err());
        assert!(builder.record(2, JobOutcome::Completed(Value::Null)).is_err());
        assert!(builder.finish().is_err());
    }

    #[test]
    fn endpoint_parsing() {
        let endpoint: Endpoint = "node2:48620".parse().unwrap();
        assert_eq!(endpoint, Endpoint::new("node2", 48620));
        assert_eq!(endpoint.to_string(), "node2:48620");
        assert!("node2".parse::<Endpoint>().is_err());
        assert!(":1".parse::<Endpoint>().is_err());
        assert!("node2:port".parse::<Endpoint>().is_err());
    }
}
