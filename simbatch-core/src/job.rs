//! Job set construction.
//!
//! Each command-line argument is resolved into a [`Job`] against the current
//! directory and, when a package context is active, the package experiment
//! directory. A name present in both places is rejected instead of
//! silently picking one of them.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::experiment::EXPERIMENT_FILE_EXTENSION;
use crate::util;

/// Directory, relative to the user home, holding installed packages.
pub const DEFAULT_PACKAGES_DIR: &str = ".simbatch/pkgs";

/// Package context: a named directory whose `exp` subdirectory holds
/// experiment files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub name: String,
    pub root: PathBuf,
}

impl Package {
    pub fn new(name: &str, root: impl Into<PathBuf>) -> Self {
        Package {
            name: name.to_string(),
            root: root.into(),
        }
    }

    /// Package located in the default packages directory of the user.
    pub fn in_home(name: &str) -> Result<Self> {
        let home = std::env::var_os("HOME")
            .ok_or_else(|| Error::Other("HOME is not set".to_string()))?;
        Ok(Package::new(name, PathBuf::from(home).join(DEFAULT_PACKAGES_DIR)))
    }

    pub fn dir(&self) -> PathBuf {
        self.root.join(&self.name)
    }

    pub fn exp_dir(&self) -> PathBuf {
        self.dir().join("exp")
    }

    /// Lists the experiment files shipped with the package.
    pub fn experiments(&self) -> Vec<PathBuf> {
        util::find_files_with_extension(&self.exp_dir(), EXPERIMENT_FILE_EXTENSION)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Job {
    /// Absolute path to the experiment file.
    pub path: PathBuf,
    /// Whether the file was found in the package experiment directory.
    pub from_package: bool,
}

impl Job {
    /// Short name used in logs and reports.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.to_string_lossy().into_owned())
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Lifecycle of a job within a single run. Completed and Failed are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Dispatched,
    Completed,
    Failed,
}

impl Default for JobState {
    fn default() -> Self {
        JobState::Pending
    }
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Moves to `next`, rejecting transitions that skip a state or leave a
    /// terminal one.
    pub fn advance(&mut self, next: JobState) -> Result<()> {
        let allowed = match (*self, next) {
            (JobState::Pending, JobState::Dispatched) => true,
            (JobState::Dispatched, JobState::Completed) => true,
            (JobState::Dispatched, JobState::Failed) => true,
            _ => false,
        };
        if !allowed {
            return Err(Error::InternalError(format!(
                "invalid job state transition {:?} -> {:?}",
                self, next
            )));
        }
        *self = next;
        Ok(())
    }
}

/// Resolves a single argument into a job.
///
/// The argument is looked up relative to `current_dir` first. If it exists
/// there and also in `package_exp_dir`, resolution fails as ambiguous.
/// Absolute arguments are never looked up in the package.
pub fn resolve_job(
    argument: &str,
    current_dir: &Path,
    package_exp_dir: Option<&Path>,
) -> Result<Job> {
    let relative = Path::new(argument).is_relative();
    let current = current_dir.join(argument);
    let packaged = match package_exp_dir {
        Some(dir) if relative => Some(dir.join(argument)),
        _ => None,
    };

    if current.is_file() {
        if let Some(packaged) = packaged.filter(|p| p.is_file()) {
            return Err(Error::AmbiguousFile {
                argument: argument.to_string(),
                current,
                package: packaged,
            });
        }
        return Ok(Job {
            path: dunce::canonicalize(&current)?,
            from_package: false,
        });
    }

    match packaged {
        Some(packaged) if packaged.is_file() => Ok(Job {
            path: dunce::canonicalize(&packaged)?,
            from_package: true,
        }),
        _ => Err(Error::FileNotFound(argument.to_string())),
    }
}

/// Ordered collection of jobs to run. Read-only once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobSet {
    jobs: Vec<Job>,
}

impl JobSet {
    /// Resolves every argument in order, failing on the first argument that
    /// cannot be resolved.
    pub fn from_args<S: AsRef<str>>(
        args: &[S],
        current_dir: &Path,
        package: Option<&Package>,
    ) -> Result<JobSet> {
        let exp_dir = package.map(|p| p.exp_dir());
        let mut jobs = Vec::with_capacity(args.len());
        for arg in args {
            let job = resolve_job(arg.as_ref(), current_dir, exp_dir.as_deref())?;
            debug!("resolved '{}' to {}", arg.as_ref(), job);
            jobs.push(job);
        }
        Ok(JobSet { jobs })
    }

    pub fn from_jobs(jobs: Vec<Job>) -> JobSet {
        JobSet { jobs }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Job> {
        self.jobs.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Job> {
        self.jobs.iter()
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }
}

impl<'a> IntoIterator for &'a JobSet {
    type Item = &'a Job;
    type IntoIter = std::slice::Iter<'a, Job>;
    fn into_iter(self) -> Self::IntoIter {
        self.jobs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    struct Layout {
        _tmp: tempfile::TempDir,
        current: PathBuf,
        package: Package,
    }

    fn layout() -> Layout {
        let tmp = tempfile::tempdir().unwrap();
        let current = tmp.path().join("work");
        let package = Package::new("lotka", tmp.path().join("pkgs"));
        fs::create_dir_all(&current).unwrap();
        fs::create_dir_all(package.exp_dir()).unwrap();
        Layout {
            _tmp: tmp,
            current,
            package,
        }
    }

    #[test]
    fn file_in_both_locations_is_ambiguous() {
        let l = layout();
        fs::write(l.current.join("a.exp"), "").unwrap();
        fs::write(l.package.exp_dir().join("a.exp"), "").unwrap();

        let err = resolve_job("a.exp", &l.current, Some(&l.package.exp_dir())).unwrap_err();
        assert!(err.is_resolution_error());
        match err {
            Error::AmbiguousFile {
                current, package, ..
            } => {
                assert_eq!(current, l.current.join("a.exp"));
                assert_eq!(package, l.package.exp_dir().join("a.exp"));
            }
            e => panic!("unexpected error: {}", e),
        }
    }

    #[test]
    fn current_directory_without_package() {
        let l = layout();
        fs::write(l.current.join("a.exp"), "").unwrap();
        fs::write(l.package.exp_dir().join("a.exp"), "").unwrap();

        let job = resolve_job("a.exp", &l.current, None).unwrap();
        assert!(!job.from_package);
        assert!(job.path.is_absolute());
        assert_eq!(job.name(), "a.exp");
    }

    #[test]
    fn package_file_is_found() {
        let l = layout();
        fs::write(l.package.exp_dir().join("b.exp"), "").unwrap();

        let job = resolve_job("b.exp", &l.current, Some(&l.package.exp_dir())).unwrap();
        assert!(job.from_package);
        assert_eq!(l.package.experiments().len(), 1);
    }

    #[test]
    fn missing_file() {
        let l = layout();
        let err = resolve_job("c.exp", &l.current, Some(&l.package.exp_dir())).unwrap_err();
        assert_eq!(err.to_string(), "filename 'c.exp' does not exist");
    }

    #[test]
    fn job_set_keeps_order_and_fails_fast() {
        let l = layout();
        fs::write(l.current.join("b.exp"), "").unwrap();
        fs::write(l.package.exp_dir().join("a.exp"), "").unwrap();

        let set = JobSet::from_args(&["b.exp", "a.exp"], &l.current, Some(&l.package)).unwrap();
        let names = set.iter().map(|j| j.name()).collect::<Vec<_>>();
        assert_eq!(names, vec!["b.exp", "a.exp"]);
        assert!(set.get(1).unwrap().from_package);

        assert!(JobSet::from_args(&["b.exp", "x.exp", "a.exp"], &l.current, Some(&l.package))
            .is_err());
    }

    #[test]
    fn state_transitions() {
        let mut state = JobState::default();
        assert!(state.advance(JobState::Completed).is_err());
        state.advance(JobState::Dispatched).unwrap();
        state.advance(JobState::Failed).unwrap();
        assert!(state.is_terminal());
        assert!(state.advance(JobState::Dispatched).is_err());
    }
}
