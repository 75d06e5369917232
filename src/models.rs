use indexmap::IndexMap;
use serde::Serialize;
use std::sync::Arc;

use crate::sources::Source;

/// Jobs keyed by job name, as returned by every source handler.
pub type JobSet = IndexMap<String, Job>;

#[derive(Debug, Serialize)]
pub struct Environment {
    pub name: String,
    pub systems: Vec<System>,
}

impl Environment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            systems: Vec::new(),
        }
    }

    pub fn add_system(&mut self, system: System) {
        self.systems.push(system);
    }
}

#[derive(Debug, Serialize)]
pub struct System {
    pub name: String,
    pub system_type: String,
    #[serde(skip)]
    pub sources: Vec<Arc<dyn Source>>,
    pub jobs: JobSet,
}

impl System {
    pub fn new(
        name: impl Into<String>,
        system_type: impl Into<String>,
        sources: Vec<Arc<dyn Source>>,
    ) -> Self {
        Self {
            name: name.into(),
            system_type: system_type.into(),
            sources,
            jobs: JobSet::new(),
        }
    }

    /// Merge-or-insert a job. Re-adding a job with the same name only
    /// updates the fields present in the new value.
    pub fn add_job(&mut self, job: Job) {
        match self.jobs.get_mut(&job.name) {
            Some(existing) => existing.merge(job),
            None => {
                self.jobs.insert(job.name.clone(), job);
            }
        }
    }

    pub fn add_jobs(&mut self, jobs: JobSet) {
        for (_, job) in jobs {
            self.add_job(job);
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub builds: IndexMap<String, Build>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment: Option<Deployment>,
}

impl Job {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: None,
            builds: IndexMap::new(),
            deployment: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Merge-or-insert a build into this job, keyed by build id.
    pub fn add_build(&mut self, build: Build) {
        match self.builds.get_mut(&build.id) {
            Some(existing) => existing.merge(build),
            None => {
                self.builds.insert(build.id.clone(), build);
            }
        }
    }

    /// Field-wise union: fields absent from `other` keep their current
    /// value, builds and deployment are merged recursively.
    pub fn merge(&mut self, other: Job) {
        if other.url.is_some() {
            self.url = other.url;
        }
        for (_, build) in other.builds {
            self.add_build(build);
        }
        match (&mut self.deployment, other.deployment) {
            (Some(existing), Some(incoming)) => existing.merge(incoming),
            (slot @ None, Some(incoming)) => *slot = Some(incoming),
            (_, None) => {}
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Build {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Duration in milliseconds, as reported by the backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    pub tests: Vec<Test>,
}

impl Build {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: None,
            duration: None,
            tests: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Merge-or-insert a test, keyed by (name, class name).
    pub fn add_test(&mut self, test: Test) {
        match self
            .tests
            .iter_mut()
            .find(|t| t.name == test.name && t.class_name == test.class_name)
        {
            Some(existing) => existing.merge(test),
            None => self.tests.push(test),
        }
    }

    pub fn merge(&mut self, other: Build) {
        if other.status.is_some() {
            self.status = other.status;
        }
        if other.duration.is_some() {
            self.duration = other.duration;
        }
        for test in other.tests {
            self.add_test(test);
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Test {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    pub result: TestResult,
    /// Duration in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
}

impl Test {
    pub fn new(name: impl Into<String>, result: TestResult) -> Self {
        Self {
            name: name.into(),
            class_name: None,
            result,
            duration_ms: None,
        }
    }

    pub fn merge(&mut self, other: Test) {
        self.result = other.result;
        if other.duration_ms.is_some() {
            self.duration_ms = other.duration_ms;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestResult {
    Success,
    Failure,
    Skipped,
}

impl TestResult {
    /// Normalize the status strings the backends use. Jenkins reports
    /// PASSED/FIXED/FAILED/REGRESSION, elasticsearch documents carry
    /// SUCCESS/FAILURE/SKIPPED.
    pub fn parse(status: &str) -> Option<Self> {
        match status.to_uppercase().as_str() {
            "SUCCESS" | "PASSED" | "FIXED" => Some(Self::Success),
            "FAILURE" | "FAILED" | "REGRESSION" => Some(Self::Failure),
            "SKIPPED" => Some(Self::Skipped),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Skipped => "SKIPPED",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Deployment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topology: Option<String>,
}

impl Deployment {
    pub fn merge(&mut self, other: Deployment) {
        if other.release.is_some() {
            self.release = other.release;
        }
        if other.platform.is_some() {
            self.platform = other.platform;
        }
        if other.topology.is_some() {
            self.topology = other.topology;
        }
    }
}
