pub mod elasticsearch;
pub mod jenkins;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use regex::Regex;

use crate::error::{CiscopeError, Result};
use crate::models::{JobSet, System, Test};
use crate::query::criteria::{CriteriaSet, Handler, RangeFilter};
use crate::query::filtering::join_patterns;

/// The capability contract every backend implements. A source advertises
/// the handlers it supports; the default bodies guard against a dispatch
/// that bypassed [`resolve`].
#[async_trait]
pub trait Source: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn priority(&self) -> u32;

    fn enabled(&self) -> bool;

    fn supports(&self, handler: Handler) -> bool;

    async fn fetch_jobs(&self, _criteria: &CriteriaSet) -> Result<JobSet> {
        Err(unsupported(self.name(), Handler::Jobs))
    }

    async fn fetch_builds(&self, _criteria: &CriteriaSet) -> Result<JobSet> {
        Err(unsupported(self.name(), Handler::Builds))
    }

    async fn fetch_tests(&self, _criteria: &CriteriaSet) -> Result<JobSet> {
        Err(unsupported(self.name(), Handler::Tests))
    }

    async fn fetch_deployment(&self, _criteria: &CriteriaSet) -> Result<JobSet> {
        Err(unsupported(self.name(), Handler::Deployment))
    }
}

fn unsupported(name: &str, handler: Handler) -> CiscopeError {
    CiscopeError::BackendFetch(format!("source '{name}' does not implement {handler}"))
}

/// Pick the source that answers `handler` for this system: enabled sources
/// advertising the capability, highest priority first, ties broken by the
/// lexicographically smallest name so resolution is deterministic.
pub fn resolve(system: &System, handler: Handler) -> Result<Arc<dyn Source>> {
    system
        .sources
        .iter()
        .filter(|source| source.enabled() && source.supports(handler))
        .max_by(|a, b| {
            a.priority()
                .cmp(&b.priority())
                .then_with(|| b.name().cmp(a.name()))
        })
        .cloned()
        .ok_or_else(|| CiscopeError::NoCapableSource {
            system: system.name.clone(),
            handler: handler.to_string(),
        })
}

/// Dispatch through the handler registry. The enum is closed, so there is
/// no name-based lookup to fail at runtime.
pub async fn invoke(
    source: &dyn Source,
    handler: Handler,
    criteria: &CriteriaSet,
) -> Result<JobSet> {
    match handler {
        Handler::Jobs => source.fetch_jobs(criteria).await,
        Handler::Builds => source.fetch_builds(criteria).await,
        Handler::Tests => source.fetch_tests(criteria).await,
        Handler::Deployment => source.fetch_deployment(criteria).await,
    }
}

/// Keep only each job's numerically greatest build. A build id that does
/// not parse as a number is a configuration problem of that system; the
/// caller drops the whole system, not the run.
pub fn select_last_builds(jobs: JobSet) -> Result<JobSet> {
    let mut selected = JobSet::new();
    for (name, mut job) in jobs {
        let mut last: Option<(u64, String)> = None;
        for id in job.builds.keys() {
            let numeric: u64 = id.parse().map_err(|_| {
                CiscopeError::MalformedRecord(format!(
                    "build id '{id}' of job '{name}' is not numeric"
                ))
            })?;
            match &last {
                Some((best, _)) if *best >= numeric => {}
                _ => last = Some((numeric, id.clone())),
            }
        }
        let Some((_, keep)) = last else {
            // jobs without builds have no last build to show
            continue;
        };
        if let Some(build) = job.builds.shift_remove(&keep) {
            job.builds.clear();
            job.builds.insert(keep, build);
        }
        selected.insert(name, job);
    }
    Ok(selected)
}

/// The test-level narrowing both backends share: name/class patterns,
/// result statuses and duration ranges, applied per extracted test.
#[derive(Debug)]
pub struct TestChecks {
    pattern: Option<Regex>,
    results: Vec<String>,
    ranges: Vec<RangeFilter>,
}

impl TestChecks {
    pub fn from_criteria(criteria: &CriteriaSet) -> Result<Self> {
        let pattern = match criteria.values("tests") {
            Some(patterns) if !patterns.is_empty() => Some(join_patterns(patterns)?),
            _ => None,
        };
        let results = criteria
            .values("test_result")
            .unwrap_or_default()
            .iter()
            .map(|status| status.to_uppercase())
            .collect();
        let ranges = criteria.ranges("test_duration").unwrap_or_default().to_vec();
        Ok(Self {
            pattern,
            results,
            ranges,
        })
    }

    /// Whether any check narrows the result; used to drop jobs emptied by
    /// test filtering from the returned set.
    pub fn active(&self) -> bool {
        self.pattern.is_some() || !self.results.is_empty() || !self.ranges.is_empty()
    }

    pub fn admit(&self, test: &Test) -> bool {
        if let Some(pattern) = &self.pattern {
            let name_matches = pattern.is_match(&test.name);
            let class_matches = test
                .class_name
                .as_deref()
                .is_some_and(|class| pattern.is_match(class));
            if !name_matches && !class_matches {
                return false;
            }
        }
        if !self.results.is_empty() && !self.results.iter().any(|r| r == test.result.as_str()) {
            return false;
        }
        if !self.ranges.is_empty() {
            match test.duration_ms {
                Some(duration) => {
                    if !self.ranges.iter().all(|range| range.matches(duration)) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    }
}

/// Tests only make sense against a build scope: the caller must have
/// selected builds or the last build.
pub fn require_build_scope(criteria: &CriteriaSet) -> Result<()> {
    if criteria.contains("builds") || criteria.contains("last_build") {
        Ok(())
    } else {
        Err(CiscopeError::MissingArgument(
            "tests require --builds or --last-build".into(),
        ))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// In-memory source for resolver and orchestrator tests.
    #[derive(Debug)]
    pub struct StubSource {
        pub name: String,
        pub priority: u32,
        pub enabled: bool,
        pub capabilities: Vec<Handler>,
        pub jobs: JobSet,
        pub fail: bool,
        pub calls: Mutex<Vec<Handler>>,
    }

    impl StubSource {
        pub fn new(name: &str, priority: u32, capabilities: &[Handler]) -> Self {
            Self {
                name: name.into(),
                priority,
                enabled: true,
                capabilities: capabilities.to_vec(),
                jobs: JobSet::new(),
                fail: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn with_jobs(mut self, jobs: JobSet) -> Self {
            self.jobs = jobs;
            self
        }

        pub fn disabled(mut self) -> Self {
            self.enabled = false;
            self
        }

        pub fn failing(mut self) -> Self {
            self.fail = true;
            self
        }

        fn answer(&self, handler: Handler) -> Result<JobSet> {
            self.calls.lock().unwrap().push(handler);
            if self.fail {
                return Err(CiscopeError::BackendFetch(format!(
                    "source '{}' exploded",
                    self.name
                )));
            }
            Ok(self.jobs.clone())
        }
    }

    #[async_trait]
    impl Source for StubSource {
        fn name(&self) -> &str {
            &self.name
        }

        fn priority(&self) -> u32 {
            self.priority
        }

        fn enabled(&self) -> bool {
            self.enabled
        }

        fn supports(&self, handler: Handler) -> bool {
            self.capabilities.contains(&handler)
        }

        async fn fetch_jobs(&self, _criteria: &CriteriaSet) -> Result<JobSet> {
            self.answer(Handler::Jobs)
        }

        async fn fetch_builds(&self, _criteria: &CriteriaSet) -> Result<JobSet> {
            self.answer(Handler::Builds)
        }

        async fn fetch_tests(&self, criteria: &CriteriaSet) -> Result<JobSet> {
            require_build_scope(criteria)?;
            self.answer(Handler::Tests)
        }

        async fn fetch_deployment(&self, _criteria: &CriteriaSet) -> Result<JobSet> {
            self.answer(Handler::Deployment)
        }
    }
}
