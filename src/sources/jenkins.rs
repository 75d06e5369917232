use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, warn};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use url::Url;

use crate::auth::Token;
use crate::error::{CiscopeError, Result};
use crate::models::{Build, Job, JobSet, Test, TestResult};
use crate::query::criteria::{CriteriaSet, Handler};
use crate::query::filtering::{
    apply_filters, exact_stage, iexact_stage, join_patterns, range_stage, regex_stage, Predicate,
};
use crate::sources::{require_build_scope, select_last_builds, Source, TestChecks};

const JOBS_TREE: &str = "jobs[name,url]";
const BUILDS_TREE: &str = "jobs[name,url,allBuilds[number,result,duration]]";

/// Talks to the Jenkins JSON API. Job and build listings come from one
/// `api/json` call with a `tree` projection; test results come from the
/// per-build `testReport` endpoint.
#[derive(Debug)]
pub struct JenkinsSource {
    name: String,
    priority: u32,
    enabled: bool,
    client: Client,
    base_url: Url,
    username: Option<String>,
    token: Option<Token>,
}

impl JenkinsSource {
    pub fn new(
        name: impl Into<String>,
        base_url: &str,
        username: Option<String>,
        token: Option<Token>,
        priority: u32,
        enabled: bool,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent("ciscope/0.1.0")
            .build()
            .map_err(|e| {
                CiscopeError::InvalidConfiguration(format!("failed to create HTTP client: {e}"))
            })?;

        let mut base_url = Url::parse(base_url)
            .map_err(|e| CiscopeError::InvalidConfiguration(format!("invalid base URL: {e}")))?;
        // keep Url::join from eating the last path segment
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }

        Ok(Self {
            name: name.into(),
            priority,
            enabled,
            client,
            base_url,
            username,
            token,
        })
    }

    fn auth_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match (&self.username, &self.token) {
            (Some(username), Some(token)) => request.basic_auth(username, Some(token.as_str())),
            (None, Some(token)) => request.bearer_auth(token.as_str()),
            _ => request,
        }
    }

    async fn list_jobs(&self, tree: &str) -> Result<Vec<JenkinsJob>> {
        let url = self
            .base_url
            .join("api/json")
            .map_err(|e| CiscopeError::InvalidConfiguration(format!("invalid API URL: {e}")))?;
        debug!("listing jobs from {url} with tree={tree}");

        let request = self.auth_request(self.client.get(url).query(&[("tree", tree)]));
        let response = request.send().await?.error_for_status()?;
        let listing: JobListResponse = response.json().await?;

        let mut jobs = Vec::new();
        for dto in listing.jobs {
            let Some(job_name) = dto.name else {
                warn!("dropping job without name from '{}'", self.name);
                continue;
            };
            let mut builds = Vec::new();
            for build in dto.all_builds {
                let Some(number) = build.number else {
                    warn!("dropping build of job '{job_name}' without number");
                    continue;
                };
                builds.push(JenkinsBuild {
                    number: number.to_string(),
                    result: build.result,
                    duration: build.duration,
                });
            }
            jobs.push(JenkinsJob {
                name: job_name,
                url: dto.url,
                builds,
            });
        }
        Ok(jobs)
    }

    async fn fetch_test_report(&self, job_name: &str, build_id: &str) -> Result<Vec<TestCase>> {
        let path = format!(
            "job/{}/{build_id}/testReport/api/json",
            urlencoding::encode(job_name)
        );
        let url = self
            .base_url
            .join(&path)
            .map_err(|e| CiscopeError::InvalidConfiguration(format!("invalid report URL: {e}")))?;

        let request = self.auth_request(self.client.get(url));
        let response = request.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            // builds without a test report are not an error
            debug!("no test report for {job_name}#{build_id}");
            return Ok(Vec::new());
        }
        let report: TestReport = response.error_for_status()?.json().await?;

        Ok(report
            .suites
            .into_iter()
            .flat_map(|suite| suite.cases)
            .collect())
    }

    fn job_checks(&self, criteria: &CriteriaSet) -> Result<Vec<Predicate<JenkinsJob>>> {
        let mut checks = Vec::new();
        if let Some(patterns) = criteria.values("jobs") {
            if !patterns.is_empty() {
                let pattern = join_patterns(patterns)?;
                checks.push(regex_stage(pattern, |job: &JenkinsJob| job.name.as_str()));
            }
        }
        Ok(checks)
    }

    fn build_checks(&self, criteria: &CriteriaSet) -> Vec<Predicate<JenkinsBuild>> {
        let mut checks: Vec<Predicate<JenkinsBuild>> = Vec::new();
        if let Some(ids) = criteria.values("builds") {
            if !ids.is_empty() {
                checks.push(exact_stage(ids.to_vec(), |build: &JenkinsBuild| {
                    build.number.as_str()
                }));
            }
        }
        if let Some(statuses) = criteria.values("build_status") {
            if !statuses.is_empty() {
                checks.push(iexact_stage(statuses.to_vec(), |build: &JenkinsBuild| {
                    build.result.as_deref().unwrap_or("")
                }));
            }
        }
        if let Some(ranges) = criteria.ranges("build_duration") {
            checks.push(range_stage(ranges.to_vec(), |build: &JenkinsBuild| {
                build.duration
            }));
        }
        checks
    }

    /// The shared jobs-with-builds view behind both `fetch_builds` and
    /// `fetch_tests`.
    async fn load_builds(&self, criteria: &CriteriaSet) -> Result<JobSet> {
        let listed = self.list_jobs(BUILDS_TREE).await?;
        let listed = apply_filters(listed, &self.job_checks(criteria)?);

        let build_checks = self.build_checks(criteria);
        let filtering_builds = !build_checks.is_empty();

        let mut jobs = JobSet::new();
        for listed_job in listed {
            let builds = apply_filters(listed_job.builds, &build_checks);
            if filtering_builds && builds.is_empty() {
                // job emptied by build filtering: drop it from this call
                continue;
            }
            let mut job = Job::new(&listed_job.name);
            job.url = listed_job.url;
            for build in builds {
                let mut model = Build::new(&build.number);
                model.status = build.result;
                model.duration = build.duration;
                job.add_build(model);
            }
            jobs.insert(job.name.clone(), job);
        }

        if criteria.contains("last_build") {
            return select_last_builds(jobs);
        }
        Ok(jobs)
    }
}

#[async_trait]
impl Source for JenkinsSource {
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
        matches!(handler, Handler::Jobs | Handler::Builds | Handler::Tests)
    }

    async fn fetch_jobs(&self, criteria: &CriteriaSet) -> Result<JobSet> {
        let listed = self.list_jobs(JOBS_TREE).await?;
        let listed = apply_filters(listed, &self.job_checks(criteria)?);

        let mut jobs = JobSet::new();
        for listed_job in listed {
            let mut job = Job::new(&listed_job.name);
            job.url = listed_job.url;
            jobs.insert(job.name.clone(), job);
        }
        Ok(jobs)
    }

    async fn fetch_builds(&self, criteria: &CriteriaSet) -> Result<JobSet> {
        self.load_builds(criteria).await
    }

    async fn fetch_tests(&self, criteria: &CriteriaSet) -> Result<JobSet> {
        require_build_scope(criteria)?;

        let mut jobs = self.load_builds(criteria).await?;
        let checks = TestChecks::from_criteria(criteria)?;

        // one testReport call per surviving build, all in flight at once
        let targets: Vec<(String, String)> = jobs
            .values()
            .flat_map(|job| {
                job.builds
                    .keys()
                    .map(|id| (job.name.clone(), id.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        let reports = join_all(targets.iter().map(|(job_name, build_id)| async move {
            let cases = self.fetch_test_report(job_name, build_id).await;
            (job_name.clone(), build_id.clone(), cases)
        }))
        .await;

        for (job_name, build_id, cases) in reports {
            let cases = cases?;
            let Some(build) = jobs
                .get_mut(&job_name)
                .and_then(|job| job.builds.get_mut(&build_id))
            else {
                continue;
            };
            for case in cases {
                let Some(case_name) = case.name else {
                    warn!("dropping test case without name in {job_name}#{build_id}");
                    continue;
                };
                let Some(result) = case.status.as_deref().and_then(TestResult::parse) else {
                    warn!("dropping test '{case_name}' with unknown status");
                    continue;
                };
                let mut test = Test::new(case_name, result);
                test.class_name = case.class_name;
                test.duration_ms = case.duration.map(|seconds| seconds * 1000.0);
                if checks.admit(&test) {
                    build.add_test(test);
                }
            }
        }

        if checks.active() {
            jobs.retain(|_, job| job.builds.values().any(|build| !build.tests.is_empty()));
        }
        Ok(jobs)
    }
}

#[derive(Debug)]
struct JenkinsJob {
    name: String,
    url: Option<String>,
    builds: Vec<JenkinsBuild>,
}

#[derive(Debug)]
struct JenkinsBuild {
    number: String,
    result: Option<String>,
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct JobListResponse {
    #[serde(default)]
    jobs: Vec<JobDto>,
}

#[derive(Debug, Deserialize)]
struct JobDto {
    name: Option<String>,
    url: Option<String>,
    #[serde(rename = "allBuilds", default)]
    all_builds: Vec<BuildDto>,
}

#[derive(Debug, Deserialize)]
struct BuildDto {
    number: Option<u64>,
    result: Option<String>,
    /// Jenkins reports build durations in milliseconds already.
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TestReport {
    #[serde(default)]
    suites: Vec<TestSuite>,
}

#[derive(Debug, Deserialize)]
struct TestSuite {
    #[serde(default)]
    cases: Vec<TestCase>,
}

#[derive(Debug, Deserialize)]
struct TestCase {
    name: Option<String>,
    #[serde(rename = "className")]
    class_name: Option<String>,
    status: Option<String>,
    /// Seconds, unlike build durations.
    duration: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::criteria::{Criterion, CriterionValue};
    use serde_json::json;

    fn source(server: &mockito::ServerGuard) -> JenkinsSource {
        JenkinsSource::new("jenkins", &server.url(), None, None, 0, true).unwrap()
    }

    fn criteria(named: &[(&str, CriterionValue)]) -> CriteriaSet {
        let mut set = CriteriaSet::new();
        for (name, value) in named {
            set.insert(Criterion::new(name, value.clone()).unwrap());
        }
        set
    }

    async fn respond_listing(
        server: &mut mockito::ServerGuard,
        body: serde_json::Value,
    ) -> mockito::Mock {
        server
            .mock("GET", "/api/json")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body.to_string())
            .create_async()
            .await
    }

    #[tokio::test]
    async fn test_fetch_jobs_maps_listing_to_jobs() {
        let mut server = mockito::Server::new_async().await;
        respond_listing(
            &mut server,
            json!({ "jobs": [
                { "name": "gate-network", "url": "http://ci/job/gate-network/" },
                { "name": "promote", "url": "http://ci/job/promote/" },
                { "url": "http://ci/job/nameless/" },
            ]}),
        )
        .await;

        let jobs = source(&server)
            .fetch_jobs(&criteria(&[(
                "jobs",
                CriterionValue::List(vec!["^gate".into()]),
            )]))
            .await
            .unwrap();

        assert_eq!(jobs.len(), 1);
        assert_eq!(
            jobs["gate-network"].url.as_deref(),
            Some("http://ci/job/gate-network/")
        );
    }

    #[tokio::test]
    async fn test_build_filtering_drops_emptied_jobs() {
        let mut server = mockito::Server::new_async().await;
        respond_listing(
            &mut server,
            json!({ "jobs": [
                { "name": "job1", "url": "http://ci/job/job1/", "allBuilds": [
                    { "number": 1, "result": "SUCCESS", "duration": 1000 },
                    { "number": 2, "result": "FAILURE", "duration": 2000 },
                ]},
                { "name": "job2", "url": "http://ci/job/job2/", "allBuilds": [
                    { "number": 9, "result": "SUCCESS", "duration": 500 },
                ]},
            ]}),
        )
        .await;

        let jobs = source(&server)
            .fetch_builds(&criteria(&[
                ("builds", CriterionValue::List(vec![])),
                ("build_status", CriterionValue::List(vec!["failure".into()])),
            ]))
            .await
            .unwrap();

        assert_eq!(jobs.len(), 1);
        let builds: Vec<&String> = jobs["job1"].builds.keys().collect();
        assert_eq!(builds, vec!["2"]);
    }

    #[tokio::test]
    async fn test_last_build_is_numerically_greatest() {
        let mut server = mockito::Server::new_async().await;
        respond_listing(
            &mut server,
            json!({ "jobs": [
                { "name": "job1", "url": "http://ci/job/job1/", "allBuilds": [
                    { "number": 2, "result": "SUCCESS" },
                    { "number": 10, "result": "FAILURE" },
                    { "number": 3, "result": "SUCCESS" },
                ]},
            ]}),
        )
        .await;

        let jobs = source(&server)
            .fetch_builds(&criteria(&[("last_build", CriterionValue::Flag)]))
            .await
            .unwrap();

        let builds: Vec<&String> = jobs["job1"].builds.keys().collect();
        assert_eq!(builds, vec!["10"]);
    }

    #[tokio::test]
    async fn test_fetch_tests_reads_test_report() {
        let mut server = mockito::Server::new_async().await;
        respond_listing(
            &mut server,
            json!({ "jobs": [
                { "name": "job1", "url": "http://ci/job/job1/", "allBuilds": [
                    { "number": 4, "result": "SUCCESS", "duration": 1000 },
                ]},
            ]}),
        )
        .await;
        server
            .mock("GET", "/job/job1/4/testReport/api/json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({ "suites": [ { "cases": [
                    { "name": "test_ping", "className": "net.Smoke",
                      "status": "PASSED", "duration": 0.25 },
                    { "name": "test_dns", "className": "net.Smoke",
                      "status": "REGRESSION", "duration": 1.5 },
                ]}]})
                .to_string(),
            )
            .create_async()
            .await;

        let jobs = source(&server)
            .fetch_tests(&criteria(&[
                ("last_build", CriterionValue::Flag),
                ("tests", CriterionValue::List(vec![])),
            ]))
            .await
            .unwrap();

        let build = &jobs["job1"].builds["4"];
        assert_eq!(build.tests.len(), 2);
        assert_eq!(build.tests[0].result, TestResult::Success);
        assert_eq!(build.tests[0].duration_ms, Some(250.0));
        assert_eq!(build.tests[1].result, TestResult::Failure);
    }

    #[tokio::test]
    async fn test_missing_test_report_yields_no_tests() {
        let mut server = mockito::Server::new_async().await;
        respond_listing(
            &mut server,
            json!({ "jobs": [
                { "name": "job1", "url": "http://ci/job/job1/", "allBuilds": [
                    { "number": 4, "result": "SUCCESS" },
                ]},
            ]}),
        )
        .await;
        server
            .mock("GET", "/job/job1/4/testReport/api/json")
            .with_status(404)
            .create_async()
            .await;

        let jobs = source(&server)
            .fetch_tests(&criteria(&[("last_build", CriterionValue::Flag)]))
            .await
            .unwrap();

        assert!(jobs["job1"].builds["4"].tests.is_empty());
    }

    #[tokio::test]
    async fn test_jenkins_does_not_advertise_deployment() {
        let server = mockito::Server::new_async().await;

        let source = source(&server);

        assert!(source.supports(Handler::Builds));
        assert!(!source.supports(Handler::Deployment));
    }
}
