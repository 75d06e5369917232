use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::auth::Token;
use crate::error::{CiscopeError, Result};
use crate::models::{Build, Deployment, Job, JobSet, Test, TestResult};
use crate::query::criteria::{CriteriaSet, Handler};
use crate::query::filtering::{
    apply_filters, exact_stage, iexact_stage, join_patterns, range_stage, regex_stage, Predicate,
};
use crate::sources::{require_build_scope, select_last_builds, Source, TestChecks};

const JOB_FIELDS: [&str; 2] = ["job_name", "job_url"];
const BUILD_FIELDS: [&str; 5] = [
    "job_name",
    "job_url",
    "build_num",
    "build_result",
    "build_duration",
];
const TEST_FIELDS: [&str; 9] = [
    "job_name",
    "job_url",
    "build_num",
    "build_result",
    "build_duration",
    "test_name",
    "test_class_name",
    "test_status",
    "test_duration",
];
const DEPLOYMENT_FIELDS: [&str; 5] = [
    "job_name",
    "job_url",
    "deployment_release",
    "deployment_platform",
    "deployment_topology",
];

/// Queries an index of per-build log documents, one flat document per
/// build (or per test execution when the log shipper records tests).
pub struct ElasticsearchSource {
    name: String,
    priority: u32,
    enabled: bool,
    client: Client,
    search_url: Url,
    token: Option<Token>,
}

impl std::fmt::Debug for ElasticsearchSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticsearchSource")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .field("search_url", &self.search_url.as_str())
            .finish()
    }
}

impl ElasticsearchSource {
    pub fn new(
        name: impl Into<String>,
        base_url: &str,
        index: &str,
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

        let search_url = Url::parse(base_url)
            .map_err(|e| CiscopeError::InvalidConfiguration(format!("invalid base URL: {e}")))?
            .join(&format!("{index}/_search"))
            .map_err(|e| CiscopeError::InvalidConfiguration(format!("invalid search URL: {e}")))?;

        Ok(Self {
            name: name.into(),
            priority,
            enabled,
            client,
            search_url,
            token,
        })
    }

    fn auth_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.token {
            request.bearer_auth(token.as_str())
        } else {
            request
        }
    }

    /// Run a match-all search projected to `fields` and flatten the hits.
    async fn search(&self, fields: &[&str]) -> Result<Vec<EsRecord>> {
        let body = json!({
            "query": { "match_all": {} },
            "_source": fields,
            "size": 10000,
        });
        debug!("searching {} for {:?}", self.search_url, fields);

        let request = self.auth_request(self.client.post(self.search_url.clone()).json(&body));
        let response = request.send().await?.error_for_status()?;
        let search: SearchResponse = response.json().await?;

        let mut records = Vec::new();
        for hit in search.hits.hits {
            match hit.source.normalize() {
                Some(record) => records.push(record),
                None => warn!("dropping hit without job_name from '{}'", self.name),
            }
        }
        Ok(records)
    }

    fn job_checks(&self, criteria: &CriteriaSet) -> Result<Vec<Predicate<EsRecord>>> {
        let mut checks = Vec::new();
        if let Some(patterns) = criteria.values("jobs") {
            if !patterns.is_empty() {
                let pattern = join_patterns(patterns)?;
                checks.push(regex_stage(pattern, |record: &EsRecord| {
                    record.job_name.as_str()
                }));
            }
        }
        Ok(checks)
    }

    fn build_checks(&self, criteria: &CriteriaSet) -> Vec<Predicate<EsRecord>> {
        let mut checks: Vec<Predicate<EsRecord>> = Vec::new();
        if let Some(ids) = criteria.values("builds") {
            if !ids.is_empty() {
                checks.push(exact_stage(ids.to_vec(), |record: &EsRecord| {
                    record.build_num.as_deref().unwrap_or("")
                }));
            }
        }
        if let Some(statuses) = criteria.values("build_status") {
            if !statuses.is_empty() {
                checks.push(iexact_stage(statuses.to_vec(), |record: &EsRecord| {
                    record.build_result.as_deref().unwrap_or("")
                }));
            }
        }
        if let Some(ranges) = criteria.ranges("build_duration") {
            checks.push(range_stage(ranges.to_vec(), |record: &EsRecord| {
                record.build_duration
            }));
        }
        checks
    }

    /// Drop records that cannot name their build; the remaining ones are
    /// grouped per job with the build attached.
    fn keep_build_records(&self, records: Vec<EsRecord>) -> Vec<EsRecord> {
        records
            .into_iter()
            .filter(|record| {
                if record.build_num.is_none() {
                    warn!(
                        "dropping build record of job '{}' without build_num",
                        record.job_name
                    );
                    return false;
                }
                true
            })
            .collect()
    }

    fn collect_builds(&self, records: &[EsRecord]) -> JobSet {
        let mut jobs = JobSet::new();
        for record in records {
            let job = jobs
                .entry(record.job_name.clone())
                .or_insert_with(|| Job::new(&record.job_name));
            if job.url.is_none() {
                job.url = record.job_url.clone();
            }
            let Some(build_num) = &record.build_num else {
                continue;
            };
            let mut build = Build::new(build_num);
            build.status = record.build_result.clone();
            build.duration = record.build_duration;
            job.add_build(build);
        }
        jobs
    }
}

#[async_trait]
impl Source for ElasticsearchSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn supports(&self, _handler: Handler) -> bool {
        true
    }

    async fn fetch_jobs(&self, criteria: &CriteriaSet) -> Result<JobSet> {
        let records = self.search(&JOB_FIELDS).await?;
        let records = apply_filters(records, &self.job_checks(criteria)?);

        let mut jobs = JobSet::new();
        for record in records {
            let mut job = Job::new(&record.job_name);
            job.url = record.job_url;
            match jobs.get_mut(&job.name) {
                Some(existing) => existing.merge(job),
                None => {
                    jobs.insert(job.name.clone(), job);
                }
            }
        }
        Ok(jobs)
    }

    async fn fetch_builds(&self, criteria: &CriteriaSet) -> Result<JobSet> {
        let records = self.search(&BUILD_FIELDS).await?;
        let records = apply_filters(records, &self.job_checks(criteria)?);
        let records = self.keep_build_records(records);
        let records = apply_filters(records, &self.build_checks(criteria));

        let jobs = self.collect_builds(&records);
        if criteria.contains("last_build") {
            return select_last_builds(jobs);
        }
        Ok(jobs)
    }

    async fn fetch_tests(&self, criteria: &CriteriaSet) -> Result<JobSet> {
        require_build_scope(criteria)?;

        let records = self.search(&TEST_FIELDS).await?;
        let records = apply_filters(records, &self.job_checks(criteria)?);
        let records = self.keep_build_records(records);
        let records = apply_filters(records, &self.build_checks(criteria));

        let checks = TestChecks::from_criteria(criteria)?;
        let mut jobs = self.collect_builds(&records);
        for record in &records {
            let (Some(build_num), Some(test_name)) = (&record.build_num, &record.test_name) else {
                continue;
            };
            let Some(status) = &record.test_status else {
                warn!("dropping test '{test_name}' without test_status");
                continue;
            };
            let Some(result) = TestResult::parse(status) else {
                warn!("dropping test '{test_name}' with unknown status '{status}'");
                continue;
            };
            let mut test = Test::new(test_name, result);
            test.class_name = record.test_class_name.clone();
            test.duration_ms = record.test_duration_ms;
            if !checks.admit(&test) {
                continue;
            }
            if let Some(job) = jobs.get_mut(&record.job_name) {
                if let Some(build) = job.builds.get_mut(build_num) {
                    build.add_test(test);
                }
            }
        }

        if checks.active() {
            // jobs emptied by test filtering are dropped from this call
            jobs.retain(|_, job| job.builds.values().any(|build| !build.tests.is_empty()));
        }
        if criteria.contains("last_build") {
            return select_last_builds(jobs);
        }
        Ok(jobs)
    }

    async fn fetch_deployment(&self, criteria: &CriteriaSet) -> Result<JobSet> {
        let records = self.search(&DEPLOYMENT_FIELDS).await?;
        let records = apply_filters(records, &self.job_checks(criteria)?);

        let mut jobs = JobSet::new();
        for record in records {
            let mut job = Job::new(&record.job_name);
            job.url = record.job_url.clone();
            job.deployment = Some(Deployment {
                release: record.deployment_release,
                platform: record.deployment_platform,
                topology: record.deployment_topology,
            });
            match jobs.get_mut(&job.name) {
                Some(existing) => existing.merge(job),
                None => {
                    jobs.insert(job.name.clone(), job);
                }
            }
        }
        Ok(jobs)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: HitsEnvelope,
}

#[derive(Debug, Deserialize)]
struct HitsEnvelope {
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_source")]
    source: EsDocument,
}

/// Jenkins shippers send build_num as an int, others as a string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumOrString {
    Num(u64),
    Str(String),
}

impl NumOrString {
    fn into_string(self) -> String {
        match self {
            Self::Num(n) => n.to_string(),
            Self::Str(s) => s,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EsDocument {
    job_name: Option<String>,
    job_url: Option<String>,
    build_num: Option<NumOrString>,
    build_result: Option<String>,
    build_duration: Option<f64>,
    test_name: Option<String>,
    test_class_name: Option<String>,
    test_status: Option<String>,
    test_duration: Option<f64>,
    deployment_release: Option<String>,
    deployment_platform: Option<String>,
    deployment_topology: Option<String>,
}

impl EsDocument {
    /// A usable record names its job; build numbers become strings and
    /// test durations move from seconds to milliseconds.
    fn normalize(self) -> Option<EsRecord> {
        let job_name = self.job_name?;
        Some(EsRecord {
            job_name,
            job_url: self.job_url,
            build_num: self.build_num.map(NumOrString::into_string),
            build_result: self.build_result,
            build_duration: self.build_duration,
            test_name: self.test_name,
            test_class_name: self.test_class_name,
            test_status: self.test_status,
            test_duration_ms: self.test_duration.map(|seconds| seconds * 1000.0),
            deployment_release: self.deployment_release,
            deployment_platform: self.deployment_platform,
            deployment_topology: self.deployment_topology,
        })
    }
}

#[derive(Debug, Clone)]
struct EsRecord {
    job_name: String,
    job_url: Option<String>,
    build_num: Option<String>,
    build_result: Option<String>,
    build_duration: Option<f64>,
    test_name: Option<String>,
    test_class_name: Option<String>,
    test_status: Option<String>,
    test_duration_ms: Option<f64>,
    deployment_release: Option<String>,
    deployment_platform: Option<String>,
    deployment_topology: Option<String>,
}
