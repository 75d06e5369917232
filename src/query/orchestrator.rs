use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{debug, warn};
use serde::Serialize;

use crate::error::{CiscopeError, Result};
use crate::models::{Environment, JobSet};
use crate::query::criteria::{CriteriaSet, Handler};
use crate::sources::{invoke, resolve, Source};

#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Criteria below this level never trigger a fetch.
    pub start_level: u32,
    /// Deadline for one backend invocation.
    pub timeout: Duration,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            start_level: 1,
            timeout: Duration::from_secs(120),
        }
    }
}

/// A non-fatal problem encountered during the run. Faults are collected
/// and returned with the partial result, never swallowed.
#[derive(Debug, Clone, Serialize)]
pub struct Fault {
    pub environment: String,
    pub system: String,
    pub criterion: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct QueryOutcome {
    pub collected_at: DateTime<Utc>,
    pub environments: Vec<Environment>,
    pub faults: Vec<Fault>,
}

pub struct Orchestrator {
    environments: Vec<Environment>,
}

impl Orchestrator {
    pub fn new(environments: Vec<Environment>) -> Self {
        Self { environments }
    }

    /// Walk the criteria from most to least specific and populate the
    /// model. Once a level has fetched, broader criteria are consumed as
    /// filters inside that fetch instead of re-expanding the query: a
    /// criterion fetches only while `level >= start_level` and
    /// `level >= last_level`, and only a criterion that ran its handler
    /// moves `last_level`. Criteria at the same level all run.
    pub async fn run_query(mut self, criteria: &CriteriaSet, options: &QueryOptions) -> QueryOutcome {
        let mut faults: Vec<Fault> = Vec::new();
        let mut last_level: i64 = -1;

        let ordered: Vec<_> = criteria
            .by_level_descending()
            .into_iter()
            .cloned()
            .collect();
        for criterion in ordered {
            let level = i64::from(criterion.level);
            if level < i64::from(options.start_level) || level < last_level {
                continue;
            }
            let Some(handler) = criterion.handler else {
                // filter-only criteria are consumed inside whichever
                // fetch does execute and never move last_level
                continue;
            };

            let mut fetches = Vec::new();
            for (env_index, environment) in self.environments.iter().enumerate() {
                for (sys_index, system) in environment.systems.iter().enumerate() {
                    let source = match resolve(system, handler) {
                        Ok(source) => source,
                        Err(err) => {
                            debug!(
                                "skipping {}/{} for '{}': {err}",
                                environment.name, system.name, criterion.name
                            );
                            faults.push(Fault {
                                environment: environment.name.clone(),
                                system: system.name.clone(),
                                criterion: criterion.name.clone(),
                                error: err.to_string(),
                            });
                            continue;
                        }
                    };

                    debug!(
                        "querying {}/{} with {} via source '{}'",
                        environment.name,
                        system.name,
                        handler,
                        source.name()
                    );
                    let active = criteria.clone();
                    let deadline = options.timeout;
                    fetches.push(async move {
                        let result =
                            match tokio::time::timeout(deadline, fetch(source, handler, active))
                                .await
                            {
                                Ok(result) => result,
                                Err(_) => Err(CiscopeError::BackendFetch(format!(
                                    "timed out after {}s",
                                    deadline.as_secs()
                                ))),
                            };
                        (env_index, sys_index, result)
                    });
                }
            }

            // the join is the level barrier: no merge for this criterion
            // starts before every fetch of the step has finished, and the
            // merges themselves are applied by this single writer
            for (env_index, sys_index, result) in join_all(fetches).await {
                let environment = &mut self.environments[env_index];
                match result {
                    Ok(jobs) => {
                        debug!(
                            "merging {} jobs into {}/{}",
                            jobs.len(),
                            environment.name,
                            environment.systems[sys_index].name
                        );
                        environment.systems[sys_index].add_jobs(jobs);
                    }
                    Err(err) => {
                        warn!(
                            "{} failed on {}/{}: {err}",
                            handler, environment.name, environment.systems[sys_index].name
                        );
                        faults.push(Fault {
                            environment: environment.name.clone(),
                            system: environment.systems[sys_index].name.clone(),
                            criterion: criterion.name.clone(),
                            error: err.to_string(),
                        });
                    }
                }
            }

            last_level = level;
        }

        QueryOutcome {
            collected_at: Utc::now(),
            environments: self.environments,
            faults,
        }
    }
}

async fn fetch(source: Arc<dyn Source>, handler: Handler, criteria: CriteriaSet) -> Result<JobSet> {
    invoke(source.as_ref(), handler, &criteria).await
}
