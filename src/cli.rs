use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use log::info;

use crate::config;
use crate::query::criteria::{CriteriaSet, Criterion, CriterionValue, RangeFilter};
use crate::query::orchestrator::{Orchestrator, QueryOptions, QueryOutcome};
use crate::report;

#[derive(Parser)]
#[command(name = "ciscope")]
#[command(author, version, about = "CI status aggregation tool", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output file path (defaults to stdout)
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Pretty print JSON output
    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Yaml,
}

#[derive(Subcommand)]
enum Commands {
    /// Query CI status across the configured environments
    Query {
        /// Configuration file path
        #[arg(short, long, env = "CISCOPE_CONFIG", default_value = "ciscope.yaml")]
        config: PathBuf,

        /// Select jobs by regex; no value selects every job
        #[arg(long, num_args = 0..)]
        jobs: Option<Vec<String>>,

        /// Select builds by id; no value selects every build
        #[arg(long, num_args = 0..)]
        builds: Option<Vec<String>>,

        /// Keep only the numerically last build of each job
        #[arg(long)]
        last_build: bool,

        /// Keep builds with one of these statuses
        #[arg(long)]
        build_status: Vec<String>,

        /// Keep builds whose duration in ms satisfies a comparison, e.g. '>=300'
        #[arg(long)]
        build_duration: Vec<String>,

        /// Select tests by regex on name or class; requires --builds or --last-build
        #[arg(long, num_args = 0..)]
        tests: Option<Vec<String>>,

        /// Keep tests with one of these results
        #[arg(long)]
        test_result: Vec<String>,

        /// Keep tests whose duration in ms satisfies a comparison, e.g. '<5000'
        #[arg(long)]
        test_duration: Vec<String>,

        /// Fetch deployment information for the selected jobs
        #[arg(long)]
        deployment: bool,

        /// Criteria below this level never trigger a fetch
        #[arg(long, default_value_t = 1)]
        start_level: u32,

        /// Per-fetch timeout in seconds
        #[arg(long, default_value_t = 120)]
        timeout: u64,
    },
}

impl Cli {
    pub async fn execute(&self) -> Result<()> {
        match &self.command {
            Commands::Query {
                config: config_path,
                jobs,
                builds,
                last_build,
                build_status,
                build_duration,
                tests,
                test_result,
                test_duration,
                deployment,
                start_level,
                timeout,
            } => {
                let config = config::load(config_path)?;
                let environments = config::build_environments(config)?;
                info!(
                    "loaded {} environment(s) from {}",
                    environments.len(),
                    config_path.display()
                );

                let mut criteria = CriteriaSet::new();
                if let Some(patterns) = jobs {
                    criteria.insert(Criterion::new(
                        "jobs",
                        CriterionValue::List(patterns.clone()),
                    )?);
                }
                if let Some(ids) = builds {
                    criteria.insert(Criterion::new("builds", CriterionValue::List(ids.clone()))?);
                }
                if *last_build {
                    criteria.insert(Criterion::new("last_build", CriterionValue::Flag)?);
                }
                if !build_status.is_empty() {
                    criteria.insert(Criterion::new(
                        "build_status",
                        CriterionValue::List(build_status.clone()),
                    )?);
                }
                if !build_duration.is_empty() {
                    criteria.insert(Criterion::new(
                        "build_duration",
                        CriterionValue::Ranges(parse_ranges(build_duration)?),
                    )?);
                }
                if let Some(patterns) = tests {
                    criteria.insert(Criterion::new(
                        "tests",
                        CriterionValue::List(patterns.clone()),
                    )?);
                }
                if !test_result.is_empty() {
                    criteria.insert(Criterion::new(
                        "test_result",
                        CriterionValue::List(test_result.clone()),
                    )?);
                }
                if !test_duration.is_empty() {
                    criteria.insert(Criterion::new(
                        "test_duration",
                        CriterionValue::Ranges(parse_ranges(test_duration)?),
                    )?);
                }
                if *deployment {
                    criteria.insert(Criterion::new("deployment", CriterionValue::Flag)?);
                }

                if criteria.is_empty() {
                    info!("no query criteria supplied; nothing will be fetched");
                }

                let options = QueryOptions {
                    start_level: *start_level,
                    timeout: Duration::from_secs(*timeout),
                };
                let outcome = Orchestrator::new(environments)
                    .run_query(&criteria, &options)
                    .await;

                if !outcome.faults.is_empty() {
                    info!("query finished with {} warning(s)", outcome.faults.len());
                }

                let rendered = self.render(&outcome)?;
                if let Some(output_path) = &self.output {
                    std::fs::write(output_path, rendered)?;
                    info!("results written to: {}", output_path.display());
                } else {
                    println!("{rendered}");
                }

                Ok(())
            }
        }
    }

    fn render(&self, outcome: &QueryOutcome) -> Result<String> {
        let rendered = match self.format {
            OutputFormat::Text => report::render_text(outcome),
            OutputFormat::Json => {
                if self.pretty {
                    serde_json::to_string_pretty(outcome)?
                } else {
                    serde_json::to_string(outcome)?
                }
            }
            OutputFormat::Yaml => serde_yaml::to_string(outcome)?,
        };
        Ok(rendered)
    }
}

fn parse_ranges(raw: &[String]) -> Result<Vec<RangeFilter>> {
    let mut ranges = Vec::new();
    for value in raw {
        ranges.push(value.parse::<RangeFilter>()?);
    }
    Ok(ranges)
}
