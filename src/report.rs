use std::fmt::Write;

use crate::models::{Build, Job, Test};
use crate::query::orchestrator::QueryOutcome;

/// One indented block per environment, system, job, build and test,
/// followed by the faults collected during the run.
pub fn render_text(outcome: &QueryOutcome) -> String {
    let mut out = String::new();
    for environment in &outcome.environments {
        let _ = writeln!(out, "Environment: {}", environment.name);
        for system in &environment.systems {
            let _ = writeln!(out, "  System: {} (type: {})", system.name, system.system_type);
            for job in system.jobs.values() {
                render_job(&mut out, job);
            }
            let _ = writeln!(out, "    Total jobs: {}", system.jobs.len());
        }
    }

    if !outcome.faults.is_empty() {
        let _ = writeln!(out, "Warnings:");
        for fault in &outcome.faults {
            let _ = writeln!(
                out,
                "  {}/{} [{}]: {}",
                fault.environment, fault.system, fault.criterion, fault.error
            );
        }
    }
    out
}

fn render_job(out: &mut String, job: &Job) {
    let _ = writeln!(out, "    Job: {}", job.name);
    if let Some(url) = &job.url {
        let _ = writeln!(out, "      URL: {url}");
    }
    for build in job.builds.values() {
        render_build(out, build);
    }
    if let Some(deployment) = &job.deployment {
        let _ = writeln!(out, "      Deployment:");
        if let Some(release) = &deployment.release {
            let _ = writeln!(out, "        Release: {release}");
        }
        if let Some(platform) = &deployment.platform {
            let _ = writeln!(out, "        Platform: {platform}");
        }
        if let Some(topology) = &deployment.topology {
            let _ = writeln!(out, "        Topology: {topology}");
        }
    }
}

fn render_build(out: &mut String, build: &Build) {
    let _ = writeln!(out, "      Build: {}", build.id);
    if let Some(status) = &build.status {
        let _ = writeln!(out, "        Status: {status}");
    }
    if let Some(duration) = build.duration {
        let _ = writeln!(out, "        Duration: {duration}ms");
    }
    for test in &build.tests {
        render_test(out, test);
    }
}

fn render_test(out: &mut String, test: &Test) {
    let _ = writeln!(out, "        Test: {}", test.name);
    if let Some(class_name) = &test.class_name {
        let _ = writeln!(out, "          Class: {class_name}");
    }
    let _ = writeln!(out, "          Result: {}", test.result.as_str());
    if let Some(duration) = test.duration_ms {
        let _ = writeln!(out, "          Duration: {duration}ms");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Environment, System, TestResult};
    use crate::query::orchestrator::Fault;
    use chrono::Utc;

    #[test]
    fn test_report_renders_the_hierarchy() {
        let mut environment = Environment::new("prod");
        let mut system = System::new("gateA", "jenkins", Vec::new());
        let mut job = Job::new("job1").with_url("http://ci/job1");
        let mut build = Build::new("10").with_status("SUCCESS");
        let mut test = Test::new("test_ping", TestResult::Failure);
        test.class_name = Some("net.Smoke".into());
        build.add_test(test);
        job.add_build(build);
        system.add_job(job);
        environment.add_system(system);

        let outcome = QueryOutcome {
            collected_at: Utc::now(),
            environments: vec![environment],
            faults: vec![Fault {
                environment: "prod".into(),
                system: "gateB".into(),
                criterion: "tests".into(),
                error: "no enabled source in system 'gateB' implements 'fetch_tests'".into(),
            }],
        };

        let text = render_text(&outcome);

        assert!(text.contains("Environment: prod"));
        assert!(text.contains("  System: gateA (type: jenkins)"));
        assert!(text.contains("    Job: job1"));
        assert!(text.contains("      Build: 10"));
        assert!(text.contains("        Test: test_ping"));
        assert!(text.contains("          Result: FAILURE"));
        assert!(text.contains("Warnings:"));
        assert!(text.contains("prod/gateB [tests]"));
    }
}
