//! CI triage - command-line entry point.
//!
//! Every subcommand prints a single pretty JSON document to stdout. Logs go
//! to stderr.

use std::collections::BTreeMap;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ci_triage_lib::config::Config;
use ci_triage_lib::db::DbPool;
use ci_triage_lib::error::{AppError, AppResult};
use ci_triage_lib::models::{JobId, PackageMapping, PackageName};
use ci_triage_lib::services::instability::InstabilityReport;
use ci_triage_lib::services::investigator::Investigation;
use ci_triage_lib::services::{
    FailureFilter, GroupBy, InstabilityAnalyzer, JobCache, OpenQaClient, ResultsDiff,
    diff_results, investigate, suppress_unstable, updated_packages,
};

/// Failure triage for openQA test runs.
#[derive(Parser)]
#[command(name = "ci-triage", version)]
#[command(about = "Classify, compare and investigate openQA test failures", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare a job's failures against reference jobs.
    ///
    /// Failures missing from every reference are regressions; reference
    /// failures that no longer happen are reported as fixed.
    Compare {
        /// Job to judge
        job: JobId,

        /// Reference job (repeatable)
        #[arg(long = "reference", short = 'r')]
        references: Vec<JobId>,

        /// Also flag tests found unstable in recent history
        #[arg(long)]
        instability: bool,
    },

    /// Find unstable tests in the history of a test-suite job.
    Unstable {
        job: JobId,

        /// Number of earlier valid runs to sample
        #[arg(long)]
        samples: Option<usize>,
    },

    /// Search recent runs of a test suite for matching failures.
    Investigate {
        /// Test suite name (e.g. system_tests_splitgpg)
        #[arg(long)]
        suite: String,

        /// Test pattern, `NAME[/TITLE]`, both parts regexes
        #[arg(long)]
        test: Option<String>,

        /// Error pattern matched against failure and cleanup output
        #[arg(long)]
        error: Option<String>,

        /// Number of most recent runs to look at
        #[arg(long)]
        last: Option<usize>,

        /// Tally failures by test, template, error or worker
        #[arg(long)]
        group_by: Option<GroupBy>,
    },

    /// List the mapped packages a job installed.
    Packages { job: JobId },
}

#[derive(Serialize)]
struct CompareOutput {
    job_id: JobId,
    references: Vec<JobId>,
    pull_requests: Vec<String>,
    diff: ResultsDiff,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    instability: Vec<InstabilityReport>,
}

#[derive(Serialize)]
struct InvestigateOutput {
    #[serde(flatten)]
    investigation: Investigation,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tally: Option<BTreeMap<String, usize>>,
}

#[derive(Serialize)]
struct PackagesOutput {
    job_id: JobId,
    packages: Vec<PackageName>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Logs go to stderr so stdout stays valid JSON
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            error!("Check TRIAGE_OPENQA_URL, TRIAGE_SAMPLE_SIZE and TRIAGE_HISTORY_LEN");
            return ExitCode::FAILURE;
        }
    };

    match run(cli.command, &config).await {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("ci-triage: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, config: &Config) -> AppResult<String> {
    info!("Using openQA at {}", config.openqa_url);

    let db = DbPool::new(config).await?;
    let source = OpenQaClient::new(config)?;
    let mut cache = JobCache::new(db, source);

    match command {
        Commands::Compare {
            job,
            references,
            instability,
        } => {
            let output = compare(&mut cache, config, job, references, instability).await?;
            Ok(serde_json::to_string_pretty(&output)?)
        }
        Commands::Unstable { job, samples } => {
            let analyzer = InstabilityAnalyzer::new(samples.unwrap_or(config.sample_size));
            let report = analyzer.analyze(&mut cache, job).await?;
            Ok(serde_json::to_string_pretty(&report)?)
        }
        Commands::Investigate {
            suite,
            test,
            error,
            last,
            group_by,
        } => {
            let filter = FailureFilter::from_patterns(test.as_deref(), error.as_deref())?;
            let history_len = last.unwrap_or(config.history_len);
            let investigation = investigate(&mut cache, &suite, history_len, &filter).await?;
            let tally = group_by.map(|key| investigation.tally(key));
            let output = InvestigateOutput {
                investigation,
                group_by: group_by.map(|key| key.to_string()),
                tally,
            };
            Ok(serde_json::to_string_pretty(&output)?)
        }
        Commands::Packages { job } => {
            let mapping = match &config.package_mapping {
                Some(path) => PackageMapping::load(path).await?,
                None => PackageMapping::default(),
            };
            if mapping.is_empty() {
                info!("Package mapping is empty, no package will be reported");
            }
            let packages = updated_packages(&mut cache, &mapping, job).await?;
            let output = PackagesOutput {
                job_id: job,
                packages: packages.into_iter().collect(),
            };
            Ok(serde_json::to_string_pretty(&output)?)
        }
    }
}

async fn compare(
    cache: &mut JobCache<OpenQaClient>,
    config: &Config,
    job_id: JobId,
    references: Vec<JobId>,
    with_instability: bool,
) -> AppResult<CompareOutput> {
    let job = cache.get_job(job_id).await?;
    let current = cache.comparable_results(job_id).await?;

    let mut baseline = Vec::with_capacity(references.len());
    for reference in &references {
        if *reference == job_id {
            return Err(AppError::InvalidInput(format!(
                "Job {} cannot be its own reference",
                job_id
            )));
        }
        baseline.push(cache.comparable_results(*reference).await?);
    }

    let mut diff = diff_results(&current, &baseline);

    let mut reports = Vec::new();
    if with_instability {
        let suites: Vec<(String, JobId)> = if job.is_orphan() {
            cache
                .children_pruned(job_id)
                .await?
                .into_iter()
                .map(|(name, child)| (name, child.job_id))
                .collect()
        } else {
            vec![(job.job_name.clone(), job_id)]
        };

        let analyzer = InstabilityAnalyzer::new(config.sample_size);
        for (suite, suite_job) in suites {
            let report = analyzer.analyze(cache, suite_job).await?;
            suppress_unstable(&mut diff, &suite, &report);
            reports.push(report);
        }
    }

    Ok(CompareOutput {
        job_id,
        references,
        pull_requests: job.pull_requests(),
        diff,
        instability: reports,
    })
}
