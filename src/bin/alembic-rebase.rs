//! alembic-rebase CLI
//!
//! Usage:
//!   alembic-rebase 3f1c2a9b 7d4e8f01                 # rebase + replay on the database
//!   alembic-rebase --offline 3f1c2a9b 7d4e8f01       # rewrite files only
//!   alembic-rebase --dry-run --json 3f1c2a9b 7d4e8f01

use std::path::PathBuf;
use std::process::ExitCode;

use alembic_rebase::config::{mask_database_url, normalize_database_url};
use alembic_rebase::{
    AlembicConfig, AlembicRuntime, IntegrityRules, RebaseError, RebaseReport, RebaseRequest, Rebaser,
    Settings,
};
use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "alembic-rebase")]
#[command(version, about = "Move one alembic branch on top of another so history has a single head")]
struct Cli {
    /// Head of the branch to move
    base_head: String,

    /// Head of the branch that stays in place
    top_head: String,

    /// Path to alembic.ini
    #[arg(short = 'f', long = "config", default_value = "alembic.ini")]
    config: PathBuf,

    /// Path to an alembic-rebase.toml settings file
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Database URL (overrides sqlalchemy.url)
    #[arg(long, env = "ALEMBIC_REBASE_DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// Rewrite migration files without touching the database
    #[arg(long)]
    offline: bool,

    /// Validate and print the plan without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "alembic_rebase=debug"
    } else {
        "alembic_rebase=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(&cli).await {
        Ok(report) => {
            emit(&report, cli.json);
            ExitCode::SUCCESS
        }
        Err(err) => {
            let cause = err.downcast_ref::<RebaseError>();
            let report = match cause {
                Some(e) => RebaseReport::failure(e, format!("{err:#}")),
                None => RebaseReport::error("error", format!("{err:#}"), false),
            };
            emit(&report, cli.json);

            match cause {
                Some(e) if e.integrity_after_write() => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

async fn run(cli: &Cli) -> Result<RebaseReport> {
    let config = AlembicConfig::load(&cli.config)
        .map_err(RebaseError::from)
        .with_context(|| format!("reading {}", cli.config.display()))?;
    let settings = Settings::load(cli.settings.as_deref(), config.working_dir())
        .map_err(RebaseError::from)
        .context("loading settings")?;

    let rebaser = Rebaser::new(config.versions_dir.clone())
        .with_rules(IntegrityRules::new(settings.entry_points.clone()));
    let request = RebaseRequest::new(&cli.base_head, &cli.top_head);

    if !cli.json {
        println!(
            "{} {} onto {} in {}",
            "→".cyan(),
            request.base_head.yellow(),
            request.target_head.yellow(),
            config.versions_dir.display()
        );
    }

    if cli.dry_run {
        let prepared = rebaser.prepare(&request)?;
        return Ok(RebaseReport::planned(&prepared));
    }

    if cli.offline {
        let outcome = rebaser.run(&request)?;
        return Ok(RebaseReport::rebased(&outcome, Vec::new(), true));
    }

    let url = match cli
        .database_url
        .as_deref()
        .or(settings.database_url.as_deref())
    {
        Some(url) => url,
        None => config.require_database_url().map_err(RebaseError::from)?,
    };
    let url = normalize_database_url(url).map_err(RebaseError::from)?;
    tracing::info!(url = %mask_database_url(&url), "live mode");

    let runtime = AlembicRuntime::new(settings.alembic_bin.clone(), config.ini_path.clone(), url);
    let live = rebaser.run_live(&request, &runtime).await?;

    Ok(RebaseReport::rebased(&live.outcome, live.applied, false))
}

fn emit(report: &RebaseReport, json: bool) {
    if json {
        match report.to_json() {
            Ok(text) => println!("{text}"),
            Err(e) => eprintln!("{} failed to serialize report: {e}", "✗".red()),
        }
        return;
    }

    match report {
        RebaseReport::Error { .. } => eprint!("{}", report.render()),
        _ => print!("{}", report.render()),
    }
}
