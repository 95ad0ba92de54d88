//! jury-balance CLI: operator interface to the distribution core.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use jury_balance::config::Config;
use jury_balance::db::Db;
use jury_balance::engine::DistributionService;
use jury_balance::model::{DistributionJob, JobId, ReviewerId, RoundId};
use jury_balance::telemetry::{TelemetryConfig, init_telemetry};
use secrecy::ExposeSecret;

#[derive(Parser)]
#[command(name = "jury-balance", about = "Fair jury assignment for contest rounds")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply pending database migrations
    Migrate,
    /// Top up quorum and distribute a round's assignments
    Distribute {
        /// Round ID
        round: RoundId,
        /// Restrict to these reviewers (default: every active reviewer)
        #[arg(long = "reviewer")]
        reviewers: Vec<ReviewerId>,
    },
    /// Move unevaluated work from source reviewers to target reviewers
    Redistribute {
        /// Round ID
        round: RoundId,
        /// Donor reviewers
        #[arg(long, num_args = 0..)]
        source: Vec<ReviewerId>,
        /// Recipient reviewers
        #[arg(long, num_args = 1.., required = true)]
        target: Vec<ReviewerId>,
    },
    /// Show a distribution job
    Job {
        /// Job ID
        id: JobId,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let guard = init_telemetry(TelemetryConfig::from_config(&config))?;

    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;

    let result = match cli.command {
        Command::Migrate => {
            db.health_check().await?;
            println!("Migrations applied.");
            Ok(())
        }
        Command::Job { id } => cmd_job_show(&db, id).await,
        Command::Distribute { round, reviewers } => {
            let service = DistributionService::new(Arc::new(db), config.distribution);
            let handle = service.start_distribution(round, reviewers).await?;
            println!("Started job {}", handle.job_id);
            print_job(&handle.wait().await?)
        }
        Command::Redistribute {
            round,
            source,
            target,
        } => {
            let service = DistributionService::new(Arc::new(db), config.distribution);
            let handle = service.start_redistribution(round, source, target).await?;
            println!("Started job {}", handle.job_id);
            print_job(&handle.wait().await?)
        }
    };

    guard.force_flush();
    result
}

async fn cmd_job_show(db: &Db, id: JobId) -> anyhow::Result<()> {
    let Some(job) = db.find_job(id).await? else {
        anyhow::bail!("no distribution job {id}");
    };
    print_job(&job)
}

fn print_job(job: &DistributionJob) -> anyhow::Result<()> {
    println!("ID:         {}", job.id);
    println!("Round:      {}", job.round_id);
    println!("Kind:       {}", serde_json::to_string(&job.kind)?);
    println!("Status:     {}", job.status);
    println!("Succeeded:  {}", job.success_count);
    println!("Failed:     {}", job.failed_count);
    println!("Created:    {}", job.created_at);
    println!("Updated:    {}", job.updated_at);
    if !job.failures.is_empty() {
        println!("---");
        for (key, detail) in &job.failures {
            println!("{key}: {detail}");
        }
    }
    Ok(())
}
