//! Testflinger CLI - command-line interface for the dispatch server

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tabled::{Table, Tabled};
use testflinger_sdk::{SearchQuery, TagMatch, TestflingerClient};

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";

#[derive(Parser)]
#[command(name = "testflinger-cli")]
#[command(about = "Testflinger dispatch server CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Testflinger server URL
    #[arg(long, env = "TESTFLINGER_SERVER", default_value = DEFAULT_SERVER_URL)]
    server: String,

    /// Bearer access token, if the server requires authentication
    #[arg(long, env = "TESTFLINGER_TOKEN")]
    token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a job spec (JSON file, or "-" for stdin)
    Submit {
        /// Path to a JSON job spec file, or "-" for stdin
        file: String,
    },

    /// Poll a queue for the next waiting job (used for debugging agents)
    Poll {
        /// Queue name
        queue: String,
    },

    /// Show a job's current spec and state
    Status {
        /// Job ID
        job_id: String,
    },

    /// Cancel a job
    Cancel {
        /// Job ID
        job_id: String,
    },

    /// Show a job's queue position
    Position {
        /// Job ID
        job_id: String,
    },

    /// Fetch a job's result document
    Results {
        /// Job ID
        job_id: String,
    },

    /// Fetch a job's reconstructed log for one phase
    Logs {
        /// Job ID
        job_id: String,

        /// Log type
        #[arg(long, default_value = "output")]
        log_type: String,

        /// Restrict to a single phase
        #[arg(long)]
        phase: Option<String>,
    },

    /// Search jobs by tag and state
    Search {
        /// Comma-separated tags
        #[arg(long)]
        tags: Vec<String>,

        /// Tag match mode
        #[arg(long, value_enum, default_value = "any")]
        match_mode: MatchMode,

        /// Comma-separated job states
        #[arg(long)]
        state: Vec<String>,
    },
}

#[derive(Clone, clap::ValueEnum)]
enum MatchMode {
    Any,
    All,
}

#[derive(Tabled)]
struct JobRow {
    job_id: String,
    queue: String,
    state: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut client = TestflingerClient::connect(&cli.server).context("failed to build client")?;
    if let Some(token) = cli.token.clone() {
        client = client.with_bearer_token(token);
    }

    match cli.command {
        Commands::Submit { file } => submit(&client, &file).await?,
        Commands::Poll { queue } => poll(&client, &queue).await?,
        Commands::Status { job_id } => status(&client, &job_id).await?,
        Commands::Cancel { job_id } => cancel(&client, &job_id).await?,
        Commands::Position { job_id } => position(&client, &job_id).await?,
        Commands::Results { job_id } => results(&client, &job_id).await?,
        Commands::Logs { job_id, log_type, phase } => logs(&client, &job_id, &log_type, phase.as_deref()).await?,
        Commands::Search { tags, match_mode, state } => search(&client, tags, match_mode, state).await?,
    }

    Ok(())
}

fn read_spec(file: &str) -> Result<testflinger_sdk::JobSpec> {
    let raw = if file == "-" {
        std::io::read_to_string(std::io::stdin()).context("failed to read job spec from stdin")?
    } else {
        std::fs::read_to_string(file).with_context(|| format!("failed to read {file}"))?
    };
    serde_json::from_str(&raw).context("job spec is not valid JSON")
}

async fn submit(client: &TestflingerClient, file: &str) -> Result<()> {
    let spec = read_spec(file)?;
    let job_id = client.submit_job(&spec).await?;
    println!("{} {}", "job submitted:".green().bold(), job_id);
    Ok(())
}

async fn poll(client: &TestflingerClient, queue: &str) -> Result<()> {
    match client.poll_job(queue).await? {
        Some(assignment) => {
            println!("{}", format!("claimed job {}", assignment.job_id).green().bold());
            println!("{}", serde_json::to_string_pretty(&assignment.spec)?);
        }
        None => println!("{}", "no job waiting".yellow()),
    }
    Ok(())
}

async fn status(client: &TestflingerClient, job_id: &str) -> Result<()> {
    match client.get_job(job_id).await? {
        Some(job) => {
            println!("{} {}", "job_id:".bold(), job.job_id);
            println!("{} {}", "state:".bold(), job.job_state.cyan());
            println!("{} {}", "queue:".bold(), job.spec.job_queue);
        }
        None => println!("{}", format!("no such job: {job_id}").red()),
    }
    Ok(())
}

async fn cancel(client: &TestflingerClient, job_id: &str) -> Result<()> {
    client.cancel_job(job_id).await?;
    println!("{}", format!("job {job_id} cancelled").green().bold());
    Ok(())
}

async fn position(client: &TestflingerClient, job_id: &str) -> Result<()> {
    match client.job_position(job_id).await? {
        Some(pos) => println!("{} {pos}", "position:".bold()),
        None => println!("{}", "job is no longer waiting".yellow()),
    }
    Ok(())
}

async fn results(client: &TestflingerClient, job_id: &str) -> Result<()> {
    match client.get_result(job_id).await? {
        Some(result) => println!("{}", serde_json::to_string_pretty(&result)?),
        None => println!("{}", "no result yet".yellow()),
    }
    Ok(())
}

async fn logs(client: &TestflingerClient, job_id: &str, log_type: &str, phase: Option<&str>) -> Result<()> {
    let log = client.get_log(job_id, log_type, phase).await?;
    println!("{}", serde_json::to_string_pretty(&log)?);
    Ok(())
}

async fn search(client: &TestflingerClient, tags: Vec<String>, match_mode: MatchMode, state: Vec<String>) -> Result<()> {
    let query = SearchQuery {
        tags,
        match_mode: Some(match match_mode {
            MatchMode::Any => TagMatch::Any,
            MatchMode::All => TagMatch::All,
        }),
        states: state,
    };
    let jobs = client.search_jobs(query).await?;
    if jobs.is_empty() {
        println!("{}", "no jobs matched".yellow());
        return Ok(());
    }
    let rows: Vec<JobRow> = jobs
        .into_iter()
        .map(|j| JobRow { job_id: j.job_id, queue: j.spec.job_queue, state: j.job_state })
        .collect();
    println!("{}", Table::new(rows));
    Ok(())
}
