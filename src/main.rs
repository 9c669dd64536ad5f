use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use student_activity_portal::batches::{cutoff_date, summarize_batches};
use student_activity_portal::config::Config;
use student_activity_portal::export::{render, DownloadFormat};
use student_activity_portal::http;
use student_activity_portal::query::{query_from_params, run_export};
use student_activity_portal::roster;
use student_activity_portal::store::{MemoryStore, PgStore, PortalStore};

#[derive(Parser)]
#[command(name = "activity-portal")]
#[command(about = "Student activity tracking portal", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import students from a CSV file
    ImportStudents {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Import batches from a CSV file
    ImportBatches {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Summarise batch response rates
    Batches {
        #[arg(long, default_value_t = 30)]
        since_days: i64,
    },
    /// Export activity records to a file
    Export {
        #[arg(long, default_value = "All")]
        activity_type: String,
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        start_date: Option<String>,
        #[arg(long)]
        end_date: Option<String>,
        /// Comma-separated
        #[arg(long)]
        department: Option<String>,
        #[arg(long)]
        batch_no: Option<String>,
        #[arg(long)]
        class_division: Option<String>,
        #[arg(long)]
        gender: Option<String>,
        #[arg(long)]
        email: Option<String>,
        /// Comma-separated owner emails
        #[arg(long)]
        email_id: Option<String>,
        #[arg(long)]
        sort: Option<String>,
        #[arg(long)]
        order: Option<String>,
        /// json or xlsx; ignored for single-type CSV exports
        #[arg(long, default_value = "xlsx")]
        format: String,
        #[arg(long)]
        out: PathBuf,
    },
    /// Run the HTTP service
    Serve {
        /// Keep everything in process memory instead of Postgres
        #[arg(long)]
        in_memory: bool,
        /// Seed the store before serving
        #[arg(long)]
        seed: bool,
    },
}

async fn connect(config: &Config) -> anyhow::Result<PgStore> {
    PgStore::connect(config.require_database_url()?, config.max_connections).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::InitDb => {
            connect(&config).await?.migrate().await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            roster::seed(&connect(&config).await?).await?;
            println!("Seed data inserted.");
        }
        Commands::ImportStudents { csv } => {
            let file = std::fs::File::open(&csv)
                .with_context(|| format!("failed to open {}", csv.display()))?;
            let students = roster::parse_students(file)?;
            let imported = roster::import_students(&connect(&config).await?, students).await?;
            println!("Imported {imported} students from {}.", csv.display());
        }
        Commands::ImportBatches { csv } => {
            let file = std::fs::File::open(&csv)
                .with_context(|| format!("failed to open {}", csv.display()))?;
            let batches = roster::parse_batches(file)?;
            let imported = roster::import_batches(&connect(&config).await?, batches).await?;
            println!("Imported {imported} batches from {}.", csv.display());
        }
        Commands::Batches { since_days } => {
            let store = connect(&config).await?;
            let since_date = cutoff_date(since_days);
            let summaries = summarize_batches(&store, since_date).await?;

            if summaries.is_empty() {
                println!("No batches registered.");
                return Ok(());
            }

            println!("Batch responses since {since_date}:");
            for summary in summaries {
                println!(
                    "- {}: {}/{} updated ({:.2}%)",
                    summary.key,
                    summary.updated_students,
                    summary.total_students,
                    summary.response_percentage
                );
            }
        }
        Commands::Export {
            activity_type,
            status,
            start_date,
            end_date,
            department,
            batch_no,
            class_division,
            gender,
            email,
            email_id,
            sort,
            order,
            format,
            out,
        } => {
            let mut params = HashMap::from([("activity_type".to_string(), activity_type)]);
            for (key, value) in [
                ("status", status),
                ("start_date", start_date),
                ("end_date", end_date),
                ("department", department),
                ("batch_no", batch_no),
                ("class_division", class_division),
                ("gender", gender),
                ("email", email),
                ("email_id", email_id),
                ("sort", sort),
                ("order", order),
            ] {
                if let Some(value) = value {
                    params.insert(key.to_string(), value);
                }
            }

            let store = connect(&config).await?;
            let format = DownloadFormat::parse(Some(&format))?;
            let query = query_from_params(&store, &params).await?;
            let set = run_export(&store, &query).await?;
            let download = render(&set, format)?;

            std::fs::write(&out, &download.body)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!(
                "Exported {} records to {}.",
                set.records().count(),
                out.display()
            );
        }
        Commands::Serve { in_memory, seed } => {
            let store: Arc<dyn PortalStore> = if in_memory {
                Arc::new(MemoryStore::new())
            } else {
                let store = connect(&config).await?;
                store.migrate().await?;
                Arc::new(store)
            };
            if seed {
                roster::seed(store.as_ref()).await?;
            }
            http::serve(config, store).await?;
        }
    }

    Ok(())
}
