use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

mod aggregate;
mod assemble;
mod db;
mod enrich;
mod filter;
mod models;
mod notify;
mod report;

use enrich::OpenAiClient;
use models::ReportType;
use notify::Notifier;
use report::{ExportFormat, ReportPipeline};

#[derive(Parser)]
#[command(name = "grid-risk-reports")]
#[command(about = "Consumer risk report pipeline for electricity distribution", long_about = None)]
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
    /// Import a unit snapshot from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Generate a report and wait for it to reach a terminal status
    Generate {
        #[arg(long, value_enum)]
        report_type: ReportType,
        /// Requesting user identifier
        #[arg(long)]
        user: String,
        /// Filter specification as a JSON array of clauses
        #[arg(long)]
        filters: Option<String>,
    },
    /// Show a report's status and metadata
    Show {
        #[arg(long)]
        id: Uuid,
    },
    /// List recent reports for a user
    List {
        #[arg(long)]
        user: String,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Export a ready report as JSON or CSV
    Export {
        #[arg(long)]
        id: Uuid,
        #[arg(long, value_enum, default_value = "csv")]
        format: ExportFormat,
        #[arg(long, default_value = "exports")]
        out: PathBuf,
    },
    /// List unread notifications for a user
    Notifications {
        #[arg(long)]
        user: String,
    },
    /// Mark a notification as read
    MarkRead {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        user: String,
    },
    /// Scan high-risk units and raise alert notifications
    ScanAlerts {
        /// User identifiers to notify (repeatable)
        #[arg(long = "recipient", required = true)]
        recipients: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let imported = db::import_csv(&pool, &csv).await?;
            println!("Imported {imported} units from {}.", csv.display());
        }
        Commands::Generate {
            report_type,
            user,
            filters,
        } => {
            let filters = match filters {
                Some(raw) => serde_json::from_str(&raw).context("filters must be valid JSON")?,
                None => serde_json::Value::Null,
            };
            let pipeline =
                ReportPipeline::new(pool, OpenAiClient::from_env(), Notifier::from_env());
            let generated = pipeline.generate(report_type, &user, filters).await?;
            println!(
                "Report {} ({}) is {}.",
                generated.id,
                generated.title,
                generated.status.as_str()
            );
        }
        Commands::Show { id } => {
            let found = db::get_report(&pool, id).await?;
            println!("{} - {}", found.id, found.title);
            println!("Type: {}", found.report_type.as_str());
            println!("Status: {}", found.status.as_str());
            println!("Requested by: {}", found.requested_by);
            println!("Created: {}", found.created_at);
            if let Some(generated_at) = found.generated_at {
                println!("Generated: {generated_at}");
            }
            if let Some(expires_at) = found.expires_at {
                println!("Expires: {expires_at}");
            }
        }
        Commands::List { user, limit } => {
            let reports = db::list_reports(&pool, &user, limit).await?;
            if reports.is_empty() {
                println!("No reports for {user}.");
            }
            for item in reports {
                println!(
                    "- {} {} [{}] {}",
                    item.created_at.format("%Y-%m-%d %H:%M"),
                    item.id,
                    item.status.as_str(),
                    item.title
                );
            }
        }
        Commands::Export { id, format, out } => {
            let pipeline =
                ReportPipeline::new(pool, OpenAiClient::from_env(), Notifier::from_env());
            let (filename, bytes) = pipeline.export(id, format).await?;
            let path = report::store_export(&out, &filename, &bytes)?;
            println!("Export written to {}.", path.display());
        }
        Commands::Notifications { user } => {
            let notifications = db::unread_notifications(&pool, &user).await?;
            if notifications.is_empty() {
                println!("No unread notifications for {user}.");
            }
            for item in notifications {
                println!(
                    "- {} {} [{}] {} ({})",
                    item.created_at.format("%Y-%m-%d %H:%M"),
                    item.id,
                    item.severity,
                    item.title,
                    item.notif_type
                );
                println!("  {}", item.message);
                if let Some(urn) = &item.urn {
                    println!("  unit: {urn}");
                }
                if let Some(report_id) = item.report_id {
                    println!("  report: {report_id}");
                }
            }
        }
        Commands::MarkRead { id, user } => {
            if db::mark_notification_read(&pool, id, &user).await? {
                println!("Notification marked read.");
            } else {
                println!("Notification not found or already read.");
            }
        }
        Commands::ScanAlerts { recipients } => {
            let notifier = Notifier::from_env();
            let alerts_sent = notifier.scan_risk_alerts(&pool, &recipients).await?;
            println!("Sent {alerts_sent} risk alerts.");
        }
    }

    Ok(())
}
