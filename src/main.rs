use std::path::PathBuf;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

mod annotate;
mod config;
mod db;
mod models;
mod report;
mod rubric;
mod telemetry;

use crate::config::AppConfig;
use crate::rubric::RubricIndex;

#[derive(Parser)]
#[command(name = "teamoptix-metrics")]
#[command(about = "KPI rubric banding and reporting for TeamOptix rosters", long_about = None)]
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
    /// Import rubric bands from a CSV file
    ImportRubric {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Import technician metric rows from a CSV file
    ImportMetrics {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Show the rubric bands in effect for a class type
    Rubric {
        #[arg(long)]
        class_type: String,
        #[arg(long)]
        pc_org: Option<String>,
    },
    /// Rank technicians by rubric points for a month
    Score {
        #[arg(long)]
        class_type: String,
        #[arg(long)]
        month: NaiveDate,
        #[arg(long)]
        pc_org: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Generate a markdown band report
    Report {
        #[arg(long)]
        class_type: String,
        #[arg(long)]
        month: NaiveDate,
        #[arg(long)]
        pc_org: Option<String>,
        #[arg(long, default_value = "kpi-report.md")]
        out: PathBuf,
    },
}

fn format_bound(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;
    telemetry::init(&config.log_level)?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    let result = run(cli.command, &pool).await;
    pool.close().await;
    result
}

async fn run(command: Commands, pool: &PgPool) -> anyhow::Result<()> {
    match command {
        Commands::InitDb => {
            db::init_db(pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(pool).await?;
            println!("Seed data inserted.");
        }
        Commands::ImportRubric { csv } => {
            let imported = db::import_rubric_csv(pool, &csv).await?;
            println!("Imported {imported} rubric bands from {}.", csv.display());
        }
        Commands::ImportMetrics { csv } => {
            let imported = db::import_metrics_csv(pool, &csv).await?;
            println!("Imported {imported} metric rows from {}.", csv.display());
        }
        Commands::Rubric { class_type, pc_org } => {
            let rows = db::fetch_rubric(pool, &class_type, pc_org.as_deref()).await?;
            let index = RubricIndex::build(rows);
            tracing::info!(class_type = %class_type, kpis = index.len(), "loaded rubric");

            if index.is_empty() {
                println!("No rubric configured for {class_type}.");
            } else {
                for kpi_key in index.kpi_keys() {
                    println!("{kpi_key}:");
                    for band in index.bands(kpi_key) {
                        println!(
                            "  {:<18} {:>8} .. {:<8} points {}",
                            band.band_key.as_str(),
                            format_bound(band.min_value),
                            format_bound(band.max_value),
                            format_bound(band.score_value)
                        );
                    }
                }
            }

            for overlap in index.overlaps() {
                tracing::warn!(
                    kpi = %overlap.kpi_key,
                    first = %overlap.first,
                    second = %overlap.second,
                    "overlapping rubric bands"
                );
            }
            for gap in index.gaps() {
                tracing::warn!(kpi = %gap.kpi_key, uncovered = %gap, "rubric leaves values unbanded");
            }
        }
        Commands::Score {
            class_type,
            month,
            pc_org,
            limit,
        } => {
            let rubric = db::fetch_rubric(pool, &class_type, pc_org.as_deref()).await?;
            let rows = db::fetch_report_rows(pool, &class_type, month, pc_org.as_deref()).await?;
            let index = RubricIndex::build(rubric);
            let fields = annotate::standard_fields(&class_type);
            let scores = annotate::rank_rows(&rows, &index, &fields);

            if scores.is_empty() {
                println!("No metric rows found for {class_type} in {month}.");
            } else {
                println!("Top technicians by rubric points:");
                for score in scores.iter().take(limit) {
                    println!(
                        "- {} ({}) {:.1} points across {} KPIs ({} without data)",
                        score.full_name,
                        score.tech_id,
                        score.points,
                        score.banded_fields,
                        score.no_data_fields
                    );
                }
            }
        }
        Commands::Report {
            class_type,
            month,
            pc_org,
            out,
        } => {
            let rubric = db::fetch_rubric(pool, &class_type, pc_org.as_deref()).await?;
            let rows = db::fetch_report_rows(pool, &class_type, month, pc_org.as_deref()).await?;
            let index = RubricIndex::build(rubric);
            let fields = annotate::standard_fields(&class_type);
            let scope = match pc_org.as_deref() {
                Some(org) => format!("{class_type} / {org}"),
                None => class_type.clone(),
            };
            let report = report::build_report(&scope, month, &rows, &index, &fields);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
