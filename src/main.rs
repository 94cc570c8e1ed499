use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use performance_forecast::classifier::Algorithm;
use performance_forecast::{
    dataset, db, persistence, predictor, report, EngineConfig, ModelStore, StudentRecord,
    TrainedModelBundle, Trainer,
};

#[derive(Parser)]
#[command(name = "performance-forecast")]
#[command(about = "Student performance forecasting for Group Scholar", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory holding model artifacts
    #[arg(long, global = true, env = "FORECAST_MODELS_DIR")]
    models_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model on a CSV of student records and save it
    Train {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long, default_value = "random_forest")]
        algorithm: String,
        /// Train each listed algorithm and keep the most accurate
        #[arg(long, value_delimiter = ',', conflicts_with = "algorithm")]
        compare: Vec<String>,
        /// Artifact file name inside the models directory
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        no_cv: bool,
        /// Write a markdown report of the training cohort to this path
        #[arg(long)]
        report: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Predict every student in a CSV
    Predict {
        #[arg(long)]
        csv: PathBuf,
        /// Model artifact; rule-based predictions are used without one
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        out: Option<PathBuf>,
        /// Write a markdown report to this path
        #[arg(long)]
        report: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Predict a single student from the command line
    PredictOne {
        #[arg(long)]
        model: String,
        #[arg(long)]
        student_id: Option<String>,
        #[arg(long)]
        attendance: Option<f64>,
        #[arg(long)]
        assignment_score: Option<f64>,
        #[arg(long)]
        quiz_score: Option<f64>,
        #[arg(long)]
        time_spent: Option<f64>,
        #[arg(long)]
        forum_posts: Option<f64>,
        #[arg(long)]
        resources_viewed: Option<f64>,
    },
    /// Show the ranked feature importance of a saved model
    Importance {
        #[arg(long)]
        model: String,
    },
    /// Create or upgrade the database schema
    InitDb,
    /// Predict a CSV and store the run in Postgres
    Sync {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        model: Option<String>,
    },
    /// List students whose latest stored prediction is at risk
    AtRisk {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = EngineConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(dir) = cli.models_dir {
        config.models_dir = dir;
    }
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level)).init();

    let store = ModelStore::from_config(&config);

    match cli.command {
        Commands::Train {
            csv,
            algorithm,
            compare,
            name,
            no_cv,
            report: report_path,
            json,
        } => {
            if no_cv {
                config.cross_validation.enabled = false;
            }
            let table = dataset::load_csv(&csv)
                .with_context(|| format!("failed to read {}", csv.display()))?;
            let mut trainer = Trainer::new(&config);

            let metrics = if compare.is_empty() {
                trainer.train(&table, &algorithm)?.0
            } else {
                let candidates: Vec<Algorithm> = compare.iter().map(|n| Algorithm::resolve(n)).collect();
                let selection = trainer.train_best(&table, &candidates)?;
                for (candidate, accuracy) in &selection.evaluated {
                    println!("- {candidate}: accuracy {accuracy:.4}");
                }
                selection.metrics
            };

            let bundle = trainer.take_bundle().context("training produced no model")?;
            let path = store
                .save(&bundle, name.as_deref())
                .context("failed to save model artifact")?;

            if let Some(report_path) = report_path {
                let markdown = report::training_report(chrono::Utc::now(), &bundle, &table, &metrics);
                std::fs::write(&report_path, markdown)
                    .with_context(|| format!("failed to write {}", report_path.display()))?;
                println!("Report written to {}.", report_path.display());
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&metrics)?);
            } else {
                println!("Trained {} on {} students.", bundle.algorithm(), table.len());
                println!("{metrics}");
                println!("Model saved to {}.", path.display());
            }
        }
        Commands::Predict {
            csv,
            model,
            out,
            report: report_path,
            json,
        } => {
            let table = dataset::load_csv(&csv)
                .with_context(|| format!("failed to read {}", csv.display()))?;
            let bundle = load_optional(&store, model.as_deref())?;
            let predictions = predictor::predict_batch(bundle.as_ref(), &table);

            if let Some(out) = out {
                dataset::export_predictions(&out, &predictions)
                    .with_context(|| format!("failed to write {}", out.display()))?;
                println!("Predictions written to {}.", out.display());
            }
            if let Some(path) = report_path {
                let importance = bundle.as_ref().map(|b| b.ranked_importance()).unwrap_or_default();
                let markdown = report::build_report(chrono::Utc::now(), &predictions, None, &importance);
                std::fs::write(&path, markdown)?;
                println!("Report written to {}.", path.display());
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&predictions)?);
            } else {
                for prediction in &predictions {
                    println!(
                        "- {} {} (confidence {:.2}{})",
                        prediction.student_id,
                        prediction.prediction,
                        prediction.confidence,
                        if prediction.is_at_risk { ", at risk" } else { "" }
                    );
                }
            }
        }
        Commands::PredictOne {
            model,
            student_id,
            attendance,
            assignment_score,
            quiz_score,
            time_spent,
            forum_posts,
            resources_viewed,
        } => {
            let bundle = load_model(&store, &model)?;
            let record = StudentRecord {
                student_id,
                attendance,
                assignment_score,
                quiz_score,
                time_spent,
                forum_posts,
                resources_viewed,
                label: None,
            };
            let detailed = predictor::predict_one(Some(&bundle), &record)?;
            println!("{}", serde_json::to_string_pretty(&detailed)?);
        }
        Commands::Importance { model } => {
            let bundle = load_model(&store, &model)?;
            println!("Feature importance for {}:", bundle.algorithm());
            for (name, weight) in bundle.ranked_importance() {
                println!("- {name}: {weight:.4}");
            }
        }
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Sync { csv, model } => {
            let table = dataset::load_csv(&csv)
                .with_context(|| format!("failed to read {}", csv.display()))?;
            let bundle = load_optional(&store, model.as_deref())?;
            let predictions = predictor::predict_batch(bundle.as_ref(), &table);

            let pool = connect().await?;
            let model_path = model.as_deref().map(|m| store.resolve(m).display().to_string());
            let algorithm = bundle.as_ref().map(|b| b.algorithm().as_str());
            let (run_id, inserted) =
                db::record_predictions(&pool, model_path.as_deref(), algorithm, &predictions).await?;
            println!("Stored {inserted} predictions as run {run_id}.");
        }
        Commands::AtRisk { limit } => {
            let pool = connect().await?;
            let stored = db::fetch_at_risk(&pool, limit).await?;

            if stored.is_empty() {
                println!("No students are currently at risk.");
                return Ok(());
            }

            println!("Students at risk:");
            for prediction in stored {
                println!("- {}", prediction.summary_line());
            }
        }
    }

    Ok(())
}

fn load_model(store: &ModelStore, name: &str) -> anyhow::Result<TrainedModelBundle> {
    let path = store.resolve(name);
    persistence::load(&path).with_context(|| format!("failed to load model {}", path.display()))
}

fn load_optional(store: &ModelStore, name: Option<&str>) -> anyhow::Result<Option<TrainedModelBundle>> {
    name.map(|name| load_model(store, name)).transpose()
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}
