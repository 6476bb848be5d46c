mod config;

use clap::{Parser, Subcommand};
use config::FolioConfig;
use folio_agent::{build_generator, Generator, PlaceholderBackend};
use folio_core::{JobPlan, TaskId};
use folio_pipeline::{GeneratorTable, Pipeline, ProjectExport};
use folio_store::FileStore;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "folio", about = "Folio, a layered content-pipeline orchestrator")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "folio.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the task catalog and any structural problems
    Tasks,
    /// Create a project
    Create {
        #[arg(long)]
        title: String,
        /// JSON file holding the constraints object
        #[arg(long)]
        constraints: Option<PathBuf>,
    },
    /// List tasks that may run now
    Available { project: Uuid },
    /// Execute one task
    Execute { project: Uuid, task: String },
    /// Return a FAILED task to PENDING
    Reset { project: Uuid, task: String },
    /// Explain why a project is or is not progressing
    Diagnose { project: Uuid },
    /// Project state with derived layer statuses
    Status { project: Uuid },
    /// Write a project's state as JSON, to stdout unless --out is given
    Export {
        project: Uuid,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Store a project from an export file
    Import { file: PathBuf },
    /// Manage jobs
    Job {
        #[command(subcommand)]
        action: JobAction,
    },
}

#[derive(Subcommand)]
enum JobAction {
    /// Start a job and drive it until it stops
    Start {
        project: Uuid,
        /// Only tasks up to this layer
        #[arg(long, conflicts_with = "tasks")]
        through_layer: Option<u32>,
        /// Only these tasks (comma separated)
        #[arg(long, value_delimiter = ',')]
        tasks: Vec<String>,
        /// Executions before the job suspends (overrides config)
        #[arg(long)]
        max_iterations: Option<u32>,
    },
    /// Resume a suspended, blocked or cancelled job
    Resume {
        job: Uuid,
        #[arg(long)]
        max_iterations: Option<u32>,
    },
    /// Show a job record
    Show { job: Uuid },
    /// Request cancellation at the next task boundary
    Cancel { job: Uuid },
    /// List jobs, optionally for one project
    List { project: Option<Uuid> },
}

impl Commands {
    /// Whether the command may call the generation collaborator.
    fn generates(&self) -> bool {
        matches!(
            self,
            Commands::Execute { .. }
                | Commands::Job {
                    action: JobAction::Start { .. } | JobAction::Resume { .. }
                }
        )
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn job_plan(through_layer: Option<u32>, tasks: Vec<String>) -> JobPlan {
    match (through_layer, tasks.is_empty()) {
        (Some(layer), _) => JobPlan::ThroughLayer { layer },
        (None, false) => JobPlan::Tasks {
            ids: tasks.into_iter().map(TaskId::from).collect(),
        },
        (None, true) => JobPlan::Full,
    }
}

async fn write_export(path: &Path, export: &ProjectExport) -> anyhow::Result<()> {
    let encoded = serde_json::to_string_pretty(export)?;
    tokio::fs::write(path, encoded)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to write export '{}': {}", path.display(), e))?;
    info!(path = %path.display(), project_id = %export.project.id, "Export written");
    Ok(())
}

async fn read_export(path: &Path) -> anyhow::Result<ProjectExport> {
    let source = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read export '{}': {}", path.display(), e))?;
    serde_json::from_str(&source)
        .map_err(|e| anyhow::anyhow!("Failed to parse export '{}': {}", path.display(), e))
}

async fn open_pipeline(config: &FolioConfig, generates: bool) -> anyhow::Result<Pipeline> {
    let registry = config.registry().await?;
    let store = Arc::new(FileStore::new(&config.data_dir).await?);

    // Read-only commands never reach the collaborator, so they need no key.
    let generator: Arc<dyn Generator> = if generates {
        build_generator(&config.generator)?
    } else {
        Arc::new(PlaceholderBackend::new())
    };
    info!(generator = generator.name(), data_dir = %config.data_dir.display(), "Pipeline ready");

    Ok(Pipeline::new(
        registry,
        store,
        GeneratorTable::new(generator),
        &config.limits,
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = FolioConfig::load(&cli.config).await?;

    if let Commands::Tasks = cli.command {
        let registry = config.registry().await?;
        return print_json(&serde_json::json!({
            "tasks": registry.all_ordered(),
            "structural_issues": registry.structural_issues(),
        }));
    }

    let pipeline = open_pipeline(&config, cli.command.generates()).await?;
    let max_iterations = config.jobs.max_iterations;

    match cli.command {
        Commands::Tasks => {}
        Commands::Create { title, constraints } => {
            let constraints = match constraints {
                Some(path) => {
                    let source = tokio::fs::read_to_string(&path).await.map_err(|e| {
                        anyhow::anyhow!("Failed to read constraints '{}': {}", path.display(), e)
                    })?;
                    serde_json::from_str::<Value>(&source)?
                }
                None => Value::Null,
            };
            print_json(&pipeline.create_project(&title, constraints).await?)?;
        }
        Commands::Available { project } => print_json(&pipeline.available(project).await?)?,
        Commands::Execute { project, task } => {
            print_json(&pipeline.execute(project, &task).await?)?;
        }
        Commands::Reset { project, task } => print_json(&pipeline.reset(project, &task).await?)?,
        Commands::Diagnose { project } => print_json(&pipeline.diagnose(project).await?)?,
        Commands::Status { project } => print_json(&pipeline.status(project).await?)?,
        Commands::Export { project, out } => {
            let export = pipeline.export_project(project).await?;
            match out {
                Some(path) => write_export(&path, &export).await?,
                None => print_json(&export)?,
            }
        }
        Commands::Import { file } => {
            let export = read_export(&file).await?;
            print_json(&pipeline.import_project(export).await?)?;
        }
        Commands::Job { action } => match action {
            JobAction::Start {
                project,
                through_layer,
                tasks,
                max_iterations: limit,
            } => {
                let plan = job_plan(through_layer, tasks);
                let job = pipeline
                    .start_job(project, plan, limit.unwrap_or(max_iterations))
                    .await?;
                print_json(&job)?;
            }
            JobAction::Resume {
                job,
                max_iterations: limit,
            } => {
                let job = pipeline
                    .resume_job(job, limit.unwrap_or(max_iterations))
                    .await?;
                print_json(&job)?;
            }
            JobAction::Show { job } => print_json(&pipeline.get_job(job).await?)?,
            JobAction::Cancel { job } => print_json(&pipeline.cancel_job(job).await?)?,
            JobAction::List { project } => print_json(&pipeline.list_jobs(project).await?)?,
        },
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_job_plan_from_flags() {
        assert_eq!(job_plan(None, vec![]), JobPlan::Full);
        assert_eq!(job_plan(Some(3), vec![]), JobPlan::ThroughLayer { layer: 3 });
        assert_eq!(
            job_plan(None, vec!["a".into(), "b".into()]),
            JobPlan::Tasks {
                ids: vec![TaskId::from("a"), TaskId::from("b")]
            }
        );
    }

    #[test]
    fn test_cli_parses_job_start() {
        let cli = Cli::try_parse_from([
            "folio",
            "job",
            "start",
            "6f1c2a9e-3b7d-4c55-9a1e-2f0d8b4c7e11",
            "--tasks",
            "concept_definition,story_question",
            "--max-iterations",
            "5",
        ])
        .unwrap();
        assert!(cli.command.generates());
        match cli.command {
            Commands::Job {
                action: JobAction::Start { tasks, max_iterations, .. },
            } => {
                assert_eq!(tasks, vec!["concept_definition", "story_question"]);
                assert_eq!(max_iterations, Some(5));
            }
            _ => panic!("expected job start"),
        }
    }

    #[test]
    fn test_read_only_commands_do_not_generate() {
        let cli = Cli::try_parse_from([
            "folio",
            "diagnose",
            "6f1c2a9e-3b7d-4c55-9a1e-2f0d8b4c7e11",
        ])
        .unwrap();
        assert!(!cli.command.generates());
        assert_eq!(cli.config, PathBuf::from("folio.toml"));
    }

    #[test]
    fn test_cli_parses_export_and_import() {
        let cli = Cli::try_parse_from([
            "folio",
            "export",
            "6f1c2a9e-3b7d-4c55-9a1e-2f0d8b4c7e11",
            "--out",
            "tides.json",
        ])
        .unwrap();
        assert!(!cli.command.generates());
        match cli.command {
            Commands::Export { out, .. } => assert_eq!(out, Some(PathBuf::from("tides.json"))),
            _ => panic!("expected export"),
        }

        let cli = Cli::try_parse_from(["folio", "import", "tides.json"]).unwrap();
        assert!(matches!(cli.command, Commands::Import { .. }));
    }

    #[tokio::test]
    async fn test_export_file_moves_project_between_data_dirs() {
        let from = tempfile::tempdir().unwrap();
        let to = tempfile::tempdir().unwrap();
        let config = |dir: &Path| FolioConfig {
            data_dir: dir.to_path_buf(),
            generator: folio_agent::GeneratorConfig::placeholder(),
            ..FolioConfig::default()
        };

        let source = open_pipeline(&config(from.path()), true).await.unwrap();
        let project = source.create_project("Carried", Value::Null).await.unwrap();
        source.execute(project.id, "market_intelligence").await.unwrap();
        let file = from.path().join("carried.json");
        write_export(&file, &source.export_project(project.id).await.unwrap())
            .await
            .unwrap();

        let target = open_pipeline(&config(to.path()), false).await.unwrap();
        let imported = target.import_project(read_export(&file).await.unwrap()).await.unwrap();
        assert_eq!(imported.id, project.id);
        assert!(imported.is_passed("market_intelligence"));
        assert!(to.path().join("projects").join(format!("{}.json", project.id)).exists());

        let err = read_export(&to.path().join("absent.json")).await.unwrap_err();
        assert!(err.to_string().contains("Failed to read export"));
    }

    #[tokio::test]
    async fn test_open_pipeline_with_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let config = FolioConfig {
            data_dir: dir.path().to_path_buf(),
            generator: folio_agent::GeneratorConfig::placeholder(),
            ..FolioConfig::default()
        };
        let pipeline = open_pipeline(&config, true).await.unwrap();
        let project = pipeline.create_project("Dry run", Value::Null).await.unwrap();
        let outcome = pipeline
            .execute(project.id, "market_intelligence")
            .await
            .unwrap();
        assert!(outcome.is_pass());
        assert!(dir.path().join("projects").join(format!("{}.json", project.id)).exists());
    }
}
