use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::{Map, Value};
use walkdir::WalkDir;

use kiln_core::store::{RunStatus, RunStore};
use kiln_core::EngineConfig;
use kiln_engine::recipe::parse_recipe_file;
use kiln_engine::{Recipe, ToolRegistry, WorkflowRunner};

#[derive(Parser)]
#[command(
    name = "kiln",
    version,
    about = "Run YAML recipes that chain local content tools into reproducible pipelines"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow recipe
    Run {
        /// Path to the recipe file
        recipe: PathBuf,

        /// Workflow inputs as key=value pairs
        #[arg(short = 'i', long = "input", value_name = "KEY=VALUE")]
        inputs: Vec<String>,

        /// Select the default action at approval gates without prompting
        #[arg(long)]
        auto_approve: bool,

        /// Project id to associate the run with
        #[arg(long)]
        project: Option<String>,

        /// Show the recipe's declared inputs and exit
        #[arg(long)]
        list_inputs: bool,
    },
    /// List recipes in a directory
    List {
        /// Directory to search (defaults to ./recipes)
        directory: Option<PathBuf>,
    },
    /// Show recent workflow runs
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,

        #[arg(long)]
        project: Option<String>,

        /// Filter by status (pending, running, completed, failed)
        #[arg(long)]
        status: Option<String>,
    },
    /// Show available tools and their readiness
    Tools,
    /// Show run statistics
    Stats {
        #[arg(long)]
        project: Option<String>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let code = match run_command(cli.command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red());
            1
        }
    };
    process::exit(code);
}

fn run_command(command: Commands) -> Result<i32> {
    match command {
        Commands::Run {
            recipe,
            inputs,
            auto_approve,
            project,
            list_inputs,
        } => cmd_run(&recipe, &inputs, auto_approve, project.as_deref(), list_inputs),
        Commands::List { directory } => {
            cmd_list(directory.as_deref())?;
            Ok(0)
        }
        Commands::History {
            limit,
            project,
            status,
        } => {
            cmd_history(limit, project.as_deref(), status.as_deref())?;
            Ok(0)
        }
        Commands::Tools => {
            cmd_tools();
            Ok(0)
        }
        Commands::Stats { project } => {
            cmd_stats(project.as_deref())?;
            Ok(0)
        }
    }
}

fn cmd_run(
    recipe_path: &Path,
    raw_inputs: &[String],
    auto_approve: bool,
    project: Option<&str>,
    list_inputs: bool,
) -> Result<i32> {
    if !recipe_path.exists() {
        bail!("recipe not found: {}", recipe_path.display());
    }
    let recipe = parse_recipe_file(recipe_path)?;

    if list_inputs {
        print_inputs(&recipe);
        return Ok(0);
    }

    let mut inputs = Map::new();
    for item in raw_inputs {
        if let Some((key, value)) = item.split_once('=') {
            inputs.insert(key.to_string(), Value::String(value.to_string()));
        }
    }

    let config = EngineConfig::load(None)?;
    let runner = WorkflowRunner::new(config, ToolRegistry::with_builtins(), auto_approve);
    let result = runner.run(recipe_path, inputs, project)?;

    if result.success {
        println!("\n{}", "Workflow completed successfully!".green());
        println!("Run directory: {}", result.run_dir.display());
        Ok(0)
    } else {
        println!(
            "\n{} {}",
            "Workflow failed:".red(),
            result.error.as_deref().unwrap_or("unknown error")
        );
        Ok(1)
    }
}

fn print_inputs(recipe: &Recipe) {
    println!("Workflow: {}", recipe.name);
    println!(
        "Description: {}",
        recipe.description.as_deref().unwrap_or("No description")
    );
    println!("\nInputs:");
    for decl in &recipe.inputs {
        let required = if decl.required { "*" } else { " " };
        let choices = decl
            .choices
            .as_ref()
            .map(|choices| {
                let rendered: Vec<String> =
                    choices.iter().map(render_scalar).collect();
                format!(" [{}]", rendered.join(", "))
            })
            .unwrap_or_default();
        let default = decl
            .default
            .as_ref()
            .map(|d| format!(" (default: {})", render_scalar(d)))
            .unwrap_or_default();
        println!(
            "  {required} {}: {}{choices}{default}",
            decl.name,
            decl.description.as_deref().unwrap_or("")
        );
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn cmd_list(directory: Option<&Path>) -> Result<()> {
    let recipes_dir = directory.unwrap_or_else(|| Path::new("recipes"));
    if !recipes_dir.exists() {
        bail!("directory not found: {}", recipes_dir.display());
    }

    let mut recipe_paths: Vec<PathBuf> = WalkDir::new(recipes_dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.file_type().is_file()
                && entry.path().extension().is_some_and(|ext| ext == "yaml")
                && !entry.file_name().to_string_lossy().starts_with('.')
        })
        .map(|entry| entry.into_path())
        .collect();
    recipe_paths.sort();

    if recipe_paths.is_empty() {
        println!("No recipes found.");
        return Ok(());
    }

    println!("Available recipes in {}:\n", recipes_dir.display());
    for path in recipe_paths {
        match parse_recipe_file(&path) {
            Ok(recipe) => {
                println!("  {} — {}", path.display(), recipe.name.bold());
                if let Some(description) = &recipe.description {
                    println!("      {description}");
                }
            }
            Err(e) => println!("  {} — {} ({e})", path.display(), "invalid recipe".red()),
        }
    }
    Ok(())
}

fn cmd_history(limit: usize, project: Option<&str>, status: Option<&str>) -> Result<()> {
    let status = match status {
        Some(s) => Some(
            RunStatus::parse(s)
                .ok_or_else(|| anyhow::anyhow!("invalid status '{s}'"))?,
        ),
        None => None,
    };

    let config = EngineConfig::load(None)?;
    let store = RunStore::open(&config.persistence.db_path)?;
    let runs = store.list_runs(project, status, limit)?;

    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }

    for run in runs {
        let status = match run.status {
            RunStatus::Completed => run.status.to_string().green(),
            RunStatus::Failed => run.status.to_string().red(),
            _ => run.status.to_string().yellow(),
        };
        println!(
            "{}  {:<10} {}  {}",
            run.id,
            status,
            run.recipe_name.as_deref().unwrap_or("?"),
            run.created_at.as_deref().unwrap_or("")
        );
        if let Some(error) = &run.error_message {
            println!("          {}", error.red());
        }
    }
    Ok(())
}

fn cmd_tools() {
    let registry = ToolRegistry::with_builtins();
    let readiness = registry.preflight_check();

    println!("Available tools:\n");
    for (name, ready) in &readiness {
        let status = if *ready {
            "ready".green()
        } else {
            "unavailable".red()
        };
        println!("  {name:<12} {status}");
    }

    if !registry.load_errors().is_empty() {
        println!("\nFailed to load:\n");
        for (name, error) in registry.load_errors() {
            println!("  {name:<12} {}", error.red());
        }
    }
}

fn cmd_stats(project: Option<&str>) -> Result<()> {
    let config = EngineConfig::load(None)?;
    let store = RunStore::open(&config.persistence.db_path)?;
    let stats = store.get_stats(project)?;

    println!("Runs:");
    println!("  total:     {}", stats.runs.total);
    println!("  completed: {}", stats.runs.completed);
    println!("  failed:    {}", stats.runs.failed);
    Ok(())
}
