#![forbid(unsafe_code)]

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use tracing::Level;

use cabinet::config::{load_available_models, load_role_map_env, load_role_map_file};
use cabinet::gateway::{ChatGateway, NoopUsageSink, ProviderGateway, StderrUsageSink};
use cabinet::telemetry::init_tracing;
use cabinet::{Cabinet, CabinetConfig, CabinetResult, RoutingGoal};

/// Exit status when no API key is configured.
const EXIT_MISSING_KEY: i32 = 2;

#[derive(Parser)]
#[command(
    name = "cabinet",
    version,
    about = "Answer one question with a cabinet of role-specialized models"
)]
struct Cli {
    /// User question to solve
    question: String,

    /// Default model name
    #[arg(long, env = "CABINET_MODEL", default_value = cabinet::router::DEFAULT_MODEL)]
    model: String,

    /// Path to JSON map of role->model (planner, researcher, engineer,
    /// analyst, synthesizer, critic)
    #[arg(long)]
    model_map: Option<PathBuf>,

    #[arg(long)]
    planner_model: Option<String>,
    #[arg(long)]
    researcher_model: Option<String>,
    #[arg(long)]
    engineer_model: Option<String>,
    #[arg(long)]
    analyst_model: Option<String>,
    #[arg(long)]
    synthesizer_model: Option<String>,
    #[arg(long)]
    critic_model: Option<String>,

    /// Disable parallel step execution
    #[arg(long)]
    no_parallel: bool,

    /// Run steps in parallel (true/false, 1/0, yes/no)
    #[arg(long, env = "CABINET_PARALLEL", action = ArgAction::Set, value_parser = BoolishValueParser::new())]
    parallel: Option<bool>,

    /// Max synthesis iterations (>= 1; 1 skips the critic)
    #[arg(long, env = "CABINET_ITERATIONS", default_value_t = 2)]
    iterations: u32,

    /// Max steps running at once
    #[arg(long, env = "CABINET_MAX_WORKERS", default_value_t = 4)]
    max_workers: usize,

    /// Print routing, plan, step outputs and critique
    #[arg(long, env = "CABINET_TRACE", value_parser = BoolishValueParser::new())]
    trace: bool,

    /// Comma-separated list or JSON array of models the decider may pick
    #[arg(long)]
    available_models: Option<String>,

    /// JSON file holding an array or {"models": [...]}
    #[arg(long)]
    available_models_file: Option<PathBuf>,

    /// Model used to make the routing decision (default: picked from the
    /// available models)
    #[arg(long, env = "CABINET_DECIDER_MODEL")]
    decider_model: Option<String>,

    #[arg(
        long,
        env = "CABINET_ROUTING_GOAL",
        value_enum,
        ignore_case = true,
        default_value_t = CliRoutingGoal::Balanced
    )]
    routing_goal: CliRoutingGoal,

    /// Write the full result as JSON
    #[arg(long)]
    out: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Write one JSON usage record per provider call to stderr
    #[arg(long)]
    usage_log: bool,
}

/// CLI-facing routing goal (clap::ValueEnum).
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliRoutingGoal {
    Balanced,
    Quality,
    Speed,
}

impl From<CliRoutingGoal> for RoutingGoal {
    fn from(goal: CliRoutingGoal) -> Self {
        match goal {
            CliRoutingGoal::Balanced => RoutingGoal::Balanced,
            CliRoutingGoal::Quality => RoutingGoal::Quality,
            CliRoutingGoal::Speed => RoutingGoal::Speed,
        }
    }
}

impl Cli {
    fn role_overrides(&self) -> [(&'static str, Option<&String>); 6] {
        [
            ("planner", self.planner_model.as_ref()),
            ("researcher", self.researcher_model.as_ref()),
            ("engineer", self.engineer_model.as_ref()),
            ("analyst", self.analyst_model.as_ref()),
            ("synthesizer", self.synthesizer_model.as_ref()),
            ("critic", self.critic_model.as_ref()),
        ]
    }

    fn config(&self) -> Result<CabinetConfig, Box<dyn std::error::Error>> {
        let mut config = CabinetConfig::default()
            .with_default_model(self.model.clone())
            .with_parallel(!self.no_parallel && self.parallel.unwrap_or(true))
            .with_max_iterations(self.iterations)
            .with_max_workers(self.max_workers);

        let env_map = load_role_map_env()?;
        if !env_map.is_empty() {
            config = config.with_role_map(env_map);
        }
        if let Some(path) = &self.model_map {
            config = config.with_role_map(load_role_map_file(path)?);
        }
        for (role, model) in self.role_overrides() {
            if let Some(model) = model {
                config = config.with_role_override(role, model.clone());
            }
        }

        config = config.with_available_models(load_available_models(
            self.available_models.as_deref(),
            self.available_models_file.as_deref(),
        )?);
        config.decider_model = self.decider_model.clone();
        config.routing_goal = self.routing_goal.into();
        Ok(config)
    }
}

fn print_trace(result: &CabinetResult) {
    eprintln!("[cabinet] trace for run {}", result.run_id);
    println!("{}", result.render_trace());
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.log_json, Level::INFO);

    if std::env::var("CABINET_API_KEY").map_or(true, |k| k.trim().is_empty()) {
        eprintln!("[cabinet] CABINET_API_KEY is not set");
        std::process::exit(EXIT_MISSING_KEY);
    }

    let config = cli.config()?;
    let gateway: Arc<dyn ChatGateway> = if cli.usage_log {
        Arc::new(ProviderGateway::from_env(Arc::new(StderrUsageSink))?)
    } else {
        Arc::new(ProviderGateway::from_env(Arc::new(NoopUsageSink))?)
    };

    let cabinet = Cabinet::new(gateway, config);
    let result = cabinet.answer(&cli.question).await?;

    if cli.trace {
        print_trace(&result);
        println!("=== final answer ===");
    }
    println!("{}", result.final_answer);

    if let Some(out) = &cli.out {
        let mut file = File::create(out)?;
        serde_json::to_writer_pretty(&mut file, &result)?;
        writeln!(file)?;
        eprintln!("[cabinet] result written to {}", out.display());
    }

    Ok(())
}
