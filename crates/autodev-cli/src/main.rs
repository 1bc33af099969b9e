use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;

use autodev_core::{
    AgentConfig, AllowAll, AutonomousAgent, CommandRunner, HeadlessChromeProbe, OpenAiClient,
    SessionStatus, SessionStore, Settings, ToolDispatcher,
};

#[derive(Parser, Debug)]
#[clap(name = "autodev", version, about = "Autonomous LLM build agent")]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(long, short, default_value = "autodev.yaml", help = "Path to the settings file")]
    config: String,

    #[clap(long, short, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a task autonomously and print the Run Outcome as JSON
    Run {
        /// The task to perform, in natural language
        task: String,

        #[clap(long, help = "Session id of an existing project to continue")]
        resume: Option<String>,

        #[clap(long, help = "Override the configured iteration ceiling")]
        max_iterations: Option<usize>,
    },
    /// Inspect stored project sessions
    Sessions {
        #[clap(subcommand)]
        action: SessionCommands,
    },
}

#[derive(Subcommand, Debug)]
enum SessionCommands {
    /// List sessions, most recently updated first
    List {
        #[clap(long, help = "Filter by status: active, complete, or failed")]
        status: Option<String>,
    },
    /// Print one session record
    Show { session_id: String },
}

fn parse_status(raw: &str) -> Result<SessionStatus> {
    match raw {
        "active" => Ok(SessionStatus::Active),
        "complete" => Ok(SessionStatus::Complete),
        "failed" => Ok(SessionStatus::Failed),
        other => bail!("Unknown status '{}' (expected active, complete, or failed)", other),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = cli
        .log_level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::Info);
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    let settings = Settings::load(&cli.config).context("Failed to load settings")?;
    let sessions = Arc::new(SessionStore::new(&settings.sessions.dir)?);

    match cli.command {
        Commands::Run {
            task,
            resume,
            max_iterations,
        } => {
            let api_key = settings.resolve_api_key()?;
            let mut client = OpenAiClient::new(api_key, settings.llm.model.clone())
                .with_temperature(settings.llm.temperature)
                .with_max_tokens(settings.llm.max_tokens)
                .with_request_timeout(settings.request_timeout());
            if let Some(base) = &settings.llm.api_base {
                client = client.with_api_base(base.clone());
            }

            let runner = CommandRunner::new();
            let probe = Arc::new(HeadlessChromeProbe::new(
                settings.browser.binary.clone(),
                runner.clone(),
            ));
            let dispatcher = ToolDispatcher::new(runner, probe, Arc::new(AllowAll));

            let config = AgentConfig {
                max_iterations: max_iterations.unwrap_or(settings.agent.max_iterations),
                llm_timeout: settings.request_timeout(),
                system_prompt: None,
            };

            let mut agent = AutonomousAgent::new(Arc::new(client), dispatcher, sessions, config);
            if let Some(session_id) = resume {
                agent = agent.with_session(session_id);
            }

            let outcome = agent.run(&task).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);

            if !outcome.success {
                std::process::exit(1);
            }
        }
        Commands::Sessions { action } => match action {
            SessionCommands::List { status } => {
                let filter = status.as_deref().map(parse_status).transpose()?;
                let summaries = sessions.list(filter).await?;
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            }
            SessionCommands::Show { session_id } => match sessions.load(&session_id).await? {
                Some(session) => println!("{}", serde_json::to_string_pretty(&session)?),
                None => bail!("Session not found: {}", session_id),
            },
        },
    }

    Ok(())
}
