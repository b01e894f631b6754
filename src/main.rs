use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vellora_agent::{study_graph, Capabilities, RunRequest, RunSession, Toolbox};
use vellora_core::config::AppConfig;
use vellora_core::state::CallerRole;
use vellora_core::traits::{CalendarProvider, LlmClient};
use vellora_memory::SqliteStore;
use vellora_tools::builtin::{
    CancelScheduledAction, CreateScheduledAction, DuckDuckGoSearch, GoogleCalendarProvider,
    LectureLookup, NoCalendarProvider, YoutubeSearch, YoutubeTranscript,
};

#[derive(Parser)]
#[command(name = "vellora", version, about = "Study-assistant graph runtime")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "vellora.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway (default)
    Serve,
    /// Run a single query and print the wire frames
    Run {
        /// User the run acts for
        #[arg(long, default_value = "cli")]
        user: String,
        /// Caller role: learner or instructor
        #[arg(long, default_value = "learner")]
        role: String,
        /// Lecture id to answer about
        #[arg(long)]
        lecture: Option<String>,
        /// Video URL or id to answer about
        #[arg(long)]
        video: Option<String>,
        /// IANA timezone name of the caller
        #[arg(long)]
        timezone: Option<String>,
        /// The query (read from stdin when empty)
        #[arg(trailing_var_arg = true)]
        query: Vec<String>,
    },
    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vellora=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Serve => {
            let session = build_session(&config)?;
            let gateway_config = config.gateway.clone().unwrap_or_default();
            info!(bind = %gateway_config.bind, "Starting HTTP gateway");
            let server = vellora_gateway::GatewayServer::new(gateway_config, session);
            let cancel = CancellationToken::new();
            let cancel_clone = cancel.clone();

            // Graceful shutdown on Ctrl-C
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                info!("Shutting down gateway...");
                cancel_clone.cancel();
            });

            server.run(cancel).await?;
        }
        Commands::Run {
            user,
            role,
            lecture,
            video,
            timezone,
            query,
        } => {
            let session = build_session(&config)?;
            let role = parse_role(&role)?;
            let mut text = query.join(" ");
            if text.trim().is_empty() {
                text = io::stdin()
                    .lock()
                    .lines()
                    .map_while(|l| l.ok())
                    .collect::<Vec<_>>()
                    .join("\n");
            }
            if text.trim().is_empty() {
                anyhow::bail!("empty query");
            }

            let mut req = RunRequest::new(user, role, text);
            req.lecture_ref = lecture;
            req.video_ref = video;
            req.timezone = timezone;

            let mut frames = Box::pin(session.frames(req));
            let mut stdout = io::stdout();
            while let Some(frame) = frames.next().await {
                stdout.write_all(frame.as_bytes())?;
                stdout.flush()?;
            }
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }
    // Fall back to ~/.vellora/config.toml
    if let Some(home_config) = dirs_home().map(|h| h.join(".vellora").join("config.toml")) {
        if home_config.exists() {
            info!(path = %home_config.display(), "Loading config from home directory");
            return Ok(AppConfig::load(&home_config)?);
        }
    }
    anyhow::bail!(
        "no config file found at {} or ~/.vellora/config.toml",
        path.display()
    )
}

fn parse_role(role: &str) -> anyhow::Result<CallerRole> {
    serde_json::from_value(serde_json::Value::String(role.to_lowercase()))
        .map_err(|_| anyhow::anyhow!("unknown role '{}', expected learner or instructor", role))
}

/// Wire the production collaborators into a compiled study graph.
fn build_session(config: &AppConfig) -> anyhow::Result<RunSession> {
    let db_path = config.database_path();
    let store = Arc::new(SqliteStore::open(&db_path)?);
    info!(path = %db_path.display(), "Opened store");

    let llm: Arc<dyn LlmClient> = Arc::from(vellora_llm::client_from_config(config));

    let calendar: Arc<dyn CalendarProvider> = match config.google {
        Some(ref google) => Arc::new(GoogleCalendarProvider::new(google.clone(), store.clone())),
        None => {
            info!("No [google] section, calendar actions are disabled");
            Arc::new(NoCalendarProvider)
        }
    };

    let tools = Toolbox {
        lecture_lookup: Arc::new(LectureLookup::new(store.clone())),
        web_search: Arc::new(DuckDuckGoSearch::new(&config.web_search)),
        video_search: Arc::new(YoutubeSearch::new(config.youtube.clone())),
        transcript: Arc::new(YoutubeTranscript::new(config.youtube.clone())),
        create_action: Arc::new(CreateScheduledAction::new(store.clone())),
        cancel_action: Arc::new(CancelScheduledAction::new(store.clone())),
        calendar,
        catalog: store,
    };

    let caps = Capabilities {
        llm,
        config: config.clone(),
        tools,
    };
    Ok(RunSession::new(&study_graph(caps)))
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_invocation_serves() {
        let cli = Cli::try_parse_from(["vellora"]).unwrap();
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from(["vellora", "-c", "alt.toml", "config"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Config)));
        assert_eq!(cli.config, PathBuf::from("alt.toml"));
    }

    #[test]
    fn run_collects_trailing_query() {
        let cli = Cli::try_parse_from(["vellora", "run", "--role", "teacher", "plan", "a", "class"]).unwrap();
        match cli.command {
            Some(Commands::Run { role, query, user, .. }) => {
                assert_eq!(parse_role(&role).unwrap(), CallerRole::Instructor);
                assert_eq!(query.join(" "), "plan a class");
                assert_eq!(user, "cli");
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert_eq!(parse_role("Learner").unwrap(), CallerRole::Learner);
        assert!(parse_role("admin").is_err());
    }
}
