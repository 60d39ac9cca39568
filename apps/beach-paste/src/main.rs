use beach_paste::config::{DEFAULT_DATA_LABEL, DEFAULT_RELAY_LABEL, ReadinessPolicy, Role, SessionConfig};
use beach_paste::session::events::SessionEvents;
use beach_paste::session::io::ConsoleIo;
use beach_paste::session::{Session, SessionError};
use beach_paste::telemetry::logging::{self as logctl, LogConfig, LogLevel};
use beach_paste::transport::EngineError;
use beach_paste::transport::webrtc::config::{DEFAULT_STUN_SERVER, LOCALHOST_ONLY_ENV};
use beach_paste::transport::webrtc::{WebRtcConfig, WebRtcEngine};
use clap::builder::FalseyValueParser;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let log_config = cli.logging.to_config();
    logctl::init(&log_config).map_err(|err| CliError::Logging(err.to_string()))?;
    debug!(log_level = ?log_config.level, log_file = ?log_config.file, "logging configured");

    match cli.command {
        Command::Offer(args) => handle_session(Role::Offerer, args).await,
        Command::Answer(args) => handle_session(Role::Answerer, args).await,
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "beach-paste",
    about = "🏖️  Open a WebRTC data channel by pasting descriptions between two terminals",
    author,
    version
)]
struct Cli {
    #[command(flatten)]
    logging: LoggingArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        global = true,
        env = "BEACH_PASTE_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        global = true,
        env = "BEACH_PASTE_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    file: Option<PathBuf>,
}

impl LoggingArgs {
    fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the offer, then paste the peer's answer and send stdin lines
    Offer(PeerArgs),
    /// Paste the peer's offer, print the answer, then print received messages
    Answer(PeerArgs),
}

#[derive(Args, Debug)]
struct PeerArgs {
    #[arg(
        long = "stun",
        value_name = "URL",
        env = "BEACH_PASTE_STUN",
        value_delimiter = ',',
        default_value = DEFAULT_STUN_SERVER,
        help = "STUN/TURN server URL (repeatable)"
    )]
    stun: Vec<String>,

    #[arg(
        long = "no-stun",
        env = LOCALHOST_ONLY_ENV,
        action = ArgAction::SetTrue,
        value_parser = FalseyValueParser::new(),
        help = "Gather host candidates only"
    )]
    no_stun: bool,

    #[arg(
        long,
        value_enum,
        help = "When to export the local description (defaults: offer=first-candidate, answer=gathering-complete)"
    )]
    readiness: Option<ReadinessPolicy>,

    #[arg(
        long = "wait-timeout-secs",
        value_name = "SECS",
        help = "Give up if any negotiation step waits longer than this"
    )]
    wait_timeout_secs: Option<u64>,

    #[arg(long = "data-label", default_value = DEFAULT_DATA_LABEL)]
    data_label: String,

    #[arg(long = "relay-label", default_value = DEFAULT_RELAY_LABEL)]
    relay_label: String,
}

impl PeerArgs {
    fn session_config(&self, role: Role) -> Result<SessionConfig, CliError> {
        if self.data_label == self.relay_label {
            return Err(CliError::InvalidArgs(format!(
                "data and relay sub-channels need distinct labels (both '{}')",
                self.data_label
            )));
        }
        let readiness = self
            .readiness
            .unwrap_or_else(|| ReadinessPolicy::default_for(role));
        Ok(SessionConfig::new(role)
            .with_readiness(readiness)
            .with_wait_timeout(self.wait_timeout_secs.map(Duration::from_secs))
            .with_labels(self.data_label.clone(), self.relay_label.clone()))
    }

    fn webrtc_config(&self) -> WebRtcConfig {
        if self.no_stun {
            return WebRtcConfig::localhost();
        }
        let urls: Vec<String> = self
            .stun
            .iter()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();
        urls.into_iter()
            .fold(WebRtcConfig::builder(), |builder, url| {
                builder.add_ice_server(vec![url])
            })
            .build()
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Session(#[from] SessionError),
    #[error("webrtc setup failed: {0}")]
    Engine(#[from] EngineError),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("logging initialization failed: {0}")]
    Logging(String),
}

async fn handle_session(role: Role, args: PeerArgs) -> Result<(), CliError> {
    let session_config = args.session_config(role)?;
    let webrtc_config = args.webrtc_config();
    debug!(
        role = %role,
        readiness = ?session_config.readiness,
        ice_servers = webrtc_config.ice_servers.len(),
        "starting session"
    );

    let (events, streams) = SessionEvents::new(&session_config);
    spawn_state_printer(&events);
    let engine = WebRtcEngine::new(webrtc_config, events.clone()).await?;
    let session = Session::new(session_config, Arc::new(engine), events, streams);

    let mut console = ConsoleIo::new();
    let summary = session.run(&mut console).await?;
    info!(
        role = %summary.role,
        sent = summary.messages_sent,
        received = summary.messages_received,
        relayed = summary.relay.relayed,
        applied = summary.relay.applied,
        rejected = summary.relay.rejected,
        failed = summary.relay.failed,
        "session finished"
    );
    Ok(())
}

/// Echoes ICE connection state changes to stderr, next to the prompts.
fn spawn_state_printer(events: &SessionEvents) {
    let mut states = events.subscribe_connection_states();
    tokio::spawn(async move {
        loop {
            match states.recv().await {
                Ok(state) => eprintln!("ICE state: {state}"),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};

    // Env-backed flags are read from the process environment.
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    fn parse_offer(args: &[&str]) -> PeerArgs {
        let mut argv = vec!["beach-paste", "offer"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).expect("cli parses").command {
            Command::Offer(args) => args,
            Command::Answer(_) => panic!("expected offer subcommand"),
        }
    }

    fn with_localhost_env<T>(value: Option<&str>, body: impl FnOnce() -> T) -> T {
        let _lock = ENV_MUTEX.lock().unwrap();
        let original = std::env::var(LOCALHOST_ONLY_ENV).ok();
        unsafe {
            match value {
                Some(value) => std::env::set_var(LOCALHOST_ONLY_ENV, value),
                None => std::env::remove_var(LOCALHOST_ONLY_ENV),
            }
        }
        let result = body();
        unsafe {
            match original {
                Some(orig) => std::env::set_var(LOCALHOST_ONLY_ENV, orig),
                None => std::env::remove_var(LOCALHOST_ONLY_ENV),
            }
        }
        result
    }

    #[test]
    fn localhost_env_accepts_numeric_switch() {
        let args = with_localhost_env(Some("1"), || parse_offer(&[]));
        assert!(args.no_stun);
        assert!(args.webrtc_config().ice_servers.is_empty());

        let args = with_localhost_env(Some("0"), || parse_offer(&[]));
        assert!(!args.no_stun);
        assert_eq!(args.webrtc_config().ice_servers.len(), 1);
    }

    #[test]
    fn no_stun_flag_and_default_stun() {
        let args = with_localhost_env(None, || parse_offer(&["--no-stun"]));
        assert!(args.no_stun);

        let args = with_localhost_env(None, || {
            parse_offer(&["--stun", "stun:a.example:3478,stun:b.example:3478"])
        });
        let config = args.webrtc_config();
        assert_eq!(config.ice_servers.len(), 2);
        assert_eq!(config.ice_servers[1].urls, vec!["stun:b.example:3478".to_string()]);
    }

    #[test]
    fn readiness_flag_overrides_role_default() {
        let args = with_localhost_env(None, || {
            parse_offer(&["--readiness", "gathering-complete", "--wait-timeout-secs", "3"])
        });
        let config = args.session_config(Role::Offerer).expect("valid args");
        assert_eq!(config.readiness, ReadinessPolicy::GatheringComplete);
        assert_eq!(config.wait_timeout, Some(Duration::from_secs(3)));
    }

    #[test]
    fn equal_labels_are_rejected() {
        let args = with_localhost_env(None, || {
            parse_offer(&["--data-label", "x", "--relay-label", "x"])
        });
        assert!(matches!(
            args.session_config(Role::Offerer),
            Err(CliError::InvalidArgs(_))
        ));
    }
}
