use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;

use fluensa_auth::{
    AuthConfig, AuthError, AuthState, ConfigError, ErrorCode, HttpBackend, NavigationError, NavigationGuard,
    Navigator, ProfileUpdate, RouteTable, SessionStore,
};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Navigation(#[from] NavigationError),
    #[error("nothing to update; pass --full-name or --avatar-url")]
    EmptyUpdate,
    #[error("timed out waiting for the session to change")]
    StateTimeout,
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("signal handler failed: {0}")]
    Signal(#[from] std::io::Error),
}

impl ErrorCode for CliError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Config(e) => e.error_code(),
            Self::Auth(e) => e.error_code(),
            Self::Navigation(e) => e.error_code(),
            Self::EmptyUpdate => "E_EMPTY_UPDATE",
            Self::StateTimeout => "E_STATE_TIMEOUT",
            Self::InvalidJson(_) => "E_INVALID_JSON",
            Self::Signal(_) => "E_SIGNAL",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Auth(e) => e.retryable(),
            _ => false,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "fluensa-auth", about = "Fluensa session and navigation CLI")]
struct Cli {
    /// Persist the session here instead of FLUENSA_SESSION_FILE.
    #[arg(long)]
    session_file: Option<PathBuf>,

    /// Keep the session in memory only.
    #[arg(long, conflicts_with = "session_file")]
    no_session_file: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the restored session state.
    Status,
    SignUp {
        email: String,
        #[arg(long, env = "FLUENSA_PASSWORD")]
        password: String,
        #[arg(long)]
        name: String,
    },
    SignIn {
        email: String,
        #[arg(long, env = "FLUENSA_PASSWORD")]
        password: String,
    },
    SignOut,
    Profile(ProfileCommand),
    /// Resolve a path through the route guard and print the page reached.
    Navigate {
        path: String,
    },
    /// Keep the session fresh and print every state change until Ctrl-C.
    Watch {
        #[arg(long, default_value_t = 60)]
        refresh_every_secs: u64,
    },
}

#[derive(Args, Debug)]
struct ProfileCommand {
    #[command(subcommand)]
    command: ProfileSubcommand,
}

#[derive(Subcommand, Debug)]
enum ProfileSubcommand {
    Show,
    Update {
        #[arg(long)]
        full_name: Option<String>,
        #[arg(long)]
        avatar_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let body = json!({ "error": e.to_string(), "code": e.error_code(), "retryable": e.retryable() });
            eprintln!("{body}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = AuthConfig::from_env()?;
    if cli.no_session_file {
        config.session_file = None;
    } else if let Some(path) = cli.session_file {
        config.session_file = Some(path);
    }

    let backend = Arc::new(HttpBackend::new(&config)?);
    let store = SessionStore::with_backend(Arc::clone(&backend), config.init_timeout());
    store.init().await;

    match cli.command {
        Command::Status => print_status(&store.snapshot()),
        Command::SignUp { email, password, name } => {
            let data = store.sign_up(&email, &password, &name).await?;
            print_json(&data)
        }
        Command::SignIn { email, password } => {
            let session = store.sign_in(&email, &password).await?;
            wait_for_state(&store, config.init_timeout(), |s| s.user_id() == Some(session.user.id)).await?;
            print_status(&store.snapshot())
        }
        Command::SignOut => {
            store.sign_out().await?;
            print_status(&store.snapshot())
        }
        Command::Profile(profile) => run_profile(&store, profile).await,
        Command::Navigate { path } => {
            let navigator = Navigator::new(RouteTable::fluensa(), NavigationGuard::new(store.clone()));
            let route = navigator.navigate(&path).await?;
            print_json(&route)
        }
        Command::Watch { refresh_every_secs } => {
            run_watch(&store, &backend, Duration::from_secs(refresh_every_secs.max(1))).await
        }
    }
}

async fn run_profile(store: &SessionStore, profile: ProfileCommand) -> Result<(), CliError> {
    match profile.command {
        ProfileSubcommand::Show => {
            let profile = store.fetch_profile().await?;
            print_json(&profile)
        }
        ProfileSubcommand::Update { full_name, avatar_url } => {
            let fields = ProfileUpdate { email: None, full_name, avatar_url };
            if fields.is_empty() {
                return Err(CliError::EmptyUpdate);
            }
            let profile = store.update_profile(fields).await?;
            print_json(&profile)
        }
    }
}

async fn run_watch(store: &SessionStore, backend: &Arc<HttpBackend>, every: Duration) -> Result<(), CliError> {
    let refresher = backend.spawn_auto_refresh(every);
    let mut rx = store.subscribe();
    print_status(&rx.borrow_and_update().clone())?;

    let result = loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let state = rx.borrow_and_update().clone();
                if let Err(e) = print_status(&state) {
                    break Err(e);
                }
            }
            signal = tokio::signal::ctrl_c() => break signal.map_err(CliError::from),
        }
    };
    refresher.abort();
    result
}

async fn wait_for_state(
    store: &SessionStore,
    limit: Duration,
    pred: impl FnMut(&AuthState) -> bool,
) -> Result<(), CliError> {
    let mut rx = store.subscribe();
    match tokio::time::timeout(limit, rx.wait_for(pred)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(_)) | Err(_) => Err(CliError::StateTimeout),
    }
}

fn print_status(state: &AuthState) -> Result<(), CliError> {
    print_json(&json!({ "authenticated": state.is_authenticated(), "state": state }))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
