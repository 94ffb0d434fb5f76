use clap::{Parser, Subcommand};
use log::{debug, error, info, warn};
use shift_redeemer::auth::{AuthError, Authenticator, TerminalPrompt};
use shift_redeemer::collector::{self, CollectorError};
use shift_redeemer::config::{self, Settings};
use shift_redeemer::runner::{self, RunError, Runner};
use shift_redeemer::store::{JsonKeyStore, KeyStore, StoreError};
use shift_redeemer::{Game, Key, NetworkError, Platform, RedemptionClient, SessionJar, SessionStore, SiteClient};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const LICENSE_TEXT: &str = "\
========================================================================
shift-redeemer
This program comes with ABSOLUTELY NO WARRANTY.
Your login is only used to talk to the SHiFT website and is never stored;
only the session cookie is kept on disk.
========================================================================
";

#[derive(Debug)]
enum AppError {
    Network(NetworkError),
    Auth(AuthError),
    Store(StoreError),
    Collector(CollectorError),
    Io(std::io::Error),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Network(err) => write!(f, "Network error: {}", err),
            AppError::Auth(err) => write!(f, "Login error: {}", err),
            AppError::Store(err) => write!(f, "Storage error: {}", err),
            AppError::Collector(err) => write!(f, "{}", err),
            AppError::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Network(err) => Some(err),
            AppError::Auth(err) => Some(err),
            AppError::Store(err) => Some(err),
            AppError::Collector(err) => Some(err),
            AppError::Io(err) => Some(err),
        }
    }
}

impl From<NetworkError> for AppError {
    fn from(err: NetworkError) -> Self {
        AppError::Network(err)
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Auth(err)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Store(err)
    }
}

impl From<CollectorError> for AppError {
    fn from(err: CollectorError) -> Self {
        AppError::Collector(err)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err)
    }
}

impl From<RunError> for AppError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::Network(e) => AppError::Network(e),
            RunError::Store(e) => AppError::Store(e),
        }
    }
}

#[derive(Parser, Debug)]
#[clap(author, version, about = "Automatically redeem SHiFT codes", long_about = None)]
struct Args {
    /// E-Mail for your login (prompted if missing and no saved session exists)
    #[clap(long, short, env = "SHIFT_USER", global = true)]
    user: Option<String>,

    /// Password for your login (prompted if missing and no saved session exists)
    #[clap(long = "pass", short, env = "SHIFT_PASS", hide_env_values = true, global = true)]
    password: Option<String>,

    #[clap(long, env = "SHIFT_DATA_DIR", default_value = "data", global = true)]
    data_dir: PathBuf,

    #[clap(long, env = "SHIFT_COOKIE_FILE", global = true)]
    cookie_file: Option<PathBuf>,

    #[clap(long, env = "SHIFT_DB_FILE", global = true)]
    db_file: Option<PathBuf>,

    /// URL or file listing codes; `none` disables importing
    #[clap(long, env = "SHIFT_SOURCE", global = true)]
    source: Option<String>,

    #[clap(long, env = "SHIFT_BASE_URL", hide = true, global = true)]
    base_url: Option<String>,

    #[clap(long, short, global = true)]
    verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Redeem a single code
    Redeem {
        platform: Platform,
        code: String,
        #[clap(long)]
        game: Option<Game>,
    },
    /// Import new codes and redeem everything not yet redeemed
    Schedule {
        #[clap(long = "game")]
        games: Vec<Game>,
        #[clap(long = "platform")]
        platforms: Vec<Platform>,
        /// Check for new codes every N minutes (0 runs once)
        #[clap(long, default_value_t = 120)]
        interval: u64,
        /// Maximum number of codes to attempt per run
        #[clap(long, short, default_value_t = 255)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();
    debug!("Debug mode on");

    if let Err(e) = run(args).await {
        match e {
            AppError::Auth(AuthError::LoginFailed) => {
                error!("Couldn't log in. Are your credentials correct?");
            }
            other => error!("{}", other),
        }
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), AppError> {
    let settings = Settings::new(
        args.user,
        args.password,
        args.data_dir,
        args.cookie_file,
        args.db_file,
        args.source,
        args.base_url,
    );
    settings.prepare_dirs()?;

    let session_store = SessionStore::new(&settings.cookie_file);
    if !session_store.exists() {
        println!("{}", LICENSE_TEXT);
    }

    let jar = Arc::new(SessionJar::new());
    let site = SiteClient::new(&settings.base_url, jar)?;
    let mut auth = Authenticator::new(&site, session_store);
    auth.login(
        settings.user.as_deref(),
        settings.password.as_deref(),
        &mut TerminalPrompt,
    )
    .await?;

    let mut store = JsonKeyStore::open(&settings.db_file)?;
    let mut client = RedemptionClient::new(&site);

    let stop = Arc::new(AtomicBool::new(false));
    let stop_on_signal = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing the current code");
            stop_on_signal.store(true, Ordering::Relaxed);
        }
    });

    match args.command {
        Command::Redeem { platform, code, game } => {
            let game = game.unwrap_or(Game::Unknown);
            let mut key = match store.get(&code, game, platform) {
                Some(key) => key,
                None => {
                    let key = Key::new(code.clone(), game, platform);
                    store.create(key.clone())?;
                    key
                }
            };
            let outcome = Runner::new(&mut client, &mut store)
                .with_stop_flag(stop)
                .redeem_one(&mut key)
                .await?;
            println!("{}", outcome.message(Some(&key)));
        }
        Command::Schedule {
            games,
            platforms,
            interval,
            limit,
        } => {
            let targets = config::target_map(&games, &platforms);
            loop {
                if let Some(source) = settings.source.as_deref() {
                    match collector::fetch_codes(source).await {
                        Ok(raw) => {
                            let added = runner::import_keys(&mut store, collector::clean_codes(&raw))?;
                            if added > 0 {
                                info!("{} new Keys", added);
                            } else {
                                info!("no new Keys");
                            }
                        }
                        Err(e) => warn!("{}", e),
                    }
                }

                let keys: Vec<Key> = store.redeemable(&targets).into_iter().take(limit).collect();
                let result = Runner::new(&mut client, &mut store)
                    .with_stop_flag(stop.clone())
                    .run(keys)
                    .await;
                match result {
                    Ok(summary) => info!(
                        "Attempted {} codes: {} redeemed, {} expired",
                        summary.attempted, summary.redeemed, summary.expired
                    ),
                    Err(RunError::Store(e)) => return Err(AppError::Store(e)),
                    Err(e) => warn!("Run aborted: {}", e),
                }

                if interval == 0 || stop.load(Ordering::Relaxed) {
                    break;
                }
                let hours = interval / 60;
                let minutes = interval % 60;
                info!("Scheduling to run every {:02}:{:02} hours", hours, minutes);
                println!("Press Ctrl+C to exit");
                let mut waited = Duration::ZERO;
                let period = Duration::from_secs(interval * 60);
                while waited < period && !stop.load(Ordering::Relaxed) {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    waited += Duration::from_secs(1);
                }
                if stop.load(Ordering::Relaxed) {
                    break;
                }
            }
        }
    }

    info!("Goodbye.");
    Ok(())
}
