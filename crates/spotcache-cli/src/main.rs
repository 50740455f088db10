//! spotcache - a terminal front end for the food-spot service.
//!
//! Lists popular and favourite spots, shows the logged-in profile and the
//! user's reviews. All reads go through the shared query cache.

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use spotcache_core::config::{ENV_PASSWORD, ENV_USERNAME};
use spotcache_core::query::Subscription;
use spotcache_core::utils::truncate_string;
use spotcache_core::{
    ActivationGate, ApiClient, AuthProvider, Config, ListMode, ModeSelector, QueryClient,
    QueryState, Session, SpotData,
};

/// Width of one list line
const LINE_WIDTH: usize = 72;

/// Default length of a `watch` run, in minutes.
const DEFAULT_WATCH_MINUTES: u64 = 10;

/// Longest allowed `watch` run, in minutes.
const MAX_WATCH_MINUTES: u64 = 24 * 60;

const USAGE: &str = "\
Usage: spotcache <command> [args]

Commands:
  login [username]            Log in and remember the session
  logout                      Forget the session
  spots [popular|favourites]  Show a spot list (default: popular)
  profile                     Show the logged-in profile
  reviews                     Show the logged-in user's reviews
  refresh [popular|favourites]
                              Refetch one list and show it
  watch [popular|favourites] [minutes]
                              Keep a list on screen, refreshing as it goes stale

Environment:
  SPOTCACHE_API_URL, SPOTCACHE_USERNAME, SPOTCACHE_PASSWORD
  RUST_LOG (default: warn)";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr, and to a daily file in the cache directory when it
/// can be created. The returned guard flushes the file on drop.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir.filter(|dir| std::fs::create_dir_all(dir).is_ok()) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "spotcache.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

struct Cli {
    config: Config,
    session: Session,
    api: ApiClient,
    data: SpotData,
}

impl Cli {
    fn new(config: Config) -> Result<Self> {
        let cache_dir = config.cache_dir()?;
        let mut session = Session::new(cache_dir);
        if let Err(e) = session.load() {
            warn!(error = %e, "Ignoring unreadable session file");
        }

        let api = ApiClient::new(&config.api_base_url)?;
        let auth = AuthProvider::new(session.data.clone());
        let client = QueryClient::new(ActivationGate::new(auth, ModeSelector::default()));
        client.set_error_reporter(|key, err| {
            eprintln!("warning: {} failed: {}", key, err);
        });
        let data = SpotData::from_config(client, Arc::new(api.clone()), &config);

        Ok(Self {
            config,
            session,
            api,
            data,
        })
    }

    fn require_login(&self) -> Result<()> {
        if !self.data.auth().is_authenticated() {
            bail!("Not logged in. Run `spotcache login` first.");
        }
        Ok(())
    }

    async fn login(&mut self, username: Option<String>) -> Result<()> {
        let username = match username.or_else(|| self.config.last_username.clone()) {
            Some(name) => name,
            None => prompt_username()?,
        };
        let password = match std::env::var(ENV_PASSWORD) {
            Ok(password) if !password.is_empty() => password,
            _ => rpassword::prompt_password("Password: ")?,
        };
        if username.is_empty() || password.is_empty() {
            bail!("Username and password required");
        }

        let session_data = self
            .api
            .authenticate(&username, &password)
            .await
            .context("Login failed")?;

        self.data.auth().login(session_data.clone());
        self.session.update(session_data);
        if let Err(e) = self.session.save() {
            warn!(error = %e, "Failed to save session");
        }
        self.config.last_username = Some(username.clone());
        if let Err(e) = self.config.save() {
            warn!(error = %e, "Failed to save config");
        }

        info!(username = %username, "Logged in");
        let profile = self.data.load_profile().await;
        match self.data.profile_model() {
            Some(p) => println!("Logged in as {}", p.name()),
            None => println!("Logged in as {}", username),
        }
        report_error(&profile);
        Ok(())
    }

    fn logout(&mut self) -> Result<()> {
        let previous = self.data.auth().current();
        self.data.auth().logout();
        self.session.clear()?;
        match previous {
            Some(session) => println!("Logged out {}", session.username),
            None => println!("Not logged in"),
        }
        Ok(())
    }

    async fn spots(&self, mode: ListMode) -> Result<()> {
        if mode == ListMode::Favourites {
            self.require_login()?;
        }
        self.data.select_mode(mode);
        let state = self.data.load_spots().await;
        print_spots(mode, &self.data, &state);
        Ok(())
    }

    async fn refresh(&self, mode: ListMode) -> Result<()> {
        if mode == ListMode::Favourites {
            self.require_login()?;
        }
        self.data.select_mode(mode);
        self.data.load_spots().await;
        if self.data.refresh(mode).is_none() {
            bail!("Nothing to refresh for {}", mode);
        }
        let state = self.data.load_spots().await;
        print_spots(mode, &self.data, &state);
        Ok(())
    }

    async fn profile(&self) -> Result<()> {
        self.require_login()?;
        let state = self.data.load_profile().await;
        if report_error(&state) {
            return Ok(());
        }
        match self.data.profile_model() {
            Some(p) => {
                println!("{} (@{})", p.name(), p.username);
                if let Some(ref email) = p.email {
                    println!("  {}", email);
                }
                println!(
                    "  {} reviews, {} favourites",
                    p.review_count, p.favourite_count
                );
                println!("  updated {}", state.age_display());
            }
            None => println!("No profile data"),
        }
        Ok(())
    }

    async fn reviews(&self) -> Result<()> {
        self.require_login()?;
        let profile = self.data.load_profile().await;
        if report_error(&profile) {
            return Ok(());
        }
        let state = self.data.load_reviews().await;
        report_error(&state);

        let reviews = self.data.review_items();
        if reviews.is_empty() {
            println!("No reviews yet");
        }
        for review in reviews {
            let line = format!("{}  {}", review.stars(), review.spot_label());
            println!("{}", truncate_string(&line, LINE_WIDTH));
            if !review.comment.is_empty() {
                println!("    {}", truncate_string(&review.comment, LINE_WIDTH - 4));
            }
        }
        Ok(())
    }

    /// Subscribe to one list and reprint it on every change.
    async fn watch(&self, mode: ListMode, length: Duration) -> Result<()> {
        if mode == ListMode::Favourites {
            self.require_login()?;
        }
        self.data.select_mode(mode);
        let Some(query) = self.data.list_query(mode) else {
            bail!("Nothing to watch for {}", mode);
        };
        let mut subscription: Subscription = self.data.client().subscribe(&query);
        let deadline = tokio::time::Instant::now() + length;

        let mut last = subscription.state();
        loop {
            let next = tokio::select! {
                state = subscription.changed() => state,
                _ = tokio::time::sleep_until(deadline) => break,
            };
            // Skip notifications that did not change what is shown
            if next.status == last.status && next.data == last.data {
                continue;
            }
            if !next.is_fetching {
                print_spots(mode, &self.data, &next);
            }
            last = next;
        }
        Ok(())
    }
}

fn prompt_username() -> Result<String> {
    if let Ok(username) = std::env::var(ENV_USERNAME) {
        if !username.is_empty() {
            return Ok(username);
        }
    }
    print!("Username: ");
    io::stdout().flush()?;

    let mut username = String::new();
    io::stdin().read_line(&mut username)?;
    Ok(username.trim().to_string())
}

/// Print a query's error, if any. Returns whether there was one.
fn report_error(state: &QueryState) -> bool {
    match state.error {
        Some(ref err) if state.is_error => {
            if state.data.is_some() {
                eprintln!("{} (showing cached data)", err);
            } else {
                eprintln!("{}", err);
            }
            true
        }
        _ => false,
    }
}

fn print_spots(mode: ListMode, data: &SpotData, state: &QueryState) {
    if report_error(state) && state.data.is_none() {
        return;
    }
    let spots = data.spot_items();
    println!("{} spots ({}, updated {})", mode, spots.len(), state.age_display());
    for spot in spots {
        let marker = if spot.is_favourite { "*" } else { " " };
        println!(
            "{} {:>4}  {}",
            marker,
            spot.rating_display(),
            spot.summary(LINE_WIDTH)
        );
    }
}

/// Parse the optional `watch` length argument.
fn parse_watch_length(arg: Option<&String>) -> Result<Duration> {
    let minutes = match arg {
        Some(m) => m
            .parse::<u64>()
            .with_context(|| format!("Invalid minutes: {}", m))?,
        None => DEFAULT_WATCH_MINUTES,
    };
    if minutes == 0 || minutes > MAX_WATCH_MINUTES {
        bail!("Minutes must be between 1 and {}", MAX_WATCH_MINUTES);
    }
    Ok(Duration::from_secs(minutes * 60))
}

fn parse_mode(arg: Option<&String>) -> Result<ListMode> {
    match arg {
        Some(s) => s.parse::<ListMode>().map_err(|e| anyhow::anyhow!(e)),
        None => Ok(ListMode::Popular),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = Config::load()?;
    let log_dir = config.cache_dir().ok();
    let _guard = init_tracing(log_dir.as_deref());

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        println!("{}", USAGE);
        return Ok(());
    };

    let mut cli = Cli::new(config)?;
    match command.as_str() {
        "login" => cli.login(args.get(1).cloned()).await,
        "logout" => cli.logout(),
        "spots" => cli.spots(parse_mode(args.get(1))?).await,
        "profile" => cli.profile().await,
        "reviews" => cli.reviews().await,
        "refresh" => cli.refresh(parse_mode(args.get(1))?).await,
        "watch" => {
            let length = parse_watch_length(args.get(2))?;
            cli.watch(parse_mode(args.get(1))?, length).await
        }
        "help" | "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => bail!("Unknown command: {}\n\n{}", other, USAGE),
    }
}
