mod host;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tandem_core::api::HttpApi;
use tandem_core::models::PushData;
use tandem_core::push::PushSubscriptionManager;
use tandem_core::stats::SharedEventStats;
use tandem_core::tracing_setup::init_tracing;
use tandem_core::worker::{resolve_target_url, BackgroundHandler, ClickOutcome};
use tandem_core::{CoreConfig, CoreRuntime, Identity};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use host::{HeadlessPlatform, SimulatedScope, StdoutSurface};

#[derive(Parser)]
#[command(name = "tandem-cli")]
#[command(about = "Debugging surface for the tandem synchronization core")]
struct Cli {
    /// Path to JSON config file (apiBaseUrl, busUrl, reconnect, ...)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(long, short)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and stream store events as JSON lines until interrupted
    Watch {
        /// Identity to log in as
        #[arg(long, short = 'u')]
        user: String,
        /// Print event-bus counters on exit
        #[arg(long)]
        stats: bool,
    },

    /// Show the server's view of this user's push subscriptions
    PushStatus,

    /// Ask the server to push a test notification
    PushTest {
        message: String,
    },

    /// Run the background handler against a push body (JSON, or @file)
    RenderPush {
        payload: String,
        /// Simulate a click on the rendered notification
        #[arg(long)]
        click: bool,
        /// Action button id for the simulated click
        #[arg(long)]
        action: Option<String>,
        /// URL of an already-open window
        #[arg(long)]
        open_window: Option<String>,
    },

    /// Print the URL a notification click would navigate to
    ResolveClick {
        #[arg(long)]
        action: Option<String>,
        /// Notification type (e.g. friend_request)
        #[arg(long = "type")]
        kind: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        task_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();
    let pretty = cli.pretty;

    match cli.command {
        Commands::Watch { user, stats } => {
            let config = load_config(cli.config.as_deref())?;
            watch(config, Identity::new(user), stats).await
        }
        Commands::PushStatus => {
            let config = load_config(cli.config.as_deref())?;
            let status = push_manager(&config).get_status().await?;
            print_json(&serde_json::to_value(status)?, pretty)
        }
        Commands::PushTest { message } => {
            let config = load_config(cli.config.as_deref())?;
            push_manager(&config)
                .send_test(&message)
                .await
                .context("Failed to send test notification")?;
            print_json(&json!({ "sent": true, "message": message }), pretty)
        }
        Commands::RenderPush {
            payload,
            click,
            action,
            open_window,
        } => render_push(&payload, click, action.as_deref(), open_window.as_deref(), pretty).await,
        Commands::ResolveClick {
            action,
            kind,
            url,
            task_id,
        } => {
            let data = PushData {
                url,
                kind,
                task_id,
                ..Default::default()
            };
            let target = resolve_target_url(action.as_deref(), &data);
            print_json(&json!({ "url": target }), pretty)
        }
    }
}

/// `--config`, else the default config file if present, else the environment alone.
fn load_config(path: Option<&Path>) -> Result<CoreConfig> {
    if let Some(path) = path {
        return CoreConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()));
    }
    if let Some(default) = default_config_path().filter(|p| p.exists()) {
        return CoreConfig::load(&default)
            .with_context(|| format!("Failed to load config from {}", default.display()));
    }
    CoreConfig::from_env().context("No config file found and TANDEM_API_URL/TANDEM_BUS_URL not set")
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tandem").join("config.json"))
}

fn push_manager(config: &CoreConfig) -> PushSubscriptionManager {
    let api = Arc::new(HttpApi::new(
        config.api_base_url.clone(),
        config.auth_token.clone(),
    ));
    PushSubscriptionManager::new(
        Arc::new(HeadlessPlatform),
        api,
        config.vapid_public_key.clone(),
        None,
    )
}

async fn watch(config: CoreConfig, identity: Identity, show_stats: bool) -> Result<()> {
    let runtime = CoreRuntime::from_config(config)?;
    let mut events = runtime.subscribe();
    info!(user = %identity, "logging in");
    let transition = runtime.login(identity);

    if let Some(fetch) = transition.fetch {
        tokio::spawn(async move {
            match fetch.await {
                Ok(Ok(outcome)) => info!(?outcome, "initial fetch finished"),
                Ok(Err(e)) => warn!(error = %e, "initial fetch failed"),
                Err(e) => warn!(error = %e, "initial fetch task failed"),
            }
        });
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    runtime.shutdown();
    if show_stats {
        print_stats(&runtime.stats());
    }
    Ok(())
}

fn print_stats(stats: &SharedEventStats) {
    let snapshot = stats.snapshot();
    let by_event: serde_json::Map<String, serde_json::Value> = snapshot
        .events_by_count()
        .into_iter()
        .map(|(name, count)| (name, json!(count)))
        .collect();
    eprintln!(
        "{}",
        json!({
            "total": snapshot.total,
            "malformed": snapshot.malformed,
            "buffered": snapshot.buffered,
            "discarded": snapshot.discarded,
            "byEvent": by_event,
        })
    );
}

async fn render_push(
    payload: &str,
    click: bool,
    action: Option<&str>,
    open_window: Option<&str>,
    pretty: bool,
) -> Result<()> {
    let body = match payload.strip_prefix('@') {
        Some(path) => std::fs::read(path).with_context(|| format!("Failed to read {}", path))?,
        None => payload.as_bytes().to_vec(),
    };
    if !click && (action.is_some() || open_window.is_some()) {
        bail!("--action and --open-window only apply with --click");
    }

    let scope = match open_window {
        Some(url) => SimulatedScope::with_window(url),
        None => SimulatedScope::default(),
    };
    let handler = BackgroundHandler::new(Arc::new(StdoutSurface), Arc::new(scope));
    let notification = handler.handle_push(Some(&body)).await;

    if click {
        let outcome = match handler.handle_click(action, &notification).await {
            ClickOutcome::Focused { client_id, url } => {
                json!({ "outcome": "focused", "client": client_id, "url": url })
            }
            ClickOutcome::Opened { url } => json!({ "outcome": "opened", "url": url }),
            ClickOutcome::Dismissed => json!({ "outcome": "dismissed" }),
        };
        print_json(&outcome, pretty)?;
    }
    Ok(())
}

fn print_json(value: &serde_json::Value, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", text);
    Ok(())
}
