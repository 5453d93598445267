//! `colossusctl`: tail workspace logs, wait for app builds and probe builder
//! replicas from the command line.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, bail};
use clap::{Args as ClapArgs, Parser, Subcommand};
use futures::StreamExt;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use colossus_config::ClientSettings;
use colossus_core::coordinator::LOGS_CHANNEL;
use colossus_core::{
    BuildCoordinator, BuildError, ChannelEvent, ChannelSpec, ColossusChannels, EventChannels,
    HttpAvailabilityProbe, ListenOptions, LogDeduper, ReqwestConnector, StickyHostResolver,
};
use colossus_model::{Context, Level};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "colossusctl")]
#[command(about = "Follow Colossus build events and logs, and probe builder replicas")]
struct Cli {
    #[command(flatten)]
    scope: ScopeArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(ClapArgs, Debug, Clone)]
struct ScopeArgs {
    /// Account that owns the workspace
    #[arg(long, global = true, env = "COLOSSUS_ACCOUNT")]
    account: Option<String>,

    /// Workspace to listen on
    #[arg(long, global = true, env = "COLOSSUS_WORKSPACE", default_value = "master")]
    workspace: String,

    /// Bearer token sent with every request
    #[arg(long, global = true, env = "COLOSSUS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Client settings file (TOML or JSON). Overrides COLOSSUS_CONFIG_PATH.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Stream workspace logs until interrupted
    Logs {
        /// Minimum level requested from the server
        #[arg(long, default_value = "info")]
        level: Level,

        /// Only show logs from these senders (version suffix ignored)
        #[arg(long = "sender")]
        senders: Vec<String>,

        /// Only show logs whose subject starts with this app
        #[arg(long, default_value = "")]
        app: String,

        /// Include logs tagged with any embedded subject
        #[arg(long, default_value_t = false)]
        any: bool,
    },
    /// Wait for the next build of an app to finish
    Watch {
        /// App identifier, e.g. vendor.app@1.x
        app: String,

        /// Also print builder logs for the app
        #[arg(long, default_value_t = false)]
        logs: bool,
    },
    /// Probe builder replicas and print the preferred host
    Probe {
        /// App identifier, e.g. vendor.app@1.x
        app: String,

        /// Number of replica hints to probe
        #[arg(long)]
        candidates: Option<u32>,

        /// Per-probe timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,colossus::remote=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let settings = load_settings(&cli.scope)?;
    let ctx = build_context(&cli.scope, &settings)?;

    match cli.command {
        Command::Logs {
            level,
            senders,
            app,
            any,
        } => run_logs(&settings, &ctx, level, senders, &app, any).await,
        Command::Watch { app, logs } => run_watch(&settings, ctx, app, logs).await,
        Command::Probe {
            app,
            candidates,
            timeout_ms,
        } => run_probe(&settings, &ctx, &app, candidates, timeout_ms).await,
    }
}

fn load_settings(scope: &ScopeArgs) -> anyhow::Result<ClientSettings> {
    match &scope.config {
        Some(path) => {
            let settings = ClientSettings::load_from_file(path)?;
            settings
                .validate()
                .with_context(|| format!("invalid client settings in {}", path.display()))?;
            debug!(path = %path.display(), "client settings loaded");
            Ok(settings)
        }
        None => ClientSettings::load_from_env().map(|(settings, _)| settings),
    }
}

fn build_context(scope: &ScopeArgs, settings: &ClientSettings) -> anyhow::Result<Context> {
    let Some(account) = scope.account.clone() else {
        bail!("--account or COLOSSUS_ACCOUNT is required");
    };
    let Some(token) = scope.token.clone() else {
        bail!("--token or COLOSSUS_TOKEN is required");
    };

    let mut ctx = Context::new(account, scope.workspace.clone(), token);
    if let Some(user_agent) = &settings.user_agent {
        ctx = ctx.with_user_agent(user_agent.clone());
    }
    Ok(ctx)
}

fn channels(settings: &ClientSettings) -> anyhow::Result<ColossusChannels> {
    let endpoint = settings.colossus_url()?;
    Ok(ColossusChannels::new(
        endpoint,
        Arc::new(ReqwestConnector::default()),
        settings.stream.clone(),
    ))
}

async fn run_logs(
    settings: &ClientSettings,
    ctx: &Context,
    level: Level,
    senders: Vec<String>,
    app: &str,
    any: bool,
) -> anyhow::Result<()> {
    let senders = (!senders.is_empty()).then_some(senders);
    let spec = ChannelSpec::logs(app, level, senders, any);
    let mut subscription = channels(settings)?
        .subscribe(ctx, &spec)
        .with_context(|| format!("failed to subscribe to {LOGS_CHANNEL}"))?;
    info!(account = %ctx.account, workspace = %ctx.workspace, %level, "listening for logs");

    let mut dedupe = LogDeduper::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            event = subscription.events.next() => match event {
                Some(ChannelEvent::Message(message)) => {
                    if let Some(line) = dedupe.admit(&message) {
                        println!("{line}");
                    }
                }
                Some(ChannelEvent::Malformed(err)) => debug!(error = %err, "skipping frame"),
                Some(ChannelEvent::Lost(err)) => {
                    return Err(err).context("log stream lost");
                }
                None => break,
            },
        }
    }

    subscription.unsubscribe.call();
    Ok(())
}

async fn run_watch(
    settings: &ClientSettings,
    ctx: Context,
    app: String,
    logs: bool,
) -> anyhow::Result<()> {
    let coordinator = BuildCoordinator::new(Arc::new(channels(settings)?));
    let options = ListenOptions::default()
        .log_level(logs.then_some(Level::Info))
        .on_progress(|progress| {
            if let Some(percentage) = progress.percentage {
                info!(percentage, "receiving files");
            }
        })
        .on_log(|_, line| println!("{line}"));

    let session =
        coordinator.listen_then_trigger(ctx, app.clone(), || async { Ok(()) }, options);
    let handle = session.handle();
    let session = session.into_future();

    let outcome = tokio::select! {
        outcome = session => outcome,
        _ = tokio::signal::ctrl_c() => {
            handle.cancel();
            warn!(%app, "stopped watching");
            return Ok(());
        }
    };

    match outcome {
        Ok(_) => {
            println!("{app}: build succeeded");
            Ok(())
        }
        Err(BuildError::Failed(failure)) => {
            bail!("{app}: build failed ({}): {}", failure.code, failure.message)
        }
        Err(err) => Err(err).with_context(|| format!("{app}: lost track of the build")),
    }
}

async fn run_probe(
    settings: &ClientSettings,
    ctx: &Context,
    app: &str,
    candidates: Option<u32>,
    timeout_ms: Option<u64>,
) -> anyhow::Result<()> {
    let probe = HttpAvailabilityProbe::new(reqwest::Client::new(), settings.builder_url()?);
    let resolver = StickyHostResolver::new(Arc::new(probe), settings.sticky.clone());

    let candidates = candidates.unwrap_or(resolver.config().probe_candidates);
    let timeout = timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| resolver.config().probe_timeout());

    match resolver
        .resolve_best_host(ctx, app, candidates, timeout)
        .await
    {
        Some(best) => println!(
            "{} (hostname {}, score {}, hint {})",
            best.host,
            best.hostname,
            best.score,
            best.hint
        ),
        None => println!("no preference"),
    }
    Ok(())
}
