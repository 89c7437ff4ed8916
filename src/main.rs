mod api;
mod bot;
mod bus;
mod channels;
mod config;
mod events;
mod menus;
mod messages;
mod rdm;
mod scheduler;
mod wizard;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tokio::signal;

use channels::Conversation;
use channels::gateway::GatewaySurface;
use events::feed::HttpEventFeed;
use events::{EventIngestor, PastEventStore, Plan};
use rdm::{DeviceApi, RdmClient};
use scheduler::{JobSpec, JobStore, JobTask, Trigger};

const REFRESH_EVENTS_JOB: &str = "refresh-events";

#[derive(Parser)]
#[command(
    name = "rdmbot",
    version,
    about = "Chat-ops bot for RDM device fleets"
)]
struct Cli {
    #[arg(short, long, default_value = "~/.rdmbot/config.toml")]
    config: String,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    Run,
    Init,
    /// Print the device status summary
    Status,
    /// Show what the next events ingestion pass would schedule.
    /// Jobs are only registered, and dates only recorded, by `run`.
    Ingest,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Run);
    if let Commands::Init = command {
        init_tracing(None);
        let path = config::init_config_dir().await?;
        tracing::info!("Initialized {}", path.display());
        return Ok(());
    }

    let cfg = Arc::new(config::load(&cli.config)?);
    init_tracing(cfg.bot.log_filter.as_deref());
    match command {
        Commands::Init => {}
        Commands::Run => run(cfg).await?,
        Commands::Status => {
            let status = RdmClient::new(&cfg.rdm).get_status().await;
            println!("{}", messages::status_message(&status));
        }
        Commands::Ingest => {
            let plan = ingest(cfg, Utc::now()).await?;
            print_plan(&plan);
        }
    }
    Ok(())
}

fn init_tracing(default_filter: Option<&str>) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(default_filter.unwrap_or("info"))
            }),
        )
        .init();
}

fn ingestor(cfg: &Arc<config::Config>, jobs: Arc<JobStore>) -> EventIngestor {
    EventIngestor::new(
        cfg.clone(),
        Arc::new(HttpEventFeed::new(&cfg.events.feed_url)),
        PastEventStore::new(cfg.events.past_events_path.clone()),
        jobs,
    )
}

/// The job store here dies with the process, so this never saves the
/// past-events file: a recorded date would never be scheduled by `run`.
async fn ingest(cfg: Arc<config::Config>, now: DateTime<Utc>) -> Result<Plan> {
    ingestor(&cfg, Arc::new(JobStore::new())).dry_run(now).await
}

fn print_plan(plan: &Plan) {
    for spec in &plan.jobs {
        println!("{} {} ({:?})", spec.id.as_deref().unwrap_or("-"), spec.name, spec.trigger);
    }
    for text in [&plan.tech_message, &plan.filtered_tech_message, &plan.user_message]
        .into_iter()
        .flatten()
    {
        println!("\n{text}");
    }
}

async fn run(cfg: Arc<config::Config>) -> Result<()> {
    if cfg.bot.api_key.is_none() {
        if is_localhost(&cfg.bot.bind) {
            tracing::warn!("API authentication disabled (localhost-only)");
        } else {
            anyhow::bail!(
                "API authentication required for non-localhost binding '{}'. Set [bot] api_key.",
                cfg.bot.bind
            );
        }
    }

    let bus = Arc::new(bus::InteractionBus::new());
    let surface = Arc::new(GatewaySurface::new(&cfg.bot, bus.clone()));
    let conversation =
        Conversation::new(surface, Duration::from_secs(cfg.bot.idle_timeout_secs));
    let rdm: Arc<dyn DeviceApi> = Arc::new(RdmClient::new(&cfg.rdm));
    let jobs = Arc::new(JobStore::new());

    let ingestor = if cfg.events.enabled {
        jobs.add(
            JobSpec {
                id: Some(REFRESH_EVENTS_JOB.to_string()),
                name: "Refresh events".to_string(),
                task: JobTask::RefreshEvents,
                trigger: Trigger::cron(&cfg.events.refresh_cron, cfg.locale.timezone)?,
                replace_existing: true,
            },
            Utc::now(),
        )?;
        Some(ingestor(&cfg, jobs.clone()))
    } else {
        None
    };
    let bot = Arc::new(bot::Bot::new(
        cfg.clone(),
        rdm,
        jobs.clone(),
        conversation,
        ingestor,
    ));

    if cfg.events.enabled
        && !jobs.is_running()
        && let Err(e) = bot.ingest_events().await
    {
        tracing::error!("Startup event ingestion failed: {e:#}");
    }
    tokio::spawn(jobs.clone().run(bot.clone()));

    let state = api::AppState {
        bot,
        bus,
        api_key: cfg.bot.api_key.clone(),
    };
    let listener = tokio::net::TcpListener::bind(&cfg.bot.bind).await?;
    tracing::info!("rdmbot listening on {}", cfg.bot.bind);

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async {
            signal::ctrl_c().await.ok();
        })
        .await?;
    Ok(())
}

fn is_localhost(bind: &str) -> bool {
    use std::net::IpAddr;

    let host = if let Some(inner) = bind.strip_prefix('[')
        && let Some(bracket_end) = inner.find(']')
    {
        &inner[..bracket_end]
    } else if let Some(colon) = bind.rfind(':') {
        &bind[..colon]
    } else {
        bind
    };

    if host == "localhost" {
        return true;
    }
    host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_localhost() {
        assert!(is_localhost("127.0.0.1:3100"));
        assert!(is_localhost("localhost:3100"));
        assert!(is_localhost("[::1]:3100"));
        assert!(!is_localhost("0.0.0.0:3100"));
        assert!(!is_localhost("localhost.evil.com:3100"));
        assert!(!is_localhost("[]:3100"));
    }

    #[test]
    fn test_cli_defaults_to_run() {
        let cli = Cli::parse_from(["rdmbot"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.config, "~/.rdmbot/config.toml");

        let cli = Cli::parse_from(["rdmbot", "-c", "/etc/rdmbot.toml", "ingest"]);
        assert!(matches!(cli.command, Some(Commands::Ingest)));
    }

    #[tokio::test]
    async fn test_ingest_command_leaves_dates_for_the_bot() {
        use chrono::TimeZone;

        let server = httpmock::MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::GET).path("/events.json");
            then.status(200).json_body(serde_json::json!([
                {"name": "Raid Day", "type": "community", "has_quests": true,
                 "start": "2024-01-01T10:00", "end": null}
            ]));
        });
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("past_events.json");
        let mut cfg = config::test_config();
        cfg.events.feed_url = server.url("/events.json");
        cfg.events.past_events_path = path.clone();
        let cfg = Arc::new(cfg);
        let now = Utc.with_ymd_and_hms(2023, 12, 31, 12, 0, 0).unwrap();

        let preview = ingest(cfg.clone(), now).await.unwrap();
        assert_eq!(preview.jobs.len(), 2);
        assert!(!path.exists());

        let jobs = Arc::new(JobStore::new());
        let plan = ingestor(&cfg, jobs.clone()).run(now).await.unwrap();
        assert_eq!(plan.jobs.len(), 2);
        assert_eq!(jobs.list().len(), 2);
        assert!(path.exists());
    }
}
