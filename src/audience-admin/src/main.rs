//! Audience admin: operator CLI for segments, flow schedules and campaigns.
//!
//! Reads JSON files produced by the CRUD layer (or the content generator),
//! runs them through the core and prints the result as JSON.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use audience_campaigns::{CampaignLifecycle, MemoryStore, RecordingSink};
use audience_core::event_bus::capture_sink;
use audience_core::{AppConfig, CustomerRecord};
use audience_flows::{
    plan, plan_from, Flow, FlowRepository, FlowStep, ScheduleSummary, ScheduledStep,
};
use audience_segmentation::{MemorySegmentRepository, SegmentDefinition, SegmentService};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "audience-admin")]
#[command(about = "Customer segment, flow and campaign administration tool")]
#[command(version)]
struct Cli {
    /// Optional TOML configuration file
    #[arg(long, env = "AUDIENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Send time used when a campaign has none (overrides config)
    #[arg(long, env = "AUDIENCE__SCHEDULING__DEFAULT_SEND_TIME")]
    default_send_time: Option<String>,

    /// Upper bound on listed matches (overrides config)
    #[arg(long, env = "AUDIENCE__SEGMENTATION__MAX_MATCH_LIMIT")]
    max_match_limit: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Evaluate a segment definition against a customer file
    Segment {
        /// Segment definition JSON (standard or legacy flat form)
        #[arg(long)]
        definition: PathBuf,

        /// JSON array of customer records
        #[arg(long)]
        customers: PathBuf,

        /// Number of matches to list
        #[arg(long)]
        limit: Option<usize>,

        /// Evaluation time for relative dates (RFC 3339, default: now)
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },

    /// Compute absolute send times for a flow
    Plan {
        /// Flow JSON: either a full flow or a bare array of steps
        #[arg(long)]
        flow: PathBuf,

        /// Campaign start date (YYYY-MM-DD)
        #[arg(long)]
        start_date: NaiveDate,

        /// Start time of day (HH:MM, default: midnight)
        #[arg(long, value_parser = parse_time)]
        time: Option<NaiveTime>,
    },

    /// Seed the in-memory store and run the demo campaign through its lifecycle
    Demo,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FlowFile {
    Flow(Flow),
    Steps(Vec<FlowStep>),
}

impl FlowFile {
    fn into_steps(self) -> Vec<FlowStep> {
        match self {
            FlowFile::Flow(flow) => flow.steps,
            FlowFile::Steps(steps) => steps,
        }
    }
}

#[derive(Serialize)]
struct PlanOutput {
    summary: ScheduleSummary,
    schedule: Vec<ScheduledStep>,
}

fn parse_time(raw: &str) -> Result<NaiveTime, String> {
    audience_campaigns::models::time_of_day::parse(raw)
        .ok_or_else(|| format!("expected HH:MM, got '{raw}'"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audience_admin=info,audience_campaigns=info".into()),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });
    if let Some(send_time) = cli.default_send_time {
        config.scheduling.default_send_time = send_time;
    }
    if let Some(max) = cli.max_match_limit {
        config.segmentation.max_match_limit = max;
    }

    info!(
        default_match_limit = config.segmentation.default_match_limit,
        max_match_limit = config.segmentation.max_match_limit,
        default_send_time = %config.scheduling.default_send_time,
        dedupe = config.delivery.dedupe,
        "Configuration loaded"
    );

    match cli.command {
        Commands::Segment {
            definition,
            customers,
            limit,
            now,
        } => cmd_segment(&config, definition, customers, limit, now).await,
        Commands::Plan {
            flow,
            start_date,
            time,
        } => cmd_plan(flow, start_date, time).await,
        Commands::Demo => cmd_demo(&config),
    }
}

async fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> anyhow::Result<T> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_segment(
    config: &AppConfig,
    definition: PathBuf,
    customers: PathBuf,
    limit: Option<usize>,
    now: Option<DateTime<Utc>>,
) -> anyhow::Result<()> {
    let definition: SegmentDefinition = read_json(&definition).await?;
    let customers: Vec<CustomerRecord> = read_json(&customers).await?;
    let now = now.unwrap_or_else(Utc::now);

    let service = SegmentService::new(
        config.segmentation.clone(),
        Arc::new(MemorySegmentRepository::new()),
        Arc::new(customers.clone()),
    );
    let preview = service.preview(&definition, &customers, now, limit)?;
    info!(
        customers = customers.len(),
        matches = preview.total_count,
        "Segment evaluated"
    );
    print_json(&preview)
}

async fn cmd_plan(
    flow: PathBuf,
    start_date: NaiveDate,
    time: Option<NaiveTime>,
) -> anyhow::Result<()> {
    let steps = read_json::<FlowFile>(&flow).await?.into_steps();
    let schedule = plan(&steps, start_date, time)?;
    print_json(&PlanOutput {
        summary: ScheduleSummary::from_schedule(&schedule),
        schedule,
    })
}

fn cmd_demo(config: &AppConfig) -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let seed = store.seed_demo_data()?;

    let sink = Arc::new(RecordingSink::new());
    let events = capture_sink();
    let lifecycle = CampaignLifecycle::in_memory(config, store.clone(), sink.clone())?
        .with_event_sink(events.clone());

    let now = Utc::now();
    let preview = lifecycle.segments().preview_by_id(seed.segment_id, now, None)?;
    print_json(&preview)?;

    if let Some(steps) = store.flows().get_by_segment(seed.segment_id)? {
        let schedule = plan_from(&steps, now.naive_utc())?;
        print_json(&ScheduleSummary::from_schedule(&schedule))?;
    }

    let report = lifecycle.activate(seed.campaign_id, now)?;
    print_json(&report)?;

    lifecycle.pause(seed.campaign_id, now)?;
    let report = lifecycle.resume(seed.campaign_id, Utc::now())?;
    print_json(&report)?;

    let campaign = lifecycle.complete(seed.campaign_id, Utc::now())?;
    info!(
        campaign_id = %campaign.id,
        status = %campaign.status,
        deliveries = sink.count(),
        events = events.count(),
        "Demo campaign finished"
    );
    print_json(&lifecycle.stats(seed.campaign_id))
}
