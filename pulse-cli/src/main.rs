//! pulse-cli: chatbot KPI reports from the command line
//!
//! # Subcommands
//! - `report <csv> [filters] [--json]`  load a CSV locally and print the dashboard
//! - `options <csv> [--json]`           print the available filter values
//! - `status`                           show health of a running server

use std::time::Instant;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use pulse_core::{
    BreakdownRow, Dashboard, DashboardView, Dataset, FilterOptions, FilterParams, Metric,
    PulseConfig,
};
use pulse_ingest::DatasetLoader;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_SERVER: &str = "http://127.0.0.1:8766";

#[derive(Debug, Parser)]
#[command(name = "pulse-cli", version, about = "Chatbot KPI dashboard reports")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Render the dashboard for a CSV file
    Report {
        /// Session CSV to load
        csv: String,

        #[command(flatten)]
        filters: FilterArgs,

        /// Print the full view model as JSON
        #[arg(long)]
        json: bool,

        /// Config file with [schema] and [dashboard] sections
        #[arg(short, long)]
        config: Option<String>,
    },

    /// List filter values present in a CSV file
    Options {
        csv: String,

        #[arg(long)]
        json: bool,

        #[arg(short, long)]
        config: Option<String>,
    },

    /// Show Pulse server status
    Status {
        /// Pulse HTTP server URL
        #[arg(long, env = "PULSE_HTTP_URL", default_value = DEFAULT_SERVER)]
        server: String,
    },
}

#[derive(Debug, Args)]
struct FilterArgs {
    /// First day included (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,

    /// Last day included (YYYY-MM-DD)
    #[arg(long)]
    to: Option<NaiveDate>,

    #[arg(long)]
    channel: Option<String>,

    #[arg(long)]
    segment: Option<String>,

    #[arg(long)]
    intent: Option<String>,

    #[arg(long)]
    queue: Option<String>,

    /// Response-time threshold in seconds
    #[arg(long)]
    sla: Option<u32>,
}

impl From<FilterArgs> for FilterParams {
    fn from(args: FilterArgs) -> Self {
        FilterParams {
            start: args.from,
            end: args.to,
            channel: args.channel,
            segment: args.segment,
            intent: args.intent,
            queue: args.queue,
            sla_seconds: args.sla,
        }
    }
}

fn load_config(path: Option<&str>) -> anyhow::Result<PulseConfig> {
    match path {
        Some(p) => Ok(PulseConfig::load(p)?),
        None => Ok(PulseConfig::default()),
    }
}

fn load_dataset(csv: &str, config: &PulseConfig) -> anyhow::Result<Dataset> {
    let started = Instant::now();
    let dataset = DatasetLoader::new(config.schema.clone()).load_path(csv)?;
    tracing::info!(
        "Loaded {} rows from {} in {}ms",
        dataset.len(),
        csv,
        started.elapsed().as_millis()
    );
    Ok(dataset)
}

fn do_report(csv: &str, params: FilterParams, json: bool, config: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let dataset = load_dataset(csv, &config)?;

    let started = Instant::now();
    let view = Dashboard::from_config(&config).render(&dataset, &params)?;
    tracing::info!(
        "Rendered {} of {} sessions in {}ms",
        view.kpis.sessions,
        dataset.len(),
        started.elapsed().as_millis()
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print!("{}", format_report(&view));
    }
    Ok(())
}

fn do_options(csv: &str, json: bool, config: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let dataset = load_dataset(csv, &config)?;
    let options = Dashboard::from_config(&config).options(&dataset);
    tracing::debug!("Options for {}: {:?}", csv, options);

    if json {
        println!("{}", serde_json::to_string_pretty(&options)?);
    } else {
        print!("{}", format_options(&options));
    }
    Ok(())
}

/// Show the server status by calling GET /health.
fn do_status(server: &str) -> anyhow::Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;

    let url = format!("{}/health", server);
    match client.get(&url).send() {
        Ok(r) if r.status().is_success() => {
            let body: serde_json::Value = r.json().unwrap_or_default();
            println!("Pulse server: {}", body["status"].as_str().unwrap_or("unknown"));
            println!("Version:      {}", body["version"].as_str().unwrap_or("?"));
            println!("Datasets:     {}", body["datasets"].as_u64().unwrap_or(0));
            println!("Socket:       {}", body["socket"].as_str().unwrap_or("?"));
        }
        Ok(r) => {
            eprintln!("pulse-cli: server unhealthy (HTTP {})", r.status());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("pulse-cli: cannot reach {}: {}", url, e);
            std::process::exit(1);
        }
    }
    Ok(())
}

pub fn fmt_percent(metric: &Metric) -> String {
    match metric {
        Metric::Value(v) => format!("{:.1}%", v),
        Metric::NoData => "n/a".to_string(),
        Metric::Unavailable => "unavailable".to_string(),
    }
}

pub fn fmt_score(metric: &Metric) -> String {
    match metric {
        Metric::Value(v) => format!("{:.2}", v),
        Metric::NoData => "n/a".to_string(),
        Metric::Unavailable => "unavailable".to_string(),
    }
}

fn push_breakdown(out: &mut String, title: &str, rows: &Option<Vec<BreakdownRow>>) {
    let Some(rows) = rows else {
        return;
    };
    out.push_str(&format!("\n{}\n", title));
    for row in rows {
        out.push_str(&format!(
            "  {:<16} {:>6}  resolved {:>7}  handover {:>7}\n",
            row.key,
            row.sessions,
            fmt_percent(&row.resolution_rate),
            fmt_percent(&row.handover_rate)
        ));
    }
}

pub fn format_report(view: &DashboardView) -> String {
    let mut out = String::new();
    let f = &view.filters;
    match f.range {
        Some(r) => out.push_str(&format!("Period:          {} .. {}\n", r.start, r.end)),
        None => out.push_str("Period:          (no data in range)\n"),
    }
    out.push_str(&format!("SLA threshold:   {}s\n", f.sla_seconds));
    for (label, value) in [
        ("Channel", &f.channel),
        ("Segment", &f.segment),
        ("Intent", &f.intent),
        ("Queue", &f.queue),
    ] {
        if let Some(v) = value {
            out.push_str(&format!("{:<17}{}\n", format!("{}:", label), v));
        }
    }

    let k = &view.kpis;
    out.push_str(&format!("\nSessions:        {}\n", k.sessions));
    out.push_str(&format!("Bot resolution:  {}\n", fmt_percent(&k.resolution_rate)));
    out.push_str(&format!("Handover:        {}\n", fmt_percent(&k.handover_rate)));
    out.push_str(&format!("FCR:             {}\n", fmt_percent(&k.fcr_rate)));
    out.push_str(&format!("CSAT:            {}\n", fmt_score(&k.mean_csat)));
    out.push_str(&format!("NPS:             {}\n", fmt_score(&k.nps)));
    out.push_str(&format!("SLA compliance:  {}\n", fmt_percent(&k.sla_compliance)));

    push_breakdown(&mut out, "By channel", &view.by_channel);
    push_breakdown(&mut out, "By segment", &view.by_segment);

    if let Some(queues) = &view.sla_by_queue {
        out.push_str("\nSLA by queue\n");
        for q in queues {
            out.push_str(&format!(
                "  {:<16} {:>6}  {}\n",
                q.queue,
                q.sessions,
                fmt_percent(&q.sla_compliance)
            ));
        }
    }

    if let Some(intents) = &view.top_intents {
        out.push_str("\nTop intents\n");
        for i in intents {
            out.push_str(&format!("  {:<24} {:>6}\n", i.intent, i.sessions));
        }
    }

    if let Some(intents) = &view.top_handover_intents {
        if !intents.is_empty() {
            out.push_str("\nHighest handover\n");
            for i in intents {
                out.push_str(&format!(
                    "  {:<24} {:>6}  {:.1}%\n",
                    i.intent, i.sessions, i.handover_rate
                ));
            }
        }
    }

    if let Some(stages) = &view.returns_funnel {
        out.push_str("\nReturns funnel\n");
        for s in stages {
            out.push_str(&format!("  {:<16} {:>6}\n", s.stage, s.sessions));
        }
    }

    out
}

pub fn format_options(options: &FilterOptions) -> String {
    let mut out = String::new();
    match (options.min_date, options.max_date) {
        (Some(lo), Some(hi)) => out.push_str(&format!("Dates:     {} .. {}\n", lo, hi)),
        _ => out.push_str("Dates:     (none)\n"),
    }
    out.push_str(&format!(
        "SLA:       {}s (range {}..={}s)\n",
        options.default_sla_seconds, options.sla_min_seconds, options.sla_max_seconds
    ));
    for (label, values) in [
        ("Channels", &options.channels),
        ("Segments", &options.segments),
        ("Intents", &options.intents),
        ("Queues", &options.queues),
    ] {
        let line = match values {
            Some(v) => {
                let mut all = vec![options.all_sentinel.as_str()];
                all.extend(v.iter().map(String::as_str));
                all.join(", ")
            }
            None => "unavailable".to_string(),
        };
        out.push_str(&format!("{:<11}{}\n", format!("{}:", label), line));
    }
    out
}

fn main() {
    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Report {
            csv,
            filters,
            json,
            config,
        } => do_report(&csv, filters.into(), json, config.as_deref()),
        Commands::Options { csv, json, config } => do_options(&csv, json, config.as_deref()),
        Commands::Status { server } => do_status(server.trim_end_matches('/')),
    };

    if let Err(e) = result {
        eprintln!("pulse-cli: {}", e);
        std::process::exit(1);
    }
}
