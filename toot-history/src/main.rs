use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono_tz::Tz;
use clap::Parser;
use libtootgate::config::resolve_config_path;
use libtootgate::duplicate::plain_text;
use libtootgate::history::media_inventory;
use libtootgate::logging::{LogFormat, LoggingConfig};
use libtootgate::rate_gate::RateGateResult;
use libtootgate::session::{Session, SessionSettings};
use libtootgate::timeline::mastodon::MastodonTimeline;
use libtootgate::types::{HistoricalPost, MediaDescriptor};
use libtootgate::{Config, TootgateError};
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(name = "toot-history")]
#[command(version, about = "Show the Mastodon account's recent posts")]
#[command(long_about = r#"Show the Mastodon account's recent posts, as the server reports them.

EXAMPLES:
    # Recent posts and hours since the last one
    toot-history

    # Only the 5 newest
    toot-history --limit 5

    # Media attached to recent posts
    toot-history --media

    # JSON output for scripting
    toot-history --format json | jq '.posts[] | select(.reblog == false) | .url'

    # JSONL output (one JSON object per line)
    toot-history --format jsonl

OUTPUT FORMATS:
    text  - Human-readable listing (default)
    json  - One JSON document with account, rate status and posts
    jsonl - JSON lines, one post (or media item) per line

EXIT CODES:
    0 - Success (including an account with no posts)
    1 - Error (configuration, network)
    2 - Authentication error
"#)]
struct Args {
    /// Configuration file (default: $TOOTGATE_CONFIG or ~/.config/tootgate/config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Maximum number of posts to show
    #[arg(short, long, default_value = "20", value_name = "N")]
    limit: usize,

    /// List media attachments instead of posts
    #[arg(short, long)]
    media: bool,

    /// Output format
    #[arg(short, long, default_value = "text", value_name = "FORMAT")]
    #[arg(value_parser = ["text", "json", "jsonl"])]
    format: String,

    /// Log output format (text, json, pretty)
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// One recent post as shown to the operator
#[derive(Debug, Serialize)]
struct PostEntry {
    id: String,
    created_at: String,
    reblog: bool,
    visibility: String,
    text: String,
    tags: Vec<String>,
    media: usize,
    url: Option<String>,
}

impl PostEntry {
    fn from_post(post: &HistoricalPost, tz: Tz) -> Self {
        Self {
            id: post.id.clone(),
            created_at: post.created_at.with_timezone(&tz).to_rfc3339(),
            reblog: post.is_reblog,
            visibility: post.visibility.to_string(),
            text: plain_text(&post.raw_html_body),
            tags: post.tags.clone(),
            media: post.media.len(),
            url: post.url.clone(),
        }
    }
}

/// Gap since the newest post
#[derive(Debug, Serialize)]
struct RateStatus {
    hours_since_last_post: Option<f64>,
    minimum_interval_hours: f64,
    eligible: bool,
    next_eligible_at: Option<String>,
}

impl RateStatus {
    fn new(rate: Option<&RateGateResult>, minimum_interval_hours: f64) -> Self {
        match rate {
            Some(r) => Self {
                hours_since_last_post: Some(r.hours_since_last_post),
                minimum_interval_hours: r.minimum_interval_hours,
                eligible: r.eligible,
                next_eligible_at: (!r.eligible).then(|| r.next_eligible_at.to_rfc3339()),
            },
            None => Self {
                hours_since_last_post: None,
                minimum_interval_hours,
                eligible: true,
                next_eligible_at: None,
            },
        }
    }

    fn describe(&self) -> String {
        match self.hours_since_last_post {
            None => "No posts yet".to_string(),
            Some(hours) if self.eligible => format!(
                "{:.2} hours since the last post (minimum {})",
                hours, self.minimum_interval_hours
            ),
            Some(hours) => format!(
                "{:.2} hours since the last post, less than the {} minimum; next post allowed at {}",
                hours,
                self.minimum_interval_hours,
                self.next_eligible_at.as_deref().unwrap_or("unknown")
            ),
        }
    }
}

#[derive(Debug, Serialize)]
struct HistoryReport {
    account: String,
    rate: RateStatus,
    posts: Vec<PostEntry>,
}

fn render_posts_text(report: &HistoryReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n{}\n", report.account, report.rate.describe()));

    for post in &report.posts {
        let kind = if post.reblog { "reblog" } else { "original" };
        let preview = if post.text.chars().count() > 60 {
            format!("{}...", post.text.chars().take(60).collect::<String>())
        } else {
            post.text.clone()
        };

        out.push('\n');
        out.push_str(&format!(
            "{} | {} | {} {} | {}\n",
            post.created_at, post.id, kind, post.visibility, preview
        ));
        if !post.tags.is_empty() {
            out.push_str(&format!("  tags: {}\n", post.tags.join(" ")));
        }
        if post.media > 0 {
            out.push_str(&format!("  media: {}\n", post.media));
        }
        if let Some(url) = &post.url {
            out.push_str(&format!("  {}\n", url));
        }
    }
    out
}

fn render_media_text(media: &[&MediaDescriptor]) -> String {
    let mut out = String::new();
    for item in media {
        out.push_str(&format!(
            "{} | {} | {} | {}\n",
            item.id,
            item.kind,
            item.description.as_deref().unwrap_or("(no description)"),
            item.url
        ));
    }
    out
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    LoggingConfig::from_env(args.log_format, args.verbose).init();
    tracing::debug!("toot-history started with args: {:?}", args);

    if let Err(e) = run(args).await {
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<TootgateError>()
            .map(TootgateError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(args: Args) -> Result<()> {
    let config_path = resolve_config_path(args.config.as_deref())?;
    let config = Config::load_from_path(&config_path).context("Failed to load configuration")?;
    let settings = SessionSettings::from_config(&config)?;

    let timeline = MastodonTimeline::from_config(&config)?;
    let mut session = Session::connect(Box::new(timeline), settings).await?;

    let posts: Vec<HistoricalPost> = session
        .history()
        .await
        .context("Failed to fetch recent posts")?
        .to_vec();

    if args.media {
        let media = media_inventory(&posts);
        match args.format.as_str() {
            "json" => println!("{}", serde_json::to_string_pretty(&media)?),
            "jsonl" => {
                for item in media {
                    println!("{}", serde_json::to_string(item)?);
                }
            }
            _ => print!("{}", render_media_text(&media)),
        }
        return Ok(());
    }

    let rate = session.rate_status().await?.ok();
    let report = HistoryReport {
        account: session.describe(),
        rate: RateStatus::new(rate.as_ref(), settings.minimum_interval_hours),
        posts: posts
            .iter()
            .take(args.limit)
            .map(|p| PostEntry::from_post(p, settings.timezone))
            .collect(),
    };

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        "jsonl" => {
            for post in &report.posts {
                println!("{}", serde_json::to_string(post)?);
            }
        }
        _ => print!("{}", render_posts_text(&report)),
    }

    Ok(())
}
