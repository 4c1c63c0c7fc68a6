//! toot-post - Publish one candidate post to Mastodon, carefully

use std::path::{Path, PathBuf};

use clap::Parser;
use libtootgate::audit::AuditLog;
use libtootgate::config::{mask_token, resolve_config_path};
use libtootgate::confirm::{ConfirmationPolicy, ConsoleConfirmation};
use libtootgate::logging::{LogFormat, LoggingConfig};
use libtootgate::session::{RunReport, Session, SessionSettings};
use libtootgate::timeline::mastodon::MastodonTimeline;
use libtootgate::types::{Candidate, CandidateDraft};
use libtootgate::{Config, PostOutcome, Result, TootgateError};
use secrecy::ExposeSecret;
use serde_json::json;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "toot-post")]
#[command(version, about = "Publish one candidate post to Mastodon after duplicate, rate and operator checks")]
#[command(long_about = r#"Publish one candidate post to Mastodon.

The post is skipped when the account already published the same text, when
the last post is more recent than the configured minimum interval, or when
the operator does not confirm it. Every decision is written to an audit CSV.

EXAMPLES:
    # Post today's candidate, asking for confirmation
    toot-post --post today.toml

    # Dry run: run every check, never publish
    toot-post --post today.toml --policy never

    # Unattended posting with JSON output
    toot-post --post today.toml --policy always --format json

EXIT CODES:
    0 - Run completed (published, skipped or failed to publish)
    1 - Configuration or network error
    2 - Authentication error
    3 - Invalid post file
"#)]
struct Cli {
    /// Candidate post file (TOML)
    #[arg(short, long, value_name = "FILE")]
    post: PathBuf,

    /// Configuration file (default: $TOOTGATE_CONFIG or ~/.config/tootgate/config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the confirmation policy (always, never, interactive)
    #[arg(long, value_name = "POLICY")]
    policy: Option<ConfirmationPolicy>,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", value_parser = ["text", "json"])]
    format: String,

    /// Directory for the audit CSV (overrides audit.directory)
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Log output format (text, json, pretty)
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::from_env(cli.log_format, cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = resolve_config_path(cli.config.as_deref())?;
    let config = Config::load_from_path(&config_path)?;
    debug!(path = %config_path.display(), "Loaded configuration");

    let candidate = load_candidate(&cli.post, &config)?;
    debug!(text = %candidate.composed_text(), image = ?candidate.image_path, "Candidate composed");

    let mut settings = SessionSettings::from_config(&config)?;
    if let Some(policy) = cli.policy {
        settings = settings.with_policy(policy);
    }
    let audit_dir = match cli.log_dir {
        Some(dir) => dir,
        None => config.audit_dir()?,
    };

    let token = config.read_access_token()?;
    debug!(
        instance = %config.instance_url(),
        token = %mask_token(token.expose_secret()),
        policy = %settings.policy,
        "Connecting"
    );
    let timeline = MastodonTimeline::new(config.instance_url(), &token)?;

    let mut session = match Session::connect(Box::new(timeline), settings).await {
        Ok(session) => session,
        Err(e) => {
            record_connect_failure(&e, &settings, &audit_dir);
            return Err(e);
        }
    };
    info!("{}", session.describe());

    let result = session.run(&candidate, &mut ConsoleConfirmation).await;
    session.finish(&audit_dir);
    let report = result?;

    match cli.format.as_str() {
        "json" => print_json(&report),
        _ => print_text(&report),
    }
    Ok(())
}

fn load_candidate(path: &Path, config: &Config) -> Result<Candidate> {
    let draft = CandidateDraft::load(path)?;
    let image_path = match draft.image.as_deref().map(str::trim) {
        Some(image) if !image.is_empty() => Some(config.resolve_image_path(image)?),
        _ => None,
    };
    Ok(Candidate::compose(draft, image_path, config.limits()))
}

/// Leave a trace of a run that never got a session
fn record_connect_failure(error: &TootgateError, settings: &SessionSettings, dir: &Path) {
    let mut audit = AuditLog::new(settings.timezone);
    audit.append("connect_failed", error.to_string());
    audit.flush(dir);
}

fn print_text(report: &RunReport) {
    match &report.outcome {
        PostOutcome::Published { receipt, .. } => {
            println!("Published {}", receipt.url.as_deref().unwrap_or(receipt.id.as_str()));
        }
        PostOutcome::Rejected(reason) => println!("Not posted: {}", reason),
        PostOutcome::Failed(error) => println!("Failed: {}", error),
    }
}

fn print_json(report: &RunReport) {
    let mut output = json!({
        "outcome": report.outcome.kind(),
        "final_state": report.final_state,
        "transitions": report.transitions,
        "rate": report.rate,
    });

    match &report.outcome {
        PostOutcome::Published { receipt, media } => {
            output["receipt"] = json!(receipt);
            output["media_id"] = json!(media.as_ref().map(|m| m.0.as_str()));
        }
        PostOutcome::Rejected(reason) => {
            output["reason"] = json!(reason);
            output["message"] = json!(reason.to_string());
        }
        PostOutcome::Failed(error) => {
            output["error"] = json!(error.kind());
            output["message"] = json!(error.to_string());
        }
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&output).unwrap_or_else(|_| output.to_string())
    );
}
