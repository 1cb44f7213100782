use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Local, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use jobtrack::classify::classify;
use jobtrack::config::{expand_home, Config};
use jobtrack::db::write_csv;
use jobtrack::discovery::{discover, DiscoveryOptions, FeedFileSource, PostingSource};
use jobtrack::email::{EmailConfig, FetchStats, MailFetcher};
use jobtrack::summary::RunSummary;
use jobtrack::{correlate, telemetry, ApplicationStatus, CorrelationReport, Database, DiscoveredPosting, InboundMessage};

#[derive(Parser)]
#[command(name = "jobtrack")]
#[command(about = "Track job applications and match recruiter replies to them")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Application database (overrides the config file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the config file and database
    Init,

    /// Add newly discovered postings from scraper feeds
    Ingest {
        /// Feed as PORTAL=PATH; repeatable. Defaults to the feeds in the config file
        #[arg(short, long = "feed", value_parser = parse_feed)]
        feeds: Vec<FeedArg>,

        /// Show what would be added without saving
        #[arg(long)]
        dry_run: bool,
    },

    /// Check the inbox for recruiter responses and attach them to applications
    Responses {
        /// Number of days to look back
        #[arg(short, long)]
        days: Option<u32>,

        /// Maximum number of recent messages to check
        #[arg(short, long)]
        limit: Option<usize>,

        /// Match without saving
        #[arg(long)]
        dry_run: bool,
    },

    /// Ingest feeds, check responses, and print the daily summary
    Run,

    /// Mark an application as sent
    Apply {
        /// Application ID
        id: i64,
    },

    /// List applications
    List {
        /// Filter by status (found, applied)
        #[arg(short, long)]
        status: Option<String>,

        /// Only applications still waiting for a response
        #[arg(long)]
        open: bool,
    },

    /// Show application details
    Show {
        /// Application ID
        id: i64,
    },

    /// Write all applications to a CSV file
    Export {
        /// Output path
        output: PathBuf,
    },
}

#[derive(Debug, Clone)]
struct FeedArg {
    portal: String,
    path: PathBuf,
}

fn parse_feed(value: &str) -> Result<FeedArg, String> {
    let (portal, path) = value
        .split_once('=')
        .ok_or_else(|| format!("expected PORTAL=PATH, got '{}'", value))?;
    if portal.trim().is_empty() || path.trim().is_empty() {
        return Err(format!("expected PORTAL=PATH, got '{}'", value));
    }
    Ok(FeedArg {
        portal: portal.trim().to_string(),
        path: expand_home(path.trim()),
    })
}

#[derive(Debug, Default)]
struct IngestOutcome {
    postings: Vec<DiscoveredPosting>,
    added: usize,
}

#[derive(Debug, Default)]
struct ResponseOutcome {
    fetch: FetchStats,
    checked: usize,
    report: CorrelationReport,
}

fn backup_store(db: &Database, config: &Config, now: DateTime<Local>) {
    let Some(dir) = config.store.backup_path() else { return };
    if let Err(e) = db.backup(&dir, now.naive_local()) {
        tracing::warn!(error = %e, "backup failed, continuing");
    }
}

async fn ingest_feeds(
    db: &mut Database,
    config: &Config,
    feeds: Vec<FeedArg>,
    now: DateTime<Local>,
    dry_run: bool,
) -> Result<IngestOutcome> {
    if feeds.is_empty() {
        tracing::warn!("no posting feeds configured");
        return Ok(IngestOutcome::default());
    }

    let today = now.date_naive();
    let sources: Vec<Arc<dyn PostingSource>> = feeds
        .into_iter()
        .map(|feed| Arc::new(FeedFileSource::new(&feed.portal, feed.path, today)) as Arc<dyn PostingSource>)
        .collect();
    let options = DiscoveryOptions {
        workers: config.discovery.workers,
        max_postings_per_source: config.discovery.max_postings_per_source,
    };

    let report = discover(&sources, &config.search, &options).await;

    let mut store = db.load()?;
    let before = store.len();
    let mut added = store.ingest(&report.postings);

    if dry_run {
        for record in &store.records()[before..] {
            println!("[DRY RUN] Would add: {} at {} ({})", record.title, record.company, record.portal);
        }
    } else if added > 0 {
        backup_store(db, config, now);
        let stats = db.save(&mut store).context("Failed to save new postings")?;
        added = stats.inserted;
    }

    Ok(IngestOutcome {
        postings: report.postings,
        added,
    })
}

async fn check_responses(
    db: &mut Database,
    config: &Config,
    days: u32,
    limit: usize,
    now: DateTime<Local>,
    dry_run: bool,
) -> Result<ResponseOutcome> {
    if !config.mail.is_configured() {
        tracing::warn!("email not configured, skipping response check");
        return Ok(ResponseOutcome::default());
    }

    let now_utc = now.with_timezone(&Utc);
    let (messages, fetch) = fetch_messages(config, now_utc - Duration::days(days as i64), limit).await;
    let responses: Vec<_> = messages.iter().map(classify).collect();
    let related = responses.iter().filter(|r| r.is_job_related).count();
    tracing::info!(checked = messages.len(), related, "classified inbox");

    let mut store = db.load()?;
    let mut report = correlate(&mut store, &responses, now.date_naive());

    if !dry_run && report.updated > 0 {
        backup_store(db, config, now);
        let stats = db.save(&mut store).context("Failed to save recruiter responses")?;
        // Rows answered by an overlapping run since `load` keep their response.
        report.updated = stats.updated;
        report.already_answered += stats.already_answered;
    }

    Ok(ResponseOutcome {
        fetch,
        checked: messages.len(),
        report,
    })
}

/// Mail problems never abort a run; they just mean no messages this time.
async fn fetch_messages(config: &Config, since: DateTime<Utc>, limit: usize) -> (Vec<InboundMessage>, FetchStats) {
    let mail = &config.mail;
    let email_config = match EmailConfig::from_password_file(
        &mail.imap_server,
        mail.imap_port,
        &mail.username,
        &expand_home(&mail.password_file),
    ) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "cannot read mail credentials");
            return (Vec::new(), FetchStats::default());
        }
    };

    let fetcher = MailFetcher::new(email_config);
    match tokio::task::spawn_blocking(move || fetcher.fetch_recent(since, limit)).await {
        Ok(Ok((messages, stats))) => {
            if stats.errors > 0 {
                tracing::warn!(errors = stats.errors, "some messages could not be read");
            }
            (messages, stats)
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "error checking emails");
            (Vec::new(), FetchStats::default())
        }
        Err(e) => {
            tracing::error!(error = %e, "mail worker failed");
            (Vec::new(), FetchStats::default())
        }
    }
}

fn response_results(outcome: &ResponseOutcome) -> String {
    let mut out = String::from("\nResults:\n");
    let rows = [
        ("Emails found", outcome.fetch.emails_found),
        ("Emails fetched", outcome.fetch.emails_fetched),
        ("Read errors", outcome.fetch.errors),
        ("Emails checked", outcome.checked),
        ("Responses merged", outcome.report.updated),
        ("Already answered", outcome.report.already_answered),
        ("No clear match", outcome.report.below_threshold),
    ];
    for (label, count) in rows {
        out.push_str(&format!("  {:<17} {}\n", format!("{}:", label), count));
    }
    out
}

fn configured_feeds(config: &Config) -> Vec<FeedArg> {
    config
        .discovery
        .feeds
        .iter()
        .map(|feed| FeedArg {
            portal: feed.portal.clone(),
            path: expand_home(&feed.path),
        })
        .collect()
}

fn store_location(db: &Database) -> String {
    db.path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| ":memory:".to_string())
}

fn format_date(date: Option<NaiveDate>) -> String {
    date.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load_or_create(&config_path)?;
    telemetry::init(&config.log_level)?;

    let db_path = cli.db.clone().or_else(|| config.store.database_path());
    let mut db = Database::open(db_path.as_deref()).context("Failed to open application database")?;
    let now = Local::now();

    match cli.command {
        Commands::Init => {
            println!("Config at {}", config_path.display());
            println!("Database initialized at {}", store_location(&db));
        }

        Commands::Ingest { feeds, dry_run } => {
            let feeds = if feeds.is_empty() { configured_feeds(&config) } else { feeds };
            let outcome = ingest_feeds(&mut db, &config, feeds, now, dry_run).await?;

            println!("\nResults:");
            println!("  Postings found: {}", outcome.postings.len());
            println!("  Jobs added:     {}", outcome.added);
            if dry_run {
                println!("\n(Dry run - nothing was saved)");
            }
        }

        Commands::Responses { days, limit, dry_run } => {
            let days = days.unwrap_or(config.mail.lookback_days);
            let limit = limit.unwrap_or(config.mail.max_messages);
            println!("Checking responses from the last {} days...", days);
            let outcome = check_responses(&mut db, &config, days, limit, now, dry_run).await?;

            print!("{}", response_results(&outcome));
            if dry_run {
                println!("\n(Dry run - nothing was saved)");
            }
        }

        Commands::Run => {
            let started = Instant::now();
            tracing::info!("starting daily job check");
            let mut summary = RunSummary::new(now.naive_local(), &store_location(&db));

            let outcome = ingest_feeds(&mut db, &config, configured_feeds(&config), now, false).await?;
            summary.record_postings(&outcome.postings);
            summary.jobs_added = outcome.added;

            let responses = check_responses(
                &mut db,
                &config,
                config.mail.lookback_days,
                config.mail.max_messages,
                now,
                false,
            )
            .await?;
            summary.responses_checked = responses.checked;
            summary.responses_matched = responses.report.updated;

            summary.duration = started.elapsed();
            tracing::info!(
                jobs = summary.jobs_found,
                matched = summary.responses_matched,
                seconds = summary.duration.as_secs_f64(),
                "daily job check completed"
            );
            println!("{}", summary.render());
        }

        Commands::Apply { id } => {
            db.mark_applied(id, now.date_naive())?;
            println!("Marked application #{} as applied on {}.", id, now.date_naive());
        }

        Commands::List { status, open } => {
            let status = match status.as_deref() {
                Some(s) => Some(ApplicationStatus::parse(s).ok_or_else(|| anyhow!("Unknown status '{}'", s))?),
                None => None,
            };
            let store = db.load()?;
            let records: Vec<_> = store
                .records()
                .iter()
                .filter(|r| status.is_none_or(|s| r.status == s))
                .filter(|r| !open || r.is_open())
                .collect();

            if records.is_empty() {
                println!("No applications found.");
            } else {
                println!(
                    "{:<6} {:<8} {:<30} {:<20} {:<10} {:<18}",
                    "ID", "STATUS", "TITLE", "COMPANY", "PORTAL", "RESPONSE"
                );
                println!("{}", "-".repeat(97));
                for record in records {
                    println!(
                        "{:<6} {:<8} {:<30} {:<20} {:<10} {:<18}",
                        record.id.unwrap_or_default(),
                        record.status,
                        truncate(&record.title, 28),
                        truncate(&record.company, 18),
                        truncate(&record.portal, 10),
                        record.recruiter_response.as_deref().unwrap_or("-")
                    );
                }
            }
        }

        Commands::Show { id } => match db.get(id)? {
            Some(record) => {
                println!("Application #{}", id);
                println!("Title: {}", record.title);
                println!("Company: {}", record.company);
                println!("Location: {}", record.location);
                println!("Status: {}", record.status);
                if !record.link.is_empty() {
                    println!("URL: {}", record.link);
                }
                println!("Portal: {}", record.portal);
                println!("Found: {}", record.date_found);
                println!("Applied: {}", format_date(record.date_applied));
                if let Some(response) = &record.recruiter_response {
                    println!("Response: {} ({})", response, format_date(record.response_date));
                }
                if !record.notes.is_empty() {
                    println!("\n--- Notes ---\n{}", record.notes);
                }
            }
            None => {
                println!("Application #{} not found.", id);
            }
        },

        Commands::Export { output } => {
            let store = db.load()?;
            let file = std::fs::File::create(&output)
                .with_context(|| format!("Failed to create {}", output.display()))?;
            write_csv(&store, file)?;
            println!("Exported {} applications to {}", store.len(), output.display());
        }
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
