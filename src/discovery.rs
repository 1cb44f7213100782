//! Collects postings from scraper collaborators with a bounded pool of workers.
//!
//! One task runs per (keyword, source) pair. Nothing is merged until every task has
//! finished, so the deduplicator always sees one complete batch.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::SearchConfig;
use crate::models::DiscoveredPosting;

/// Anything that can list postings for a search keyword. Implementations may block.
pub trait PostingSource: Send + Sync {
    fn portal(&self) -> &str;
    fn fetch(&self, keyword: &str, location: &str) -> Result<Vec<DiscoveredPosting>>;
}

#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub workers: usize,
    pub max_postings_per_source: usize,
}

#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub postings: Vec<DiscoveredPosting>,
    pub fetched: usize,
    pub failed_tasks: usize,
}

pub async fn discover(
    sources: &[Arc<dyn PostingSource>],
    search: &SearchConfig,
    options: &DiscoveryOptions,
) -> DiscoveryReport {
    let permits = Arc::new(Semaphore::new(options.workers.max(1)));
    let mut tasks = JoinSet::new();
    let mut order = 0usize;

    for keyword in &search.keywords {
        for source in sources {
            let source = Arc::clone(source);
            let permits = Arc::clone(&permits);
            let keyword = keyword.clone();
            let location = search.location.clone();
            let slot = order;
            order += 1;

            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let portal = source.portal().to_string();
                let result = tokio::task::spawn_blocking(move || source.fetch(&keyword, &location)).await;
                (slot, portal, result)
            });
        }
    }

    let mut report = DiscoveryReport::default();
    let mut batches: Vec<(usize, Vec<DiscoveredPosting>)> = Vec::new();

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((slot, _, Ok(Ok(mut postings)))) => {
                postings.truncate(options.max_postings_per_source);
                batches.push((slot, postings));
            }
            Ok((_, portal, Ok(Err(e)))) => {
                report.failed_tasks += 1;
                tracing::warn!(portal = %portal, error = %e, "posting source failed");
            }
            Ok((_, portal, Err(e))) => {
                report.failed_tasks += 1;
                tracing::warn!(portal = %portal, error = %e, "posting worker panicked");
            }
            Err(e) => {
                report.failed_tasks += 1;
                tracing::warn!(error = %e, "discovery task failed");
            }
        }
    }

    // Merge in submission order so the outcome does not depend on scheduling.
    batches.sort_by_key(|(slot, _)| *slot);
    let merged: Vec<DiscoveredPosting> = batches.into_iter().flat_map(|(_, p)| p).collect();
    report.fetched = merged.len();

    let filtered = filter_postings(merged, &search.keywords, &search.exclude_keywords);
    report.postings = unique_postings(filtered);
    tracing::info!(
        fetched = report.fetched,
        unique = report.postings.len(),
        failed = report.failed_tasks,
        "discovery finished"
    );
    report
}

/// Keeps postings whose title names a search keyword and no excluded one.
pub fn filter_postings(
    postings: Vec<DiscoveredPosting>,
    keywords: &[String],
    exclude_keywords: &[String],
) -> Vec<DiscoveredPosting> {
    let keywords: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
    let excluded: Vec<String> = exclude_keywords.iter().map(|k| k.to_lowercase()).collect();

    postings
        .into_iter()
        .filter(|posting| {
            let title = posting.title.to_lowercase();
            !excluded.iter().any(|k| title.contains(k.as_str()))
                && keywords.iter().any(|k| title.contains(k.as_str()))
        })
        .collect()
}

/// Drops repeats of an identity key within one batch, keeping the first.
pub fn unique_postings(postings: Vec<DiscoveredPosting>) -> Vec<DiscoveredPosting> {
    let mut seen = HashSet::new();
    postings
        .into_iter()
        .filter(|posting| seen.insert(posting.identity_key()))
        .collect()
}

#[derive(Debug, Deserialize)]
struct FeedEntry {
    title: String,
    company: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    link: String,
    #[serde(default)]
    date_found: Option<NaiveDate>,
}

/// Reads a JSON array of postings written by a portal scraper.
pub struct FeedFileSource {
    portal: String,
    path: PathBuf,
    found_on: NaiveDate,
}

impl FeedFileSource {
    /// `found_on` stamps entries that carry no `date_found` of their own.
    pub fn new(portal: &str, path: PathBuf, found_on: NaiveDate) -> Self {
        Self {
            portal: portal.to_string(),
            path,
            found_on,
        }
    }
}

impl PostingSource for FeedFileSource {
    fn portal(&self) -> &str {
        &self.portal
    }

    fn fetch(&self, keyword: &str, location: &str) -> Result<Vec<DiscoveredPosting>> {
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read feed: {}", self.path.display()))?;
        let entries: Vec<serde_json::Value> = serde_json::from_str(&text)
            .with_context(|| format!("Feed is not a JSON array: {}", self.path.display()))?;

        let keyword = keyword.to_lowercase();
        let mut postings = Vec::new();
        for (i, value) in entries.into_iter().enumerate() {
            let entry: FeedEntry = match serde_json::from_value(value) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(portal = %self.portal, entry = i, error = %e, "skipping malformed posting");
                    continue;
                }
            };
            if !entry.title.to_lowercase().contains(&keyword) {
                continue;
            }
            postings.push(DiscoveredPosting {
                title: entry.title.trim().to_string(),
                company: entry.company.trim().to_string(),
                location: entry.location.unwrap_or_else(|| location.to_string()),
                link: entry.link,
                portal: self.portal.clone(),
                date_found: entry.date_found.unwrap_or(self.found_on),
            });
        }
        Ok(postings)
    }
}
