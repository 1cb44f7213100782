use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::time::Duration;

use crate::models::DiscoveredPosting;

/// Plain-text report of one `run`, handed to whatever delivers notifications.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub started_at: NaiveDateTime,
    pub duration: Duration,
    pub jobs_by_portal: BTreeMap<String, usize>,
    pub jobs_found: usize,
    pub jobs_added: usize,
    pub store_location: String,
    pub responses_checked: usize,
    pub responses_matched: usize,
}

impl RunSummary {
    pub fn new(started_at: NaiveDateTime, store_location: &str) -> Self {
        Self {
            started_at,
            duration: Duration::ZERO,
            jobs_by_portal: BTreeMap::new(),
            jobs_found: 0,
            jobs_added: 0,
            store_location: store_location.to_string(),
            responses_checked: 0,
            responses_matched: 0,
        }
    }

    pub fn record_postings(&mut self, postings: &[DiscoveredPosting]) {
        self.jobs_found += postings.len();
        for posting in postings {
            *self.jobs_by_portal.entry(posting.portal.clone()).or_default() += 1;
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Job Tracker Daily Summary");
        let _ = writeln!(out);
        let _ = writeln!(out, "Date: {}", self.started_at.format("%Y-%m-%d %H:%M:%S"));
        let _ = writeln!(out, "Duration: {:.2} seconds", self.duration.as_secs_f64());
        let _ = writeln!(out, "New Jobs Found: {}", self.jobs_found);
        let _ = writeln!(out, "Jobs Added: {}", self.jobs_added);
        let _ = writeln!(out, "Store: {}", self.store_location);
        let _ = writeln!(out);
        let _ = writeln!(out, "Jobs by Portal:");
        if self.jobs_by_portal.is_empty() {
            let _ = writeln!(out, "No new jobs found today.");
        }
        for (portal, count) in &self.jobs_by_portal {
            let _ = writeln!(out, "- {}: {} jobs", portal, count);
        }
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Recruiter Responses: {} checked, {} matched",
            self.responses_checked, self.responses_matched
        );
        out
    }
}
