//! Attaches classified responses to the open application they most likely answer.

use chrono::NaiveDate;

use crate::models::{ClassifiedResponse, MatchCandidate};
use crate::scoring;
use crate::store::RecordStore;

/// Weakest score that is still merged automatically.
pub const ACCEPT_THRESHOLD: u32 = 3;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CorrelationReport {
    /// Records that received a response in this batch.
    pub updated: usize,
    pub not_job_related: usize,
    pub below_threshold: usize,
    /// Best match had already been answered (earlier in the batch or before).
    pub already_answered: usize,
}

/// Highest-scoring candidate among `candidates`, scanned in order. Ties keep the
/// earlier record.
pub fn best_match(
    store: &RecordStore,
    candidates: &[usize],
    response: &ClassifiedResponse,
    today: NaiveDate,
) -> Option<MatchCandidate> {
    let mut best: Option<MatchCandidate> = None;
    for &index in candidates {
        let Some(record) = store.get(index) else {
            continue;
        };
        let score = scoring::score(response, record, today);
        tracing::debug!(title = %record.title, company = %record.company, score, "scored candidate");
        if best.is_none_or(|current| score > current.score) {
            best = Some(MatchCandidate { index, score });
        }
    }
    best
}

/// Runs one correlation batch. The set of open records is taken once up front, so
/// when two responses land on the same record the first one processed wins and the
/// second is dropped.
pub fn correlate(store: &mut RecordStore, responses: &[ClassifiedResponse], today: NaiveDate) -> CorrelationReport {
    let candidates = store.open_records();
    let mut report = CorrelationReport::default();

    if candidates.is_empty() {
        tracing::info!("no applied jobs awaiting a response");
        return report;
    }

    for response in responses {
        if !response.is_job_related {
            report.not_job_related += 1;
            continue;
        }

        let best = best_match(store, &candidates, response, today);
        let Some(candidate) = best.filter(|c| c.score >= ACCEPT_THRESHOLD) else {
            tracing::debug!(
                subject = %response.subject,
                score = best.map(|c| c.score).unwrap_or(0),
                "no confident match"
            );
            report.below_threshold += 1;
            continue;
        };

        if store.apply_match(candidate.index, response, today) {
            report.updated += 1;
            if let Some(record) = store.get(candidate.index) {
                tracing::info!(
                    title = %record.title,
                    company = %record.company,
                    response = %response.response_type,
                    score = candidate.score,
                    "matched response"
                );
            }
        } else {
            tracing::info!(subject = %response.subject, "best match already has a response, dropping");
            report.already_answered += 1;
        }
    }

    report
}
