use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Date format used for every date column in the store.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredPosting {
    pub title: String,
    pub company: String,
    pub location: String,
    pub link: String,
    pub portal: String, // "Indeed", "LinkedIn", ...
    pub date_found: NaiveDate,
}

impl DiscoveredPosting {
    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::new(&self.title, &self.company)
    }
}

/// Lowercased (title, company) pair. Two postings with equal keys are the same record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    title: String,
    company: String,
}

impl IdentityKey {
    pub fn new(title: &str, company: &str) -> Self {
        Self {
            title: title.to_lowercase(),
            company: company.to_lowercase(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplicationStatus {
    Found,
    Applied,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Found => "Found",
            ApplicationStatus::Applied => "Applied",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "found" => Some(ApplicationStatus::Found),
            "applied" => Some(ApplicationStatus::Applied),
            _ => None,
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category of a recruiter reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseType {
    AutoReply,
    Rejection,
    InterviewRequest,
    Interested,
    Other,
}

impl ResponseType {
    /// Label written to the `recruiter_response` column.
    pub fn label(&self) -> &'static str {
        match self {
            ResponseType::AutoReply => "Auto-Reply",
            ResponseType::Rejection => "Rejection",
            ResponseType::InterviewRequest => "Interview Request",
            ResponseType::Interested => "Interested",
            ResponseType::Other => "Other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized: String = value
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "autoreply" => Some(ResponseType::AutoReply),
            "rejection" => Some(ResponseType::Rejection),
            "interviewrequest" => Some(ResponseType::InterviewRequest),
            "interested" => Some(ResponseType::Interested),
            "other" => Some(ResponseType::Other),
            _ => None,
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A row of the application table.
///
/// `id` is the storage row id; it is `None` until the record has been persisted.
/// `recruiter_response` holds the raw column text so that values written by other
/// tools survive a load/save cycle; use [`ApplicationRecord::response_type`] for the
/// typed view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: Option<i64>,
    pub date_found: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub link: String,
    pub portal: String,
    pub status: ApplicationStatus,
    pub date_applied: Option<NaiveDate>,
    pub recruiter_response: Option<String>,
    pub response_date: Option<NaiveDate>,
    pub notes: String,
}

impl ApplicationRecord {
    pub fn from_posting(posting: &DiscoveredPosting) -> Self {
        Self {
            id: None,
            date_found: posting.date_found.format(DATE_FORMAT).to_string(),
            title: posting.title.clone(),
            company: posting.company.clone(),
            location: posting.location.clone(),
            link: posting.link.clone(),
            portal: posting.portal.clone(),
            status: ApplicationStatus::Found,
            date_applied: None,
            recruiter_response: None,
            response_date: None,
            notes: String::new(),
        }
    }

    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::new(&self.title, &self.company)
    }

    /// A record with a recorded recruiter response never takes another one.
    pub fn is_response_closed(&self) -> bool {
        self.recruiter_response
            .as_deref()
            .is_some_and(|r| !r.trim().is_empty())
    }

    /// Eligible for correlation: applied and still waiting for an answer.
    pub fn is_open(&self) -> bool {
        self.status == ApplicationStatus::Applied && !self.is_response_closed()
    }

    pub fn response_type(&self) -> Option<ResponseType> {
        self.recruiter_response.as_deref().and_then(ResponseType::parse)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedResponse {
    pub sender: String,
    pub subject: String,
    pub received_at: DateTime<Utc>,
    pub is_job_related: bool,
    pub company_guess: String,
    pub response_type: ResponseType,
    pub content_excerpt: String,
}

/// Score of one (response, open record) pair; `index` points into the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchCandidate {
    pub index: usize,
    pub score: u32,
}

/// Takes at most `max` characters without splitting a code point.
pub fn excerpt(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
