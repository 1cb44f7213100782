//! Text heuristics that turn one inbound message into labels.
//!
//! Everything here is pure: no I/O, no shared state, safe to call from any thread.

use regex::Regex;
use std::sync::LazyLock;

use crate::models::{excerpt, ClassifiedResponse, InboundMessage, ResponseType};

pub const UNKNOWN_COMPANY: &str = "Unknown Company";

/// Bodies are stored truncated to this many characters.
pub const EXCERPT_CHARS: usize = 1000;

const JOB_KEYWORDS: &[&str] = &[
    "application",
    "position",
    "role",
    "interview",
    "resume",
    "cv",
    "candidate",
    "hiring",
    "recruitment",
    "job",
    "opportunity",
    "thank you for applying",
    "your interest",
];

const SPAM_MARKERS: &[&str] = &["unsubscribe", "marketing", "promotion", "deal", "sale"];

const AUTOMATED_SENDER_MARKERS: &[&str] = &["noreply", "no-reply", "donotreply", "automated"];

/// Consumer webmail providers never identify the employer.
const WEBMAIL_DOMAINS: &[&str] = &["gmail", "yahoo", "outlook", "hotmail", "aol", "icloud"];

const AUTO_REPLY_KEYWORDS: &[&str] = &[
    "out of office",
    "automatic reply",
    "currently away",
    "will respond",
    "received your email",
];

const REJECTION_KEYWORDS: &[&str] = &[
    "unfortunately",
    "regret",
    "not moving forward",
    "not selected",
    "decided to go",
    "other candidates",
    "not the right fit",
    "will not be",
    "have chosen",
    "do not meet",
    "unsuccessful",
];

const INTERVIEW_KEYWORDS: &[&str] = &[
    "interview",
    "schedule",
    "next step",
    "phone call",
    "meet",
    "discussion",
    "chat",
    "available",
    "calendar",
    "zoom",
    "teams meeting",
    "would like to speak",
    "set up a time",
];

const INTEREST_KEYWORDS: &[&str] = &[
    "interested",
    "review your",
    "impressive",
    "experience",
    "background",
    "skills",
    "qualified",
    "would like to learn more",
    "tell us more",
    "additional information",
];

/// Checked in order; the first bucket with a hit decides. Auto-replies come first
/// because their templates routinely mention interviews.
const CATEGORY_RULES: &[(ResponseType, &[&str])] = &[
    (ResponseType::AutoReply, AUTO_REPLY_KEYWORDS),
    (ResponseType::Rejection, REJECTION_KEYWORDS),
    (ResponseType::InterviewRequest, INTERVIEW_KEYWORDS),
    (ResponseType::Interested, INTEREST_KEYWORDS),
];

// Signature patterns, highest priority first. The company is the last capture group.
const SIGNATURE_PATTERNS: &[&str] = &[
    r"(?im)Best regards,\s*\n.*?\n(.*?)(?:\n|$)",
    r"(?im)Sincerely,\s*\n.*?\n(.*?)(?:\n|$)",
    r"(?im)Thanks,\s*\n.*?\n(.*?)(?:\n|$)",
    r"(?im)(\w+\s+\w+)\s*\|\s*(.+?)(?:\n|$)",
    r"(?im)From:\s*(.+?)(?:\n|$)",
];

static SIGNATURES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    SIGNATURE_PATTERNS
        .iter()
        .filter_map(|pattern| match Regex::new(pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(pattern, error = %e, "skipping signature pattern");
                None
            }
        })
        .collect()
});

/// Classifies a whole message. Never fails; ambiguous input lands on the defaults
/// (`Other`, [`UNKNOWN_COMPANY`]).
pub fn classify(message: &InboundMessage) -> ClassifiedResponse {
    let is_job_related = is_job_related(&message.subject, &message.body, &message.sender);
    let (company_guess, response_type) = if is_job_related {
        (
            guess_company(&message.body, &message.sender),
            categorize(&message.subject, &message.body),
        )
    } else {
        (UNKNOWN_COMPANY.to_string(), ResponseType::Other)
    };

    ClassifiedResponse {
        sender: message.sender.clone(),
        subject: message.subject.clone(),
        received_at: message.received_at,
        is_job_related,
        company_guess,
        response_type,
        content_excerpt: excerpt(&message.body, EXCERPT_CHARS),
    }
}

pub fn is_job_related(subject: &str, body: &str, sender: &str) -> bool {
    let haystack = format!("{} {} {}", subject, body, sender).to_lowercase();
    let hits = JOB_KEYWORDS
        .iter()
        .filter(|keyword| haystack.contains(*keyword))
        .count();

    // Marketing mail trips generic words like "opportunity", so it needs more evidence.
    if contains_any(&haystack, SPAM_MARKERS) {
        return hits >= 3;
    }
    if contains_any(&sender.to_lowercase(), AUTOMATED_SENDER_MARKERS) {
        return hits >= 2;
    }
    hits >= 1
}

pub fn guess_company(body: &str, sender: &str) -> String {
    if let Some(company) = company_from_domain(sender) {
        return company;
    }

    for re in SIGNATURES.iter() {
        for caps in re.captures_iter(body) {
            let Some(capture) = caps.iter().skip(1).flatten().last() else {
                continue;
            };
            let company = capture.as_str().trim();
            if company.split_whitespace().count() <= 3 && company.chars().count() > 2 {
                return company.to_string();
            }
        }
    }

    UNKNOWN_COMPANY.to_string()
}

pub fn categorize(subject: &str, body: &str) -> ResponseType {
    let text = format!("{} {}", subject, body).to_lowercase();
    CATEGORY_RULES
        .iter()
        .find(|(_, keywords)| contains_any(&text, keywords))
        .map(|(kind, _)| *kind)
        .unwrap_or(ResponseType::Other)
}

/// Lowercased domain of the sender address: the text after `@`, with any
/// surrounding angle brackets removed.
pub fn sender_domain(sender: &str) -> Option<String> {
    let address = match (sender.rfind('<'), sender.rfind('>')) {
        (Some(start), Some(end)) if start < end => &sender[start + 1..end],
        _ => sender,
    };
    let domain = address.split('@').nth(1)?;
    let domain = domain.trim().trim_end_matches('>').to_lowercase();
    if domain.is_empty() {
        None
    } else {
        Some(domain)
    }
}

fn company_from_domain(sender: &str) -> Option<String> {
    let domain = sender_domain(sender)?;
    let label = domain.split('.').next()?.trim();
    if WEBMAIL_DOMAINS.contains(&label) {
        return None;
    }
    let words = label.replace('-', " ");
    let words = words.trim();
    if words.is_empty() {
        return None;
    }
    Some(title_case(words))
}

/// Uppercases the first letter of every alphabetic run and lowercases the rest.
fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_word = false;
    for c in text.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}
