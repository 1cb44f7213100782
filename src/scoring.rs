//! Heuristic compatibility score between a classified response and an open
//! application record. Each signal is a separate function so it can be tested alone.

use chrono::NaiveDate;

use crate::classify::sender_domain;
use crate::models::{ApplicationRecord, ClassifiedResponse};

pub const COMPANY_POINTS: u32 = 5;
pub const DOMAIN_POINTS: u32 = 3;
pub const TITLE_WORD_POINTS: u32 = 1;
pub const RECENT_POINTS: u32 = 2;
pub const SOMEWHAT_RECENT_POINTS: u32 = 1;

/// Title words of this length or shorter ("and", "of", "sr") carry no signal.
const MIN_TITLE_WORD_CHARS: usize = 3;

pub fn score(response: &ClassifiedResponse, record: &ApplicationRecord, today: NaiveDate) -> u32 {
    company_points(&record.company, &response.company_guess)
        + domain_points(&record.company, &response.sender)
        + title_points(&record.title, &response.subject)
        + recency_points(record.date_applied, today)
}

/// Record company and guessed company contain one another.
pub fn company_points(record_company: &str, company_guess: &str) -> u32 {
    let company = record_company.trim().to_lowercase();
    let guess = company_guess.trim().to_lowercase();
    if company.is_empty() || guess.is_empty() {
        return 0;
    }
    if guess.contains(&company) || company.contains(&guess) {
        COMPANY_POINTS
    } else {
        0
    }
}

/// The sender's domain spells out the record company.
pub fn domain_points(record_company: &str, sender: &str) -> u32 {
    let Some(domain) = sender_domain(sender) else {
        return 0;
    };
    let company: String = record_company
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    if company.is_empty() {
        return 0;
    }
    let domain: String = domain.chars().filter(|c| *c != '-' && *c != '.').collect();
    if domain.contains(&company) {
        DOMAIN_POINTS
    } else {
        0
    }
}

pub fn title_points(record_title: &str, subject: &str) -> u32 {
    let subject = subject.to_lowercase();
    let title = record_title.to_lowercase();
    let hits = title
        .split_whitespace()
        .filter(|word| word.chars().count() > MIN_TITLE_WORD_CHARS && subject.contains(word))
        .count();
    hits as u32 * TITLE_WORD_POINTS
}

/// Recent applications are the likeliest to get an answer. Only one tier applies.
pub fn recency_points(date_applied: Option<NaiveDate>, today: NaiveDate) -> u32 {
    let Some(applied) = date_applied else {
        return 0;
    };
    let days = (today - applied).num_days();
    if days <= 7 {
        RECENT_POINTS
    } else if days <= 14 {
        SOMEWHAT_RECENT_POINTS
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ApplicationStatus, ResponseType};
    use chrono::{Duration, TimeZone, Utc};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 20).unwrap()
    }

    fn response(sender: &str, subject: &str, company_guess: &str) -> ClassifiedResponse {
        ClassifiedResponse {
            sender: sender.to_string(),
            subject: subject.to_string(),
            received_at: Utc.with_ymd_and_hms(2024, 3, 20, 8, 0, 0).unwrap(),
            is_job_related: true,
            company_guess: company_guess.to_string(),
            response_type: ResponseType::InterviewRequest,
            content_excerpt: String::new(),
        }
    }

    fn record(title: &str, company: &str, applied_days_ago: Option<i64>) -> ApplicationRecord {
        ApplicationRecord {
            id: Some(1),
            date_found: "2024-03-01".to_string(),
            title: title.to_string(),
            company: company.to_string(),
            location: "Remote".to_string(),
            link: String::new(),
            portal: "LinkedIn".to_string(),
            status: ApplicationStatus::Applied,
            date_applied: applied_days_ago.map(|days| today() - Duration::days(days)),
            recruiter_response: None,
            response_date: None,
            notes: String::new(),
        }
    }

    #[test]
    fn test_acme_example_scores_twelve() {
        let resp = response("Recruiting <jobs@acme.io>", "Acme Backend Engineer", "Acme");
        let rec = record("Backend Engineer", "Acme", Some(5));
        assert_eq!(score(&resp, &rec, today()), 12);
    }

    #[test]
    fn test_company_containment_both_directions() {
        assert_eq!(company_points("Acme", "Acme Corp"), COMPANY_POINTS);
        assert_eq!(company_points("Acme Corporation", "acme"), COMPANY_POINTS);
        assert_eq!(company_points("Globex", "Initech"), 0);
        assert_eq!(company_points("", "Initech"), 0);
    }

    #[test]
    fn test_domain_containment_strips_separators() {
        assert_eq!(domain_points("Acme Labs", "hr@acme-labs.com"), DOMAIN_POINTS);
        assert_eq!(domain_points("Globex", "Jane <jane@mail.globex.com>"), DOMAIN_POINTS);
        assert_eq!(domain_points("Globex", "jane@gmail.com"), 0);
        assert_eq!(domain_points("Globex", "not an address"), 0);
    }

    #[test]
    fn test_title_words_longer_than_three_chars() {
        assert_eq!(title_points("Backend Engineer", "Backend engineer role"), 2);
        // "Sr" and "Dev" are too short to count
        assert_eq!(title_points("Sr Dev Ops", "sr dev ops"), 0);
        assert_eq!(title_points("Data Scientist", "Your application"), 0);
    }

    #[test]
    fn test_recency_tiers() {
        assert_eq!(recency_points(Some(today()), today()), RECENT_POINTS);
        assert_eq!(recency_points(Some(today() - Duration::days(7)), today()), RECENT_POINTS);
        assert_eq!(recency_points(Some(today() - Duration::days(8)), today()), SOMEWHAT_RECENT_POINTS);
        assert_eq!(recency_points(Some(today() - Duration::days(14)), today()), SOMEWHAT_RECENT_POINTS);
        assert_eq!(recency_points(Some(today() - Duration::days(15)), today()), 0);
        assert_eq!(recency_points(None, today()), 0);
    }

    #[test]
    fn test_unrelated_pair_scores_zero() {
        let resp = response("news@gmail.com", "Weekly newsletter", "Unknown Company");
        let rec = record("Platform Engineer", "Hooli", None);
        assert_eq!(score(&resp, &rec, today()), 0);
    }
}
