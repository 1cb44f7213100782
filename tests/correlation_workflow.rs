use chrono::{Duration, NaiveDate, TimeZone, Utc};

use jobtrack::classify::classify;
use jobtrack::scoring;
use jobtrack::{correlate, ApplicationStatus, CorrelationReport, Database, DiscoveredPosting, InboundMessage, ResponseType};

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 20).unwrap()
}

fn posting(title: &str, company: &str, portal: &str) -> DiscoveredPosting {
    DiscoveredPosting {
        title: title.to_string(),
        company: company.to_string(),
        location: "Remote".to_string(),
        link: format!("https://jobs.example.com/{}", title.to_lowercase().replace(' ', "-")),
        portal: portal.to_string(),
        date_found: today() - Duration::days(10),
    }
}

fn globex_reply() -> InboundMessage {
    InboundMessage {
        sender: "Globex Talent <hr@globex.com>".to_string(),
        subject: "Your application to Globex - next steps".to_string(),
        body: "Hi,\n\nThanks for your interest in the Data Scientist position. \
               We would like to schedule a call with you this week.\n\nBest,\nGlobex Talent"
            .to_string(),
        received_at: Utc.with_ymd_and_hms(2024, 3, 20, 8, 30, 0).unwrap(),
    }
}

/// Ingests one Globex posting and marks it applied three days ago.
fn applied_globex(db: &mut Database) -> i64 {
    let mut store = db.load().unwrap();
    assert_eq!(store.ingest(&[posting("Data Scientist", "Globex", "LinkedIn")]), 1);
    db.save(&mut store).unwrap();

    let id = store.get(0).unwrap().id.unwrap();
    db.mark_applied(id, today() - Duration::days(3)).unwrap();
    id
}

#[test]
fn test_recruiter_reply_lands_on_its_application() {
    let mut db = Database::open_in_memory().unwrap();
    let id = applied_globex(&mut db);

    let response = classify(&globex_reply());
    assert!(response.is_job_related);
    assert_eq!(response.company_guess, "Globex");
    assert_eq!(response.response_type, ResponseType::InterviewRequest);

    let mut store = db.load().unwrap();
    // Company 5 + sender domain 3 + no title words in the subject + applied 3 days ago 2.
    assert_eq!(scoring::score(&response, store.get(0).unwrap(), today()), 10);
    let report = correlate(&mut store, &[response], today());
    assert_eq!(report.updated, 1);
    let stats = db.save(&mut store).unwrap();
    assert_eq!(stats.updated, 1);
    assert_eq!(stats.inserted, 0);

    let record = db.get(id).unwrap().unwrap();
    assert_eq!(record.status, ApplicationStatus::Applied);
    assert_eq!(record.recruiter_response.as_deref(), Some("Interview Request"));
    assert_eq!(record.response_date, Some(today()));
    assert!(record.notes.starts_with("From: Globex Talent <hr@globex.com>\n"));
    assert!(record.notes.contains("Type: Interview Request"));
}

#[test]
fn test_second_pass_over_same_inbox_changes_nothing() {
    let mut db = Database::open_in_memory().unwrap();
    let id = applied_globex(&mut db);
    let responses = vec![classify(&globex_reply())];

    let mut store = db.load().unwrap();
    correlate(&mut store, &responses, today());
    db.save(&mut store).unwrap();
    let first = db.get(id).unwrap().unwrap();

    let mut store = db.load().unwrap();
    let report = correlate(&mut store, &responses, today() + Duration::days(1));
    assert_eq!(report, CorrelationReport::default());
    assert!(!store.has_unsaved_changes());
    db.save(&mut store).unwrap();

    assert_eq!(db.get(id).unwrap().unwrap(), first);
}

#[test]
fn test_two_replies_for_one_application_keep_the_first() {
    let mut db = Database::open_in_memory().unwrap();
    let id = applied_globex(&mut db);

    let mut rejection = globex_reply();
    rejection.subject = "Update on your Globex application".to_string();
    rejection.body = "Unfortunately we have decided to move on with other candidates.".to_string();

    let responses: Vec<_> = [globex_reply(), rejection].iter().map(classify).collect();
    assert_eq!(responses[1].response_type, ResponseType::Rejection);

    let mut store = db.load().unwrap();
    let report = correlate(&mut store, &responses, today());
    assert_eq!(report.updated, 1);
    assert_eq!(report.already_answered, 1);
    db.save(&mut store).unwrap();

    let record = db.get(id).unwrap().unwrap();
    assert_eq!(record.recruiter_response.as_deref(), Some("Interview Request"));
}

#[test]
fn test_rediscovered_postings_are_not_duplicated_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("applications.db");

    {
        let mut db = Database::open(Some(&path)).unwrap();
        let mut store = db.load().unwrap();
        store.ingest(&[posting("Data Scientist", "Globex", "LinkedIn"), posting("Backend Engineer", "Acme", "Indeed")]);
        db.save(&mut store).unwrap();
    }

    let mut db = Database::open(Some(&path)).unwrap();
    let mut store = db.load().unwrap();
    let added = store.ingest(&[
        posting("data scientist", "GLOBEX", "Indeed"),
        posting("Platform Engineer", "Acme", "Indeed"),
    ]);
    assert_eq!(added, 1);
    db.save(&mut store).unwrap();

    let store = db.load().unwrap();
    assert_eq!(store.len(), 3);
    assert_eq!(store.get(0).unwrap().portal, "LinkedIn");

    let stamp = today().and_hms_opt(6, 0, 0).unwrap();
    let backup = db.backup(&dir.path().join("backups"), stamp).unwrap().unwrap();
    assert!(backup.ends_with("applications_backup_20240320_060000.db"));
}
