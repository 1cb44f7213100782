use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, TransactionBehavior};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::models::{ApplicationRecord, ApplicationStatus, IdentityKey, DATE_FORMAT};
use crate::store::RecordStore;

/// Column set of the application table, in display order.
pub const COLUMNS: [&str; 11] = [
    "date_found",
    "title",
    "company",
    "location",
    "link",
    "portal",
    "status",
    "date_applied",
    "recruiter_response",
    "response_date",
    "notes",
];

const SELECT_RECORDS: &str = "SELECT rowid, date_found, title, company, location, link, portal, status,
        date_applied, recruiter_response, response_date, notes
 FROM applications";

pub struct Database {
    conn: Connection,
    path: Option<PathBuf>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SaveStats {
    pub inserted: usize,
    pub updated: usize,
    /// New records another run had already stored under the same key.
    pub skipped: usize,
    /// Responses dropped because the row was answered since it was loaded.
    pub already_answered: usize,
}

impl Database {
    pub fn open(path: Option<&Path>) -> Result<Self, StoreError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path(),
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&path)?;
        let db = Self {
            conn,
            path: Some(path),
        };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let db = Self {
            conn: Connection::open_in_memory()?,
            path: None,
        };
        db.init()?;
        Ok(db)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn default_path() -> PathBuf {
        // Use XDG data directory or fallback
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "jobtrack") {
            proj_dirs.data_dir().join("jobtrack.db")
        } else {
            PathBuf::from("jobtrack.db")
        }
    }

    /// Creates the table on first run and backfills columns that an older table
    /// lacks. Columns this crate does not know about are left alone.
    pub fn init(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS applications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date_found TEXT NOT NULL DEFAULT '',
                title TEXT NOT NULL DEFAULT '',
                company TEXT NOT NULL DEFAULT '',
                location TEXT NOT NULL DEFAULT '',
                link TEXT NOT NULL DEFAULT '',
                portal TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'Found',
                date_applied TEXT NOT NULL DEFAULT '',
                recruiter_response TEXT NOT NULL DEFAULT '',
                response_date TEXT NOT NULL DEFAULT '',
                notes TEXT NOT NULL DEFAULT ''
            );
            "#,
        )?;

        let existing = self.existing_columns()?;
        for column in COLUMNS {
            if !existing.iter().any(|c| c.eq_ignore_ascii_case(column)) {
                tracing::warn!(column, "backfilling missing column");
                self.conn.execute(
                    &format!("ALTER TABLE applications ADD COLUMN {} TEXT NOT NULL DEFAULT ''", column),
                    [],
                )?;
            }
        }

        self.conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_applications_status ON applications(status);",
        )?;
        self.create_identity_index()?;
        Ok(())
    }

    /// One row per (title, company). A table edited by hand may already hold
    /// repeats; it stays usable and `save` still checks keys itself.
    fn create_identity_index(&self) -> Result<(), StoreError> {
        let duplicates: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM (
                 SELECT 1 FROM applications GROUP BY lower(title), lower(company) HAVING COUNT(*) > 1
             )",
            [],
            |row| row.get(0),
        )?;
        if duplicates > 0 {
            tracing::warn!(duplicates, "table holds repeated title/company pairs, skipping identity index");
            return Ok(());
        }
        self.conn.execute_batch(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_applications_identity
                 ON applications(lower(title), lower(company));",
        )?;
        Ok(())
    }

    fn existing_columns(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare("PRAGMA table_info(applications)")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    pub fn load(&self) -> Result<RecordStore, StoreError> {
        let mut stmt = self.conn.prepare(&format!("{} ORDER BY rowid", SELECT_RECORDS))?;
        let records = stmt
            .query_map([], Self::row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        tracing::info!(records = records.len(), "loaded application table");
        Ok(RecordStore::from_records(records))
    }

    pub fn get(&self, id: i64) -> Result<Option<ApplicationRecord>, StoreError> {
        let result = self.conn.query_row(
            &format!("{} WHERE rowid = ?1", SELECT_RECORDS),
            [id],
            Self::row_to_record,
        );
        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes the batch's new records and response updates in one transaction.
    /// Only the response columns of existing rows are rewritten.
    ///
    /// The transaction takes the write lock up front and re-checks the table, so
    /// a run that overlapped this one cannot cause a second row for a key or a
    /// second response on a row.
    pub fn save(&mut self, store: &mut RecordStore) -> Result<SaveStats, StoreError> {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut stored = stored_keys(&tx)?;
        let mut ids = Vec::new();
        let mut stats = SaveStats::default();

        {
            let mut insert = tx.prepare(
                "INSERT INTO applications (date_found, title, company, location, link, portal, status,
                                           date_applied, recruiter_response, response_date, notes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for record in store.pending_inserts() {
                let key = record.identity_key();
                if let Some(&id) = stored.get(&key) {
                    tracing::info!(title = %record.title, company = %record.company, id, "already stored, skipping");
                    stats.skipped += 1;
                    ids.push(id);
                    continue;
                }
                insert.execute(params![
                    record.date_found,
                    record.title,
                    record.company,
                    record.location,
                    record.link,
                    record.portal,
                    record.status.as_str(),
                    format_date(record.date_applied),
                    record.recruiter_response.as_deref().unwrap_or(""),
                    format_date(record.response_date),
                    record.notes,
                ])?;
                let id = tx.last_insert_rowid();
                stored.insert(key, id);
                ids.push(id);
                stats.inserted += 1;
            }

            let mut update = tx.prepare(
                "UPDATE applications SET recruiter_response = ?1, response_date = ?2, notes = ?3
                 WHERE rowid = ?4 AND trim(coalesce(recruiter_response, '')) = ''",
            )?;
            for record in store.pending_updates() {
                let Some(id) = record.id else { continue };
                let changed = update.execute(params![
                    record.recruiter_response.as_deref().unwrap_or(""),
                    format_date(record.response_date),
                    record.notes,
                    id,
                ])?;
                if changed == 0 {
                    tracing::warn!(id, title = %record.title, "row already has a response, dropping");
                    stats.already_answered += 1;
                } else {
                    stats.updated += changed;
                }
            }
        }

        tx.commit()?;
        store.assign_ids(&ids);
        store.mark_saved();
        tracing::info!(
            inserted = stats.inserted,
            updated = stats.updated,
            skipped = stats.skipped,
            already_answered = stats.already_answered,
            "saved application table"
        );
        Ok(stats)
    }

    /// Moves a record to `Applied`; this is how applications leave the `Found` state.
    pub fn mark_applied(&self, id: i64, applied_on: NaiveDate) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE applications SET status = ?1, date_applied = ?2 WHERE rowid = ?3",
            params![ApplicationStatus::Applied.as_str(), applied_on.format(DATE_FORMAT).to_string(), id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    /// Copies the database file to `<dir>/<name>_backup_<timestamp>.<ext>`.
    /// Returns `None` when there is nothing on disk to copy.
    pub fn backup(&self, dir: &Path, taken_at: NaiveDateTime) -> Result<Option<PathBuf>, StoreError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }

        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("jobtrack");
        let mut name = format!("{}_backup_{}", stem, taken_at.format("%Y%m%d_%H%M%S"));
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            name.push('.');
            name.push_str(ext);
        }

        std::fs::create_dir_all(dir)?;
        let target = dir.join(name);
        std::fs::copy(path, &target)?;
        tracing::info!(backup = %target.display(), "backed up application table");
        Ok(Some(target))
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<ApplicationRecord> {
        let status_text = text_at(row, 7)?;
        let status = ApplicationStatus::parse(&status_text).unwrap_or_else(|| {
            if !status_text.trim().is_empty() {
                tracing::warn!(status = %status_text, "unknown status, treating as Found");
            }
            ApplicationStatus::Found
        });
        let response = text_at(row, 9)?;

        Ok(ApplicationRecord {
            id: Some(row.get(0)?),
            date_found: text_at(row, 1)?,
            title: text_at(row, 2)?,
            company: text_at(row, 3)?,
            location: text_at(row, 4)?,
            link: text_at(row, 5)?,
            portal: text_at(row, 6)?,
            status,
            date_applied: parse_date(&text_at(row, 8)?),
            recruiter_response: if response.trim().is_empty() { None } else { Some(response) },
            response_date: parse_date(&text_at(row, 10)?),
            notes: text_at(row, 11)?,
        })
    }
}

/// Writes the records as CSV with a header row, for spreadsheet tools.
pub fn write_csv<W: Write>(store: &RecordStore, writer: W) -> Result<(), StoreError> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(COLUMNS)?;
    for record in store.records() {
        csv.write_record([
            record.date_found.as_str(),
            record.title.as_str(),
            record.company.as_str(),
            record.location.as_str(),
            record.link.as_str(),
            record.portal.as_str(),
            record.status.as_str(),
            format_date(record.date_applied).as_str(),
            record.recruiter_response.as_deref().unwrap_or(""),
            format_date(record.response_date).as_str(),
            record.notes.as_str(),
        ])?;
    }
    csv.flush()?;
    Ok(())
}

/// Row id of the first row for every identity key in the table.
fn stored_keys(conn: &Connection) -> Result<HashMap<IdentityKey, i64>, StoreError> {
    let mut stmt = conn.prepare("SELECT rowid, title, company FROM applications ORDER BY rowid")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, i64>(0)?, text_at(row, 1)?, text_at(row, 2)?))
    })?;
    let mut keys = HashMap::new();
    for row in rows {
        let (id, title, company) = row?;
        keys.entry(IdentityKey::new(&title, &company)).or_insert(id);
    }
    Ok(keys)
}

// Cells written by other tools may hold numbers or NULL; read everything as text.
fn text_at(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<String> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => String::from_utf8_lossy(bytes).into_owned(),
    })
}

fn format_date(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format(DATE_FORMAT).to_string()).unwrap_or_default()
}

/// Lenient date parsing; anything unreadable is treated as missing.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, DATE_FORMAT) {
        return Some(date);
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt.date());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%m/%d/%Y") {
        return Some(date);
    }
    tracing::debug!(value, "unparseable date");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassifiedResponse, DiscoveredPosting, ResponseType};
    use chrono::{TimeZone, Utc};

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn posting(title: &str, company: &str) -> DiscoveredPosting {
        DiscoveredPosting {
            title: title.to_string(),
            company: company.to_string(),
            location: "Remote".to_string(),
            link: "https://jobs.example.com/1".to_string(),
            portal: "LinkedIn".to_string(),
            date_found: date(1),
        }
    }

    fn interview() -> ClassifiedResponse {
        ClassifiedResponse {
            sender: "hr@globex.com".to_string(),
            subject: "Next steps".to_string(),
            received_at: Utc.with_ymd_and_hms(2024, 3, 6, 10, 0, 0).unwrap(),
            is_job_related: true,
            company_guess: "Globex".to_string(),
            response_type: ResponseType::InterviewRequest,
            content_excerpt: "Can we schedule a call?".to_string(),
        }
    }

    #[test]
    fn test_empty_database_loads_empty_store() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_reload_roundtrip_with_response() {
        let mut db = Database::open_in_memory().unwrap();
        let mut store = db.load().unwrap();
        store.ingest(&[posting("Data Scientist", "Globex")]);
        let stats = db.save(&mut store).unwrap();
        assert_eq!(stats, SaveStats { inserted: 1, ..SaveStats::default() });
        let id = store.get(0).unwrap().id.unwrap();

        db.mark_applied(id, date(3)).unwrap();
        let mut store = db.load().unwrap();
        assert_eq!(store.open_records(), vec![0]);
        assert!(store.apply_match(0, &interview(), date(6)));
        assert_eq!(db.save(&mut store).unwrap(), SaveStats { updated: 1, ..SaveStats::default() });

        let record = db.get(id).unwrap().unwrap();
        assert_eq!(record.status, ApplicationStatus::Applied);
        assert_eq!(record.date_applied, Some(date(3)));
        assert_eq!(record.response_type(), Some(ResponseType::InterviewRequest));
        assert_eq!(record.response_date, Some(date(6)));
        assert!(record.notes.contains("Subject: Next steps"));
    }

    #[test]
    fn test_second_save_without_changes_writes_nothing() {
        let mut db = Database::open_in_memory().unwrap();
        let mut store = db.load().unwrap();
        store.ingest(&[posting("Data Scientist", "Globex")]);
        db.save(&mut store).unwrap();
        assert!(!store.has_unsaved_changes());
        assert_eq!(db.save(&mut store).unwrap(), SaveStats::default());
    }

    #[test]
    fn test_mark_applied_unknown_id() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.mark_applied(42, date(1)), Err(StoreError::NotFound(42))));
        assert!(db.get(42).unwrap().is_none());
    }

    #[test]
    fn test_legacy_table_is_backfilled_and_keeps_extra_columns() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE applications (title TEXT, company TEXT, status TEXT, date_applied TEXT, salary TEXT);
             INSERT INTO applications (title, company, status, date_applied, salary)
             VALUES ('Data Scientist', 'Globex', 'Applied', '2024-03-03 09:00:00', '120k');",
        )
        .unwrap();
        let mut db = Database { conn, path: None };
        db.init().unwrap();

        let mut store = db.load().unwrap();
        let record = store.get(0).unwrap();
        assert_eq!(record.title, "Data Scientist");
        assert_eq!(record.date_applied, Some(date(3)));
        assert!(record.recruiter_response.is_none());
        assert!(record.notes.is_empty());

        assert!(store.apply_match(0, &interview(), date(6)));
        db.save(&mut store).unwrap();

        let salary: String = db
            .conn
            .query_row("SELECT salary FROM applications", [], |row| row.get(0))
            .unwrap();
        assert_eq!(salary, "120k");
        let response: String = db
            .conn
            .query_row("SELECT recruiter_response FROM applications", [], |row| row.get(0))
            .unwrap();
        assert_eq!(response, "Interview Request");
    }

    #[test]
    fn test_odd_cells_load_as_text() {
        let db = Database::open_in_memory().unwrap();
        db.conn
            .execute(
                "INSERT INTO applications (title, company, status, date_applied) VALUES (?1, ?2, ?3, ?4)",
                params![12345, "Initech", "Interviewing", "sometime"],
            )
            .unwrap();
        let store = db.load().unwrap();
        let record = store.get(0).unwrap();
        assert_eq!(record.title, "12345");
        assert_eq!(record.status, ApplicationStatus::Found);
        assert_eq!(record.date_applied, None);
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(parse_date("2024-03-05"), Some(date(5)));
        assert_eq!(parse_date("2024-03-05T08:00:00"), Some(date(5)));
        assert_eq!(parse_date("03/05/2024"), Some(date(5)));
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("nan"), None);
    }

    #[test]
    fn test_overlapping_runs_store_a_posting_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("jobtrack.db");
        let mut cron = Database::open(Some(&path)).unwrap();
        let mut manual = Database::open(Some(&path)).unwrap();

        let mut first = cron.load().unwrap();
        let mut second = manual.load().unwrap();
        first.ingest(&[posting("Data Scientist", "Globex")]);
        second.ingest(&[posting("DATA SCIENTIST", "globex")]);

        assert_eq!(cron.save(&mut first).unwrap().inserted, 1);
        let stats = manual.save(&mut second).unwrap();
        assert_eq!(stats, SaveStats { skipped: 1, ..SaveStats::default() });
        assert_eq!(second.get(0).unwrap().id, first.get(0).unwrap().id);
        assert!(!second.has_unsaved_changes());

        let store = cron.load().unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(0).unwrap().title, "Data Scientist");
    }

    #[test]
    fn test_identity_index_rejects_repeated_key() {
        let db = Database::open_in_memory().unwrap();
        let insert = "INSERT INTO applications (title, company) VALUES (?1, ?2)";
        db.conn.execute(insert, params!["Data Scientist", "Globex"]).unwrap();
        assert!(db.conn.execute(insert, params!["data scientist", "GLOBEX"]).is_err());
    }

    #[test]
    fn test_init_tolerates_table_with_repeated_keys() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE applications (title TEXT, company TEXT, status TEXT);
             INSERT INTO applications (title, company, status) VALUES ('Data Scientist', 'Globex', 'Found');
             INSERT INTO applications (title, company, status) VALUES ('data scientist', 'globex', 'Found');",
        )
        .unwrap();
        let mut db = Database { conn, path: None };
        db.init().unwrap();

        let mut store = db.load().unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.ingest(&[posting("Data Scientist", "Globex")]), 0);
        assert_eq!(db.save(&mut store).unwrap(), SaveStats::default());
    }

    #[test]
    fn test_response_recorded_by_another_run_is_kept() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("jobtrack.db");
        let mut first_run = Database::open(Some(&path)).unwrap();
        let mut store = first_run.load().unwrap();
        store.ingest(&[posting("Data Scientist", "Globex")]);
        first_run.save(&mut store).unwrap();
        let id = store.get(0).unwrap().id.unwrap();
        first_run.mark_applied(id, date(3)).unwrap();

        let mut second_run = Database::open(Some(&path)).unwrap();
        let mut first = first_run.load().unwrap();
        let mut second = second_run.load().unwrap();

        assert!(first.apply_match(0, &interview(), date(6)));
        let mut rejection = interview();
        rejection.response_type = ResponseType::Rejection;
        assert!(second.apply_match(0, &rejection, date(7)));

        assert_eq!(first_run.save(&mut first).unwrap().updated, 1);
        let stats = second_run.save(&mut second).unwrap();
        assert_eq!(stats, SaveStats { already_answered: 1, ..SaveStats::default() });

        let record = first_run.get(id).unwrap().unwrap();
        assert_eq!(record.response_type(), Some(ResponseType::InterviewRequest));
        assert_eq!(record.response_date, Some(date(6)));
    }

    #[test]
    fn test_backup_copies_database_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let db_path = dir.path().join("data").join("jobtrack.db");
        let db = Database::open(Some(&db_path)).unwrap();

        let taken_at = date(7).and_hms_opt(9, 15, 0).unwrap();
        let backup = db.backup(&dir.path().join("backups"), taken_at).unwrap().unwrap();
        assert_eq!(backup.file_name().unwrap(), "jobtrack_backup_20240307_091500.db");
        assert!(backup.exists());

        let memory = Database::open_in_memory().unwrap();
        assert!(memory.backup(dir.path(), taken_at).unwrap().is_none());
    }

    #[test]
    fn test_write_csv_has_header_and_rows() {
        let mut store = RecordStore::new();
        store.ingest(&[posting("Data Scientist", "Globex")]);
        let mut out = Vec::new();
        write_csv(&store, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), COLUMNS.join(","));
        assert_eq!(
            lines.next().unwrap(),
            "2024-03-01,Data Scientist,Globex,Remote,https://jobs.example.com/1,LinkedIn,Found,,,,"
        );
    }
}
