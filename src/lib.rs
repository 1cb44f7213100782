//! Job application tracking: deduplicates discovered postings into a persisted
//! application table and matches recruiter email back onto the applications it
//! answers.

pub mod classify;
pub mod config;
pub mod correlate;
pub mod db;
pub mod discovery;
pub mod email;
pub mod error;
pub mod models;
pub mod scoring;
pub mod store;
pub mod summary;
pub mod telemetry;

pub use correlate::{correlate, CorrelationReport, ACCEPT_THRESHOLD};
pub use db::Database;
pub use error::StoreError;
pub use models::{
    ApplicationRecord, ApplicationStatus, ClassifiedResponse, DiscoveredPosting, InboundMessage, ResponseType,
};
pub use store::RecordStore;
