use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use mailparse::{parse_mail, MailHeaderMap, ParsedMail};
use scraper::Html;
use std::fs;
use std::path::Path;

use crate::models::InboundMessage;

pub struct EmailConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl EmailConfig {
    pub fn new(server: &str, port: u16, username: &str, password: &str) -> Self {
        Self {
            server: server.to_string(),
            port,
            username: username.to_string(),
            password: password.trim().to_string(),
        }
    }

    pub fn from_password_file(server: &str, port: u16, username: &str, password_file: &Path) -> Result<Self> {
        let password = fs::read_to_string(password_file)
            .with_context(|| format!("Failed to read password file: {:?}", password_file))?;
        Ok(Self::new(server, port, username, &password))
    }
}

#[derive(Debug, Default)]
pub struct FetchStats {
    pub emails_found: usize,
    pub emails_fetched: usize,
    pub errors: usize,
}

/// Pulls recent inbox messages over IMAP and decodes them into [`InboundMessage`]s.
pub struct MailFetcher {
    config: EmailConfig,
}

impl MailFetcher {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    /// Fetches at most `limit` of the newest messages received since `since`.
    /// Messages that cannot be decoded are logged and skipped.
    pub fn fetch_recent(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<(Vec<InboundMessage>, FetchStats)> {
        let tls = native_tls::TlsConnector::builder().build()?;

        let addr = (self.config.server.as_str(), self.config.port);
        let tcp = std::net::TcpStream::connect(addr)
            .context("Failed to connect to IMAP server")?;
        tcp.set_read_timeout(Some(std::time::Duration::from_secs(30)))?;
        tcp.set_write_timeout(Some(std::time::Duration::from_secs(30)))?;
        let tls_stream = tls.connect(&self.config.server, tcp)?;

        let client = imap::Client::new(tls_stream);
        let mut session = client
            .login(&self.config.username, &self.config.password)
            .map_err(|e| anyhow!("Login failed: {}", e.0))?;
        tracing::info!(server = %self.config.server, "connected to mail server");

        session.select("INBOX")?;

        let query = format!("SINCE {}", since.format("%d-%b-%Y"));
        let mut ids: Vec<u32> = session.search(&query)?.into_iter().collect();
        ids.sort_unstable();

        let mut stats = FetchStats {
            emails_found: ids.len(),
            ..FetchStats::default()
        };
        let newest = &ids[ids.len().saturating_sub(limit)..];
        tracing::info!(found = ids.len(), checking = newest.len(), "searched inbox");

        let mut messages = Vec::with_capacity(newest.len());
        for id in newest {
            let fetched = match session.fetch(id.to_string(), "RFC822") {
                Ok(fetched) => fetched,
                Err(e) => {
                    stats.errors += 1;
                    tracing::warn!(id, error = %e, "failed to fetch message");
                    continue;
                }
            };
            for message in fetched.iter() {
                let Some(body) = message.body() else { continue };
                match parse_message(body, since) {
                    Ok(parsed) => {
                        stats.emails_fetched += 1;
                        messages.push(parsed);
                    }
                    Err(e) => {
                        stats.errors += 1;
                        tracing::warn!(id, error = %e, "skipping undecodable message");
                    }
                }
            }
        }

        session.logout()?;
        Ok((messages, stats))
    }
}

/// Decodes one RFC 822 message. `fallback_received` stands in for a missing or
/// unreadable `Date` header.
pub fn parse_message(raw: &[u8], fallback_received: DateTime<Utc>) -> Result<InboundMessage> {
    let parsed = parse_mail(raw)?;

    let sender = parsed.headers.get_first_value("From").unwrap_or_default();
    let subject = parsed.headers.get_first_value("Subject").unwrap_or_default();
    let received_at = parsed
        .headers
        .get_first_value("Date")
        .and_then(|date| mailparse::dateparse(&date).ok())
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        .unwrap_or(fallback_received);

    let body = get_email_body(&parsed)?;

    Ok(InboundMessage {
        sender,
        subject,
        body,
        received_at,
    })
}

fn get_email_body(parsed: &ParsedMail) -> Result<String> {
    // Single part email
    if parsed.subparts.is_empty() {
        let body = parsed.get_body()?;
        if parsed.ctype.mimetype.eq_ignore_ascii_case("text/html") {
            return Ok(html_to_text(&body));
        }
        return Ok(body);
    }

    let mut leaves = Vec::new();
    collect_leaf_parts(parsed, &mut leaves);

    // Prefer every plain text part, concatenated
    let mut plain = String::new();
    for part in leaves.iter().filter(|p| p.ctype.mimetype.eq_ignore_ascii_case("text/plain")) {
        match part.get_body() {
            Ok(text) => plain.push_str(&text),
            Err(e) => tracing::warn!(error = %e, "failed to decode text part"),
        }
    }
    if !plain.is_empty() {
        return Ok(plain);
    }

    // Fallback to HTML
    if let Some(part) = leaves.iter().find(|p| p.ctype.mimetype.eq_ignore_ascii_case("text/html")) {
        return Ok(html_to_text(&part.get_body()?));
    }

    Err(anyhow!("No email body found"))
}

fn collect_leaf_parts<'a>(part: &'a ParsedMail<'a>, out: &mut Vec<&'a ParsedMail<'a>>) {
    if part.subparts.is_empty() {
        out.push(part);
    } else {
        for sub in &part.subparts {
            collect_leaf_parts(sub, out);
        }
    }
}

/// Visible text of an HTML body, one text node per line.
fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    document
        .root_element()
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
