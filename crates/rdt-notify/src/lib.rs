//! Contact directory plus alert delivery.
//!
//! The directory is a flat CSV of store contacts; lookups match by
//! entity id first, then store name, first row in file order wins.
//! Dispatchers are the outer boundary: the engine renders plain-text
//! messages and hands them off, and a failed delivery to one recipient
//! never blocks the rest.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use rdt_core::{AlertSummary, Contact, ContactLookup, RecipientBundle};
use thiserror::Error;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "rdt-notify";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("opening {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("contacts file is missing the {name:?} column")]
    MissingColumn { name: &'static str },
    #[error("delivering to {to}: {source}")]
    Delivery {
        to: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no alert bundle for recipient {email:?}")]
    UnknownRecipient { email: String },
}

#[derive(Debug, Clone)]
struct ContactRow {
    entity_id: String,
    store_name: String,
    contact: Contact,
}

/// Store contact list loaded from CSV, queried through [`ContactLookup`].
#[derive(Debug, Default)]
pub struct ContactDirectory {
    rows: Vec<ContactRow>,
    by_entity: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
}

impl ContactDirectory {
    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self, NotifyError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| NotifyError::Open {
            path: path.display().to_string(),
            source,
        })?;
        let directory = Self::from_reader(file)?;
        info!(
            contacts = directory.rows.len(),
            path = %path.display(),
            "loaded contact directory"
        );
        Ok(directory)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, NotifyError> {
        let mut rdr = csv::Reader::from_reader(reader);
        let headers = rdr.headers()?.clone();
        let entity_col = find_column(&headers, "entity_id")
            .ok_or(NotifyError::MissingColumn { name: "entity_id" })?;
        let name_col = find_column(&headers, "store_name")
            .ok_or(NotifyError::MissingColumn { name: "store_name" })?;
        let email_col =
            find_column(&headers, "email").ok_or(NotifyError::MissingColumn { name: "email" })?;
        let display_col = find_column(&headers, "display_name");

        let mut directory = Self::default();
        for record in rdr.records() {
            let record = record?;
            let field = |i: usize| record.get(i).unwrap_or("").trim().to_string();
            let email = field(email_col);
            if email.is_empty() {
                continue;
            }
            let entity_id = field(entity_col);
            let store_name = field(name_col);
            let display_name = match display_col {
                Some(i) if !field(i).is_empty() => field(i),
                _ if !store_name.is_empty() => store_name.clone(),
                _ => email.clone(),
            };
            let idx = directory.rows.len();
            directory.rows.push(ContactRow {
                entity_id: entity_id.clone(),
                store_name: store_name.clone(),
                contact: Contact {
                    email,
                    display_name,
                },
            });
            // First row in file order wins on duplicate keys.
            if !entity_id.is_empty() {
                directory.by_entity.entry(entity_id).or_insert(idx);
            }
            if !store_name.is_empty() {
                directory.by_name.entry(store_name).or_insert(idx);
            }
        }
        Ok(directory)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl ContactLookup for ContactDirectory {
    fn by_entity_id(&self, entity_id: &str) -> Option<Contact> {
        self.by_entity
            .get(entity_id.trim())
            .map(|&i| self.rows[i].contact.clone())
    }

    fn by_store_name(&self, store_name: &str) -> Option<Contact> {
        self.by_name
            .get(store_name.trim())
            .map(|&i| self.rows[i].contact.clone())
    }
}

fn find_column(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(name))
}

/// A rendered plain-text alert, ready for a dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Per-store decrease alert for one contact.
pub fn render_recipient_alert(bundle: &RecipientBundle, week: u32) -> Message {
    let mut body = String::new();
    let _ = writeln!(body, "Hi {},", bundle.display_name);
    let _ = writeln!(body);
    let _ = writeln!(
        body,
        "The week {week} report shows display count decreases at {} of your store(s):",
        bundle.stores.len()
    );
    for store in &bundle.stores {
        let _ = writeln!(body);
        let _ = writeln!(
            body,
            "{} (entity {}, dealer {}, {})",
            store.store.store_name, store.store.entity_id, store.store.dealer_id, store.store.channel
        );
        for change in &store.decreases {
            let _ = writeln!(
                body,
                "  {}: {} -> {} ({})",
                change.model, change.previous, change.current, change.difference
            );
        }
    }
    let _ = writeln!(body);
    let _ = writeln!(body, "Please verify the displays and update the floor if needed.");
    Message {
        to: bundle.email.clone(),
        subject: format!("Display decreases - week {week}"),
        body,
    }
}

/// Management rollup: global stats plus the ten stores with the
/// largest total decrease.
pub fn render_rollup(summary: &AlertSummary, to: &str) -> Message {
    let mut store_totals: Vec<(String, i64)> = Vec::new();
    for change in summary.decrease_records() {
        let label = format!(
            "{} (entity {})",
            change.store.store_name, change.store.entity_id
        );
        match store_totals.iter_mut().find(|(name, _)| *name == label) {
            Some((_, total)) => *total += change.difference.abs(),
            None => store_totals.push((label, change.difference.abs())),
        }
    }
    store_totals.sort_by(|a, b| b.1.cmp(&a.1));
    store_totals.truncate(10);

    let stats = &summary.decrease_stats;
    let mut body = String::new();
    let _ = writeln!(body, "Week {} display decrease rollup", summary.week);
    let _ = writeln!(body);
    let _ = writeln!(body, "Stores affected:  {}", stats.stores_affected);
    let _ = writeln!(body, "Models decreased: {}", stats.models_decreased);
    let _ = writeln!(body, "Total decrease:   {}", stats.total_decrease);
    if !store_totals.is_empty() {
        let _ = writeln!(body);
        let _ = writeln!(body, "Largest store decreases:");
        for (label, total) in &store_totals {
            let _ = writeln!(body, "  {label}: -{total}");
        }
    }
    Message {
        to: to.to_string(),
        subject: format!("Display decrease rollup - week {}", summary.week),
        body,
    }
}

/// Outer delivery boundary. Implementations must not panic on failure;
/// errors are reported per message.
pub trait NotificationDispatcher: Send + Sync {
    fn deliver(&self, week: u32, message: &Message) -> Result<(), NotifyError>;
}

/// Logs each message instead of sending it. Useful for dry runs.
#[derive(Debug, Default)]
pub struct LogDispatcher;

impl NotificationDispatcher for LogDispatcher {
    fn deliver(&self, week: u32, message: &Message) -> Result<(), NotifyError> {
        info!(week, to = %message.to, subject = %message.subject, "notification (dry run)");
        Ok(())
    }
}

/// Writes each message to `<dir>/week-<w>/<recipient>.txt`.
#[derive(Debug)]
pub struct FileOutboxDispatcher {
    dir: PathBuf,
}

impl FileOutboxDispatcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn message_path(&self, week: u32, to: &str) -> PathBuf {
        let safe: String = to
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("week-{week}")).join(format!("{safe}.txt"))
    }
}

impl NotificationDispatcher for FileOutboxDispatcher {
    fn deliver(&self, week: u32, message: &Message) -> Result<(), NotifyError> {
        let path = self.message_path(week, &message.to);
        let write = || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let contents = format!(
                "To: {}\nSubject: {}\n\n{}",
                message.to, message.subject, message.body
            );
            fs::write(&path, contents)
        };
        write().map_err(|source| NotifyError::Delivery {
            to: message.to.clone(),
            source,
        })?;
        info!(week, to = %message.to, path = %path.display(), "notification written to outbox");
        Ok(())
    }
}

/// Outcome of one delivery attempt.
#[derive(Debug)]
pub struct DeliveryReport {
    pub to: String,
    pub result: Result<(), NotifyError>,
}

/// Delivers every recipient bundle plus, when `rollup_to` is set, the
/// management rollup. Failures are collected, never fatal.
pub fn notify_all(
    dispatcher: &dyn NotificationDispatcher,
    summary: &AlertSummary,
    rollup_to: Option<&str>,
) -> Vec<DeliveryReport> {
    let mut reports = Vec::new();
    for bundle in &summary.recipients {
        let message = render_recipient_alert(bundle, summary.week);
        let result = dispatcher.deliver(summary.week, &message);
        if let Err(err) = &result {
            warn!(to = %bundle.email, error = %err, "notification delivery failed");
        }
        reports.push(DeliveryReport {
            to: bundle.email.clone(),
            result,
        });
    }
    if let Some(to) = rollup_to {
        let message = render_rollup(summary, to);
        let result = dispatcher.deliver(summary.week, &message);
        if let Err(err) = &result {
            warn!(to, error = %err, "rollup delivery failed");
        }
        reports.push(DeliveryReport {
            to: to.to_string(),
            result,
        });
    }
    let failed = reports.iter().filter(|r| r.result.is_err()).count();
    info!(
        week = summary.week,
        delivered = reports.len() - failed,
        failed,
        "notification pass complete"
    );
    reports
}

/// Re-delivers one recipient's bundle from an existing summary.
pub fn resend(
    dispatcher: &dyn NotificationDispatcher,
    summary: &AlertSummary,
    email: &str,
) -> Result<(), NotifyError> {
    let bundle = summary
        .recipient(email)
        .ok_or_else(|| NotifyError::UnknownRecipient {
            email: email.to_string(),
        })?;
    let message = render_recipient_alert(bundle, summary.week);
    dispatcher.deliver(summary.week, &message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rdt_core::{ChangeKind, ChangeRecord, DecreaseStats, StoreDecreases, StoreKey};

    const CONTACTS: &str = "\
entity_id,store_name,email,display_name
S1,Alpha,alpha@example.com,Alpha Crew
S2,Beta,beta@example.com,
,Gamma,gamma@example.com,Gamma Desk
S1,Alpha Annex,dup@example.com,Duplicate
";

    fn directory() -> ContactDirectory {
        ContactDirectory::from_reader(CONTACTS.as_bytes()).unwrap()
    }

    fn decrease(entity: &str, name: &str, model: &str, previous: i64, current: i64) -> ChangeRecord {
        ChangeRecord {
            store: StoreKey::new(entity, "D1", "Retail", name),
            model: model.to_string(),
            previous,
            current,
            difference: current - previous,
            change_type: ChangeKind::Decrease,
        }
    }

    fn summary_with_recipient() -> AlertSummary {
        let change = decrease("S1", "Alpha", "M1", 3, 1);
        AlertSummary {
            generated_at: Utc::now(),
            week: 14,
            total_models_tracked: 1,
            models_increased: 0,
            models_decreased: 1,
            models_unchanged: 0,
            top_increases: Vec::new(),
            top_decreases: Vec::new(),
            increases: Vec::new(),
            decreases: Vec::new(),
            all_changes: vec![change.clone()],
            decrease_stats: DecreaseStats {
                stores_affected: 1,
                total_decrease: 2,
                models_decreased: 1,
            },
            recipients: vec![RecipientBundle {
                email: "alpha@example.com".to_string(),
                display_name: "Alpha Crew".to_string(),
                stores: vec![StoreDecreases {
                    store: change.store.clone(),
                    decreases: vec![change],
                }],
            }],
        }
    }

    #[test]
    fn directory_matches_by_entity_then_name() {
        let dir = directory();
        assert_eq!(dir.by_entity_id("S1").unwrap().email, "alpha@example.com");
        assert_eq!(dir.by_store_name("Gamma").unwrap().email, "gamma@example.com");
        assert!(dir.by_entity_id("S9").is_none());
    }

    #[test]
    fn duplicate_keys_keep_the_first_row() {
        let dir = directory();
        assert_eq!(dir.by_entity_id("S1").unwrap().email, "alpha@example.com");
    }

    #[test]
    fn missing_display_name_falls_back_to_store_name() {
        let dir = directory();
        assert_eq!(dir.by_entity_id("S2").unwrap().display_name, "Beta");
    }

    #[test]
    fn missing_email_column_is_an_error() {
        let err = ContactDirectory::from_reader("entity_id,store_name\nS1,Alpha\n".as_bytes())
            .unwrap_err();
        assert!(matches!(err, NotifyError::MissingColumn { name: "email" }));
    }

    #[test]
    fn recipient_alert_lists_each_decrease() {
        let summary = summary_with_recipient();
        let message = render_recipient_alert(&summary.recipients[0], summary.week);
        assert_eq!(message.to, "alpha@example.com");
        assert!(message.subject.contains("week 14"));
        assert!(message.body.contains("Hi Alpha Crew,"));
        assert!(message.body.contains("M1: 3 -> 1 (-2)"));
    }

    #[test]
    fn rollup_ranks_stores_by_total_decrease() {
        let mut summary = summary_with_recipient();
        summary.all_changes.push(decrease("S2", "Beta", "M2", 9, 1));
        let message = render_rollup(&summary, "boss@example.com");
        let beta = message.body.find("Beta").unwrap();
        let alpha = message.body.find("Alpha").unwrap();
        assert!(beta < alpha, "larger decrease listed first");
        assert!(message.body.contains("Stores affected:  1"));
    }

    #[test]
    fn outbox_writes_one_file_per_recipient() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = FileOutboxDispatcher::new(dir.path());
        let summary = summary_with_recipient();
        let reports = notify_all(&dispatcher, &summary, Some("boss@example.com"));

        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.result.is_ok()));
        let outbox = dir.path().join("week-14");
        assert!(outbox.join("alpha_example.com.txt").exists());
        assert!(outbox.join("boss_example.com.txt").exists());
    }

    #[test]
    fn resend_requires_a_known_recipient() {
        let dispatcher = LogDispatcher;
        let summary = summary_with_recipient();
        assert!(resend(&dispatcher, &summary, "alpha@example.com").is_ok());
        let err = resend(&dispatcher, &summary, "nobody@example.com").unwrap_err();
        assert!(matches!(err, NotifyError::UnknownRecipient { .. }));
    }
}
