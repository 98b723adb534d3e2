//! Convocation mail: recipients are validated, then sent in fixed-size
//! batches through a `MailTransport`, and every recipient gets its own
//! outcome in the report.

use crate::fields;
use crate::store::AssignmentRecord;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Duty {
    pub date: String,
    pub day: i64,
    pub slot: String,
    pub time_start: String,
    pub time_end: String,
    pub responsible: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub duties: Vec<Duty>,
    pub attachment: Option<PathBuf>,
}

impl Recipient {
    pub fn from_json(v: &Value) -> Self {
        let duties = v
            .get("duties")
            .and_then(|d| d.as_array())
            .map(|arr| {
                arr.iter()
                    .map(|d| Duty {
                        date: fields::text(d, "date").unwrap_or_default(),
                        day: fields::int(d, "day").unwrap_or(0),
                        slot: fields::text(d, "slot").unwrap_or_default(),
                        time_start: fields::text(d, "timeStart").unwrap_or_default(),
                        time_end: fields::text(d, "timeEnd").unwrap_or_default(),
                        responsible: fields::flag(d, "responsible").unwrap_or(false),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self {
            id: fields::text(v, "id").unwrap_or_default(),
            email: fields::text(v, "email").unwrap_or_default(),
            first_name: fields::text(v, "firstName").unwrap_or_default(),
            last_name: fields::text(v, "lastName").unwrap_or_default(),
            duties,
            attachment: fields::text(v, "attachment").map(PathBuf::from),
        }
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

pub fn validate_recipient(r: &Recipient) -> Result<(), String> {
    if r.id.is_empty() {
        return Err("missing id".into());
    }
    if !r.email.contains('@') {
        return Err(format!("invalid email: {:?}", r.email));
    }
    if r.first_name.is_empty() || r.last_name.is_empty() {
        return Err("missing first or last name".into());
    }
    if r.duties.is_empty() {
        return Err("no duties to convene".into());
    }
    Ok(())
}

/// One recipient per teacher of the session, duties in slot order.
pub fn recipients_from_assignments(rows: &[AssignmentRecord]) -> Vec<Recipient> {
    let mut by_teacher: BTreeMap<&str, Recipient> = BTreeMap::new();
    for a in rows {
        let r = by_teacher
            .entry(a.teacher_id.as_str())
            .or_insert_with(|| Recipient {
                id: a.teacher_id.clone(),
                email: a.email.clone().unwrap_or_default(),
                first_name: a.first_name.clone().unwrap_or_default(),
                last_name: a.last_name.clone().unwrap_or_default(),
                duties: Vec::new(),
                attachment: None,
            });
        r.duties.push(Duty {
            date: a.date.clone(),
            day: a.day_number,
            slot: a.slot.clone(),
            time_start: a.time_start.clone(),
            time_end: a.time_end.clone(),
            responsible: a.is_responsible,
        });
    }
    let mut out: Vec<Recipient> = by_teacher.into_values().collect();
    for r in &mut out {
        r.duties.sort_by(|a, b| a.day.cmp(&b.day).then_with(|| a.slot.cmp(&b.slot)));
    }
    out
}

/// Where the generated convocation of a teacher is expected.
pub fn convocation_path(dir: &Path, r: &Recipient) -> PathBuf {
    dir.join(format!("convocation_{}_{}.pdf", r.last_name, r.first_name))
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub from_name: String,
    pub from_address: String,
    pub subject: String,
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub attach_documents: bool,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            from_name: "Administration".to_string(),
            from_address: String::new(),
            subject: "Exam surveillance convocation".to_string(),
            batch_size: 5,
            batch_delay: Duration::from_millis(1000),
            attach_documents: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutgoingMail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment: Option<PathBuf>,
}

pub trait MailTransport {
    /// Returns the message id on success.
    fn send(&mut self, mail: &OutgoingMail) -> Result<String, String>;
}

/// Drops each message as an `.eml` file (attachment copied alongside) for
/// an external relay to pick up.
pub struct OutboxTransport {
    dir: PathBuf,
}

impl OutboxTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl MailTransport for OutboxTransport {
    fn send(&mut self, mail: &OutgoingMail) -> Result<String, String> {
        std::fs::create_dir_all(&self.dir).map_err(|e| e.to_string())?;
        let id = uuid::Uuid::new_v4();
        let message_id = format!("<{}@survd>", id);

        let mut headers = vec![
            format!("Message-ID: {}", message_id),
            format!("Date: {}", chrono::Utc::now().to_rfc2822()),
            format!("From: {}", mail.from),
            format!("To: {}", mail.to),
            format!("Subject: {}", mail.subject),
            "Content-Type: text/plain; charset=utf-8".to_string(),
        ];
        if let Some(src) = &mail.attachment {
            let name = src
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| format!("attachment has no file name: {}", src.display()))?;
            let stored = format!("{}_{}", id, name);
            std::fs::copy(src, self.dir.join(&stored)).map_err(|e| e.to_string())?;
            headers.push(format!("X-Attachment: {}", stored));
        }
        let eml = format!("{}\r\n\r\n{}", headers.join("\r\n"), mail.body);
        std::fs::write(self.dir.join(format!("{}.eml", id)), eml).map_err(|e| e.to_string())?;
        Ok(message_id)
    }
}

fn compose_body(r: &Recipient) -> String {
    let mut body = format!(
        "Dear {},\n\nYou are convened to supervise the following exam sessions:\n\n",
        r.display_name()
    );
    for d in &r.duties {
        body.push_str(&format!(
            "- {} (day {}) {} {}-{}{}\n",
            d.date,
            d.day,
            d.slot,
            d.time_start,
            d.time_end,
            if d.responsible { " [responsible]" } else { "" }
        ));
    }
    body.push_str("\nRegards,\nThe administration\n");
    body
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResult {
    pub success: bool,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverySummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub success: bool,
    pub summary: DeliverySummary,
    pub results: Vec<DeliveryResult>,
}

fn send_one(transport: &mut dyn MailTransport, cfg: &MailConfig, r: &Recipient) -> DeliveryResult {
    let mut body = compose_body(r);
    let mut attachment = None;
    if cfg.attach_documents {
        match &r.attachment {
            Some(p) if p.is_file() => attachment = Some(p.clone()),
            Some(p) => body.push_str(&format!(
                "\n[NOTE: could not attach {}: file not found]\n",
                p.display()
            )),
            None => body.push_str("\n[NOTE: no convocation document available]\n"),
        }
    }
    let from = if cfg.from_address.is_empty() {
        cfg.from_name.clone()
    } else {
        format!("\"{}\" <{}>", cfg.from_name, cfg.from_address)
    };
    let mail = OutgoingMail {
        from,
        to: r.email.clone(),
        subject: cfg.subject.clone(),
        body,
        attachment,
    };
    match transport.send(&mail) {
        Ok(message_id) => DeliveryResult {
            success: true,
            email: r.email.clone(),
            name: r.display_name(),
            message_id: Some(message_id),
            error: None,
        },
        Err(e) => {
            tracing::warn!(email = %r.email, error = %e, "convocation not sent");
            DeliveryResult {
                success: false,
                email: r.email.clone(),
                name: r.display_name(),
                message_id: None,
                error: Some(e),
            }
        }
    }
}

pub fn deliver(
    transport: &mut dyn MailTransport,
    recipients: &[Recipient],
    cfg: &MailConfig,
) -> DeliveryReport {
    let mut results = Vec::with_capacity(recipients.len());
    let mut valid = Vec::new();
    for r in recipients {
        match validate_recipient(r) {
            Ok(()) => valid.push(r),
            Err(reason) => {
                tracing::warn!(id = %r.id, reason = %reason, "skipping invalid recipient");
                results.push(DeliveryResult {
                    success: false,
                    email: r.email.clone(),
                    name: r.display_name(),
                    message_id: None,
                    error: Some(reason),
                });
            }
        }
    }

    let batch_size = cfg.batch_size.max(1);
    let batches: Vec<_> = valid.chunks(batch_size).collect();
    for (i, batch) in batches.iter().enumerate() {
        for r in batch.iter() {
            results.push(send_one(transport, cfg, r));
        }
        if i + 1 < batches.len() && !cfg.batch_delay.is_zero() {
            std::thread::sleep(cfg.batch_delay);
        }
    }

    let successful = results.iter().filter(|r| r.success).count();
    let failed = results.len() - successful;
    tracing::info!(total = results.len(), successful, failed, "convocation batch finished");
    DeliveryReport {
        success: failed == 0 && !results.is_empty(),
        summary: DeliverySummary {
            total: results.len(),
            successful,
            failed,
            timestamp: chrono::Utc::now().to_rfc3339(),
        },
        results,
    }
}
