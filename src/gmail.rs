use crate::models::{Email, EmailImportance, Label};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use google_gmail1::Gmail;
use hyper::client::HttpConnector;
use hyper_rustls::HttpsConnector;
use tracing::debug;

/// Provider failures, split so callers can tell "reconnect the account"
/// apart from errors that are safe to retry on the next pass.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("gmail authentication failed, reconnect the account: {0}")]
    Auth(String),
    #[error("gmail api call failed: {0}")]
    Api(String),
}

impl From<google_gmail1::Error> for MailError {
    fn from(err: google_gmail1::Error) -> Self {
        match &err {
            google_gmail1::Error::MissingToken(e) => MailError::Auth(e.to_string()),
            google_gmail1::Error::Failure(resp) => {
                let status = resp.status().as_u16();
                if status == 401 || status == 403 {
                    MailError::Auth(format!("http status {}", status))
                } else {
                    MailError::Api(format!("http status {}", status))
                }
            }
            _ => MailError::Api(err.to_string()),
        }
    }
}

/// The mailbox provider contract the pipeline and monitor run against.
/// `GmailClient` is the only production implementation; tests substitute
/// recording mocks.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Coarse pre-filtered listing: primary category, not sent, received
    /// after the cutoff. The post-fetch filter still applies.
    async fn list_recent_inbox(
        &self,
        cutoff: DateTime<Utc>,
        max_results: u32,
    ) -> Result<Vec<String>, MailError>;

    async fn get_message(&self, id: &str) -> Result<Email, MailError>;

    async fn add_label(&self, message_id: &str, label_id: &str) -> Result<(), MailError>;

    async fn list_labels(&self) -> Result<Vec<Label>, MailError>;

    /// Creates the label on the provider and returns it with the
    /// provider-assigned id filled in. Not idempotent.
    async fn create_label(&self, name: &str) -> Result<Label, MailError>;

    /// Creates a draft (never a sent message) threaded to the original.
    async fn create_draft(
        &self,
        thread_id: &str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<String, MailError>;
}

#[derive(Clone)]
pub struct GmailClient {
    hub: Gmail<HttpsConnector<HttpConnector>>,
}

impl GmailClient {
    pub fn new(hub: Gmail<HttpsConnector<HttpConnector>>) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl Mailbox for GmailClient {
    async fn list_recent_inbox(
        &self,
        cutoff: DateTime<Utc>,
        max_results: u32,
    ) -> Result<Vec<String>, MailError> {
        // `after:` takes epoch seconds; `newer_than:` only has day granularity.
        let query = format!("category:primary -in:sent after:{}", cutoff.timestamp());
        let (_, message_list) = self
            .hub
            .users()
            .messages_list("me")
            .add_label_ids("INBOX")
            .q(&query)
            .max_results(max_results)
            .doit()
            .await?;

        let ids = message_list
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.id)
            .collect();

        Ok(ids)
    }

    async fn get_message(&self, id: &str) -> Result<Email, MailError> {
        let (_, msg) = self
            .hub
            .users()
            .messages_get("me", id)
            .format("full")
            .doit()
            .await?;

        let mut from = String::new();
        let mut to = Vec::new();
        let mut subject = String::new();

        if let Some(payload) = &msg.payload {
            if let Some(headers) = &payload.headers {
                for header in headers {
                    match header.name.as_deref() {
                        Some("From") => from = header.value.clone().unwrap_or_default(),
                        Some("To") => {
                            to = header
                                .value
                                .as_deref()
                                .unwrap_or_default()
                                .split(',')
                                .map(|a| a.trim().to_string())
                                .filter(|a| !a.is_empty())
                                .collect()
                        }
                        Some("Subject") => subject = header.value.clone().unwrap_or_default(),
                        _ => {}
                    }
                }
            }
        }

        let body = msg
            .payload
            .as_ref()
            .and_then(|p| extract_text_body(p, "text/plain"))
            .unwrap_or_default();

        let label_ids = msg.label_ids.unwrap_or_default();

        Ok(Email {
            id: msg.id.unwrap_or_default(),
            thread_id: msg.thread_id.unwrap_or_default(),
            from,
            to,
            subject,
            body,
            timestamp: DateTime::from_timestamp_millis(msg.internal_date.unwrap_or(0))
                .unwrap_or_default(),
            read: !label_ids.contains(&"UNREAD".to_string()),
            provider_label_ids: label_ids,
            labels: Vec::new(),
            category: None,
            importance: EmailImportance::Medium,
            ai_summary: None,
            suggested_action: None,
            suggested_response: None,
            handled: false,
        })
    }

    async fn add_label(&self, message_id: &str, label_id: &str) -> Result<(), MailError> {
        debug!(message_id, label_id, "adding label");
        let req = google_gmail1::api::ModifyMessageRequest {
            add_label_ids: Some(vec![label_id.to_string()]),
            remove_label_ids: None,
        };
        self.hub
            .users()
            .messages_modify(req, "me", message_id)
            .doit()
            .await?;
        Ok(())
    }

    async fn list_labels(&self) -> Result<Vec<Label>, MailError> {
        let (_, label_list) = self.hub.users().labels_list("me").doit().await?;

        let labels = label_list
            .labels
            .unwrap_or_default()
            .into_iter()
            .map(|l| {
                let id = l.id.unwrap_or_default();
                Label {
                    id: id.clone(),
                    name: l.name.unwrap_or_default(),
                    label_type: l.type_.unwrap_or_default(),
                    color_background: l.color.as_ref().and_then(|c| c.background_color.clone()),
                    provider_label_id: Some(id),
                }
            })
            .collect();

        Ok(labels)
    }

    async fn create_label(&self, name: &str) -> Result<Label, MailError> {
        let req = google_gmail1::api::Label {
            name: Some(name.to_string()),
            label_list_visibility: Some("labelShow".to_string()),
            message_list_visibility: Some("show".to_string()),
            ..Default::default()
        };
        let (_, created) = self.hub.users().labels_create(req, "me").doit().await?;

        let id = created
            .id
            .ok_or_else(|| MailError::Api("label create returned no id".to_string()))?;

        Ok(Label {
            id: id.clone(),
            name: created.name.unwrap_or_else(|| name.to_string()),
            label_type: "user".to_string(),
            color_background: None,
            provider_label_id: Some(id),
        })
    }

    async fn create_draft(
        &self,
        thread_id: &str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<String, MailError> {
        let raw_message = format!(
            "From: me\r\nTo: {}\r\nSubject: {}\r\nContent-Type: text/plain; charset=\"UTF-8\"\r\n\r\n{}",
            to, subject, body
        );

        use std::io::Cursor;
        let cursor = Cursor::new(raw_message.into_bytes());

        let draft = google_gmail1::api::Draft {
            message: Some(google_gmail1::api::Message {
                thread_id: Some(thread_id.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let (_, created) = self
            .hub
            .users()
            .drafts_create(draft, "me")
            .upload(cursor, "message/rfc822".parse().unwrap())
            .await?;

        Ok(created.id.unwrap_or_default())
    }
}

/// Trailing-window cutoff for the listing query.
pub fn window_cutoff(lookback_secs: u64) -> DateTime<Utc> {
    Utc::now() - Duration::seconds(lookback_secs as i64)
}

fn extract_text_body(part: &google_gmail1::api::MessagePart, mime_type: &str) -> Option<String> {
    if let Some(mime) = &part.mime_type {
        if mime == mime_type {
            if let Some(body) = &part.body {
                if let Some(data) = &body.data {
                    use base64::{Engine as _, engine::general_purpose};
                    let data_str = String::from_utf8_lossy(data);

                    // Try decoding as base64url (Gmail's default)
                    let decoded = general_purpose::URL_SAFE_NO_PAD
                        .decode(data_str.trim().replace('-', "+").replace('_', "/"))
                        .or_else(|_| {
                            general_purpose::URL_SAFE
                                .decode(data_str.trim().replace('-', "+").replace('_', "/"))
                        })
                        .or_else(|_| general_purpose::STANDARD_NO_PAD.decode(data_str.trim()))
                        .or_else(|_| general_purpose::STANDARD.decode(data_str.trim()));

                    match decoded {
                        Ok(bytes) => return String::from_utf8(bytes).ok(),
                        Err(_) => {
                            // If base64 decoding fails, it might already be raw content
                            return String::from_utf8(data.clone()).ok();
                        }
                    }
                }
            }
        }
    }

    if let Some(parts) = &part.parts {
        let mut full_body = String::new();
        for p in parts {
            if let Some(body) = extract_text_body(p, mime_type) {
                full_body.push_str(&body);
            }
        }
        if !full_body.is_empty() {
            return Some(full_body);
        }
    }

    None
}
