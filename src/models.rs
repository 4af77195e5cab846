use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
    pub label_type: String, // 'system' or 'user'
    pub color_background: Option<String>,
    /// Set once the label exists on the provider side; the join key for
    /// everything that matches labels against provider data.
    pub provider_label_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Email {
    pub id: String,
    pub thread_id: String,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
    /// Raw label ids as they appear on the provider record.
    pub provider_label_ids: Vec<String>,
    /// Registry-resolved labels. Only entries whose provider id is currently
    /// present on the provider record belong here.
    pub labels: Vec<Label>,
    pub category: Option<EmailCategory>,
    pub importance: EmailImportance,
    pub ai_summary: Option<String>,
    pub suggested_action: Option<EmailAction>,
    pub suggested_response: Option<String>,
    pub handled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmailCategory {
    Urgent,
    Important,
    FollowUp,
    Newsletter,
    Promotional,
    Spam,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmailImportance {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmailAction {
    Reply,
    Forward,
    Archive,
    Delete,
    Flag,
    MarkImportant,
    None,
}

/// One classifier invocation's output. Merged into the `Email` it was
/// produced for, never persisted on its own.
#[derive(Debug, Clone)]
pub struct Classification {
    pub summary: String,
    pub suggested_action: EmailAction,
    pub category: EmailCategory,
    pub importance: EmailImportance,
    pub confidence: f64,
    pub suggested_response: Option<String>,
    pub suggested_label: Option<Label>,
}

#[derive(Debug, Clone)]
pub struct AutomationRule {
    pub id: String,
    pub label: Label,
    pub action: EmailAction,
    pub enabled: bool,
    pub template: Option<String>,
}
