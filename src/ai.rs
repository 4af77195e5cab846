use crate::models::{Classification, Email, EmailAction, EmailCategory, EmailImportance, Label};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// The language model as seen by the pipeline: one call in, one structured
/// classification out. Transport and parsing live behind this seam.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        email: &Email,
        available_labels: &[Label],
    ) -> Result<Classification>;
}

#[derive(Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    parts: Option<Vec<CandidatePart>>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

pub struct GeminiClassifier {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiClassifier {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: &str,
        timeout_secs: u64,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let endpoint = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let resp = self
            .http
            .post(&endpoint)
            .json(&body)
            .send()
            .await
            .context("model request failed")?
            .error_for_status()
            .context("model returned an error status")?;

        let parsed: GenerateResponse = resp
            .json()
            .await
            .context("failed to parse model response body")?;

        let text = parsed
            .candidates
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.content)
            .and_then(|c| c.parts)
            .and_then(|p| p.into_iter().next())
            .and_then(|p| p.text)
            .unwrap_or_default();

        Ok(text)
    }
}

#[async_trait]
impl Classifier for GeminiClassifier {
    async fn classify(
        &self,
        email: &Email,
        available_labels: &[Label],
    ) -> Result<Classification> {
        let prompt = build_prompt(email, available_labels);
        let response = self.generate(&prompt).await?;
        debug!(message_id = %email.id, "model response received");
        Ok(parse_response(&response, available_labels))
    }
}

fn build_prompt(email: &Email, available_labels: &[Label]) -> String {
    let label_names: Vec<&str> = available_labels.iter().map(|l| l.name.as_str()).collect();

    format!(
        "Analyze this email and respond with exactly one line per field:\n\
         \n\
         From: {}\n\
         Subject: {}\n\
         Body: {}\n\
         \n\
         Available labels: {}\n\
         \n\
         Summary: <one sentence>\n\
         Action: <REPLY, FORWARD, ARCHIVE, DELETE, FLAG, MARK_IMPORTANT, NONE>\n\
         Category: <URGENT, IMPORTANT, FOLLOW_UP, NEWSLETTER, PROMOTIONAL, SPAM, OTHER>\n\
         Importance: <HIGH, MEDIUM, LOW>\n\
         Confidence: <0-1>\n\
         Label: <one of the available labels, or NONE>\n\
         Response: <suggested reply text if the action is REPLY>",
        email.from,
        email.subject,
        email.body,
        if label_names.is_empty() {
            "(none)".to_string()
        } else {
            label_names.join(", ")
        },
    )
}

/// Tolerant line-by-line recovery of the model's semi-structured output.
/// A missing or malformed field never raises; it falls back to a safe
/// default (NONE / OTHER / LOW / confidence 0 / no label).
fn parse_response(response: &str, available_labels: &[Label]) -> Classification {
    let lines: Vec<&str> = response.lines().collect();
    let field = |keyword: &str| -> Option<&str> {
        lines
            .iter()
            .find(|l| l.to_lowercase().contains(keyword))
            .copied()
    };
    let value_of = |line: &str| -> String {
        line.splitn(2, ':').nth(1).unwrap_or_default().trim().to_string()
    };

    let suggested_label = field("label:").map(|l| value_of(l)).and_then(|name| {
        available_labels
            .iter()
            .find(|l| l.name.eq_ignore_ascii_case(name.trim_matches('"')))
            .cloned()
    });

    Classification {
        summary: field("summary").map(|l| value_of(l)).unwrap_or_default(),
        suggested_action: parse_action(field("action")),
        category: parse_category(field("category")),
        importance: parse_importance(field("importance")),
        confidence: parse_confidence(field("confidence")),
        suggested_response: field("response:").map(|l| value_of(l)).filter(|v| !v.is_empty()),
        suggested_label,
    }
}

fn parse_action(line: Option<&str>) -> EmailAction {
    let Some(line) = line else {
        return EmailAction::None;
    };
    if line.contains("MARK_IMPORTANT") {
        EmailAction::MarkImportant
    } else if line.contains("REPLY") {
        EmailAction::Reply
    } else if line.contains("FORWARD") {
        EmailAction::Forward
    } else if line.contains("ARCHIVE") {
        EmailAction::Archive
    } else if line.contains("DELETE") {
        EmailAction::Delete
    } else if line.contains("FLAG") {
        EmailAction::Flag
    } else {
        EmailAction::None
    }
}

fn parse_category(line: Option<&str>) -> EmailCategory {
    let Some(line) = line else {
        return EmailCategory::Other;
    };
    if line.contains("URGENT") {
        EmailCategory::Urgent
    } else if line.contains("IMPORTANT") {
        EmailCategory::Important
    } else if line.contains("FOLLOW_UP") {
        EmailCategory::FollowUp
    } else if line.contains("NEWSLETTER") {
        EmailCategory::Newsletter
    } else if line.contains("PROMOTIONAL") {
        EmailCategory::Promotional
    } else if line.contains("SPAM") {
        EmailCategory::Spam
    } else {
        EmailCategory::Other
    }
}

fn parse_importance(line: Option<&str>) -> EmailImportance {
    let Some(line) = line else {
        return EmailImportance::Low;
    };
    if line.contains("HIGH") {
        EmailImportance::High
    } else if line.contains("MEDIUM") {
        EmailImportance::Medium
    } else {
        EmailImportance::Low
    }
}

fn parse_confidence(line: Option<&str>) -> f64 {
    let Some(line) = line else { return 0.0 };
    let value = line.splitn(2, ':').nth(1).unwrap_or_default();
    value
        .trim()
        .split_whitespace()
        .next()
        .and_then(|v| v.parse::<f64>().ok())
        .map(|v| v.clamp(0.0, 1.0))
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> Vec<Label> {
        vec![Label {
            id: "Label_1".to_string(),
            name: "Investor Email".to_string(),
            label_type: "user".to_string(),
            color_background: None,
            provider_label_id: Some("Label_1".to_string()),
        }]
    }

    #[test]
    fn parses_well_formed_response() {
        let response = "\
Summary: A term sheet for the seed round.
Action: REPLY
Category: URGENT
Importance: HIGH
Confidence: 0.92
Label: Investor Email
Response: Thanks, reviewing now.";

        let c = parse_response(response, &labels());
        assert_eq!(c.summary, "A term sheet for the seed round.");
        assert_eq!(c.suggested_action, EmailAction::Reply);
        assert_eq!(c.category, EmailCategory::Urgent);
        assert_eq!(c.importance, EmailImportance::High);
        assert!((c.confidence - 0.92).abs() < f64::EPSILON);
        assert_eq!(c.suggested_response.as_deref(), Some("Thanks, reviewing now."));
        assert_eq!(c.suggested_label.unwrap().name, "Investor Email");
    }

    #[test]
    fn malformed_response_falls_back_to_defaults() {
        let c = parse_response("the model rambled with no structure at all", &labels());
        assert_eq!(c.suggested_action, EmailAction::None);
        assert_eq!(c.category, EmailCategory::Other);
        assert_eq!(c.importance, EmailImportance::Low);
        assert_eq!(c.confidence, 0.0);
        assert!(c.suggested_label.is_none());
        assert!(c.suggested_response.is_none());
    }

    #[test]
    fn unknown_label_name_yields_no_label() {
        let c = parse_response("Label: Totally Made Up", &labels());
        assert!(c.suggested_label.is_none());
    }

    #[test]
    fn empty_available_set_yields_no_label() {
        let c = parse_response("Label: Investor Email", &[]);
        assert!(c.suggested_label.is_none());
    }

    #[test]
    fn confidence_is_clamped_and_survives_garbage() {
        assert_eq!(parse_confidence(Some("Confidence: 7")), 1.0);
        assert_eq!(parse_confidence(Some("Confidence: dunno")), 0.0);
        assert_eq!(parse_confidence(None), 0.0);
    }

    #[test]
    fn mark_important_action_is_recognized() {
        assert_eq!(
            parse_action(Some("Action: MARK_IMPORTANT")),
            EmailAction::MarkImportant
        );
    }
}
