use crate::gmail::{MailError, Mailbox};
use crate::models::{AutomationRule, Email, EmailAction};
use regex::Regex;
use std::collections::HashMap;
use tracing::{debug, info};

/// The working set of user automations: label -> follow-up action.
/// At most one rule is kept per label; a later rule for the same label
/// replaces the earlier one. Matching is by label id, since display names
/// are not guaranteed unique.
pub struct AutomationEngine {
    rules: Vec<AutomationRule>,
    template_var: Regex,
}

impl AutomationEngine {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            template_var: Regex::new(r"\{([a-z_]+)\}").unwrap(),
        }
    }

    /// Replaces the whole working set, deduplicating per label id with the
    /// last rule winning.
    pub fn set_rules(&mut self, rules: Vec<AutomationRule>) {
        self.rules.clear();
        for rule in rules {
            self.add_rule(rule);
        }
    }

    pub fn add_rule(&mut self, rule: AutomationRule) {
        self.rules.retain(|r| r.label.id != rule.label.id);
        self.rules.push(rule);
    }

    pub fn rules(&self) -> &[AutomationRule] {
        &self.rules
    }

    /// The enabled rule for this label, if any. Never ambiguous: the set
    /// holds at most one rule per label.
    pub fn match_rule(&self, label_id: &str) -> Option<&AutomationRule> {
        self.rules
            .iter()
            .find(|r| r.enabled && r.label.id == label_id)
    }

    /// Runs one rule against one message. REPLY creates a draft threaded to
    /// the original, never a sent message. Unknown actions are no-ops.
    pub async fn execute<M: Mailbox>(
        &self,
        rule: &AutomationRule,
        mailbox: &M,
        email: &Email,
        my_name: &str,
    ) -> Result<(), MailError> {
        match rule.action {
            EmailAction::Reply => {
                let vars = template_vars(email, my_name);
                let body = self.render(rule.template.as_deref().unwrap_or_default(), &vars);
                let subject = reply_subject(&email.subject);
                let draft_id = mailbox
                    .create_draft(&email.thread_id, &email.from, &subject, &body)
                    .await?;
                info!(
                    rule_id = %rule.id,
                    message_id = %email.id,
                    draft_id = %draft_id,
                    "automation drafted reply"
                );
            }
            EmailAction::MarkImportant => {
                mailbox.add_label(&email.id, "IMPORTANT").await?;
                info!(rule_id = %rule.id, message_id = %email.id, "automation marked important");
            }
            other => {
                debug!(rule_id = %rule.id, action = ?other, "automation action is a no-op");
            }
        }
        Ok(())
    }

    /// Simple non-nested substitution: every `{placeholder}` is replaced
    /// globally; placeholders with no matching variable render as empty.
    pub fn render(&self, template: &str, vars: &HashMap<&str, String>) -> String {
        self.template_var
            .replace_all(template, |caps: &regex::Captures| {
                vars.get(&caps[1]).cloned().unwrap_or_default()
            })
            .into_owned()
    }
}

fn template_vars<'a>(email: &Email, my_name: &str) -> HashMap<&'a str, String> {
    let mut vars = HashMap::new();
    vars.insert("sender_name", sender_name(&email.from));
    vars.insert("email_subject", email.subject.clone());
    vars.insert(
        "ai_response",
        email
            .suggested_response
            .clone()
            .or_else(|| email.ai_summary.clone())
            .unwrap_or_default(),
    );
    vars.insert("my_name", my_name.to_string());
    vars
}

/// Display name from a From header, falling back to the address local part.
fn sender_name(from: &str) -> String {
    let display = from.split('<').next().unwrap_or_default().trim();
    let display = display.trim_matches('"').trim();
    if !display.is_empty() && !display.contains('@') {
        return display.to_string();
    }
    from.trim_matches(|c| c == '<' || c == '>')
        .split('@')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn reply_subject(subject: &str) -> String {
    if subject.to_lowercase().starts_with("re:") {
        subject.to_string()
    } else {
        format!("Re: {}", subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Label;

    fn label(id: &str, name: &str) -> Label {
        Label {
            id: id.to_string(),
            name: name.to_string(),
            label_type: "user".to_string(),
            color_background: None,
            provider_label_id: Some(id.to_string()),
        }
    }

    fn rule(id: &str, label_id: &str, enabled: bool) -> AutomationRule {
        AutomationRule {
            id: id.to_string(),
            label: label(label_id, label_id),
            action: EmailAction::Reply,
            enabled,
            template: None,
        }
    }

    #[test]
    fn renders_known_variables() {
        let engine = AutomationEngine::new();
        let mut vars = HashMap::new();
        vars.insert("sender_name", "Bob".to_string());
        vars.insert("email_subject", "Invoice".to_string());
        assert_eq!(
            engine.render("Hi {sender_name}, re {email_subject}", &vars),
            "Hi Bob, re Invoice"
        );
    }

    #[test]
    fn unknown_placeholders_render_empty() {
        let engine = AutomationEngine::new();
        let vars = HashMap::new();
        assert_eq!(engine.render("Hello {nobody}!", &vars), "Hello !");
    }

    #[test]
    fn placeholders_replace_globally() {
        let engine = AutomationEngine::new();
        let mut vars = HashMap::new();
        vars.insert("my_name", "Ada".to_string());
        assert_eq!(
            engine.render("{my_name} here. -- {my_name}", &vars),
            "Ada here. -- Ada"
        );
    }

    #[test]
    fn later_rule_replaces_earlier_for_same_label() {
        let mut engine = AutomationEngine::new();
        engine.set_rules(vec![rule("r1", "Label_1", true), rule("r2", "Label_1", true)]);
        assert_eq!(engine.rules().len(), 1);
        assert_eq!(engine.match_rule("Label_1").unwrap().id, "r2");
    }

    #[test]
    fn disabled_rules_never_match() {
        let mut engine = AutomationEngine::new();
        engine.set_rules(vec![rule("r1", "Label_1", false)]);
        assert!(engine.match_rule("Label_1").is_none());
    }

    #[test]
    fn match_is_by_label_id() {
        let mut engine = AutomationEngine::new();
        engine.set_rules(vec![rule("r1", "Label_1", true)]);
        assert!(engine.match_rule("Label_2").is_none());
        assert_eq!(engine.match_rule("Label_1").unwrap().id, "r1");
    }

    #[test]
    fn sender_name_prefers_display_name() {
        assert_eq!(sender_name("Bob Example <bob@example.com>"), "Bob Example");
        assert_eq!(sender_name("\"Carol\" <carol@example.com>"), "Carol");
        assert_eq!(sender_name("dave@example.com"), "dave");
    }

    #[test]
    fn reply_subject_is_not_double_prefixed() {
        assert_eq!(reply_subject("Re: hello"), "Re: hello");
        assert_eq!(reply_subject("hello"), "Re: hello");
    }
}
