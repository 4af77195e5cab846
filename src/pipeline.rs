use crate::ai::Classifier;
use crate::automation::AutomationEngine;
use crate::gmail::Mailbox;
use crate::labels::LabelRegistry;
use crate::models::{Email, Label};
use regex::Regex;
use tracing::{debug, warn};

pub const INVESTOR_LABEL: &str = "Investor Email";
pub const NEEDS_ACTION_LABEL: &str = "Needs Action";

/// Provider-reserved labels, excluded from the "has the user already
/// labeled this" check. Gmail stamps every categorized message with a
/// CATEGORY_* id, so the whole prefix counts as system.
const SYSTEM_LABELS: [&str; 7] = [
    "INBOX",
    "SENT",
    "IMPORTANT",
    "UNREAD",
    "DRAFT",
    "SPAM",
    "TRASH",
];

pub fn is_system_label(id: &str) -> bool {
    SYSTEM_LABELS.contains(&id) || id.starts_with("CATEGORY_")
}

/// Escalation vocabularies, compiled once and evaluated over
/// subject + body + sender independently of the classifier.
pub struct Heuristics {
    automated_sender: Regex,
    investor: Regex,
    action_needed: Regex,
}

impl Heuristics {
    pub fn new() -> Self {
        Self {
            automated_sender: Regex::new(
                r"(?i)\b(no-?reply|automated|notifications?|alerts?|system)@",
            )
            .unwrap(),
            investor: Regex::new(
                r"(?i)\b(investors?|investments?|funding|fundrais\w+|venture|vc\b|cap table|term sheet|series [a-c]\b|seed round|pitch deck|valuation|sequoia|a16z|andreessen horowitz|accel|benchmark capital|lightspeed|greylock)",
            )
            .unwrap(),
            action_needed: Regex::new(
                r"(?i)\b(urgent|asap|deadline|action (required|needed)|please (respond|reply|review|confirm|advise)|respond by|reply by|due (today|tomorrow)|end of day|eod\b|time[- ]sensitive|overdue|waiting on you)",
            )
            .unwrap(),
        }
    }

    pub fn is_automated_sender(&self, from: &str) -> bool {
        self.automated_sender.is_match(from)
    }

    pub fn looks_investor_related(&self, email: &Email) -> bool {
        self.investor.is_match(&email.subject)
            || self.investor.is_match(&email.body)
            || self.investor.is_match(&email.from)
    }

    pub fn needs_action(&self, email: &Email) -> bool {
        if self.action_needed.is_match(&email.subject)
            || self.action_needed.is_match(&email.body)
        {
            return true;
        }
        // An open question in the subject or the first few lines usually
        // means the sender expects an answer.
        email.subject.contains('?')
            || email.body.lines().take(5).any(|line| line.contains('?'))
    }
}

/// The per-message decision sequence:
/// FETCHED -> (SKIP_ANALYSIS | ANALYZE) -> LABELED? -> AUTOMATION_CHECKED -> DONE.
/// Any single label-apply or automation failure is logged and the rest of
/// the message still runs.
pub struct Pipeline<C: Classifier> {
    classifier: C,
    pub registry: LabelRegistry,
    pub automations: AutomationEngine,
    heuristics: Heuristics,
    my_name: String,
}

impl<C: Classifier> Pipeline<C> {
    pub fn new(
        classifier: C,
        registry: LabelRegistry,
        automations: AutomationEngine,
        my_name: String,
    ) -> Self {
        Self {
            classifier,
            registry,
            automations,
            heuristics: Heuristics::new(),
            my_name,
        }
    }

    /// Analysis gate: anything the user already labeled, or mail from an
    /// automated sender, passes through untouched.
    pub fn should_skip(&self, email: &Email) -> bool {
        let user_labeled = email
            .provider_label_ids
            .iter()
            .any(|id| !is_system_label(id));
        user_labeled || self.heuristics.is_automated_sender(&email.from)
    }

    pub async fn process<M: Mailbox>(&mut self, mailbox: &M, email: &mut Email) {
        if self.should_skip(email) {
            debug!(message_id = %email.id, from = %email.from, "skipping analysis");
            return;
        }

        let mut suggested_label = None;
        match self
            .classifier
            .classify(email, &self.registry.user_labels())
            .await
        {
            Ok(result) => {
                debug!(
                    message_id = %email.id,
                    category = ?result.category,
                    confidence = result.confidence,
                    "message classified"
                );
                email.category = Some(result.category);
                email.importance = result.importance;
                email.ai_summary = Some(result.summary).filter(|s| !s.is_empty());
                email.suggested_action = Some(result.suggested_action);
                email.suggested_response = result.suggested_response;
                suggested_label = result.suggested_label;
            }
            Err(err) => {
                // Heuristic escalation below does not depend on the model.
                warn!(message_id = %email.id, error = %err, "classification failed");
            }
        }

        if self.heuristics.looks_investor_related(email) {
            self.apply_named_label(mailbox, email, INVESTOR_LABEL).await;
        }
        if self.heuristics.needs_action(email) {
            self.apply_named_label(mailbox, email, NEEDS_ACTION_LABEL)
                .await;
        }
        if let Some(label) = suggested_label {
            self.apply_label(mailbox, email, label).await;
        }

        email.handled = true;
    }

    async fn apply_named_label<M: Mailbox>(&mut self, mailbox: &M, email: &mut Email, name: &str) {
        let label = match self.registry.ensure(mailbox, name).await {
            Ok(label) => label,
            Err(err) => {
                warn!(message_id = %email.id, label = name, error = %err, "label lookup failed");
                return;
            }
        };
        self.apply_label(mailbox, email, label).await;
    }

    /// Applies the label remotely and, on success, records it locally (set
    /// semantics) and runs the automation check for it, so one message can
    /// trigger several automation checks within one pass, one per label.
    async fn apply_label<M: Mailbox>(&mut self, mailbox: &M, email: &mut Email, label: Label) {
        if email.labels.iter().any(|l| l.id == label.id) {
            return;
        }
        let Some(provider_id) = label.provider_label_id.clone() else {
            warn!(label = %label.name, "label has no provider id, cannot apply");
            return;
        };

        if let Err(err) = mailbox.add_label(&email.id, &provider_id).await {
            warn!(message_id = %email.id, label = %label.name, error = %err, "label apply failed");
            return;
        }

        email.labels.push(label.clone());
        if !email.provider_label_ids.contains(&provider_id) {
            email.provider_label_ids.push(provider_id);
        }

        if let Some(rule) = self.automations.match_rule(&label.id) {
            if let Err(err) = self
                .automations
                .execute(rule, mailbox, email, &self.my_name)
                .await
            {
                warn!(
                    message_id = %email.id,
                    rule_id = %rule.id,
                    error = %err,
                    "automation failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::MailError;
    use crate::models::{
        AutomationRule, Classification, EmailAction, EmailCategory, EmailImportance,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    type CallLog = Arc<Mutex<Vec<String>>>;

    struct MockMailbox {
        log: CallLog,
        next_label: AtomicUsize,
        fail_add_label: bool,
    }

    impl MockMailbox {
        fn new(log: CallLog) -> Self {
            Self {
                log,
                next_label: AtomicUsize::new(1),
                fail_add_label: false,
            }
        }
    }

    #[async_trait]
    impl Mailbox for MockMailbox {
        async fn list_recent_inbox(
            &self,
            _cutoff: chrono::DateTime<Utc>,
            _max_results: u32,
        ) -> Result<Vec<String>, MailError> {
            Ok(Vec::new())
        }

        async fn get_message(&self, _id: &str) -> Result<Email, MailError> {
            Err(MailError::Api("not used".to_string()))
        }

        async fn add_label(&self, message_id: &str, label_id: &str) -> Result<(), MailError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("add_label:{}:{}", message_id, label_id));
            if self.fail_add_label {
                return Err(MailError::Api("simulated failure".to_string()));
            }
            Ok(())
        }

        async fn list_labels(&self) -> Result<Vec<Label>, MailError> {
            Ok(Vec::new())
        }

        async fn create_label(&self, name: &str) -> Result<Label, MailError> {
            let n = self.next_label.fetch_add(1, Ordering::SeqCst);
            let id = format!("Label_{}", n);
            self.log
                .lock()
                .unwrap()
                .push(format!("create_label:{}", name));
            Ok(Label {
                id: id.clone(),
                name: name.to_string(),
                label_type: "user".to_string(),
                color_background: None,
                provider_label_id: Some(id),
            })
        }

        async fn create_draft(
            &self,
            thread_id: &str,
            _to: &str,
            _subject: &str,
            body: &str,
        ) -> Result<String, MailError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("draft:{}:{}", thread_id, body));
            Ok("draft-1".to_string())
        }
    }

    struct MockClassifier {
        log: CallLog,
        fail: bool,
        suggested_label: Option<Label>,
    }

    #[async_trait]
    impl Classifier for MockClassifier {
        async fn classify(
            &self,
            _email: &Email,
            _available_labels: &[Label],
        ) -> anyhow::Result<Classification> {
            self.log.lock().unwrap().push("classify".to_string());
            if self.fail {
                anyhow::bail!("model unreachable");
            }
            Ok(Classification {
                summary: "a summary".to_string(),
                suggested_action: EmailAction::None,
                category: EmailCategory::Other,
                importance: EmailImportance::Medium,
                confidence: 0.5,
                suggested_response: None,
                suggested_label: self.suggested_label.clone(),
            })
        }
    }

    fn email(from: &str, subject: &str, body: &str) -> Email {
        Email {
            id: "msg1".to_string(),
            thread_id: "thread1".to_string(),
            from: from.to_string(),
            to: vec!["me@example.com".to_string()],
            subject: subject.to_string(),
            body: body.to_string(),
            timestamp: Utc::now(),
            read: false,
            provider_label_ids: vec![
                "INBOX".to_string(),
                "UNREAD".to_string(),
                "CATEGORY_PERSONAL".to_string(),
            ],
            labels: Vec::new(),
            category: None,
            importance: EmailImportance::Medium,
            ai_summary: None,
            suggested_action: None,
            suggested_response: None,
            handled: false,
        }
    }

    fn user_label(id: &str, name: &str) -> Label {
        Label {
            id: id.to_string(),
            name: name.to_string(),
            label_type: "user".to_string(),
            color_background: None,
            provider_label_id: Some(id.to_string()),
        }
    }

    fn pipeline(
        log: &CallLog,
        fail_classifier: bool,
        suggested_label: Option<Label>,
    ) -> Pipeline<MockClassifier> {
        Pipeline::new(
            MockClassifier {
                log: log.clone(),
                fail: fail_classifier,
                suggested_label,
            },
            LabelRegistry::new(),
            AutomationEngine::new(),
            "Ada".to_string(),
        )
    }

    #[tokio::test]
    async fn automated_sender_skips_analysis_and_applies_nothing() {
        let log: CallLog = Default::default();
        let mailbox = MockMailbox::new(log.clone());
        let mut p = pipeline(&log, false, None);

        let mut msg = email("no-reply@billing.example.com", "Your invoice", "Total: $5");
        p.process(&mailbox, &mut msg).await;

        assert!(log.lock().unwrap().is_empty());
        assert!(msg.labels.is_empty());
        assert!(!msg.handled);
    }

    #[tokio::test]
    async fn already_user_labeled_message_is_never_classified() {
        let log: CallLog = Default::default();
        let mailbox = MockMailbox::new(log.clone());
        let mut p = pipeline(&log, false, None);

        let mut msg = email("bob@example.com", "hello", "catching up");
        msg.provider_label_ids.push("Label_7".to_string());
        p.process(&mailbox, &mut msg).await;

        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn investor_subject_applies_label_exactly_once() {
        let log: CallLog = Default::default();
        let mailbox = MockMailbox::new(log.clone());
        let mut p = pipeline(&log, false, None);

        let mut msg = email(
            "alice@fund.example.com",
            "Term sheet attached — Series A",
            "See the attached term sheet.",
        );
        p.process(&mailbox, &mut msg).await;

        let calls = log.lock().unwrap().clone();
        assert_eq!(calls[0], "classify");
        let applies: Vec<_> = calls.iter().filter(|c| c.starts_with("add_label:")).collect();
        assert_eq!(applies.len(), 1);
        assert!(msg.labels.iter().any(|l| l.name == INVESTOR_LABEL));
        assert!(msg.handled);
    }

    #[tokio::test]
    async fn classification_runs_before_any_automation_check() {
        let log: CallLog = Default::default();
        let mailbox = MockMailbox::new(log.clone());
        let investor = user_label("Label_10", INVESTOR_LABEL);

        let mut p = pipeline(&log, false, None);
        p.automations.set_rules(vec![AutomationRule {
            id: "r1".to_string(),
            label: investor.clone(),
            action: EmailAction::Reply,
            enabled: true,
            template: Some("Hi {sender_name}, {my_name} will review.".to_string()),
        }]);

        let mut msg = email("alice@example.com", "Our seed round", "Funding update");
        p.process(&mailbox, &mut msg).await;

        let calls = log.lock().unwrap().clone();
        assert_eq!(calls[0], "classify");
        // create_label happens because the registry had no Investor Email
        // entry; the freshly created label gets a new id, so the rule for
        // Label_10 must not fire for it.
        assert!(calls.iter().any(|c| c.starts_with("add_label:")));
        assert!(!calls.iter().any(|c| c.starts_with("draft:")));
    }

    #[tokio::test]
    async fn automation_draft_fires_after_label_apply() {
        let log: CallLog = Default::default();
        let mailbox = MockMailbox::new(log.clone());
        let investor = user_label("Label_1", INVESTOR_LABEL);

        let mut p = pipeline(&log, false, None);
        // Registry already knows the label, as after a startup refresh.
        p.registry.seed(vec![investor.clone()]);
        p.automations.set_rules(vec![AutomationRule {
            id: "r1".to_string(),
            label: investor,
            action: EmailAction::Reply,
            enabled: true,
            template: Some("Hi {sender_name}, {my_name} will review.".to_string()),
        }]);

        let mut msg = email("Bob Fund <bob@fund.example.com>", "Series A term sheet", "attached");
        p.process(&mailbox, &mut msg).await;

        let calls = log.lock().unwrap().clone();
        let order: Vec<&str> = calls
            .iter()
            .map(|c| c.split(':').next().unwrap())
            .collect();
        assert_eq!(order, vec!["classify", "add_label", "draft"]);
        assert!(calls[2].contains("Hi Bob Fund, Ada will review."));
    }

    #[tokio::test]
    async fn suggested_label_matching_applied_label_is_not_duplicated() {
        let log: CallLog = Default::default();
        let mailbox = MockMailbox::new(log.clone());
        let investor = user_label("Label_1", INVESTOR_LABEL);

        let mut p = pipeline(&log, false, Some(investor.clone()));
        p.registry.seed(vec![investor]);

        // Investor heuristic fires and the classifier suggests the same label.
        let mut msg = email("alice@example.com", "Cap table question", "see below");
        p.process(&mailbox, &mut msg).await;

        let applies = log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with("add_label:"))
            .count();
        assert_eq!(applies, 1);
        assert_eq!(msg.labels.len(), 1);
    }

    #[tokio::test]
    async fn label_apply_failure_does_not_abort_remaining_heuristics() {
        let log: CallLog = Default::default();
        let mut mailbox = MockMailbox::new(log.clone());
        mailbox.fail_add_label = true;
        let mut p = pipeline(&log, false, None);

        // Matches both the investor and needs-action vocabularies.
        let mut msg = email(
            "alice@example.com",
            "Urgent: term sheet deadline",
            "please respond",
        );
        p.process(&mailbox, &mut msg).await;

        let applies = log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with("add_label:"))
            .count();
        assert_eq!(applies, 2);
        assert!(msg.labels.is_empty());
        assert!(msg.handled);
    }

    #[tokio::test]
    async fn classifier_failure_still_runs_heuristic_escalation() {
        let log: CallLog = Default::default();
        let mailbox = MockMailbox::new(log.clone());
        let mut p = pipeline(&log, true, None);

        let mut msg = email("alice@example.com", "Fundraising intro", "venture fund");
        p.process(&mailbox, &mut msg).await;

        assert!(msg.ai_summary.is_none());
        assert!(msg.category.is_none());
        assert!(msg.labels.iter().any(|l| l.name == INVESTOR_LABEL));
    }

    #[test]
    fn question_mark_in_first_lines_needs_action() {
        let h = Heuristics::new();
        let msg = email("b@x.com", "plans", "Are you coming on Friday?\nthanks");
        assert!(h.needs_action(&msg));

        let deep = format!("{}\ncan you check?", "line\n".repeat(6));
        let msg = email("b@x.com", "plans", &deep);
        assert!(!h.needs_action(&msg));
    }

    #[test]
    fn system_label_set_includes_categories() {
        assert!(is_system_label("INBOX"));
        assert!(is_system_label("CATEGORY_PROMOTIONS"));
        assert!(!is_system_label("Label_12"));
    }
}
