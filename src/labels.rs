use crate::gmail::{MailError, Mailbox};
use crate::models::Label;
use tracing::info;

/// Cache of the labels available for classification and automation
/// matching, keyed both ways between local records and provider ids.
pub struct LabelRegistry {
    labels: Vec<Label>,
}

impl LabelRegistry {
    pub fn new() -> Self {
        Self { labels: Vec::new() }
    }

    /// Replaces the cache with the provider's current label list.
    pub async fn refresh<M: Mailbox>(&mut self, mailbox: &M) -> Result<(), MailError> {
        self.labels = mailbox.list_labels().await?;
        info!(count = self.labels.len(), "label registry refreshed");
        Ok(())
    }

    pub fn all(&self) -> &[Label] {
        &self.labels
    }

    /// Preloads the cache without a provider round-trip.
    #[cfg(test)]
    pub(crate) fn seed(&mut self, labels: Vec<Label>) {
        self.labels = labels;
    }

    /// User labels only, the set offered to the classifier.
    pub fn user_labels(&self) -> Vec<Label> {
        self.labels
            .iter()
            .filter(|l| l.label_type == "user")
            .cloned()
            .collect()
    }

    pub fn find_by_provider_id(&self, provider_id: &str) -> Option<&Label> {
        self.labels
            .iter()
            .find(|l| l.provider_label_id.as_deref() == Some(provider_id))
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Label> {
        self.labels.iter().find(|l| l.name.eq_ignore_ascii_case(name))
    }

    /// Resolves raw provider ids to registry entries. Ids with no known
    /// mapping are dropped; order of first match is preserved.
    pub fn map_provider_ids(&self, ids: &[String]) -> Vec<Label> {
        ids.iter()
            .filter_map(|id| self.find_by_provider_id(id))
            .cloned()
            .collect()
    }

    /// Creates the label remotely and caches it once the provider-assigned
    /// id has round-tripped. Calling twice with the same name creates two
    /// provider-side labels; idempotency is `ensure`'s job.
    pub async fn create<M: Mailbox>(
        &mut self,
        mailbox: &M,
        name: &str,
    ) -> Result<Label, MailError> {
        let label = mailbox.create_label(name).await?;
        info!(name = %label.name, provider_id = ?label.provider_label_id, "label created");
        self.labels.push(label.clone());
        Ok(label)
    }

    /// Find-by-name or create. Used for the escalation labels and for
    /// labels named in automation config.
    pub async fn ensure<M: Mailbox>(
        &mut self,
        mailbox: &M,
        name: &str,
    ) -> Result<Label, MailError> {
        if let Some(label) = self.find_by_name(name) {
            return Ok(label.clone());
        }
        self.create(mailbox, name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(id: &str, name: &str) -> Label {
        Label {
            id: id.to_string(),
            name: name.to_string(),
            label_type: "user".to_string(),
            color_background: None,
            provider_label_id: Some(id.to_string()),
        }
    }

    fn registry() -> LabelRegistry {
        LabelRegistry {
            labels: vec![
                label("Label_1", "Investor Email"),
                label("Label_2", "Needs Action"),
            ],
        }
    }

    #[test]
    fn maps_known_ids_in_order_and_drops_unknown() {
        let reg = registry();
        let mapped = reg.map_provider_ids(&[
            "Label_2".to_string(),
            "Label_9".to_string(),
            "Label_1".to_string(),
        ]);
        let names: Vec<_> = mapped.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["Needs Action", "Investor Email"]);
    }

    #[test]
    fn finds_by_name_case_insensitively() {
        let reg = registry();
        assert!(reg.find_by_name("investor email").is_some());
        assert!(reg.find_by_name("Billing").is_none());
    }
}
