//! Campaign Prospects
//!
//! A prospect belongs to exactly one campaign. Status moves forward only;
//! once a human has replied there is no regression back to `Contacted`.

use crate::channel::Channel;
use crate::{OutreachError, ProspectId, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One contactable person inside a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prospect {
    pub id: ProspectId,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub company: Option<String>,
    pub job_title: Option<String>,
    pub preferred_channel: Channel,
    /// Open-ended attributes used by personalization and selection.
    pub custom_fields: HashMap<String, serde_json::Value>,
    pub status: ProspectStatus,
    pub last_contacted_at: Option<DateTime<Utc>>,
    /// Ordered inbound response history.
    pub responses: Vec<ProspectResponse>,
    /// Optional AI relevance score in `[0, 100]`.
    pub relevance_score: Option<f32>,
}

impl Prospect {
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        preferred_channel: Channel,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            email: None,
            phone: None,
            first_name: first_name.into(),
            last_name: last_name.into(),
            company: None,
            job_title: None,
            preferred_channel,
            custom_fields: HashMap::new(),
            status: ProspectStatus::New,
            last_contacted_at: None,
            responses: Vec::new(),
            relevance_score: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    pub fn with_custom_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.custom_fields.insert(key.into(), value);
        self
    }

    /// Resolve a field by name: built-in contact fields first, then custom
    /// fields. Used by selection criteria and personalization.
    pub fn field(&self, name: &str) -> Option<serde_json::Value> {
        let builtin = match name {
            "first_name" => Some(self.first_name.clone()),
            "last_name" => Some(self.last_name.clone()),
            "full_name" => Some(format!("{} {}", self.first_name, self.last_name)),
            "email" => self.email.clone(),
            "phone" => self.phone.clone(),
            "company" | "company_name" => self.company.clone(),
            "job_title" => self.job_title.clone(),
            "status" => Some(format!("{:?}", self.status).to_lowercase()),
            _ => None,
        };
        if let Some(v) = builtin {
            return Some(serde_json::Value::String(v));
        }
        self.custom_fields.get(name).cloned()
    }

    /// Validated forward-only status transition.
    pub fn advance_to(&mut self, to: ProspectStatus) -> Result<()> {
        if self.status.can_advance_to(to) {
            self.status = to;
            Ok(())
        } else {
            Err(OutreachError::ConfigError(format!(
                "illegal prospect transition {:?} -> {:?}",
                self.status, to
            )))
        }
    }

    /// Record a successful outbound contact. Only a `New` prospect changes
    /// status; later states keep their status but refresh the timestamp.
    pub fn mark_contacted(&mut self, at: DateTime<Utc>) {
        self.last_contacted_at = Some(at);
        if self.status == ProspectStatus::New {
            self.status = ProspectStatus::Contacted;
        }
    }
}

/// Prospect funnel state. Monotonic: `new -> contacted -> responded ->
/// qualified -> lead -> customer`, with `bounced` a terminal branch off
/// `contacted` and `unsubscribed` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProspectStatus {
    #[default]
    New,
    Contacted,
    Responded,
    Bounced,
    Qualified,
    Lead,
    Customer,
    Unsubscribed,
}

impl ProspectStatus {
    pub fn can_advance_to(self, to: ProspectStatus) -> bool {
        use ProspectStatus::*;
        if self == to {
            return false;
        }
        match (self, to) {
            // Unsubscribe is always honoured, except past terminal states.
            (Customer | Unsubscribed | Bounced, Unsubscribed) => false,
            (_, Unsubscribed) => true,
            (New, Contacted) => true,
            (Contacted, Responded) | (Contacted, Bounced) => true,
            (Responded, Qualified) => true,
            (Qualified, Lead) => true,
            (Lead, Customer) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProspectStatus::Customer | ProspectStatus::Unsubscribed | ProspectStatus::Bounced
        )
    }
}

/// One inbound reply from a prospect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProspectResponse {
    pub at: DateTime<Utc>,
    pub channel: Channel,
    pub content: String,
    /// Upstream sentiment label, when the enrichment pipeline supplied one.
    pub sentiment: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        let mut p = Prospect::new("Asha", "Rao", Channel::Email);
        p.advance_to(ProspectStatus::Contacted).unwrap();
        p.advance_to(ProspectStatus::Responded).unwrap();
        p.advance_to(ProspectStatus::Qualified).unwrap();
        p.advance_to(ProspectStatus::Lead).unwrap();
        p.advance_to(ProspectStatus::Customer).unwrap();
    }

    #[test]
    fn test_no_regression_after_response() {
        let mut p = Prospect::new("Asha", "Rao", Channel::Email);
        p.status = ProspectStatus::Responded;
        assert!(p.advance_to(ProspectStatus::Contacted).is_err());
        assert_eq!(p.status, ProspectStatus::Responded);
    }

    #[test]
    fn test_unsubscribe_from_any_live_state() {
        for status in [
            ProspectStatus::New,
            ProspectStatus::Contacted,
            ProspectStatus::Responded,
            ProspectStatus::Qualified,
            ProspectStatus::Lead,
        ] {
            assert!(status.can_advance_to(ProspectStatus::Unsubscribed));
        }
        assert!(!ProspectStatus::Customer.can_advance_to(ProspectStatus::Unsubscribed));
    }

    #[test]
    fn test_mark_contacted_does_not_regress() {
        let mut p = Prospect::new("Asha", "Rao", Channel::Email);
        p.status = ProspectStatus::Responded;
        let now = Utc::now();
        p.mark_contacted(now);
        assert_eq!(p.status, ProspectStatus::Responded);
        assert_eq!(p.last_contacted_at, Some(now));
    }

    #[test]
    fn test_field_resolution() {
        let p = Prospect::new("Asha", "Rao", Channel::Email)
            .with_company("Acme Robotics")
            .with_custom_field("industry", serde_json::json!("saas"));
        assert_eq!(
            p.field("company_name"),
            Some(serde_json::json!("Acme Robotics"))
        );
        assert_eq!(p.field("full_name"), Some(serde_json::json!("Asha Rao")));
        assert_eq!(p.field("industry"), Some(serde_json::json!("saas")));
        assert_eq!(p.field("missing"), None);
    }
}
