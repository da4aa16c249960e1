//! Matching Operators and Automation Rules
//!
//! `MatchOp` backs both prospect selection criteria and personalization
//! rule conditions. Automation rules are declarative; evaluation belongs
//! to the dispatcher or a follow-up consumer, not the rule objects.

use crate::prospect::{Prospect, ProspectStatus};
use crate::TemplateId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Comparison operator over a prospect field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOp {
    Equals,
    /// Case-insensitive substring match.
    Contains,
    /// Numeric comparison; the expected value must be a number.
    GreaterThan,
    /// Membership in an expected array, compared as scalar strings.
    InList,
}

impl MatchOp {
    /// Evaluate `actual <op> expected`. Errors only on a malformed
    /// expected value (non-numeric `GreaterThan` bound, non-array
    /// `InList` operand); a missing or mistyped actual value is simply
    /// a non-match.
    pub fn matches(
        self,
        actual: &serde_json::Value,
        expected: &serde_json::Value,
    ) -> Result<bool, MatchError> {
        match self {
            MatchOp::Equals => Ok(scalar(actual) == scalar(expected)),
            MatchOp::Contains => Ok(scalar(actual)
                .to_lowercase()
                .contains(&scalar(expected).to_lowercase())),
            MatchOp::GreaterThan => {
                let bound = expected
                    .as_f64()
                    .ok_or_else(|| MatchError::NonNumericBound(expected.clone()))?;
                Ok(numeric(actual).map(|n| n > bound).unwrap_or(false))
            }
            MatchOp::InList => {
                let list = expected
                    .as_array()
                    .ok_or_else(|| MatchError::NotAList(expected.clone()))?;
                let needle = scalar(actual);
                Ok(list.iter().any(|v| scalar(v) == needle))
            }
        }
    }
}

/// Malformed operand on the *expected* side of a comparison.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MatchError {
    #[error("greater-than bound is not numeric: {0}")]
    NonNumericBound(serde_json::Value),

    #[error("in-list operand is not an array: {0}")]
    NotAList(serde_json::Value),
}

/// Render a JSON scalar as a bare string for comparison.
fn scalar(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn numeric(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// =============================================================================
// Automation Rules
// =============================================================================

/// Declarative automation attached to a campaign.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutomationRules {
    pub follow_ups: Vec<FollowUpTrigger>,
    pub engagement: Vec<EngagementRule>,
    pub escalations: Vec<EscalationRule>,
    pub qualification: Vec<QualificationRule>,
}

/// Re-engage a prospect after a delay, keyed on how they responded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUpTrigger {
    pub after: ResponseKind,
    pub delay_hours: u32,
    /// Template to use for the follow-up touch, if different.
    pub next_template: Option<TemplateId>,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    NoResponse,
    Replied,
    Bounced,
}

/// Inbound content pattern to action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementRule {
    /// Case-insensitive substring matched against inbound content.
    pub pattern: String,
    pub action: EngagementAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngagementAction {
    MarkResponded,
    Escalate { to: String },
    Unsubscribe,
    Tag { tag: String },
}

impl EngagementRule {
    pub fn matches(&self, inbound_content: &str) -> bool {
        inbound_content
            .to_lowercase()
            .contains(&self.pattern.to_lowercase())
    }
}

/// SLA breach to human handoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRule {
    pub sla_hours: u32,
    pub escalate_to: String,
}

/// Threshold-based status promotion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualificationRule {
    pub min_score: f32,
    pub min_engagements: u32,
    pub target_status: ProspectStatus,
}

impl AutomationRules {
    /// Follow-up triggers currently due for a prospect. Pure; the caller
    /// decides what to do with them.
    pub fn due_follow_ups(&self, prospect: &Prospect, now: DateTime<Utc>) -> Vec<&FollowUpTrigger> {
        let Some(contacted) = prospect.last_contacted_at else {
            return Vec::new();
        };
        let kind = match prospect.status {
            ProspectStatus::Contacted if prospect.responses.is_empty() => ResponseKind::NoResponse,
            ProspectStatus::Responded => ResponseKind::Replied,
            ProspectStatus::Bounced => ResponseKind::Bounced,
            _ => return Vec::new(),
        };
        self.follow_ups
            .iter()
            .filter(|t| t.after == kind && now >= contacted + Duration::hours(t.delay_hours as i64))
            .collect()
    }

    /// First qualification rule the prospect satisfies, if any.
    pub fn qualifies(&self, prospect: &Prospect) -> Option<ProspectStatus> {
        let score = prospect.relevance_score.unwrap_or(0.0);
        let engagements = prospect.responses.len() as u32;
        self.qualification
            .iter()
            .find(|r| score >= r.min_score && engagements >= r.min_engagements)
            .map(|r| r.target_status)
    }
}
