//! LeadReach Outreach Campaign Automation Engine
//!
//! Multi-channel outreach automation: campaign lifecycle, compliance
//! gating, template personalization, throttled batch dispatch, and
//! timezone-aware scheduling.
//!
//! # Architecture
//! ```text
//! CampaignManager::create_campaign
//!        │
//!        ▼
//! ComplianceValidator ── reject ──▶ OutreachError::Compliance
//!        │
//!        ▼
//! CampaignStore ──▶ CampaignScheduler (timer per campaign)
//!                          │ fires
//!                          ▼
//!              CampaignManager::execute_campaign
//!                          │
//!                          ▼
//!                  CampaignExecution
//!            filter ▶ group by channel ▶ batch
//!                          │
//!          PersonalizationEngine ▶ ChannelAdapter
//!                          │
//!                          ▼
//!           CampaignMetrics ▶ OutreachPerformanceTracker
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod channel;
pub mod compliance;
pub mod execution;
pub mod manager;
pub mod personalization;
pub mod prospect;
pub mod rules;
pub mod scheduler;
pub mod store;
pub mod template;
pub mod tracker;

pub use channel::{Channel, ChannelAdapter, ChannelRegistry, ThrottleConfig};
pub use compliance::{ComplianceReport, ComplianceValidator};
pub use execution::{CampaignExecution, ExecutionReport, RunState};
pub use manager::CampaignManager;
pub use personalization::PersonalizationEngine;
pub use prospect::{Prospect, ProspectStatus};
pub use rules::{AutomationRules, MatchOp};
pub use scheduler::{CampaignScheduler, Clock, SendSchedule, SystemClock};
pub use store::{CampaignStore, InMemoryCampaignStore};
pub use template::MessageTemplate;
pub use tracker::OutreachPerformanceTracker;

// =============================================================================
// Core Types
// =============================================================================

/// Unique campaign identifier
pub type CampaignId = String;
/// Owning customer identifier
pub type CustomerId = String;
/// Prospect identifier
pub type ProspectId = String;
/// Message template identifier
pub type TemplateId = String;
/// Single execution run identifier
pub type RunId = String;

/// A configured, schedulable outreach effort targeting a set of prospects
/// over one or more channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub customer_id: CustomerId,
    pub name: String,
    pub primary_channel: Channel,
    pub status: CampaignStatus,
    pub config: CampaignConfig,
    pub templates: Vec<MessageTemplate>,
    pub prospects: Vec<Prospect>,
    pub automation: AutomationRules,
    pub metrics: CampaignMetrics,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Template configured for a channel, if any.
    pub fn template_for(&self, channel: Channel) -> Option<&MessageTemplate> {
        self.templates.iter().find(|t| t.channel == channel)
    }

    /// Validated status transition. Terminal states reject everything;
    /// `Paused` is the only reversible detour.
    pub fn transition(&mut self, to: CampaignStatus) -> Result<()> {
        if self.status.can_transition(to) {
            self.status = to;
            Ok(())
        } else {
            Err(OutreachError::InvalidTransition {
                from: self.status,
                to,
            })
        }
    }

    /// Average hours between last contact and first subsequent response,
    /// over prospects that have both.
    pub fn average_response_time_hours(&self) -> Option<f64> {
        let mut total = 0.0;
        let mut count = 0u32;
        for p in &self.prospects {
            let Some(contacted) = p.last_contacted_at else {
                continue;
            };
            if let Some(resp) = p.responses.iter().find(|r| r.at >= contacted) {
                total += (resp.at - contacted).num_minutes() as f64 / 60.0;
                count += 1;
            }
        }
        if count == 0 {
            None
        } else {
            Some(total / count as f64)
        }
    }
}

/// Campaign lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    #[default]
    Draft,
    Scheduled,
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl CampaignStatus {
    /// Whether a transition to `to` is legal.
    pub fn can_transition(self, to: CampaignStatus) -> bool {
        use CampaignStatus::*;
        match (self, to) {
            (Draft, Scheduled) | (Draft, Active) | (Draft, Cancelled) => true,
            (Scheduled, Active) | (Scheduled, Paused) | (Scheduled, Cancelled) => true,
            (Active, Paused) | (Active, Completed) | (Active, Cancelled) => true,
            (Paused, Active) | (Paused, Scheduled) | (Paused, Cancelled) => true,
            _ => false,
        }
    }

    /// Statuses under which the scheduler may arm a timer.
    pub fn is_schedulable(self) -> bool {
        matches!(self, CampaignStatus::Scheduled | CampaignStatus::Active)
    }
}

/// Campaign configuration: targeting, schedule, throttling, compliance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Industry verticals this campaign is tuned for (matched against the
    /// prospect's `industry` custom field).
    pub industry_focus: Vec<String>,
    /// ISO 3166-1 alpha-2 country codes in scope.
    pub geography_focus: Vec<String>,
    /// AND-combined prospect selection criteria.
    pub selection_criteria: Vec<ProspectCriterion>,
    pub personalization_level: PersonalizationLevel,
    pub send_schedule: SendSchedule,
    pub throttle: ThrottleConfig,
    pub compliance: ComplianceFlags,
}

/// One prospect selection criterion, evaluated against built-in prospect
/// fields first, then custom fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProspectCriterion {
    pub field: String,
    pub op: MatchOp,
    pub value: serde_json::Value,
}

/// How much of the personalization pipeline applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonalizationLevel {
    /// Variable substitution only.
    Basic,
    /// Substitution plus conditional rules.
    #[default]
    Standard,
    /// Substitution, rules, and contextual industry/geography suffix.
    Deep,
}

/// Consent and anti-spam switches, supplied by the surrounding application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComplianceFlags {
    pub unsubscribe_enabled: bool,
    pub opt_out_tracking: bool,
    pub spam_compliance: bool,
    pub can_spam_compliance: bool,
    pub gdpr_compliance: bool,
}

impl ComplianceFlags {
    /// Flags a fully consenting configuration would carry.
    pub fn all_enabled() -> Self {
        Self {
            unsubscribe_enabled: true,
            opt_out_tracking: true,
            spam_compliance: true,
            can_spam_compliance: true,
            gdpr_compliance: true,
        }
    }
}

/// Campaign counters plus derived rates. Counters accumulate across runs;
/// derived values are recomputed, never edited in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignMetrics {
    pub sent: u64,
    pub delivered: u64,
    pub opened: u64,
    pub clicked: u64,
    pub replied: u64,
    pub bounced: u64,
    pub unsubscribed: u64,
    pub failed: u64,
    /// Accumulated spend attributed to this campaign, if metered upstream.
    pub spend: f64,
    pub delivery_rate: f64,
    pub reply_rate: f64,
    pub conversion_rate: f64,
    pub cost_per_lead: f64,
    pub avg_response_time_hours: Option<f64>,
}

impl CampaignMetrics {
    /// Fold another run's counters into this one.
    pub fn merge(&mut self, other: &CampaignMetrics) {
        self.sent += other.sent;
        self.delivered += other.delivered;
        self.opened += other.opened;
        self.clicked += other.clicked;
        self.replied += other.replied;
        self.bounced += other.bounced;
        self.unsubscribed += other.unsubscribed;
        self.failed += other.failed;
        self.spend += other.spend;
    }

    /// Recompute all derived rates from the counters.
    pub fn recompute(&mut self) {
        self.delivery_rate = ratio(self.delivered, self.sent);
        self.reply_rate = ratio(self.replied, self.delivered);
        self.conversion_rate = ratio(self.replied, self.sent);
        self.cost_per_lead = if self.replied > 0 {
            self.spend / self.replied as f64
        } else {
            0.0
        };
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Input to `CampaignManager::create_campaign`. Ids, metrics, and
/// timestamps are assigned by the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignDraft {
    pub customer_id: CustomerId,
    pub name: String,
    pub primary_channel: Channel,
    /// Requested initial status; must be `Draft`, `Scheduled`, or `Active`.
    pub status: CampaignStatus,
    pub config: CampaignConfig,
    pub templates: Vec<MessageTemplate>,
    pub prospects: Vec<Prospect>,
    #[serde(default)]
    pub automation: AutomationRules,
}

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum OutreachError {
    #[error("campaign failed compliance validation: {}", reasons.join("; "))]
    Compliance { reasons: Vec<String> },

    #[error("campaign not found: {0}")]
    CampaignNotFound(CampaignId),

    #[error("a run is already in progress for campaign {0}")]
    RunInProgress(CampaignId),

    #[error("invalid campaign configuration: {0}")]
    ConfigError(String),

    #[error("invalid status transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: CampaignStatus,
        to: CampaignStatus,
    },

    #[error("storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, OutreachError>;
