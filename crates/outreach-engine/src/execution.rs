//! Campaign Execution
//!
//! One run of one campaign: filter prospects, group by preferred channel,
//! dispatch per-channel batches under the throttle ceilings, personalize
//! and send concurrently within each batch, and aggregate metrics.
//!
//! Failure semantics: a single send failure is counted and the run
//! continues; a malformed configuration aborts the whole run.

use crate::channel::{Channel, ChannelRegistry, DeliveryReceipt, SendError};
use crate::personalization::PersonalizationEngine;
use crate::prospect::Prospect;
use crate::scheduler::Clock;
use crate::{Campaign, CampaignId, CampaignMetrics, OutreachError, Result, RunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Terminal state of one run. Failure is terminal for the run, not for
/// the owning campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Completed,
    Failed,
}

/// Per-channel counters for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelStats {
    pub channel: Channel,
    pub attempted: u64,
    pub delivered: u64,
    pub failed: u64,
}

/// Outcome of one campaign run. `metrics` holds this run's deltas only;
/// the manager folds them into the campaign's cumulative counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub run_id: RunId,
    pub campaign_id: CampaignId,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub metrics: CampaignMetrics,
    pub batches_dispatched: u32,
    pub channel_stats: Vec<ChannelStats>,
    pub errors: Vec<String>,
    /// Prospects touched by this run, with updated status and timestamps.
    #[serde(skip)]
    pub prospect_updates: Vec<Prospect>,
}

impl ExecutionReport {
    /// Report for a run that failed before dispatching anything.
    pub fn failed(campaign_id: CampaignId, error: &OutreachError, at: DateTime<Utc>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            campaign_id,
            state: RunState::Failed,
            started_at: at,
            finished_at: at,
            metrics: CampaignMetrics::default(),
            batches_dispatched: 0,
            channel_stats: Vec::new(),
            errors: vec![error.to_string()],
            prospect_updates: Vec::new(),
        }
    }
}

/// Dispatcher for a single run over a campaign snapshot.
pub struct CampaignExecution {
    run_id: RunId,
    campaign: Campaign,
    adapters: ChannelRegistry,
    engine: Arc<PersonalizationEngine>,
    clock: Arc<dyn Clock>,
}

impl CampaignExecution {
    pub fn new(campaign: Campaign, adapters: ChannelRegistry, clock: Arc<dyn Clock>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            campaign,
            adapters,
            engine: Arc::new(PersonalizationEngine::new()),
            clock,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Run the campaign once. Only configuration errors surface as `Err`;
    /// per-prospect send failures are counted and recovered.
    pub async fn execute(mut self) -> Result<ExecutionReport> {
        let started_at = self.clock.now();
        info!(
            campaign = %self.campaign.id,
            run = %self.run_id,
            prospects = self.campaign.prospects.len(),
            "starting campaign run"
        );

        // Filtering and grouping errors abort the run.
        let mut filtered = self.filter_prospects()?;
        let groups = group_by_channel(&filtered);

        let config = Arc::new(self.campaign.config.clone());
        let mut metrics = CampaignMetrics::default();
        let mut channel_stats: Vec<ChannelStats> = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        let mut batches_dispatched = 0u32;

        for (channel, indices) in groups {
            let Some(template) = self.campaign.template_for(channel).cloned() else {
                warn!(campaign = %self.campaign.id, %channel, "no template for channel, skipping group");
                continue;
            };
            let Some(adapter) = self.adapters.get(channel) else {
                warn!(campaign = %self.campaign.id, %channel, "no adapter registered for channel, skipping group");
                continue;
            };

            let template = Arc::new(template);
            let ceiling = config.throttle.ceiling(channel) as usize;
            let window = channel.rate_window();
            let mut stats = ChannelStats {
                channel,
                attempted: 0,
                delivered: 0,
                failed: 0,
            };

            for (batch_no, batch) in indices.chunks(ceiling).enumerate() {
                if batch_no > 0 {
                    debug!(%channel, pause_secs = window.as_secs(), "throttling before next batch");
                    tokio::time::sleep(window).await;
                }

                let mut set: JoinSet<(usize, std::result::Result<DeliveryReceipt, SendError>)> =
                    JoinSet::new();
                for &idx in batch {
                    let prospect = filtered[idx].clone();
                    let adapter = Arc::clone(&adapter);
                    let template = Arc::clone(&template);
                    let engine = Arc::clone(&self.engine);
                    let config = Arc::clone(&config);
                    set.spawn(async move {
                        let message = engine.render(&template, &prospect, Some(config.as_ref()));
                        let outcome = adapter.send(&prospect, &message).await;
                        (idx, outcome)
                    });
                }

                // Wait for the whole batch; one prospect's failure never
                // aborts the batch or the run.
                while let Some(joined) = set.join_next().await {
                    stats.attempted += 1;
                    match joined {
                        Ok((idx, Ok(_receipt))) => {
                            metrics.sent += 1;
                            metrics.delivered += 1;
                            stats.delivered += 1;
                            filtered[idx].mark_contacted(self.clock.now());
                        }
                        Ok((idx, Err(e))) => {
                            metrics.failed += 1;
                            stats.failed += 1;
                            warn!(prospect = %filtered[idx].id, %channel, error = %e, "send failed");
                            errors.push(format!(
                                "send to prospect {} over {} failed: {e}",
                                filtered[idx].id, channel
                            ));
                        }
                        Err(join_err) => {
                            metrics.failed += 1;
                            stats.failed += 1;
                            warn!(%channel, error = %join_err, "send task aborted");
                            errors.push(format!("send task over {channel} aborted: {join_err}"));
                        }
                    }
                }
                batches_dispatched += 1;
            }

            channel_stats.push(stats);
        }

        metrics.recompute();
        let finished_at = self.clock.now();
        info!(
            campaign = %self.campaign.id,
            run = %self.run_id,
            sent = metrics.sent,
            failed = metrics.failed,
            batches = batches_dispatched,
            "campaign run completed"
        );

        Ok(ExecutionReport {
            run_id: self.run_id,
            campaign_id: self.campaign.id,
            state: RunState::Completed,
            started_at,
            finished_at,
            metrics,
            batches_dispatched,
            channel_stats,
            errors,
            prospect_updates: filtered,
        })
    }

    /// Keep prospects matching every selection criterion. A malformed
    /// criterion is a configuration error and fails the run.
    fn filter_prospects(&mut self) -> Result<Vec<Prospect>> {
        let criteria = &self.campaign.config.selection_criteria;
        let mut kept = Vec::new();
        for prospect in std::mem::take(&mut self.campaign.prospects) {
            let mut keep = true;
            for criterion in criteria {
                let actual = prospect
                    .field(&criterion.field)
                    .unwrap_or(serde_json::Value::Null);
                let matched = criterion
                    .op
                    .matches(&actual, &criterion.value)
                    .map_err(|e| {
                        OutreachError::ConfigError(format!(
                            "selection criterion on field '{}': {e}",
                            criterion.field
                        ))
                    })?;
                if !matched {
                    keep = false;
                    break;
                }
            }
            if keep {
                kept.push(prospect);
            }
        }
        Ok(kept)
    }
}

/// Group prospect indices by preferred channel, iterating channels in
/// their fixed order so batch formation is deterministic for a given
/// prospect list.
fn group_by_channel(prospects: &[Prospect]) -> Vec<(Channel, Vec<usize>)> {
    Channel::ALL
        .iter()
        .filter_map(|&channel| {
            let indices: Vec<usize> = prospects
                .iter()
                .enumerate()
                .filter(|(_, p)| p.preferred_channel == channel)
                .map(|(i, _)| i)
                .collect();
            if indices.is_empty() {
                None
            } else {
                Some((channel, indices))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelAdapter, RenderedMessage};
    use crate::prospect::ProspectStatus;
    use crate::scheduler::ManualClock;
    use crate::template::MessageTemplate;
    use crate::{
        AutomationRules, CampaignStatus, ComplianceFlags, MatchOp, ProspectCriterion,
        ThrottleConfig,
    };
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockAdapter {
        channel: Channel,
        sent_bodies: Mutex<Vec<String>>,
        fail_for: HashSet<String>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl MockAdapter {
        fn new(channel: Channel) -> Self {
            Self {
                channel,
                sent_bodies: Mutex::new(Vec::new()),
                fail_for: HashSet::new(),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        fn failing_for(mut self, first_name: &str) -> Self {
            self.fail_for.insert(first_name.to_string());
            self
        }
    }

    #[async_trait::async_trait]
    impl ChannelAdapter for MockAdapter {
        fn channel(&self) -> Channel {
            self.channel
        }

        async fn send(
            &self,
            prospect: &Prospect,
            message: &RenderedMessage,
        ) -> std::result::Result<DeliveryReceipt, SendError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_for.contains(&prospect.first_name) {
                return Err(SendError::Rejected("mailbox unavailable".into()));
            }
            self.sent_bodies.lock().push(message.body.clone());
            Ok(DeliveryReceipt {
                provider_message_id: Some(format!("msg-{}", prospect.id)),
                delivered_at: Utc::now(),
            })
        }
    }

    fn campaign_with(prospects: Vec<Prospect>, throttle: ThrottleConfig) -> Campaign {
        Campaign {
            id: "camp-1".into(),
            customer_id: "cust-1".into(),
            name: "Q3 outreach".into(),
            primary_channel: Channel::Email,
            status: CampaignStatus::Active,
            config: crate::CampaignConfig {
                throttle,
                compliance: ComplianceFlags::all_enabled(),
                ..Default::default()
            },
            templates: vec![MessageTemplate::new(
                Channel::Email,
                "Hi {first_name}, regarding {company_name}",
            )],
            prospects,
            automation: AutomationRules::default(),
            metrics: CampaignMetrics::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn registry(adapter: Arc<MockAdapter>) -> ChannelRegistry {
        let mut registry = ChannelRegistry::new();
        registry.register(adapter);
        registry
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc::now()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_worked_example_two_batches_and_trailing_space() {
        let prospects = vec![
            Prospect::new("Asha", "Rao", Channel::Email).with_email("asha@acme.io"),
            Prospect::new("Ben", "Ng", Channel::Email)
                .with_email("ben@acme.io")
                .with_company("Acme Robotics"),
            Prospect::new("Chloe", "Diaz", Channel::Email).with_email("chloe@acme.io"),
        ];
        let throttle = ThrottleConfig {
            emails_per_hour: Some(2),
            ..Default::default()
        };
        let adapter = Arc::new(MockAdapter::new(Channel::Email));
        let exec = CampaignExecution::new(
            campaign_with(prospects, throttle),
            registry(adapter.clone()),
            clock(),
        );

        let report = exec.execute().await.unwrap();
        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.batches_dispatched, 2);
        assert_eq!(report.metrics.sent, 3);
        // No batch may exceed the ceiling of 2.
        assert!(adapter.max_in_flight.load(Ordering::SeqCst) <= 2);

        let bodies = adapter.sent_bodies.lock();
        assert!(bodies.contains(&"Hi Asha, regarding ".to_string()));
        assert!(bodies.contains(&"Hi Ben, regarding Acme Robotics".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_isolation() {
        let prospects = vec![
            Prospect::new("Asha", "Rao", Channel::Email).with_email("asha@acme.io"),
            Prospect::new("Ben", "Ng", Channel::Email).with_email("ben@acme.io"),
            Prospect::new("Chloe", "Diaz", Channel::Email).with_email("chloe@acme.io"),
        ];
        let adapter = Arc::new(MockAdapter::new(Channel::Email).failing_for("Ben"));
        let exec = CampaignExecution::new(
            campaign_with(prospects, ThrottleConfig::default()),
            registry(adapter),
            clock(),
        );

        let report = exec.execute().await.unwrap();
        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.metrics.sent, 2);
        assert_eq!(report.metrics.failed, 1);
        assert_eq!(report.errors.len(), 1);

        // Failed prospect keeps its status; delivered ones are contacted.
        let ben = report
            .prospect_updates
            .iter()
            .find(|p| p.first_name == "Ben")
            .unwrap();
        assert_eq!(ben.status, ProspectStatus::New);
        assert!(ben.last_contacted_at.is_none());
        let asha = report
            .prospect_updates
            .iter()
            .find(|p| p.first_name == "Asha")
            .unwrap();
        assert_eq!(asha.status, ProspectStatus::Contacted);
        assert!(asha.last_contacted_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_selection_criteria_are_and_combined() {
        let prospects = vec![
            Prospect::new("Asha", "Rao", Channel::Email)
                .with_email("asha@acme.io")
                .with_custom_field("industry", json!("saas"))
                .with_custom_field("headcount", json!(120)),
            Prospect::new("Ben", "Ng", Channel::Email)
                .with_email("ben@acme.io")
                .with_custom_field("industry", json!("saas"))
                .with_custom_field("headcount", json!(12)),
            Prospect::new("Chloe", "Diaz", Channel::Email)
                .with_email("chloe@acme.io")
                .with_custom_field("industry", json!("retail"))
                .with_custom_field("headcount", json!(500)),
        ];
        let mut campaign = campaign_with(prospects, ThrottleConfig::default());
        campaign.config.selection_criteria = vec![
            ProspectCriterion {
                field: "industry".into(),
                op: MatchOp::Equals,
                value: json!("saas"),
            },
            ProspectCriterion {
                field: "headcount".into(),
                op: MatchOp::GreaterThan,
                value: json!(50),
            },
        ];
        let adapter = Arc::new(MockAdapter::new(Channel::Email));
        let exec = CampaignExecution::new(campaign, registry(adapter.clone()), clock());

        let report = exec.execute().await.unwrap();
        assert_eq!(report.metrics.sent, 1);
        assert_eq!(adapter.sent_bodies.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_criterion_fails_run() {
        let prospects =
            vec![Prospect::new("Asha", "Rao", Channel::Email).with_email("asha@acme.io")];
        let mut campaign = campaign_with(prospects, ThrottleConfig::default());
        campaign.config.selection_criteria = vec![ProspectCriterion {
            field: "headcount".into(),
            op: MatchOp::GreaterThan,
            value: json!("lots"),
        }];
        let adapter = Arc::new(MockAdapter::new(Channel::Email));
        let exec = CampaignExecution::new(campaign, registry(adapter), clock());

        let err = exec.execute().await.unwrap_err();
        assert!(matches!(err, OutreachError::ConfigError(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_template_skips_channel_without_failing() {
        let prospects = vec![
            Prospect::new("Asha", "Rao", Channel::Email).with_email("asha@acme.io"),
            Prospect::new("Dev", "Patel", Channel::Sms).with_phone("+919876543210"),
        ];
        // Campaign only carries an email template.
        let campaign = campaign_with(prospects, ThrottleConfig::default());
        let email = Arc::new(MockAdapter::new(Channel::Email));
        let sms = Arc::new(MockAdapter::new(Channel::Sms));
        let mut reg = ChannelRegistry::new();
        reg.register(email.clone());
        reg.register(sms.clone());
        let exec = CampaignExecution::new(campaign, reg, clock());

        let report = exec.execute().await.unwrap();
        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.metrics.sent, 1);
        assert!(sms.sent_bodies.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_channels_grouped_independently() {
        let prospects = vec![
            Prospect::new("Asha", "Rao", Channel::Email).with_email("asha@acme.io"),
            Prospect::new("Dev", "Patel", Channel::Sms).with_phone("+919876543210"),
        ];
        let mut campaign = campaign_with(prospects, ThrottleConfig::default());
        campaign
            .templates
            .push(MessageTemplate::new(Channel::Sms, "Hey {first_name}"));
        let email = Arc::new(MockAdapter::new(Channel::Email));
        let sms = Arc::new(MockAdapter::new(Channel::Sms));
        let mut reg = ChannelRegistry::new();
        reg.register(email.clone());
        reg.register(sms.clone());
        let exec = CampaignExecution::new(campaign, reg, clock());

        let report = exec.execute().await.unwrap();
        assert_eq!(report.metrics.sent, 2);
        assert_eq!(report.channel_stats.len(), 2);
        assert_eq!(sms.sent_bodies.lock().as_slice(), ["Hey Dev"]);
    }
}
