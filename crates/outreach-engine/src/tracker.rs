//! Outreach Performance Tracker
//!
//! Append-only record of every run's metrics, keyed by campaign, for
//! send-time and channel-performance analysis. Historical records are
//! never mutated; analysis reads aggregate over the whole history.

use crate::channel::Channel;
use crate::execution::{ChannelStats, ExecutionReport, RunState};
use crate::{CampaignId, CampaignMetrics, RunId};
use chrono::{DateTime, Timelike, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One run's results, as recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub state: RunState,
    pub metrics: CampaignMetrics,
    pub batches_dispatched: u32,
    pub channel_stats: Vec<ChannelStats>,
    pub errors: Vec<String>,
}

#[derive(Default)]
pub struct OutreachPerformanceTracker {
    history: DashMap<CampaignId, Vec<RunRecord>>,
}

impl OutreachPerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one run's results. Purely additive.
    pub fn record(&self, report: &ExecutionReport) {
        let record = RunRecord {
            run_id: report.run_id.clone(),
            started_at: report.started_at,
            state: report.state,
            metrics: report.metrics.clone(),
            batches_dispatched: report.batches_dispatched,
            channel_stats: report.channel_stats.clone(),
            errors: report.errors.clone(),
        };
        self.history
            .entry(report.campaign_id.clone())
            .or_default()
            .push(record);
    }

    /// Full run history for a campaign, oldest first.
    pub fn history(&self, campaign_id: &CampaignId) -> Vec<RunRecord> {
        self.history
            .get(campaign_id)
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    /// Number of failed runs. Repeated configuration failures are
    /// expected to accumulate here and stay observable.
    pub fn failure_count(&self, campaign_id: &CampaignId) -> usize {
        self.history
            .get(campaign_id)
            .map(|h| h.iter().filter(|r| r.state == RunState::Failed).count())
            .unwrap_or(0)
    }

    /// UTC hour-of-day with the best average delivery rate across a
    /// campaign's runs that sent anything.
    pub fn best_send_hour(&self, campaign_id: &CampaignId) -> Option<u32> {
        let history = self.history.get(campaign_id)?;
        let mut by_hour: HashMap<u32, (f64, u32)> = HashMap::new();
        for record in history.iter().filter(|r| r.metrics.sent > 0) {
            let rate = record.metrics.delivered as f64 / record.metrics.sent as f64;
            let entry = by_hour.entry(record.started_at.hour()).or_insert((0.0, 0));
            entry.0 += rate;
            entry.1 += 1;
        }
        by_hour
            .into_iter()
            .map(|(hour, (total, n))| (hour, total / n as f64))
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(hour, _)| hour)
    }

    /// Delivery rate per channel, aggregated across all campaigns.
    pub fn channel_delivery_rates(&self) -> HashMap<Channel, f64> {
        let mut attempted: HashMap<Channel, u64> = HashMap::new();
        let mut delivered: HashMap<Channel, u64> = HashMap::new();
        for entry in self.history.iter() {
            for record in entry.value() {
                for stats in &record.channel_stats {
                    *attempted.entry(stats.channel).or_default() += stats.attempted;
                    *delivered.entry(stats.channel).or_default() += stats.delivered;
                }
            }
        }
        attempted
            .into_iter()
            .filter(|(_, a)| *a > 0)
            .map(|(ch, a)| (ch, *delivered.get(&ch).unwrap_or(&0) as f64 / a as f64))
            .collect()
    }
}
