//! Campaign Manager
//!
//! Single entry point for campaign lifecycle: creation behind the
//! compliance gate, scheduling, execution with an at-most-one-run
//! guarantee per campaign, and read access. Explicitly constructed and
//! owned by the caller; timers stop on `shutdown`.

use crate::channel::{ChannelAdapter, ChannelRegistry};
use crate::compliance::ComplianceValidator;
use crate::execution::{CampaignExecution, ExecutionReport, RunState};
use crate::prospect::ProspectStatus;
use crate::scheduler::{CampaignScheduler, Clock};
use crate::store::CampaignStore;
use crate::tracker::OutreachPerformanceTracker;
use crate::{
    Campaign, CampaignDraft, CampaignId, CampaignMetrics, CampaignStatus, CustomerId,
    OutreachError, Result,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

pub struct CampaignManager {
    store: Arc<dyn CampaignStore>,
    validator: ComplianceValidator,
    adapters: RwLock<ChannelRegistry>,
    scheduler: CampaignScheduler,
    tracker: OutreachPerformanceTracker,
    clock: Arc<dyn Clock>,
    /// Campaign ids with a run currently in flight.
    running: DashMap<CampaignId, ()>,
    /// Handle timer tasks upgrade to reach back into the manager.
    self_ref: Weak<CampaignManager>,
}

impl CampaignManager {
    pub fn new(store: Arc<dyn CampaignStore>, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            store,
            validator: ComplianceValidator::new(),
            adapters: RwLock::new(ChannelRegistry::new()),
            scheduler: CampaignScheduler::new(Arc::clone(&clock)),
            tracker: OutreachPerformanceTracker::new(),
            clock,
            running: DashMap::new(),
            self_ref: weak.clone(),
        })
    }

    pub fn register_adapter(&self, adapter: Arc<dyn ChannelAdapter>) {
        self.adapters.write().register(adapter);
    }

    pub fn tracker(&self) -> &OutreachPerformanceTracker {
        &self.tracker
    }

    /// Whether a timer is currently armed for the campaign.
    pub fn is_scheduled(&self, id: &CampaignId) -> bool {
        self.scheduler.armed(id)
    }

    fn strong(&self) -> Arc<Self> {
        // The manager is borrowed from inside its own Arc, so the strong
        // count is at least one here.
        self.self_ref.upgrade().expect("manager is alive")
    }

    /// Validate, persist, and (when requested) schedule a new campaign.
    /// A draft that fails the compliance gate creates nothing.
    pub async fn create_campaign(&self, draft: CampaignDraft) -> Result<Campaign> {
        if !matches!(
            draft.status,
            CampaignStatus::Draft | CampaignStatus::Scheduled | CampaignStatus::Active
        ) {
            return Err(OutreachError::InvalidTransition {
                from: CampaignStatus::Draft,
                to: draft.status,
            });
        }

        let report = self.validator.validate(&draft);
        if !report.valid {
            info!(
                customer = %draft.customer_id,
                name = %draft.name,
                reasons = report.reasons.len(),
                "campaign draft rejected by compliance gate"
            );
            return Err(OutreachError::Compliance {
                reasons: report.reasons,
            });
        }

        let now = self.clock.now();
        let campaign = Campaign {
            id: uuid::Uuid::new_v4().to_string(),
            customer_id: draft.customer_id,
            name: draft.name,
            primary_channel: draft.primary_channel,
            status: draft.status,
            config: draft.config,
            templates: draft.templates,
            prospects: draft.prospects,
            automation: draft.automation,
            metrics: CampaignMetrics::default(),
            created_at: now,
            updated_at: now,
        };
        self.store.put(campaign.clone()).await?;
        info!(campaign = %campaign.id, status = ?campaign.status, "campaign created");

        if campaign.status.is_schedulable() {
            self.schedule_campaign(&campaign.id).await?;
        }
        Ok(campaign)
    }

    /// Run a campaign once, now. At most one run per campaign id may be
    /// in flight; a second invocation while one is running returns
    /// `RunInProgress` without starting anything.
    ///
    /// Configuration failures do not propagate: the run is recorded as
    /// `Failed` and the report returned, so a scheduler loop never
    /// crashes on a malformed campaign.
    pub async fn execute_campaign(&self, id: &CampaignId) -> Result<ExecutionReport> {
        let campaign = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| OutreachError::CampaignNotFound(id.clone()))?;
        let _guard = RunGuard::acquire(&self.running, id)?;

        let adapters = self.adapters.read().clone();
        let execution =
            CampaignExecution::new(campaign.clone(), adapters, Arc::clone(&self.clock));
        let report = match execution.execute().await {
            Ok(report) => report,
            Err(e) => {
                warn!(campaign = %id, error = %e, "campaign run failed");
                ExecutionReport::failed(id.clone(), &e, self.clock.now())
            }
        };
        self.tracker.record(&report);

        let mut campaign = campaign;
        if report.state == RunState::Completed {
            for updated in &report.prospect_updates {
                if let Some(slot) = campaign.prospects.iter_mut().find(|p| p.id == updated.id) {
                    *slot = updated.clone();
                }
            }
            campaign.metrics.merge(&report.metrics);
            campaign.metrics.avg_response_time_hours = campaign.average_response_time_hours();
            campaign.metrics.recompute();

            // Every prospect has been reached at least once; the campaign
            // has done its job and stops recurring.
            if campaign.status == CampaignStatus::Active
                && !campaign.prospects.is_empty()
                && campaign
                    .prospects
                    .iter()
                    .all(|p| p.status != ProspectStatus::New)
                && campaign.transition(CampaignStatus::Completed).is_ok()
            {
                self.scheduler.unschedule(id);
                info!(campaign = %id, "campaign completed");
            }
        }
        campaign.updated_at = self.clock.now();
        self.store.put(campaign).await?;

        Ok(report)
    }

    pub async fn get_campaign(&self, id: &CampaignId) -> Result<Campaign> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| OutreachError::CampaignNotFound(id.clone()))
    }

    pub async fn customer_campaigns(&self, customer_id: &CustomerId) -> Result<Vec<Campaign>> {
        self.store.customer_campaigns(customer_id).await
    }

    /// Compute the next eligible run and arm the campaign's timer. On
    /// fire, the run executes and the timer is re-armed while the
    /// campaign stays schedulable.
    pub async fn schedule_campaign(&self, id: &CampaignId) -> Result<DateTime<Utc>> {
        let campaign = self.get_campaign(id).await?;
        let next =
            CampaignScheduler::next_run_after(&campaign.config.send_schedule, self.clock.now())?;

        let on_fire = self.strong().on_timer_fired(id.clone());
        self.scheduler.arm(id.clone(), next, on_fire);
        info!(campaign = %id, next_run = %next, "campaign scheduled");
        Ok(next)
    }

    // Boxed at the definition: the fire body awaits `schedule_campaign`,
    // which in turn captures this future, so the type must be erased here
    // for the cycle to resolve.
    fn on_timer_fired(
        self: Arc<Self>,
        id: CampaignId,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            let campaign = match self.store.get(&id).await {
                Ok(Some(c)) => c,
                Ok(None) => {
                    warn!(campaign = %id, "timer fired for unknown campaign");
                    return;
                }
                Err(e) => {
                    warn!(campaign = %id, error = %e, "timer fired but store lookup failed");
                    return;
                }
            };
            // A paused or cancelled campaign must never fire.
            if !campaign.status.is_schedulable() {
                debug!(campaign = %id, status = ?campaign.status, "ignoring timer for non-schedulable campaign");
                return;
            }

            if let Err(e) = self.execute_campaign(&id).await {
                warn!(campaign = %id, error = %e, "scheduled run did not start");
            }

            match self.store.get(&id).await {
                Ok(Some(c)) if c.status.is_schedulable() => {
                    if let Err(e) = self.schedule_campaign(&id).await {
                        warn!(campaign = %id, error = %e, "failed to re-arm campaign timer");
                    }
                }
                _ => {}
            }
        })
    }

    /// Pause a campaign and clear its pending timer. A run already in
    /// flight finishes its current batch; it is not hard-aborted.
    pub async fn pause_campaign(&self, id: &CampaignId) -> Result<()> {
        let mut campaign = self.get_campaign(id).await?;
        campaign.transition(CampaignStatus::Paused)?;
        campaign.updated_at = self.clock.now();
        self.scheduler.unschedule(id);
        self.store.put(campaign).await?;
        info!(campaign = %id, "campaign paused");
        Ok(())
    }

    pub async fn resume_campaign(&self, id: &CampaignId) -> Result<DateTime<Utc>> {
        let mut campaign = self.get_campaign(id).await?;
        campaign.transition(CampaignStatus::Active)?;
        campaign.updated_at = self.clock.now();
        self.store.put(campaign).await?;
        let next = self.schedule_campaign(id).await?;
        info!(campaign = %id, "campaign resumed");
        Ok(next)
    }

    pub async fn cancel_campaign(&self, id: &CampaignId) -> Result<()> {
        let mut campaign = self.get_campaign(id).await?;
        campaign.transition(CampaignStatus::Cancelled)?;
        campaign.updated_at = self.clock.now();
        self.scheduler.unschedule(id);
        self.store.put(campaign).await?;
        info!(campaign = %id, "campaign cancelled");
        Ok(())
    }

    /// Stop all pending timers. In-flight runs finish on their own.
    pub fn shutdown(&self) {
        self.scheduler.clear();
    }
}

/// Removes the campaign id from the running set when the run ends, on
/// every exit path.
struct RunGuard<'a> {
    running: &'a DashMap<CampaignId, ()>,
    id: CampaignId,
}

impl<'a> RunGuard<'a> {
    fn acquire(running: &'a DashMap<CampaignId, ()>, id: &CampaignId) -> Result<Self> {
        use dashmap::mapref::entry::Entry;
        match running.entry(id.clone()) {
            Entry::Occupied(_) => Err(OutreachError::RunInProgress(id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(Self {
                    running,
                    id: id.clone(),
                })
            }
        }
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.remove(&self.id);
    }
}
