//! Lead processing coordinator
//!
//! Sequences scoring, AI job queueing, orchestrator invocation, persistence
//! and downstream job fan-out for each lead, guaranteeing at most one active
//! AI job per lead at a time.
//!
//! The single-active-job invariant is an atomic check-and-insert on a
//! per-lead job marker at enqueue time. No lock is held across the provider
//! call; a stale job (left behind by a manual reprocess) notices its marker
//! was superseded and skips itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use leadpipe_config::{ProviderKind, Settings};
use leadpipe_core::{
    Answers, Campaign, CampaignStore, Error, Lead, LeadId, LeadQuality, LeadStatus, LeadStore,
    Result,
};
use leadpipe_llm::{GenerateRequest, Orchestrator};
use leadpipe_queue::{
    names, EnqueueOptions, Job, JobError, JobEvent, JobHandler, JobPayload, JobQueue, QueueStats,
};

/// Status snapshot returned to the surrounding framework.
#[derive(Debug, Clone, Serialize)]
pub struct LeadStatusView {
    pub status: LeadStatus,
    pub lead_score: Option<u8>,
    pub lead_quality: Option<LeadQuality>,
    pub has_result: bool,
}

struct Shared {
    campaigns: Arc<dyn CampaignStore>,
    leads: Arc<dyn LeadStore>,
    orchestrator: Arc<Orchestrator>,
    /// Per-lead marker for the one outstanding AI job
    markers: DashMap<LeadId, Uuid>,
}

/// The lead lifecycle state machine and external facade.
pub struct Coordinator {
    shared: Arc<Shared>,
    queue: JobQueue,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Coordinator {
    /// Construct the coordinator, register all queues and start the event
    /// consumer and cache sweeper.
    pub fn new(
        campaigns: Arc<dyn CampaignStore>,
        leads: Arc<dyn LeadStore>,
        orchestrator: Arc<Orchestrator>,
        settings: &Settings,
    ) -> Self {
        let shared = Arc::new(Shared {
            campaigns,
            leads,
            orchestrator,
            markers: DashMap::new(),
        });

        let queue = JobQueue::new();
        queue.register(
            names::AI_PROCESSING,
            settings.queue(names::AI_PROCESSING),
            Arc::new(AiJobHandler {
                shared: shared.clone(),
            }),
        );
        for name in [names::EXPORT, names::NOTIFICATION, names::ANALYTICS] {
            queue.register(name, settings.queue(name), Arc::new(DownstreamHandler));
        }

        let mut background = Vec::new();
        if let Some(events) = queue.take_event_receiver() {
            let consumer_shared = shared.clone();
            let consumer_queue = queue.clone();
            background.push(tokio::spawn(async move {
                run_event_consumer(consumer_shared, consumer_queue, events).await;
            }));
        }
        background.push(
            shared
                .orchestrator
                .start_cache_sweeper(Duration::from_secs(settings.cache.sweep_interval_secs)),
        );

        Self {
            shared,
            queue,
            background: Mutex::new(background),
        }
    }

    /// Begin the state machine for one submission. Runs scoring
    /// synchronously (cheap, pure) and queues the AI job; returns as soon as
    /// the lead is queued.
    pub async fn submit_lead(&self, campaign_ref: &str, answers: Answers) -> Result<LeadId> {
        let campaign = self.resolve_campaign(campaign_ref).await?;
        leadpipe_scoring::validate_required(&campaign, &answers)?;

        let lead = Lead::new(campaign.id, answers);
        let lead_id = lead.id;
        self.shared.leads.insert(lead.clone()).await?;
        info!(lead_id = %lead_id, campaign = %campaign.slug, "Lead submitted");

        self.score_and_queue(lead, &campaign).await?;
        Ok(lead_id)
    }

    /// Administrative re-entry into scoring for a terminal lead. Idempotent:
    /// any stale job reference is superseded and a fresh cycle starts.
    pub async fn reprocess_lead(&self, lead_id: LeadId) -> Result<()> {
        let mut lead = self.shared.leads.get(lead_id).await?;
        if !lead.status.is_terminal() {
            return Err(Error::InvalidTransition {
                from: lead.status,
                to: LeadStatus::Scoring,
            });
        }

        // Supersede whatever job the previous cycle left behind.
        self.shared.markers.remove(&lead_id);
        lead.ai_result = None;
        lead.last_error = None;
        lead.attempt_count = 0;
        info!(lead_id = %lead_id, "Reprocessing lead");

        let campaign = self.shared.campaigns.get(lead.campaign_id).await?;
        self.score_and_queue(lead, &campaign).await
    }

    pub async fn get_lead_status(&self, lead_id: LeadId) -> Result<LeadStatusView> {
        let lead = self.shared.leads.get(lead_id).await?;
        Ok(LeadStatusView {
            status: lead.status,
            lead_score: lead.lead_score,
            lead_quality: lead.lead_quality,
            has_result: lead.ai_result.is_some(),
        })
    }

    /// The generated assessment, once the lead completed.
    pub async fn get_lead_result(&self, lead_id: LeadId) -> Result<String> {
        let lead = self.shared.leads.get(lead_id).await?;
        match (lead.status, lead.ai_result) {
            (LeadStatus::Completed, Some(result)) => Ok(result),
            _ => Err(Error::ResultNotReady(lead_id)),
        }
    }

    pub fn queue_stats(&self, queue: &str) -> Result<QueueStats> {
        self.queue.stats(queue)
    }

    pub fn all_queue_stats(&self) -> HashMap<String, QueueStats> {
        self.queue.all_stats()
    }

    pub fn pause_queue(&self, queue: &str) -> Result<()> {
        self.queue.pause(queue)
    }

    pub fn resume_queue(&self, queue: &str) -> Result<()> {
        self.queue.resume(queue)
    }

    /// Round-trip every configured provider; startup check.
    pub async fn validate_providers(&self) -> Vec<ProviderKind> {
        self.shared.orchestrator.validate_providers().await
    }

    pub fn clear_cache(&self) {
        self.shared.orchestrator.clear_cache();
    }

    pub fn reset_provider_health(&self) {
        self.shared.orchestrator.reset_health();
    }

    /// Stop queues and background tasks. In-flight workers settle first.
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
        let handles: Vec<_> = self.background.lock().drain(..).collect();
        for handle in handles {
            handle.abort();
        }
    }

    async fn resolve_campaign(&self, campaign_ref: &str) -> Result<Campaign> {
        match campaign_ref.parse::<Uuid>() {
            Ok(id) => self.shared.campaigns.get(id).await,
            Err(_) => self.shared.campaigns.get_by_slug(campaign_ref).await,
        }
    }

    /// Scoring then AI queueing, shared by submission and reprocessing.
    async fn score_and_queue(&self, mut lead: Lead, campaign: &Campaign) -> Result<()> {
        transition(&mut lead, LeadStatus::Scoring)?;
        self.shared.leads.update(lead.clone()).await?;

        match leadpipe_scoring::score(campaign, &lead.answers) {
            Ok(outcome) => {
                lead.lead_score = Some(outcome.score);
                lead.lead_quality = Some(outcome.quality);
                debug!(
                    lead_id = %lead.id,
                    score = outcome.score,
                    quality = ?outcome.quality,
                    "Lead scored"
                );
            }
            Err(err) => {
                // A malformed rule is deterministic; retrying cannot help.
                lead.status = LeadStatus::FailedPermanent;
                lead.last_error = Some(err.to_string());
                self.shared.leads.update(lead).await?;
                return Err(err);
            }
        }
        self.shared.leads.update(lead.clone()).await?;

        // The queued status must be durable before the job exists: a worker
        // claiming the job immediately has to see the lead at
        // `queued_for_ai`, never behind it.
        transition(&mut lead, LeadStatus::QueuedForAi)?;
        self.shared.leads.update(lead.clone()).await?;
        if let Err(err) = self.ensure_ai_job(lead.id) {
            lead.status = LeadStatus::FailedPermanent;
            lead.last_error = Some(err.to_string());
            self.shared.leads.update(lead).await?;
            return Err(err);
        }
        Ok(())
    }

    /// Enqueue the AI job unless one is already outstanding for this lead.
    /// Returns whether a new job was created.
    fn ensure_ai_job(&self, lead_id: LeadId) -> Result<bool> {
        match self.shared.markers.entry(lead_id) {
            Entry::Occupied(_) => {
                debug!(lead_id = %lead_id, "AI job already outstanding, enqueue suppressed");
                Ok(false)
            }
            Entry::Vacant(slot) => {
                let job_id = self.queue.enqueue(
                    names::AI_PROCESSING,
                    JobPayload::AiProcessing { lead_id },
                    EnqueueOptions::default(),
                )?;
                slot.insert(job_id);
                Ok(true)
            }
        }
    }
}

fn transition(lead: &mut Lead, to: LeadStatus) -> Result<()> {
    if !lead.status.can_transition_to(to) {
        return Err(Error::InvalidTransition {
            from: lead.status,
            to,
        });
    }
    lead.status = to;
    Ok(())
}

/// Worker for the AI-processing queue: drives one lead through
/// `ai_processing` and persists the orchestrator result.
struct AiJobHandler {
    shared: Arc<Shared>,
}

#[async_trait]
impl JobHandler for AiJobHandler {
    async fn handle(&self, job: &Job) -> std::result::Result<(), JobError> {
        let lead_id = job.payload.lead_id();

        // A reprocess may have superseded this job; only the marked job may
        // touch the lead.
        let current_marker = self.shared.markers.get(&lead_id).map(|m| *m);
        if current_marker != Some(job.id) {
            debug!(lead_id = %lead_id, job_id = %job.id, "Stale AI job skipped");
            return Ok(());
        }

        let mut lead = self.shared.leads.get(lead_id).await.map_err(JobError::from)?;
        if lead.status.is_terminal() {
            debug!(lead_id = %lead_id, status = ?lead.status, "Lead already settled, skipping");
            return Ok(());
        }

        // A retry can arrive before the event consumer mirrored the previous
        // failure onto the lead, leaving it still in `ai_processing`.
        if lead.status != LeadStatus::AiProcessing {
            transition(&mut lead, LeadStatus::AiProcessing).map_err(JobError::from)?;
        }
        lead.attempt_count = job.attempts;
        self.shared.leads.update(lead.clone()).await.map_err(JobError::from)?;

        let campaign = self
            .shared
            .campaigns
            .get(lead.campaign_id)
            .await
            .map_err(JobError::from)?;
        let prompt = campaign.render_prompt(&lead.answers);

        let response = self
            .shared
            .orchestrator
            .generate(GenerateRequest::text(prompt))
            .await
            .map_err(JobError::from)?;

        lead.ai_result = Some(response.text);
        transition(&mut lead, LeadStatus::Completed).map_err(JobError::from)?;
        self.shared.leads.update(lead).await.map_err(JobError::from)?;
        self.shared.markers.remove(&lead_id);
        info!(
            lead_id = %lead_id,
            provider = %response.provider,
            latency_ms = response.latency_ms,
            cached = response.cached,
            "Lead completed"
        );
        Ok(())
    }
}

/// Downstream export/notification/analytics workers are external in this
/// design; the handler acknowledges the job so its lifecycle is observable.
struct DownstreamHandler;

#[async_trait]
impl JobHandler for DownstreamHandler {
    async fn handle(&self, job: &Job) -> std::result::Result<(), JobError> {
        debug!(queue = %job.queue, lead_id = %job.payload.lead_id(), "Downstream job dispatched");
        Ok(())
    }
}

/// Consumes job settlement events: fans out downstream jobs on AI
/// completion, mirrors AI failures onto the lead record.
async fn run_event_consumer(
    shared: Arc<Shared>,
    queue: JobQueue,
    mut events: tokio::sync::mpsc::UnboundedReceiver<JobEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            JobEvent::Completed { job } => {
                if let JobPayload::AiProcessing { lead_id } = job.payload {
                    fan_out_downstream(&shared, &queue, lead_id).await;
                }
            }
            JobEvent::Failed { job, terminal } => match job.payload {
                JobPayload::AiProcessing { lead_id } => {
                    mirror_ai_failure(&shared, lead_id, &job, terminal).await;
                }
                // Downstream failures never touch the lead.
                _ => {
                    if terminal {
                        warn!(
                            queue = %job.queue,
                            job_id = %job.id,
                            error = job.last_error.as_deref().unwrap_or("unknown"),
                            "Downstream job failed terminally"
                        );
                    }
                }
            },
        }
    }
}

/// Enqueue export, notification and analytics jobs for a completed lead.
/// Fire-and-forget: enqueue errors are logged, never propagated.
async fn fan_out_downstream(shared: &Arc<Shared>, queue: &JobQueue, lead_id: LeadId) {
    // A stale job settles as completed without completing the lead; only
    // fan out for leads that actually finished.
    match shared.leads.get(lead_id).await {
        Ok(lead) if lead.status == LeadStatus::Completed => {}
        _ => return,
    }

    for payload in [
        JobPayload::Export { lead_id },
        JobPayload::Notification { lead_id },
        JobPayload::Analytics { lead_id },
    ] {
        let queue_name = payload.queue_name();
        if let Err(err) = queue.enqueue(queue_name, payload, EnqueueOptions::default()) {
            warn!(queue = queue_name, lead_id = %lead_id, error = %err, "Downstream enqueue failed");
        }
    }
}

/// Record an AI job failure on the lead: transient failures park it in
/// `failed` awaiting the job retry, terminal failures end the cycle.
async fn mirror_ai_failure(shared: &Arc<Shared>, lead_id: LeadId, job: &Job, terminal: bool) {
    let mut lead = match shared.leads.get(lead_id).await {
        Ok(lead) => lead,
        Err(_) => return,
    };
    if lead.status.is_terminal() {
        return;
    }

    lead.last_error = job.last_error.clone();
    lead.attempt_count = job.attempts;
    let target = if terminal {
        LeadStatus::FailedPermanent
    } else {
        LeadStatus::Failed
    };
    if lead.status.can_transition_to(target) {
        lead.status = target;
    }
    if let Err(err) = shared.leads.update(lead).await {
        warn!(lead_id = %lead_id, error = %err, "Failed to record AI failure on lead");
    }
    if terminal {
        shared.markers.remove(&lead_id);
        warn!(
            lead_id = %lead_id,
            attempts = job.attempts,
            error = job.last_error.as_deref().unwrap_or("unknown"),
            "Lead failed permanently, manual reprocess required"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadpipe_config::{CacheSettings, OrchestratorSettings, QueueSettings};
    use leadpipe_core::{
        AnswerValue, Predicate, PredicateOp, Question, QuestionKind, ScoringRule, ScoringRuleSet,
    };
    use leadpipe_llm::MockBackend;

    fn test_settings() -> Settings {
        let mut settings = Settings::default();
        settings.queues.insert(
            names::AI_PROCESSING.to_string(),
            QueueSettings {
                concurrency: 1,
                max_attempts: 3,
                base_backoff_ms: 10,
                max_backoff_ms: 50,
                lease_timeout_ms: 5_000,
            },
        );
        settings
    }

    fn business_campaign() -> Campaign {
        Campaign {
            id: Uuid::new_v4(),
            slug: "qualifier".to_string(),
            questions: vec![Question {
                id: "q1".to_string(),
                kind: QuestionKind::Text,
                options: vec![],
                required: true,
                visible_if: None,
            }],
            scoring: ScoringRuleSet {
                rules: vec![ScoringRule {
                    condition: Predicate {
                        question: "q1".to_string(),
                        op: PredicateOp::Eq,
                        value: AnswerValue::Text("business".to_string()),
                    },
                    score: Some(80),
                    quality: Some(LeadQuality::Hot),
                    exclusive: false,
                }],
                ..Default::default()
            },
            prompt_template: "Assess this lead: {{q1}}".to_string(),
        }
    }

    fn coordinator_with(backend: Arc<MockBackend>) -> (Coordinator, Campaign) {
        let campaigns = Arc::new(crate::store::MemoryCampaignStore::new());
        let campaign = business_campaign();
        campaigns.insert(campaign.clone());

        let orchestrator = Arc::new(Orchestrator::new(
            vec![backend],
            OrchestratorSettings {
                timeout_ms: 1_000,
                circuit_failure_threshold: 10,
                circuit_cooldown_ms: 1_000,
                priority: vec![ProviderKind::Claude],
            },
            &CacheSettings::default(),
        ));

        let coordinator = Coordinator::new(
            campaigns,
            Arc::new(crate::store::MemoryLeadStore::new()),
            orchestrator,
            &test_settings(),
        );
        (coordinator, campaign)
    }

    fn business_answers() -> Answers {
        let mut answers = Answers::new();
        answers.insert("q1".to_string(), AnswerValue::Text("business".to_string()));
        answers
    }

    #[tokio::test]
    async fn test_enqueue_guard_is_idempotent() {
        let (coordinator, _) = coordinator_with(MockBackend::ok(ProviderKind::Claude, "ok"));
        coordinator.pause_queue(names::AI_PROCESSING).unwrap();

        let lead_id = coordinator
            .submit_lead("qualifier", business_answers())
            .await
            .unwrap();

        // Second enqueue for the same lead is suppressed while the first
        // job is outstanding
        assert!(!coordinator.ensure_ai_job(lead_id).unwrap());
        let stats = coordinator.queue_stats(names::AI_PROCESSING).unwrap();
        assert_eq!(stats.waiting, 1);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_scoring_precedes_ai_dispatch() {
        let (coordinator, _) = coordinator_with(MockBackend::ok(ProviderKind::Claude, "ok"));
        coordinator.pause_queue(names::AI_PROCESSING).unwrap();

        let lead_id = coordinator
            .submit_lead("qualifier", business_answers())
            .await
            .unwrap();

        // Queue paused: the AI job has not run, yet score and quality are
        // already persisted
        let view = coordinator.get_lead_status(lead_id).await.unwrap();
        assert_eq!(view.status, LeadStatus::QueuedForAi);
        assert_eq!(view.lead_score, Some(80));
        assert_eq!(view.lead_quality, Some(LeadQuality::Hot));
        assert!(!view.has_result);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_required_answer_rejected() {
        let (coordinator, _) = coordinator_with(MockBackend::ok(ProviderKind::Claude, "ok"));
        let err = coordinator
            .submit_lead("qualifier", Answers::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingAnswer(_)));
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_campaign_rejected() {
        let (coordinator, _) = coordinator_with(MockBackend::ok(ProviderKind::Claude, "ok"));
        let err = coordinator
            .submit_lead("no-such-campaign", business_answers())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CampaignNotFound(_)));
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_result_not_ready_before_completion() {
        let (coordinator, _) = coordinator_with(MockBackend::ok(ProviderKind::Claude, "ok"));
        coordinator.pause_queue(names::AI_PROCESSING).unwrap();
        let lead_id = coordinator
            .submit_lead("qualifier", business_answers())
            .await
            .unwrap();
        assert!(matches!(
            coordinator.get_lead_result(lead_id).await,
            Err(Error::ResultNotReady(_))
        ));
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_reprocess_requires_terminal_lead() {
        let (coordinator, _) = coordinator_with(MockBackend::ok(ProviderKind::Claude, "ok"));
        coordinator.pause_queue(names::AI_PROCESSING).unwrap();
        let lead_id = coordinator
            .submit_lead("qualifier", business_answers())
            .await
            .unwrap();
        assert!(matches!(
            coordinator.reprocess_lead(lead_id).await,
            Err(Error::InvalidTransition { .. })
        ));
        coordinator.shutdown().await;
    }
}
