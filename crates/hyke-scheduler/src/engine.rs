//! Scheduler Engine: selects due status engine records and dispatches them.
//!
//! One invocation is one batch: stage-tracked records first, then stateless
//! ones, each awaited in id order. `spawn_scheduler` repeats the batch on a
//! tokio interval for deployments without cron.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hyke_core::config::{HandlerErrorPolicy, SchedulerConfig};
use hyke_core::error::{HykeError, Result};
use serde::Serialize;
use uuid::Uuid;

use crate::collaborators::Services;
use crate::handlers::{DispatchMode, Disposition, HandlerContext, HandlerRegistry};
use crate::persistence::StatusEngineDb;
use crate::records::StatusEngineRecord;

/// A handler failure that did not stop the batch.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DispatchFailure {
    pub record_id: i64,
    pub process: String,
    pub reason: String,
}

/// Summary of one batch.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunReport {
    pub run_id: String,
    pub dispatched: usize,
    pub settled: usize,
    pub unchanged: usize,
    pub failures: Vec<DispatchFailure>,
}

impl RunReport {
    fn new(run_id: String) -> Self {
        Self {
            run_id,
            dispatched: 0,
            settled: 0,
            unchanged: 0,
            failures: Vec::new(),
        }
    }
}

/// The scheduler engine: owns the store handle, the handler registry and
/// the collaborators handlers call out to.
pub struct SchedulerEngine {
    db: Arc<StatusEngineDb>,
    registry: HandlerRegistry,
    services: Services,
    config: SchedulerConfig,
}

impl SchedulerEngine {
    pub fn new(
        db: Arc<StatusEngineDb>,
        registry: HandlerRegistry,
        services: Services,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            db,
            registry,
            services,
            config,
        }
    }

    pub fn db(&self) -> &Arc<StatusEngineDb> {
        &self.db
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run one batch over every due record.
    pub async fn run_once(&self) -> Result<RunReport> {
        let prefix = self.config.formation_prefix.as_str();
        let mut report = RunReport::new(Uuid::new_v4().to_string());
        tracing::info!("⏰ Scheduled task is started for {prefix}... (run {})", report.run_id);

        let stage_tracked = self.db.due_records(
            prefix,
            Some(1),
            &self.registry.process_names(DispatchMode::StageTracked),
        )?;
        let stateless = self.db.due_records(
            prefix,
            None,
            &self.registry.process_names(DispatchMode::Stateless),
        )?;
        tracing::info!("Active items in the job: {}", stage_tracked.len() + stateless.len());

        self.db
            .close_stale_connection(Duration::from_secs(self.config.connection_max_age_secs))?;

        let ctx = HandlerContext {
            db: self.db.as_ref(),
            services: &self.services,
            now: Utc::now(),
        };
        for record in stage_tracked.iter().chain(stateless.iter()) {
            self.dispatch(&ctx, record, &mut report).await?;
        }

        tracing::info!(
            "✅ Scheduled task is completed for {prefix}: {} dispatched, {} settled, {} unchanged, {} failed",
            report.dispatched,
            report.settled,
            report.unchanged,
            report.failures.len()
        );
        Ok(report)
    }

    async fn dispatch(
        &self,
        ctx: &HandlerContext<'_>,
        record: &StatusEngineRecord,
        report: &mut RunReport,
    ) -> Result<()> {
        let Some(handler) = self.registry.lookup(&record.process) else {
            tracing::warn!("⚠️ No handler registered for '{}' (record {})", record.process, record.id);
            return Ok(());
        };
        report.dispatched += 1;
        tracing::debug!("▶️ Dispatching {record}");

        let result = match handler.execute(ctx, record).await {
            Ok(Disposition::Settle(outcome)) => self
                .db
                .settle(record.id, outcome, ctx.now)
                .map(|()| Disposition::Settle(outcome)),
            other => other,
        };

        match result {
            Ok(Disposition::Settle(outcome)) => {
                report.settled += 1;
                tracing::debug!("Record {} settled as {outcome}", record.id);
            }
            Ok(Disposition::Unchanged) => report.unchanged += 1,
            Err(e) => {
                tracing::error!(
                    "❌ Handler '{}' failed for record {} ({}): {e}",
                    record.process,
                    record.id,
                    record.email
                );
                let failure = DispatchFailure {
                    record_id: record.id,
                    process: record.process.clone(),
                    reason: e.to_string(),
                };
                match self.config.on_handler_error {
                    HandlerErrorPolicy::Continue => report.failures.push(failure),
                    HandlerErrorPolicy::Abort => {
                        return Err(HykeError::Dispatch {
                            record_id: failure.record_id,
                            process: failure.process,
                            reason: failure.reason,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Spawn the scheduler loop: run a batch every `check_interval_secs`.
/// Batch errors are logged and the loop keeps going.
pub async fn spawn_scheduler(engine: Arc<SchedulerEngine>, check_interval_secs: u64) {
    tracing::info!("⏰ Scheduler started (check every {}s)", check_interval_secs);

    let mut interval = tokio::time::interval(Duration::from_secs(check_interval_secs.max(1)));

    loop {
        interval.tick().await;

        match engine.run_once().await {
            Ok(report) if !report.failures.is_empty() => {
                tracing::warn!(
                    "⚠️ Run {} finished with {} failed record(s)",
                    report.run_id,
                    report.failures.len()
                );
            }
            Ok(_) => {}
            Err(e) => tracing::error!("❌ Scheduled run aborted: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{FORMATION_DAILY, FORMATION_SYSTEM, NewRecord, Outcome, RecordFilter};
    use crate::testing::{FakeServices, services_from};

    fn engine_with(policy: HandlerErrorPolicy) -> (SchedulerEngine, Arc<FakeServices>) {
        let db = Arc::new(StatusEngineDb::open_in_memory().unwrap());
        let fake = FakeServices::new();
        let config = SchedulerConfig {
            on_handler_error: policy,
            ..Default::default()
        };
        let engine = SchedulerEngine::new(db, HandlerRegistry::standard(), services_from(&fake), config);
        (engine, fake)
    }

    fn enqueue(engine: &SchedulerEngine, record: NewRecord) -> i64 {
        engine.db().insert_record(&record).unwrap()
    }

    fn outcome(engine: &SchedulerEngine, id: i64) -> Outcome {
        engine.db().get_record(id).unwrap().unwrap().outcome
    }

    #[tokio::test]
    async fn test_only_stage_one_records_are_dispatched() {
        let (engine, fake) = engine_with(HandlerErrorPolicy::Continue);
        let stage_one = enqueue(
            &engine,
            NewRecord::scheduled("a@x.com", "Client Onboarding Survey", FORMATION_SYSTEM),
        );
        let stage_two = enqueue(
            &engine,
            NewRecord::scheduled("b@x.com", "Client Onboarding Survey", FORMATION_SYSTEM).with_stage(2),
        );
        let other_formation = enqueue(
            &engine,
            NewRecord::scheduled("c@x.com", "Client Onboarding Survey", FORMATION_DAILY),
        );
        let unknown = enqueue(
            &engine,
            NewRecord::scheduled("d@x.com", "Annual Report Reminder", FORMATION_SYSTEM),
        );

        let report = engine.run_once().await.unwrap();
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.settled, 1);
        assert_eq!(fake.calls(), vec!["onboarding_survey:a@x.com"]);
        assert_eq!(outcome(&engine, stage_one), Outcome::Completed);
        assert_eq!(outcome(&engine, stage_two), Outcome::Scheduled);
        assert_eq!(outcome(&engine, other_formation), Outcome::Scheduled);
        assert_eq!(outcome(&engine, unknown), Outcome::Scheduled);

        let second = engine.run_once().await.unwrap();
        assert_eq!(second.dispatched, 0);
        assert_ne!(second.run_id, report.run_id);
    }

    #[tokio::test]
    async fn test_formation_prefix_match() {
        let (engine, fake) = engine_with(HandlerErrorPolicy::Continue);
        enqueue(
            &engine,
            NewRecord::scheduled("a@x.com", "Client Onboarding Survey", "Hyke System - West"),
        );
        let report = engine.run_once().await.unwrap();
        assert_eq!(report.dispatched, 1);
        assert_eq!(fake.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_stateless_records_run_after_stage_tracked() {
        let (engine, fake) = engine_with(HandlerErrorPolicy::Continue);
        let nps = enqueue(
            &engine,
            NewRecord::scheduled("ops@x.com", "Calculate NPS Running", FORMATION_SYSTEM).with_stage(3),
        );
        enqueue(
            &engine,
            NewRecord::scheduled("a@x.com", "Payment error email", FORMATION_SYSTEM),
        );

        let report = engine.run_once().await.unwrap();
        assert_eq!(report.dispatched, 2);
        assert_eq!(report.settled, 1);
        assert_eq!(report.unchanged, 1);
        let calls = fake.calls();
        assert!(calls[0].starts_with("mail:a@x.com:"));
        assert_eq!(calls[1], "nps:running");

        // The NPS trigger stays scheduled and fires again next run.
        assert_eq!(outcome(&engine, nps), Outcome::Scheduled);
        let again = engine.run_once().await.unwrap();
        assert_eq!(again.dispatched, 1);
        assert_eq!(again.unchanged, 1);
    }

    #[tokio::test]
    async fn test_continue_policy_finishes_batch() {
        let (engine, fake) = engine_with(HandlerErrorPolicy::Continue);
        FakeServices::fail(&fake.fail_mail);
        let failing = enqueue(
            &engine,
            NewRecord::scheduled("a@x.com", "Payment error email", FORMATION_SYSTEM),
        );
        let survey = enqueue(
            &engine,
            NewRecord::scheduled("b@x.com", "Client Onboarding Survey", FORMATION_SYSTEM),
        );

        let report = engine.run_once().await.unwrap();
        assert_eq!(report.dispatched, 2);
        assert_eq!(report.settled, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].record_id, failing);
        assert_eq!(report.failures[0].process, "Payment error email");
        assert_eq!(outcome(&engine, failing), Outcome::Scheduled);
        assert_eq!(outcome(&engine, survey), Outcome::Completed);
    }

    #[tokio::test]
    async fn test_abort_policy_stops_batch() {
        let (engine, fake) = engine_with(HandlerErrorPolicy::Abort);
        FakeServices::fail(&fake.fail_mail);
        let failing = enqueue(
            &engine,
            NewRecord::scheduled("a@x.com", "Payment error email", FORMATION_SYSTEM),
        );
        let survey = enqueue(
            &engine,
            NewRecord::scheduled("b@x.com", "Client Onboarding Survey", FORMATION_SYSTEM),
        );

        let err = engine.run_once().await.unwrap_err();
        match err {
            HykeError::Dispatch { record_id, process, .. } => {
                assert_eq!(record_id, failing);
                assert_eq!(process, "Payment error email");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(outcome(&engine, survey), Outcome::Scheduled);
        assert_eq!(fake.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_failing_survey_settles_as_failed() {
        let (engine, fake) = engine_with(HandlerErrorPolicy::Abort);
        FakeServices::fail(&fake.fail_surveys);
        let survey = enqueue(
            &engine,
            NewRecord::scheduled("a@x.com", "Client Onboarding Survey", FORMATION_SYSTEM),
        );

        let report = engine.run_once().await.unwrap();
        assert!(report.failures.is_empty());
        assert_eq!(outcome(&engine, survey), Outcome::Failed);
    }

    #[tokio::test]
    async fn test_folder_failure_keeps_partial_running_flow() {
        let (engine, fake) = engine_with(HandlerErrorPolicy::Continue);
        let progress = engine.db().ensure_progress("a@x.com").unwrap();
        FakeServices::fail(&fake.fail_folders);
        let flow = enqueue(
            &engine,
            NewRecord::scheduled("a@x.com", "Running flow", FORMATION_SYSTEM),
        );
        let follow_ups = |engine: &SchedulerEngine| {
            let count = |process: &str, stage: i32| {
                engine
                    .db()
                    .find_records(&RecordFilter {
                        email: Some("a@x.com".into()),
                        process: Some(process.into()),
                        process_stage: Some(stage),
                        ..Default::default()
                    })
                    .unwrap()
                    .len()
            };
            (count("Schedule Email", 1), count("Running flow", 2))
        };

        let report = engine.run_once().await.unwrap();
        assert_eq!(report.settled, 0);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].record_id, flow);
        assert_eq!(outcome(&engine, flow), Outcome::Scheduled);

        // Writes made before the folder call are kept.
        let status = engine.db().find_progress("a@x.com", false).unwrap().unwrap();
        assert_eq!(status.id, progress);
        assert_eq!(status.bookkeeping_setup.as_deref(), Some("completed"));
        assert_eq!(status.tax_setup.as_deref(), Some("completed2"));
        assert_eq!(follow_ups(&engine), (1, 1));

        // Retries do not duplicate the follow-up records.
        let retry = engine.run_once().await.unwrap();
        assert_eq!(retry.failures.len(), 1);
        assert_eq!(follow_ups(&engine), (1, 1));

        fake.fail_folders.store(false, std::sync::atomic::Ordering::SeqCst);
        let recovered = engine.run_once().await.unwrap();
        assert!(recovered.failures.is_empty());
        assert_eq!(outcome(&engine, flow), Outcome::Completed);
        assert_eq!(follow_ups(&engine), (1, 1));
        assert_eq!(
            fake.calls().iter().filter(|c| c.starts_with("folders:")).count(),
            3
        );
    }

    #[tokio::test]
    async fn test_annual_report_upload_through_engine() {
        let (engine, fake) = engine_with(HandlerErrorPolicy::Continue);
        let reminder = enqueue(
            &engine,
            NewRecord::scheduled("a@x.com", "Annual Report Reminder", FORMATION_DAILY)
                .with_data("2023 --- Acme LLC --- CA"),
        );
        let upload = enqueue(
            &engine,
            NewRecord::scheduled("a@x.com", "Annual Report Uploaded", FORMATION_SYSTEM)
                .with_stage(4)
                .with_data("2023 --- Acme LLC"),
        );

        let report = engine.run_once().await.unwrap();
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.unchanged, 1);
        assert_eq!(outcome(&engine, reminder), Outcome::Completed);
        assert_eq!(outcome(&engine, upload), Outcome::Completed);
        assert_eq!(fake.calls(), vec!["reminder:a@x.com:2023 --- Acme LLC"]);

        let pending = engine
            .db()
            .find_records(&RecordFilter {
                outcome: Some(Outcome::Scheduled),
                ..Default::default()
            })
            .unwrap();
        assert!(pending.is_empty());
    }
}
