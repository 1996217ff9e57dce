//! Onboarding handlers: survey, payment reminder and the running flow hand-off.

use async_trait::async_trait;
use chrono::Duration;
use hyke_core::error::Result;

use super::{Disposition, HandlerContext, ProcessHandler, ProcessKind};
use crate::records::{
    FORMATION_DAILY, FORMATION_SYSTEM, NewRecord, Outcome, ProgressField, RecordFilter,
    StatusEngineRecord,
};

pub const PAYMENT_ERROR_TEMPLATE: &str = "[Action required] - Please update your payment information";
pub const SCHEDULE_EMAIL: &str = "Schedule Email";
pub const UPCOMING_EMAIL: &str = "What's upcoming with Collective?";

/// Sends the onboarding NPS survey. Never fails the batch.
pub struct ClientOnboardingSurvey;

#[async_trait]
impl ProcessHandler for ClientOnboardingSurvey {
    fn kind(&self) -> ProcessKind {
        ProcessKind::ClientOnboardingSurvey
    }

    async fn execute(&self, ctx: &HandlerContext<'_>, record: &StatusEngineRecord) -> Result<Disposition> {
        match ctx.services.surveys.send_onboarding_survey(&record.email).await {
            Ok(()) => {
                tracing::info!("📋 Onboarding survey sent to {}", record.email);
                Ok(Disposition::Settle(Outcome::Completed))
            }
            Err(e) => {
                tracing::error!(
                    "❌ Can't process onboarding NPS survey for status engine id={}: {e}",
                    record.id
                );
                Ok(Disposition::Settle(Outcome::Failed))
            }
        }
    }
}

/// Emails the client asking them to update payment details.
pub struct PaymentErrorEmail;

#[async_trait]
impl ProcessHandler for PaymentErrorEmail {
    fn kind(&self) -> ProcessKind {
        ProcessKind::PaymentErrorEmail
    }

    async fn execute(&self, ctx: &HandlerContext<'_>, record: &StatusEngineRecord) -> Result<Disposition> {
        ctx.services
            .mailer
            .send_template(&record.email, PAYMENT_ERROR_TEMPLATE)
            .await?;
        tracing::info!("📧 {PAYMENT_ERROR_TEMPLATE} email is sent to {}", record.email);
        Ok(Disposition::Settle(Outcome::Completed))
    }
}

/// Moves a client from onboarding into the running phase.
pub struct RunningFlow;

#[async_trait]
impl ProcessHandler for RunningFlow {
    fn kind(&self) -> ProcessKind {
        ProcessKind::RunningFlow
    }

    async fn execute(&self, ctx: &HandlerContext<'_>, record: &StatusEngineRecord) -> Result<Disposition> {
        let email = record.email.as_str();
        let progress = ctx.required_progress(email, false)?;
        ctx.db.set_progress(
            progress.id,
            &[
                (ProgressField::BookkeepingSetup, "completed"),
                (ProgressField::TaxSetup, "completed2"),
            ],
        )?;

        let upcoming = NewRecord::scheduled(email, SCHEDULE_EMAIL, FORMATION_DAILY)
            .with_data(UPCOMING_EMAIL);
        ctx.db.get_or_create(
            &RecordFilter::matching(&upcoming),
            &upcoming.clone().executed_at(ctx.now + Duration::days(1)),
        )?;

        let next_stage = NewRecord::scheduled(email, ProcessKind::RunningFlow.process_name(), FORMATION_SYSTEM)
            .with_stage(2)
            .with_data("---");
        let stage_lookup = RecordFilter {
            outcome: None,
            data: None,
            ..RecordFilter::matching(&next_stage)
        };
        ctx.db.get_or_create(&stage_lookup, &next_stage)?;

        ctx.services.surveys.schedule_onboarding_sequence(email).await?;
        ctx.services.surveys.schedule_running_sequence(email).await?;

        ctx.services.folders.create_folders(email).await?;
        tracing::info!("📁 Folders are created for {email}");

        let has_run_before = ctx.db.exists(&RecordFilter {
            email: Some(record.email.clone()),
            process: Some(record.process.clone()),
            process_stage: Some(record.process_stage),
            outcome: Some(Outcome::Completed),
            ..Default::default()
        })?;
        if has_run_before {
            tracing::info!(
                "Not creating form w9 or emailing pops because the folders job has already run for {email}"
            );
        }

        Ok(Disposition::Settle(Outcome::Completed))
    }
}
