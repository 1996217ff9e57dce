//! Kickoff, transition and bookkeeping-training handlers.
//!
//! Each one updates the client's progress flags and leaves a `Hyke Salesforce`
//! record behind for the CRM sync to pick up.

use async_trait::async_trait;
use chrono::Duration;
use hyke_core::error::Result;

use super::{Disposition, HandlerContext, ProcessHandler, ProcessKind};
use super::onboarding::SCHEDULE_EMAIL;
use crate::records::{
    FORMATION_DAILY, FORMATION_SALESFORCE, NewRecord, Outcome, ProgressField, RecordFilter,
    StatusEngineRecord,
};

pub const WELCOME_EMAIL: &str = "Welcome to the Collective community!";
pub const BK_TRAINING_FOLLOWUP: &str = "Followup - BK Training";

/// Salesforce log record for `kind`, optionally carrying the trigger's data.
fn salesforce_log(kind: ProcessKind, email: &str, data: Option<String>) -> NewRecord {
    NewRecord::scheduled(email, kind.process_name(), FORMATION_SALESFORCE).with_optional_data(data)
}

pub struct KickoffQuestionnaireCompleted;

#[async_trait]
impl ProcessHandler for KickoffQuestionnaireCompleted {
    fn kind(&self) -> ProcessKind {
        ProcessKind::KickoffQuestionnaireCompleted
    }

    async fn execute(&self, ctx: &HandlerContext<'_>, record: &StatusEngineRecord) -> Result<Disposition> {
        let Some(progress) = ctx.db.find_progress(&record.email, true)? else {
            tracing::warn!(
                "⚠️ No progress status for {}, questionnaire left untouched",
                record.email
            );
            return Ok(Disposition::Settle(Outcome::Completed));
        };

        ctx.db
            .set_progress(progress.id, &[(ProgressField::Questionnaire, "scheduled")])?;
        ctx.db.insert_record(&salesforce_log(
            self.kind(),
            &record.email,
            record.data.clone(),
        ))?;
        Ok(Disposition::Settle(Outcome::Completed))
    }
}

pub struct KickoffCallScheduled;

#[async_trait]
impl ProcessHandler for KickoffCallScheduled {
    fn kind(&self) -> ProcessKind {
        ProcessKind::KickoffCallScheduled
    }

    async fn execute(&self, ctx: &HandlerContext<'_>, record: &StatusEngineRecord) -> Result<Disposition> {
        let progress = ctx.required_progress(&record.email, true)?;
        ctx.db
            .set_progress(progress.id, &[(ProgressField::Questionnaire, "scheduled")])?;
        ctx.db.insert_record(&salesforce_log(
            self.kind(),
            &record.email,
            record.data.clone(),
        ))?;
        Ok(Disposition::Settle(Outcome::Completed))
    }
}

pub struct KickoffCallCancelled;

#[async_trait]
impl ProcessHandler for KickoffCallCancelled {
    fn kind(&self) -> ProcessKind {
        ProcessKind::KickoffCallCancelled
    }

    async fn execute(&self, ctx: &HandlerContext<'_>, record: &StatusEngineRecord) -> Result<Disposition> {
        let progress = ctx.required_progress(&record.email, true)?;
        ctx.db
            .set_progress(progress.id, &[(ProgressField::Questionnaire, "reschedule")])?;
        ctx.db
            .insert_record(&salesforce_log(self.kind(), &record.email, None))?;
        Ok(Disposition::Settle(Outcome::Completed))
    }
}

/// Marks the transition plan submitted and queues the welcome email.
pub struct TransitionPlanSubmitted;

#[async_trait]
impl ProcessHandler for TransitionPlanSubmitted {
    fn kind(&self) -> ProcessKind {
        ProcessKind::TransitionPlanSubmitted
    }

    async fn execute(&self, ctx: &HandlerContext<'_>, record: &StatusEngineRecord) -> Result<Disposition> {
        let email = record.email.as_str();
        let progress = ctx.required_progress(email, true)?;
        ctx.db
            .set_progress(progress.id, &[(ProgressField::Questionnaire, "submitted")])?;
        ctx.db
            .insert_record(&salesforce_log(self.kind(), email, Some("---".into())))?;

        let welcome = NewRecord::scheduled(email, SCHEDULE_EMAIL, FORMATION_DAILY).with_data(WELCOME_EMAIL);
        let (id, created) = ctx.db.get_or_create(
            &RecordFilter::matching(&welcome),
            &welcome.clone().executed_at(ctx.now + Duration::days(1)),
        )?;
        if created {
            tracing::info!("📧 Welcome email {id} scheduled for {email}");
        }
        Ok(Disposition::Settle(Outcome::Completed))
    }
}

pub struct BkTrainingCallScheduled;

#[async_trait]
impl ProcessHandler for BkTrainingCallScheduled {
    fn kind(&self) -> ProcessKind {
        ProcessKind::BkTrainingCallScheduled
    }

    async fn execute(&self, ctx: &HandlerContext<'_>, record: &StatusEngineRecord) -> Result<Disposition> {
        ctx.db.insert_record(&salesforce_log(
            self.kind(),
            &record.email,
            record.data.clone(),
        ))?;
        Ok(Disposition::Settle(Outcome::Completed))
    }
}

/// Flags bookkeeping setup for rescheduling and queues a follow-up in two days.
pub struct BkTrainingCallCancelled;

#[async_trait]
impl ProcessHandler for BkTrainingCallCancelled {
    fn kind(&self) -> ProcessKind {
        ProcessKind::BkTrainingCallCancelled
    }

    async fn execute(&self, ctx: &HandlerContext<'_>, record: &StatusEngineRecord) -> Result<Disposition> {
        let email = record.email.as_str();
        let progress = ctx.required_progress(email, true)?;
        ctx.db
            .set_progress(progress.id, &[(ProgressField::BookkeepingSetup, "reschedule")])?;

        let followup = NewRecord::scheduled(email, BK_TRAINING_FOLLOWUP, FORMATION_DAILY)
            .with_data("---")
            .executed_at(ctx.now + Duration::days(2));
        let id = ctx.db.insert_record(&followup)?;
        tracing::info!("📅 BK training follow-up {id} scheduled for {email}");

        ctx.db
            .insert_record(&salesforce_log(self.kind(), email, None))?;
        Ok(Disposition::Settle(Outcome::Completed))
    }
}
