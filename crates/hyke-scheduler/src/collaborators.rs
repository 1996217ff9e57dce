//! External collaborators the handlers call out to.
//!
//! Each concern sits behind a narrow trait so the scheduler can be wired with
//! SMTP/HTTP implementations in production and recording fakes in tests.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Months, Utc};
use hyke_core::error::Result;

use crate::persistence::StatusEngineDb;
use crate::records::{FORMATION_DAILY, NewRecord, Outcome, RecordFilter};
use crate::report::AnnualReport;

pub const ANNUAL_REPORT_REMINDER: &str = "Annual Report Reminder";

/// Sends transactional emails by template name.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_template(&self, email: &str, template: &str) -> Result<()>;
}

/// NPS survey delivery and sequencing.
#[async_trait]
pub trait SurveyService: Send + Sync {
    async fn send_onboarding_survey(&self, email: &str) -> Result<()>;
    async fn schedule_onboarding_sequence(&self, email: &str) -> Result<()>;
    async fn schedule_running_sequence(&self, email: &str) -> Result<()>;
}

/// Creates a client's document folders.
#[async_trait]
pub trait FolderProvisioner: Send + Sync {
    async fn create_folders(&self, email: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NpsKind {
    Running,
    Onboarding,
}

impl fmt::Display for NpsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NpsKind::Running => f.write_str("running"),
            NpsKind::Onboarding => f.write_str("onboarding"),
        }
    }
}

/// Recomputes an NPS score over the survey responses.
#[async_trait]
pub trait NpsCalculator: Send + Sync {
    async fn calculate(&self, kind: NpsKind) -> Result<()>;
}

/// Schedules the reminder for the next annual report, due twelve months after `at`.
#[async_trait]
pub trait ReminderScheduler: Send + Sync {
    async fn schedule_next_annual_report(
        &self,
        email: &str,
        report: &AnnualReport,
        at: DateTime<Utc>,
    ) -> Result<()>;
}

/// All collaborators a handler may need.
#[derive(Clone)]
pub struct Services {
    pub mailer: Arc<dyn Mailer>,
    pub surveys: Arc<dyn SurveyService>,
    pub folders: Arc<dyn FolderProvisioner>,
    pub nps: Arc<dyn NpsCalculator>,
    pub reminders: Arc<dyn ReminderScheduler>,
}

/// Reminder scheduler that queues the next reminder in the status engine itself.
pub struct StoreReminders {
    db: Arc<StatusEngineDb>,
}

impl StoreReminders {
    pub fn new(db: Arc<StatusEngineDb>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ReminderScheduler for StoreReminders {
    async fn schedule_next_annual_report(
        &self,
        email: &str,
        report: &AnnualReport,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let next = report.following_year();
        let reminder = NewRecord::scheduled(email, ANNUAL_REPORT_REMINDER, FORMATION_DAILY)
            .with_data(next.to_string())
            .executed_at(at + Months::new(12));
        let lookup = RecordFilter {
            email: Some(email.to_string()),
            process: Some(ANNUAL_REPORT_REMINDER.to_string()),
            outcome: Some(Outcome::Scheduled),
            data: Some(next.to_string()),
            ..Default::default()
        };

        let (id, created) = self.db.get_or_create(&lookup, &reminder)?;
        if created {
            tracing::info!("📅 Annual report reminder {id} scheduled for {email}: {next}");
        } else {
            tracing::debug!("Annual report reminder for {email} ({next}) already pending as {id}");
        }
        Ok(())
    }
}
