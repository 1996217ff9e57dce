//! Stateless handlers: annual report uploads and NPS recalculation.

use async_trait::async_trait;
use hyke_core::error::{HykeError, Result};

use super::{Disposition, HandlerContext, ProcessHandler, ProcessKind};
use crate::collaborators::{ANNUAL_REPORT_REMINDER, NpsKind};
use crate::records::{Outcome, RecordFilter, StatusEngineRecord};
use crate::report::AnnualReport;

/// Closes out pending reminders for an uploaded annual report and queues
/// the reminder for the following year.
pub struct AnnualReportUploaded;

#[async_trait]
impl ProcessHandler for AnnualReportUploaded {
    fn kind(&self) -> ProcessKind {
        ProcessKind::AnnualReportUploaded
    }

    async fn execute(&self, ctx: &HandlerContext<'_>, record: &StatusEngineRecord) -> Result<Disposition> {
        let data = record.data.as_deref().ok_or_else(|| {
            HykeError::MalformedData(format!("annual report upload {} has no data", record.id))
        })?;
        let report = AnnualReport::parse(data)?;

        let pending = ctx.db.find_records(&RecordFilter {
            email: Some(record.email.clone()),
            process: Some(ANNUAL_REPORT_REMINDER.to_string()),
            outcome: Some(Outcome::Scheduled),
            ..Default::default()
        })?;
        let mut completed = 0;
        for reminder in pending
            .iter()
            .filter(|r| report.matches_reminder(r.data_or_empty()))
        {
            ctx.db.settle(reminder.id, Outcome::Completed, ctx.now)?;
            completed += 1;
        }
        tracing::info!(
            "🗂️ Annual report '{report}' uploaded by {}: {completed} reminder(s) completed",
            record.email
        );

        // The trigger must be settled before the next reminder is queued.
        ctx.db.settle(record.id, Outcome::Completed, ctx.now)?;

        ctx.services
            .reminders
            .schedule_next_annual_report(&record.email, &report, ctx.now)
            .await?;
        Ok(Disposition::Unchanged)
    }
}

/// Standing trigger that recomputes one NPS score on every run.
pub struct CalculateNps {
    nps: NpsKind,
}

impl CalculateNps {
    pub fn new(nps: NpsKind) -> Self {
        Self { nps }
    }
}

#[async_trait]
impl ProcessHandler for CalculateNps {
    fn kind(&self) -> ProcessKind {
        match self.nps {
            NpsKind::Running => ProcessKind::CalculateNpsRunning,
            NpsKind::Onboarding => ProcessKind::CalculateNpsOnboarding,
        }
    }

    async fn execute(&self, ctx: &HandlerContext<'_>, record: &StatusEngineRecord) -> Result<Disposition> {
        ctx.services.nps.calculate(self.nps).await?;
        tracing::info!("📊 {} NPS is calculated for {}", self.nps, record.data_or_empty());
        Ok(Disposition::Unchanged)
    }
}
