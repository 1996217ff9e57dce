//! Process handlers and the registry the scheduler dispatches through.
//!
//! ## Architecture
//! ```text
//! StatusEngineRecord.process
//!   → ProcessKind::from_process_name
//!     → HandlerRegistry.get(kind)
//!       → ProcessHandler::execute(ctx, record) → Disposition
//!          ├── Settle(outcome): scheduler writes outcome + executed
//!          └── Unchanged: record left as it is
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hyke_core::error::{HykeError, Result};

use crate::collaborators::{NpsKind, Services};
use crate::persistence::StatusEngineDb;
use crate::records::{Outcome, ProgressStatus, StatusEngineRecord};

pub mod onboarding;
pub mod reports;
pub mod salesforce;

pub use onboarding::{ClientOnboardingSurvey, PaymentErrorEmail, RunningFlow};
pub use reports::{AnnualReportUploaded, CalculateNps};
pub use salesforce::{
    BkTrainingCallCancelled, BkTrainingCallScheduled, KickoffCallCancelled, KickoffCallScheduled,
    KickoffQuestionnaireCompleted, TransitionPlanSubmitted,
};

/// Every process the scheduler knows how to dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessKind {
    ClientOnboardingSurvey,
    PaymentErrorEmail,
    RunningFlow,
    KickoffQuestionnaireCompleted,
    KickoffCallScheduled,
    KickoffCallCancelled,
    TransitionPlanSubmitted,
    BkTrainingCallScheduled,
    BkTrainingCallCancelled,
    AnnualReportUploaded,
    CalculateNpsRunning,
    CalculateNpsOnboarding,
}

/// Whether a process is only eligible at stage 1 or at any stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    StageTracked,
    Stateless,
}

impl ProcessKind {
    pub const ALL: [ProcessKind; 12] = [
        ProcessKind::ClientOnboardingSurvey,
        ProcessKind::PaymentErrorEmail,
        ProcessKind::RunningFlow,
        ProcessKind::KickoffQuestionnaireCompleted,
        ProcessKind::KickoffCallScheduled,
        ProcessKind::KickoffCallCancelled,
        ProcessKind::TransitionPlanSubmitted,
        ProcessKind::BkTrainingCallScheduled,
        ProcessKind::BkTrainingCallCancelled,
        ProcessKind::AnnualReportUploaded,
        ProcessKind::CalculateNpsRunning,
        ProcessKind::CalculateNpsOnboarding,
    ];

    /// The `process` column value for this kind.
    pub fn process_name(self) -> &'static str {
        match self {
            ProcessKind::ClientOnboardingSurvey => "Client Onboarding Survey",
            ProcessKind::PaymentErrorEmail => "Payment error email",
            ProcessKind::RunningFlow => "Running flow",
            ProcessKind::KickoffQuestionnaireCompleted => "Kickoff Questionnaire Completed",
            ProcessKind::KickoffCallScheduled => "Kickoff Call Scheduled",
            ProcessKind::KickoffCallCancelled => "Kickoff Call Cancelled",
            ProcessKind::TransitionPlanSubmitted => "Transition Plan Submitted",
            ProcessKind::BkTrainingCallScheduled => "BK Training Call Scheduled",
            ProcessKind::BkTrainingCallCancelled => "BK Training Call Cancelled",
            ProcessKind::AnnualReportUploaded => "Annual Report Uploaded",
            ProcessKind::CalculateNpsRunning => "Calculate NPS Running",
            ProcessKind::CalculateNpsOnboarding => "Calculate NPS Onboarding",
        }
    }

    pub fn from_process_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.process_name() == name)
    }

    pub fn mode(self) -> DispatchMode {
        match self {
            ProcessKind::AnnualReportUploaded
            | ProcessKind::CalculateNpsRunning
            | ProcessKind::CalculateNpsOnboarding => DispatchMode::Stateless,
            _ => DispatchMode::StageTracked,
        }
    }
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.process_name())
    }
}

/// What the scheduler should do with a record after its handler ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Write this outcome and stamp `executed`.
    Settle(Outcome),
    /// Leave the record as the handler left it.
    Unchanged,
}

/// Everything a handler may touch while processing one record.
pub struct HandlerContext<'a> {
    pub db: &'a StatusEngineDb,
    pub services: &'a Services,
    /// Batch start time, used for every timestamp the handler writes.
    pub now: DateTime<Utc>,
}

impl HandlerContext<'_> {
    /// Progress row for `email`, or `NotFound` when the client has none.
    pub(crate) fn required_progress(&self, email: &str, ignore_case: bool) -> Result<ProgressStatus> {
        self.db
            .find_progress(email, ignore_case)?
            .ok_or_else(|| HykeError::NotFound(format!("progress status for {email}")))
    }
}

/// One workflow transition, keyed by process kind.
#[async_trait]
pub trait ProcessHandler: Send + Sync {
    fn kind(&self) -> ProcessKind;

    async fn execute(
        &self,
        ctx: &HandlerContext<'_>,
        record: &StatusEngineRecord,
    ) -> Result<Disposition>;
}

/// Process kind → handler map, built once at startup and handed to the scheduler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<ProcessKind, Arc<dyn ProcessHandler>>,
}

impl HandlerRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with a handler for every process kind.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register(ClientOnboardingSurvey);
        registry.register(PaymentErrorEmail);
        registry.register(RunningFlow);
        registry.register(KickoffQuestionnaireCompleted);
        registry.register(KickoffCallScheduled);
        registry.register(KickoffCallCancelled);
        registry.register(TransitionPlanSubmitted);
        registry.register(BkTrainingCallScheduled);
        registry.register(BkTrainingCallCancelled);
        registry.register(AnnualReportUploaded);
        registry.register(CalculateNps::new(NpsKind::Running));
        registry.register(CalculateNps::new(NpsKind::Onboarding));
        registry
    }

    /// Register a handler, replacing any previous one for the same kind.
    pub fn register<H: ProcessHandler + 'static>(&mut self, handler: H) {
        let kind = handler.kind();
        if self.handlers.insert(kind, Arc::new(handler)).is_some() {
            tracing::debug!("Handler for '{kind}' replaced");
        }
    }

    pub fn get(&self, kind: ProcessKind) -> Option<&dyn ProcessHandler> {
        self.handlers.get(&kind).map(|h| h.as_ref())
    }

    /// Find the handler for a raw `process` value.
    pub fn lookup(&self, process: &str) -> Option<&dyn ProcessHandler> {
        ProcessKind::from_process_name(process).and_then(|kind| self.get(kind))
    }

    /// Registered process names for one dispatch mode, in declaration order.
    pub fn process_names(&self, mode: DispatchMode) -> Vec<&'static str> {
        ProcessKind::ALL
            .into_iter()
            .filter(|k| k.mode() == mode && self.handlers.contains_key(k))
            .map(ProcessKind::process_name)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
