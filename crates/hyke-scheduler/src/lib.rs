//! # Hyke Scheduler
//!
//! Status engine store, workflow handlers and the batch scheduler that
//! advances client onboarding and running workflows.
//!
//! ## Architecture
//! ```text
//! SchedulerEngine::run_once
//!   ├── due_records(stage 1, stage-tracked processes)
//!   ├── due_records(any stage, stateless processes)
//!   └── for each record → HandlerRegistry → ProcessHandler
//!         ├── StatusEngineDb (records, progress flags)
//!         └── Services
//!               ├── Mailer
//!               ├── SurveyService
//!               ├── FolderProvisioner
//!               ├── NpsCalculator
//!               └── ReminderScheduler
//! ```

pub mod collaborators;
pub mod engine;
pub mod handlers;
pub mod persistence;
pub mod records;
pub mod report;

#[cfg(test)]
pub(crate) mod testing;

pub use collaborators::{
    FolderProvisioner, Mailer, NpsCalculator, NpsKind, ReminderScheduler, Services, StoreReminders,
    SurveyService,
};
pub use engine::{DispatchFailure, RunReport, SchedulerEngine, spawn_scheduler};
pub use handlers::{DispatchMode, Disposition, HandlerContext, HandlerRegistry, ProcessHandler, ProcessKind};
pub use persistence::StatusEngineDb;
pub use records::{
    CalendlyEvent, CalendlyLog, HistoryChange, HistoryEntry, NewRecord, Outcome, ProgressStatus,
    RecordFilter, StatusEngineRecord,
};
pub use report::AnnualReport;
