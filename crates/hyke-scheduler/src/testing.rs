//! Recording collaborators and fixtures for handler and scheduler tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hyke_core::error::{HykeError, Result};

use crate::collaborators::{
    FolderProvisioner, Mailer, NpsCalculator, NpsKind, ReminderScheduler, Services, SurveyService,
};
use crate::handlers::HandlerContext;
use crate::persistence::StatusEngineDb;
use crate::records::{NewRecord, StatusEngineRecord};
use crate::report::AnnualReport;

/// Records every collaborator call as `"<call>:<arg>"`.
#[derive(Default)]
pub struct FakeServices {
    calls: Mutex<Vec<String>>,
    pub fail_mail: AtomicBool,
    pub fail_surveys: AtomicBool,
    pub fail_folders: AtomicBool,
    pub fail_nps: AtomicBool,
}

impl FakeServices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail(flag: &AtomicBool) {
        flag.store(true, Ordering::SeqCst);
    }

    fn record(&self, call: &str, arg: &str, fail: &AtomicBool) -> Result<()> {
        self.calls.lock().unwrap().push(format!("{call}:{arg}"));
        if fail.load(Ordering::SeqCst) {
            return Err(HykeError::Service(format!("{call} unavailable")));
        }
        Ok(())
    }
}

#[async_trait]
impl Mailer for FakeServices {
    async fn send_template(&self, email: &str, template: &str) -> Result<()> {
        self.calls.lock().unwrap().push(format!("mail:{email}:{template}"));
        if self.fail_mail.load(Ordering::SeqCst) {
            return Err(HykeError::Email("smtp down".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SurveyService for FakeServices {
    async fn send_onboarding_survey(&self, email: &str) -> Result<()> {
        self.record("onboarding_survey", email, &self.fail_surveys)
    }

    async fn schedule_onboarding_sequence(&self, email: &str) -> Result<()> {
        self.record("onboarding_sequence", email, &self.fail_surveys)
    }

    async fn schedule_running_sequence(&self, email: &str) -> Result<()> {
        self.record("running_sequence", email, &self.fail_surveys)
    }
}

#[async_trait]
impl FolderProvisioner for FakeServices {
    async fn create_folders(&self, email: &str) -> Result<()> {
        self.record("folders", email, &self.fail_folders)
    }
}

#[async_trait]
impl NpsCalculator for FakeServices {
    async fn calculate(&self, kind: NpsKind) -> Result<()> {
        self.record("nps", &kind.to_string(), &self.fail_nps)
    }
}

#[async_trait]
impl ReminderScheduler for FakeServices {
    async fn schedule_next_annual_report(
        &self,
        email: &str,
        report: &AnnualReport,
        _at: DateTime<Utc>,
    ) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("reminder:{email}:{report}"));
        Ok(())
    }
}

pub fn services_from(fake: &Arc<FakeServices>) -> Services {
    Services {
        mailer: fake.clone(),
        surveys: fake.clone(),
        folders: fake.clone(),
        nps: fake.clone(),
        reminders: fake.clone(),
    }
}

pub fn context<'a>(db: &'a StatusEngineDb, services: &'a Services) -> HandlerContext<'a> {
    HandlerContext {
        db,
        services,
        now: Utc::now(),
    }
}

/// Insert `record` and read it back.
pub fn trigger(db: &StatusEngineDb, record: NewRecord) -> StatusEngineRecord {
    let id = db.insert_record(&record).unwrap();
    db.get_record(id).unwrap().unwrap()
}
