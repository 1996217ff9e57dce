//! Record definitions: the rows the status engine reads and writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const FORMATION_SYSTEM: &str = "Hyke System";
pub const FORMATION_DAILY: &str = "Hyke Daily";
pub const FORMATION_SALESFORCE: &str = "Hyke Salesforce";

/// Outcome of a status engine record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Outcome {
    Failed,
    SecondRetry,
    FirstRetry,
    Scheduled,
    Completed,
    Unnecessary,
    Offboarded,
}

impl Outcome {
    pub const ALL: [Outcome; 7] = [
        Outcome::Failed,
        Outcome::SecondRetry,
        Outcome::FirstRetry,
        Outcome::Scheduled,
        Outcome::Completed,
        Outcome::Unnecessary,
        Outcome::Offboarded,
    ];

    /// Integer code stored in the `outcome` column.
    pub fn code(self) -> i32 {
        match self {
            Outcome::Failed => -4,
            Outcome::SecondRetry => -3,
            Outcome::FirstRetry => -2,
            Outcome::Scheduled => -1,
            Outcome::Completed => 1,
            Outcome::Unnecessary => 4,
            Outcome::Offboarded => 5,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|o| o.code() == code)
    }

    pub fn label(self) -> &'static str {
        match self {
            Outcome::Scheduled => "Scheduled",
            Outcome::Completed => "Completed",
            Outcome::Unnecessary => "Cancelled due to Completed Task",
            Outcome::Offboarded => "Cancelled due to Offboarding",
            Outcome::FirstRetry => "Retrying previously failed",
            Outcome::SecondRetry => "Retrying previously failed again",
            Outcome::Failed => "Gave up retrying due to multiple failures",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A unit of scheduled or completed work for one client and one process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusEngineRecord {
    pub id: i64,
    pub email: String,
    pub process: String,
    pub formation_type: Option<String>,
    pub process_stage: i32,
    pub outcome: Outcome,
    pub data: Option<String>,
    pub created: DateTime<Utc>,
    pub executed: Option<DateTime<Utc>>,
}

impl StatusEngineRecord {
    pub fn data_or_empty(&self) -> &str {
        self.data.as_deref().unwrap_or("")
    }
}

impl fmt::Display for StatusEngineRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {} - {}", self.id, self.email, self.process)
    }
}

/// A record about to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub email: String,
    pub process: String,
    pub formation_type: Option<String>,
    pub process_stage: i32,
    pub outcome: Outcome,
    pub data: Option<String>,
    pub executed: Option<DateTime<Utc>>,
}

impl NewRecord {
    /// A scheduled stage 1 record with no data and no execution time.
    pub fn scheduled(email: &str, process: &str, formation_type: &str) -> Self {
        Self {
            email: email.to_string(),
            process: process.to_string(),
            formation_type: Some(formation_type.to_string()),
            process_stage: 1,
            outcome: Outcome::Scheduled,
            data: None,
            executed: None,
        }
    }

    pub fn with_stage(mut self, stage: i32) -> Self {
        self.process_stage = stage;
        self
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn with_optional_data(mut self, data: Option<String>) -> Self {
        self.data = data;
        self
    }

    pub fn executed_at(mut self, at: DateTime<Utc>) -> Self {
        self.executed = Some(at);
        self
    }
}

/// Equality filter over status engine columns. `None` fields match anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub email: Option<String>,
    pub process: Option<String>,
    pub formation_type: Option<String>,
    pub process_stage: Option<i32>,
    pub outcome: Option<Outcome>,
    pub data: Option<String>,
}

impl RecordFilter {
    /// Filter matching every column a get-or-create lookup uses.
    pub fn matching(record: &NewRecord) -> Self {
        Self {
            email: Some(record.email.clone()),
            process: Some(record.process.clone()),
            formation_type: record.formation_type.clone(),
            process_stage: Some(record.process_stage),
            outcome: Some(record.outcome),
            data: record.data.clone(),
        }
    }
}

/// Columns of the `progress_status` table that handlers update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressField {
    LlcFormation,
    PostFormation,
    Ein,
    BusinessLicense,
    BankAccount,
    Contribution,
    Soi,
    Ftb,
    Questionnaire,
    BookkeepingSetup,
    TaxSetup,
    ClientSurvey,
    BkServicesSetup,
}

impl ProgressField {
    pub fn column(self) -> &'static str {
        match self {
            ProgressField::LlcFormation => "llcformationstatus",
            ProgressField::PostFormation => "postformationstatus",
            ProgressField::Ein => "einstatus",
            ProgressField::BusinessLicense => "businesslicensestatus",
            ProgressField::BankAccount => "bankaccountstatus",
            ProgressField::Contribution => "contributionstatus",
            ProgressField::Soi => "SOIstatus",
            ProgressField::Ftb => "FTBstatus",
            ProgressField::Questionnaire => "questionnairestatus",
            ProgressField::BookkeepingSetup => "bookkeepingsetupstatus",
            ProgressField::TaxSetup => "taxsetupstatus",
            ProgressField::ClientSurvey => "clientsurveystatus",
            ProgressField::BkServicesSetup => "bk_services_setup_status",
        }
    }
}

/// Per-client workflow progress flags.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProgressStatus {
    pub id: i64,
    pub email: Option<String>,
    pub llc_formation: Option<String>,
    pub post_formation: Option<String>,
    pub ein: Option<String>,
    pub business_license: Option<String>,
    pub bank_account: Option<String>,
    pub contribution: Option<String>,
    pub soi: Option<String>,
    pub ftb: Option<String>,
    pub questionnaire: Option<String>,
    pub bookkeeping_setup: Option<String>,
    pub tax_setup: Option<String>,
    pub client_survey: Option<String>,
    /// "pending" or "completed".
    pub bk_services_setup: String,
}

impl ProgressStatus {
    pub fn get(&self, field: ProgressField) -> Option<&str> {
        match field {
            ProgressField::LlcFormation => self.llc_formation.as_deref(),
            ProgressField::PostFormation => self.post_formation.as_deref(),
            ProgressField::Ein => self.ein.as_deref(),
            ProgressField::BusinessLicense => self.business_license.as_deref(),
            ProgressField::BankAccount => self.bank_account.as_deref(),
            ProgressField::Contribution => self.contribution.as_deref(),
            ProgressField::Soi => self.soi.as_deref(),
            ProgressField::Ftb => self.ftb.as_deref(),
            ProgressField::Questionnaire => self.questionnaire.as_deref(),
            ProgressField::BookkeepingSetup => self.bookkeeping_setup.as_deref(),
            ProgressField::TaxSetup => self.tax_setup.as_deref(),
            ProgressField::ClientSurvey => self.client_survey.as_deref(),
            ProgressField::BkServicesSetup => Some(self.bk_services_setup.as_str()),
        }
    }
}

/// A scheduling event received from Calendly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalendlyLog {
    pub id: i64,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub email: String,
    pub phone_number: Option<String>,
    pub slug: Option<String>,
    pub event_name: Option<String>,
    pub assigned_to: Option<String>,
    pub event_type: Option<String>,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub is_canceled: bool,
    pub event_id: String,
    pub data: Option<String>,
}

impl fmt::Display for CalendlyLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let when = self
            .scheduled_time
            .map(|t| t.format("%I:%M%p - %A, %B %d, %Y").to_string())
            .unwrap_or_default();
        write!(
            f,
            "{} - {} - {} - {}",
            self.id,
            self.email,
            self.slug.as_deref().unwrap_or(""),
            when
        )
    }
}

/// Calendly event payload to insert or update by `event_id`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalendlyEvent {
    pub event_id: String,
    pub email: String,
    pub phone_number: Option<String>,
    pub slug: Option<String>,
    pub event_name: Option<String>,
    pub assigned_to: Option<String>,
    pub event_type: Option<String>,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub data: Option<String>,
}

/// Kind of write captured by a history row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HistoryChange {
    Created,
    Changed,
}

impl HistoryChange {
    /// Marker stored in the `history_type` column.
    pub fn symbol(self) -> &'static str {
        match self {
            HistoryChange::Created => "+",
            HistoryChange::Changed => "~",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "+" => Some(HistoryChange::Created),
            "~" => Some(HistoryChange::Changed),
            _ => None,
        }
    }
}

/// Snapshot of a row taken right after it was written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry<T> {
    pub history_id: i64,
    pub history_date: DateTime<Utc>,
    pub change: HistoryChange,
    pub snapshot: T,
}
