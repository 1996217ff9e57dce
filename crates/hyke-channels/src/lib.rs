//! # Hyke Channels
//! Outbound collaborators: SMTP email and HTTP service endpoints.

pub mod email;
pub mod http;

use std::sync::Arc;

use hyke_core::HykeConfig;
use hyke_core::error::Result;
use hyke_scheduler::{Mailer, Services, StatusEngineDb, StoreReminders};

pub use email::{LogMailer, SmtpMailer};
pub use http::HttpServices;

/// Wire the production collaborators from configuration.
pub fn services_from_config(config: &HykeConfig, db: Arc<StatusEngineDb>) -> Result<Services> {
    let mailer: Arc<dyn Mailer> = if config.email.enabled {
        Arc::new(SmtpMailer::new(config.email.clone())?)
    } else {
        tracing::info!("📭 Email delivery disabled, using log mailer");
        Arc::new(LogMailer)
    };
    let http = Arc::new(HttpServices::new(config.services.clone()));

    Ok(Services {
        mailer,
        surveys: http.clone(),
        folders: http.clone(),
        nps: http,
        reminders: Arc::new(StoreReminders::new(db)),
    })
}
