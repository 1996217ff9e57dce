//! HTTP collaborators: surveys, folder provisioning and NPS calculation
//! reached through JSON POST endpoints.

use std::time::Duration;

use async_trait::async_trait;
use hyke_core::config::ServicesConfig;
use hyke_core::error::{HykeError, Result};
use hyke_scheduler::{FolderProvisioner, NpsCalculator, NpsKind, SurveyService};
use serde_json::{Value, json};

/// Posts collaborator calls to the configured service endpoints.
/// Calls whose endpoint is not configured are logged and skipped.
pub struct HttpServices {
    client: reqwest::Client,
    config: ServicesConfig,
}

impl HttpServices {
    pub fn new(config: ServicesConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn post(&self, url: Option<&str>, payload: Value) -> Result<()> {
        let action = payload["action"].as_str().unwrap_or("call").to_string();
        let Some(url) = url else {
            tracing::info!("🔕 No endpoint configured for '{action}', skipping");
            return Ok(());
        };

        let mut req = self
            .client
            .post(url)
            .json(&payload)
            .timeout(Duration::from_secs(self.config.timeout_secs));
        if let Some(token) = &self.config.api_token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| HykeError::Service(format!("{action} failed: {e}")))?;

        if resp.status().is_success() {
            tracing::info!("✅ {action} accepted by {url}");
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(HykeError::Service(format!("{action} error {status}: {body}")))
        }
    }
}

fn email_payload(action: &str, email: &str) -> Value {
    json!({ "action": action, "email": email })
}

#[async_trait]
impl SurveyService for HttpServices {
    async fn send_onboarding_survey(&self, email: &str) -> Result<()> {
        self.post(
            self.config.surveys_url.as_deref(),
            email_payload("send_onboarding_survey", email),
        )
        .await
    }

    async fn schedule_onboarding_sequence(&self, email: &str) -> Result<()> {
        self.post(
            self.config.surveys_url.as_deref(),
            email_payload("schedule_onboarding_sequence", email),
        )
        .await
    }

    async fn schedule_running_sequence(&self, email: &str) -> Result<()> {
        self.post(
            self.config.surveys_url.as_deref(),
            email_payload("schedule_running_sequence", email),
        )
        .await
    }
}

#[async_trait]
impl FolderProvisioner for HttpServices {
    async fn create_folders(&self, email: &str) -> Result<()> {
        self.post(
            self.config.folders_url.as_deref(),
            email_payload("create_folders", email),
        )
        .await
    }
}

#[async_trait]
impl NpsCalculator for HttpServices {
    async fn calculate(&self, kind: NpsKind) -> Result<()> {
        self.post(
            self.config.nps_url.as_deref(),
            json!({ "action": "calculate_nps", "kind": kind.to_string() }),
        )
        .await
    }
}
