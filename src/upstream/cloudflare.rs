use crate::upstream::{
    decode_response, DeployedWorker, Provider, UpstreamError, WorkerDeployment, WorkerProvider,
};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;

pub const DEFAULT_API_BASE: &str = "https://api.cloudflare.com/client/v4";
const COMPATIBILITY_DATE: &str = "2024-09-23";
const MAIN_MODULE: &str = "worker.js";

#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    errors: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    code: i64,
    message: String,
}

fn error_message(body: &serde_json::Value) -> Option<String> {
    body["errors"][0]["message"].as_str().map(ToOwned::to_owned)
}

/// Deploys module workers through the Cloudflare API and exposes them on `workers.dev`.
#[derive(Clone)]
pub struct CloudflareClient {
    client: reqwest::Client,
    api_base: String,
    account_id: String,
    api_token: String,
    workers_subdomain: String,
}

impl CloudflareClient {
    /// # Arguments
    ///
    /// * `workers_subdomain`: The account's `<subdomain>.workers.dev` name.
    pub fn new(
        client: reqwest::Client,
        account_id: impl Into<String>,
        api_token: impl Into<String>,
        workers_subdomain: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_base: DEFAULT_API_BASE.to_string(),
            account_id: account_id.into(),
            api_token: api_token.into(),
            workers_subdomain: workers_subdomain.into(),
        }
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn script_url(&self, name: &str) -> String {
        format!(
            "{}/accounts/{}/workers/scripts/{}",
            self.api_base, self.account_id, name
        )
    }

    async fn check(&self, response: reqwest::Response) -> Result<(), UpstreamError> {
        let status = response.status().as_u16();
        let envelope: Envelope =
            decode_response(Provider::Cloudflare, response, error_message).await?;
        if envelope.success {
            return Ok(());
        }
        let message = envelope
            .errors
            .first()
            .map(|e| format!("{} (code {})", e.message, e.code))
            .unwrap_or_else(|| "request was not successful".to_string());
        Err(UpstreamError::Api {
            provider: Provider::Cloudflare,
            status,
            message,
        })
    }
}

#[async_trait]
impl WorkerProvider for CloudflareClient {
    async fn deploy_worker(
        &self,
        deployment: &WorkerDeployment,
    ) -> Result<DeployedWorker, UpstreamError> {
        let metadata = json!({
            "main_module": MAIN_MODULE,
            "compatibility_date": COMPATIBILITY_DATE,
        });
        let metadata = Part::text(metadata.to_string())
            .mime_str("application/json")
            .map_err(UpstreamError::network(Provider::Cloudflare))?;
        let script = Part::text(deployment.script.clone())
            .file_name(MAIN_MODULE)
            .mime_str("application/javascript+module")
            .map_err(UpstreamError::network(Provider::Cloudflare))?;
        let form = Form::new()
            .part("metadata", metadata)
            .part(MAIN_MODULE, script);

        let response = self
            .client
            .put(self.script_url(&deployment.name))
            .bearer_auth(&self.api_token)
            .multipart(form)
            .send()
            .await
            .map_err(UpstreamError::network(Provider::Cloudflare))?;
        self.check(response).await?;

        let response = self
            .client
            .post(format!("{}/subdomain", self.script_url(&deployment.name)))
            .bearer_auth(&self.api_token)
            .json(&json!({ "enabled": true }))
            .send()
            .await
            .map_err(UpstreamError::network(Provider::Cloudflare))?;
        self.check(response).await?;

        Ok(DeployedWorker {
            name: deployment.name.clone(),
            url: format!(
                "https://{}.{}.workers.dev",
                deployment.name, self.workers_subdomain
            ),
        })
    }
}
