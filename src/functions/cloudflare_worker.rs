use crate::auth::AuthenticatedCaller;
use crate::error::FunctionError;
use crate::functions::{CallContext, FunctionState};
use crate::upstream::WorkerDeployment;
use actix_web::{post, web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const FUNCTION_NAME: &str = "create-cloudflare-worker";

const DEFAULT_SCRIPT: &str = r#"export default {
  async fetch(request) {
    return new Response("Coming soon", { headers: { "content-type": "text/plain" } });
  },
};
"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateWorkerRequest {
    pub subdomain: String,
    #[serde(default)]
    pub script: Option<String>,
}

impl CreateWorkerRequest {
    pub fn validate(&self) -> Result<(), FunctionError> {
        if !is_valid_worker_name(&self.subdomain) {
            return Err(FunctionError::validation(
                "subdomain must be 3-63 lowercase letters, digits or hyphens, and may not start or end with a hyphen",
            ));
        }
        if matches!(&self.script, Some(script) if script.trim().is_empty()) {
            return Err(FunctionError::validation("script must not be empty"));
        }
        Ok(())
    }
}

fn is_valid_worker_name(name: &str) -> bool {
    (3..=63).contains(&name.len())
        && !name.starts_with('-')
        && !name.ends_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Deploys a worker script under the requested subdomain.
#[post("/create-cloudflare-worker")]
pub async fn create_cloudflare_worker(
    state: web::Data<FunctionState>,
    caller: AuthenticatedCaller,
    req: HttpRequest,
    body: web::Json<CreateWorkerRequest>,
) -> Result<HttpResponse, FunctionError> {
    let body = body.into_inner();
    body.validate()?;
    let ctx = CallContext::new(FUNCTION_NAME, Some(&caller.0), &req)
        .with_payload(&json!({ "subdomain": body.subdomain }));
    state
        .admit(&ctx, &state.policies.create_cloudflare_worker)
        .await?;

    let deployment = WorkerDeployment {
        name: body.subdomain,
        script: body.script.unwrap_or_else(|| DEFAULT_SCRIPT.to_string()),
    };
    match state.workers.deploy_worker(&deployment).await {
        Ok(worker) => {
            log::info!("Deployed worker {} for {}", worker.name, caller.0.user_id);
            Ok(HttpResponse::Ok().json(json!({
                "success": true,
                "worker_name": worker.name,
                "worker_url": worker.url,
            })))
        }
        Err(e) => Err(state
            .upstream_failure(&ctx, e, json!({ "worker_name": deployment.name }))
            .await),
    }
}
