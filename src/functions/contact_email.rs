use crate::auth::OptionalCaller;
use crate::error::FunctionError;
use crate::functions::{CallContext, FunctionState};
use crate::upstream::OutgoingEmail;
use actix_web::{post, web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const FUNCTION_NAME: &str = "send-contact-email";

const MAX_NAME_LENGTH: usize = 100;
const MAX_SUBJECT_LENGTH: usize = 200;
const MAX_MESSAGE_LENGTH: usize = 5000;
const MAX_EMAIL_LENGTH: usize = 254;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactRequest {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub message: String,
}

impl ContactRequest {
    pub fn validate(&self) -> Result<(), FunctionError> {
        let name = self.name.trim();
        if name.is_empty() || name.chars().count() > MAX_NAME_LENGTH {
            return Err(FunctionError::validation(format!(
                "name must be between 1 and {MAX_NAME_LENGTH} characters"
            )));
        }
        if !is_plausible_email(self.email.trim()) {
            return Err(FunctionError::validation("email address is invalid"));
        }
        if matches!(&self.subject, Some(s) if s.chars().count() > MAX_SUBJECT_LENGTH) {
            return Err(FunctionError::validation(format!(
                "subject must be at most {MAX_SUBJECT_LENGTH} characters"
            )));
        }
        let message = self.message.trim();
        if message.is_empty() || message.chars().count() > MAX_MESSAGE_LENGTH {
            return Err(FunctionError::validation(format!(
                "message must be between 1 and {MAX_MESSAGE_LENGTH} characters"
            )));
        }
        Ok(())
    }

    fn to_email(&self, state: &FunctionState) -> OutgoingEmail {
        let name = self.name.trim();
        let subject = self
            .subject
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| format!("New message from {name}"));
        let html = format!(
            "<p><strong>From:</strong> {} &lt;{}&gt;</p><p>{}</p>",
            escape_html(name),
            escape_html(self.email.trim()),
            escape_html(self.message.trim()).replace('\n', "<br>")
        );
        OutgoingEmail {
            from: state.contact.from.clone(),
            to: vec![state.contact.recipient.clone()],
            subject: format!("{}{}", state.contact.subject_prefix, subject),
            html,
            reply_to: Some(self.email.trim().to_string()),
        }
    }
}

fn is_plausible_email(email: &str) -> bool {
    if email.len() > MAX_EMAIL_LENGTH || email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Forwards a contact form submission by email.
///
/// Signed in callers are rate limited by user, everyone else by IP.
#[post("/send-contact-email")]
pub async fn send_contact_email(
    state: web::Data<FunctionState>,
    caller: OptionalCaller,
    req: HttpRequest,
    body: web::Json<ContactRequest>,
) -> Result<HttpResponse, FunctionError> {
    let body = body.into_inner();
    body.validate()?;
    let caller = caller.0;
    let ctx = CallContext::new(FUNCTION_NAME, caller.as_ref(), &req).with_payload(&json!({
        "name": body.name,
        "email": body.email,
        "subject": body.subject,
    }));
    state.admit(&ctx, &state.policies.send_contact_email).await?;

    let email = body.to_email(&state);
    match state.email.send(&email).await {
        Ok(sent) => Ok(HttpResponse::Ok().json(json!({ "success": true, "id": sent.id }))),
        Err(e) => Err(state
            .upstream_failure(&ctx, e, json!({ "recipient": email.to }))
            .await),
    }
}
