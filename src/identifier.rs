use crate::auth::Caller;
use crate::backend::IdentifierType;
use actix_web::http::header::{HeaderMap, HeaderName, X_FORWARDED_FOR};
use once_cell::sync::Lazy;
use std::net::{IpAddr, Ipv6Addr};

pub static CF_CONNECTING_IP: Lazy<HeaderName> =
    Lazy::new(|| HeaderName::from_static("cf-connecting-ip"));

pub static X_REAL_IP: Lazy<HeaderName> = Lazy::new(|| HeaderName::from_static("x-real-ip"));

/// Used when no proxy header names the client.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// The subject a request is rate limited as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitIdentifier {
    value: String,
    kind: IdentifierType,
}

impl RateLimitIdentifier {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            value: user_id.into(),
            kind: IdentifierType::User,
        }
    }

    pub fn ip(address: impl Into<String>) -> Self {
        Self {
            value: address.into(),
            kind: IdentifierType::Ip,
        }
    }

    /// The authenticated user if there is one, otherwise the client IP taken from the proxy
    /// headers (see [client_ip]).
    pub fn resolve(caller: Option<&Caller>, headers: &HeaderMap) -> Self {
        match caller {
            Some(caller) => Self::user(caller.user_id.clone()),
            None => Self::ip(client_ip(headers)),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn kind(&self) -> IdentifierType {
        self.kind
    }
}

/// Derives the client IP from proxy headers, in order of preference: the first entry of
/// `x-forwarded-for`, then `cf-connecting-ip`, then `x-real-ip`.
///
/// # Security
///
/// These headers are only trustworthy when the service is deployed behind a proxy that you
/// control and that overwrites them.
///
/// # IPv6
///
/// IPv6 addresses will be grouped into a single key per /64
pub fn client_ip(headers: &HeaderMap) -> String {
    let forwarded = header_str(headers, &X_FORWARDED_FOR)
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    forwarded
        .or_else(|| header_str(headers, &CF_CONNECTING_IP))
        .or_else(|| header_str(headers, &X_REAL_IP))
        .map(ip_key)
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

// Groups IPv6 addresses together, see:
// https://adam-p.ca/blog/2022/02/ipv6-rate-limiting/
// Values that are not addresses are kept as given.
fn ip_key(ip_str: &str) -> String {
    match ip_str.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.to_string(),
        Ok(IpAddr::V6(v6)) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return v4.to_string();
            }
            let segments = v6.segments();
            let subnet = Ipv6Addr::new(
                segments[0],
                segments[1],
                segments[2],
                segments[3],
                0,
                0,
                0,
                0,
            );
            format!("{}/64", subnet)
        }
        Err(_) => ip_str.to_string(),
    }
}
