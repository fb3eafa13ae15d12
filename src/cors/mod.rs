//! Resolution of the single `Access-Control-Allow-Origin` value for a request.

use actix_web::http::header::{
    HeaderMap, HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN,
};
use regex::Regex;
use thiserror::Error;

pub const DEFAULT_ALLOW_HEADERS: &str = "authorization, x-client-info, apikey, content-type";
pub const DEFAULT_ALLOW_METHODS: &str = "POST, OPTIONS";

#[derive(Debug, Error)]
pub enum CorsError {
    #[error("At least one allowed origin must be configured")]
    NoOrigins,
    #[error("Allowed origin {0:?} is not a valid header value")]
    InvalidOrigin(String),
    #[error("Invalid origin pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// One entry of the allowed origins list.
#[derive(Debug, Clone)]
pub enum OriginPattern {
    Exact(String),
    /// A pattern containing `*`, e.g. `https://*.github.io`.
    Wildcard { pattern: String, regex: Regex },
}

impl OriginPattern {
    pub fn parse(pattern: &str) -> Result<Self, CorsError> {
        let pattern = pattern.trim();
        if pattern.is_empty() || HeaderValue::from_str(pattern).is_err() {
            return Err(CorsError::InvalidOrigin(pattern.to_string()));
        }
        if !pattern.contains('*') {
            return Ok(Self::Exact(pattern.to_string()));
        }
        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex =
            Regex::new(&format!("^{body}$")).map_err(|source| CorsError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;
        Ok(Self::Wildcard {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Exact(origin) => origin,
            Self::Wildcard { pattern, .. } => pattern,
        }
    }
}

/// The CORS headers attached to a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsHeaders {
    pub allow_origin: String,
    pub allow_headers: String,
    pub allow_methods: String,
}

impl CorsHeaders {
    pub fn apply(&self, map: &mut HeaderMap) {
        let pairs = [
            (ACCESS_CONTROL_ALLOW_ORIGIN, &self.allow_origin),
            (ACCESS_CONTROL_ALLOW_HEADERS, &self.allow_headers),
            (ACCESS_CONTROL_ALLOW_METHODS, &self.allow_methods),
        ];
        for (name, value) in pairs {
            match HeaderValue::from_str(value) {
                Ok(value) => {
                    map.insert(name, value);
                }
                Err(_) => log::warn!("Skipping invalid {name} value {value:?}"),
            }
        }
    }
}

/// Allowed origins for the functions.
///
/// An origin that matches nothing still gets a definite allowed origin (the first pattern), so
/// the browser rejects the response instead of the server; access control proper is left to
/// authentication.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    patterns: Vec<OriginPattern>,
    site_root_domain: Option<String>,
    allow_headers: String,
    allow_methods: String,
}

impl CorsPolicy {
    pub fn new<S: AsRef<str>>(origins: &[S]) -> Result<Self, CorsError> {
        let patterns = origins
            .iter()
            .map(|origin| OriginPattern::parse(origin.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        if patterns.is_empty() {
            return Err(CorsError::NoOrigins);
        }
        Ok(Self {
            patterns,
            site_root_domain: None,
            allow_headers: DEFAULT_ALLOW_HEADERS.to_string(),
            allow_methods: DEFAULT_ALLOW_METHODS.to_string(),
        })
    }

    /// Treat any `https` subdomain of `domain` as allowed, provided `https://<domain>` or
    /// `https://www.<domain>` is itself in the allowed list.
    pub fn site_root_domain(mut self, domain: Option<&str>) -> Self {
        self.site_root_domain = domain
            .map(|d| d.trim().trim_start_matches("www.").to_ascii_lowercase())
            .filter(|d| !d.is_empty());
        self
    }

    pub fn allow_headers(mut self, headers: &str) -> Self {
        self.allow_headers = headers.to_string();
        self
    }

    pub fn allow_methods(mut self, methods: &str) -> Self {
        self.allow_methods = methods.to_string();
        self
    }

    pub fn patterns(&self) -> &[OriginPattern] {
        &self.patterns
    }

    /// Resolves the header set for a request carrying `origin` (if any).
    pub fn resolve(&self, origin: Option<&str>) -> CorsHeaders {
        let allow_origin = origin
            .filter(|origin| self.is_allowed(origin))
            .unwrap_or_else(|| self.patterns[0].as_str());
        CorsHeaders {
            allow_origin: allow_origin.to_string(),
            allow_headers: self.allow_headers.clone(),
            allow_methods: self.allow_methods.clone(),
        }
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        let exact = self
            .patterns
            .iter()
            .any(|p| matches!(p, OriginPattern::Exact(o) if o == origin));
        if exact {
            return true;
        }
        let wildcard = self.patterns.iter().any(|p| match p {
            OriginPattern::Wildcard { regex, .. } => regex.is_match(origin),
            OriginPattern::Exact(_) => false,
        });
        wildcard || self.matches_site_root(origin)
    }

    fn matches_site_root(&self, origin: &str) -> bool {
        let Some(root) = &self.site_root_domain else {
            return false;
        };
        let canonical = [format!("https://{root}"), format!("https://www.{root}")];
        let listed = self.patterns.iter().any(|p| match p {
            OriginPattern::Exact(o) => canonical.iter().any(|c| c.eq_ignore_ascii_case(o)),
            OriginPattern::Wildcard { .. } => false,
        });
        if !listed {
            return false;
        }
        let Some(host) = origin.strip_prefix("https://") else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        host == *root || host.ends_with(&format!(".{root}"))
    }
}
