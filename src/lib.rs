#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod auth;
pub mod backend;
pub mod clock;
pub mod config;
pub mod cors;
pub mod error;
pub mod error_log;
pub mod functions;
pub mod identifier;
pub mod limiter;
mod middleware;
pub mod policy;
pub mod upstream;

pub use limiter::{RateLimitOutcome, RateLimiter};
pub use middleware::CorsGate;
pub use policy::RateLimitPolicy;
