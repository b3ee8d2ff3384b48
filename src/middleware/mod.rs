//! HTTP middleware: authentication, rate limiting, request validation and
//! security headers, layered onto the router in `main`.

pub mod auth;
pub mod ip;
pub mod rate_limit;
pub mod security_headers;
pub mod validation;

pub use rate_limit::EndpointRateLimiter;
