pub mod auth;
pub mod rate_limit_headers;
