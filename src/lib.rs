//! Key-rotating gateway in front of Google's generative-language API.
//!
//! Browsers POST `{prompt, model?}`; the gateway picks a starting key, retries 429s
//! with exponential backoff, fails over across the pool and returns the upstream
//! JSON verbatim. The same [`gateway::Gateway`] core backs the axum server
//! ([`server::router`]) and the buffered edge adapter ([`edge::EdgeHandler`]).

pub mod balancer;
pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod edge;
pub mod error;
pub mod gateway;
pub mod response;
pub mod server;
pub mod upstream;

#[cfg(test)]
mod testing;
