//! ChatRelay server library: streaming chat relay, history assembly, and
//! OpenAI-compatible completion endpoints.

#![cfg_attr(test, allow(unsafe_code))]

pub mod app_state;
pub mod handlers;
pub mod http;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod services;
pub mod tracer;

#[cfg(test)]
mod tracer_tests;
