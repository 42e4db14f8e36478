#![cfg_attr(not(test), forbid(unsafe_code))]
// Tests mutate process environment variables, which is unsafe in edition 2024.
#![cfg_attr(test, allow(unsafe_code))]

pub mod config;
pub mod llms;
pub mod models;
