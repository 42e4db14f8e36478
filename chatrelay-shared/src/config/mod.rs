//! # Configuration
//!
//! This module contains all configuration-related structures and functions
//! for the server, the chat providers and the startup seed data.

pub mod llm;
pub mod seed;
pub mod server;
