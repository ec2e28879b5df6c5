//! Claude Relay - supervised Claude Code runs with coalesced progress relay.

pub mod cli;
pub mod config;
pub mod dedupe;
pub mod relay;
pub mod runner;
