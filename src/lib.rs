//! prompt-anywhere - summon an AI prompt over any desktop context
//!
//! A global hotkey raises a prompt surface; submitted prompts stream through
//! a pluggable agent backend into a live transcript, and every completed
//! turn is persisted to a local session store.

pub mod agent;
pub mod bridge;
pub mod config;
pub mod coordinator;
pub mod features;
pub mod hotkey;
pub mod session;
pub mod ui;
pub mod worker;
