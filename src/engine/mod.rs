//! # Engine Module
//!
//! Archetype store the reactive layer runs on.
//!
//! This module contains the core building blocks:
//! - Component registry and marker slots
//! - Chunked column storage and archetypes
//! - Entity allocation
//! - Queries and entity lists
//! - The deferred command buffer and its barrier
//! - Systems and the stage scheduler
//!
//! Public API exposure is controlled by `lib.rs`.

pub mod types;
pub mod error;
pub mod component;
pub mod storage;
pub mod entity;
pub mod archetype;
pub mod query;
pub mod commands;
pub mod systems;
pub mod scheduler;
pub mod manager;
