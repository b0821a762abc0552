//! # Reactive Module
//!
//! Change detection layered on top of the store.
//!
//! - [`group`]: membership groups, their marker slots and derived queries
//! - [`cache`]: canonical lookup of registered groups and update groups
//! - [`membership`]: the membership diff pass
//! - [`shadow`]: shadow copies and changed-tags for value diffs
//! - [`value`]: the value diff pass
//! - [`cleanup`]: removal of transient changed-tags
//! - [`engine`]: registration API and the per-tick pipeline
//!
//! All cross-tick state is stored as components, so the store alone answers
//! "which entities joined, left or changed".

pub mod cache;
pub mod cleanup;
pub mod config;
pub mod engine;
pub mod group;
pub mod membership;
pub mod shadow;
pub mod value;
