//! Fragment caching for widget rendering.
//!
//! Widgets render either raw data or full markup. This crate decides whether
//! that output comes from a cache, derives deterministic keys for it, and
//! invalidates groups of entries through tags, on backends with and without
//! native tag support.

pub mod cache;
pub mod config;
pub mod infra;
pub mod render;
