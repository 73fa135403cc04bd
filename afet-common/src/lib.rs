//! # Afet Common Library
//!
//! Shared code for the feed enrichment services including:
//! - Feed and location models, wire payloads exchanged over the transport
//! - Extra parameter parsing and masking
//! - Relational store schema and the `FeedStore` capability
//! - Configuration loading
//! - Common error type

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod masking;
pub mod models;

pub use error::{Error, Result};
