//! # FFM Core
//!
//! Runtime-free building blocks of the FFM ledger: the typed hourly metric
//! model, date normalization, the item catalog seam, the recognition payload
//! shape, and content-addressed cache keys.
//!
//! This crate has no tokio, sqlx, or filesystem dependencies. Storage lives
//! in the `ffm-ledger` crate.

pub mod cache_key;
pub mod catalog;
pub mod date;
pub mod models;
pub mod payload;
