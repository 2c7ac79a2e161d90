//! # FFM Ledger
//!
//! A local SQLite ledger of hourly retail counters.
//!
//! FFM Ledger records, per hour, how many units of each item were prepared,
//! sold, discarded and left on display, together with store-wide customer
//! counts. Daily summaries are derived from the hourly record by a rollup
//! engine, and a content-addressed cache keeps recognition results so the
//! same photographed sheet is never recognized twice.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Recognition  │──▶│   Import     │──▶│ Hourly facts │
//! │ (cache-first)│   │ name → item  │   │  (upserts)   │
//! └──────┬───────┘   └──────────────┘   └──────┬───────┘
//!        │                                     │ rollup
//!        ▼                                     ▼
//! ┌──────────────┐                      ┌──────────────┐
//! │ Result cache │                      │    Daily     │
//! │ sha256 keyed │                      │  summaries   │
//! └──────────────┘                      └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ffm init                          # create database, run migrations
//! ffm item add onigiri --price 150  # register an item
//! ffm import sheet.json             # store a recognition payload
//! ffm show 2025-01-01               # hourly grid and daily summary
//! ffm rebuild --all                 # recompute every summary
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Versioned schema migrations |
//! | [`schema`] | Manual schema maintenance |
//! | [`catalog`] | Item catalog |
//! | [`metrics`] | Hourly fact repository |
//! | [`rollup`] | Daily summary rebuilds |
//! | [`cache`] | Recognition result cache |
//! | [`recognition`] | Cache-first recognizer runner |
//! | [`import`] | Recognition payload import |
//! | [`stats`] | Data file statistics |
//! | [`error`] | Store error taxonomy |
//!
//! Domain types (metrics, hours, payloads, cache keys) live in the `ffm-core` crate.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod import;
pub mod metrics;
pub mod migrate;
pub mod recognition;
pub mod rollup;
pub mod schema;
pub mod show;
pub mod stats;
pub mod telemetry;

pub use error::{Result, StoreError};
