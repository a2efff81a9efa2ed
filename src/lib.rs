//! # Page Catalog
//!
//! Incremental ingestion of paginated document dumps into a searchable
//! catalog.
//!
//! An external producer renders each page of a large source (a multi-thousand
//! page PDF bundle, say) into `page_NNNNN.png` plus optional OCR text. This
//! crate turns every materialized page into exactly one catalog record:
//! the page image is stored, a thumbnail derived, the text classified into a
//! fixed category set, and the result inserted idempotently under the natural
//! key `(source_id, page_index)`.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌───────────┐
//! │  Producer   │──▶│   Coordinator    │──▶│  SQLite   │
//! │ page_*.png  │   │ classify + store │   │ FTS5      │
//! └─────────────┘   └────────▲─────────┘   └─────┬─────┘
//!                            │                   │
//!                  ┌─────────┴───────┐     ┌─────▼─────┐
//!                  │ batch  │ watch  │     │  search   │
//!                  └─────────────────┘     └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pcat init                       # create database
//! pcat ingest bundle.pdf          # one pass over every page
//! pcat watch bundle.pdf           # follow a running producer
//! pcat search "flight log" --category flight_log
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Run-level and per-page error types |
//! | [`classify`] | Deterministic page classifier |
//! | [`people`] | Named-person detection |
//! | [`page_source`] | Where rendered pages come from |
//! | [`artifacts`] | Page image and thumbnail storage |
//! | [`liveness`] | Is the producer still running? |
//! | [`repository`] | Record store trait, SQLite and in-memory |
//! | [`coordinator`] | Per-page ingestion |
//! | [`batch`] | Fixed-range runs and manifest import |
//! | [`watch`] | Continuous runs alongside the producer |
//! | [`search`] | Ranked search and filtered listing |
//! | [`get`] | Single record retrieval |
//! | [`stats`] | Catalog statistics and extraction progress |
//! | [`progress`] | Progress reporting on stderr |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod artifacts;
pub mod batch;
pub mod classify;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod get;
pub mod liveness;
pub mod migrate;
pub mod models;
pub mod page_source;
pub mod people;
pub mod progress;
pub mod repository;
pub mod search;
pub mod stats;
pub mod watch;
