//! # Test Taxonomy
//!
//! Classifies a codebase's test suite into a two-level taxonomy of business
//! domains and features using a generative AI provider.
//!
//! Test suites too large for one prompt are partitioned into chunks along
//! file boundaries, classified with bounded parallelism behind a shared
//! rate limiter and circuit breaker, then merged, validated and cleaned up
//! so that every input test lands in exactly one domain/feature pair.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ FileGroups │──▶│ Partition  │──▶│ Orchestrator │──▶│ Merge +      │
//! │  (input)   │   │ + reindex  │   │ anchor/waves │   │ validate     │
//! └────────────┘   └────────────┘   └──────┬───────┘   └──────┬───────┘
//!                                          │                  ▼
//!                      ┌───────────────────┤          ┌──────────────┐
//!                      ▼                   ▼          │ Post-process │
//!                ┌────────────┐     ┌────────────┐    └──────────────┘
//!                │ Reliable   │     │ Checkpoint │
//!                │ client     │     │ store      │
//!                └────────────┘     └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! taxo init                                  # create checkpoint schema
//! taxo plan tests.json                       # show chunking, no AI calls
//! taxo classify tests.json --language python # print taxonomy JSON
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Pipeline error types |
//! | [`chunk`] | Partitioning and index remapping |
//! | [`provider`] | AI provider abstraction |
//! | [`reliability`] | Rate limiting, circuit breaking, retry |
//! | [`prompt`] | Prompt construction and response parsing |
//! | [`merge`] | Combining chunk taxonomies |
//! | [`validate`] | Structural repair of taxonomies |
//! | [`postprocess`] | Domain normalization and catch-all elimination |
//! | [`checkpoint`] | Resumable progress records |
//! | [`sqlite_store`] | Durable checkpoint storage |
//! | [`classify`] | Wave-parallel orchestration |
//! | [`progress`] | Progress reporting on stderr |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod checkpoint;
pub mod chunk;
pub mod classify;
pub mod config;
pub mod db;
pub mod error;
pub mod merge;
pub mod migrate;
pub mod models;
pub mod postprocess;
pub mod progress;
pub mod prompt;
pub mod provider;
pub mod reliability;
pub mod sqlite_store;
pub mod validate;
