//! # Marginalia
//!
//! Incremental outline generation for reading highlights.
//!
//! Marginalia turns an exported list of book highlights (and the reader's
//! notes on them) into a chapter-structured outline written by an LLM. The
//! highlight list is cut into chunks at chapter boundaries; each chunk is
//! generated once and cached. When new highlights arrive, only the chunks
//! whose boundaries moved are generated again.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌────────────┐   ┌──────────┐
//! │  Input   │──▶│ Planner  │──▶│ Reconciler │◀──│  Store   │
//! │  (JSON)  │   │ (chunk)  │   │ reuse/     │   │ (SQLite) │
//! └──────────┘   └──────────┘   │ replace/   │   └────▲─────┘
//!                               │ fresh      │        │ save
//!                               └─────┬──────┘        │
//!                                     ▼               │
//!                               ┌──────────┐    ┌─────┴─────┐
//!                               │  Driver  │───▶│   apply   │
//!                               │ (LLM)    │    └─────┬─────┘
//!                               └──────────┘          ▼
//!                                               ┌───────────┐
//!                                               │ Assembler │──▶ .md / .html
//!                                               └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! marg outline ./books/capital.json --dry-run   # show the plan
//! marg outline ./books/capital.json             # generate and write outputs
//! marg outline ./books/capital.json --rerun-failed
//! marg status
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`input`] | Highlight export loading and normalization |
//! | [`chunk`] | Chapter-boundary chunk planner |
//! | [`store`] | Persisted chunk and explanation stores |
//! | [`reconcile`] | Plan/store reconciliation |
//! | [`generation`] | Generation provider abstraction |
//! | [`driver`] | Bounded, retrying generation driver |
//! | [`sanitize`] | Post-processing of generator output |
//! | [`prompt`] | Prompt templates |
//! | [`assemble`] | Final document assembly |
//! | [`pipeline`] | `outline` and `assemble` commands |
//! | [`batch`] | Per-highlight explanations |
//! | [`db`] | Database connection |
//! | [`migrate`] | Store schema |

pub mod assemble;
pub mod batch;
pub mod chunk;
pub mod config;
pub mod db;
pub mod driver;
pub mod export;
pub mod generation;
pub mod input;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod prompt;
pub mod reconcile;
pub mod sanitize;
pub mod stats;
pub mod store;
