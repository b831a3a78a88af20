//! # FloatChat
//!
//! A multi-agent RAG pipeline and aggregation API for Argo float ocean
//! profiles.
//!
//! FloatChat answers natural-language oceanographic questions by chaining a
//! semantic vector search, an LLM-generated SQL query, execution against
//! PostgreSQL, and a natural-language synthesis step, and exposes
//! deterministic aggregation endpoints (time series, depth-time contours,
//! float trajectories) over the same relational store.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────┐   ┌──────────┐   ┌─────────┐   ┌──────────┐   ┌───────────┐
//! │ Filter  │──▶│  Chroma  │──▶│   SQL   │──▶│ Postgres │──▶│  Answer   │
//! │ (LLM)   │   │  search  │   │  (LLM)  │   │ tolerant │   │  (LLM)    │
//! └─────────┘   └──────────┘   └─────────┘   └────┬─────┘   └───────────┘
//!                                                 │ strict
//!                                  ┌──────────────┤
//!                                  ▼              ▼
//!                            ┌──────────┐   ┌──────────┐
//!                            │ contour/ │   │   grid   │
//!                            │ series   │   │ indexing │
//!                            └──────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! floatchat serve                                # start the HTTP API
//! floatchat ask "salinity near the equator in March 2023"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`grid`] | Grid-cell indexing |
//! | [`retry`] | Backoff retry for generation calls |
//! | [`generation`] | Text-generation provider abstraction |
//! | [`filter`] | Vector-store filter synthesis |
//! | [`sqlgen`] | SQL statement synthesis |
//! | [`store`] | PostgreSQL execution (strict/tolerant) |
//! | [`chroma`] | Vector search client |
//! | [`aggregate`] | Time series, contours, trajectories |
//! | [`synthesis`] | Final answer synthesis |
//! | [`pipeline`] | Conversational orchestrator |
//! | [`server`] | HTTP API |

pub mod aggregate;
pub mod chroma;
pub mod config;
pub mod filter;
pub mod generation;
pub mod grid;
pub mod pipeline;
pub mod retry;
pub mod server;
pub mod sqlgen;
pub mod store;
pub mod synthesis;
