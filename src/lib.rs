//! # Hearth
//!
//! A smart-home companion service: device control through the Smart Device
//! Management API, a local knowledge base answering questions about the
//! house, and switchable voice pipeline profiles.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────────┐
//! │  Loader  │──▶│ Splitter │──▶│ Embedder │──▶│ Vector store │
//! │ md files │   │  chunks  │   │          │   │   SQLite     │
//! └──────────┘   └──────────┘   └──────────┘   └──────┬───────┘
//!        ▲ reindex orchestrator (one at a time)        │ search
//!        │                                             ▼
//!   ┌──────────┐     ┌─────────────────────────────────────────┐
//!   │   CLI    │     │ HTTP: knowledge, devices, OAuth, cache,  │
//!   │ (hearth) │     │ pipeline profiles                        │
//!   └──────────┘     └─────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! hearth init                         # create databases
//! hearth reindex                      # load, chunk and embed ./docs
//! hearth search "reset the thermostat"
//! hearth serve                        # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy with stable codes |
//! | [`models`] | Documents, search hits, reindex reports |
//! | [`loader`] | Markdown discovery and loading |
//! | [`splitter`] | Overlapping chunking with heading attribution |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`vector_store`] | Lazily-initialized similarity index |
//! | [`reindex`] | Single-flight index rebuild |
//! | [`cache`] | TTL key/value cache |
//! | [`pipeline`] | Voice pipeline profiles |
//! | [`devices`] | SDM device commands |
//! | [`oauth`] | PKCE authorization and token cache |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |

pub mod cache;
pub mod config;
pub mod db;
pub mod devices;
pub mod embedding;
pub mod error;
pub mod loader;
pub mod migrate;
pub mod models;
pub mod oauth;
pub mod pipeline;
pub mod reindex;
pub mod server;
pub mod splitter;
pub mod vector_store;
