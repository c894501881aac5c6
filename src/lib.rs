//! # ragspace
//!
//! A retrieval-augmented question answering pipeline over isolated
//! document spaces.
//!
//! ragspace ingests heterogeneous documents (text, markdown, pdf, word,
//! html, csv), splits them with structure-aware chunking that recognizes
//! tabular feed descriptions and extracts their fields, embeds the
//! resulting units, and stores them in per-space collections inside one
//! SQLite database. Queries retrieve the top-k units from a space and
//! synthesize a grounded answer with a chat model.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌───────────┐
//! │ Loaders  │──▶│ Chunk + Table │──▶│  SQLite   │
//! │ txt..csv │   │ Field Extract │   │ spaces_*  │
//! └──────────┘   └───────────────┘   └─────┬─────┘
//!                                          │
//!                      ┌───────────────────┤
//!                      ▼                   ▼
//!                 ┌──────────┐       ┌──────────┐
//!                 │   CLI    │       │   HTTP   │
//!                 │(ragspace)│       │  (axum)  │
//!                 └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ragspace init                              # create database
//! ragspace ingest ./docs --space default     # ingest a directory
//! ragspace query "when does the feed land?"  # retrieve and answer
//! ragspace serve                             # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`loader`] | Per-extension document loading |
//! | [`chunk`] | Structure-aware chunking |
//! | [`table`] | Table field extraction |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`llm`] | Chat model abstraction |
//! | [`store`] | Multi-space vector store |
//! | [`coordinator`] | Retrieve-then-generate coordination |
//! | [`ingest`] | File and directory ingestion |
//! | [`server`] | JSON HTTP server |
//! | [`db`] | Database connection |

pub mod chunk;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod loader;
pub mod models;
pub mod server;
pub mod store;
pub mod table;
