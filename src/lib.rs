//! # Sidekick
//!
//! A retrieval-augmented chat assistant core for many users and many
//! document folders.
//!
//! Folders (or single files) are indexed into their own persisted vector
//! store, recorded in a manifest so they come back after a restart, and
//! searched through a registry of retrievers. A worker/evaluator agent
//! answers questions, calling tools (document search, sandboxed files, web
//! search, Python, Wikipedia) until the evaluator is satisfied, the user
//! needs to say more, or the iteration limit is hit.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────────┐
//! │  Indexing    │──▶│ Vector store │◀──│  Retrieval    │
//! │ load+chunk   │   │ (SQLite dir) │   │  registry     │
//! └──────┬───────┘   └──────────────┘   └──────┬────────┘
//!        │                                     │ search_documents
//!        ▼                                     ▼
//! ┌──────────────┐                     ┌───────────────┐
//! │   Sidekick   │────── run ─────────▶│  Agent graph  │
//! │  + manifest  │                     │ worker/tools/ │
//! └──────┬───────┘                     │  evaluator    │
//!        │                             └───────────────┘
//!        ▼
//! ┌──────────────┐
//! │ ChatService  │ sessions per user and folder
//! └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! sidekick index ./docs
//! sidekick search "what color is the sky" --folder ./docs
//! sidekick ask "Summarise the design notes" --folder ./docs --tools rag,files
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Caller-facing error type |
//! | [`paths`] | Path normalisation and index keys |
//! | [`fs_util`] | Verified directory deletion with retries |
//! | [`models`] | Documents and chunks |
//! | [`extract`] | Text and PDF extraction |
//! | [`chunk`] | Recursive character splitting |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`vectorstore`] | Persisted SQLite vector store |
//! | [`indexing`] | Load, chunk and persist pipeline |
//! | [`retrieval`] | Retriever registry and formatted search |
//! | [`manifest`] | Index manifest for restart recovery |
//! | [`messages`] | Conversation messages and state |
//! | [`llm`] | Chat-completion abstraction |
//! | [`tools`] | Agent tools and tool groups |
//! | [`checkpoint`] | Per-thread checkpoints |
//! | [`graph`] | Worker/tools/evaluator state machine |
//! | [`sidekick`] | Index lifecycle and agent runs |
//! | [`session`] | Session persistence and chat service |

pub mod checkpoint;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod fs_util;
pub mod graph;
pub mod indexing;
pub mod llm;
pub mod manifest;
pub mod messages;
pub mod models;
pub mod paths;
pub mod retrieval;
pub mod session;
pub mod sidekick;
pub mod tools;
pub mod vectorstore;

pub use error::SidekickError;
pub use sidekick::{IndexOptions, IndexStatus, RemoveStatus, RunRequest, Sidekick};
