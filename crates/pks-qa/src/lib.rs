//! # PKS Q&A
//!
//! Question answering over a prebuilt semantic index kept in a Google Drive
//! folder.
//!
//! At startup the index artifact (vectors plus the text chunk each one was
//! computed from) is downloaded once and held in memory. Each question is
//! embedded with the same model the index was built with, matched against
//! every stored vector, and answered with the nearest chunks' text.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ Drive folder │──▶│ IndexLoader │──▶│  QaService   │
//! │ (or local    │   │ fetch+decode│   │ index+model  │
//! │  directory)  │   │  once       │   └──────┬───────┘
//! └──────────────┘   └─────────────┘          │
//!                              ┌──────────────┤
//!                              ▼              ▼
//!                        ┌──────────┐   ┌──────────┐
//!                        │   CLI    │   │   HTTP   │
//!                        │  prompt  │   │   page   │
//!                        └──────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pks-qa inspect ./faiss_index.json   # check an artifact locally
//! pks-qa ask "what is the refund policy?"
//! pks-qa ask                          # interactive prompt
//! pks-qa serve                        # http://127.0.0.1:8501
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`source`] | Artifact source trait and local directory source |
//! | [`drive`] | Google Drive source with service-account auth |
//! | [`loader`] | Compute-once fetch and decode |
//! | [`embedding`] | fastembed and Ollama embedders |
//! | [`service`] | The session's service object |
//! | [`ask`] | Interactive prompt |
//! | [`inspect`] | Local artifact summary |
//! | [`server`] | HTTP page and JSON API |

pub mod ask;
pub mod config;
pub mod drive;
pub mod embedding;
pub mod inspect;
pub mod loader;
pub mod server;
pub mod service;
pub mod source;
