//! # magic-cli
//!
//! Shell command suggestions and semantic shell-history search, backed by a
//! local (Ollama) or remote (OpenAI-compatible) language model.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌─────────────┐   ┌───────────────┐
//! │  History   │──▶│  Embedding  │──▶│ manifest.json │
//! │  ingestor  │   │    index    │   │ vectors.jsonl │
//! └────────────┘   └──────┬──────┘   └───────────────┘
//!                         │ embed
//!                  ┌──────▼──────┐
//!   config.json ──▶│  Provider   │◀── complete ── Suggest pipeline
//!                  │ Ollama/OpenAI│
//!                  └─────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Layered JSON configuration with schema defaults |
//! | [`config_cmd`] | `config` subcommands |
//! | [`error`] | Typed errors per subsystem |
//! | [`provider`] | Language-model backends |
//! | [`history`] | Shell history reading and appending |
//! | [`vector`] | Similarity and vector encoding |
//! | [`index`] | Incremental embedding index |
//! | [`progress`] | Index progress on stderr |
//! | [`search`] | Search pipeline |
//! | [`suggest`] | Suggestion pipeline and response parsing |
//! | [`interactive`] | Prompts, clipboard, and command execution |

pub mod config;
pub mod config_cmd;
pub mod error;
pub mod history;
pub mod index;
pub mod interactive;
pub mod progress;
pub mod provider;
pub mod search;
pub mod suggest;
pub mod vector;
