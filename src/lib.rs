//! # Review Harness
//!
//! A local-first LLM code review and quality gate harness.
//!
//! Review Harness turns a set of source files into a list of quality
//! findings, a 0–100 score, and a pass/fail gate decision, while caching
//! provider results in an embedded SQLite store so unchanged files are
//! never re-analyzed.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌───────────┐
//! │ Discovery │──▶│    Engine     │──▶│  Provider  │
//! │ FS / git  │   │ cache + fan-  │   │ OpenAI /   │
//! │  status   │   │ out + reduce  │   │ Ollama     │
//! └───────────┘   └──────┬───────┘   └───────────┘
//!                        │
//!                        ▼
//!                  ┌──────────┐
//!                  │  SQLite   │
//!                  │ cache +   │
//!                  │ call logs │
//!                  └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rvw init                      # create database
//! rvw check src/                # analyze a directory
//! rvw check --diff              # analyze locally changed files only
//! rvw cache stats               # inspect the result cache
//! rvw cache cost --days 30      # provider spend summary
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`hashing`] | Cache key derivation |
//! | [`discover`] | File discovery (directory walk, git diff mode) |
//! | [`packs`] | Rule packs, composition, trigger matching |
//! | [`provider`] | Analysis provider abstraction |
//! | [`prompt`] | Review prompt construction |
//! | [`engine`] | Pipeline orchestration |
//! | [`scoring`] | Score and gate calculation |
//! | [`store`] | Result cache and call logs |
//! | [`migrate`] | Schema migrations |
//! | [`report`] | Text and JSON output |
//! | [`progress`] | Progress reporting |

pub mod config;
pub mod db;
pub mod discover;
pub mod engine;
pub mod hashing;
pub mod migrate;
pub mod models;
pub mod packs;
pub mod progress;
pub mod prompt;
pub mod provider;
pub mod report;
pub mod scoring;
pub mod store;
