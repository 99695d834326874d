//! # Notekeep
//!
//! A git-backed synchronization and indexing core for a plain-file note
//! library.
//!
//! Notekeep watches a library of markdown notes tracked in a git repository,
//! commits working-tree changes, extracts structured metadata from each note,
//! and maintains a full-text search index. Metadata and search jobs run on
//! independent schedules and share pluggable storage backends.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌───────────────┐   ┌──────────────┐
//! │  Library  │──▶│ ChangeDetector │──▶│  SyncService │
//! │  (git)    │   │ tree+history  │   │  two jobs    │
//! └───────────┘   └───────────────┘   └──────┬───────┘
//!                                            │
//!                        ┌───────────────────┤
//!                        ▼                   ▼
//!                 ┌────────────┐      ┌────────────┐
//!                 │  Metadata  │      │   Search   │
//!                 │ JSON/SQLite│      │ FTS5/memory│
//!                 └────────────┘      └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! notekeep init                 # create database and storage domains
//! notekeep sync                 # run one metadata + search cycle
//! notekeep search "deployment"  # query the index
//! notekeep watch                # run the periodic jobs until interrupted
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`library`] | Note library file access and glob filtering |
//! | [`vcs`] | Version-control collaborator (git) |
//! | [`detect`] | Change detection across tree, history, and marker |
//! | [`extract`] | Frontmatter and link metadata extraction |
//! | [`storage`] | Key-value storage backends (JSON files, SQLite) |
//! | [`search`] | Search engine strategies (FTS5, memory, scan) |
//! | [`sync`] | Sync orchestration and scheduling |
//! | [`db`] | Database connection |

pub mod config;
pub mod db;
pub mod detect;
pub mod extract;
pub mod library;
pub mod models;
pub mod search;
pub mod storage;
pub mod sync;
pub mod vcs;
