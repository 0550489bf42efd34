//! # Packsmith
//!
//! Builds signed, versioned, content-addressed knowledge packs from a single
//! source: an uploaded archive, one web page, a git repository, or pasted
//! text.
//!
//! Each build runs as a job whose state lives only in an append-only event
//! log. The pipeline normalizes the source into a document tree, chunks and
//! hashes every decodable file, signs the whole-pack digest with Ed25519,
//! writes a reproducible zip, and hands it to an artifact store.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌────────────┐   ┌──────────┐
//! │   Source    │──▶│ Chunk+Hash  │──▶│ Sign+Pack  │──▶│  Store   │
//! │ zip/web/git │   │  per file   │   │ pack.zip   │   │ local/S3 │
//! └─────────────┘   └─────────────┘   └────────────┘   └──────────┘
//!         │                 │                 │               │
//!         └─────────────────┴────────┬────────┴───────────────┘
//!                                    ▼
//!                           ┌────────────────┐
//!                           │ JobLog (NDJSON)│
//!                           └────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! packsmith keygen                                  # print a signing seed
//! packsmith build --pack-id notes --pack-version 1.0.0 \
//!     --source-type paste --source-value "Hello\n\nWorld"
//! packsmith status <job_id>
//! packsmith verify ./notes-1.0.0.zip
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Pipeline error taxonomy |
//! | [`joblog`] | Append-only job event log |
//! | [`normalize`] | Source materialization |
//! | [`connector_http`] | Single-page HTTP fetcher |
//! | [`connector_git`] | Shallow git clone |
//! | [`chunk`] | Paragraph chunking |
//! | [`signing`] | Content hashing and Ed25519 signing |
//! | [`manifest`] | Manifest assembly and verification |
//! | [`package`] | Document walk and archive writing |
//! | [`storage`] | Local artifact store |
//! | [`storage_s3`] | S3 artifact store |
//! | [`pipeline`] | Build orchestration |
//! | [`traits`] | Ports for external collaborators |

pub mod chunk;
pub mod config;
pub mod connector_git;
pub mod connector_http;
pub mod error;
pub mod joblog;
pub mod manifest;
pub mod models;
pub mod normalize;
pub mod package;
pub mod pipeline;
pub mod signing;
pub mod storage;
pub mod storage_s3;
pub mod traits;
