// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Packages directory trees into content-addressed archives and replicates
//! them between peers of a swarm.
//!
//! The pieces, leaves first:
//! - [`scanner`] walks a directory under a depth limit and name filters.
//! - [`archive::Archiver`] appends the scanned files to a new archive of a
//!   [`store::ContentStore`] and finalizes it.
//! - [`swarm::Distributor`] advertises archives on a [`swarm::Swarm`] and
//!   downloads remote archives into the local store while reporting progress.

pub mod address;
pub mod archive;
pub mod config;
pub mod error;
pub mod logger;
pub mod scanner;
pub mod store;
pub mod swarm;
pub mod utils;

pub use address::{ArchiveAddress, ContentDigest};
pub use archive::{Archive, ArchiveOptions, ArchiveState, Archiver, TruncationPolicy};
pub use config::Config;
pub use error::{Error, Result};
pub use swarm::{Distributor, DownloadReport, DownloadStatus};
