// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::path::PathBuf;

use thiserror::Error;

use crate::address::ArchiveAddress;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure kinds surfaced by the scanner, the archiver and the distributor.
///
/// Construction and traversal errors are fatal. Errors tied to a single entry
/// during a download are collected into a
/// [`DownloadReport`](crate::swarm::DownloadReport) instead of being returned.
#[derive(Debug, Error)]
pub enum Error {
    /// A required construction parameter is missing or out of range.
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    /// A path could not be listed, stat'ed or read.
    #[error("Filesystem error on {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A scan filter predicate failed. The predicate's error is kept as-is.
    #[error(transparent)]
    Filter(anyhow::Error),
    /// A directory lies beyond the configured maximum depth.
    #[error("Maximum depth exceeded at {}", path.display())]
    DepthExceeded { path: PathBuf },
    /// The archive is sealed and accepts no further appends.
    #[error("Archive is already finalized")]
    Finalized,
    /// The content store rejected an operation.
    #[error("Content store error: {0:#}")]
    Store(anyhow::Error),
    /// Swarm membership or replication failed.
    #[error("Transport error: {0:#}")]
    Transport(anyhow::Error),
    /// Metadata for a remote entry could not be fetched.
    #[error("Failed to fetch metadata of entry {index}: {source:#}")]
    MetadataFetch {
        index: usize,
        #[source]
        source: anyhow::Error,
    },
    /// Received content does not hash to the expected digest.
    #[error("Integrity check failed for {what}: expected {expected}, got {actual}")]
    Integrity {
        what: String,
        expected: String,
        actual: String,
    },
    #[error("Archive {0} not found")]
    NotFound(ArchiveAddress),
    #[error("Invalid archive address: {0}")]
    InvalidAddress(String),
    #[error("Invalid entry path: {0:?}")]
    InvalidEntryPath(String),
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Filesystem {
            path: path.into(),
            source,
        }
    }
}
