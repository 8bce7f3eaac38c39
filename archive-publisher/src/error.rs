// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use {crate::version::VersionError, std::path::PathBuf, thiserror::Error};

/// How far an error propagates.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Severity {
    /// Aborts the whole unit of work (a custom upload job, a publishing phase).
    Fatal,

    /// Recorded and reported, but work continues.
    Recoverable,
}

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum PublisherError {
    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("I/O error on path {0}: {1:?}")]
    IoPath(PathBuf, std::io::Error),

    #[error("directory walk error: {0:?}")]
    WalkDir(#[from] walkdir::Error),

    #[error("YAML error: {0:?}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("version error: {0}")]
    Version(#[from] VersionError),

    #[error("{0} is not TYPE_VERSION_ARCH.tar.gz")]
    CustomUploadFilename(String),

    #[error("unknown custom upload type: {0}")]
    UnknownCustomUploadType(String),

    #[error("problem unpacking {0}: {1:?}")]
    Extraction(PathBuf, std::io::Error),

    #[error("no files found in {0}")]
    InvalidContent(PathBuf),

    #[error("bad version found in {0}: {1}")]
    BadVersionDirectory(PathBuf, String),

    #[error("umask is {actual:04o}; expected {expected:04o} before creating {path}")]
    PermissionAssumption {
        expected: u32,
        actual: u32,
        path: PathBuf,
    },

    #[error("failed to sign {0}: {1}")]
    SigningToolFailure(PathBuf, String),

    #[error("failed to generate UEFI signing keys for {0}: {1}")]
    SigningKeyGeneration(String, String),

    #[error("UEFI signing key {0} not readable")]
    SigningKeyUnreadable(PathBuf),

    #[error("pool file {0} already exists with different content")]
    PoolFileConflict(String),

    #[error("pool file source {0} does not match its recorded digest")]
    PoolFileDigestMismatch(PathBuf),

    #[error("no pool directory can be derived for package name {0:?}")]
    InvalidPackageName(String),

    #[error("unable to read process umask: {0}")]
    UmaskUnavailable(String),

    #[error("tainting RELEASE pocket of {0}")]
    TaintedReleasePocket(String),

    #[error("unexpected failure while {description} for {archive}: {source}")]
    OrchestrationPhaseFailure {
        description: &'static str,
        archive: String,
        source: Box<PublisherError>,
    },

    #[error("{0} archive(s) failed to publish")]
    ArchivesFailed(usize),

    #[error("'{package}' isn't published in {suite}")]
    OverrideNotFound { package: String, suite: String },

    #[error("invalid override: {0}")]
    InvalidOverride(String),

    #[error("unknown distribution: {0}")]
    UnknownDistribution(String),

    #[error("invalid suite: {0}")]
    UnknownSuite(String),

    #[error("unknown archive: {0}")]
    UnknownArchive(String),

    #[error("invalid archive selection: {0}")]
    ArchiveSelection(String),

    #[error("error running {0}: {1}")]
    ExternalTool(String, String),

    #[error("publication store error: {0}")]
    Store(String),
}

impl PublisherError {
    /// Whether this error aborts the unit of work it occurred in.
    pub fn severity(&self) -> Severity {
        match self {
            Self::SigningToolFailure(..)
            | Self::SigningKeyGeneration(..)
            | Self::SigningKeyUnreadable(..) => Severity::Recoverable,
            _ => Severity::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Attach a path to a raw I/O error.
    pub fn io_path(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        Self::IoPath(path.into(), err)
    }
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, PublisherError>;
