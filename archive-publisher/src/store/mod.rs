// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Publication storage.

The [PublicationStore] trait is the boundary between the publisher and whatever holds
publishing records. Everything in this crate queries and mutates records exclusively
through it. Mutations are grouped into transactions via [PublicationStore::begin()],
[PublicationStore::commit()] and [PublicationStore::abort()].

[memory::InMemoryPublicationStore] is the bundled implementation. It can optionally
persist its [PublicationDatabase] to a YAML file on every commit.
*/

pub mod memory;

use {
    crate::{
        error::Result,
        model::{
            Archive, BinaryPublication, Build, Distribution, PackageDiff, PoolFile, Pocket,
            Priority, PublicationId, PublishingStatus, SourcePublication,
        },
    },
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::collections::BTreeMap,
};

/// Criteria for selecting publishing records.
///
/// Unset criteria match everything. An empty status list matches every status.
#[derive(Clone, Debug, Default)]
pub struct PublicationFilter {
    pub archive: Option<String>,
    pub series: Option<String>,
    pub pocket: Option<Pocket>,
    pub statuses: Vec<PublishingStatus>,
    pub name: Option<String>,
    pub architecture: Option<String>,
}

impl PublicationFilter {
    pub fn archive(archive: impl ToString) -> Self {
        Self {
            archive: Some(archive.to_string()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn series(mut self, series: impl ToString) -> Self {
        self.series = Some(series.to_string());
        self
    }

    #[must_use]
    pub fn pocket(mut self, pocket: Pocket) -> Self {
        self.pocket = Some(pocket);
        self
    }

    #[must_use]
    pub fn status(mut self, status: PublishingStatus) -> Self {
        self.statuses.push(status);
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl ToString) -> Self {
        self.name = Some(name.to_string());
        self
    }

    #[must_use]
    pub fn architecture(mut self, architecture: impl ToString) -> Self {
        self.architecture = Some(architecture.to_string());
        self
    }

    fn matches_common(
        &self,
        archive: &str,
        series: &str,
        pocket: Pocket,
        status: PublishingStatus,
        name: &str,
    ) -> bool {
        self.archive.as_deref().map_or(true, |v| v == archive)
            && self.series.as_deref().map_or(true, |v| v == series)
            && self.pocket.map_or(true, |v| v == pocket)
            && (self.statuses.is_empty() || self.statuses.contains(&status))
            && self.name.as_deref().map_or(true, |v| v == name)
    }

    pub fn matches_source(&self, p: &SourcePublication) -> bool {
        self.architecture.is_none()
            && self.matches_common(&p.archive, &p.series, p.pocket, p.status, &p.name)
    }

    pub fn matches_binary(&self, p: &BinaryPublication) -> bool {
        self.architecture
            .as_deref()
            .map_or(true, |v| v == p.architecture)
            && self.matches_common(&p.archive, &p.series, p.pocket, p.status, &p.name)
    }
}

/// A file attached to a source publication.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SourceFile {
    pub source: PublicationId,
    #[serde(flatten)]
    pub file: PoolFile,
}

/// Serializable form of every record a store holds.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct PublicationDatabase {
    pub distributions: Vec<Distribution>,
    pub archives: Vec<Archive>,
    pub sources: Vec<SourcePublication>,
    pub binaries: Vec<BinaryPublication>,
    pub builds: Vec<Build>,
    pub source_files: Vec<SourceFile>,
    pub changes_files: Vec<SourceFile>,
    pub package_diffs: Vec<PackageDiff>,
}

/// Interface to publishing records.
pub trait PublicationStore {
    /// Resolve a distribution by name.
    fn distribution(&self, name: &str) -> Result<Distribution>;

    /// All archives of a distribution.
    fn archives(&self, distribution: &str) -> Result<Vec<Archive>>;

    /// Resolve an archive by name.
    fn archive(&self, name: &str) -> Result<Archive>;

    fn source_publications(&self, filter: &PublicationFilter) -> Result<Vec<SourcePublication>>;

    fn binary_publications(&self, filter: &PublicationFilter) -> Result<Vec<BinaryPublication>>;

    fn mark_source_published(&mut self, id: PublicationId, when: DateTime<Utc>) -> Result<()>;

    fn mark_binary_published(&mut self, id: PublicationId, when: DateTime<Utc>) -> Result<()>;

    fn supersede_source(
        &mut self,
        id: PublicationId,
        superseded_by: PublicationId,
        when: DateTime<Utc>,
    ) -> Result<()>;

    fn supersede_binary(
        &mut self,
        id: PublicationId,
        superseded_by: PublicationId,
        when: DateTime<Utc>,
    ) -> Result<()>;

    fn change_source_override(
        &mut self,
        id: PublicationId,
        component: &str,
        section: &str,
    ) -> Result<()>;

    fn change_binary_override(
        &mut self,
        id: PublicationId,
        component: &str,
        section: &str,
        priority: Priority,
    ) -> Result<()>;

    /// Builds of each source publication.
    fn builds_for_sources(
        &self,
        ids: &[PublicationId],
    ) -> Result<BTreeMap<PublicationId, Vec<Build>>>;

    /// Files of each source publication.
    fn files_for_sources(
        &self,
        ids: &[PublicationId],
    ) -> Result<BTreeMap<PublicationId, Vec<PoolFile>>>;

    /// Binary publications built from each source publication.
    fn binaries_for_sources(
        &self,
        ids: &[PublicationId],
    ) -> Result<BTreeMap<PublicationId, Vec<BinaryPublication>>>;

    /// Package diffs generated for each source publication.
    fn package_diffs_for_sources(
        &self,
        ids: &[PublicationId],
    ) -> Result<BTreeMap<PublicationId, Vec<PackageDiff>>>;

    /// The `.changes` file each source publication was uploaded with.
    fn changes_files_for_sources(
        &self,
        ids: &[PublicationId],
    ) -> Result<BTreeMap<PublicationId, PoolFile>>;

    /// Start a transaction.
    fn begin(&mut self) -> Result<()>;

    /// Make all mutations since [Self::begin()] durable.
    fn commit(&mut self) -> Result<()>;

    /// Discard all mutations since [Self::begin()].
    fn abort(&mut self) -> Result<()>;
}
