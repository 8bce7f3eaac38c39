// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Batched relation lookups for lists of source publications.

Rendering a page of source publications needs each one's builds, files, binaries,
package diffs and `.changes` file. Fetching these per publication costs five store
round trips per row. [PublicationBatchCache] instead performs exactly five lookups for
the whole list, keyed by publication id, and hands out [CachedSourcePublication]
views that resolve relations from the pre-loaded maps.
*/

use {
    crate::{
        error::Result,
        model::{
            BinaryPublication, Build, BuildId, BuildStatus, PackageDiff, PoolFile,
            PublicationId, PublishingStatus, SourcePublication,
        },
        store::PublicationStore,
    },
    std::{collections::BTreeMap, ops::Deref},
};

/// Source publications with their relations pre-loaded.
#[derive(Debug, Default)]
pub struct PublicationBatchCache {
    sources: Vec<SourcePublication>,
    builds: BTreeMap<PublicationId, Vec<Build>>,
    files: BTreeMap<PublicationId, Vec<PoolFile>>,
    binaries: BTreeMap<PublicationId, Vec<BinaryPublication>>,
    package_diffs: BTreeMap<PublicationId, Vec<PackageDiff>>,
    changes_files: BTreeMap<PublicationId, PoolFile>,
}

impl PublicationBatchCache {
    /// Load relations for `sources`, preserving their order.
    ///
    /// An empty list performs no lookups at all.
    pub fn load<S: PublicationStore + ?Sized>(
        store: &S,
        sources: Vec<SourcePublication>,
    ) -> Result<Self> {
        if sources.is_empty() {
            return Ok(Self::default());
        }

        let ids = sources.iter().map(|s| s.id).collect::<Vec<_>>();

        Ok(Self {
            builds: store.builds_for_sources(&ids)?,
            files: store.files_for_sources(&ids)?,
            binaries: store.binaries_for_sources(&ids)?,
            package_diffs: store.package_diffs_for_sources(&ids)?,
            changes_files: store.changes_files_for_sources(&ids)?,
            sources,
        })
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = CachedSourcePublication<'_>> {
        self.sources
            .iter()
            .map(move |publication| CachedSourcePublication {
                publication,
                cache: self,
            })
    }
}

/// Aggregate state of the builds of a source publication.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BuildSummaryStatus {
    NoBuilds,
    NeedsBuilding,
    Building,
    Failed,
    /// Everything built, but not every binary is published yet.
    FullyBuiltPending,
    FullyBuilt,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BuildStatusSummary {
    pub status: BuildSummaryStatus,
    /// Builds responsible for the status.
    pub builds: Vec<BuildId>,
}

/// A source publication resolving its relations through a [PublicationBatchCache].
#[derive(Clone, Copy)]
pub struct CachedSourcePublication<'a> {
    publication: &'a SourcePublication,
    cache: &'a PublicationBatchCache,
}

impl<'a> Deref for CachedSourcePublication<'a> {
    type Target = SourcePublication;

    fn deref(&self) -> &Self::Target {
        self.publication
    }
}

impl<'a> CachedSourcePublication<'a> {
    pub fn builds(&self) -> &'a [Build] {
        self.cache
            .builds
            .get(&self.publication.id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn files(&self) -> &'a [PoolFile] {
        self.cache
            .files
            .get(&self.publication.id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn binaries(&self) -> &'a [BinaryPublication] {
        self.cache
            .binaries
            .get(&self.publication.id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn package_diffs(&self) -> &'a [PackageDiff] {
        self.cache
            .package_diffs
            .get(&self.publication.id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn changes_file(&self) -> Option<&'a PoolFile> {
        self.cache.changes_files.get(&self.publication.id)
    }

    /// Summarize the state of this publication's builds.
    pub fn build_status_summary(&self) -> BuildStatusSummary {
        let builds = self.builds();

        let with_status = |status: BuildStatus| {
            builds
                .iter()
                .filter(|b| b.status == status)
                .map(|b| b.id)
                .collect::<Vec<_>>()
        };

        if builds.is_empty() {
            return BuildStatusSummary {
                status: BuildSummaryStatus::NoBuilds,
                builds: vec![],
            };
        }

        for (status, summary) in [
            (BuildStatus::Failed, BuildSummaryStatus::Failed),
            (BuildStatus::Building, BuildSummaryStatus::Building),
            (BuildStatus::NeedsBuilding, BuildSummaryStatus::NeedsBuilding),
        ] {
            let matching = with_status(status);
            if !matching.is_empty() {
                return BuildStatusSummary {
                    status: summary,
                    builds: matching,
                };
            }
        }

        let unpublished = builds
            .iter()
            .filter(|build| {
                !self.binaries().iter().any(|b| {
                    b.build == Some(build.id) && b.status == PublishingStatus::Published
                })
            })
            .map(|b| b.id)
            .collect::<Vec<_>>();

        if unpublished.is_empty() {
            BuildStatusSummary {
                status: BuildSummaryStatus::FullyBuilt,
                builds: builds.iter().map(|b| b.id).collect(),
            }
        } else {
            BuildStatusSummary {
                status: BuildSummaryStatus::FullyBuiltPending,
                builds: unpublished,
            }
        }
    }
}
