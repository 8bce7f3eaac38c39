// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! In-memory publication store. */

use {
    crate::{
        error::{PublisherError, Result},
        model::{
            Archive, BinaryPublication, Build, Distribution, PackageDiff, PoolFile, Priority,
            PublicationId, PublishingStatus, SourcePublication,
        },
        store::{PublicationDatabase, PublicationFilter, PublicationStore},
    },
    chrono::{DateTime, Utc},
    log::debug,
    std::{
        cell::Cell,
        collections::BTreeMap,
        io::Write,
        path::{Path, PathBuf},
    },
};

/// A [PublicationStore] holding a [PublicationDatabase] in memory.
///
/// Transactions are implemented by snapshotting the database on [PublicationStore::begin()].
/// When constructed via [Self::open_yaml()], every commit also rewrites the backing
/// YAML file. The file is replaced atomically so readers never see a partial write.
#[derive(Debug, Default)]
pub struct InMemoryPublicationStore {
    db: PublicationDatabase,
    snapshot: Option<PublicationDatabase>,
    backing_path: Option<PathBuf>,
    batch_lookups: Cell<usize>,
    override_writes: usize,
}

impl InMemoryPublicationStore {
    pub fn new(db: PublicationDatabase) -> Self {
        Self {
            db,
            ..Default::default()
        }
    }

    /// Load a database from a YAML file and persist commits back to it.
    pub fn open_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let fh = std::fs::File::open(path).map_err(|e| PublisherError::io_path(path, e))?;
        let db = serde_yaml::from_reader(fh)?;

        Ok(Self {
            db,
            backing_path: Some(path.to_path_buf()),
            ..Default::default()
        })
    }

    pub fn database(&self) -> &PublicationDatabase {
        &self.db
    }

    /// Number of batch relation lookups performed so far.
    pub fn batch_lookups(&self) -> usize {
        self.batch_lookups.get()
    }

    /// Number of override writes performed so far.
    pub fn override_writes(&self) -> usize {
        self.override_writes
    }

    fn persist(&self) -> Result<()> {
        let path = match &self.backing_path {
            Some(path) => path,
            None => return Ok(()),
        };

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| PublisherError::io_path(dir, e))?;
        let data = serde_yaml::to_string(&self.db)?;
        temp.write_all(data.as_bytes())
            .map_err(|e| PublisherError::io_path(temp.path(), e))?;
        temp.persist(path)
            .map_err(|e| PublisherError::io_path(path, e.error))?;

        debug!("wrote publication database to {}", path.display());

        Ok(())
    }

    fn count_lookup(&self) {
        self.batch_lookups.set(self.batch_lookups.get() + 1);
    }

    fn source_mut(&mut self, id: PublicationId) -> Result<&mut SourcePublication> {
        self.db
            .sources
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| PublisherError::Store(format!("no source publication {}", id)))
    }

    fn binary_mut(&mut self, id: PublicationId) -> Result<&mut BinaryPublication> {
        self.db
            .binaries
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| PublisherError::Store(format!("no binary publication {}", id)))
    }
}

impl PublicationStore for InMemoryPublicationStore {
    fn distribution(&self, name: &str) -> Result<Distribution> {
        self.db
            .distributions
            .iter()
            .find(|d| d.name == name)
            .cloned()
            .ok_or_else(|| PublisherError::UnknownDistribution(name.to_string()))
    }

    fn archives(&self, distribution: &str) -> Result<Vec<Archive>> {
        Ok(self
            .db
            .archives
            .iter()
            .filter(|a| a.distribution == distribution)
            .cloned()
            .collect())
    }

    fn archive(&self, name: &str) -> Result<Archive> {
        self.db
            .archives
            .iter()
            .find(|a| a.name == name)
            .cloned()
            .ok_or_else(|| PublisherError::UnknownArchive(name.to_string()))
    }

    fn source_publications(&self, filter: &PublicationFilter) -> Result<Vec<SourcePublication>> {
        Ok(self
            .db
            .sources
            .iter()
            .filter(|p| filter.matches_source(p))
            .cloned()
            .collect())
    }

    fn binary_publications(&self, filter: &PublicationFilter) -> Result<Vec<BinaryPublication>> {
        Ok(self
            .db
            .binaries
            .iter()
            .filter(|p| filter.matches_binary(p))
            .cloned()
            .collect())
    }

    fn mark_source_published(&mut self, id: PublicationId, when: DateTime<Utc>) -> Result<()> {
        let p = self.source_mut(id)?;
        p.status = PublishingStatus::Published;
        p.date_published = Some(when);
        Ok(())
    }

    fn mark_binary_published(&mut self, id: PublicationId, when: DateTime<Utc>) -> Result<()> {
        let p = self.binary_mut(id)?;
        p.status = PublishingStatus::Published;
        p.date_published = Some(when);
        Ok(())
    }

    fn supersede_source(
        &mut self,
        id: PublicationId,
        superseded_by: PublicationId,
        when: DateTime<Utc>,
    ) -> Result<()> {
        let p = self.source_mut(id)?;
        p.status = PublishingStatus::Superseded;
        p.superseded_by = Some(superseded_by);
        p.date_superseded = Some(when);
        Ok(())
    }

    fn supersede_binary(
        &mut self,
        id: PublicationId,
        superseded_by: PublicationId,
        when: DateTime<Utc>,
    ) -> Result<()> {
        let p = self.binary_mut(id)?;
        p.status = PublishingStatus::Superseded;
        p.superseded_by = Some(superseded_by);
        p.date_superseded = Some(when);
        Ok(())
    }

    fn change_source_override(
        &mut self,
        id: PublicationId,
        component: &str,
        section: &str,
    ) -> Result<()> {
        let p = self.source_mut(id)?;
        p.component = component.to_string();
        p.section = section.to_string();
        self.override_writes += 1;
        Ok(())
    }

    fn change_binary_override(
        &mut self,
        id: PublicationId,
        component: &str,
        section: &str,
        priority: Priority,
    ) -> Result<()> {
        let p = self.binary_mut(id)?;
        p.component = component.to_string();
        p.section = section.to_string();
        p.priority = priority;
        self.override_writes += 1;
        Ok(())
    }

    fn builds_for_sources(
        &self,
        ids: &[PublicationId],
    ) -> Result<BTreeMap<PublicationId, Vec<Build>>> {
        self.count_lookup();
        let mut res: BTreeMap<PublicationId, Vec<Build>> = BTreeMap::new();
        for build in self.db.builds.iter().filter(|b| ids.contains(&b.source)) {
            res.entry(build.source).or_default().push(build.clone());
        }
        Ok(res)
    }

    fn files_for_sources(
        &self,
        ids: &[PublicationId],
    ) -> Result<BTreeMap<PublicationId, Vec<PoolFile>>> {
        self.count_lookup();
        let mut res: BTreeMap<PublicationId, Vec<PoolFile>> = BTreeMap::new();
        for f in self.db.source_files.iter().filter(|f| ids.contains(&f.source)) {
            res.entry(f.source).or_default().push(f.file.clone());
        }
        Ok(res)
    }

    fn binaries_for_sources(
        &self,
        ids: &[PublicationId],
    ) -> Result<BTreeMap<PublicationId, Vec<BinaryPublication>>> {
        self.count_lookup();
        let mut res: BTreeMap<PublicationId, Vec<BinaryPublication>> = BTreeMap::new();
        for binary in &self.db.binaries {
            if let Some(source) = binary.source.filter(|s| ids.contains(s)) {
                res.entry(source).or_default().push(binary.clone());
            }
        }
        Ok(res)
    }

    fn package_diffs_for_sources(
        &self,
        ids: &[PublicationId],
    ) -> Result<BTreeMap<PublicationId, Vec<PackageDiff>>> {
        self.count_lookup();
        let mut res: BTreeMap<PublicationId, Vec<PackageDiff>> = BTreeMap::new();
        for diff in self.db.package_diffs.iter().filter(|d| ids.contains(&d.source)) {
            res.entry(diff.source).or_default().push(diff.clone());
        }
        Ok(res)
    }

    fn changes_files_for_sources(
        &self,
        ids: &[PublicationId],
    ) -> Result<BTreeMap<PublicationId, PoolFile>> {
        self.count_lookup();
        Ok(self
            .db
            .changes_files
            .iter()
            .filter(|f| ids.contains(&f.source))
            .map(|f| (f.source, f.file.clone()))
            .collect())
    }

    fn begin(&mut self) -> Result<()> {
        self.snapshot = Some(self.db.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.persist()?;
        self.snapshot = None;
        Ok(())
    }

    fn abort(&mut self) -> Result<()> {
        if let Some(snapshot) = self.snapshot.take() {
            self.db = snapshot;
        }
        Ok(())
    }
}
