// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Archive publishing.

A publishing run selects a set of archives from a distribution and takes each one
through four phases:

1. Publishing. Pending publications have their files copied into the pool and are
   marked published. Suites with pending deletions are marked dirty too.
2. Domination. In every dirty suite, the newest version of each package supersedes
   older published versions.
3. Index generation. `Packages` and `Sources` indices are written for dirty suites.
4. Release files. A `Release` file is written for every suite that got new indices.

Each phase runs in its own store transaction. A failing phase aborts its transaction
and stops that archive, but the remaining archives of the run are still published.
*/

use {
    crate::{
        batch::PublicationBatchCache,
        config::PublisherConfig,
        error::{PublisherError, Result},
        index::{AptFtparchiveIndexer, IndexGenerator, IndexRequest, InternalIndexWriter},
        model::{
            Archive, ArchivePurpose, BinaryPublication, Distribution, Pocket, PoolFile,
            PublicationId, PublishingStatus, Series, SourcePublication,
        },
        pool::{copy_to_pool, PoolCopy},
        release::{write_release, ReleaseDescription},
        store::{PublicationFilter, PublicationStore},
        version::compare_version_strings,
    },
    chrono::{DateTime, Utc},
    debian_packaging::repository::builder::PoolLayout,
    log::{debug, error, info, warn},
    std::{
        collections::{BTreeMap, BTreeSet},
        path::PathBuf,
    },
};

/// Which archives of a distribution a run publishes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArchiveSelector {
    Primary,
    Partner,
    /// Public PPAs.
    Ppa,
    PrivatePpa,
}

impl Default for ArchiveSelector {
    fn default() -> Self {
        Self::Primary
    }
}

/// Knobs of a single publishing run.
#[derive(Clone, Debug)]
pub struct PublishOptions {
    pub distribution: String,
    /// Suites to publish. Empty means all of them.
    pub suites: Vec<String>,
    pub selector: ArchiveSelector,
    /// Write `dists` here instead of under the archive root.
    pub distsroot: Option<PathBuf>,
    /// Forces every careful mode.
    pub careful: bool,
    pub careful_publishing: bool,
    pub careful_domination: bool,
    pub careful_apt: bool,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            distribution: "ubuntu".into(),
            suites: vec![],
            selector: ArchiveSelector::default(),
            distsroot: None,
            careful: false,
            careful_publishing: false,
            careful_domination: false,
            careful_apt: false,
        }
    }
}

impl PublishOptions {
    /// Republish already published records and ignore the stable release pocket guard.
    pub fn is_careful_publishing(&self) -> bool {
        self.careful || self.careful_publishing
    }

    /// Dominate every suite, not just dirty ones.
    pub fn is_careful_domination(&self) -> bool {
        self.careful || self.careful_domination
    }

    /// Regenerate indices and `Release` files of every suite.
    pub fn is_careful_apt(&self) -> bool {
        self.careful || self.careful_apt
    }

    pub fn validate(&self) -> Result<()> {
        if self.distsroot.is_some()
            && matches!(
                self.selector,
                ArchiveSelector::Ppa | ArchiveSelector::PrivatePpa
            )
        {
            return Err(PublisherError::ArchiveSelection(
                "--distsroot is only supported for primary and partner archives".into(),
            ));
        }

        Ok(())
    }
}

/// A step of publishing an archive.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PublishPhase {
    Publishing,
    Dominating,
    Indexing,
    ReleaseFiles,
}

impl PublishPhase {
    pub fn description(&self) -> &'static str {
        match self {
            Self::Publishing => "publishing",
            Self::Dominating => "dominating",
            Self::Indexing => "building indexes",
            Self::ReleaseFiles => "doing release files",
        }
    }
}

/// How far publishing of an archive got.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArchiveState {
    NotStarted,
    Published,
    Dominated,
    Indexed,
    /// Every phase completed.
    ReleaseWritten,
    Failed {
        phase: PublishPhase,
    },
}

impl ArchiveState {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl std::fmt::Display for ArchiveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not started"),
            Self::Published => write!(f, "published"),
            Self::Dominated => write!(f, "dominated"),
            Self::Indexed => write!(f, "indexed"),
            Self::ReleaseWritten => write!(f, "release files written"),
            Self::Failed { phase } => write!(f, "failed while {}", phase.description()),
        }
    }
}

/// Represents a publishing event.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PublishEvent {
    ArchiveStarted(String),
    PhaseStarted(String, PublishPhase),
    /// The phase succeeded and its transaction was committed.
    PhaseCommitted(String, PublishPhase),
    /// The phase failed and its transaction was aborted.
    PhaseAborted(String, PublishPhase),
    ArchiveFinished(String, ArchiveState),
}

impl std::fmt::Display for PublishEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ArchiveStarted(archive) => {
                write!(f, "publishing {}", archive)
            }
            Self::PhaseStarted(archive, phase) => {
                write!(f, "{}: {}", archive, phase.description())
            }
            Self::PhaseCommitted(archive, phase) => {
                write!(f, "{}: committed {}", archive, phase.description())
            }
            Self::PhaseAborted(archive, phase) => {
                write!(f, "{}: aborted {}", archive, phase.description())
            }
            Self::ArchiveFinished(archive, state) => {
                write!(f, "{}: {}", archive, state)
            }
        }
    }
}

fn is_pending_deletion(
    status: PublishingStatus,
    scheduled_deletion_date: Option<DateTime<Utc>>,
    date_removed: Option<DateTime<Utc>>,
) -> bool {
    status.is_deletion() && scheduled_deletion_date.is_none() && date_removed.is_none()
}

/// Whether an archive has publications waiting to be published or deleted.
fn has_pending_work<S: PublicationStore + ?Sized>(store: &S, archive: &Archive) -> Result<bool> {
    let pending = PublicationFilter::archive(&archive.name).status(PublishingStatus::Pending);
    if !store.source_publications(&pending)?.is_empty()
        || !store.binary_publications(&pending)?.is_empty()
    {
        return Ok(true);
    }

    let deleted = PublicationFilter::archive(&archive.name)
        .status(PublishingStatus::Deleted)
        .status(PublishingStatus::Obsolete);

    Ok(store
        .source_publications(&deleted)?
        .iter()
        .any(|p| is_pending_deletion(p.status, p.scheduled_deletion_date, p.date_removed))
        || store
            .binary_publications(&deleted)?
            .iter()
            .any(|p| is_pending_deletion(p.status, p.scheduled_deletion_date, p.date_removed)))
}

/// Resolve the archives a run publishes, in store order.
pub fn select_archives<S: PublicationStore + ?Sized>(
    store: &S,
    distribution: &Distribution,
    options: &PublishOptions,
) -> Result<Vec<Archive>> {
    let archives = store.archives(&distribution.name)?;

    let selected = match options.selector {
        ArchiveSelector::Primary | ArchiveSelector::Partner => {
            let purpose = if options.selector == ArchiveSelector::Primary {
                ArchivePurpose::Primary
            } else {
                ArchivePurpose::Partner
            };

            let selected = archives
                .into_iter()
                .filter(|a| a.purpose == purpose)
                .collect::<Vec<_>>();

            if selected.is_empty() {
                return Err(PublisherError::ArchiveSelection(format!(
                    "{} has no {} archive",
                    distribution.name, purpose
                )));
            }

            selected
        }
        ArchiveSelector::Ppa | ArchiveSelector::PrivatePpa => {
            let private = options.selector == ArchiveSelector::PrivatePpa;

            let mut selected = vec![];
            for archive in archives
                .into_iter()
                .filter(|a| a.is_ppa() && a.private == private)
            {
                if options.is_careful_publishing() || has_pending_work(store, &archive)? {
                    selected.push(archive);
                }
            }

            selected
        }
    };

    Ok(selected
        .into_iter()
        .filter(|archive| {
            if !archive.publish {
                info!("skipping {}: publishing is disabled", archive.display_name());
            }
            archive.publish
        })
        .collect())
}

/// Publishes a single archive.
pub struct Publisher<'a, S: PublicationStore + ?Sized> {
    config: &'a PublisherConfig,
    options: &'a PublishOptions,
    distribution: &'a Distribution,
    store: &'a mut S,
    archive: Archive,
    index_generator: Box<dyn IndexGenerator + 'a>,
    progress_cb: Option<&'a dyn Fn(PublishEvent)>,
    layout: PoolLayout,
    /// `(series, pocket)` pairs to publish. Empty means all.
    allowed_suites: BTreeSet<(String, Pocket)>,
    dirty_pockets: BTreeSet<(String, Pocket)>,
    release_files_needed: BTreeSet<(String, Pocket)>,
    state: ArchiveState,
    now: DateTime<Utc>,
}

impl<'a, S: PublicationStore + ?Sized> Publisher<'a, S> {
    pub fn new(
        config: &'a PublisherConfig,
        options: &'a PublishOptions,
        distribution: &'a Distribution,
        store: &'a mut S,
        archive: Archive,
        index_generator: Box<dyn IndexGenerator + 'a>,
        allowed_suites: BTreeSet<(String, Pocket)>,
    ) -> Self {
        Self {
            config,
            options,
            distribution,
            store,
            archive,
            index_generator,
            progress_cb: None,
            layout: PoolLayout::default(),
            allowed_suites,
            dirty_pockets: BTreeSet::new(),
            release_files_needed: BTreeSet::new(),
            state: ArchiveState::NotStarted,
            now: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress_cb: Option<&'a dyn Fn(PublishEvent)>) -> Self {
        self.progress_cb = progress_cb;
        self
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn state(&self) -> ArchiveState {
        self.state
    }

    /// Suites touched by the publishing phase.
    pub fn dirty_pockets(&self) -> &BTreeSet<(String, Pocket)> {
        &self.dirty_pockets
    }

    fn emit(&self, event: PublishEvent) {
        if let Some(cb) = self.progress_cb {
            cb(event);
        }
    }

    /// Every `(series, pocket)` of the archive this run may touch.
    fn suites(&self) -> Vec<(&'a Series, Pocket)> {
        let distribution = self.distribution;
        let mut suites = vec![];

        for series in &distribution.series {
            for pocket in self.archive.pockets() {
                if self.allowed_suites.is_empty()
                    || self.allowed_suites.contains(&(series.name.clone(), pocket))
                {
                    suites.push((series, pocket));
                }
            }
        }

        suites
    }

    fn suite_filter(&self, series: &Series, pocket: Pocket) -> PublicationFilter {
        PublicationFilter::archive(&self.archive.name)
            .series(&series.name)
            .pocket(pocket)
    }

    fn suite_dists(&self, suite: &str) -> PathBuf {
        self.options
            .distsroot
            .clone()
            .unwrap_or_else(|| self.archive.root.join("dists"))
            .join(suite)
    }

    /// Whether publications may land in a suite.
    ///
    /// The release pocket of a stable series is frozen unless the archive allows
    /// updates to it or we're being careful.
    fn check_legal_pocket(&self, series: &Series, pocket: Pocket, careful: bool) -> bool {
        if careful
            || pocket != Pocket::Release
            || series.is_unstable()
            || self.archive.allows_release_pocket_updates()
        {
            return true;
        }

        error!(
            "tried to publish into the RELEASE pocket of stable series {} in {}; skipping",
            series.name,
            self.archive.display_name()
        );
        false
    }

    /// Names of the source publications of this archive, for pool paths of binaries.
    fn source_names(&self) -> Result<BTreeMap<PublicationId, String>> {
        Ok(self
            .store
            .source_publications(&PublicationFilter::archive(&self.archive.name))?
            .into_iter()
            .map(|p| (p.id, p.name))
            .collect())
    }

    fn binary_source_name(
        names: &BTreeMap<PublicationId, String>,
        binary: &BinaryPublication,
    ) -> String {
        binary
            .source
            .and_then(|id| names.get(&id).cloned())
            .unwrap_or_else(|| binary.name.clone())
    }

    fn publish_file(&self, component: &str, source: &str, file: &PoolFile) -> Result<()> {
        let (path, state) =
            copy_to_pool(self.layout, &self.archive.root, component, source, file)?;

        if state == PoolCopy::Created {
            info!("added {} to the pool", path.display());
        }

        Ok(())
    }

    /// Copy pending publications into the pool and mark them published.
    fn publish_pending(&mut self) -> Result<()> {
        let careful = self.options.is_careful_publishing();
        let names = self.source_names()?;

        for (series, pocket) in self.suites() {
            let mut filter = self
                .suite_filter(series, pocket)
                .status(PublishingStatus::Pending);
            if careful {
                filter = filter.status(PublishingStatus::Published);
            }

            let sources = self.store.source_publications(&filter)?;
            let binaries = self.store.binary_publications(&filter)?;

            if sources.is_empty() && binaries.is_empty() {
                continue;
            }
            if !self.check_legal_pocket(series, pocket, careful) {
                continue;
            }

            let ids = sources.iter().map(|p| p.id).collect::<Vec<_>>();
            let mut files = self.store.files_for_sources(&ids)?;

            for source in &sources {
                for file in files.remove(&source.id).unwrap_or_default() {
                    self.publish_file(&source.component, &source.name, &file)?;
                }

                if source.status == PublishingStatus::Pending {
                    self.store.mark_source_published(source.id, self.now)?;
                    debug!("published {}", source.title());
                }
            }

            for binary in &binaries {
                let source_name = Self::binary_source_name(&names, binary);
                for file in &binary.files {
                    self.publish_file(&binary.component, &source_name, file)?;
                }

                if binary.status == PublishingStatus::Pending {
                    self.store.mark_binary_published(binary.id, self.now)?;
                    debug!("published {}", binary.title());
                }
            }

            self.dirty_pockets.insert((series.name.clone(), pocket));
        }

        self.mark_pockets_with_deletions_dirty()
    }

    /// Suites with pending deletions need new indices even when nothing was published.
    fn mark_pockets_with_deletions_dirty(&mut self) -> Result<()> {
        let careful = self.options.is_careful_publishing();

        for (series, pocket) in self.suites() {
            let filter = self
                .suite_filter(series, pocket)
                .status(PublishingStatus::Deleted)
                .status(PublishingStatus::Obsolete);

            let pending = self
                .store
                .source_publications(&filter)?
                .iter()
                .any(|p| is_pending_deletion(p.status, p.scheduled_deletion_date, p.date_removed))
                || self
                    .store
                    .binary_publications(&filter)?
                    .iter()
                    .any(|p| {
                        is_pending_deletion(p.status, p.scheduled_deletion_date, p.date_removed)
                    });

            if pending && self.check_legal_pocket(series, pocket, careful) {
                debug!(
                    "{}{} has pending deletions",
                    series.name,
                    pocket.suffix()
                );
                self.dirty_pockets.insert((series.name.clone(), pocket));
            }
        }

        Ok(())
    }

    /// Supersede older versions in dirty suites.
    fn dominate(&mut self) -> Result<()> {
        let careful = self.options.is_careful_domination();

        for (series, pocket) in self.suites() {
            if !careful {
                if !self.dirty_pockets.contains(&(series.name.clone(), pocket)) {
                    continue;
                }

                if pocket == Pocket::Release
                    && !series.is_unstable()
                    && !self.archive.allows_release_pocket_updates()
                {
                    return Err(PublisherError::TaintedReleasePocket(format!(
                        "{}{}",
                        series.name,
                        pocket.suffix()
                    )));
                }
            }

            self.dominate_suite(series, pocket)?;
        }

        Ok(())
    }

    fn dominate_suite(&mut self, series: &Series, pocket: Pocket) -> Result<()> {
        let filter = self
            .suite_filter(series, pocket)
            .status(PublishingStatus::Published);

        let mut sources = BTreeMap::<String, Vec<SourcePublication>>::new();
        for source in self.store.source_publications(&filter)? {
            sources.entry(source.name.clone()).or_default().push(source);
        }

        for mut candidates in sources.into_values() {
            candidates.sort_by(|a, b| {
                compare_version_strings(&b.version, &a.version).then(b.id.cmp(&a.id))
            });

            if let Some((winner, losers)) = candidates.split_first() {
                for loser in losers {
                    self.store.supersede_source(loser.id, winner.id, self.now)?;
                    info!("{} superseded by {}", loser.title(), winner.title());
                }
            }
        }

        let mut binaries = BTreeMap::<(String, String), Vec<BinaryPublication>>::new();
        for binary in self.store.binary_publications(&filter)? {
            binaries
                .entry((binary.name.clone(), binary.architecture.clone()))
                .or_default()
                .push(binary);
        }

        for mut candidates in binaries.into_values() {
            candidates.sort_by(|a, b| {
                compare_version_strings(&b.version, &a.version).then(b.id.cmp(&a.id))
            });

            if let Some((winner, losers)) = candidates.split_first() {
                for loser in losers {
                    self.store.supersede_binary(loser.id, winner.id, self.now)?;
                    info!(
                        "{} ({}) superseded by {}",
                        loser.title(),
                        loser.architecture,
                        winner.title()
                    );
                }
            }
        }

        Ok(())
    }

    /// Write `Packages` and `Sources` indices for dirty suites.
    fn build_indexes(&mut self) -> Result<()> {
        let careful = self.options.is_careful_apt();
        let names = self.source_names()?;

        for (series, pocket) in self.suites() {
            let key = (series.name.clone(), pocket);
            if !careful && !self.dirty_pockets.contains(&key) {
                continue;
            }

            let filter = self
                .suite_filter(series, pocket)
                .status(PublishingStatus::Published);

            let mut sources = self.store.source_publications(&filter)?;
            sources.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

            let cache = PublicationBatchCache::load(&*self.store, sources)?;
            let sources = cache
                .iter()
                .map(|source| (SourcePublication::clone(&source), source.files().to_vec()))
                .collect::<Vec<_>>();

            let mut binaries = self.store.binary_publications(&filter)?;
            binaries.sort_by(|a, b| {
                a.name
                    .cmp(&b.name)
                    .then(a.architecture.cmp(&b.architecture))
            });
            let binaries = binaries
                .into_iter()
                .map(|binary| {
                    let source_name = Self::binary_source_name(&names, &binary);
                    (binary, source_name)
                })
                .collect::<Vec<_>>();

            let suite = format!("{}{}", series.name, pocket.suffix());
            let request = IndexRequest {
                root: &self.archive.root,
                dists: self.suite_dists(&suite),
                suite: suite.clone(),
                components: series.components.clone(),
                architectures: series.architectures.clone(),
                sources,
                binaries,
            };

            let written = self.index_generator.generate(&request)?;
            info!(
                "{}: wrote {} index files for {}",
                self.archive.display_name(),
                written.len(),
                suite
            );

            self.release_files_needed.insert(key);
        }

        Ok(())
    }

    fn release_description(&self, series: &Series, suite: &str) -> ReleaseDescription {
        let distribution_name = if self.distribution.display_name.is_empty() {
            self.distribution.name.clone()
        } else {
            self.distribution.display_name.clone()
        };

        let default_origin = if self.archive.is_ppa() {
            format!("PPA {}", self.archive.name)
        } else {
            distribution_name.clone()
        };

        let mut description = format!("{} {}", distribution_name, series.name);
        if !series.version.is_empty() {
            description.push(' ');
            description.push_str(&series.version);
        }

        ReleaseDescription {
            origin: self
                .config
                .release
                .origin
                .clone()
                .unwrap_or_else(|| default_origin.clone()),
            label: self
                .config
                .release
                .label
                .clone()
                .unwrap_or(default_origin),
            suite: suite.to_string(),
            version: series.version.clone(),
            codename: series.name.clone(),
            date: self.now,
            architectures: series.architectures.clone(),
            components: series.components.clone(),
            description,
        }
    }

    /// Write `Release` files for suites with new indices.
    fn write_release_files(&mut self) -> Result<()> {
        let careful = self.options.is_careful_apt();

        for (series, pocket) in self.suites() {
            if !careful
                && !self
                    .release_files_needed
                    .contains(&(series.name.clone(), pocket))
            {
                continue;
            }

            let suite = format!("{}{}", series.name, pocket.suffix());
            let description = self.release_description(series, &suite);
            write_release(&description, &self.suite_dists(&suite))?;
        }

        Ok(())
    }

    fn phase_description(&self, phase: PublishPhase) -> &'static str {
        match phase {
            PublishPhase::Indexing => self.index_generator.description(),
            _ => phase.description(),
        }
    }

    fn run_phase(&mut self, f: fn(&mut Self) -> Result<()>) -> Result<()> {
        self.store.begin()?;
        f(self)?;
        self.store.commit()
    }

    /// Run a phase in its own transaction, aborting it on failure.
    fn try_and_commit(
        &mut self,
        phase: PublishPhase,
        f: fn(&mut Self) -> Result<()>,
    ) -> Result<()> {
        let description = self.phase_description(phase);

        self.emit(PublishEvent::PhaseStarted(self.archive.name.clone(), phase));
        debug!("{}: {}", self.archive.display_name(), description);

        match self.run_phase(f) {
            Ok(()) => {
                self.emit(PublishEvent::PhaseCommitted(
                    self.archive.name.clone(),
                    phase,
                ));
                Ok(())
            }
            Err(err) => {
                if let Err(abort_err) = self.store.abort() {
                    warn!(
                        "failed to abort transaction of {}: {}",
                        self.archive.display_name(),
                        abort_err
                    );
                }

                error!(
                    "Unexpected exception while {} for {}: {}",
                    description,
                    self.archive.display_name(),
                    err
                );

                self.state = ArchiveState::Failed { phase };
                self.emit(PublishEvent::PhaseAborted(self.archive.name.clone(), phase));

                Err(PublisherError::OrchestrationPhaseFailure {
                    description,
                    archive: self.archive.name.clone(),
                    source: Box::new(err),
                })
            }
        }
    }

    fn run_phases(&mut self) -> Result<()> {
        self.try_and_commit(PublishPhase::Publishing, Self::publish_pending)?;
        self.state = ArchiveState::Published;

        self.try_and_commit(PublishPhase::Dominating, Self::dominate)?;
        self.state = ArchiveState::Dominated;

        self.try_and_commit(PublishPhase::Indexing, Self::build_indexes)?;
        self.state = ArchiveState::Indexed;

        self.try_and_commit(PublishPhase::ReleaseFiles, Self::write_release_files)?;
        self.state = ArchiveState::ReleaseWritten;

        Ok(())
    }

    /// Run every phase until one fails.
    pub fn run(&mut self) -> Result<()> {
        info!("publishing {}", self.archive.display_name());
        self.emit(PublishEvent::ArchiveStarted(self.archive.name.clone()));

        let res = self.run_phases();

        self.emit(PublishEvent::ArchiveFinished(
            self.archive.name.clone(),
            self.state,
        ));

        res
    }
}

/// Final state of every archive of a run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PublishSummary {
    pub archives: Vec<(String, ArchiveState)>,
}

impl PublishSummary {
    /// Number of archives that didn't complete.
    pub fn failed(&self) -> usize {
        self.archives.iter().filter(|(_, s)| s.is_failed()).count()
    }

    /// Convert into an error if any archive failed.
    pub fn into_result(self) -> Result<Self> {
        match self.failed() {
            0 => Ok(self),
            count => Err(PublisherError::ArchivesFailed(count)),
        }
    }
}

type IndexGeneratorFactory<'a> = Box<dyn Fn(&Archive) -> Box<dyn IndexGenerator> + 'a>;

/// Publishes the archives a [PublishOptions] selects.
pub struct PublishOrchestrator<'a> {
    config: &'a PublisherConfig,
    options: PublishOptions,
    index_generator_factory: Option<IndexGeneratorFactory<'a>>,
    progress_cb: Option<Box<dyn Fn(PublishEvent) + 'a>>,
}

impl<'a> PublishOrchestrator<'a> {
    pub fn new(config: &'a PublisherConfig, options: PublishOptions) -> Self {
        Self {
            config,
            options,
            index_generator_factory: None,
            progress_cb: None,
        }
    }

    /// Choose index generators per archive instead of the defaults.
    ///
    /// By default the primary archive uses `apt-ftparchive` and everything else the
    /// [InternalIndexWriter].
    #[must_use]
    pub fn with_index_generator_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Archive) -> Box<dyn IndexGenerator> + 'a,
    {
        self.index_generator_factory = Some(Box::new(factory));
        self
    }

    #[must_use]
    pub fn with_progress<F>(mut self, progress_cb: F) -> Self
    where
        F: Fn(PublishEvent) + 'a,
    {
        self.progress_cb = Some(Box::new(progress_cb));
        self
    }

    pub fn options(&self) -> &PublishOptions {
        &self.options
    }

    fn index_generator(&self, archive: &Archive) -> Box<dyn IndexGenerator> {
        if let Some(factory) = &self.index_generator_factory {
            factory(archive)
        } else if archive.purpose == ArchivePurpose::Primary {
            Box::new(AptFtparchiveIndexer::new(&self.config.tools.apt_ftparchive))
        } else {
            Box::new(InternalIndexWriter)
        }
    }

    /// Publish every selected archive.
    ///
    /// Failures of individual archives are recorded in the returned summary. Errors
    /// are only returned for problems preventing the run from starting.
    pub fn run<S: PublicationStore + ?Sized>(&self, store: &mut S) -> Result<PublishSummary> {
        self.options.validate()?;

        let distribution = store.distribution(&self.options.distribution)?;

        let mut allowed_suites = BTreeSet::new();
        for suite in &self.options.suites {
            let (series, pocket) = distribution.resolve_suite(suite)?;
            allowed_suites.insert((series.name.clone(), pocket));
        }

        let archives = select_archives(&*store, &distribution, &self.options)?;
        info!(
            "publishing {} archive(s) of {}",
            archives.len(),
            distribution.name
        );

        let mut summary = PublishSummary::default();

        for archive in archives {
            let name = archive.name.clone();
            let index_generator = self.index_generator(&archive);

            let mut publisher = Publisher::new(
                self.config,
                &self.options,
                &distribution,
                &mut *store,
                archive,
                index_generator,
                allowed_suites.clone(),
            )
            .with_progress(self.progress_cb.as_deref());

            if let Err(err) = publisher.run() {
                warn!("{} was not fully published: {}", name, err);
            }

            summary.archives.push((name, publisher.state()));
        }

        Ok(summary)
    }
}
