// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Changing component, section and priority overrides of published packages. */

use {
    crate::{
        error::{PublisherError, Result},
        model::{
            Archive, BinaryPublication, BuildStatus, Pocket, Priority, PublishingStatus, Series,
            SourcePublication,
        },
        store::{PublicationFilter, PublicationStore},
        version::compare_version_strings,
    },
    log::{info, warn},
    std::{collections::BTreeSet, str::FromStr},
    strum_macros::{Display, EnumString},
};

/// Which publications an override applies to.
#[derive(Clone, Copy, Debug, Display, EnumString, Eq, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum OverrideScope {
    /// Binaries with the given name, on every architecture.
    BinaryOnly,
    SourceOnly,
    /// The source and binaries sharing its name.
    SourceAndSameNameBinaries,
    /// The source and every binary built from it.
    SourceAndChildren,
}

/// Result of overriding a single publication.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OverrideOutcome {
    Unchanged {
        title: String,
    },
    Source {
        title: String,
        old: (String, String),
        new: (String, String),
    },
    Binary {
        title: String,
        arch: String,
        pocket: Pocket,
        old: (String, String, Priority),
        new: (String, String, Priority),
    },
}

impl OverrideOutcome {
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Unchanged { .. })
    }
}

/// Applies override changes to one suite of an archive.
#[derive(Clone, Debug)]
pub struct Overrider {
    archive: Archive,
    series: Series,
    pocket: Pocket,
    suite: String,
    component: Option<String>,
    section: Option<String>,
    priority: Option<Priority>,
}

impl Overrider {
    /// Validate the requested values against the archive's distribution.
    pub fn initialize(
        store: &dyn PublicationStore,
        archive: Archive,
        suite: &str,
        component: Option<String>,
        section: Option<String>,
        priority: Option<&str>,
    ) -> Result<Self> {
        if component.is_none() && section.is_none() && priority.is_none() {
            return Err(PublisherError::InvalidOverride(
                "need at least one of component, section or priority".into(),
            ));
        }

        let distribution = store.distribution(&archive.distribution)?;
        let (series, pocket) = distribution.resolve_suite(suite)?;

        if let Some(component) = &component {
            if !series.components.contains(component) {
                return Err(PublisherError::InvalidOverride(format!(
                    "component '{}' not available in {}",
                    component, series.name
                )));
            }
        }

        let priority = priority
            .map(|p| {
                Priority::from_str(&p.to_lowercase()).map_err(|_| {
                    PublisherError::InvalidOverride(format!("unknown priority '{}'", p))
                })
            })
            .transpose()?;

        Ok(Self {
            series: series.clone(),
            archive,
            pocket,
            suite: suite.to_string(),
            component,
            section,
            priority,
        })
    }

    fn filter(&self) -> PublicationFilter {
        PublicationFilter::archive(&self.archive.name)
            .series(&self.series.name)
            .pocket(self.pocket)
            .status(PublishingStatus::Published)
    }

    fn not_found(&self, package: &str) -> PublisherError {
        PublisherError::OverrideNotFound {
            package: package.to_string(),
            suite: self.suite.clone(),
        }
    }

    fn published_source(
        &self,
        store: &dyn PublicationStore,
        name: &str,
    ) -> Result<SourcePublication> {
        store
            .source_publications(&self.filter().name(name))?
            .into_iter()
            .max_by(|a, b| compare_version_strings(&a.version, &b.version))
            .ok_or_else(|| self.not_found(name))
    }

    fn override_binary(
        &self,
        store: &mut dyn PublicationStore,
        binary: &BinaryPublication,
    ) -> Result<OverrideOutcome> {
        let new_component = self.component.as_ref().unwrap_or(&binary.component);
        let new_section = self.section.as_ref().unwrap_or(&binary.section);
        let new_priority = self.priority.unwrap_or(binary.priority);

        let title = format!("{}/{}", binary.title(), binary.architecture);

        if new_component == &binary.component
            && new_section == &binary.section
            && new_priority == binary.priority
        {
            info!("'{}' remained the same", title);
            return Ok(OverrideOutcome::Unchanged { title });
        }

        store.change_binary_override(binary.id, new_component, new_section, new_priority)?;

        info!(
            "'{}/{}/{}/{}' binary overridden in {}/{} to {}/{}/{}",
            title,
            binary.component,
            binary.section,
            binary.priority,
            self.suite,
            binary.pocket,
            new_component,
            new_section,
            new_priority
        );

        Ok(OverrideOutcome::Binary {
            title,
            arch: binary.architecture.clone(),
            pocket: binary.pocket,
            old: (
                binary.component.clone(),
                binary.section.clone(),
                binary.priority,
            ),
            new: (new_component.clone(), new_section.clone(), new_priority),
        })
    }

    /// Override the published source named `package`.
    pub fn process_source_change(
        &self,
        store: &mut dyn PublicationStore,
        package: &str,
    ) -> Result<OverrideOutcome> {
        let source = self.published_source(store, package)?;

        let new_component = self.component.as_ref().unwrap_or(&source.component);
        let new_section = self.section.as_ref().unwrap_or(&source.section);
        let title = source.title();

        if new_component == &source.component && new_section == &source.section {
            info!("'{}' remained the same", title);
            return Ok(OverrideOutcome::Unchanged { title });
        }

        store.change_source_override(source.id, new_component, new_section)?;

        info!(
            "'{}/{}/{}' source overridden to {}/{}",
            title, source.component, source.section, new_component, new_section
        );

        Ok(OverrideOutcome::Source {
            title,
            old: (source.component.clone(), source.section.clone()),
            new: (new_component.clone(), new_section.clone()),
        })
    }

    /// Override the published binaries named `package` on every architecture.
    pub fn process_binary_change(
        &self,
        store: &mut dyn PublicationStore,
        package: &str,
    ) -> Result<Vec<OverrideOutcome>> {
        let mut outcomes = vec![];

        for arch in &self.series.architectures {
            let binary = store
                .binary_publications(&self.filter().name(package).architecture(arch))?
                .into_iter()
                .max_by(|a, b| compare_version_strings(&a.version, &b.version));

            if let Some(binary) = binary {
                outcomes.push(self.override_binary(store, &binary)?);
            }
        }

        if outcomes.is_empty() {
            return Err(self.not_found(package));
        }

        Ok(outcomes)
    }

    /// Override every binary built from the latest build of the source, per architecture.
    pub fn process_child_changes(
        &self,
        store: &mut dyn PublicationStore,
        source_name: &str,
    ) -> Result<Vec<OverrideOutcome>> {
        let source = self.published_source(store, source_name)?;
        let ids = [source.id];

        let builds = store
            .builds_for_sources(&ids)?
            .remove(&source.id)
            .unwrap_or_default();
        let binaries = store
            .binaries_for_sources(&ids)?
            .remove(&source.id)
            .unwrap_or_default();

        let mut children = BTreeSet::new();

        for arch in &self.series.architectures {
            let latest = builds
                .iter()
                .filter(|b| &b.architecture == arch && b.status == BuildStatus::FullyBuilt)
                .max_by_key(|b| (b.date_finished, b.id));

            if let Some(build) = latest {
                children.extend(
                    binaries
                        .iter()
                        .filter(|b| b.build == Some(build.id))
                        .map(|b| b.name.clone()),
                );
            }
        }

        let mut outcomes = vec![];
        for name in children {
            match self.process_binary_change(store, &name) {
                Ok(res) => outcomes.extend(res),
                Err(PublisherError::OverrideNotFound { .. }) => {
                    warn!("'{}' binary not found in {}", name, self.suite);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(outcomes)
    }

    fn apply_package(
        &self,
        store: &mut dyn PublicationStore,
        scope: OverrideScope,
        package: &str,
    ) -> Result<Vec<OverrideOutcome>> {
        let mut outcomes = vec![];

        match scope {
            OverrideScope::BinaryOnly => {
                outcomes.extend(self.process_binary_change(store, package)?);
            }
            OverrideScope::SourceOnly => {
                outcomes.push(self.process_source_change(store, package)?);
            }
            OverrideScope::SourceAndSameNameBinaries => {
                outcomes.push(self.process_source_change(store, package)?);
                match self.process_binary_change(store, package) {
                    Ok(res) => outcomes.extend(res),
                    Err(PublisherError::OverrideNotFound { .. }) => {
                        warn!("'{}' binary not found in {}", package, self.suite);
                    }
                    Err(e) => return Err(e),
                }
            }
            OverrideScope::SourceAndChildren => {
                outcomes.push(self.process_source_change(store, package)?);
                outcomes.extend(self.process_child_changes(store, package)?);
            }
        }

        Ok(outcomes)
    }

    /// Apply overrides to several packages in one transaction.
    pub fn apply(
        &self,
        store: &mut dyn PublicationStore,
        scope: OverrideScope,
        packages: &[String],
    ) -> Result<Vec<OverrideOutcome>> {
        store.begin()?;

        let mut outcomes = vec![];
        for package in packages {
            match self.apply_package(store, scope, package) {
                Ok(res) => outcomes.extend(res),
                Err(e) => {
                    store.abort()?;
                    return Err(e);
                }
            }
        }

        store.commit()?;

        Ok(outcomes)
    }
}
