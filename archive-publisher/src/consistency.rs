// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Override consistency checking.

Binaries sharing a name but built for different architectures should carry the same
component, section and priority. [SourceChecker] finds the majority value of each
field per binary name and flags binaries deviating from it. */

use {
    crate::{
        batch::PublicationBatchCache,
        error::Result,
        model::{Archive, PublishingStatus},
        store::{PublicationFilter, PublicationStore},
    },
    std::collections::BTreeMap,
};

/// A binary publication as seen by the checker.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BinaryDetails {
    pub name: String,
    pub version: String,
    pub arch: String,
    pub component: String,
    pub section: String,
    pub priority: String,
    pub warnings: Vec<String>,
}

/// Checks the binaries of one source publication.
#[derive(Clone, Debug)]
pub struct SourceChecker {
    pub name: String,
    pub version: String,
    pub component: String,
    pub section: String,
    pub urgency: String,
    pub binaries: Vec<BinaryDetails>,
}

/// Most frequent value. Ties go to the lexically smallest.
fn majority<'a>(values: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut counts = BTreeMap::<&str, usize>::new();
    for value in values {
        *counts.entry(value).or_default() += 1;
    }

    // Iteration is in ascending order and max_by_key keeps the last maximum, so walk
    // backwards to keep the smallest on ties.
    counts
        .into_iter()
        .rev()
        .max_by_key(|(_, count)| *count)
        .map(|(value, _)| value)
}

impl SourceChecker {
    pub fn new(
        name: impl ToString,
        version: impl ToString,
        component: impl ToString,
        section: impl ToString,
        urgency: impl ToString,
    ) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            component: component.to_string(),
            section: section.to_string(),
            urgency: urgency.to_string(),
            binaries: vec![],
        }
    }

    pub fn add_binary(
        &mut self,
        name: impl ToString,
        version: impl ToString,
        arch: impl ToString,
        component: impl ToString,
        section: impl ToString,
        priority: impl ToString,
    ) {
        self.binaries.push(BinaryDetails {
            name: name.to_string(),
            version: version.to_string(),
            arch: arch.to_string(),
            component: component.to_string(),
            section: section.to_string(),
            priority: priority.to_string(),
            warnings: vec![],
        });
    }

    /// Annotate binaries that deviate from their name's majority values.
    pub fn check(&mut self) {
        let mut by_name = BTreeMap::<String, Vec<usize>>::new();
        for (i, binary) in self.binaries.iter().enumerate() {
            by_name.entry(binary.name.clone()).or_default().push(i);
        }

        for indices in by_name.values() {
            let expected = {
                let field = |f: fn(&BinaryDetails) -> &str| {
                    majority(indices.iter().map(|i| f(&self.binaries[*i]))).map(String::from)
                };

                [
                    ("Component", field(|b| b.component.as_str())),
                    ("Section", field(|b| b.section.as_str())),
                    ("Priority", field(|b| b.priority.as_str())),
                ]
            };

            for i in indices {
                let binary = &mut self.binaries[*i];
                for (label, expected) in &expected {
                    let actual = match *label {
                        "Component" => &binary.component,
                        "Section" => &binary.section,
                        _ => &binary.priority,
                    };

                    if let Some(expected) = expected {
                        if actual != expected {
                            let warning = format!("{} mismatch: {} != {}", label, actual, expected);
                            binary.warnings.push(warning);
                        }
                    }
                }
            }
        }
    }

    /// Render flagged binaries, or `None` when everything is consistent.
    pub fn render_report(&self) -> Option<String> {
        if self.binaries.iter().all(|b| b.warnings.is_empty()) {
            return None;
        }

        let mut lines = vec![format!(
            "{}_{} {}/{}/{} | {} bin",
            self.name,
            self.version,
            self.component,
            self.section,
            self.urgency,
            self.binaries.len()
        )];

        for binary in self.binaries.iter().filter(|b| !b.warnings.is_empty()) {
            lines.push(format!(
                "\t{}_{} {} {}/{}/{}",
                binary.name,
                binary.version,
                binary.arch,
                binary.component,
                binary.section,
                binary.priority
            ));
            lines.extend(binary.warnings.iter().map(|w| format!("\t\t{}", w)));
        }

        Some(lines.join("\n"))
    }
}

/// Check every published source in a suite of an archive.
///
/// Returns one rendered report per inconsistent source, ordered by source name.
pub fn check_suite(
    store: &dyn PublicationStore,
    archive: &Archive,
    suite: &str,
) -> Result<Vec<String>> {
    let distribution = store.distribution(&archive.distribution)?;
    let (series, pocket) = distribution.resolve_suite(suite)?;

    let mut sources = store.source_publications(
        &PublicationFilter::archive(&archive.name)
            .series(&series.name)
            .pocket(pocket)
            .status(PublishingStatus::Published),
    )?;
    sources.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

    let cache = PublicationBatchCache::load(store, sources)?;

    let mut reports = vec![];

    for source in cache.iter() {
        let mut checker = SourceChecker::new(
            &source.name,
            &source.version,
            &source.component,
            &source.section,
            &source.urgency,
        );

        for binary in source.binaries().iter().filter(|b| {
            b.archive == archive.name
                && b.series == series.name
                && b.pocket == pocket
                && b.status == PublishingStatus::Published
        }) {
            checker.add_binary(
                &binary.name,
                &binary.version,
                &binary.architecture,
                &binary.component,
                &binary.section,
                binary.priority,
            );
        }

        checker.check();
        if let Some(report) = checker.render_report() {
            reports.push(report);
        }
    }

    Ok(reports)
}
