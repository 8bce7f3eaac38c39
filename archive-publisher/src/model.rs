// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Records describing what gets published where.

These types mirror the rows of the publication database: distributions and their
series, archives, and source/binary publishing records with the builds and files
hanging off them. */

use {
    crate::error::{PublisherError, Result},
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::{
        fmt::{Display, Formatter},
        path::PathBuf,
        str::FromStr,
    },
    strum::{EnumIter, IntoEnumIterator},
    strum_macros::{Display as StrumDisplay, EnumString},
};

/// Identifier of a publishing record.
pub type PublicationId = u64;

/// Identifier of a build record.
pub type BuildId = u64;

/// Lifecycle state of a series.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize, StrumDisplay, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum SeriesStatus {
    Experimental,
    Development,
    Frozen,
    Current,
    Supported,
    Obsolete,
}

impl SeriesStatus {
    /// Whether the release pocket of a series in this state still accepts publications.
    pub fn is_unstable(&self) -> bool {
        matches!(self, Self::Experimental | Self::Development | Self::Frozen)
    }
}

/// A named release of a distribution, e.g. `jammy`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Series {
    pub name: String,
    #[serde(default)]
    pub version: String,
    pub status: SeriesStatus,
    pub architectures: Vec<String>,
    pub components: Vec<String>,
}

impl Series {
    pub fn is_unstable(&self) -> bool {
        self.status.is_unstable()
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Distribution {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    pub series: Vec<Series>,
}

impl Distribution {
    pub fn series(&self, name: &str) -> Option<&Series> {
        self.series.iter().find(|s| s.name == name)
    }

    /// The series currently under development, falling back to the first one listed.
    pub fn current_series(&self) -> Option<&Series> {
        self.series
            .iter()
            .find(|s| s.status == SeriesStatus::Development)
            .or_else(|| self.series.first())
    }

    /// Resolve a suite name like `jammy-updates` against this distribution.
    pub fn resolve_suite(&self, suite: &str) -> Result<(&Series, Pocket)> {
        let parsed = Suite::from_str(suite)?;
        let series = self
            .series(&parsed.series)
            .ok_or_else(|| PublisherError::UnknownSuite(suite.to_string()))?;

        Ok((series, parsed.pocket))
    }
}

/// A named sub-channel of a series.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    EnumIter,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    StrumDisplay,
    EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Pocket {
    Release,
    Security,
    Updates,
    Proposed,
    Backports,
}

impl Pocket {
    /// Suffix appended to a series name to form the suite name.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Release => "",
            Self::Security => "-security",
            Self::Updates => "-updates",
            Self::Proposed => "-proposed",
            Self::Backports => "-backports",
        }
    }
}

/// A `(series, pocket)` pair.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Suite {
    pub series: String,
    pub pocket: Pocket,
}

impl Suite {
    pub fn new(series: impl ToString, pocket: Pocket) -> Self {
        Self {
            series: series.to_string(),
            pocket,
        }
    }
}

impl Display for Suite {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.series, self.pocket.suffix())
    }
}

impl FromStr for Suite {
    type Err = PublisherError;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(PublisherError::UnknownSuite(s.to_string()));
        }

        for pocket in Pocket::iter().filter(|p| *p != Pocket::Release) {
            if let Some(series) = s.strip_suffix(pocket.suffix()) {
                if !series.is_empty() {
                    return Ok(Self::new(series, pocket));
                }
            }
        }

        Ok(Self::new(s, Pocket::Release))
    }
}

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize, StrumDisplay, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ArchivePurpose {
    Primary,
    Partner,
    Ppa,
}

/// A package archive with its own on-disk tree.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Archive {
    pub name: String,
    pub distribution: String,
    pub purpose: ArchivePurpose,
    #[serde(default)]
    pub private: bool,
    #[serde(default = "default_true")]
    pub publish: bool,
    /// Root of the archive tree, holding `dists` and `pool`.
    pub root: PathBuf,
    /// Explicit directory holding this archive's signing keys.
    #[serde(default)]
    pub signing_dir: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Archive {
    pub fn is_ppa(&self) -> bool {
        self.purpose == ArchivePurpose::Ppa
    }

    /// Pockets this archive publishes to.
    pub fn pockets(&self) -> Vec<Pocket> {
        if self.is_ppa() {
            vec![Pocket::Release]
        } else {
            Pocket::iter().collect()
        }
    }

    /// Whether the release pocket of a stable series may still change.
    pub fn allows_release_pocket_updates(&self) -> bool {
        self.purpose != ArchivePurpose::Primary
    }

    /// Human readable name for logging.
    pub fn display_name(&self) -> String {
        match self.purpose {
            ArchivePurpose::Ppa => format!("PPA {}", self.name),
            _ => format!("{} {}", self.distribution, self.name),
        }
    }
}

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize, StrumDisplay, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum PublishingStatus {
    Pending,
    Published,
    Superseded,
    Deleted,
    Obsolete,
}

impl PublishingStatus {
    pub fn is_deletion(&self) -> bool {
        matches!(self, Self::Deleted | Self::Obsolete)
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    EnumIter,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    StrumDisplay,
    EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "lowercase")]
pub enum Priority {
    Required,
    Important,
    Standard,
    Optional,
    Extra,
}

/// A file carried by a publication.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PoolFile {
    pub filename: String,
    /// Where the accepted content currently lives.
    pub librarian_path: PathBuf,
    pub size: u64,
    pub sha256: String,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct SourcePublication {
    pub id: PublicationId,
    pub archive: String,
    pub name: String,
    pub version: String,
    pub component: String,
    pub section: String,
    #[serde(default = "default_urgency")]
    pub urgency: String,
    #[serde(default)]
    pub maintainer: String,
    pub series: String,
    pub pocket: Pocket,
    pub status: PublishingStatus,
    #[serde(default)]
    pub date_published: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_superseded: Option<DateTime<Utc>>,
    #[serde(default)]
    pub superseded_by: Option<PublicationId>,
    #[serde(default)]
    pub scheduled_deletion_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_removed: Option<DateTime<Utc>>,
}

fn default_urgency() -> String {
    "low".to_string()
}

impl SourcePublication {
    pub fn suite(&self) -> Suite {
        Suite::new(&self.series, self.pocket)
    }

    /// `name_version`.
    pub fn title(&self) -> String {
        format!("{}_{}", self.name, self.version)
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BinaryPublication {
    pub id: PublicationId,
    pub archive: String,
    pub name: String,
    pub version: String,
    /// Architecture tag of the series architecture this publication targets.
    pub architecture: String,
    /// Whether the package is `Architecture: all`.
    #[serde(default)]
    pub architecture_independent: bool,
    pub component: String,
    pub section: String,
    pub priority: Priority,
    pub series: String,
    pub pocket: Pocket,
    pub status: PublishingStatus,
    /// Source publication this binary was built from.
    #[serde(default)]
    pub source: Option<PublicationId>,
    #[serde(default)]
    pub build: Option<BuildId>,
    #[serde(default)]
    pub files: Vec<PoolFile>,
    #[serde(default)]
    pub date_published: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_superseded: Option<DateTime<Utc>>,
    #[serde(default)]
    pub superseded_by: Option<PublicationId>,
    #[serde(default)]
    pub scheduled_deletion_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_removed: Option<DateTime<Utc>>,
}

impl BinaryPublication {
    pub fn suite(&self) -> Suite {
        Suite::new(&self.series, self.pocket)
    }

    /// `name_version`.
    pub fn title(&self) -> String {
        format!("{}_{}", self.name, self.version)
    }
}

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize, StrumDisplay, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum BuildStatus {
    NeedsBuilding,
    Building,
    FullyBuilt,
    Failed,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Build {
    pub id: BuildId,
    pub source: PublicationId,
    pub architecture: String,
    pub status: BuildStatus,
    #[serde(default)]
    pub date_finished: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PackageDiff {
    pub source: PublicationId,
    pub from_version: String,
    pub to_version: String,
    #[serde(default)]
    pub diff_filename: Option<String>,
}
