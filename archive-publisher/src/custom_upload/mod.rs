// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Custom uploads.

A custom upload is a pre-built tarball that isn't a Debian package: debian-installer
images, signed UEFI boot loaders, distribution upgraders and translation bundles.
Tarballs are named `<name>_<version>_<arch>.tar.gz`. Processing one extracts it to a
scratch directory, installs the relevant files into a per-architecture target
directory under `dists/<suite>/`, then points a `current` symlink at the highest
installed version and prunes old versions:

```text
dists/jammy/main/installer-amd64/
    20101020ubuntu13/
    20101020ubuntu14/
    current -> 20101020ubuntu14
```

Versioned content is installed into a `.<version>.partial` staging directory next to
the version directories and only renamed into place once installation succeeded. The
`current` symlink is only ever replaced by renaming a freshly created `current.new`
over it. Together these keep `current` from ever pointing at a partially installed
version.

Each [CustomUploadType] carries its own filename interpretation, target directory
and install predicate. [CustomUploadJob] drives the steps.
*/

pub mod uefi;

use {
    crate::{
        config::{current_umask, PublisherConfig},
        error::{PublisherError, Result},
        model::Archive,
        version::{parse_version_directory, PackageVersion},
    },
    log::{debug, info, warn},
    once_cell::sync::Lazy,
    regex::Regex,
    std::{
        path::{Component, Path, PathBuf},
        str::FromStr,
    },
    strum_macros::{Display, EnumString},
    uefi::{ImageSigner, UefiSigner},
};

/// Name of the symlink pointing at the highest installed version.
pub const CURRENT_LINK: &str = "current";

/// Number of highest versions kept when pruning.
pub const KEEP_VERSIONS: usize = 3;

static FILENAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([^_/]+)_([^_/]+)_([^_/]+)\.tar\.gz$").expect("static regex should compile")
});

/// The kinds of custom upload.
#[derive(Clone, Copy, Debug, Display, EnumString, Eq, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum CustomUploadType {
    /// debian-installer images, `debian-installer-images_<version>_<arch>.tar.gz`.
    DebianInstaller,

    /// UEFI boot loaders to sign, `<loader>_<version>_<arch>.tar.gz`.
    Uefi,

    /// Release upgrader, `dist-upgrader_<version>_<arch>.tar.gz`.
    DistUpgrader,

    /// DDTP translations, `translations_<component>_<version>.tar.gz`.
    DdtpTarball,
}

impl CustomUploadType {
    /// Guess the upload type from the leading field of a tarball filename.
    ///
    /// UEFI loaders are named after the loader, so they can't be guessed and need
    /// to be declared explicitly.
    pub fn from_filename(path: impl AsRef<Path>) -> Result<Self> {
        let parsed = parse_filename(path)?;

        match parsed.0.as_str() {
            "debian-installer" | "debian-installer-images" => Ok(Self::DebianInstaller),
            "dist-upgrader" => Ok(Self::DistUpgrader),
            "translations" => Ok(Self::DdtpTarball),
            other => Err(PublisherError::UnknownCustomUploadType(other.to_string())),
        }
    }

    /// Resolve the type from an explicit tag or, failing that, from the filename.
    pub fn resolve(tag: Option<&str>, path: impl AsRef<Path>) -> Result<Self> {
        match tag {
            Some(tag) => Self::from_str(tag)
                .map_err(|_| PublisherError::UnknownCustomUploadType(tag.to_string())),
            None => Self::from_filename(path),
        }
    }

    /// Interpret the three filename fields for this type.
    pub fn parse_path(&self, path: impl AsRef<Path>) -> Result<UploadFilename> {
        let (first, second, third) = parse_filename(path)?;

        Ok(match self {
            Self::DdtpTarball => UploadFilename {
                name: first,
                version: third,
                arch: "all".to_string(),
                component: second,
            },
            _ => UploadFilename {
                name: first,
                version: second,
                arch: third,
                component: "main".to_string(),
            },
        })
    }

    /// Directory under the archive root that this upload installs into.
    pub fn target_dir(&self, archive_root: &Path, suite: &str, f: &UploadFilename) -> PathBuf {
        let dists = archive_root.join("dists").join(suite);

        match self {
            Self::DebianInstaller => dists.join("main").join(format!("installer-{}", f.arch)),
            Self::Uefi => dists
                .join("main")
                .join("uefi")
                .join(format!("{}-{}", f.name, f.arch)),
            Self::DistUpgrader => dists
                .join("main")
                .join(format!("dist-upgrader-{}", f.arch)),
            Self::DdtpTarball => dists.join(&f.component),
        }
    }

    /// Whether this type keeps version directories with a `current` symlink.
    pub fn is_versioned(&self) -> bool {
        !matches!(self, Self::DdtpTarball)
    }
}

/// Split a custom upload filename into its three `_` separated fields.
pub fn parse_filename(path: impl AsRef<Path>) -> Result<(String, String, String)> {
    let path = path.as_ref();
    let basename = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let captures = FILENAME_RE
        .captures(&basename)
        .ok_or_else(|| PublisherError::CustomUploadFilename(basename.clone()))?;

    Ok((
        captures[1].to_string(),
        captures[2].to_string(),
        captures[3].to_string(),
    ))
}

/// Parsed fields of a custom upload filename.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UploadFilename {
    /// Leading field. The loader type for UEFI uploads.
    pub name: String,
    pub version: String,
    pub arch: String,
    /// Archive component. Only translations carry a non-`main` component.
    pub component: String,
}

/// What a processed custom upload did.
#[derive(Debug, Default)]
pub struct CustomUploadReport {
    pub target_dir: PathBuf,
    pub version: String,
    pub installed_files: usize,
    /// Version `current` points at after promotion.
    pub current: Option<String>,
    pub pruned: Vec<String>,
    pub signed: Vec<PathBuf>,
    /// Problems that did not abort the upload.
    pub recovered: Vec<PublisherError>,
}

/// A single custom upload being processed.
pub struct CustomUploadJob {
    upload_type: CustomUploadType,
    tarball: PathBuf,
    filename: UploadFilename,
    target_dir: PathBuf,
    expected_umask: u32,
    uefi: Option<UefiSigner>,
    scratch: Option<tempfile::TempDir>,
    report: CustomUploadReport,
}

impl CustomUploadJob {
    /// Prepare a job installing `tarball` into `suite` of `archive`.
    pub fn new(
        config: &PublisherConfig,
        archive: &Archive,
        suite: &str,
        upload_type: CustomUploadType,
        tarball: impl AsRef<Path>,
    ) -> Result<Self> {
        let tarball = tarball.as_ref().to_path_buf();
        let filename = upload_type.parse_path(&tarball)?;
        let target_dir = upload_type.target_dir(&archive.root, suite, &filename);

        let uefi = if upload_type == CustomUploadType::Uefi {
            Some(UefiSigner::new(config, archive))
        } else {
            None
        };

        Ok(Self {
            upload_type,
            report: CustomUploadReport {
                target_dir: target_dir.clone(),
                version: filename.version.clone(),
                ..Default::default()
            },
            tarball,
            filename,
            target_dir,
            expected_umask: config.expected_umask,
            uefi,
            scratch: None,
        })
    }

    /// Replace the program used to sign UEFI images.
    #[must_use]
    pub fn with_image_signer(mut self, signer: Box<dyn ImageSigner>) -> Self {
        if let Some(uefi) = self.uefi.take() {
            self.uefi = Some(uefi.with_image_signer(signer));
        }
        self
    }

    pub fn upload_type(&self) -> CustomUploadType {
        self.upload_type
    }

    pub fn filename(&self) -> &UploadFilename {
        &self.filename
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    /// Path of the scratch directory, while one exists.
    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch.as_ref().map(|d| d.path())
    }

    pub fn report(&self) -> &CustomUploadReport {
        &self.report
    }

    /// Whether a path relative to the extraction root should be installed.
    pub fn should_install(&self, relative: &Path) -> Result<bool> {
        let version_prefix = Path::new(&self.filename.version);

        match self.upload_type {
            CustomUploadType::DebianInstaller | CustomUploadType::Uefi => {
                Ok(relative.starts_with(version_prefix) && relative != version_prefix)
            }
            CustomUploadType::DistUpgrader => {
                let first = match relative.components().next() {
                    Some(Component::Normal(first)) => first.to_string_lossy().to_string(),
                    _ => return Ok(false),
                };

                if first == CURRENT_LINK {
                    return Ok(false);
                }

                if parse_version_directory(&first).is_none() {
                    return Err(PublisherError::BadVersionDirectory(
                        self.tarball.clone(),
                        format!("{} is not a version", first),
                    ));
                }

                Ok(true)
            }
            CustomUploadType::DdtpTarball => {
                Ok(relative.starts_with("i18n") && relative != Path::new("i18n"))
            }
        }
    }

    /// Unpack the tarball into a fresh scratch directory.
    ///
    /// UEFI uploads have their images signed once extraction succeeded.
    pub fn extract(&mut self) -> Result<()> {
        let scratch = tempfile::Builder::new()
            .prefix("customupload_")
            .tempdir()
            .map_err(|e| PublisherError::Extraction(self.tarball.clone(), e))?;

        debug!(
            "extracting {} to {}",
            self.tarball.display(),
            scratch.path().display()
        );

        let fh = std::fs::File::open(&self.tarball)
            .map_err(|e| PublisherError::Extraction(self.tarball.clone(), e))?;
        let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(fh));
        archive.set_ignore_zeros(true);
        archive
            .unpack(scratch.path())
            .map_err(|e| PublisherError::Extraction(self.tarball.clone(), e))?;

        let root = scratch.path().to_path_buf();
        self.scratch = Some(scratch);

        match self.upload_type {
            CustomUploadType::DebianInstaller => self.lift_installer_tree(&root)?,
            CustomUploadType::Uefi => {
                if let Some(uefi) = &self.uefi {
                    let outcome = uefi.sign_tree(&root)?;
                    self.report.signed = outcome.signed;
                    self.report.recovered.extend(outcome.recovered);
                }
            }
            CustomUploadType::DistUpgrader | CustomUploadType::DdtpTarball => {}
        }

        Ok(())
    }

    /// debian-installer tarballs nest their content under `installer-<arch>/<version>`.
    fn lift_installer_tree(&self, root: &Path) -> Result<()> {
        let nested_root = root.join(format!("installer-{}", self.filename.arch));
        let nested = nested_root.join(&self.filename.version);

        if !nested.is_dir() {
            return Err(PublisherError::InvalidContent(self.tarball.clone()));
        }

        let dest = root.join(&self.filename.version);
        std::fs::rename(&nested, &dest).map_err(|e| PublisherError::io_path(&nested, e))?;
        std::fs::remove_dir_all(&nested_root)
            .map_err(|e| PublisherError::io_path(&nested_root, e))?;

        Ok(())
    }

    fn check_umask(&self, path: &Path) -> Result<()> {
        let actual = current_umask()?;
        if actual != self.expected_umask {
            return Err(PublisherError::PermissionAssumption {
                expected: self.expected_umask,
                actual,
                path: path.to_path_buf(),
            });
        }
        Ok(())
    }

    /// Directory receiving versioned content before it is moved into place.
    pub fn staging_dir(&self) -> PathBuf {
        self.target_dir.join(format!(".{}.partial", self.filename.version))
    }

    /// Install extracted content into the target directory.
    ///
    /// Returns the number of files installed. Installing nothing is an error.
    ///
    /// Versioned uploads are staged first. Nothing under a version directory changes
    /// unless every file installed.
    pub fn install(&mut self) -> Result<usize> {
        let root = match &self.scratch {
            Some(scratch) => scratch.path().to_path_buf(),
            None => return Err(PublisherError::InvalidContent(self.tarball.clone())),
        };

        if !self.upload_type.is_versioned() {
            let target_dir = self.target_dir.clone();
            return self.install_tree(&root, &target_dir);
        }

        let staging = self.staging_dir();
        remove_tree(&staging)?;
        std::fs::create_dir_all(&staging).map_err(|e| PublisherError::io_path(&staging, e))?;

        let res = match self.install_tree(&root, &staging) {
            Ok(installed) => self.move_into_place(&staging).map(|_| installed),
            Err(e) => Err(e),
        };

        if res.is_err() {
            if let Err(e) = remove_tree(&staging) {
                warn!("failed to remove {}: {}", staging.display(), e);
            }
        }

        res
    }

    /// Copy files selected by [Self::should_install()] from `root` into `dest_root`.
    fn install_tree(&mut self, root: &Path, dest_root: &Path) -> Result<usize> {
        let mut installed = 0;

        let walk = walkdir::WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()));

        for entry in walk {
            let entry = entry?;
            let source = entry.path();
            let relative = source
                .strip_prefix(root)
                .map_err(|_| PublisherError::InvalidContent(self.tarball.clone()))?;

            if !self.should_install(relative)? {
                continue;
            }

            let dest = dest_root.join(relative);
            let file_type = entry.file_type();

            if file_type.is_symlink() {
                let link_target =
                    std::fs::read_link(source).map_err(|e| PublisherError::io_path(source, e))?;
                let points_at_dir = std::fs::metadata(source)
                    .map(|m| m.is_dir())
                    .unwrap_or(false);

                if points_at_dir {
                    self.check_umask(&self.target_dir.join(relative))?;
                } else {
                    installed += 1;
                }

                ensure_parent(&dest)?;
                remove_existing(&dest)?;
                symlink(&link_target, &dest)?;
            } else if file_type.is_dir() {
                if dest.is_symlink() {
                    remove_existing(&dest)?;
                }
                std::fs::create_dir_all(&dest).map_err(|e| PublisherError::io_path(&dest, e))?;
            } else {
                ensure_parent(&dest)?;
                remove_existing(&dest)?;
                std::fs::copy(source, &dest).map_err(|e| PublisherError::io_path(&dest, e))?;
                set_mode(&dest, 0o644)?;
                installed += 1;
            }
        }

        if installed == 0 {
            return Err(PublisherError::InvalidContent(self.tarball.clone()));
        }

        info!(
            "installed {} files from {} into {}",
            installed,
            self.tarball.display(),
            self.target_dir.display()
        );
        self.report.installed_files = installed;

        Ok(installed)
    }

    /// Rename staged version directories over their final names.
    ///
    /// A version being reinstalled is moved aside whole before its replacement
    /// arrives, so `current` never resolves to a mix of old and new files.
    fn move_into_place(&self, staging: &Path) -> Result<()> {
        let mut names = std::fs::read_dir(staging)
            .map_err(|e| PublisherError::io_path(staging, e))?
            .map(|entry| {
                entry
                    .map(|e| e.file_name())
                    .map_err(|e| PublisherError::io_path(staging, e))
            })
            .collect::<Result<Vec<_>>>()?;
        names.sort();

        for name in names {
            let staged = staging.join(&name);
            let dest = self.target_dir.join(&name);
            let previous = self
                .target_dir
                .join(format!(".{}.old", name.to_string_lossy()));

            let replacing = std::fs::symlink_metadata(&dest)
                .map(|m| m.is_dir())
                .unwrap_or(false);

            if replacing {
                remove_tree(&previous)?;
                std::fs::rename(&dest, &previous)
                    .map_err(|e| PublisherError::io_path(&dest, e))?;
            } else {
                remove_existing(&dest)?;
            }

            std::fs::rename(&staged, &dest).map_err(|e| PublisherError::io_path(&dest, e))?;
            debug!("moved {} into place", dest.display());

            if replacing {
                remove_tree(&previous)?;
            }
        }

        std::fs::remove_dir(staging).map_err(|e| PublisherError::io_path(staging, e))
    }

    /// Version directories in the target, highest first.
    fn installed_versions(&self) -> Result<Vec<(PackageVersion, String)>> {
        let mut versions = vec![];

        let entries = std::fs::read_dir(&self.target_dir)
            .map_err(|e| PublisherError::io_path(&self.target_dir, e))?;

        for entry in entries {
            let entry = entry.map_err(|e| PublisherError::io_path(&self.target_dir, e))?;
            let name = entry.file_name().to_string_lossy().to_string();

            if name == CURRENT_LINK {
                continue;
            }
            if !entry
                .file_type()
                .map_err(|e| PublisherError::io_path(entry.path(), e))?
                .is_dir()
            {
                continue;
            }

            match parse_version_directory(&name) {
                Some(version) => versions.push((version, name)),
                None => debug!("ignoring non-version directory {}", name),
            }
        }

        versions.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(versions)
    }

    /// Point `current` at the highest installed version.
    ///
    /// Returns the version now current, if any version directory exists.
    pub fn promote(&mut self) -> Result<Option<String>> {
        if !self.upload_type.is_versioned() {
            return Ok(None);
        }

        let versions = self.installed_versions()?;
        let highest = match versions.first() {
            Some((_, name)) => name.clone(),
            None => return Ok(None),
        };

        let current = self.target_dir.join(CURRENT_LINK);
        let staging = self.target_dir.join(format!("{}.new", CURRENT_LINK));

        // A killed earlier run may have left this behind.
        remove_existing(&staging)?;
        symlink(Path::new(&highest), &staging)?;
        std::fs::rename(&staging, &current).map_err(|e| PublisherError::io_path(&current, e))?;

        info!("{} now points at {}", current.display(), highest);
        self.report.current = Some(highest.clone());

        Ok(Some(highest))
    }

    /// Remove all but the highest [KEEP_VERSIONS] versions and the one just installed.
    pub fn prune(&mut self) -> Result<Vec<String>> {
        if !self.upload_type.is_versioned() {
            return Ok(vec![]);
        }

        let mut pruned = vec![];

        for (_, name) in self.installed_versions()?.into_iter().skip(KEEP_VERSIONS) {
            if name == self.filename.version {
                continue;
            }

            let path = self.target_dir.join(&name);
            std::fs::remove_dir_all(&path).map_err(|e| PublisherError::io_path(&path, e))?;
            debug!("pruned {}", path.display());
            pruned.push(name);
        }

        self.report.pruned = pruned.clone();

        Ok(pruned)
    }

    /// Remove the scratch directory.
    pub fn cleanup(&mut self) {
        if let Some(scratch) = self.scratch.take() {
            let path = scratch.path().to_path_buf();
            if let Err(e) = scratch.close() {
                warn!("failed to remove {}: {}", path.display(), e);
            }
        }
    }

    fn run_steps(&mut self) -> Result<()> {
        self.extract()?;
        self.install()?;
        self.promote()?;
        self.prune()?;
        Ok(())
    }

    /// Extract, install, promote and prune, always removing the scratch directory.
    pub fn process(mut self) -> Result<CustomUploadReport> {
        info!(
            "processing {} upload {}",
            self.upload_type,
            self.tarball.display()
        );

        let res = self.run_steps();
        self.cleanup();
        res?;

        if !self.report.recovered.is_empty() {
            warn!(
                "{} installed with {} recovered problem(s)",
                self.tarball.display(),
                self.report.recovered.len()
            );
        }

        Ok(self.report)
    }
}

/// Process a custom upload tarball for an archive.
pub fn process_custom_upload(
    config: &PublisherConfig,
    archive: &Archive,
    suite: &str,
    upload_type: CustomUploadType,
    tarball: impl AsRef<Path>,
) -> Result<CustomUploadReport> {
    CustomUploadJob::new(config, archive, suite, upload_type, tarball)?.process()
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| PublisherError::io_path(parent, e))?;
    }
    Ok(())
}

/// Remove a file or symlink if present. Directories are left alone.
fn remove_existing(path: &Path) -> Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(metadata) if !metadata.is_dir() => {
            std::fs::remove_file(path).map_err(|e| PublisherError::io_path(path, e))
        }
        _ => Ok(()),
    }
}

/// Remove a directory tree, file or symlink if present.
fn remove_tree(path: &Path) -> Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => {
            std::fs::remove_dir_all(path).map_err(|e| PublisherError::io_path(path, e))
        }
        _ => remove_existing(path),
    }
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link).map_err(|e| PublisherError::io_path(link, e))
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> Result<()> {
    std::os::windows::fs::symlink_file(target, link).map_err(|e| PublisherError::io_path(link, e))
}

#[cfg(unix)]
pub(crate) fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| PublisherError::io_path(path, e))
}

#[cfg(windows)]
pub(crate) fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{model::ArchivePurpose, testutil::*},
    };

    fn archive(root: &Path) -> Archive {
        Archive {
            name: "ubuntu".into(),
            distribution: "ubuntu".into(),
            purpose: ArchivePurpose::Primary,
            private: false,
            publish: true,
            root: root.to_path_buf(),
            signing_dir: None,
        }
    }

    fn installer_tarball(dir: &Path, version: &str) -> PathBuf {
        let path = dir.join(format!("debian-installer-images_{}_amd64.tar.gz", version));
        let image = format!("installer-amd64/{}/images/netboot.tar.gz", version);
        let hash = format!("installer-amd64/{}/images/SHA256SUMS", version);
        write_tarball(
            &path,
            &[(&image, TarEntry::File(b"netboot")), (&hash, TarEntry::File(b"sums"))],
        );
        path
    }

    fn process_installer(root: &Path, incoming: &Path, version: &str) -> Result<CustomUploadReport> {
        let tarball = installer_tarball(incoming, version);
        process_custom_upload(
            &test_config(),
            &archive(root),
            "jammy",
            CustomUploadType::DebianInstaller,
            tarball,
        )
    }

    #[test]
    fn filename_parsing() -> Result<()> {
        assert_eq!(
            parse_filename("/tmp/efilinux_1.0_amd64.tar.gz")?,
            ("efilinux".into(), "1.0".into(), "amd64".into())
        );

        for bad in [
            "efilinux_1.0.tar.gz",
            "efilinux_1.0_amd64_extra.tar.gz",
            "efilinux_1.0_amd64.tar.bz2",
            "",
        ] {
            assert!(matches!(
                parse_filename(bad),
                Err(PublisherError::CustomUploadFilename(_))
            ));
        }

        let f = CustomUploadType::DdtpTarball.parse_path("translations_main_20060728.tar.gz")?;
        assert_eq!(f.component, "main");
        assert_eq!(f.version, "20060728");

        Ok(())
    }

    #[test]
    fn type_resolution() -> Result<()> {
        assert_eq!(
            CustomUploadType::resolve(None, "debian-installer-images_1_amd64.tar.gz")?,
            CustomUploadType::DebianInstaller
        );
        assert_eq!(
            CustomUploadType::resolve(None, "dist-upgrader_1_all.tar.gz")?,
            CustomUploadType::DistUpgrader
        );
        assert_eq!(
            CustomUploadType::resolve(Some("uefi"), "efilinux_1.0_amd64.tar.gz")?,
            CustomUploadType::Uefi
        );
        assert!(matches!(
            CustomUploadType::resolve(None, "efilinux_1.0_amd64.tar.gz"),
            Err(PublisherError::UnknownCustomUploadType(_))
        ));
        assert!(matches!(
            CustomUploadType::resolve(Some("rosetta"), "x_1_all.tar.gz"),
            Err(PublisherError::UnknownCustomUploadType(_))
        ));

        Ok(())
    }

    #[test]
    fn target_dirs() -> Result<()> {
        let root = Path::new("/srv/ubuntu");
        let config = test_config();

        let job = CustomUploadJob::new(
            &config,
            &archive(root),
            "jammy-updates",
            CustomUploadType::Uefi,
            "efilinux_1.0_amd64.tar.gz",
        )?;
        assert_eq!(
            job.target_dir(),
            Path::new("/srv/ubuntu/dists/jammy-updates/main/uefi/efilinux-amd64")
        );

        let job = CustomUploadJob::new(
            &config,
            &archive(root),
            "jammy",
            CustomUploadType::DdtpTarball,
            "translations_universe_20060728.tar.gz",
        )?;
        assert_eq!(
            job.target_dir(),
            Path::new("/srv/ubuntu/dists/jammy/universe")
        );

        Ok(())
    }

    #[test]
    fn install_promotes_current() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let root = td.path().join("archive");
        let incoming = td.path();

        let report = process_installer(&root, incoming, "20101020ubuntu14")?;
        assert_eq!(report.installed_files, 2);
        assert_eq!(report.current.as_deref(), Some("20101020ubuntu14"));

        let target = root.join("dists/jammy/main/installer-amd64");
        assert_eq!(
            read_link(&target.join(CURRENT_LINK)),
            PathBuf::from("20101020ubuntu14")
        );
        assert_eq!(
            std::fs::read(target.join("current/images/netboot.tar.gz"))?,
            b"netboot"
        );
        assert_eq!(dir_names(&target), vec!["20101020ubuntu14", "current"]);

        Ok(())
    }

    #[test]
    fn reprocessing_same_version() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let root = td.path().join("archive");

        process_installer(&root, td.path(), "1.1")?;
        process_installer(&root, td.path(), "1.0")?;
        process_installer(&root, td.path(), "1.0")?;

        let target = root.join("dists/jammy/main/installer-amd64");
        assert_eq!(dir_names(&target), vec!["1.0", "1.1", "current"]);
        assert_eq!(read_link(&target.join(CURRENT_LINK)), PathBuf::from("1.1"));

        Ok(())
    }

    #[test]
    fn prune_keeps_three() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let root = td.path().join("archive");

        let mut last = None;
        for version in ["1.0", "1.1", "1.2", "1.10", "2.0"] {
            last = Some(process_installer(&root, td.path(), version)?);
        }

        let target = root.join("dists/jammy/main/installer-amd64");
        assert_eq!(dir_names(&target), vec!["1.10", "1.2", "2.0", "current"]);
        assert_eq!(read_link(&target.join(CURRENT_LINK)), PathBuf::from("2.0"));
        // 1.0 went when 1.10 arrived.
        assert_eq!(last.map(|r| r.pruned), Some(vec!["1.1".to_string()]));

        Ok(())
    }

    #[test]
    fn prune_retains_just_installed_old_version() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let root = td.path().join("archive");

        for version in ["2.0", "3.0", "4.0"] {
            process_installer(&root, td.path(), version)?;
        }
        process_installer(&root, td.path(), "1.0")?;

        let target = root.join("dists/jammy/main/installer-amd64");
        assert_eq!(dir_names(&target), vec!["1.0", "2.0", "3.0", "4.0", "current"]);
        assert_eq!(read_link(&target.join(CURRENT_LINK)), PathBuf::from("4.0"));

        Ok(())
    }

    #[test]
    fn stray_staging_link_is_replaced() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let root = td.path().join("archive");
        let target = root.join("dists/jammy/main/installer-amd64");
        std::fs::create_dir_all(&target)?;
        symlink(Path::new("0.1"), &target.join("current.new"))?;

        process_installer(&root, td.path(), "1.0")?;

        assert_eq!(read_link(&target.join(CURRENT_LINK)), PathBuf::from("1.0"));
        assert!(std::fs::symlink_metadata(target.join("current.new")).is_err());

        Ok(())
    }

    #[test]
    fn corrupt_tarball_cleans_scratch() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let tarball = td.path().join("debian-installer-images_1.0_amd64.tar.gz");
        std::fs::write(&tarball, b"this is not gzip")?;

        let mut job = CustomUploadJob::new(
            &test_config(),
            &archive(&td.path().join("archive")),
            "jammy",
            CustomUploadType::DebianInstaller,
            &tarball,
        )?;

        let res = job.extract();
        assert!(matches!(res, Err(PublisherError::Extraction(..))));

        let scratch = job.scratch_dir().map(|p| p.to_path_buf());
        job.cleanup();
        if let Some(scratch) = scratch {
            assert!(!scratch.exists());
        }
        assert!(!td.path().join("archive/dists").exists());

        Ok(())
    }

    #[test]
    fn scratch_removed_after_success() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let tarball = installer_tarball(td.path(), "1.0");

        let mut job = CustomUploadJob::new(
            &test_config(),
            &archive(&td.path().join("archive")),
            "jammy",
            CustomUploadType::DebianInstaller,
            &tarball,
        )?;
        job.extract()?;
        let scratch = job.scratch_dir().map(|p| p.to_path_buf());
        assert!(scratch.as_ref().map(|p| p.exists()).unwrap_or(false));
        job.install()?;
        job.cleanup();
        assert!(!scratch.map(|p| p.exists()).unwrap_or(true));

        Ok(())
    }

    #[test]
    fn nothing_installable_is_invalid() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let tarball = td.path().join("debian-installer-images_1.0_amd64.tar.gz");
        write_tarball(
            &tarball,
            &[
                ("installer-amd64/1.0/", TarEntry::Dir),
                ("README", TarEntry::File(b"nothing to see")),
            ],
        );

        let res = process_custom_upload(
            &test_config(),
            &archive(&td.path().join("archive")),
            "jammy",
            CustomUploadType::DebianInstaller,
            &tarball,
        );
        assert!(matches!(res, Err(PublisherError::InvalidContent(_))));

        Ok(())
    }

    #[test]
    fn directory_symlinks_check_umask() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let tarball = td.path().join("dist-upgrader_1.0_all.tar.gz");
        write_tarball(
            &tarball,
            &[
                ("1.0/", TarEntry::Dir),
                ("1.0/real/", TarEntry::Dir),
                ("1.0/real/file", TarEntry::File(b"data")),
                ("1.0/alias", TarEntry::Symlink("real")),
            ],
        );

        let report = process_custom_upload(
            &test_config(),
            &archive(&td.path().join("archive")),
            "jammy",
            CustomUploadType::DistUpgrader,
            &tarball,
        )?;
        assert_eq!(report.installed_files, 1);
        let target = td.path().join("archive/dists/jammy/main/dist-upgrader-all");
        assert_eq!(read_link(&target.join("1.0/alias")), PathBuf::from("real"));

        let mut config = test_config();
        config.expected_umask = current_umask()? ^ 0o007;
        let res = process_custom_upload(
            &config,
            &archive(&td.path().join("other")),
            "jammy",
            CustomUploadType::DistUpgrader,
            &tarball,
        );
        assert!(matches!(
            res,
            Err(PublisherError::PermissionAssumption { .. })
        ));

        Ok(())
    }

    fn upgrader_tarball(dir: &Path, version: &str, entries: &[(&str, TarEntry)]) -> PathBuf {
        let path = dir.join(format!("dist-upgrader_{}_all.tar.gz", version));
        let names = entries
            .iter()
            .map(|(name, _)| format!("{}/{}", version, name))
            .collect::<Vec<_>>();
        let entries = names
            .iter()
            .zip(entries)
            .map(|(name, (_, entry))| (name.as_str(), *entry))
            .collect::<Vec<_>>();
        write_tarball(&path, &entries);
        path
    }

    #[test]
    fn failed_install_keeps_current() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let root = td.path().join("archive");
        let target = root.join("dists/jammy/main/dist-upgrader-all");
        let upload = |config: &PublisherConfig, tarball: &Path| {
            process_custom_upload(
                config,
                &archive(&root),
                "jammy",
                CustomUploadType::DistUpgrader,
                tarball,
            )
        };

        let good = [("ReleaseAnnouncement", TarEntry::File(b"hi"))];
        upload(&test_config(), &upgrader_tarball(td.path(), "0.9", &good))?;

        let broken = upgrader_tarball(
            td.path(),
            "2.0",
            &[
                ("a-file", TarEntry::File(b"a")),
                ("real/", TarEntry::Dir),
                ("real/file", TarEntry::File(b"data")),
                ("z-alias", TarEntry::Symlink("real")),
                ("zz-never-installed", TarEntry::File(b"zz")),
            ],
        );
        let mut config = test_config();
        config.expected_umask = current_umask()? ^ 0o007;
        assert!(matches!(
            upload(&config, &broken),
            Err(PublisherError::PermissionAssumption { .. })
        ));

        assert_eq!(dir_names(&target), vec!["0.9", "current"]);
        assert_eq!(read_link(&target.join(CURRENT_LINK)), PathBuf::from("0.9"));

        // A later, lower upload must not promote the broken version.
        let report = upload(&test_config(), &upgrader_tarball(td.path(), "1.0", &good))?;
        assert_eq!(report.current.as_deref(), Some("1.0"));
        assert_eq!(dir_names(&target), vec!["0.9", "1.0", "current"]);
        assert_eq!(read_link(&target.join(CURRENT_LINK)), PathBuf::from("1.0"));

        Ok(())
    }

    #[test]
    fn reinstalling_current_swaps_whole_directory() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let root = td.path().join("archive");
        let target = root.join("dists/jammy/main/dist-upgrader-all");
        let upload = |tarball: PathBuf| {
            process_custom_upload(
                &test_config(),
                &archive(&root),
                "jammy",
                CustomUploadType::DistUpgrader,
                tarball,
            )
        };

        upload(upgrader_tarball(
            td.path(),
            "1.0",
            &[
                ("old-only", TarEntry::File(b"old")),
                ("shared", TarEntry::File(b"old")),
            ],
        ))?;
        upload(upgrader_tarball(
            td.path(),
            "1.0",
            &[("shared", TarEntry::File(b"new"))],
        ))?;

        assert_eq!(dir_names(&target), vec!["1.0", "current"]);
        assert_eq!(dir_names(&target.join("current")), vec!["shared"]);
        assert_eq!(std::fs::read(target.join("current/shared"))?, b"new");

        Ok(())
    }

    #[test]
    fn dist_upgrader_rejects_bad_version_dirs() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let tarball = td.path().join("dist-upgrader_1.0_all.tar.gz");
        write_tarball(
            &tarball,
            &[
                ("1.0/ReleaseAnnouncement", TarEntry::File(b"hi")),
                ("current/ReleaseAnnouncement", TarEntry::File(b"ignored")),
                ("foobar/ReleaseAnnouncement", TarEntry::File(b"bad")),
            ],
        );

        let res = process_custom_upload(
            &test_config(),
            &archive(&td.path().join("archive")),
            "jammy",
            CustomUploadType::DistUpgrader,
            &tarball,
        );
        assert!(matches!(res, Err(PublisherError::BadVersionDirectory(..))));

        Ok(())
    }

    #[test]
    fn translations_are_not_versioned() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let tarball = td.path().join("translations_main_20060728.tar.gz");
        write_tarball(
            &tarball,
            &[
                ("i18n/Translation-de", TarEntry::File(b"de")),
                ("i18n/Translation-en", TarEntry::File(b"en")),
                ("other/ignored", TarEntry::File(b"x")),
            ],
        );

        let report = process_custom_upload(
            &test_config(),
            &archive(&td.path().join("archive")),
            "jammy",
            CustomUploadType::DdtpTarball,
            &tarball,
        )?;
        assert_eq!(report.installed_files, 2);
        assert_eq!(report.current, None);

        let target = td.path().join("archive/dists/jammy/main");
        assert_eq!(dir_names(&target), vec!["i18n"]);
        assert_eq!(
            dir_names(&target.join("i18n")),
            vec!["Translation-de", "Translation-en"]
        );

        Ok(())
    }
}
