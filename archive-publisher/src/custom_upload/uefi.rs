// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Signing UEFI boot loader images.

Each archive may have a `uefi.key` / `uefi.crt` pair in its signing directory. Every
`*.efi` file in an extracted upload is signed with it, producing a sibling
`<image>.signed` that is installed alongside the original. Signing problems are
recoverable: the upload is still installed, just without signatures.
*/

use {
    crate::{
        config::PublisherConfig,
        custom_upload::set_mode,
        error::{PublisherError, Result},
        model::Archive,
        tool::run_tool,
    },
    log::{info, warn},
    std::{
        ffi::OsString,
        path::{Path, PathBuf},
    },
};

pub const KEY_FILENAME: &str = "uefi.key";
pub const CERT_FILENAME: &str = "uefi.crt";

/// Something that can sign an EFI image.
pub trait ImageSigner {
    /// Sign `image`, writing `<image>.signed`.
    fn sign(&self, key: &Path, cert: &Path, image: &Path) -> Result<()>;
}

/// Signs images with `sbsign`.
#[derive(Clone, Debug)]
pub struct SbsignImageSigner {
    sbsign: PathBuf,
}

impl SbsignImageSigner {
    pub fn new(sbsign: impl Into<PathBuf>) -> Self {
        Self {
            sbsign: sbsign.into(),
        }
    }
}

impl ImageSigner for SbsignImageSigner {
    fn sign(&self, key: &Path, cert: &Path, image: &Path) -> Result<()> {
        let args: Vec<OsString> = vec![
            "--key".into(),
            key.into(),
            "--cert".into(),
            cert.into(),
            image.into(),
        ];

        run_tool(&self.sbsign, args)
            .map_err(|output| PublisherError::SigningToolFailure(image.to_path_buf(), output))
    }
}

/// Result of signing an extracted tree.
#[derive(Debug, Default)]
pub struct SigningOutcome {
    pub signed: Vec<PathBuf>,
    pub recovered: Vec<PublisherError>,
}

/// Signs the EFI images of one archive's uploads.
pub struct UefiSigner {
    archive_name: String,
    key: Option<PathBuf>,
    cert: Option<PathBuf>,
    auto_generate: bool,
    openssl: PathBuf,
    signer: Box<dyn ImageSigner>,
}

impl UefiSigner {
    pub fn new(config: &PublisherConfig, archive: &Archive) -> Self {
        let signing_dir = config.archive_signing_dir(archive);
        if signing_dir.is_none() {
            info!(
                "no signing directory for {}; UEFI images will not be signed",
                archive.display_name()
            );
        }

        Self {
            archive_name: archive.name.clone(),
            key: signing_dir.as_ref().map(|d| d.join(KEY_FILENAME)),
            cert: signing_dir.as_ref().map(|d| d.join(CERT_FILENAME)),
            auto_generate: config.uefi_auto_generate_keys,
            openssl: config.tools.openssl.clone(),
            signer: Box::new(SbsignImageSigner::new(&config.tools.sbsign)),
        }
    }

    #[must_use]
    pub fn with_image_signer(mut self, signer: Box<dyn ImageSigner>) -> Self {
        self.signer = signer;
        self
    }

    pub fn key_path(&self) -> Option<&Path> {
        self.key.as_deref()
    }

    pub fn cert_path(&self) -> Option<&Path> {
        self.cert.as_deref()
    }

    /// Generate a self-signed key pair with `openssl`.
    ///
    /// Both files are created owner-only before `openssl` writes them so the private
    /// key is never world readable. The certificate is opened up afterwards.
    pub fn generate_keys(&self, key: &Path, cert: &Path) -> Result<()> {
        info!("generating UEFI signing keys for {}", self.archive_name);

        let generation_error =
            |msg: String| PublisherError::SigningKeyGeneration(self.archive_name.clone(), msg);

        if let Some(parent) = key.parent() {
            std::fs::create_dir_all(parent).map_err(|e| generation_error(e.to_string()))?;
        }

        for path in [key, cert] {
            create_private_file(path).map_err(|e| generation_error(e.to_string()))?;
        }

        let args: Vec<OsString> = vec![
            "req".into(),
            "-new".into(),
            "-x509".into(),
            "-newkey".into(),
            "rsa:2048".into(),
            "-subj".into(),
            format!("/CN=PPA {}/", self.archive_name).into(),
            "-keyout".into(),
            key.into(),
            "-out".into(),
            cert.into(),
            "-days".into(),
            "3650".into(),
            "-nodes".into(),
            "-sha256".into(),
        ];

        if let Err(output) = run_tool(&self.openssl, args) {
            // Empty files would otherwise pass for an existing key pair.
            let _ = std::fs::remove_file(key);
            let _ = std::fs::remove_file(cert);
            return Err(generation_error(output));
        }

        set_mode(cert, 0o644)?;

        Ok(())
    }

    /// Find a usable key pair, generating one if configured to.
    ///
    /// `Ok(None)` means signing should be skipped.
    pub fn resolve_keys(&self) -> Result<Option<(PathBuf, PathBuf)>> {
        let (key, cert) = match (&self.key, &self.cert) {
            (Some(key), Some(cert)) => (key.clone(), cert.clone()),
            _ => return Ok(None),
        };

        if self.auto_generate && !key.exists() && !cert.exists() {
            self.generate_keys(&key, &cert)?;
        }

        for path in [&key, &cert] {
            if !path.exists() {
                info!("{} does not exist; not signing", path.display());
                return Ok(None);
            }
            if std::fs::File::open(path).is_err() {
                return Err(PublisherError::SigningKeyUnreadable(path.clone()));
            }
        }

        Ok(Some((key, cert)))
    }

    /// Sign every `*.efi` file under `root`.
    ///
    /// Stale `.signed` files are removed first, whether or not signing happens.
    pub fn sign_tree(&self, root: &Path) -> Result<SigningOutcome> {
        let mut outcome = SigningOutcome::default();

        let images = find_efi_images(root)?;
        for image in &images {
            let signed = signed_path(image);
            if signed.exists() {
                std::fs::remove_file(&signed).map_err(|e| PublisherError::io_path(&signed, e))?;
            }
        }

        if images.is_empty() {
            return Ok(outcome);
        }

        let (key, cert) = match self.resolve_keys() {
            Ok(Some(keys)) => keys,
            Ok(None) => return Ok(outcome),
            Err(e) if !e.is_fatal() => {
                warn!("{}", e);
                outcome.recovered.push(e);
                return Ok(outcome);
            }
            Err(e) => return Err(e),
        };

        for image in images {
            match self.signer.sign(&key, &cert, &image) {
                Ok(()) => {
                    info!("signed {}", image.display());
                    outcome.signed.push(image);
                }
                Err(e) if !e.is_fatal() => {
                    warn!("{}", e);
                    outcome.recovered.push(e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(outcome)
    }
}

fn signed_path(image: &Path) -> PathBuf {
    let mut s = image.as_os_str().to_owned();
    s.push(".signed");
    PathBuf::from(s)
}

/// Regular `*.efi` files under a directory, in path order.
pub fn find_efi_images(root: &Path) -> Result<Vec<PathBuf>> {
    let mut res = vec![];

    for entry in walkdir::WalkDir::new(root).sort_by(|a, b| a.file_name().cmp(b.file_name())) {
        let entry = entry?;
        if entry.file_type().is_file()
            && entry.path().extension().map_or(false, |ext| ext == "efi")
        {
            res.push(entry.into_path());
        }
    }

    Ok(res)
}

#[cfg(unix)]
fn create_private_file(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;

    std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;

    Ok(())
}

#[cfg(windows)]
fn create_private_file(path: &Path) -> std::io::Result<()> {
    std::fs::File::create(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            custom_upload::{process_custom_upload, CustomUploadJob, CustomUploadType},
            model::ArchivePurpose,
            testutil::*,
        },
        std::{cell::RefCell, rc::Rc},
    };

    #[derive(Clone, Default)]
    struct RecordingSigner {
        calls: Rc<RefCell<Vec<PathBuf>>>,
        fail: bool,
    }

    impl ImageSigner for RecordingSigner {
        fn sign(&self, _key: &Path, _cert: &Path, image: &Path) -> Result<()> {
            self.calls.borrow_mut().push(image.to_path_buf());
            if self.fail {
                return Err(PublisherError::SigningToolFailure(
                    image.to_path_buf(),
                    "refused".into(),
                ));
            }
            std::fs::write(signed_path(image), b"signed")?;
            Ok(())
        }
    }

    fn archive(root: &Path, signing_dir: Option<PathBuf>) -> Archive {
        Archive {
            name: "ppa-alice".into(),
            distribution: "ubuntu".into(),
            purpose: ArchivePurpose::Ppa,
            private: false,
            publish: true,
            root: root.to_path_buf(),
            signing_dir,
        }
    }

    fn uefi_tarball(dir: &Path) -> PathBuf {
        let path = dir.join("efilinux_1.0_amd64.tar.gz");
        write_tarball(
            &path,
            &[
                ("1.0/", TarEntry::Dir),
                ("1.0/bootx64.efi", TarEntry::File(b"efi image")),
                ("1.0/bootx64.efi.signed", TarEntry::File(b"stale")),
                ("1.0/README", TarEntry::File(b"readme")),
            ],
        );
        path
    }

    fn write_keys(dir: &Path) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(KEY_FILENAME), b"key").unwrap();
        std::fs::write(dir.join(CERT_FILENAME), b"cert").unwrap();
    }

    #[test]
    fn signs_each_image_once() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let keys = td.path().join("keys");
        write_keys(&keys);
        let tarball = uefi_tarball(td.path());

        let signer = RecordingSigner::default();
        let report = CustomUploadJob::new(
            &test_config(),
            &archive(&td.path().join("archive"), Some(keys)),
            "jammy",
            CustomUploadType::Uefi,
            &tarball,
        )?
        .with_image_signer(Box::new(signer.clone()))
        .process()?;

        assert_eq!(signer.calls.borrow().len(), 1);
        assert_eq!(report.signed.len(), 1);
        assert!(report.recovered.is_empty());

        let target = td.path().join("archive/dists/jammy/main/uefi/efilinux-amd64/current");
        assert_eq!(std::fs::read(target.join("bootx64.efi"))?, b"efi image");
        assert_eq!(std::fs::read(target.join("bootx64.efi.signed"))?, b"signed");

        Ok(())
    }

    #[test]
    fn no_keys_skips_signing() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let tarball = uefi_tarball(td.path());

        let signer = RecordingSigner::default();
        let mut job = CustomUploadJob::new(
            &test_config(),
            &archive(&td.path().join("archive"), Some(td.path().join("nokeys"))),
            "jammy",
            CustomUploadType::Uefi,
            &tarball,
        )?
        .with_image_signer(Box::new(signer.clone()));

        job.extract()?;
        assert!(signer.calls.borrow().is_empty());
        assert!(job.report().recovered.is_empty());

        // The stale signature from the tarball is gone.
        let scratch = job.scratch_dir().map(|p| p.to_path_buf()).unwrap();
        assert!(scratch.join("1.0/bootx64.efi").exists());
        assert!(!scratch.join("1.0/bootx64.efi.signed").exists());
        job.cleanup();

        Ok(())
    }

    #[test]
    fn signing_failure_is_recoverable() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let keys = td.path().join("keys");
        write_keys(&keys);
        let tarball = uefi_tarball(td.path());

        let signer = RecordingSigner {
            fail: true,
            ..Default::default()
        };
        let report = CustomUploadJob::new(
            &test_config(),
            &archive(&td.path().join("archive"), Some(keys)),
            "jammy",
            CustomUploadType::Uefi,
            &tarball,
        )?
        .with_image_signer(Box::new(signer))
        .process()?;

        assert!(report.signed.is_empty());
        assert!(matches!(
            report.recovered.as_slice(),
            [PublisherError::SigningToolFailure(..)]
        ));
        assert_eq!(report.installed_files, 2);

        Ok(())
    }

    #[test]
    fn key_generation_failure_is_recoverable() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        let keys = td.path().join("keys");
        let tarball = uefi_tarball(td.path());

        let mut config = test_config();
        config.uefi_auto_generate_keys = true;
        config.tools.openssl = PathBuf::from("/nonexistent/openssl");

        let report = process_custom_upload(
            &config,
            &archive(&td.path().join("archive"), Some(keys.clone())),
            "jammy",
            CustomUploadType::Uefi,
            &tarball,
        )?;

        assert!(matches!(
            report.recovered.as_slice(),
            [PublisherError::SigningKeyGeneration(..)]
        ));
        assert!(!keys.join(KEY_FILENAME).exists());
        assert!(!keys.join(CERT_FILENAME).exists());

        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn generated_key_permissions() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let td = tempfile::TempDir::new()?;

        // Stand in for openssl: write both output files.
        let fake_openssl = td.path().join("openssl");
        std::fs::write(
            &fake_openssl,
            "#!/bin/sh\nwhile [ $# -gt 0 ]; do\n  case \"$1\" in\n    -keyout) echo key > \"$2\"; shift ;;\n    -out) echo cert > \"$2\"; shift ;;\n  esac\n  shift\ndone\n",
        )?;
        std::fs::set_permissions(&fake_openssl, std::fs::Permissions::from_mode(0o755))?;

        let mut config = test_config();
        config.uefi_auto_generate_keys = true;
        config.tools.openssl = fake_openssl;

        let keys = td.path().join("keys");
        let signer = UefiSigner::new(&config, &archive(td.path(), Some(keys.clone())));
        let resolved = signer.resolve_keys()?;

        assert_eq!(
            resolved,
            Some((keys.join(KEY_FILENAME), keys.join(CERT_FILENAME)))
        );
        let mode = |p: PathBuf| std::fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(keys.join(KEY_FILENAME)), 0o600);
        assert_eq!(mode(keys.join(CERT_FILENAME)), 0o644);

        Ok(())
    }

    #[test]
    fn efi_discovery() -> Result<()> {
        let td = tempfile::TempDir::new()?;
        std::fs::create_dir_all(td.path().join("a/b"))?;
        std::fs::write(td.path().join("a/b/grub.efi"), b"")?;
        std::fs::write(td.path().join("a/shim.efi"), b"")?;
        std::fs::write(td.path().join("a/shim.efi.signed"), b"")?;

        assert_eq!(
            find_efi_images(td.path())?,
            vec![td.path().join("a/b/grub.efi"), td.path().join("a/shim.efi")]
        );

        Ok(())
    }
}
