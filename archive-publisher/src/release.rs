// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `Release` file generation.

A `Release` file describes a suite and lists every index file beneath
`dists/<suite>/` with its size and digests. */

use {
    crate::error::{PublisherError, Result},
    chrono::{DateTime, Utc},
    debian_packaging::{
        control::{ControlField, ControlParagraph},
        repository::release::{ChecksumType, DATE_FORMAT},
    },
    log::info,
    sha2::Digest,
    std::{collections::BTreeMap, path::Path},
};

/// Checksum fields of `Release` files, in writing order.
pub const RELEASE_CHECKSUMS: [ChecksumType; 3] =
    [ChecksumType::Md5, ChecksumType::Sha1, ChecksumType::Sha256];

/// Hex digest of data.
pub fn digest_hex(checksum: ChecksumType, data: &[u8]) -> String {
    match checksum {
        ChecksumType::Md5 => hex::encode(md5::Md5::digest(data)),
        ChecksumType::Sha1 => hex::encode(sha1::Sha1::digest(data)),
        ChecksumType::Sha256 => hex::encode(sha2::Sha256::digest(data)),
    }
}

/// Static description of a suite for its `Release` file.
#[derive(Clone, Debug)]
pub struct ReleaseDescription {
    pub origin: String,
    pub label: String,
    pub suite: String,
    pub version: String,
    pub codename: String,
    pub date: DateTime<Utc>,
    pub architectures: Vec<String>,
    pub components: Vec<String>,
    pub description: String,
}

/// Custom upload trees under `dists/<suite>/<component>` aren't indices.
fn is_custom_upload_dir(name: &str) -> bool {
    name.starts_with("installer-") || name.starts_with("dist-upgrader-") || name == "uefi"
}

/// Size and digests of files below `dists/<suite>`, keyed by relative path.
fn collect_entries(dists: &Path) -> Result<BTreeMap<String, (u64, Vec<String>)>> {
    let mut entries = BTreeMap::new();

    let walk = walkdir::WalkDir::new(dists)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !is_custom_upload_dir(e.file_name().to_string_lossy().as_ref()));

    for entry in walk {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(dists)
            .map_err(|_| PublisherError::InvalidContent(entry.path().to_path_buf()))?
            .to_string_lossy()
            .replace('\\', "/");

        if relative == "Release" || relative == "InRelease" || relative == "Release.gpg" {
            continue;
        }

        let data =
            std::fs::read(entry.path()).map_err(|e| PublisherError::io_path(entry.path(), e))?;
        let digests = RELEASE_CHECKSUMS
            .iter()
            .map(|c| digest_hex(*c, &data))
            .collect();

        entries.insert(relative, (data.len() as u64, digests));
    }

    Ok(entries)
}

/// Render a `Release` file for the suite whose indices live in `dists`.
pub fn render_release(description: &ReleaseDescription, dists: &Path) -> Result<String> {
    let mut para = ControlParagraph::default();
    let mut set = |name: &'static str, value: String| {
        para.set_field_from_string(name.into(), value.into());
    };

    set("Origin", description.origin.clone());
    set("Label", description.label.clone());
    set("Suite", description.suite.clone());
    if !description.version.is_empty() {
        set("Version", description.version.clone());
    }
    set("Codename", description.codename.clone());
    set("Date", description.date.format(DATE_FORMAT).to_string());
    set("Architectures", description.architectures.join(" "));
    set("Components", description.components.join(" "));
    set("Description", description.description.clone());

    let entries = collect_entries(dists)?;

    let longest_size = entries
        .values()
        .map(|(size, _)| format!("{}", size).len())
        .max()
        .unwrap_or_default();

    for (i, checksum) in RELEASE_CHECKSUMS.iter().enumerate() {
        para.set_field(ControlField::from_lines(
            checksum.field_name().into(),
            std::iter::once(String::new()).chain(entries.iter().map(
                |(path, (size, digests))| {
                    format!(
                        "{} {:>size_width$} {}",
                        digests[i],
                        size,
                        path,
                        size_width = longest_size
                    )
                },
            )),
        ));
    }

    let mut data = vec![];
    para.write(&mut data)?;

    Ok(String::from_utf8_lossy(&data).to_string())
}

/// Write `dists/<suite>/Release`.
pub fn write_release(description: &ReleaseDescription, dists: &Path) -> Result<()> {
    let content = render_release(description, dists)?;
    let path = dists.join("Release");

    std::fs::create_dir_all(dists).map_err(|e| PublisherError::io_path(dists, e))?;
    std::fs::write(&path, content.as_bytes()).map_err(|e| PublisherError::io_path(&path, e))?;

    info!("wrote {}", path.display());

    Ok(())
}
