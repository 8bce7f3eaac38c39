// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    crate::{
        config::{current_umask, PublisherConfig},
        model::*,
        store::{PublicationDatabase, SourceFile},
    },
    sha2::Digest,
    std::path::{Path, PathBuf},
};

pub fn test_config() -> PublisherConfig {
    PublisherConfig {
        expected_umask: current_umask().unwrap(),
        ..Default::default()
    }
}

#[derive(Clone, Copy)]
pub enum TarEntry<'a> {
    Dir,
    File(&'a [u8]),
    Symlink(&'a str),
}

/// Write a gzipped tarball holding the given entries.
pub fn write_tarball(path: &Path, entries: &[(&str, TarEntry)]) {
    let fh = std::fs::File::create(path).unwrap();
    let mut builder =
        tar::Builder::new(flate2::write::GzEncoder::new(fh, flate2::Compression::default()));

    for (name, entry) in entries {
        let mut header = tar::Header::new_gnu();
        match entry {
            TarEntry::Dir => {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_mode(0o755);
                header.set_size(0);
                builder
                    .append_data(&mut header, name, std::io::empty())
                    .unwrap();
            }
            TarEntry::File(data) => {
                header.set_entry_type(tar::EntryType::Regular);
                header.set_mode(0o644);
                header.set_size(data.len() as u64);
                builder.append_data(&mut header, name, *data).unwrap();
            }
            TarEntry::Symlink(target) => {
                header.set_entry_type(tar::EntryType::Symlink);
                header.set_mode(0o777);
                header.set_size(0);
                builder.append_link(&mut header, name, target).unwrap();
            }
        }
    }

    builder.into_inner().unwrap().finish().unwrap();
}

fn pool_file(librarian: &Path, filename: &str) -> PoolFile {
    let content = librarian_content(filename);
    PoolFile {
        filename: filename.to_string(),
        librarian_path: librarian.join(filename),
        size: content.len() as u64,
        sha256: hex::encode(sha2::Sha256::digest(&content)),
    }
}

fn librarian_content(filename: &str) -> Vec<u8> {
    format!("content of {}\n", filename).into_bytes()
}

/// Write the librarian files referenced by [sample_database()].
pub fn populate_librarian(base: &Path) {
    let librarian = base.join("librarian");
    std::fs::create_dir_all(&librarian).unwrap();
    for filename in [
        "hello_1.0-1.dsc",
        "hello_1.0.orig.tar.gz",
        "hello_1.0-1_amd64.deb",
        "hello_1.0-1_i386.deb",
        "libhello1_1.0-1_amd64.deb",
        "widget_2.0.dsc",
        "stale_0.1.dsc",
    ] {
        std::fs::write(librarian.join(filename), librarian_content(filename)).unwrap();
    }
}

pub fn source(id: PublicationId, archive: &str, name: &str, version: &str) -> SourcePublication {
    SourcePublication {
        id,
        archive: archive.to_string(),
        name: name.to_string(),
        version: version.to_string(),
        component: "main".into(),
        section: "devel".into(),
        urgency: "low".into(),
        maintainer: "Ubuntu Developers <ubuntu-devel@lists.ubuntu.com>".into(),
        series: "jammy".into(),
        pocket: Pocket::Release,
        status: PublishingStatus::Pending,
        date_published: None,
        date_superseded: None,
        superseded_by: None,
        scheduled_deletion_date: None,
        date_removed: None,
    }
}

pub fn binary(
    id: PublicationId,
    archive: &str,
    name: &str,
    version: &str,
    architecture: &str,
) -> BinaryPublication {
    BinaryPublication {
        id,
        archive: archive.to_string(),
        name: name.to_string(),
        version: version.to_string(),
        architecture: architecture.to_string(),
        architecture_independent: false,
        component: "main".into(),
        section: "devel".into(),
        priority: Priority::Optional,
        series: "jammy".into(),
        pocket: Pocket::Release,
        status: PublishingStatus::Pending,
        source: None,
        build: None,
        files: vec![],
        date_published: None,
        date_superseded: None,
        superseded_by: None,
        scheduled_deletion_date: None,
        date_removed: None,
    }
}

fn archive(base: &Path, name: &str, purpose: ArchivePurpose, private: bool) -> Archive {
    Archive {
        name: name.to_string(),
        distribution: "ubuntu".into(),
        purpose,
        private,
        publish: true,
        root: base.join(name),
        signing_dir: None,
    }
}

/// A small `ubuntu` distribution with a development and a stable series.
///
/// Archive roots and librarian content live under `base`.
pub fn sample_database(base: impl AsRef<Path>) -> PublicationDatabase {
    let base = base.as_ref();
    let librarian = base.join("librarian");

    let distribution = Distribution {
        name: "ubuntu".into(),
        display_name: "Ubuntu".into(),
        series: vec![
            Series {
                name: "jammy".into(),
                version: "22.04".into(),
                status: SeriesStatus::Development,
                architectures: vec!["amd64".into(), "i386".into()],
                components: vec!["main".into(), "universe".into()],
            },
            Series {
                name: "focal".into(),
                version: "20.04".into(),
                status: SeriesStatus::Current,
                architectures: vec!["amd64".into()],
                components: vec!["main".into()],
            },
        ],
    };

    let mut disabled = archive(base, "ppa-disabled", ArchivePurpose::Ppa, false);
    disabled.publish = false;

    let archives = vec![
        archive(base, "ubuntu", ArchivePurpose::Primary, false),
        archive(base, "ubuntu-partner", ArchivePurpose::Partner, false),
        archive(base, "ppa-alice", ArchivePurpose::Ppa, false),
        archive(base, "ppa-bob", ArchivePurpose::Ppa, true),
        disabled,
    ];

    let mut old_hello = source(2, "ubuntu", "hello", "0.9-1");
    old_hello.status = PublishingStatus::Published;

    let mut stale = source(4, "ubuntu", "stale", "0.1");
    stale.series = "focal".into();

    let mut deleted = source(5, "ubuntu", "gone", "1.0");
    deleted.pocket = Pocket::Updates;
    deleted.status = PublishingStatus::Deleted;

    let sources = vec![
        source(1, "ubuntu", "hello", "1.0-1"),
        old_hello,
        source(3, "ppa-alice", "widget", "2.0"),
        stale,
        deleted,
    ];

    let mut hello_amd64 = binary(11, "ubuntu", "hello", "1.0-1", "amd64");
    hello_amd64.source = Some(1);
    hello_amd64.build = Some(21);
    hello_amd64.files = vec![pool_file(&librarian, "hello_1.0-1_amd64.deb")];

    let mut hello_i386 = binary(12, "ubuntu", "hello", "1.0-1", "i386");
    hello_i386.source = Some(1);
    hello_i386.build = Some(22);
    hello_i386.files = vec![pool_file(&librarian, "hello_1.0-1_i386.deb")];

    let mut libhello = binary(13, "ubuntu", "libhello1", "1.0-1", "amd64");
    libhello.section = "libs".into();
    libhello.source = Some(1);
    libhello.build = Some(21);
    libhello.files = vec![pool_file(&librarian, "libhello1_1.0-1_amd64.deb")];

    let mut old_hello_amd64 = binary(14, "ubuntu", "hello", "0.9-1", "amd64");
    old_hello_amd64.status = PublishingStatus::Published;
    old_hello_amd64.source = Some(2);

    let binaries = vec![hello_amd64, hello_i386, libhello, old_hello_amd64];

    let builds = vec![
        Build {
            id: 21,
            source: 1,
            architecture: "amd64".into(),
            status: BuildStatus::FullyBuilt,
            date_finished: None,
        },
        Build {
            id: 22,
            source: 1,
            architecture: "i386".into(),
            status: BuildStatus::FullyBuilt,
            date_finished: None,
        },
    ];

    let source_files = vec![
        SourceFile {
            source: 1,
            file: pool_file(&librarian, "hello_1.0-1.dsc"),
        },
        SourceFile {
            source: 1,
            file: pool_file(&librarian, "hello_1.0.orig.tar.gz"),
        },
        SourceFile {
            source: 3,
            file: pool_file(&librarian, "widget_2.0.dsc"),
        },
        SourceFile {
            source: 4,
            file: pool_file(&librarian, "stale_0.1.dsc"),
        },
    ];

    let changes_files = vec![SourceFile {
        source: 1,
        file: pool_file(&librarian, "hello_1.0-1_source.changes"),
    }];

    let package_diffs = vec![PackageDiff {
        source: 1,
        from_version: "0.9-1".into(),
        to_version: "1.0-1".into(),
        diff_filename: Some("hello_0.9-1_1.0-1.diff.gz".into()),
    }];

    PublicationDatabase {
        distributions: vec![distribution],
        archives,
        sources,
        binaries,
        builds,
        source_files,
        changes_files,
        package_diffs,
    }
}

/// Collect the names of entries in a directory, sorted.
pub fn dir_names(path: &Path) -> Vec<String> {
    let mut names = std::fs::read_dir(path)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect::<Vec<_>>();
    names.sort();
    names
}

pub fn read_link(path: &Path) -> PathBuf {
    std::fs::read_link(path).unwrap()
}
