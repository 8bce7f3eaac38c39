// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Version ordering.

Parsing and dpkg ordering come from [PackageVersion]. This module adds the lenient
comparison used when ranking publication records and the stricter rule for
directory names under a custom upload target. */

use std::cmp::Ordering;

pub use debian_packaging::{error::DebianError as VersionError, package_version::PackageVersion};

/// Parse the name of a version directory.
///
/// Names must start with a digit. This keeps `current`, staging directories and
/// other siblings of version directories from being mistaken for versions.
pub fn parse_version_directory(name: &str) -> Option<PackageVersion> {
    if !name.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }

    PackageVersion::parse(name).ok()
}

/// Compare two version strings, falling back to byte order when either fails to parse.
pub fn compare_version_strings(a: &str, b: &str) -> Ordering {
    match (PackageVersion::parse(a), PackageVersion::parse(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}
