// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Publishing of Debian package archives.

This crate turns publishing records (which source and binary packages belong in
which suite of which archive) into an on-disk archive tree that `apt` can consume.
It also installs *custom uploads*: tarballs of installer images, release upgrader
tools, translations and signed UEFI images that live next to the regular indices.

# A Tour of Functionality

Publishing records are accessed through the [store::PublicationStore] trait.
[store::memory::InMemoryPublicationStore] is an implementation backed by a YAML
file. The record types themselves are defined in [model].

[publishing::PublishOrchestrator] drives a publishing run. For each selected archive
it copies pending files into the pool ([pool]), supersedes old versions, writes
`Packages` and `Sources` indices ([index]) and finally `Release` files ([release]).
Every phase runs in its own store transaction.

[custom_upload::process_custom_upload()] installs a custom upload tarball into the
`dists` tree of an archive. UEFI images are signed along the way by
[custom_upload::uefi::UefiSigner].

[overrides::Overrider] changes the component, section and priority of published
packages. [consistency::check_suite()] reports binaries whose overrides disagree
across architectures.

[batch::PublicationBatchCache] pre-loads the relations of many source publications
with a fixed number of store lookups.

Operations are configured by [config::PublisherConfig]. Errors are represented by
[error::PublisherError].
*/

pub mod batch;
pub mod config;
pub mod consistency;
pub mod custom_upload;
pub mod error;
pub mod index;
pub mod model;
pub mod overrides;
pub mod pool;
pub mod publishing;
pub mod release;
pub mod store;
#[cfg(test)]
mod testutil;
mod tool;
pub mod version;
