// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Generation of `Packages` and `Sources` indices.

Two generators exist. [InternalIndexWriter] renders control paragraphs itself and is
used for PPAs and partner archives. [AptFtparchiveIndexer] writes file lists and
override files and delegates to `apt-ftparchive`, which the primary archive uses. */

use {
    crate::{
        error::{PublisherError, Result},
        model::{BinaryPublication, PoolFile, SourcePublication},
        pool::{pool_directory, pool_path},
        tool::run_tool,
    },
    debian_packaging::{
        control::{ControlField, ControlParagraph},
        io::Compression,
        repository::builder::PoolLayout,
    },
    log::{debug, info},
    std::{
        collections::BTreeMap,
        ffi::OsString,
        fmt::Write as FmtWrite,
        io::Write,
        path::{Path, PathBuf},
    },
};

/// Formats every index file is written in, in writing order.
pub const INDEX_COMPRESSIONS: [Compression; 3] =
    [Compression::None, Compression::Gzip, Compression::Xz];

/// Compress index data.
pub fn compress(compression: Compression, data: &[u8]) -> std::io::Result<Vec<u8>> {
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::Gzip => {
            let mut encoder = flate2::write::GzEncoder::new(vec![], flate2::Compression::best());
            encoder.write_all(data)?;
            encoder.finish()
        }
        Compression::Xz => {
            let mut encoder = xz2::write::XzEncoder::new(vec![], 9);
            encoder.write_all(data)?;
            encoder.finish()
        }
        other => Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            format!("{:?} index compression is not supported", other),
        )),
    }
}

fn set_field(para: &mut ControlParagraph<'static>, name: &'static str, value: impl ToString) {
    para.set_field_from_string(name.into(), value.to_string().into());
}

/// Everything needed to write the indices of one suite.
#[derive(Clone, Debug)]
pub struct IndexRequest<'a> {
    /// Archive root holding the pool.
    pub root: &'a Path,
    /// Directory receiving the indices, normally `<root>/dists/<suite>`.
    pub dists: PathBuf,
    /// Suite name, e.g. `jammy-updates`.
    pub suite: String,
    pub components: Vec<String>,
    pub architectures: Vec<String>,
    pub sources: Vec<(SourcePublication, Vec<PoolFile>)>,
    pub binaries: Vec<(BinaryPublication, String)>,
}

/// Something able to write `Packages` and `Sources` indices for a suite.
pub trait IndexGenerator {
    /// Write indices. Returns the written paths, relative to `dists/<suite>`.
    fn generate(&self, request: &IndexRequest) -> Result<Vec<String>>;

    /// What the generator is doing, for log messages.
    fn description(&self) -> &'static str {
        "building indexes"
    }
}

fn qualified_section(component: &str, section: &str) -> String {
    if component == "main" {
        section.to_string()
    } else {
        format!("{}/{}", component, section)
    }
}

/// Render the `Packages` paragraph of a binary publication.
pub fn binary_paragraph(
    binary: &BinaryPublication,
    source_name: &str,
) -> Result<ControlParagraph<'static>> {
    let layout = PoolLayout::default();
    let mut para = ControlParagraph::default();

    set_field(&mut para, "Package", &binary.name);
    if source_name != binary.name {
        set_field(&mut para, "Source", source_name);
    }
    set_field(&mut para, "Version", &binary.version);
    set_field(
        &mut para,
        "Architecture",
        if binary.architecture_independent {
            "all"
        } else {
            binary.architecture.as_str()
        },
    );
    set_field(&mut para, "Priority", binary.priority);
    set_field(
        &mut para,
        "Section",
        qualified_section(&binary.component, &binary.section),
    );

    if let Some(file) = binary.files.first() {
        set_field(
            &mut para,
            "Filename",
            pool_path(layout, &binary.component, source_name, &file.filename)?,
        );
        set_field(&mut para, "Size", file.size);
        set_field(&mut para, "SHA256", &file.sha256);
    }

    Ok(para)
}

/// Render the `Sources` paragraph of a source publication.
pub fn source_paragraph(
    source: &SourcePublication,
    files: &[PoolFile],
) -> Result<ControlParagraph<'static>> {
    let layout = PoolLayout::default();
    let mut para = ControlParagraph::default();

    set_field(&mut para, "Package", &source.name);
    set_field(&mut para, "Version", &source.version);
    if !source.maintainer.is_empty() {
        set_field(&mut para, "Maintainer", &source.maintainer);
    }
    set_field(
        &mut para,
        "Section",
        qualified_section(&source.component, &source.section),
    );
    set_field(
        &mut para,
        "Directory",
        pool_directory(layout, &source.component, &source.name)?,
    );

    if !files.is_empty() {
        para.set_field(ControlField::from_lines(
            "Checksums-Sha256".into(),
            std::iter::once(String::new()).chain(
                files
                    .iter()
                    .map(|f| format!("{} {} {}", f.sha256, f.size, f.filename)),
            ),
        ));
    }

    Ok(para)
}

fn render_paragraphs(paragraphs: &[ControlParagraph<'static>]) -> std::io::Result<Vec<u8>> {
    let mut data = vec![];
    for (i, para) in paragraphs.iter().enumerate() {
        if i > 0 {
            data.write_all(b"\n")?;
        }
        para.write(&mut data)?;
    }
    Ok(data)
}

/// Writes indices directly, in every [Compression] format.
#[derive(Clone, Copy, Debug, Default)]
pub struct InternalIndexWriter;

impl InternalIndexWriter {
    fn write_index(
        &self,
        dists: &Path,
        relative_dir: &str,
        basename: &str,
        paragraphs: &[ControlParagraph<'static>],
        written: &mut Vec<String>,
    ) -> Result<()> {
        let dir = dists.join(relative_dir);
        std::fs::create_dir_all(&dir).map_err(|e| PublisherError::io_path(&dir, e))?;

        let data = render_paragraphs(paragraphs)?;

        for compression in INDEX_COMPRESSIONS {
            let filename = format!("{}{}", basename, compression.extension());
            let path = dir.join(&filename);
            let content =
                compress(compression, &data).map_err(|e| PublisherError::io_path(&path, e))?;
            std::fs::write(&path, &content).map_err(|e| PublisherError::io_path(&path, e))?;
            debug!("wrote {} bytes to {}", content.len(), path.display());
            written.push(format!("{}/{}", relative_dir, filename));
        }

        Ok(())
    }
}

impl IndexGenerator for InternalIndexWriter {
    fn generate(&self, request: &IndexRequest) -> Result<Vec<String>> {
        let dists = &request.dists;
        let mut written = vec![];

        for component in &request.components {
            for arch in &request.architectures {
                let mut binaries = request
                    .binaries
                    .iter()
                    .filter(|(b, _)| &b.component == component && &b.architecture == arch)
                    .collect::<Vec<_>>();
                binaries.sort_by(|a, b| (&a.0.name, &a.0.version).cmp(&(&b.0.name, &b.0.version)));

                let paragraphs = binaries
                    .into_iter()
                    .map(|(b, source)| binary_paragraph(b, source))
                    .collect::<Result<Vec<_>>>()?;

                self.write_index(
                    dists,
                    &format!("{}/binary-{}", component, arch),
                    "Packages",
                    &paragraphs,
                    &mut written,
                )?;
            }

            let mut sources = request
                .sources
                .iter()
                .filter(|(s, _)| &s.component == component)
                .collect::<Vec<_>>();
            sources.sort_by(|a, b| (&a.0.name, &a.0.version).cmp(&(&b.0.name, &b.0.version)));

            let paragraphs = sources
                .into_iter()
                .map(|(s, files)| source_paragraph(s, files))
                .collect::<Result<Vec<_>>>()?;

            self.write_index(
                dists,
                &format!("{}/source", component),
                "Sources",
                &paragraphs,
                &mut written,
            )?;
        }

        info!("wrote {} index files for {}", written.len(), request.suite);

        Ok(written)
    }
}

/// Generates indices by running `apt-ftparchive generate`.
#[derive(Clone, Debug)]
pub struct AptFtparchiveIndexer {
    program: PathBuf,
}

impl AptFtparchiveIndexer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Directory holding generated configuration, file lists and overrides.
    pub fn work_dir(root: &Path) -> PathBuf {
        root.join(".apt-ftparchive")
    }

    /// Render the `apt-ftparchive generate` configuration for a suite.
    pub fn render_config(request: &IndexRequest, work_dir: &Path) -> String {
        let mut s = String::new();
        let suite = &request.suite;

        let _ = writeln!(s, "Dir {{");
        let _ = writeln!(s, "    ArchiveDir \"{}\";", request.root.display());
        let _ = writeln!(s, "    OverrideDir \"{}\";", work_dir.display());
        let _ = writeln!(s, "    CacheDir \"{}\";", work_dir.display());
        let _ = writeln!(s, "}};\n");
        let _ = writeln!(s, "Default {{");
        let _ = writeln!(s, "    Packages::Compress \". gzip xz\";");
        let _ = writeln!(s, "    Sources::Compress \". gzip xz\";");
        let _ = writeln!(s, "    DeLinkLimit 0;");
        let _ = writeln!(s, "    FileMode 0644;");
        let _ = writeln!(s, "}};\n");
        let _ = writeln!(s, "tree \"dists/{}\" {{", suite);
        let _ = writeln!(
            s,
            "    FileList \"{}/{}_$(SECTION)_binary-$(ARCH)\";",
            work_dir.display(),
            suite
        );
        let _ = writeln!(
            s,
            "    SourceFileList \"{}/{}_$(SECTION)_source\";",
            work_dir.display(),
            suite
        );
        let _ = writeln!(
            s,
            "    Packages \"{}/$(SECTION)/binary-$(ARCH)/Packages\";",
            request.dists.display()
        );
        let _ = writeln!(
            s,
            "    Sources \"{}/$(SECTION)/source/Sources\";",
            request.dists.display()
        );
        let _ = writeln!(s, "    Sections \"{}\";", request.components.join(" "));
        let _ = writeln!(
            s,
            "    Architectures \"{} source\";",
            request.architectures.join(" ")
        );
        let _ = writeln!(s, "    BinOverride \"override.{}.$(SECTION)\";", suite);
        let _ = writeln!(s, "    SrcOverride \"override.{}.$(SECTION).src\";", suite);
        let _ = writeln!(s, "    Contents \" \";");
        let _ = writeln!(s, "}};");

        s
    }

    /// Render file lists and override files, keyed by filename.
    pub fn render_lists(request: &IndexRequest) -> Result<BTreeMap<String, String>> {
        let layout = PoolLayout::default();
        let suite = &request.suite;
        let mut files = BTreeMap::new();

        for component in &request.components {
            let mut overrides = vec![];
            let mut src_overrides = vec![];

            for arch in &request.architectures {
                let mut list = vec![];
                for (binary, source) in request
                    .binaries
                    .iter()
                    .filter(|(b, _)| &b.component == component && &b.architecture == arch)
                {
                    for file in &binary.files {
                        list.push(pool_path(layout, component, source, &file.filename)?);
                    }
                    overrides.push(format!(
                        "{}\t{}\t{}",
                        binary.name,
                        binary.priority,
                        qualified_section(component, &binary.section)
                    ));
                }
                list.sort();
                files.insert(
                    format!("{}_{}_binary-{}", suite, component, arch),
                    list.into_iter().map(|l| l + "\n").collect(),
                );
            }

            let mut list = vec![];
            for (source, source_files) in request
                .sources
                .iter()
                .filter(|(s, _)| &s.component == component)
            {
                for file in source_files.iter().filter(|f| f.filename.ends_with(".dsc")) {
                    list.push(pool_path(layout, component, &source.name, &file.filename)?);
                }
                src_overrides.push(format!(
                    "{}\t{}",
                    source.name,
                    qualified_section(component, &source.section)
                ));
            }
            list.sort();
            files.insert(
                format!("{}_{}_source", suite, component),
                list.into_iter().map(|l| l + "\n").collect(),
            );

            overrides.sort();
            overrides.dedup();
            src_overrides.sort();
            src_overrides.dedup();
            files.insert(
                format!("override.{}.{}", suite, component),
                overrides.into_iter().map(|l| l + "\n").collect(),
            );
            files.insert(
                format!("override.{}.{}.src", suite, component),
                src_overrides.into_iter().map(|l| l + "\n").collect(),
            );
        }

        Ok(files)
    }
}

impl IndexGenerator for AptFtparchiveIndexer {
    fn description(&self) -> &'static str {
        "doing apt-ftparchive"
    }

    fn generate(&self, request: &IndexRequest) -> Result<Vec<String>> {
        let work_dir = Self::work_dir(request.root);
        std::fs::create_dir_all(&work_dir).map_err(|e| PublisherError::io_path(&work_dir, e))?;

        for (filename, content) in Self::render_lists(request)? {
            let path = work_dir.join(filename);
            std::fs::write(&path, content).map_err(|e| PublisherError::io_path(&path, e))?;
        }

        let config_path = work_dir.join(format!("apt-ftparchive-{}.conf", request.suite));
        std::fs::write(&config_path, Self::render_config(request, &work_dir))
            .map_err(|e| PublisherError::io_path(&config_path, e))?;

        let args: Vec<OsString> = vec![
            "--no-contents".into(),
            "-q=2".into(),
            "generate".into(),
            config_path.clone().into(),
        ];

        run_tool(&self.program, args).map_err(|output| {
            PublisherError::ExternalTool(self.program.display().to_string(), output)
        })?;

        let mut written = vec![];
        for component in &request.components {
            for compression in INDEX_COMPRESSIONS {
                for arch in &request.architectures {
                    written.push(format!(
                        "{}/binary-{}/Packages{}",
                        component,
                        arch,
                        compression.extension()
                    ));
                }
                written.push(format!(
                    "{}/source/Sources{}",
                    component,
                    compression.extension()
                ));
            }
        }

        Ok(written)
    }
}
