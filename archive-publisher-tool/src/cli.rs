// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    archive_publisher::{
        config::PublisherConfig,
        consistency::check_suite,
        custom_upload::{process_custom_upload, CustomUploadType},
        error::PublisherError,
        model::{Archive, ArchivePurpose},
        overrides::{OverrideOutcome, OverrideScope, Overrider},
        publishing::{ArchiveSelector, PublishEvent, PublishOptions, PublishOrchestrator},
        store::{memory::InMemoryPublicationStore, PublicationStore},
    },
    clap::{Arg, ArgGroup, ArgMatches, Command},
    log::{info, LevelFilter},
    std::path::PathBuf,
    thiserror::Error,
};

const PUBLISH_DISTRO_ABOUT: &str = "\
Publish the archives of a distribution.

Each selected archive is published in four phases:

1. Pending publications are copied into the pool and marked published.
2. Older versions in touched suites are superseded.
3. Packages and Sources indices are written for touched suites.
4. Release files are written for suites with new indices.

Each phase is committed on its own. If a phase fails, the archive is left
alone and publishing continues with the next archive. The command exits
non-zero if any archive failed.

By default only the primary archive is published. --ppa, --private-ppa and
--partner select other archives. PPAs are only published when they have
pending work, unless --careful or --careful-publishing is given.

The --careful-* arguments force a phase to consider every suite instead of
only the ones touched by this run. --careful implies all of them.
";

const PROCESS_CUSTOM_UPLOAD_ABOUT: &str = "\
Install custom upload tarballs into an archive.

Tarballs are named <type>_<version>_<arch>.tar.gz. Their content is unpacked
below dists/<suite>/main/ in a directory specific to the upload type, and a
`current` symlink is pointed at the newest version. Only the newest few
versions are retained.

The upload type is guessed from the filename unless --type is given. UEFI
uploads always need --type uefi.
";

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("argument parsing error: {0:?}")]
    Clap(#[from] clap::Error),

    #[error("{0}")]
    Publisher(#[from] PublisherError),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("no publication database configured")]
    NoDatabase,

    #[error("invalid sub-command: {0}")]
    InvalidSubCommand(String),
}

pub type Result<T> = std::result::Result<T, ToolError>;

fn command() -> Command<'static> {
    let app = Command::new("Archive Publisher")
        .version("0.1")
        .author("Gregory Szorc <gregory.szorc@gmail.com>")
        .about("Publish Debian archives and custom uploads")
        .arg_required_else_help(true);

    let app = app
        .arg(
            Arg::new("config")
                .long("config")
                .takes_value(true)
                .global(true)
                .allow_invalid_utf8(true)
                .help("Path to a YAML configuration file"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .multiple_occurrences(true)
                .help("Increase logging verbosity. Can be specified multiple times."),
        );

    let app = app.subcommand(
        Command::new("publish-distro")
            .about("Publish the archives of a distribution")
            .long_about(PUBLISH_DISTRO_ABOUT)
            .arg(
                Arg::new("careful")
                    .long("careful")
                    .help("Be careful in every phase"),
            )
            .arg(
                Arg::new("careful-publishing")
                    .long("careful-publishing")
                    .help("Republish published records and allow stable release pockets"),
            )
            .arg(
                Arg::new("careful-domination")
                    .long("careful-domination")
                    .help("Dominate every suite"),
            )
            .arg(
                Arg::new("careful-apt")
                    .long("careful-apt")
                    .help("Write indices and Release files of every suite"),
            )
            .arg(
                Arg::new("distribution")
                    .long("distribution")
                    .takes_value(true)
                    .default_value("ubuntu")
                    .help("Distribution to publish"),
            )
            .arg(
                Arg::new("suite")
                    .long("suite")
                    .takes_value(true)
                    .multiple_occurrences(true)
                    .help("Only publish this suite. Can be specified multiple times."),
            )
            .arg(
                Arg::new("distsroot")
                    .long("distsroot")
                    .takes_value(true)
                    .allow_invalid_utf8(true)
                    .help("Write dists here instead of under the archive root"),
            )
            .arg(Arg::new("ppa").long("ppa").help("Publish public PPAs"))
            .arg(
                Arg::new("private-ppa")
                    .long("private-ppa")
                    .help("Publish private PPAs"),
            )
            .arg(
                Arg::new("partner")
                    .long("partner")
                    .help("Publish the partner archive"),
            )
            .group(ArgGroup::new("archive-kind").args(&["ppa", "private-ppa", "partner"])),
    );

    let app = app.subcommand(
        Command::new("process-custom-upload")
            .about("Install custom upload tarballs")
            .long_about(PROCESS_CUSTOM_UPLOAD_ABOUT)
            .arg(
                Arg::new("archive")
                    .long("archive")
                    .takes_value(true)
                    .required(true)
                    .help("Archive to install into"),
            )
            .arg(
                Arg::new("suite")
                    .long("suite")
                    .takes_value(true)
                    .required(true)
                    .help("Suite to install into"),
            )
            .arg(
                Arg::new("type")
                    .long("type")
                    .takes_value(true)
                    .possible_values([
                        "debian-installer",
                        "uefi",
                        "dist-upgrader",
                        "ddtp-tarball",
                    ])
                    .help("Type of the uploads"),
            )
            .arg(
                Arg::new("tarball")
                    .required(true)
                    .multiple_values(true)
                    .allow_invalid_utf8(true)
                    .help("Tarballs to install"),
            ),
    );

    let app = app.subcommand(
        Command::new("check-consistency")
            .about("Report binaries whose overrides differ across architectures")
            .arg(
                Arg::new("distribution")
                    .long("distribution")
                    .takes_value(true)
                    .default_value("ubuntu")
                    .help("Distribution to check"),
            )
            .arg(
                Arg::new("suite")
                    .long("suite")
                    .takes_value(true)
                    .required(true)
                    .help("Suite to check"),
            )
            .arg(
                Arg::new("archive")
                    .long("archive")
                    .takes_value(true)
                    .help("Archive to check. Defaults to the primary archive."),
            ),
    );

    app.subcommand(
        Command::new("change-override")
            .about("Change the component, section or priority of published packages")
            .arg(
                Arg::new("distribution")
                    .long("distribution")
                    .takes_value(true)
                    .default_value("ubuntu")
                    .help("Distribution holding the packages"),
            )
            .arg(
                Arg::new("archive")
                    .long("archive")
                    .takes_value(true)
                    .help("Archive holding the packages. Defaults to the primary archive."),
            )
            .arg(
                Arg::new("suite")
                    .long("suite")
                    .takes_value(true)
                    .required(true)
                    .help("Suite holding the packages"),
            )
            .arg(
                Arg::new("component")
                    .long("component")
                    .takes_value(true)
                    .help("New component"),
            )
            .arg(
                Arg::new("section")
                    .long("section")
                    .takes_value(true)
                    .help("New section"),
            )
            .arg(
                Arg::new("priority")
                    .long("priority")
                    .takes_value(true)
                    .help("New priority of binaries"),
            )
            .arg(
                Arg::new("source-only")
                    .long("source-only")
                    .help("Only override the source package"),
            )
            .arg(
                Arg::new("source-and-binary")
                    .long("source-and-binary")
                    .help("Override the source and binaries with the same name"),
            )
            .arg(
                Arg::new("source-and-children")
                    .long("source-and-children")
                    .help("Override the source and every binary built from it"),
            )
            .group(ArgGroup::new("scope").args(&[
                "source-only",
                "source-and-binary",
                "source-and-children",
            ]))
            .arg(
                Arg::new("package")
                    .required(true)
                    .multiple_values(true)
                    .help("Packages to override"),
            ),
    )
}

fn init_logging(matches: &ArgMatches) {
    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    builder.init();
}

pub fn run_cli() -> Result<()> {
    let mut app = command();
    let matches = app.clone().get_matches();

    init_logging(&matches);

    match matches.subcommand() {
        Some(("publish-distro", args)) => command_publish_distro(args),
        Some(("process-custom-upload", args)) => command_process_custom_upload(args),
        Some(("check-consistency", args)) => command_check_consistency(args),
        Some(("change-override", args)) => command_change_override(args),
        Some((command, _)) => Err(ToolError::InvalidSubCommand(command.to_string())),
        None => {
            app.print_help()?;
            Ok(())
        }
    }
}

fn load_config(args: &ArgMatches) -> Result<PublisherConfig> {
    Ok(match args.value_of_os("config") {
        Some(path) => PublisherConfig::from_yaml_path(path)?,
        None => PublisherConfig::default(),
    })
}

fn open_store(config: &PublisherConfig) -> Result<InMemoryPublicationStore> {
    let path = config.database.as_ref().ok_or(ToolError::NoDatabase)?;

    Ok(InMemoryPublicationStore::open_yaml(path)?)
}

/// Resolve the archive named by `--archive`, defaulting to the primary archive.
fn resolve_archive(
    store: &dyn PublicationStore,
    distribution: &str,
    name: Option<&str>,
) -> Result<Archive> {
    if let Some(name) = name {
        return Ok(store.archive(name)?);
    }

    store
        .archives(distribution)?
        .into_iter()
        .find(|a| a.purpose == ArchivePurpose::Primary)
        .ok_or_else(|| {
            PublisherError::UnknownArchive(format!("primary archive of {}", distribution)).into()
        })
}

fn publish_options(args: &ArgMatches) -> PublishOptions {
    let selector = if args.is_present("ppa") {
        ArchiveSelector::Ppa
    } else if args.is_present("private-ppa") {
        ArchiveSelector::PrivatePpa
    } else if args.is_present("partner") {
        ArchiveSelector::Partner
    } else {
        ArchiveSelector::Primary
    };

    PublishOptions {
        distribution: args.value_of("distribution").unwrap_or("ubuntu").to_string(),
        suites: args
            .values_of("suite")
            .map(|values| values.map(String::from).collect())
            .unwrap_or_default(),
        selector,
        distsroot: args.value_of_os("distsroot").map(PathBuf::from),
        careful: args.is_present("careful"),
        careful_publishing: args.is_present("careful-publishing"),
        careful_domination: args.is_present("careful-domination"),
        careful_apt: args.is_present("careful-apt"),
    }
}

fn command_publish_distro(args: &ArgMatches) -> Result<()> {
    let config = load_config(args)?;
    let mut store = open_store(&config)?;

    let cb = |event: PublishEvent| {
        if let PublishEvent::ArchiveFinished(..) = event {
            println!("{}", event);
        }
    };

    let summary = PublishOrchestrator::new(&config, publish_options(args))
        .with_progress(cb)
        .run(&mut store)?;

    summary.into_result()?;

    Ok(())
}

fn command_process_custom_upload(args: &ArgMatches) -> Result<()> {
    let config = load_config(args)?;
    let store = open_store(&config)?;

    let archive = store.archive(args.value_of("archive").unwrap_or_default())?;
    let suite = args.value_of("suite").unwrap_or_default();
    let tag = args.value_of("type");

    for path in args.values_of_os("tarball").into_iter().flatten() {
        let upload_type = CustomUploadType::resolve(tag, path)?;
        let report = process_custom_upload(&config, &archive, suite, upload_type, path)?;

        println!(
            "installed {} files of {} {} into {}",
            report.installed_files,
            upload_type,
            report.version,
            report.target_dir.display()
        );
        if !report.recovered.is_empty() {
            println!("{} problems were ignored; see log", report.recovered.len());
        }
    }

    Ok(())
}

fn command_check_consistency(args: &ArgMatches) -> Result<()> {
    let config = load_config(args)?;
    let store = open_store(&config)?;

    let archive = resolve_archive(
        &store,
        args.value_of("distribution").unwrap_or("ubuntu"),
        args.value_of("archive"),
    )?;
    let suite = args.value_of("suite").unwrap_or_default();

    let reports = check_suite(&store, &archive, suite)?;
    for report in &reports {
        println!("{}\n", report);
    }
    info!("{} inconsistent source(s) in {}", reports.len(), suite);

    Ok(())
}

fn override_scope(args: &ArgMatches) -> OverrideScope {
    if args.is_present("source-only") {
        OverrideScope::SourceOnly
    } else if args.is_present("source-and-binary") {
        OverrideScope::SourceAndSameNameBinaries
    } else if args.is_present("source-and-children") {
        OverrideScope::SourceAndChildren
    } else {
        OverrideScope::BinaryOnly
    }
}

fn describe_outcome(outcome: &OverrideOutcome) -> String {
    match outcome {
        OverrideOutcome::Unchanged { title } => format!("'{}' remained the same", title),
        OverrideOutcome::Source { title, old, new } => format!(
            "'{}' source overridden from {}/{} to {}/{}",
            title, old.0, old.1, new.0, new.1
        ),
        OverrideOutcome::Binary {
            title,
            arch,
            pocket,
            old,
            new,
        } => format!(
            "'{}/{}' binary in {} overridden from {}/{}/{} to {}/{}/{}",
            title, arch, pocket, old.0, old.1, old.2, new.0, new.1, new.2
        ),
    }
}

fn command_change_override(args: &ArgMatches) -> Result<()> {
    let config = load_config(args)?;
    let mut store = open_store(&config)?;

    let archive = resolve_archive(
        &store,
        args.value_of("distribution").unwrap_or("ubuntu"),
        args.value_of("archive"),
    )?;

    let overrider = Overrider::initialize(
        &store,
        archive,
        args.value_of("suite").unwrap_or_default(),
        args.value_of("component").map(String::from),
        args.value_of("section").map(String::from),
        args.value_of("priority"),
    )?;

    let packages = args
        .values_of("package")
        .map(|values| values.map(String::from).collect::<Vec<_>>())
        .unwrap_or_default();

    for outcome in overrider.apply(&mut store, override_scope(args), &packages)? {
        println!("{}", describe_outcome(&outcome));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use {super::*, archive_publisher::model::Pocket};

    fn subcommand_args(argv: &[&str]) -> ArgMatches {
        let matches = command()
            .try_get_matches_from(argv.iter().copied())
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        args.clone()
    }

    #[test]
    fn publish_distro_arguments() {
        let args = subcommand_args(&[
            "archive-publisher",
            "publish-distro",
            "--careful-apt",
            "--suite",
            "jammy",
            "--suite",
            "jammy-updates",
            "--ppa",
        ]);

        let options = publish_options(&args);
        assert_eq!(options.distribution, "ubuntu");
        assert_eq!(options.suites, vec!["jammy", "jammy-updates"]);
        assert_eq!(options.selector, ArchiveSelector::Ppa);
        assert!(options.careful_apt);
        assert!(options.is_careful_apt());
        assert!(!options.is_careful_publishing());
        assert_eq!(options.distsroot, None);

        let args = subcommand_args(&[
            "archive-publisher",
            "publish-distro",
            "--careful",
            "--partner",
            "--distsroot",
            "/tmp/dists",
        ]);
        let options = publish_options(&args);
        assert_eq!(options.selector, ArchiveSelector::Partner);
        assert!(options.is_careful_domination());
        assert_eq!(options.distsroot, Some(PathBuf::from("/tmp/dists")));
    }

    #[test]
    fn archive_kinds_conflict() {
        assert!(command()
            .try_get_matches_from(["archive-publisher", "publish-distro", "--ppa", "--partner"])
            .is_err());
    }

    #[test]
    fn override_scopes() {
        let args = subcommand_args(&[
            "archive-publisher",
            "change-override",
            "--suite",
            "jammy",
            "--component",
            "universe",
            "hello",
        ]);
        assert_eq!(override_scope(&args), OverrideScope::BinaryOnly);

        let args = subcommand_args(&[
            "archive-publisher",
            "change-override",
            "--suite",
            "jammy",
            "--priority",
            "extra",
            "--source-and-children",
            "hello",
            "widget",
        ]);
        assert_eq!(override_scope(&args), OverrideScope::SourceAndChildren);
        assert_eq!(
            args.values_of("package").unwrap().collect::<Vec<_>>(),
            vec!["hello", "widget"]
        );

        assert!(command()
            .try_get_matches_from([
                "archive-publisher",
                "change-override",
                "--suite",
                "jammy",
                "--source-only",
                "--source-and-binary",
                "hello",
            ])
            .is_err());
    }

    #[test]
    fn custom_upload_arguments() {
        let args = subcommand_args(&[
            "archive-publisher",
            "process-custom-upload",
            "--archive",
            "ubuntu",
            "--suite",
            "jammy",
            "--type",
            "uefi",
            "efilinux_1.0_amd64.tar.gz",
        ]);
        assert_eq!(
            CustomUploadType::resolve(args.value_of("type"), "efilinux_1.0_amd64.tar.gz")
                .unwrap(),
            CustomUploadType::Uefi
        );

        assert!(command()
            .try_get_matches_from([
                "archive-publisher",
                "process-custom-upload",
                "--archive",
                "ubuntu",
                "--suite",
                "jammy",
                "--type",
                "bogus",
                "x_1_all.tar.gz",
            ])
            .is_err());
    }

    #[test]
    fn outcome_descriptions() {
        assert_eq!(
            describe_outcome(&OverrideOutcome::Binary {
                title: "hello_1.0-1".into(),
                arch: "amd64".into(),
                pocket: Pocket::Updates,
                old: (
                    "main".into(),
                    "devel".into(),
                    archive_publisher::model::Priority::Optional
                ),
                new: (
                    "universe".into(),
                    "devel".into(),
                    archive_publisher::model::Priority::Extra
                ),
            }),
            "'hello_1.0-1/amd64' binary in UPDATES overridden from main/devel/optional to universe/devel/extra"
        );
    }
}
