//! Command-line parsing shared by every daemon binary.
//!
//! Each [`DaemonKind`] only accepts the options that make sense for it:
//! listing daemons take `--old-style`, the archive daemon `--archiver`, the
//! script runner `--script-dir`, and the gopher relay two download operands.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::builder::{OsStringValueParser, PathBufValueParser};
use clap::{Arg, ArgAction, Command};

use crate::kind::DaemonKind;

/// Options recognised on the command line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct ParsedArgs {
    pub(crate) show_help: bool,
    pub(crate) show_version: bool,
    pub(crate) listen: Option<String>,
    pub(crate) keys_file: Option<PathBuf>,
    pub(crate) archiver: Option<String>,
    pub(crate) script_dir: Option<PathBuf>,
    pub(crate) old_style: bool,
    pub(crate) verbose: u8,
    pub(crate) quiet: bool,
    pub(crate) operands: Vec<OsString>,
}

fn clap_command(kind: DaemonKind) -> Command {
    let mut command = Command::new(kind.program_name())
        .about(kind.about())
        .disable_help_flag(true)
        .disable_version_flag(true)
        .arg(
            Arg::new("help")
                .long("help")
                .short('h')
                .help("Show this help message and exit.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("version")
                .long("version")
                .short('V')
                .help("Output version information and exit.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("keys-file")
                .long("keys-file")
                .value_name("FILE")
                .help("Read the shared authentication key from FILE.")
                .value_parser(PathBufValueParser::new()),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .help("Increase diagnostic output; repeat for more.")
                .action(ArgAction::Count),
        )
        .arg(
            Arg::new("quiet")
                .long("quiet")
                .short('q')
                .help("Only report errors.")
                .action(ArgAction::SetTrue),
        );

    if kind.is_multiplexed() {
        command = command.arg(
            Arg::new("listen")
                .long("listen")
                .value_name("ADDR")
                .help("Listen on unix:PATH or HOST:PORT instead of the socket on stdin."),
        );
    }
    if kind.renders_listings() {
        command = command.arg(
            Arg::new("old-style")
                .long("old-style")
                .help("Start with the plain listing style.")
                .action(ArgAction::SetTrue),
        );
    }
    match kind {
        DaemonKind::Zip => {
            command = command.arg(
                Arg::new("archiver")
                    .long("archiver")
                    .value_name("TOOL")
                    .help("Archive helper to run: unzip or 7z."),
            );
        }
        DaemonKind::Dls => {
            command = command.arg(
                Arg::new("script-dir")
                    .long("script-dir")
                    .value_name("DIR")
                    .help("Directory holding the .dls scripts.")
                    .value_parser(PathBufValueParser::new()),
            );
        }
        DaemonKind::Gopher => {
            command = command
                .arg(
                    Arg::new("url")
                        .index(1)
                        .value_name("URL")
                        .help("Download URL instead of serving a request.")
                        .value_parser(OsStringValueParser::new()),
                )
                .arg(
                    Arg::new("output")
                        .index(2)
                        .value_name("OUTPUT")
                        .help("File the download is written to.")
                        .value_parser(OsStringValueParser::new()),
                );
        }
        DaemonKind::File | DaemonKind::Man => {}
    }
    command
}

pub(crate) fn parse_args<I, S>(kind: DaemonKind, arguments: I) -> Result<ParsedArgs, clap::Error>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    let mut args: Vec<OsString> = arguments.into_iter().map(Into::into).collect();
    if args.is_empty() {
        args.push(OsString::from(kind.program_name()));
    }

    let mut matches = clap_command(kind).try_get_matches_from(args)?;
    let flag = |name: &str| {
        matches
            .try_get_one::<bool>(name)
            .ok()
            .flatten()
            .copied()
            .unwrap_or(false)
    };

    let show_help = flag("help");
    let show_version = flag("version");
    let old_style = flag("old-style");
    let quiet = flag("quiet");
    let verbose = matches.get_count("verbose");
    let listen = matches.try_remove_one::<String>("listen").ok().flatten();
    let archiver = matches.try_remove_one::<String>("archiver").ok().flatten();
    let keys_file = matches.remove_one::<PathBuf>("keys-file");
    let script_dir = matches
        .try_remove_one::<PathBuf>("script-dir")
        .ok()
        .flatten();
    let operands = ["url", "output"]
        .into_iter()
        .filter_map(|name| matches.try_remove_one::<OsString>(name).ok().flatten())
        .collect();

    Ok(ParsedArgs {
        show_help,
        show_version,
        listen,
        keys_file,
        archiver,
        script_dir,
        old_style,
        verbose,
        quiet,
        operands,
    })
}

pub(crate) fn render_help(kind: DaemonKind) -> String {
    clap_command(kind).render_help().to_string()
}

pub(crate) fn render_version(kind: DaemonKind) -> String {
    format!("{} {}\n", kind.program_name(), env!("CARGO_PKG_VERSION"))
}
