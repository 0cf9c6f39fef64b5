//! Archive listings produced by external tools.
//!
//! The table printed by `unzip -l` differs from the one printed by `7z l`, so
//! each tool is an [`ArchiveTool`] strategy that knows its own command lines
//! and row layout. Only rows between the first two dashed separator lines are
//! offered to the strategy.

use std::fmt;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use pipeline::{PipelineBuilder, ShellCommand, ShellSafePath, Stage};
use time::macros::format_description;
use time::{Date, PrimitiveDateTime, Time};
use tracing::{trace, warn};

use crate::classify::read_sample;
use crate::{Entry, Listing, ListingError};

/// One parsed row of an archive table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveRow {
    /// Member path as printed by the tool.
    pub name: String,
    /// Uncompressed size.
    pub size: u64,
    /// Modification time, when it could be parsed.
    pub modified: Option<SystemTime>,
    /// Whether the member is a directory.
    pub is_dir: bool,
}

impl ArchiveRow {
    fn into_entry(self, archive: &Path) -> Entry {
        let display = self.name.trim_end_matches('/').to_owned();
        let reference = archive.join(&self.name);
        let modified = self.modified.unwrap_or(UNIX_EPOCH);
        if self.is_dir {
            Entry::archive_directory(display, reference, modified)
        } else {
            Entry::archive_file(display, reference, self.size, modified)
        }
    }
}

/// Strategy for one external archive tool.
pub trait ArchiveTool: fmt::Debug + Send + Sync {
    /// Short name used in configuration.
    fn name(&self) -> &'static str;

    /// Stage printing the table of contents of `archive`.
    fn list_stage(&self, archive: &ShellSafePath) -> Stage;

    /// Stage writing `member` of `archive` to stdout.
    fn extract_stage(&self, archive: &ShellSafePath, member: &ShellSafePath) -> Stage;

    /// Parses one table row; `None` for rows that do not fit the layout.
    fn parse_row(&self, line: &str) -> Option<ArchiveRow>;
}

/// Info-ZIP `unzip`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unzip;

/// `7z` from p7zip or 7-Zip.
#[derive(Clone, Copy, Debug, Default)]
pub struct SevenZip;

/// Splits off `count` whitespace-separated fields and returns them with the
/// remainder, leading whitespace removed.
fn split_fields(line: &str, count: usize) -> Option<(Vec<&str>, &str)> {
    let mut fields = Vec::with_capacity(count);
    let mut rest = line.trim_start();
    for _ in 0..count {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        if end == 0 {
            return None;
        }
        fields.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    Some((fields, rest))
}

fn to_system_time(date: Date, time: Time) -> SystemTime {
    SystemTime::from(PrimitiveDateTime::new(date, time).assume_utc())
}

impl ArchiveTool for Unzip {
    fn name(&self) -> &'static str {
        "unzip"
    }

    fn list_stage(&self, archive: &ShellSafePath) -> Stage {
        Stage::shell(ShellCommand::new("unzip -l \"").path(archive).literal("\""))
    }

    fn extract_stage(&self, archive: &ShellSafePath, member: &ShellSafePath) -> Stage {
        Stage::shell(
            ShellCommand::new("unzip -p \"")
                .path(archive)
                .literal("\" \"")
                .path(member)
                .literal("\""),
        )
    }

    fn parse_row(&self, line: &str) -> Option<ArchiveRow> {
        let (fields, name) = split_fields(line, 3)?;
        if name.is_empty() {
            return None;
        }
        let size = fields[0].parse().ok()?;
        let date = Date::parse(fields[1], format_description!("[month]-[day]-[year]"))
            .or_else(|_| Date::parse(fields[1], format_description!("[year]-[month]-[day]")))
            .ok();
        let time = Time::parse(fields[2], format_description!("[hour]:[minute]")).ok();
        Some(ArchiveRow {
            name: name.to_owned(),
            size,
            modified: date.zip(time).map(|(date, time)| to_system_time(date, time)),
            is_dir: name.ends_with('/'),
        })
    }
}

/// Column where `7z l` starts the member name.
const SEVEN_ZIP_NAME_COLUMN: usize = 53;

impl ArchiveTool for SevenZip {
    fn name(&self) -> &'static str {
        "7z"
    }

    fn list_stage(&self, archive: &ShellSafePath) -> Stage {
        Stage::shell(ShellCommand::new("7z l \"").path(archive).literal("\""))
    }

    fn extract_stage(&self, archive: &ShellSafePath, member: &ShellSafePath) -> Stage {
        Stage::shell(
            ShellCommand::new("7z x -so \"")
                .path(archive)
                .literal("\" \"")
                .path(member)
                .literal("\""),
        )
    }

    fn parse_row(&self, line: &str) -> Option<ArchiveRow> {
        let (fields, rest) = split_fields(line, 4)?;
        let date = Date::parse(fields[0], format_description!("[year]-[month]-[day]")).ok()?;
        let time = Time::parse(fields[1], format_description!("[hour]:[minute]:[second]")).ok()?;
        let attributes = fields[2];
        let size = fields[3].parse().ok()?;

        // The compressed-size column is blank for most members of a solid
        // archive, so prefer the fixed name column when the row is wide enough.
        let name = match line.get(SEVEN_ZIP_NAME_COLUMN - 2..) {
            Some(tail) if tail.starts_with("  ") && tail.len() > 2 => &tail[2..],
            _ => match split_fields(rest, 1) {
                Some((compressed, name))
                    if !name.is_empty() && compressed[0].bytes().all(|b| b.is_ascii_digit()) =>
                {
                    name
                }
                _ => rest,
            },
        };
        if name.is_empty() {
            return None;
        }
        Some(ArchiveRow {
            name: name.to_owned(),
            size,
            modified: Some(to_system_time(date, time)),
            is_dir: attributes.starts_with('D') || name.ends_with('/'),
        })
    }
}

static UNZIP: Unzip = Unzip;
static SEVEN_ZIP: SevenZip = SevenZip;

/// Archive tool selected by configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ArchiverKind {
    /// Use [`Unzip`].
    #[default]
    Unzip,
    /// Use [`SevenZip`].
    SevenZip,
}

impl ArchiverKind {
    /// The strategy for this kind.
    pub fn tool(self) -> &'static dyn ArchiveTool {
        match self {
            Self::Unzip => &UNZIP,
            Self::SevenZip => &SEVEN_ZIP,
        }
    }
}

impl FromStr for ArchiverKind {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "unzip" => Ok(Self::Unzip),
            "7z" | "7za" | "7zz" => Ok(Self::SevenZip),
            other => Err(format!("unknown archiver '{other}' (expected unzip or 7z)")),
        }
    }
}

/// Parses a tool's listing table into entries of `archive`.
///
/// Lines before the first dashed separator and after the second are ignored,
/// as are rows the tool strategy cannot parse.
pub fn parse_archive_listing<R: BufRead>(
    tool: &dyn ArchiveTool,
    reader: R,
    archive: &Path,
) -> io::Result<Listing> {
    let mut in_table = false;
    let mut entries = Vec::new();
    for line in reader.split(b'\n') {
        let line = line?;
        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches('\r');
        if text.starts_with("-----") {
            if in_table {
                break;
            }
            in_table = true;
            continue;
        }
        if !in_table {
            continue;
        }
        match tool.parse_row(text) {
            Some(row) => entries.push(row.into_entry(archive)),
            None => trace!(tool = tool.name(), row = text, "skipping malformed archive row"),
        }
    }
    Ok(Listing::from_entries(entries))
}

/// Runs the listing helper for `archive` and parses its output.
pub fn scan_archive(tool: &dyn ArchiveTool, archive: &ShellSafePath) -> Result<Listing, ListingError> {
    let helper = |source| ListingError::Helper {
        archive: archive.as_path().to_path_buf(),
        source,
    };
    let mut pipeline = PipelineBuilder::new()
        .stage(tool.list_stage(archive))
        .spawn()
        .map_err(helper)?;
    let listing = parse_archive_listing(tool, BufReader::new(&mut pipeline), archive.as_path())
        .map_err(|err| helper(err.into()))?;
    match pipeline.finish() {
        Ok(statuses) if statuses.iter().all(|status| status.success()) => {}
        Ok(statuses) => warn!(archive = %archive, ?statuses, "archive helper exited abnormally"),
        Err(err) => warn!(archive = %archive, error = %err, "failed to reap archive helper"),
    }
    Ok(listing)
}

/// Reads the first bytes of `member` for content sniffing.
pub fn sniff_member(
    tool: &dyn ArchiveTool,
    archive: &ShellSafePath,
    member: &ShellSafePath,
) -> Option<Vec<u8>> {
    let mut pipeline = PipelineBuilder::new()
        .stage(tool.extract_stage(archive, member))
        .spawn()
        .ok()?;
    read_sample(&mut pipeline).ok()
}
