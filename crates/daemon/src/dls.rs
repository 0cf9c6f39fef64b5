//! Local script runner.
//!
//! A `dls:<name>?<arg>` url runs `<script-dir>/<name>.dls` with the optional
//! argument and relays its standard output verbatim. Scripts write their own
//! HTTP head.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use logging::targets;
use pipeline::{PipelineBuilder, Stage};
use protocol::ResourceId;
use tracing::debug;

use crate::backend::stream::StreamProducer;
use crate::backend::{OpenError, Producer, Request, Service};
use crate::status::ErrorStatus;

/// Scheme served by [`DlsService`].
pub const DLS_SCHEME: &str = "dls";

/// Script run when the url names none.
pub const DEFAULT_SCRIPT: &str = "default";

/// Directory searched for scripts unless configured otherwise.
pub const DEFAULT_SCRIPT_DIR: &str = "/usr/local/lib/dillo/dls";

/// Suffix every script file carries.
pub const SCRIPT_SUFFIX: &str = ".dls";

const OWNER_EXECUTE: u32 = 0o100;

/// Runs scripts from one directory.
#[derive(Clone, Debug)]
pub struct DlsService {
    script_dir: PathBuf,
}

impl DlsService {
    /// A runner for scripts under `script_dir`.
    pub fn new(script_dir: impl Into<PathBuf>) -> Self {
        Self {
            script_dir: script_dir.into(),
        }
    }

    /// The configured script directory.
    pub fn script_dir(&self) -> &Path {
        &self.script_dir
    }

    /// Maps a script name to its file, checking that it exists and that its
    /// owner may execute it.
    pub fn script_path(&self, name: &Path) -> Result<PathBuf, ErrorStatus> {
        let relative = name.strip_prefix("/").unwrap_or(name);
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Err(ErrorStatus::execution("DLS name is not a plain relative path"));
        }
        let mut file = self.script_dir.join(relative).into_os_string();
        file.push(SCRIPT_SUFFIX);
        let file = PathBuf::from(file);

        let metadata = fs::metadata(&file)
            .map_err(|_| ErrorStatus::execution("DLS file not found"))?;
        if !metadata.is_file() || metadata.permissions().mode() & OWNER_EXECUTE == 0 {
            return Err(ErrorStatus::execution("DLS file is not executable"));
        }
        Ok(file)
    }
}

impl Service for DlsService {
    fn scheme(&self) -> &'static str {
        DLS_SCHEME
    }

    fn open(&self, request: &Request<'_>) -> Result<Box<dyn Producer>, OpenError> {
        let resource = ResourceId::parse_or_default(DLS_SCHEME, request.url, Some(DEFAULT_SCRIPT))?;
        let script = self.script_path(resource.path())?;
        let args: Vec<&str> = resource.query().into_iter().collect();
        debug!(target: targets::HELPER, script = %script.display(), ?args, "running local script");
        let pipeline = PipelineBuilder::new()
            .stage(Stage::exec(script.into_os_string(), args))
            .spawn()
            .map_err(|error| ErrorStatus::execution(format!("DLS execution error: {error}")))?;
        Ok(Box::new(StreamProducer::raw(pipeline)))
    }
}
