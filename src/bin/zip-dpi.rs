#![deny(unsafe_code)]

use mimalloc::MiMalloc;

/// High-performance memory allocator for improved allocation throughput.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[path = "dpi.rs"]
mod dpi;

use std::{env, io, process::ExitCode};

use daemon::DaemonKind;

fn main() -> ExitCode {
    let mut stdout = io::stdout().lock();
    let mut stderr = io::stderr().lock();
    dpi::run_with(DaemonKind::Zip, env::args_os(), &mut stdout, &mut stderr)
}
