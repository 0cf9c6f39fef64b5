use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use daemon::DaemonKind;

/// Runs the shared entry point for one daemon binary.
///
/// Every `*-dpi` executable forwards here so argument handling and status
/// mapping stay identical across daemons.
#[must_use]
pub fn run_with<I, Out, Err>(kind: DaemonKind, args: I, stdout: &mut Out, stderr: &mut Err) -> ExitCode
where
    I: IntoIterator,
    I::Item: Into<OsString>,
    Out: Write,
    Err: Write,
{
    let status = daemon::run(kind, args, stdout, stderr);
    daemon::exit_code_from(status)
}

#[cfg(test)]
mod tests {
    use super::run_with;
    use daemon::DaemonKind;
    use std::process::ExitCode;

    #[test]
    fn version_flag_reports_success_for_all_daemons() {
        for kind in DaemonKind::ALL {
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let exit = run_with(kind, [kind.program_name(), "--version"], &mut stdout, &mut stderr);

            assert_eq!(exit, ExitCode::SUCCESS, "{kind} --version should succeed");
            assert!(!stdout.is_empty(), "{kind} --version should print to stdout");
            assert!(stderr.is_empty(), "{kind} --version must not write to stderr");
        }
    }

    #[test]
    fn unknown_flag_reports_failure_for_all_daemons() {
        for kind in DaemonKind::ALL {
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let exit = run_with(kind, [kind.program_name(), "--no-such-flag"], &mut stdout, &mut stderr);

            assert_eq!(exit, ExitCode::FAILURE, "{kind} should reject unknown flags");
            assert!(!stderr.is_empty(), "{kind} should explain the failure");
        }
    }
}
