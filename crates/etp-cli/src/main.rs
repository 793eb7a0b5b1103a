//! `etp` binary entry point.

use std::{io, process::ExitCode};

fn main() -> ExitCode {
    let mut stdout = io::stdout().lock();
    let mut stderr = io::stderr().lock();
    etp_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
