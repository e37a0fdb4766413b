use std::env;
use std::process::ExitCode;

use ctxstore_core::inspect_file;
use log::error;

/// Prints the description of every model file given on the command line.
fn main() -> ExitCode {
    env_logger::init();

    let paths: Vec<String> = env::args().skip(1).collect();
    if paths.is_empty() {
        eprintln!("Usage: ctxstore-inspect <model-file>...");
        return ExitCode::from(2);
    }

    let mut failed = false;
    for path in &paths {
        match inspect_file(path) {
            Ok(info) => {
                if paths.len() > 1 {
                    println!("# {}", path);
                }
                println!("{}", info);
            }
            Err(e) => {
                error!("{}: {}", path, e);
                failed = true;
            }
        }
    }

    if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}
