//! Ephemeral (non-persistent) mode.
//!
//! Without `--persistent_worker` the build tool passes the request on the
//! command line, possibly through `@flagfile`s. It is handled once against
//! fresh environments and the process exits with the response's code.

use std::fs;
use std::io;

use tracing::info;

use cljw_protocol::{WorkRequest, WorkResponse};
use cljw_worker::{Dispatcher, EnvironmentFactory};

/// Replace every `@path` argument by the lines of that file.
///
/// Blank lines are skipped. Nested flagfiles are not expanded.
pub fn expand_flagfiles(args: &[String]) -> io::Result<Vec<String>> {
    let mut expanded = Vec::with_capacity(args.len());
    for arg in args {
        match arg.strip_prefix('@') {
            Some(path) if !path.is_empty() => {
                let contents = fs::read_to_string(path).map_err(|e| {
                    io::Error::new(e.kind(), format!("flagfile {}: {}", path, e))
                })?;
                expanded.extend(
                    contents
                        .lines()
                        .map(str::trim_end)
                        .filter(|line| !line.is_empty())
                        .map(str::to_string),
                );
            }
            _ => expanded.push(arg.clone()),
        }
    }
    Ok(expanded)
}

/// Handle a single request, then release every environment.
pub fn run_once<F: EnvironmentFactory>(
    dispatcher: &mut Dispatcher<F>,
    arguments: Vec<String>,
) -> WorkResponse {
    info!(arguments = arguments.len(), "handling ephemeral request");
    let response = dispatcher.handle(&WorkRequest::new(arguments, Vec::new()));
    dispatcher.shutdown();
    response
}
