//! Worker request loop.
//!
//! Reads newline-delimited [`WorkRequest`]s from stdin until end of input,
//! hands each to the [`Dispatcher`], and writes one [`WorkResponse`] line per
//! request to stdout. Stdout carries nothing else.

use std::io::{self, BufRead, Write};

use tracing::{debug, info, warn};

use cljw_protocol::{read_message, write_message, FrameError, WorkError, WorkRequest, WorkResponse};

use crate::dispatcher::Dispatcher;
use crate::environment::EnvironmentFactory;

/// Counts from one run of the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    /// Responses written.
    pub requests: u64,
    /// Responses with a nonzero exit code.
    pub failures: u64,
}

/// Persistent-worker request loop.
pub struct WorkerLoop<F: EnvironmentFactory> {
    dispatcher: Dispatcher<F>,
}

impl<F: EnvironmentFactory> WorkerLoop<F> {
    pub fn new(dispatcher: Dispatcher<F>) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &Dispatcher<F> {
        &self.dispatcher
    }

    /// Run the loop on stdin/stdout.
    pub fn run(&mut self) -> io::Result<LoopSummary> {
        self.run_with_io(&mut io::stdin().lock(), &mut io::stdout().lock())
    }

    /// Run the loop with custom I/O (for testing).
    ///
    /// Returns at end of input after discarding every environment. A
    /// malformed request line gets a failure response and the loop goes on;
    /// an I/O error on either stream ends the loop with that error.
    pub fn run_with_io<R: BufRead, W: Write>(
        &mut self,
        reader: &mut R,
        writer: &mut W,
    ) -> io::Result<LoopSummary> {
        let max_bytes = self.dispatcher.config().max_message_bytes;
        let mut summary = LoopSummary::default();
        info!("worker ready");

        let result = loop {
            let response = match read_message::<WorkRequest, _>(reader, max_bytes) {
                Ok(Some(request)) => {
                    debug!(request_id = request.request_id, "request received");
                    self.dispatcher.handle(&request)
                }
                Ok(None) => break Ok(()),
                Err(e) if e.is_recoverable() => {
                    warn!(error = %e, "malformed request");
                    let error = WorkError::invalid_request(format!("malformed request: {}", e));
                    WorkResponse::failure(0, format!("{}\n", error))
                }
                Err(e) => break Err(into_io(e)),
            };

            summary.requests += 1;
            if !response.is_success() {
                summary.failures += 1;
            }
            if let Err(e) = write_message(writer, &response) {
                break Err(into_io(e));
            }
        };

        self.dispatcher.shutdown();
        info!(
            requests = summary.requests,
            failures = summary.failures,
            "worker stopped"
        );
        result.map(|()| summary)
    }
}

fn into_io(error: FrameError) -> io::Error {
    match error {
        FrameError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}
