// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The shell session: one daemon connection, lines in, responses out.

use std::io::Write;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite};
use tracing::debug;
use warden_protocol::{ClientError, FlagError, Request, Response, WardenClient};

use crate::command::{self, Action};
use crate::output::{format_fields, format_response};
use crate::tokenize::{TokenizeError, tokenize};

const PROMPT: &str = "warden> ";

/// Status reported when a job's exit status is missing.
const UNKNOWN_EXIT_STATUS: u32 = 255;

#[derive(Debug, Error)]
pub enum CtlError {
    #[error(transparent)]
    Tokenize(#[from] TokenizeError),

    #[error(transparent)]
    Flag(#[from] FlagError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CtlError {
    /// Errors after which the session cannot continue.
    pub fn is_fatal(&self) -> bool {
        match self {
            CtlError::Tokenize(_) | CtlError::Flag(_) => false,
            CtlError::Client(e) => !matches!(e, ClientError::Server { .. } | ClientError::UnexpectedResponse { .. }),
            CtlError::Io(_) => true,
        }
    }
}

/// Result of one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Done,
    /// A job finished with this exit status.
    Exited(u32),
    Quit,
}

/// A shell bound to one daemon connection.
///
/// Responses go to `out`; job stderr and errors go to `err`.
pub struct Shell<S, O, E> {
    client: WardenClient<S>,
    out: O,
    err: E,
    interactive: bool,
}

impl<S, O, E> Shell<S, O, E>
where
    S: AsyncRead + AsyncWrite + Unpin,
    O: Write,
    E: Write,
{
    pub fn new(client: WardenClient<S>, out: O, err: E) -> Self {
        Self {
            client,
            out,
            err,
            interactive: false,
        }
    }

    /// Prompt for input and print full job status.
    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn writers(&self) -> (&O, &E) {
        (&self.out, &self.err)
    }

    /// Run every line of `input`.
    ///
    /// Returns the exit code of the session: the status of the last command,
    /// or 1 when stopping at an error.
    pub async fn run<R>(&mut self, input: R, exit_on_error: bool) -> Result<u32, CtlError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        let mut code = 0;
        loop {
            if self.interactive {
                self.out.write_all(PROMPT.as_bytes())?;
                self.out.flush()?;
            }
            let Some(line) = lines.next_line().await? else {
                if self.interactive {
                    self.out.write_all(b"\n")?;
                }
                break;
            };

            code = match self.execute_line(&line).await {
                Ok(Outcome::Done) => 0,
                Ok(Outcome::Exited(status)) => status,
                Ok(Outcome::Quit) => break,
                Err(e) => {
                    self.report(&e)?;
                    if exit_on_error || e.is_fatal() {
                        return Ok(1);
                    }
                    1
                }
            };
        }
        self.out.flush()?;
        Ok(code)
    }

    /// Run a single command given as words, as on the command line.
    ///
    /// Errors are reported and give exit code 1.
    pub async fn run_once(&mut self, words: &[String]) -> Result<u32, CtlError> {
        let code = match self.execute(words).await {
            Ok(Outcome::Exited(status)) => status,
            Ok(_) => 0,
            Err(e) => {
                self.report(&e)?;
                1
            }
        };
        self.out.flush()?;
        Ok(code)
    }

    pub async fn execute_line(&mut self, line: &str) -> Result<Outcome, CtlError> {
        let words = tokenize(line)?;
        self.execute(&words).await
    }

    pub async fn execute(&mut self, words: &[String]) -> Result<Outcome, CtlError> {
        match command::parse(words)? {
            Action::Nothing => Ok(Outcome::Done),
            Action::Quit => Ok(Outcome::Quit),
            Action::Help(text) => {
                self.out.write_all(text.as_bytes())?;
                Ok(Outcome::Done)
            }
            Action::Send(request) => {
                debug!(command = request.message_type().command(), "Sending request");
                self.send(request).await
            }
        }
    }

    async fn send(&mut self, request: Request) -> Result<Outcome, CtlError> {
        if let Request::Stream(stream) = request {
            return self.stream(stream).await;
        }

        let response = self.client.call(request).await?;
        let (exit_status, stdout, stderr, failure) = match &response {
            Response::Link(r) => (r.exit_status, &r.stdout, &r.stderr, &r.failure),
            Response::Run(r) => (r.exit_status, &r.stdout, &r.stderr, &r.failure),
            other => {
                let text = format_response(other, &[])?;
                self.out.write_all(text.as_bytes())?;
                return Ok(Outcome::Done);
            }
        };

        if let Some(data) = stdout {
            self.out.write_all(data)?;
        }
        if let Some(data) = stderr {
            self.err.write_all(data)?;
        }
        self.job_status(&response, failure.as_deref())?;
        Ok(Outcome::Exited(exit_status.unwrap_or(UNKNOWN_EXIT_STATUS)))
    }

    async fn stream(&mut self, request: warden_protocol::messages::StreamRequest) -> Result<Outcome, CtlError> {
        let Self { client, out, err, .. } = self;
        let mut write_result = Ok(());
        let last = client
            .stream(request, |chunk| {
                let target: &mut dyn Write = if chunk.name() == "stderr" { &mut *err } else { &mut *out };
                if write_result.is_ok() {
                    write_result = target.write_all(chunk.data()).and_then(|_| target.flush());
                }
            })
            .await?;
        write_result?;

        let exit_status = last.exit_status.unwrap_or(UNKNOWN_EXIT_STATUS);
        let failure = last.failure.clone();
        self.job_status(&Response::Stream(last), failure.as_deref())?;
        Ok(Outcome::Exited(exit_status))
    }

    /// After job output: full status when interactive, otherwise only a
    /// supervision failure.
    fn job_status(&mut self, response: &Response, failure: Option<&str>) -> Result<(), CtlError> {
        if self.interactive {
            let text = format_response(response, &["stdout", "stderr", "name", "data"])?;
            self.out.write_all(text.as_bytes())?;
        } else if let Some(failure) = failure {
            let line = format_fields(&[("failure".to_string(), failure.to_string())]);
            self.err.write_all(line.as_bytes())?;
        }
        Ok(())
    }

    /// Print an error as `key : value` lines on the error writer.
    pub fn report(&mut self, error: &CtlError) -> Result<(), CtlError> {
        let mut fields = Vec::new();
        match error {
            CtlError::Client(ClientError::Server { message, data, .. }) => {
                fields.push(("error".to_string(), message.clone()));
                if let Some(data) = data {
                    fields.push(("data".to_string(), data.clone()));
                }
            }
            other => fields.push(("error".to_string(), other.to_string())),
        }
        self.err.write_all(format_fields(&fields).as_bytes())?;
        self.err.flush()?;
        Ok(())
    }
}
