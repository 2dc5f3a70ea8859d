//! Per-connection protocol state machine.
//!
//! A session walks through a fixed sequence of states and ends in exactly
//! one outcome:
//!
//! ```text
//! Init -> AwaitAck -> Assign -> AwaitResponse -> Grade -> Closed
//!   \________\__________\____________\________________/
//!                      (abort or timeout)
//! ```
//!
//! Only the answer read is bounded by default, and only until its first
//! bytes arrive: a partial answer is graded, never timed out. The
//! acknowledgment read blocks until the peer sends a line or disconnects
//! unless a handshake deadline is configured.

use crate::generator::{generate_assignment, ProblemGenerator};
use crate::grader;
use crate::protocol::{self, Answer, Assignment, AssignmentError, Verdict, MAX_LINE_LENGTH};
use bytes::BytesMut;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, warn};

/// Default deadline for the client's answer.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Read deadlines applied by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    /// Deadline for the acknowledgment line. `None` waits indefinitely.
    pub handshake: Option<Duration>,
    /// Deadline for the first bytes of the answer.
    pub response: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            handshake: None,
            response: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

/// Reasons a session ends without a verdict
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to send greeting: {0}")]
    GreetingSend(#[source] io::Error),
    #[error("handshake mismatch: expected \"OK\\n\", got {0:?}")]
    HandshakeMismatch(String),
    #[error("peer closed the connection during the handshake")]
    HandshakeClosed,
    #[error("failed to read handshake: {0}")]
    HandshakeRead(#[source] io::Error),
    #[error("no handshake within {0:?}")]
    HandshakeTimeout(Duration),
    #[error("failed to build assignment: {0}")]
    Assignment(#[from] AssignmentError),
    #[error("failed to send assignment: {0}")]
    AssignmentSend(#[source] io::Error),
}

/// Terminal result of a session.
#[derive(Debug)]
pub enum SessionOutcome {
    /// An answer arrived and was graded. `answer` is `None` when the line
    /// could not be parsed as a number of the assignment's type.
    Graded {
        assignment: Assignment,
        answer: Option<Answer>,
        verdict: Verdict,
    },
    /// No answer arrived before the deadline, or the peer went away.
    TimedOut { assignment: Assignment },
    /// The session ended before a verdict could be produced.
    Aborted(SessionError),
}

impl SessionOutcome {
    /// The verdict sent to the client, if any.
    #[allow(dead_code)] // used by tests
    pub fn verdict(&self) -> Option<Verdict> {
        match self {
            SessionOutcome::Graded { verdict, .. } => Some(*verdict),
            SessionOutcome::TimedOut { .. } => Some(Verdict::Timeout),
            SessionOutcome::Aborted(_) => None,
        }
    }
}

enum State {
    Init,
    AwaitAck,
    Assign,
    AwaitResponse(Assignment),
    Grade { assignment: Assignment, line: Vec<u8> },
    Closed(SessionOutcome),
}

/// One client connection from greeting to verdict.
pub struct Session<'g, S, G: ?Sized> {
    stream: BufReader<S>,
    generator: &'g mut G,
    timeouts: SessionTimeouts,
}

impl<'g, S, G> Session<'g, S, G>
where
    S: AsyncRead + AsyncWrite + Unpin,
    G: ProblemGenerator + ?Sized,
{
    pub fn new(stream: S, generator: &'g mut G, timeouts: SessionTimeouts) -> Self {
        Self {
            stream: BufReader::new(stream),
            generator,
            timeouts,
        }
    }

    /// Drive the session to completion and close the connection.
    pub async fn run(mut self) -> SessionOutcome {
        let mut state = State::Init;

        loop {
            state = match state {
                State::Init => self.greet().await,
                State::AwaitAck => self.await_ack().await,
                State::Assign => self.assign().await,
                State::AwaitResponse(assignment) => self.await_response(assignment).await,
                State::Grade { assignment, line } => self.grade(assignment, &line).await,
                State::Closed(outcome) => {
                    self.close().await;
                    return outcome;
                }
            };
        }
    }

    async fn greet(&mut self) -> State {
        match self.send(protocol::GREETING).await {
            Ok(()) => State::AwaitAck,
            Err(e) => abort(SessionError::GreetingSend(e)),
        }
    }

    async fn await_ack(&mut self) -> State {
        let mut line = Vec::new();
        let read = match self.timeouts.handshake {
            Some(limit) => match timeout(limit, self.read_line(&mut line)).await {
                Ok(read) => read,
                Err(_) => return abort(SessionError::HandshakeTimeout(limit)),
            },
            None => self.read_line(&mut line).await,
        };

        match read {
            Ok(0) => abort(SessionError::HandshakeClosed),
            Ok(_) if protocol::is_ack(&line) => {
                debug!("Handshake acknowledged");
                State::Assign
            }
            Ok(_) => abort(SessionError::HandshakeMismatch(
                String::from_utf8_lossy(&line).into_owned(),
            )),
            Err(e) => abort(SessionError::HandshakeRead(e)),
        }
    }

    async fn assign(&mut self) -> State {
        let assignment = match generate_assignment(&mut *self.generator) {
            Ok(assignment) => assignment,
            Err(e) => return abort(e.into()),
        };

        let mut buf = BytesMut::with_capacity(64);
        assignment.encode(&mut buf);

        match self.send(&buf).await {
            Ok(()) => {
                debug!(%assignment, "Assignment sent");
                State::AwaitResponse(assignment)
            }
            Err(e) => abort(SessionError::AssignmentSend(e)),
        }
    }

    /// Wait for the answer. The deadline bounds the arrival of the first
    /// bytes only; once data is in, the rest of the line is collected until
    /// `\n`, end of stream, the length cap or the same deadline, whichever
    /// comes first, and whatever was received is graded.
    async fn await_response(&mut self, assignment: Assignment) -> State {
        let limit = self.timeouts.response;
        let deadline = Instant::now() + limit;

        let timed_out = match timeout_at(deadline, self.stream.fill_buf()).await {
            Ok(Ok(buf)) if buf.is_empty() => {
                debug!("Peer closed before answering");
                true
            }
            Ok(Ok(_)) => false,
            Ok(Err(e)) => {
                debug!(error = %e, "Failed to read answer");
                true
            }
            Err(_) => {
                debug!(?limit, "Answer deadline elapsed");
                true
            }
        };

        if timed_out {
            self.deliver(Verdict::Timeout).await;
            return State::Closed(SessionOutcome::TimedOut { assignment });
        }

        // Bytes read before a cancelled `read_until` stay in `line`.
        let mut line = Vec::new();
        let read = timeout_at(deadline, self.read_line(&mut line)).await;
        match read {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => debug!(error = %e, "Answer read failed; grading partial line"),
            Err(_) => debug!(received = line.len(), "Answer incomplete at deadline"),
        }

        State::Grade { assignment, line }
    }

    async fn grade(&mut self, assignment: Assignment, line: &[u8]) -> State {
        let answer = match Answer::decode(line, assignment.kind()) {
            Ok(answer) => Some(answer),
            Err(e) => {
                debug!(error = %e, "Malformed answer");
                None
            }
        };

        let verdict = match &answer {
            Some(answer) => grader::grade(&assignment, answer),
            None => Verdict::Error,
        };
        self.deliver(verdict).await;

        State::Closed(SessionOutcome::Graded {
            assignment,
            answer,
            verdict,
        })
    }

    /// Send a verdict. The verdict stands even if the peer is gone.
    async fn deliver(&mut self, verdict: Verdict) {
        let mut buf = BytesMut::with_capacity(16);
        verdict.encode(&mut buf);
        if let Err(e) = self.send(&buf).await {
            warn!(error = %e, ?verdict, "Failed to send verdict");
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!(error = %e, "Shutdown failed");
        }
    }

    async fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await
    }

    /// Read one `\n`-terminated line of at most [`MAX_LINE_LENGTH`] bytes.
    /// Returns 0 on end of stream.
    async fn read_line(&mut self, line: &mut Vec<u8>) -> io::Result<usize> {
        let mut limited = (&mut self.stream).take(MAX_LINE_LENGTH as u64);
        limited.read_until(b'\n', line).await
    }
}

fn abort(error: SessionError) -> State {
    State::Closed(SessionOutcome::Aborted(error))
}
