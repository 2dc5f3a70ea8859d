//! TCP server for quiz sessions.
//!
//! Accepts one connection at a time and runs its session to completion
//! before accepting the next. Connections arriving meanwhile wait in the
//! listen backlog. Sessions share nothing but the generator, which is lent
//! to exactly one session at a time.

use crate::acceptor::Acceptor;
use crate::generator::ProblemGenerator;
use crate::session::{Session, SessionOutcome, SessionTimeouts};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tracing::{info, info_span, warn, Instrument};

/// Server instance
pub struct Server<G> {
    acceptor: Acceptor,
    generator: G,
    timeouts: SessionTimeouts,
    sessions: u64,
}

impl<G: ProblemGenerator> Server<G> {
    /// Create a new server instance
    pub fn new(acceptor: Acceptor, generator: G, timeouts: SessionTimeouts) -> Self {
        Server {
            acceptor,
            generator,
            timeouts,
            sessions: 0,
        }
    }

    #[allow(dead_code)] // used by tests to reach an ephemeral port
    pub fn local_addr(&self) -> SocketAddr {
        self.acceptor.local_addr()
    }

    /// Serve sessions until `shutdown` completes.
    ///
    /// Shutdown is only observed while waiting for a connection; a session
    /// that has started always runs to its outcome.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => {
                    info!(sessions = self.sessions, "Shutting down");
                    return;
                }
                connection = self.acceptor.next_connection() => connection,
            };

            self.serve(stream, peer).await;
        }
    }

    /// Accept one connection and run its session to completion.
    #[allow(dead_code)] // used by tests to step the accept loop
    pub async fn serve_next(&mut self) -> SessionOutcome {
        let (stream, peer) = self.acceptor.next_connection().await;
        self.serve(stream, peer).await
    }

    async fn serve(&mut self, stream: TcpStream, peer: SocketAddr) -> SessionOutcome {
        self.sessions += 1;
        let span = info_span!("session", id = self.sessions, %peer);

        async {
            info!("Accepted connection");
            let outcome = Session::new(stream, &mut self.generator, self.timeouts)
                .run()
                .await;
            log_outcome(&outcome);
            outcome
        }
        .instrument(span)
        .await
    }
}

fn log_outcome(outcome: &SessionOutcome) {
    match outcome {
        SessionOutcome::Graded {
            assignment,
            answer,
            verdict,
        } => info!(%assignment, ?answer, ?verdict, "Session graded"),
        SessionOutcome::TimedOut { assignment } => {
            warn!(%assignment, "Session timed out waiting for an answer")
        }
        SessionOutcome::Aborted(e) => warn!(error = %e, "Session aborted"),
    }
}
