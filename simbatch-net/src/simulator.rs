//! Simulator worker.
//!
//! A worker listens on a single port and handles one connection at a time:
//! it reads one request, runs the experiment synchronously, writes one
//! reply and closes the connection. Parallel capacity comes from running
//! more workers, each on its own port.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use simbatch_core::Simulator;

use crate::error::{Error, Result};
use crate::frame;
use crate::msg::{
    ErrorResponse, MessageType, RemoteErrorKind, RunExperimentRequest, RunExperimentResponse,
};
use crate::transport::{ErrorCode, Socket};

/// Default port simulator workers listen on.
pub const DEFAULT_PORT: u16 = 48620;

/// Pending connections allowed while a job is running.
pub const DEFAULT_BACKLOG: i32 = 1;

/// How often `serve_until` checks its flag while no connection is waiting.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct SimulatorWorker<S: Simulator> {
    listener: Socket,
    simulator: S,
    compress: bool,
}

impl<S: Simulator> SimulatorWorker<S> {
    /// Opens, binds and starts listening on `port`. Any failure here is
    /// fatal for the worker.
    pub fn bind(port: u16, simulator: S) -> Result<Self> {
        Self::bind_with_backlog(port, DEFAULT_BACKLOG, simulator)
    }

    pub fn bind_with_backlog(port: u16, backlog: i32, simulator: S) -> Result<Self> {
        let mut listener = Socket::open()?;
        listener.bind(port)?;
        listener.listen(backlog)?;
        info!(
            "simulator worker listening on port {}",
            listener.local_port()?
        );
        Ok(SimulatorWorker {
            listener,
            simulator,
            compress: cfg!(feature = "lz4"),
        })
    }

    pub fn local_port(&self) -> Result<u16> {
        self.listener.local_port()
    }

    /// Serves connections until accepting one fails.
    pub fn serve(&mut self) -> Result<()> {
        loop {
            self.serve_once()?;
        }
    }

    /// Serves connections for as long as `running` stays set.
    pub fn serve_until(&mut self, running: &AtomicBool) -> Result<()> {
        self.listener.set_nonblocking(true)?;
        while running.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok(conn) => self.handle(conn),
                Err(Error::Transport {
                    code: ErrorCode::WouldBlock,
                    ..
                }) => thread::sleep(ACCEPT_POLL_INTERVAL),
                Err(Error::Transport {
                    code: ErrorCode::Interrupted,
                    ..
                }) => continue,
                Err(e) => return Err(e),
            }
        }
        info!("simulator worker stopped");
        Ok(())
    }

    /// Accepts and handles exactly one connection.
    pub fn serve_once(&mut self) -> Result<()> {
        let conn = self.listener.accept()?;
        self.handle(conn);
        Ok(())
    }

    /// Handles a single connection. Failures are logged and never reach
    /// the serving loop.
    fn handle(&self, mut conn: Socket) {
        let peer = conn
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "unknown peer".to_string());
        debug!("connection from {}", peer);

        let reply = match self.process(&mut conn) {
            Ok(response) => frame::send_payload(&mut conn, &response, self.compress),
            Err(e) if e.is_connection_error() => {
                warn!("{}: connection lost: {}", peer, e);
                conn.close();
                return;
            }
            Err(e) => {
                let kind = if e.is_protocol_error() {
                    RemoteErrorKind::Protocol
                } else {
                    RemoteErrorKind::Simulation
                };
                warn!("{}: replying with {:?} error: {}", peer, kind, e);
                let response = ErrorResponse {
                    kind,
                    message: remote_message(e),
                };
                frame::send_payload(&mut conn, &response, false)
            }
        };
        if let Err(e) = reply {
            warn!("{}: failed sending reply: {}", peer, e);
        }
        let _ = conn.shutdown();
        conn.close();
    }

    fn process(&self, conn: &mut Socket) -> Result<RunExperimentResponse> {
        let msg = frame::recv_msg(conn)?;
        if msg.type_ != MessageType::RunExperimentRequest {
            return Err(Error::Protocol(format!(
                "expected {:?}, got {:?}",
                MessageType::RunExperimentRequest,
                msg.type_
            )));
        }
        let request: RunExperimentRequest = msg.unpack_payload()?;
        info!("running job {}", request.job);

        let result = simbatch_core::run_isolated(&self.simulator, &request.experiment)?;
        let state = if request.save_result {
            let mut state = request.experiment;
            state.results = Some(result.clone());
            Some(state)
        } else {
            None
        };
        debug!("job {} done", request.job);
        Ok(RunExperimentResponse { result, state })
    }
}

/// Simulation failures are sent verbatim, without the local wrapping.
fn remote_message(e: Error) -> String {
    match e {
        Error::CoreError(simbatch_core::Error::Simulation(message)) => message,
        e => e.to_string(),
    }
}
