//! Execution orchestration
//!
//! Obtains a session, builds the program for its runtime, runs it and assembles the
//! result. Sessions are single-use: whatever happens, the session is destroyed once the
//! result has been composed.
//!
//! A program that fails is not an `Err`: the failure is recorded on the session and
//! comes back inside a normal [`ExecutionResult`]. `Err` means the platform failed
//! (program missing, runtime unsupported, session creation or process spawn failed).

mod output;
mod request;
mod upload;

pub use output::{
    compose, parse_headers, read_output, read_output_text, ExecutionResult, ExecutionSummary,
    Payload,
};
pub use request::{CallerContext, ExecutionRequest, UploadedFile};
pub use upload::{BoundUpload, UploadBinder};

use http::header::{HeaderValue, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::process::{ProcessRunner, ProcessSpec};
use crate::program::{builder_for, BuildInput, ProgramLocator, ResolvedProgram};
use crate::runtime::RuntimeKind;
use crate::session::{FileRendezvous, Rendezvous, Session, SessionPools, SessionState};

/// Runs execution requests against the session pools
pub struct Orchestrator {
    pools: Arc<SessionPools>,
    runner: Arc<dyn ProcessRunner>,
    rendezvous: Arc<dyn Rendezvous>,
    locator: ProgramLocator,
    debug_threshold: i64,
    delimiter: String,
}

impl Orchestrator {
    pub fn new(
        pools: Arc<SessionPools>,
        runner: Arc<dyn ProcessRunner>,
        rendezvous: Arc<dyn Rendezvous>,
        programs_root: PathBuf,
        priority: &[RuntimeKind],
        debug_threshold: i64,
    ) -> Self {
        // Only runtimes both listed and enabled are inferred
        let inferable = priority
            .iter()
            .copied()
            .filter(|kind| pools.contains(*kind))
            .collect();
        let locator = ProgramLocator::new(programs_root, inferable);
        Orchestrator {
            pools,
            runner,
            rendezvous,
            locator,
            debug_threshold,
            delimiter: format!("--codepool-{}--", Uuid::new_v4().simple()),
        }
    }

    /// Build the pools and the file rendezvous from configuration
    pub fn from_config(config: &Config, runner: Arc<dyn ProcessRunner>) -> Self {
        let rendezvous: Arc<dyn Rendezvous> = Arc::new(FileRendezvous::from_config(&config.pool));
        let pools = Arc::new(SessionPools::from_config(
            config,
            runner.clone(),
            rendezvous.clone(),
        ));
        Self::new(
            pools,
            runner,
            rendezvous,
            config.execution.programs_root.clone(),
            &config.runtimes.priority,
            config.execution.debug_threshold,
        )
    }

    pub fn pools(&self) -> &Arc<SessionPools> {
        &self.pools
    }

    /// Separator used in composite debug payloads, unique per process run
    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    pub fn upload_binder(&self) -> UploadBinder {
        UploadBinder::new(self.pools.clone())
    }

    /// Warm up every pool
    pub async fn start(&self) {
        self.pools.start().await;
    }

    /// Destroy every live session
    pub async fn shutdown(&self) {
        self.pools.shutdown().await;
    }

    /// Load the program and decide its runtime; only enabled runtimes pass
    pub async fn resolve(&self, request: &ExecutionRequest) -> Result<ResolvedProgram> {
        if let Some(runtime) = request.runtime {
            self.pools.get(runtime)?;
        }
        let program = self
            .locator
            .resolve(&request.program, request.runtime)
            .await?;
        self.pools.get(program.runtime)?;
        Ok(program)
    }

    /// Execute on a freshly acquired session
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        let program = self.resolve(&request).await?;
        let session = self.pools.get(program.runtime)?.acquire().await?;
        self.run(&session, &request, program).await
    }

    /// Execute on a session bound earlier (see [`UploadBinder`])
    pub async fn execute_in(
        &self,
        session: Arc<Session>,
        request: ExecutionRequest,
    ) -> Result<ExecutionResult> {
        let program = match self.resolve(&request).await {
            Ok(program) => program,
            Err(e) => {
                self.release(&session).await;
                return Err(e);
            }
        };
        if program.runtime != session.runtime() {
            self.release(&session).await;
            return Err(Error::UnsupportedRuntime(format!(
                "program needs {}, but the bound session runs {}",
                program.runtime,
                session.runtime()
            )));
        }
        self.run(&session, &request, program).await
    }

    /// Destroy a session that will not be executed on
    pub async fn release(&self, session: &Session) {
        let destroyed = match self.pools.get(session.runtime()) {
            Ok(pool) => pool.discard(session).await,
            Err(_) => session.destroy().await,
        };
        if let Err(e) = destroyed {
            warn!(session = %session.id(), "Failed to destroy session: {}", e);
        }
    }

    async fn run(
        &self,
        session: &Arc<Session>,
        request: &ExecutionRequest,
        program: ResolvedProgram,
    ) -> Result<ExecutionResult> {
        let start = Instant::now();
        let result = match self.drive(session, request, &program).await {
            Ok(()) => Ok(self.collect(session, request, start.elapsed()).await),
            Err(e) => Err(e),
        };
        self.release(session).await;
        result
    }

    /// Hand the built program to the session and wait for it to finish
    async fn drive(
        &self,
        session: &Arc<Session>,
        request: &ExecutionRequest,
        program: &ResolvedProgram,
    ) -> Result<()> {
        session.set_in_use(true);
        let started = session.begin_run();

        let source = builder_for(session.runtime()).build(&BuildInput {
            code: &program.code,
            caller: &request.caller,
            variables: &request.variables,
            paths: session.paths(),
            uploads: &request.uploaded_files,
            preamble: request.preamble.as_deref(),
        });

        info!(
            session = %session.id(),
            runtime = %session.runtime(),
            user = %request.caller.username,
            "Executing program"
        );

        if session.runtime().is_prewarmed() {
            if started {
                self.rendezvous
                    .hand_over(&session.paths().code, &source)
                    .await?;
            } else {
                session.fail("runtime process exited before the program was handed over");
            }
            let state = session.wait_finished().await;
            debug!(session = %session.id(), %state, "Parked runtime finished");
        } else {
            tokio::fs::write(&session.paths().code, &source).await?;
            let binary = self.pools.get(session.runtime())?.factory().binary().clone();
            let outcome = self
                .runner
                .run(
                    ProcessSpec::script(&binary, session.paths()),
                    session.cancellation(),
                )
                .await?;
            session.settle(Ok(outcome));
        }
        Ok(())
    }

    /// Read back the result files and compose the response
    async fn collect(
        &self,
        session: &Session,
        request: &ExecutionRequest,
        duration: Duration,
    ) -> ExecutionResult {
        let paths = session.paths();
        let log = read_output_text(&paths.log).await;
        let mut headers = parse_headers(&read_output_text(&paths.headers).await);
        let raw = read_output(&paths.webout).await;

        let payload = if headers.contains_key(CONTENT_TYPE) {
            Payload::Binary(raw)
        } else {
            Payload::Text(String::from_utf8_lossy(&raw).into_owned())
        };
        let secondary = if session.runtime().is_prewarmed() {
            Some(read_output_text(&paths.print).await)
        } else {
            None
        };

        let state = session.state();
        let debug = request
            .debug_level()
            .is_some_and(|level| level >= self.debug_threshold);
        let payload = if debug || state == SessionState::Failed {
            // Framing declared by the program describes the raw payload only
            headers.remove(CONTENT_LENGTH);
            headers.remove(CONTENT_DISPOSITION);
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            );
            compose(payload, &self.delimiter, &log, secondary.as_deref())
        } else {
            payload
        };

        if state == SessionState::Failed {
            info!(
                session = %session.id(),
                reason = ?session.failure_reason(),
                "Program failed"
            );
        }

        ExecutionResult {
            session_id: session.id().to_string(),
            runtime: session.runtime(),
            state,
            failure_reason: session.failure_reason(),
            response_headers: headers,
            payload,
            log,
            secondary_output: secondary,
            duration,
        }
    }
}
