//! Session creation
//!
//! Allocates the working directory and, for the pre-warmed runtime, starts the
//! process and waits for it to park.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::rendezvous::Rendezvous;
use super::{generate_session_id, Session};
use crate::config::{PoolConfig, RuntimeBinary};
use crate::error::{Error, Result};
use crate::process::{ProcessRunner, ProcessSpec};
use crate::program;
use crate::runtime::RuntimeKind;

/// Creates Ready sessions for one runtime
pub struct SessionFactory {
    runtime: RuntimeKind,
    binary: RuntimeBinary,
    config: PoolConfig,
    runner: Arc<dyn ProcessRunner>,
    rendezvous: Arc<dyn Rendezvous>,
}

impl SessionFactory {
    pub fn new(
        runtime: RuntimeKind,
        binary: RuntimeBinary,
        config: PoolConfig,
        runner: Arc<dyn ProcessRunner>,
        rendezvous: Arc<dyn Rendezvous>,
    ) -> Self {
        SessionFactory {
            runtime,
            binary,
            config,
            runner,
            rendezvous,
        }
    }

    pub fn runtime(&self) -> RuntimeKind {
        self.runtime
    }

    pub fn binary(&self) -> &RuntimeBinary {
        &self.binary
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Create a session and bring it to Ready.
    ///
    /// Directory failures and failed cold starts are `Error::SessionCreation`; nothing is
    /// left on disk in that case.
    pub async fn create(&self) -> Result<Arc<Session>> {
        let id = generate_session_id();
        let dir = self.config.sessions_dir.join(&id);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            Error::SessionCreation(format!(
                "Failed to create session directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let session = Arc::new(Session::new(
            id,
            self.runtime,
            dir,
            self.config.effective_ttl(),
        ));

        if self.runtime.is_prewarmed() {
            if let Err(e) = self.launch(&session).await {
                warn!(session = %session.id(), runtime = %self.runtime, "Cold start failed: {}", e);
                if let Err(cleanup) = session.destroy().await {
                    warn!(session = %session.id(), "Failed to clean up session: {}", cleanup);
                }
                return Err(e);
            }
        }

        if !session.mark_ready() {
            // Parked, then exited before anyone could use it
            let reason = session.failure_reason().unwrap_or_else(|| session.state().to_string());
            let _ = session.destroy().await;
            return Err(Error::SessionCreation(format!(
                "Runtime process ended right after parking: {}",
                reason
            )));
        }
        debug!(session = %session.id(), runtime = %self.runtime, "Session ready");
        Ok(session)
    }

    /// Start the parked process and wait until it signals readiness
    async fn launch(&self, session: &Arc<Session>) -> Result<()> {
        let paths = session.paths();
        let write = async {
            tokio::fs::write(&paths.code, "").await?;
            tokio::fs::write(
                &paths.bootstrap,
                program::bootstrap_script(&paths.code, self.config.bootstrap_wait),
            )
            .await
        };
        write
            .await
            .map_err(|e| Error::SessionCreation(format!("Failed to prepare session files: {}", e)))?;

        let spec = ProcessSpec::prewarmed(&self.binary, paths);
        let runner = self.runner.clone();
        let owner = session.clone();
        tokio::spawn(async move {
            let outcome = runner.run(spec, owner.cancellation()).await;
            if let Err(e) = &outcome {
                warn!(session = %owner.id(), "Runtime process could not run: {}", e);
            }
            owner.settle(outcome);
        });

        info!(session = %session.id(), runtime = %self.runtime, "Runtime process started, waiting for it to park");

        tokio::select! {
            parked = self.rendezvous.await_parked(&paths.code) => parked,
            state = session.wait_finished() => Err(Error::SessionCreation(format!(
                "Runtime process exited before parking ({}){}",
                state,
                session
                    .failure_reason()
                    .map(|r| format!(": {}", r))
                    .unwrap_or_default()
            ))),
        }
    }
}
