//! Upload binding
//!
//! Binds a session before the multipart body is read so uploaded parts stream straight
//! into the session directory. The bound session then travels with the request and is
//! the one the orchestrator executes on.

use futures::{Stream, StreamExt};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::request::{ExecutionRequest, UploadedFile};
use crate::error::{Error, Result};
use crate::runtime::RuntimeKind;
use crate::session::{random_suffix, Session, SessionPools};

/// Acquires sessions for requests that carry files
#[derive(Clone)]
pub struct UploadBinder {
    pools: Arc<SessionPools>,
}

impl UploadBinder {
    pub fn new(pools: Arc<SessionPools>) -> Self {
        UploadBinder { pools }
    }

    /// Acquire a session for `runtime` and mark it in use
    pub async fn bind(&self, runtime: RuntimeKind) -> Result<BoundUpload> {
        let session = self.pools.get(runtime)?.acquire().await?;
        session.set_in_use(true);
        debug!(session = %session.id(), runtime = %runtime, "Session bound for upload");
        Ok(BoundUpload {
            session,
            files: Vec::new(),
        })
    }
}

/// A session receiving uploaded files
pub struct BoundUpload {
    session: Arc<Session>,
    files: Vec<UploadedFile>,
}

impl BoundUpload {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn files(&self) -> &[UploadedFile] {
        &self.files
    }

    /// Stream one file part into the session directory as `req_file_<random>`
    pub async fn store<S, B, E>(
        &mut self,
        field_name: &str,
        original_name: &str,
        stream: S,
    ) -> Result<UploadedFile>
    where
        S: Stream<Item = std::result::Result<B, E>>,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        let stored_name = format!("req_file_{}", random_suffix(12).to_ascii_lowercase());
        let path = self.session.paths().upload(&stored_name);
        let mut file = tokio::fs::File::create(&path).await?;

        let mut stream = std::pin::pin!(stream);
        let mut written = 0usize;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                Error::InvalidInput(format!("Upload of {} failed: {}", original_name, e))
            })?;
            file.write_all(chunk.as_ref()).await?;
            written += chunk.as_ref().len();
        }
        file.flush().await?;

        debug!(
            session = %self.session.id(),
            field = %field_name,
            file = %original_name,
            bytes = written,
            "Upload stored"
        );

        let uploaded = UploadedFile {
            stored_name,
            original_name: original_name.to_string(),
            field_name: field_name.to_string(),
        };
        self.files.push(uploaded.clone());
        Ok(uploaded)
    }

    /// Hand the stored files to `request`, returning the session to execute on
    pub fn attach(self, request: ExecutionRequest) -> (ExecutionRequest, Arc<Session>) {
        (request.with_uploads(self.files), self.session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, RuntimeBinary};
    use crate::process::fake::FakeInterpreter;
    use crate::session::FileRendezvous;
    use futures::stream;
    use tempfile::tempdir;

    fn binder(root: &std::path::Path) -> UploadBinder {
        let mut config = Config::default();
        config.pool.sessions_dir = root.to_path_buf();
        config.pool.min_ready = 0;
        config.runtimes.py = Some(RuntimeBinary::new("python3"));
        let rendezvous = Arc::new(FileRendezvous::from_config(&config.pool));
        let pools = SessionPools::from_config(&config, Arc::new(FakeInterpreter::new()), rendezvous);
        UploadBinder::new(Arc::new(pools))
    }

    #[tokio::test]
    async fn test_store_streams_into_session_dir() {
        let dir = tempdir().unwrap();
        let mut bound = binder(dir.path()).bind(RuntimeKind::Py).await.unwrap();
        assert!(bound.session().in_use());

        let chunks = stream::iter(vec![
            Ok::<_, std::io::Error>(b"a,b\n".to_vec()),
            Ok(b"1,2\n".to_vec()),
        ]);
        let stored = bound.store("file", "data.csv", chunks).await.unwrap();

        assert!(stored.stored_name.starts_with("req_file_"));
        let path = bound.session().paths().upload(&stored.stored_name);
        assert_eq!(std::fs::read_to_string(path).unwrap(), "a,b\n1,2\n");

        let (request, session) = bound.attach(ExecutionRequest::path("reports/load"));
        assert_eq!(request.uploaded_files, vec![stored]);
        assert!(session.dir().starts_with(dir.path()));
    }

    #[tokio::test]
    async fn test_broken_stream_is_invalid_input() {
        let dir = tempdir().unwrap();
        let mut bound = binder(dir.path()).bind(RuntimeKind::Py).await.unwrap();

        let chunks = stream::iter(vec![
            Ok(b"partial".to_vec()),
            Err(std::io::Error::other("connection reset")),
        ]);
        let result = bound.store("file", "data.csv", chunks).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert!(bound.files().is_empty());
    }

    #[tokio::test]
    async fn test_bind_unconfigured_runtime() {
        let dir = tempdir().unwrap();
        let result = binder(dir.path()).bind(RuntimeKind::R).await;
        assert!(matches!(result, Err(Error::UnsupportedRuntime(_))));
    }
}
