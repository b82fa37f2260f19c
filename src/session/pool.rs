//! Per-runtime session pools
//!
//! A pool keeps `min_ready` sessions Ready ahead of demand. `acquire` hands out the first
//! Ready session (or cold-starts one) and tops the pool back up in the background.
//! All list edits happen under one mutex, so a session is never handed out twice and the
//! reaper cannot detach a session between `acquire` picking it and marking it in use.

use futures::future::join_all;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::factory::SessionFactory;
use super::lifecycle::arm_reaper;
use super::rendezvous::Rendezvous;
use super::{Session, SessionSnapshot, SessionState};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::process::ProcessRunner;
use crate::runtime::RuntimeKind;

#[derive(Default)]
struct PoolState {
    /// Ready, not handed out, oldest first
    ready: VecDeque<Arc<Session>>,
    /// Every session created by this pool and not yet destroyed
    live: HashMap<String, Arc<Session>>,
    /// Background creations in flight
    pending: usize,
    closed: bool,
}

/// Session pool for one runtime
pub struct SessionPool {
    factory: SessionFactory,
    min_ready: usize,
    in_use_extension: Duration,
    state: Mutex<PoolState>,
}

impl SessionPool {
    pub fn new(factory: SessionFactory) -> Arc<Self> {
        let min_ready = factory.config().min_ready;
        let in_use_extension = factory.config().in_use_extension;
        Arc::new(SessionPool {
            factory,
            min_ready,
            in_use_extension,
            state: Mutex::new(PoolState::default()),
        })
    }

    pub fn runtime(&self) -> RuntimeKind {
        self.factory.runtime()
    }

    pub fn factory(&self) -> &SessionFactory {
        &self.factory
    }

    pub fn min_ready(&self) -> usize {
        self.min_ready
    }

    pub fn ready_count(&self) -> usize {
        self.state().ready.len()
    }

    pub fn live_count(&self) -> usize {
        self.state().live.len()
    }

    pub fn pending_count(&self) -> usize {
        self.state().pending
    }

    /// Look up a live session by id
    pub fn find(&self, id: &str) -> Option<Arc<Session>> {
        self.state().live.get(id).cloned()
    }

    /// Snapshots of every live session
    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        self.state().live.values().map(|s| s.snapshot()).collect()
    }

    /// Hand out a Ready session, marked in use.
    ///
    /// Cold-starts a session when none is Ready; the caller waits for it in that case.
    pub async fn acquire(self: &Arc<Self>) -> Result<Arc<Session>> {
        let (picked, stale) = {
            let mut state = self.state();
            if state.closed {
                return Err(Error::SessionCreation(format!(
                    "{} pool is shut down",
                    self.runtime()
                )));
            }

            let mut stale = Vec::new();
            let mut picked = None;
            while let Some(candidate) = state.ready.pop_front() {
                if candidate.state() == SessionState::Ready && !candidate.is_destroyed() {
                    candidate.set_in_use(true);
                    picked = Some(candidate);
                    break;
                }
                // Parked process ended on its own
                state.live.remove(candidate.id());
                stale.push(candidate);
            }
            (picked, stale)
        };

        for session in stale {
            warn!(
                session = %session.id(),
                state = %session.state(),
                "Dropping stale session from ready list"
            );
            if let Err(e) = session.destroy().await {
                warn!(session = %session.id(), "Failed to destroy stale session: {}", e);
            }
        }

        let session = match picked {
            Some(session) => session,
            None => {
                info!(runtime = %self.runtime(), "No ready session, cold start");
                let session = self.factory.create().await?;
                session.set_in_use(true);
                if !self.register(&session, false) {
                    let _ = session.destroy().await;
                    return Err(Error::SessionCreation(format!(
                        "{} pool is shut down",
                        self.runtime()
                    )));
                }
                session
            }
        };
        debug!(session = %session.id(), runtime = %self.runtime(), "Session handed out");

        self.schedule_replenish();
        Ok(session)
    }

    /// Start background creations until Ready plus in-flight sessions reach `min_ready`.
    ///
    /// Returns the number of creations started. Never waits for them.
    pub fn schedule_replenish(self: &Arc<Self>) -> usize {
        let deficit = self.reserve();
        for _ in 0..deficit {
            let pool = self.clone();
            tokio::spawn(async move {
                let _ = pool.replenish_one().await;
            });
        }
        deficit
    }

    /// Fill the pool up to `min_ready` and wait for the creations to finish.
    ///
    /// Returns the number of sessions created, or the first error if none could be.
    pub async fn warm_up(self: &Arc<Self>) -> Result<usize> {
        let deficit = self.reserve();
        let results = join_all((0..deficit).map(|_| self.clone().replenish_one())).await;

        let created = results.iter().filter(|r| r.is_ok()).count();
        if created == 0 {
            if let Some(Err(e)) = results.into_iter().find(|r| r.is_err()) {
                return Err(e);
            }
        }
        Ok(created)
    }

    /// Called by the reaper: detach and retire `session` unless it is in use.
    ///
    /// Runs under the pool lock so it cannot interleave with `acquire`.
    pub(crate) fn detach_if_idle(&self, session: &Session) -> bool {
        let mut state = self.state();
        if session.in_use() {
            return false;
        }
        state.ready.retain(|s| s.id() != session.id());
        state.live.remove(session.id());
        session.retire();
        true
    }

    /// Forget and destroy a session (after use, or when abandoned)
    pub async fn discard(&self, session: &Session) -> Result<()> {
        {
            let mut state = self.state();
            state.ready.retain(|s| s.id() != session.id());
            state.live.remove(session.id());
        }
        session.destroy().await
    }

    /// Destroy every live session and refuse further acquisitions
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = {
            let mut state = self.state();
            state.closed = true;
            state.ready.clear();
            state.live.drain().map(|(_, s)| s).collect()
        };

        let count = sessions.len();
        for session in sessions {
            if let Err(e) = session.destroy().await {
                warn!(session = %session.id(), "Failed to destroy session on shutdown: {}", e);
            }
        }
        info!(runtime = %self.runtime(), sessions = count, "Session pool shut down");
    }

    /// Claim creation slots, counting in-flight creations against the ceiling
    fn reserve(&self) -> usize {
        let mut state = self.state();
        if state.closed {
            return 0;
        }
        let deficit = self
            .min_ready
            .saturating_sub(state.ready.len() + state.pending);
        state.pending += deficit;
        deficit
    }

    async fn replenish_one(self: Arc<Self>) -> Result<()> {
        match self.factory.create().await {
            Ok(session) => {
                if !self.register(&session, true) {
                    let _ = session.destroy().await;
                }
                Ok(())
            }
            Err(e) => {
                {
                    let mut state = self.state();
                    state.pending = state.pending.saturating_sub(1);
                }
                warn!(runtime = %self.runtime(), "Failed to replenish session pool: {}", e);
                Err(e)
            }
        }
    }

    /// Track a freshly created session and arm its reaper; false if the pool is closed
    fn register(self: &Arc<Self>, session: &Arc<Session>, replenished: bool) -> bool {
        let mut state = self.state();
        if replenished {
            state.pending = state.pending.saturating_sub(1);
        }
        if state.closed {
            return false;
        }

        state.live.insert(session.id().to_string(), session.clone());
        if replenished {
            state.ready.push_back(session.clone());
        }
        arm_reaper(session.clone(), Arc::downgrade(self), self.in_use_extension);
        true
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("SessionPool")
            .field("runtime", &self.runtime())
            .field("ready", &state.ready.len())
            .field("live", &state.live.len())
            .field("pending", &state.pending)
            .finish()
    }
}

/// One pool per enabled runtime
pub struct SessionPools {
    pools: HashMap<RuntimeKind, Arc<SessionPool>>,
    order: Vec<RuntimeKind>,
}

impl SessionPools {
    /// Build a pool for every runtime with a configured executable
    pub fn from_config(
        config: &Config,
        runner: Arc<dyn ProcessRunner>,
        rendezvous: Arc<dyn Rendezvous>,
    ) -> Self {
        let pools = config
            .runtimes
            .enabled()
            .into_iter()
            .filter_map(|kind| {
                let binary = config.runtimes.binary(kind)?.clone();
                Some(SessionPool::new(SessionFactory::new(
                    kind,
                    binary,
                    config.pool.clone(),
                    runner.clone(),
                    rendezvous.clone(),
                )))
            })
            .collect();
        Self::from_pools(pools)
    }

    pub fn from_pools(pools: Vec<Arc<SessionPool>>) -> Self {
        let order = pools.iter().map(|p| p.runtime()).collect();
        let pools = pools.into_iter().map(|p| (p.runtime(), p)).collect();
        SessionPools { pools, order }
    }

    /// Pool for `runtime`, or `UnsupportedRuntime` if it is not enabled
    pub fn get(&self, runtime: RuntimeKind) -> Result<&Arc<SessionPool>> {
        self.pools.get(&runtime).ok_or_else(|| {
            Error::UnsupportedRuntime(format!("{} (not configured on this server)", runtime))
        })
    }

    pub fn contains(&self, runtime: RuntimeKind) -> bool {
        self.pools.contains_key(&runtime)
    }

    /// Enabled runtimes in priority order
    pub fn runtimes(&self) -> &[RuntimeKind] {
        &self.order
    }

    /// Live session with `id`, whichever pool owns it
    pub fn find(&self, id: &str) -> Option<Arc<Session>> {
        self.order
            .iter()
            .filter_map(|kind| self.pools.get(kind))
            .find_map(|pool| pool.find(id))
    }

    /// Warm every pool up to its ready target
    pub async fn start(&self) {
        let pools: Vec<&Arc<SessionPool>> = self.order.iter().filter_map(|k| self.pools.get(k)).collect();
        let results = join_all(pools.iter().map(|pool| pool.warm_up())).await;
        for (pool, result) in pools.iter().zip(results) {
            match result {
                Ok(created) => info!(runtime = %pool.runtime(), created, "Session pool warmed up"),
                Err(e) => warn!(runtime = %pool.runtime(), "Session pool failed to warm up: {}", e),
            }
        }
    }

    /// Destroy every live session in every pool
    pub async fn shutdown(&self) {
        join_all(self.pools.values().map(|pool| pool.shutdown())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PoolConfig, RuntimeBinary};
    use crate::process::fake::{Behavior, FakeInterpreter};
    use crate::session::FileRendezvous;
    use std::collections::HashSet;
    use std::path::Path;

    fn pool_config(root: &Path) -> PoolConfig {
        PoolConfig {
            sessions_dir: root.to_path_buf(),
            park_timeout: Duration::from_secs(5),
            park_poll_interval: Duration::from_millis(5),
            ..PoolConfig::default()
        }
    }

    fn pool_with(runtime: RuntimeKind, config: PoolConfig) -> (Arc<SessionPool>, Arc<FakeInterpreter>) {
        let runner = Arc::new(FakeInterpreter::with_behavior(Behavior::Park));
        let rendezvous = Arc::new(FileRendezvous::from_config(&config));
        let factory = SessionFactory::new(
            runtime,
            RuntimeBinary::new("fake"),
            config,
            runner.clone(),
            rendezvous,
        );
        (SessionPool::new(factory), runner)
    }

    async fn settle(pool: &SessionPool) {
        for _ in 0..400 {
            if pool.pending_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("replenishment did not finish");
    }

    #[tokio::test]
    async fn test_acquire_on_empty_pool_cold_starts() {
        let root = tempfile::tempdir().unwrap();
        for runtime in RuntimeKind::ALL {
            let (pool, _) = pool_with(runtime, pool_config(root.path()));

            let session = pool.acquire().await.unwrap();
            assert_eq!(session.state(), SessionState::Ready);
            assert!(session.in_use());
            assert_eq!(session.runtime(), runtime);

            settle(&pool).await;
            assert_eq!(pool.ready_count(), 2);
            assert!(pool.find(session.id()).is_some());
            pool.shutdown().await;
        }
    }

    #[tokio::test]
    async fn test_ready_count_never_exceeds_target() {
        let root = tempfile::tempdir().unwrap();
        let (pool, _) = pool_with(RuntimeKind::Py, pool_config(root.path()));

        for _ in 0..10 {
            let session = pool.acquire().await.unwrap();
            assert!(pool.ready_count() <= pool.min_ready());
            assert!(pool.ready_count() + pool.pending_count() <= pool.min_ready());
            pool.discard(&session).await.unwrap();
        }
        settle(&pool).await;
        assert_eq!(pool.ready_count(), 2);
        assert_eq!(pool.live_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_hands_out_distinct_sessions() {
        let root = tempfile::tempdir().unwrap();
        let (pool, _) = pool_with(RuntimeKind::Sas, pool_config(root.path()));
        pool.warm_up().await.unwrap();

        let sessions = join_all((0..6).map(|_| pool.acquire())).await;
        let ids: HashSet<String> = sessions
            .iter()
            .map(|s| s.as_ref().unwrap().id().to_string())
            .collect();
        assert_eq!(ids.len(), 6);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_stale_ready_session_is_purged() {
        let root = tempfile::tempdir().unwrap();
        let (pool, _) = pool_with(RuntimeKind::Sas, pool_config(root.path()));
        assert_eq!(pool.warm_up().await.unwrap(), 2);

        // Both parked processes die on their own
        let stale: Vec<Arc<Session>> = pool
            .snapshots()
            .iter()
            .filter_map(|s| pool.find(&s.id))
            .collect();
        for session in &stale {
            session.fail("exited with status 1");
        }

        let fresh = pool.acquire().await.unwrap();
        assert!(stale.iter().all(|s| s.id() != fresh.id()));
        for session in &stale {
            assert!(session.is_destroyed());
            assert!(!session.dir().exists());
        }
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_idle_sessions_are_reaped_from_pool() {
        let root = tempfile::tempdir().unwrap();
        let config = PoolConfig {
            session_ttl: Duration::from_millis(60),
            expiry_margin: Duration::from_millis(20),
            ..pool_config(root.path())
        };
        let (pool, _) = pool_with(RuntimeKind::Js, config);
        pool.warm_up().await.unwrap();
        assert_eq!(pool.ready_count(), 2);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(pool.ready_count(), 0);
        assert_eq!(pool.live_count(), 0);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_handed_out_session_outlives_expiry() {
        let root = tempfile::tempdir().unwrap();
        let config = PoolConfig {
            min_ready: 0,
            session_ttl: Duration::from_millis(60),
            expiry_margin: Duration::from_millis(20),
            in_use_extension: Duration::from_millis(40),
            ..pool_config(root.path())
        };
        let (pool, _) = pool_with(RuntimeKind::Py, config);

        let session = pool.acquire().await.unwrap();
        let first_deadline = session.expires_at();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(!session.is_destroyed());
        assert!(session.dir().exists());
        assert!(session.expires_at() > first_deadline);
        assert!(pool.find(session.id()).is_some());

        // Once released, the next expiry detaches it from the pool
        session.set_in_use(false);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(session.is_destroyed());
        assert!(pool.find(session.id()).is_none());
        assert!(!session.dir().exists());
    }

    #[tokio::test]
    async fn test_shutdown_destroys_everything() {
        let root = tempfile::tempdir().unwrap();
        let (pool, _) = pool_with(RuntimeKind::Sas, pool_config(root.path()));
        let in_use = pool.acquire().await.unwrap();
        settle(&pool).await;

        pool.shutdown().await;
        assert!(in_use.is_destroyed());
        assert_eq!(pool.live_count(), 0);
        assert!(matches!(pool.acquire().await, Err(Error::SessionCreation(_))));
    }

    #[tokio::test]
    async fn test_pools_from_config() {
        let root = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.pool = pool_config(root.path());
        config.runtimes.py = Some(RuntimeBinary::new("python3"));
        config.runtimes.js = Some(RuntimeBinary::new("node"));
        config.runtimes.priority = vec![RuntimeKind::Py];

        let rendezvous = Arc::new(FileRendezvous::from_config(&config.pool));
        let pools = SessionPools::from_config(
            &config,
            Arc::new(FakeInterpreter::new()),
            rendezvous,
        );

        assert_eq!(pools.runtimes(), &[RuntimeKind::Py, RuntimeKind::Js]);
        assert!(matches!(pools.get(RuntimeKind::Sas), Err(Error::UnsupportedRuntime(_))));

        let session = pools.get(RuntimeKind::Py).unwrap().acquire().await.unwrap();
        assert_eq!(pools.find(session.id()).unwrap().id(), session.id());
        pools.shutdown().await;
        assert!(pools.find(session.id()).is_none());
    }
}
