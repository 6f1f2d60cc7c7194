//! Session-scoped caches of resolved graph nodes and dead gaps.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::CgragConfig;
use crate::guards::{clamp_usize, MAX_SESSION_NODES, MIN_SESSION_NODES};
use crate::models::Node;

/// Per-conversation state. Lives behind [`SessionHandle`].
#[derive(Debug)]
pub struct CgragSession {
    id: String,
    created_at: Instant,
    last_accessed: Instant,
    max_nodes: usize,
    cached_nodes: IndexMap<String, Node>,
    not_found: HashSet<String>,
}

pub type SessionHandle = Arc<Mutex<CgragSession>>;

impl CgragSession {
    fn new(id: String, now: Instant, max_nodes: usize) -> Self {
        Self {
            id,
            created_at: now,
            last_accessed: now,
            max_nodes,
            cached_nodes: IndexMap::new(),
            not_found: HashSet::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_accessed(&self) -> Instant {
        self.last_accessed
    }

    pub fn touch_at(&mut self, now: Instant) {
        if now > self.last_accessed {
            self.last_accessed = now;
        }
    }

    pub fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.last_accessed) > ttl
    }

    /// Upsert nodes, then evict the oldest insertions until the cache fits.
    /// Returns how many nodes were evicted.
    pub fn add_nodes<I>(&mut self, nodes: I) -> usize
    where
        I: IntoIterator<Item = Node>,
    {
        for node in nodes {
            self.cached_nodes.insert(node.id.clone(), node);
        }
        let mut evicted = 0;
        while self.cached_nodes.len() > self.max_nodes {
            self.cached_nodes.shift_remove_index(0);
            evicted += 1;
        }
        if evicted > 0 {
            debug!("Session {} evicted {evicted} cached nodes", self.id);
        }
        evicted
    }

    pub fn cached_node(&self, id: &str) -> Option<&Node> {
        self.cached_nodes.get(id)
    }

    /// Cached nodes, oldest insertion first.
    pub fn cached_nodes(&self) -> impl Iterator<Item = &Node> {
        self.cached_nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.cached_nodes.len()
    }

    pub fn mark_not_found(&mut self, gap: &str) {
        self.not_found.insert(gap.to_string());
    }

    /// Exact-string membership; rephrased gaps are not matched.
    pub fn is_not_found(&self, gap: &str) -> bool {
        self.not_found.contains(gap)
    }

    pub fn not_found_count(&self) -> usize {
        self.not_found.len()
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Concurrent map of sessions with TTL expiry and per-session node caps.
#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<String, SessionHandle>,
    ttl: Duration,
    max_nodes: usize,
}

impl SessionStore {
    pub fn new(ttl: Duration, max_nodes: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
            max_nodes: clamp_usize(max_nodes, MIN_SESSION_NODES, MAX_SESSION_NODES),
        }
    }

    pub fn from_config(config: &CgragConfig) -> Self {
        Self::new(config.session_ttl(), config.max_session_nodes)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_nodes(&self) -> usize {
        self.max_nodes
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Look up a session without touching it.
    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    pub fn get_or_create(&self, id: Option<&str>) -> SessionHandle {
        self.get_or_create_at(id, Instant::now())
    }

    /// Return the live session for `id`, creating it if absent. An expired
    /// session is dropped and replaced by a fresh one under a new UUID, as
    /// is a missing or blank id.
    pub fn get_or_create_at(&self, id: Option<&str>, now: Instant) -> SessionHandle {
        let Some(id) = id.map(str::trim).filter(|s| !s.is_empty()) else {
            return self.create(now);
        };

        match self.sessions.entry(id.to_string()) {
            Entry::Occupied(occupied) => {
                let expired = occupied.get().lock().is_expired(now, self.ttl);
                if !expired {
                    let handle = occupied.get().clone();
                    handle.lock().touch_at(now);
                    return handle;
                }
                info!("Session {} expired; starting a fresh one", occupied.key());
                occupied.remove();
            }
            Entry::Vacant(vacant) => {
                debug!("Creating session {}", vacant.key());
                let fresh = self.fresh(vacant.key().clone(), now);
                vacant.insert(fresh.clone());
                return fresh;
            }
        }
        self.create(now)
    }

    fn create(&self, now: Instant) -> SessionHandle {
        let id = uuid::Uuid::new_v4().to_string();
        debug!("Creating session {id}");
        let fresh = self.fresh(id.clone(), now);
        self.sessions.insert(id, fresh.clone());
        fresh
    }

    fn fresh(&self, id: String, now: Instant) -> SessionHandle {
        Arc::new(Mutex::new(CgragSession::new(id, now, self.max_nodes)))
    }

    pub fn touch(&self, session: &SessionHandle) {
        session.lock().touch_at(Instant::now());
    }

    pub fn add_nodes<I>(&self, session: &SessionHandle, nodes: I) -> usize
    where
        I: IntoIterator<Item = Node>,
    {
        session.lock().add_nodes(nodes)
    }

    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Instant::now())
    }

    /// Drop every session idle for longer than the TTL. Returns the count.
    pub fn cleanup_expired_at(&self, now: Instant) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| !session.lock().is_expired(now, self.ttl));
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            info!("Removed {removed} expired sessions");
        }
        removed
    }

    /// Run [`Self::cleanup_expired`] every `every` until `cancel` fires.
    pub fn spawn_cleanup(self: Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        self.cleanup_expired();
                    }
                }
            }
            debug!("Session cleanup task stopped");
        })
    }
}
