//! Replica affinity for a clustered backend.
//!
//! The backend shards build state per replica. Requests carry a
//! deterministic hint so related calls land on the same replica, and every
//! response reports the replica that actually served it. The resolver keeps
//! one [`StickyHostBinding`] per resource and reports when the serving
//! replica drifts. A strict sequence (incremental calls that depend on
//! state held by the previous replica) fails on the first drift.

mod cache;
mod probe;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use colossus_model::Context;

use crate::config::StickyHostConfig;
use crate::error::StickyHostError;

pub use cache::HostCache;
pub use probe::{AvailabilityProbe, HttpAvailabilityProbe};

/// `request:{account}:{workspace}:{resource}[:{index}]`
pub fn sticky_hint(ctx: &Context, resource: &str, index: Option<u32>) -> String {
    let base = format!("request:{}:{}:{}", ctx.account, ctx.workspace, resource);
    match index {
        Some(index) => format!("{base}:{index}"),
        None => base,
    }
}

/// Answer of one availability probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostAvailability {
    /// Opaque replica token from the sticky-host response header.
    pub host: String,
    pub hostname: String,
    /// Higher is better (less loaded).
    pub score: f64,
    /// Hint that reached this replica.
    pub hint: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StickyHostBinding {
    pub resource: String,
    pub pinned_host: Option<String>,
    /// Hint sent with the latest request for this resource.
    pub hint: String,
    pub host_change_count: u32,
}

impl StickyHostBinding {
    fn new(resource: &str, hint: &str) -> Self {
        Self {
            resource: resource.to_owned(),
            pinned_host: None,
            hint: hint.to_owned(),
            host_change_count: 0,
        }
    }
}

/// What a response did to a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingUpdate {
    /// First host seen for the resource.
    Pinned,
    Unchanged,
    /// The host changed; below the escalation threshold.
    Drifted { count: u32 },
    /// The host changed and the change count reached the threshold.
    Escalated { count: u32 },
    /// The response did not report a host. The binding is left as is.
    MissingHost,
}

pub struct StickyHostResolver {
    probe: Arc<dyn AvailabilityProbe>,
    config: StickyHostConfig,
    bindings: DashMap<String, StickyHostBinding>,
    sequences: DashMap<String, Arc<AsyncMutex<()>>>,
    cache: Option<HostCache>,
}

impl std::fmt::Debug for StickyHostResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StickyHostResolver")
            .field("config", &self.config)
            .field("bindings", &self.bindings.len())
            .field("cache", &self.cache.as_ref().map(HostCache::path))
            .finish()
    }
}

impl StickyHostResolver {
    /// Builds a resolver. When `cache_path` is configured the cached hosts
    /// seed the bindings; an unreadable cache is logged and ignored.
    pub fn new(probe: Arc<dyn AvailabilityProbe>, config: StickyHostConfig) -> Self {
        let cache = config
            .cache_path
            .as_ref()
            .and_then(|path| match HostCache::open(path) {
                Ok(cache) => Some(cache),
                Err(err) => {
                    warn!(error = %err, "ignoring sticky host cache");
                    None
                }
            });

        let bindings = DashMap::new();
        if let Some(cache) = &cache {
            for (resource, host) in cache.entries() {
                let mut binding = StickyHostBinding::new(&resource, "");
                binding.pinned_host = Some(host);
                bindings.insert(resource, binding);
            }
        }

        Self {
            probe,
            config,
            bindings,
            sequences: DashMap::new(),
            cache,
        }
    }

    pub fn config(&self) -> &StickyHostConfig {
        &self.config
    }

    pub fn binding(&self, resource: &str) -> Option<StickyHostBinding> {
        self.bindings.get(resource).map(|binding| binding.clone())
    }

    /// Hint to send with the next request for `resource`: the one chosen by
    /// the last [`resolve_best_host`](Self::resolve_best_host) or sent last,
    /// else the unindexed default.
    pub fn hint_for(&self, ctx: &Context, resource: &str) -> String {
        self.bindings
            .get(resource)
            .map(|binding| binding.hint.clone())
            .filter(|hint| !hint.is_empty())
            .unwrap_or_else(|| sticky_hint(ctx, resource, None))
    }

    pub async fn probe_availability(
        &self,
        ctx: &Context,
        resource: &str,
        index: Option<u32>,
    ) -> Result<HostAvailability, StickyHostError> {
        let hint = sticky_hint(ctx, resource, index);
        self.probe.probe(ctx, resource, &hint).await
    }

    /// Probes `candidates` indexed hints concurrently, each bounded by
    /// `timeout`, and returns the best-scoring replica. `None` means no
    /// preference: every probe failed or timed out.
    pub async fn resolve_best_host(
        &self,
        ctx: &Context,
        resource: &str,
        candidates: u32,
        timeout: Duration,
    ) -> Option<HostAvailability> {
        let probes = (0..candidates.max(1)).map(|index| async move {
            match tokio::time::timeout(timeout, self.probe_availability(ctx, resource, Some(index)))
                .await
            {
                Ok(Ok(availability)) => Some(availability),
                Ok(Err(err)) => {
                    debug!(resource, index, error = %err, "availability probe failed");
                    None
                }
                Err(_) => {
                    debug!(resource, index, ?timeout, "availability probe timed out");
                    None
                }
            }
        });

        let best = join_all(probes)
            .await
            .into_iter()
            .flatten()
            .max_by(|a, b| a.score.total_cmp(&b.score));

        match &best {
            Some(best) => {
                info!(resource, host = %best.host, score = best.score, "selected replica");
                self.bindings
                    .entry(resource.to_owned())
                    .or_insert_with(|| StickyHostBinding::new(resource, &best.hint))
                    .hint
                    .clone_from(&best.hint);
            }
            None => debug!(resource, "no replica preference"),
        }
        best
    }

    /// [`resolve_best_host`](Self::resolve_best_host) with the configured
    /// candidate count and timeout.
    pub async fn resolve(&self, ctx: &Context, resource: &str) -> Option<HostAvailability> {
        self.resolve_best_host(
            ctx,
            resource,
            self.config.probe_candidates,
            self.config.probe_timeout(),
        )
        .await
    }

    /// Folds the host reported by a response into the binding for
    /// `resource`. The binding always ends up tracking `response_host`.
    ///
    /// Under `strict` any change of host is an error, returned after the
    /// binding was updated so a restarted sequence starts from the new host.
    pub fn update_binding(
        &self,
        resource: &str,
        sent_hint: &str,
        response_host: Option<&str>,
        strict: bool,
    ) -> Result<BindingUpdate, StickyHostError> {
        let Some(current) = response_host else {
            warn!(resource, hint = sent_hint, "response carried no sticky host");
            if let Some(mut binding) = self.bindings.get_mut(resource) {
                binding.hint = sent_hint.to_owned();
            }
            return Ok(BindingUpdate::MissingHost);
        };

        let (update, previous) = {
            let mut binding = self
                .bindings
                .entry(resource.to_owned())
                .or_insert_with(|| StickyHostBinding::new(resource, sent_hint));
            binding.hint = sent_hint.to_owned();

            let previous = binding.pinned_host.replace(current.to_owned());
            let update = match previous.as_deref() {
                None => BindingUpdate::Pinned,
                Some(previous) if previous == current => BindingUpdate::Unchanged,
                Some(_) => {
                    binding.host_change_count += 1;
                    let count = binding.host_change_count;
                    if count >= self.config.drift_threshold {
                        BindingUpdate::Escalated { count }
                    } else {
                        BindingUpdate::Drifted { count }
                    }
                }
            };
            (update, previous)
        };

        if update != BindingUpdate::Unchanged {
            self.persist(resource, current);
        }

        let previous = previous.unwrap_or_default();
        match update {
            BindingUpdate::Drifted { count } | BindingUpdate::Escalated { count } if strict => {
                error!(
                    resource,
                    previous = %previous,
                    current,
                    count,
                    "sticky host changed during a strict sequence"
                );
                Err(StickyHostError::StrictDrift {
                    resource: resource.to_owned(),
                    previous,
                    current: current.to_owned(),
                })
            }
            BindingUpdate::Escalated { count } => {
                error!(
                    resource,
                    previous = %previous,
                    current,
                    count,
                    threshold = self.config.drift_threshold,
                    "sticky host keeps changing"
                );
                Ok(update)
            }
            BindingUpdate::Drifted { count } => {
                warn!(resource, previous = %previous, current, count, "sticky host changed");
                Ok(update)
            }
            BindingUpdate::Pinned => {
                debug!(resource, host = current, "sticky host pinned");
                Ok(update)
            }
            BindingUpdate::Unchanged | BindingUpdate::MissingHost => Ok(update),
        }
    }

    /// Starts a new sequence for `resource`: the drift counter goes back to
    /// zero, the pinned host is kept.
    pub fn reset_sequence(&self, resource: &str) {
        if let Some(mut binding) = self.bindings.get_mut(resource) {
            binding.host_change_count = 0;
        }
    }

    /// Serializes strict sequences for one resource. Hold the guard for the
    /// whole sequence.
    pub async fn sequence_lock(&self, resource: &str) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(
            self.sequences
                .entry(resource.to_owned())
                .or_default()
                .value(),
        );
        lock.lock_owned().await
    }

    fn persist(&self, resource: &str, host: &str) {
        if let Some(cache) = &self.cache
            && let Err(err) = cache.store(resource, host)
        {
            warn!(resource, error = %err, "failed to persist sticky host");
        }
    }
}
