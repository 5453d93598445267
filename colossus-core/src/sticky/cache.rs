use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::StickyHostError;

/// Last known sticky host per resource, persisted as a JSON object.
#[derive(Debug)]
pub struct HostCache {
    path: PathBuf,
    hosts: Mutex<BTreeMap<String, String>>,
}

impl HostCache {
    /// Loads the cache at `path`. A missing file is an empty cache.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StickyHostError> {
        let path = path.into();
        let hosts = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_str(&raw).map_err(|err| cache_error(&path, err))?,
            Err(err) if err.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(cache_error(&path, err)),
        };
        debug!(path = %path.display(), entries = hosts.len(), "host cache loaded");
        Ok(Self {
            path,
            hosts: Mutex::new(hosts),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, resource: &str) -> Option<String> {
        self.hosts.lock().get(resource).cloned()
    }

    pub fn entries(&self) -> BTreeMap<String, String> {
        self.hosts.lock().clone()
    }

    /// Records `host` for `resource`, rewriting the file only on change.
    /// The lock is held through the write so the file never goes back to an
    /// older snapshot.
    pub fn store(&self, resource: &str, host: &str) -> Result<(), StickyHostError> {
        let mut hosts = self.hosts.lock();
        if hosts.get(resource).is_some_and(|known| known == host) {
            return Ok(());
        }
        hosts.insert(resource.to_owned(), host.to_owned());
        self.write(&hosts)
    }

    fn write(&self, hosts: &BTreeMap<String, String>) -> Result<(), StickyHostError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| cache_error(parent, err))?;
        }
        let raw = serde_json::to_vec_pretty(hosts).map_err(|err| cache_error(&self.path, err))?;

        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);
        fs::write(&staging, raw).map_err(|err| cache_error(&staging, err))?;
        fs::rename(&staging, &self.path).map_err(|err| cache_error(&self.path, err))
    }
}

fn cache_error(path: &Path, err: impl std::fmt::Display) -> StickyHostError {
    StickyHostError::Cache(format!("{}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_an_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = HostCache::open(dir.path().join("hosts.json")).unwrap();
        assert!(cache.entries().is_empty());
        assert!(!cache.path().exists());
    }

    #[test]
    fn stored_hosts_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("hosts.json");

        let cache = HostCache::open(&path).unwrap();
        cache.store("vtex.store@2.x", "host-a").unwrap();
        cache.store("vtex.admin@1.x", "host-b").unwrap();
        cache.store("vtex.store@2.x", "host-c").unwrap();

        let reopened = HostCache::open(&path).unwrap();
        assert_eq!(reopened.get("vtex.store@2.x").as_deref(), Some("host-c"));
        assert_eq!(reopened.get("vtex.admin@1.x").as_deref(), Some("host-b"));
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.json");
        fs::write(&path, "[not a map").unwrap();
        assert!(matches!(
            HostCache::open(&path),
            Err(StickyHostError::Cache(_))
        ));
    }

    #[test]
    fn concurrent_stores_leave_the_latest_snapshot_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.json");
        let cache = HostCache::open(&path).unwrap();

        std::thread::scope(|scope| {
            for worker in 0..8 {
                let cache = &cache;
                scope.spawn(move || {
                    for round in 0..25 {
                        cache
                            .store(&format!("vtex.app-{worker}@1.x"), &format!("host-{round}"))
                            .unwrap();
                    }
                });
            }
        });

        let reopened = HostCache::open(&path).unwrap();
        assert_eq!(reopened.entries(), cache.entries());
        assert_eq!(reopened.entries().len(), 8);
        assert_eq!(reopened.get("vtex.app-3@1.x").as_deref(), Some("host-24"));
    }
}
