//! Profile caching.
//!
//! Profiles persist as one JSON file per domain and are mirrored in a
//! bounded in-memory LRU. Concurrent lookups for the same domain collapse
//! into a single discovery run (single-flight); late arrivals subscribe to
//! the in-flight computation instead of starting their own.

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use lru::LruCache;
use tokio::sync::watch;

use super::profile::SiteProfile;

type Pending = watch::Receiver<Option<Arc<SiteProfile>>>;

/// Cache placement and freshness settings.
#[derive(Debug, Clone)]
pub struct ProfileCacheConfig {
    pub cache_dir: PathBuf,
    pub ttl: Duration,
    pub max_memory_entries: usize,
}

impl Default for ProfileCacheConfig {
    fn default() -> Self {
        let cache_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ironfetch")
            .join("profiles");
        Self {
            cache_dir,
            ttl: Duration::from_secs(24 * 60 * 60),
            max_memory_entries: 1000,
        }
    }
}

/// Disk + memory cache of [`SiteProfile`]s with single-flight lookups.
pub struct ProfileCache {
    config: ProfileCacheConfig,
    memory: Mutex<LruCache<String, Arc<SiteProfile>>>,
    in_flight: Mutex<HashMap<String, Pending>>,
}

impl ProfileCache {
    pub fn new(config: ProfileCacheConfig) -> Self {
        let cap = NonZeroUsize::new(config.max_memory_entries.max(1)).expect("nonzero cap");
        Self {
            config,
            memory: Mutex::new(LruCache::new(cap)),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    fn path_for(&self, domain: &str) -> PathBuf {
        let file = sanitize_filename::sanitize(domain);
        self.config.cache_dir.join(format!("{file}.json"))
    }

    fn is_fresh(&self, profile: &SiteProfile) -> bool {
        let age = Utc::now().signed_duration_since(profile.generated_at);
        age.to_std()
            .map(|age| age <= self.config.ttl)
            .unwrap_or(true)
    }

    /// Cached profile for `domain`, if fresh.
    pub async fn load(&self, domain: &str) -> Option<Arc<SiteProfile>> {
        {
            let mut memory = self.memory.lock().expect("profile cache lock");
            if let Some(profile) = memory.get(domain) {
                if self.is_fresh(profile) {
                    return Some(Arc::clone(profile));
                }
                memory.pop(domain);
            }
        }

        let path = self.path_for(domain);
        let bytes = tokio::fs::read(&path).await.ok()?;
        let profile: SiteProfile = serde_json::from_slice(&bytes).ok()?;
        if !self.is_fresh(&profile) {
            return None;
        }
        let profile = Arc::new(profile);
        self.memory
            .lock()
            .expect("profile cache lock")
            .put(domain.to_string(), Arc::clone(&profile));
        Some(profile)
    }

    /// Persist `profile` to disk and memory.
    pub async fn store(&self, profile: Arc<SiteProfile>) {
        let path = self.path_for(&profile.domain);
        if let Some(parent) = path.parent()
            && let Err(err) = tokio::fs::create_dir_all(parent).await
        {
            log::warn!("profile cache dir creation failed: {err}");
        }
        match serde_json::to_vec_pretty(profile.as_ref()) {
            Ok(bytes) => {
                if let Err(err) = tokio::fs::write(&path, bytes).await {
                    log::warn!("profile cache write failed for {}: {err}", profile.domain);
                }
            }
            Err(err) => log::warn!("profile serialisation failed: {err}"),
        }
        self.memory
            .lock()
            .expect("profile cache lock")
            .put(profile.domain.clone(), profile);
    }

    /// Fresh profile for `domain`, computing it at most once across
    /// concurrent callers.
    pub async fn get_or_compute<F, Fut>(&self, domain: &str, compute: F) -> Arc<SiteProfile>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SiteProfile>,
    {
        if let Some(profile) = self.load(domain).await {
            return profile;
        }

        // Either become the computing caller or subscribe to one.
        let (sender, receiver) = {
            let mut in_flight = self.in_flight.lock().expect("in-flight lock");
            if let Some(pending) = in_flight.get(domain) {
                (None, Some(pending.clone()))
            } else {
                let (tx, rx) = watch::channel(None);
                in_flight.insert(domain.to_string(), rx);
                (Some(tx), None)
            }
        };

        if let Some(mut receiver) = receiver {
            loop {
                if let Some(profile) = receiver.borrow().clone() {
                    return profile;
                }
                if receiver.changed().await.is_err() {
                    // The computing task died; do the work ourselves.
                    break;
                }
            }
            let profile = Arc::new(compute().await);
            self.store(Arc::clone(&profile)).await;
            return profile;
        }

        let sender = sender.expect("computing caller holds the sender");
        let profile = Arc::new(compute().await);
        self.store(Arc::clone(&profile)).await;
        let _ = sender.send(Some(Arc::clone(&profile)));
        self.in_flight
            .lock()
            .expect("in-flight lock")
            .remove(domain);
        profile
    }

    /// Drop the in-memory layer (disk files stay).
    pub fn clear_memory(&self) {
        self.memory.lock().expect("profile cache lock").clear();
    }
}

impl Default for ProfileCache {
    fn default() -> Self {
        Self::new(ProfileCacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::profile::finalize_profile;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache_in(dir: &std::path::Path, ttl: Duration) -> ProfileCache {
        ProfileCache::new(ProfileCacheConfig {
            cache_dir: dir.to_path_buf(),
            ttl,
            max_memory_entries: 10,
        })
    }

    fn profile(domain: &str) -> SiteProfile {
        let mut profile = SiteProfile::empty(domain);
        finalize_profile(&mut profile);
        profile
    }

    #[tokio::test]
    async fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path(), Duration::from_secs(3600));
        cache.store(Arc::new(profile("example.com"))).await;

        // A fresh cache instance sees only the disk layer.
        let second = cache_in(dir.path(), Duration::from_secs(3600));
        let loaded = second.load("example.com").await.expect("cached on disk");
        assert_eq!(loaded.domain, "example.com");
        assert!(dir.path().join("example.com.json").exists());
    }

    #[tokio::test]
    async fn stale_profiles_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path(), Duration::from_secs(3600));
        let mut stale = profile("old.example.com");
        stale.generated_at = Utc::now() - chrono::Duration::hours(48);
        cache.store(Arc::new(stale)).await;

        let reader = cache_in(dir.path(), Duration::from_secs(3600));
        assert!(reader.load("old.example.com").await.is_none());
    }

    #[tokio::test]
    async fn single_flight_coalesces_concurrent_lookups() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(cache_in(dir.path(), Duration::from_secs(3600)));
        let computations = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let computations = Arc::clone(&computations);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("example.com", || {
                        let computations = Arc::clone(&computations);
                        async move {
                            computations.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(30)).await;
                            profile("example.com")
                        }
                    })
                    .await
            }));
        }

        let profiles: Vec<Arc<SiteProfile>> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        assert_eq!(computations.load(Ordering::SeqCst), 1);
        let hash = &profiles[0].content_hash;
        assert!(profiles.iter().all(|p| &p.content_hash == hash));
    }

    #[tokio::test]
    async fn domains_become_safe_filenames() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(dir.path(), Duration::from_secs(3600));
        cache.store(Arc::new(profile("sub.example.com:8443"))).await;
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].ends_with(".json"));
        assert!(!entries[0].contains(':'));
    }
}
