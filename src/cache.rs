use dashmap::DashMap;

// Read-through cache shared by the query handlers. TTLs bound staleness when
// a process dies between a store commit and its invalidation; freshness on
// the happy path comes from explicit delete_by_pattern calls on every
// mutation, not from expiry.
#[derive(Clone)]
struct CacheEntry {
    raw: String,
    expires_at_ms: Option<i64>,
}

impl CacheEntry {
    fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms.map(|at| now_ms >= at).unwrap_or(false)
    }
}

pub(crate) struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryCache {
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub(crate) fn set(&self, key: &str, value: &serde_json::Value, ttl_seconds: Option<u64>) {
        let expires_at_ms =
            ttl_seconds.map(|ttl| crate::now_epoch_ms() + (ttl as i64).saturating_mul(1000));
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                raw: value.to_string(),
                expires_at_ms,
            },
        );
    }

    // A stored value that no longer parses as JSON comes back as a raw
    // string; callers fall through to the source of truth when the shape is
    // not what they expect.
    pub(crate) fn get(&self, key: &str) -> Option<serde_json::Value> {
        let now_ms = crate::now_epoch_ms();
        let raw = {
            let entry = self.entries.get(key)?;
            if entry.is_expired(now_ms) {
                None
            } else {
                Some(entry.raw.clone())
            }
        };
        match raw {
            Some(raw) => {
                Some(serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw)))
            }
            None => {
                self.entries.remove_if(key, |_, e| e.is_expired(now_ms));
                None
            }
        }
    }

    pub(crate) fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub(crate) fn exists(&self, key: &str) -> bool {
        let now_ms = crate::now_epoch_ms();
        self.entries
            .get(key)
            .map(|e| !e.is_expired(now_ms))
            .unwrap_or(false)
    }

    pub(crate) fn delete_by_pattern(&self, pattern: &str) -> usize {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|kv| glob_match(pattern, kv.key()))
            .map(|kv| kv.key().clone())
            .collect();
        let mut removed = 0usize;
        for key in keys {
            if self.entries.remove(&key).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!("cache invalidated pattern={pattern} removed={removed}");
        }
        removed
    }

    pub(crate) fn purge_expired(&self) -> usize {
        let now_ms = crate::now_epoch_ms();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now_ms));
        before.saturating_sub(self.entries.len())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

// Glob over cache keys: '*' matches any run of characters, '?' exactly one.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p = pattern.as_bytes();
    let t = text.as_bytes();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && (p[pi] == b'?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == b'*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((star_pi, star_ti)) = star {
            pi = star_pi + 1;
            ti = star_ti + 1;
            star = Some((star_pi, star_ti + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn glob_match_cases() {
        assert!(glob_match("leaderboard:*", "leaderboard:global:10:0"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("predictions:match:42:*", "predictions:match:42:10:0"));
        assert!(!glob_match("predictions:match:42:*", "predictions:match:421:10:0"));
        assert!(glob_match("leaderboard:user:?:global", "leaderboard:user:7:global"));
        assert!(!glob_match("leaderboard:user:?:global", "leaderboard:user:77:global"));
        assert!(glob_match("a*b*c", "a-x-b-y-c"));
        assert!(!glob_match("a*b*c", "a-x-b-y"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exactly"));
        assert!(glob_match("*", ""));
        assert!(!glob_match("?", ""));
    }

    #[test]
    fn set_then_get_round_trips() {
        let cache = MemoryCache::new();
        cache.set("k", &json!({"rank": 1, "points": 30}), Some(60));
        let got = cache.get("k").unwrap();
        assert_eq!(got["rank"], 1);
        assert_eq!(got["points"], 30);
        assert!(cache.exists("k"));
    }

    #[test]
    fn get_absent_key_is_none() {
        let cache = MemoryCache::new();
        assert!(cache.get("missing").is_none());
        assert!(!cache.exists("missing"));
    }

    #[test]
    fn unparseable_value_comes_back_raw() {
        let cache = MemoryCache::new();
        cache.set("k", &json!("placeholder"), None);
        cache.entries.get_mut("k").unwrap().raw = "not json {".to_string();
        assert_eq!(
            cache.get("k").unwrap(),
            serde_json::Value::String("not json {".to_string())
        );
    }

    #[test]
    fn expired_entry_reads_as_absent_and_is_dropped() {
        let cache = MemoryCache::new();
        cache.set("k", &json!(1), Some(60));
        cache.entries.get_mut("k").unwrap().expires_at_ms = Some(crate::now_epoch_ms() - 1);
        assert!(cache.get("k").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn set_invalidate_get_is_absent() {
        let cache = MemoryCache::new();
        cache.set("leaderboard:global:10:0", &json!({"total": 3}), Some(3600));
        cache.set("leaderboard:user:7:global", &json!({"rank": 2}), Some(1800));
        cache.set("predictions:user:7:10:0", &json!({"total": 1}), Some(300));

        let removed = cache.delete_by_pattern("leaderboard:*");
        assert_eq!(removed, 2);
        assert!(cache.get("leaderboard:global:10:0").is_none());
        assert!(cache.get("leaderboard:user:7:global").is_none());
        assert!(cache.get("predictions:user:7:10:0").is_some());
    }

    #[test]
    fn zero_match_pattern_is_a_noop() {
        let cache = MemoryCache::new();
        cache.set("matches:id:1", &json!(1), None);
        assert_eq!(cache.delete_by_pattern("rewards:*"), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn delete_removes_single_key() {
        let cache = MemoryCache::new();
        cache.set("k", &json!(1), None);
        assert!(cache.delete("k"));
        assert!(!cache.delete("k"));
    }

    #[test]
    fn purge_drops_only_expired_entries() {
        let cache = MemoryCache::new();
        cache.set("fresh", &json!(1), Some(600));
        cache.set("stale", &json!(2), Some(600));
        cache.set("pinned", &json!(3), None);
        cache.entries.get_mut("stale").unwrap().expires_at_ms = Some(crate::now_epoch_ms() - 1);
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.exists("fresh"));
        assert!(cache.exists("pinned"));
    }
}
