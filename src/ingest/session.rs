use crate::model::Session;
use crate::storage::Store;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

/// Session attribution of one hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub session_start: DateTime<Utc>,
    /// Seconds spent on the previous page of the session, 0 for a new session.
    pub previous_time_on_page_seconds: u32,
}

impl Resolved {
    const fn new_session(now: DateTime<Utc>) -> Self {
        Self {
            session_start: now,
            previous_time_on_page_seconds: 0,
        }
    }
}

type Key = (i64, String);

/// Bounded in-memory cursor of the last hit per visitor.
///
/// Entries are keyed by `(client_id, fingerprint)` and updated under the
/// per-entry lock of the map, so two concurrent hits of one visitor see a
/// consistent order. On a miss the optional [`Store`] is asked for the last
/// hit of the visitor.
pub struct SessionCache {
    sessions: DashMap<Key, Session>,
    store: Option<Arc<dyn Store>>,
    idle_timeout: Duration,
    max_entries: usize,
}

impl SessionCache {
    pub fn new(store: Option<Arc<dyn Store>>, idle_timeout: Duration, max_entries: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            store,
            idle_timeout,
            max_entries: max_entries.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Attribute a page view at `now` and record it as the visitor's latest hit.
    ///
    /// Resolution and update happen in one step under the entry lock.
    pub fn stitch(
        &self,
        client_id: i64,
        fingerprint: &str,
        now: DateTime<Utc>,
        path: &str,
    ) -> Resolved {
        self.attribute(client_id, fingerprint, now, path, true)
    }

    /// Attribute an event at `now` to the visitor's session.
    ///
    /// The cursor is left alone unless the event starts a new session, so the
    /// time on page of the next page view still counts from the previous one.
    pub fn stitch_event(
        &self,
        client_id: i64,
        fingerprint: &str,
        now: DateTime<Utc>,
        path: &str,
    ) -> Resolved {
        self.attribute(client_id, fingerprint, now, path, false)
    }

    fn attribute(
        &self,
        client_id: i64,
        fingerprint: &str,
        now: DateTime<Utc>,
        path: &str,
        page_view: bool,
    ) -> Resolved {
        let key = (client_id, fingerprint.to_string());
        // The store is consulted outside the entry lock; an entry written
        // meanwhile by a concurrent hit takes precedence.
        let fallback = if self.sessions.contains_key(&key) {
            None
        } else {
            self.fallback(client_id, fingerprint, now)
        };

        let resolved = match self.sessions.entry(key) {
            Entry::Occupied(mut entry) => {
                let continued = self.continue_from(entry.get(), now);
                let resolved = continued.unwrap_or_else(|| Resolved::new_session(now));
                if page_view || continued.is_none() {
                    entry.insert(Session {
                        path: path.to_string(),
                        time: now,
                        session_start: resolved.session_start,
                    });
                }
                resolved
            }
            Entry::Vacant(entry) => {
                let continued = fallback
                    .as_ref()
                    .and_then(|cursor| self.continue_from(cursor, now));
                let resolved = continued.unwrap_or_else(|| Resolved::new_session(now));
                let cursor = match fallback {
                    Some(cursor) if !page_view && continued.is_some() => cursor,
                    _ => Session {
                        path: path.to_string(),
                        time: now,
                        session_start: resolved.session_start,
                    },
                };
                entry.insert(cursor);
                resolved
            }
        };

        self.evict_if_full(now);
        resolved
    }

    /// Continue the session of `cursor`, unless it has been idle too long.
    ///
    /// A cursor newer than `now` continues with 0 seconds on the previous page.
    fn continue_from(&self, cursor: &Session, now: DateTime<Utc>) -> Option<Resolved> {
        let elapsed = now - cursor.time;
        if elapsed > self.idle_timeout {
            return None;
        }
        let millis = elapsed.num_milliseconds().max(0);
        let seconds = u32::try_from((millis + 500) / 1000).unwrap_or(u32::MAX);
        Some(Resolved {
            session_start: cursor.session_start,
            previous_time_on_page_seconds: seconds,
        })
    }

    fn fallback(&self, client_id: i64, fingerprint: &str, now: DateTime<Utc>) -> Option<Session> {
        let store = self.store.as_ref()?;
        match store.session(client_id, fingerprint, now - self.idle_timeout) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, client_id, "Session lookup failed, starting new session");
                None
            }
        }
    }

    /// Drop idle entries, then keep only the newest half when still over capacity.
    fn evict_if_full(&self, now: DateTime<Utc>) {
        if self.sessions.len() <= self.max_entries {
            return;
        }
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| now - session.time <= self.idle_timeout);

        let keep = (self.max_entries / 2).max(1);
        if self.sessions.len() > keep {
            let mut by_age: Vec<(Key, DateTime<Utc>)> = self
                .sessions
                .iter()
                .map(|e| (e.key().clone(), e.value().time))
                .collect();
            by_age.sort_by(|a, b| b.1.cmp(&a.1));
            for (key, _) in by_age.into_iter().skip(keep) {
                self.sessions.remove(&key);
            }
        }
        tracing::debug!(
            before,
            after = self.sessions.len(),
            "Evicted session cache entries"
        );
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    proptest! {
        /// Gaps within the idle timeout keep the first session start.
        #[test]
        fn prop_short_gaps_keep_session(gaps in proptest::collection::vec(0i64..1800, 1..20)) {
            let cache = SessionCache::new(None, Duration::minutes(30), 100);
            let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
            cache.stitch(1, "fp", start, "/");
            let mut now = start;
            for gap in gaps {
                now += Duration::seconds(gap);
                let r = cache.stitch(1, "fp", now, "/");
                prop_assert_eq!(r.session_start, start);
                prop_assert_eq!(i64::from(r.previous_time_on_page_seconds), gap);
            }
        }

        /// The cache never grows past its bound.
        #[test]
        fn prop_size_bounded(max in 1usize..20, visitors in 1usize..60) {
            let cache = SessionCache::new(None, Duration::minutes(30), max);
            let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
            for i in 0..visitors {
                cache.stitch(1, &format!("fp{i}"), start, "/");
                prop_assert!(cache.len() <= max);
            }
        }
    }
}
