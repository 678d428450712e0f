use crate::ingest::bot::BotFilter;
use crate::ingest::buffer::HitBuffer;
use crate::ingest::hit::{EventOptions, HitBuilder, HitOptions};
use crate::ingest::request::RequestMeta;
use crate::ingest::session::SessionCache;
use crate::model::{Event, Hit};
use chrono::Utc;
use std::sync::Arc;

/// Filters, builds and buffers hits and events.
pub struct Tracker {
    bot_filter: BotFilter,
    filter_bots: bool,
    builder: HitBuilder,
    sessions: SessionCache,
    buffer: Arc<HitBuffer>,
}

impl Tracker {
    pub const fn new(
        bot_filter: BotFilter,
        filter_bots: bool,
        builder: HitBuilder,
        sessions: SessionCache,
        buffer: Arc<HitBuffer>,
    ) -> Self {
        Self {
            bot_filter,
            filter_bots,
            builder,
            sessions,
            buffer,
        }
    }

    pub const fn buffer(&self) -> &Arc<HitBuffer> {
        &self.buffer
    }

    pub const fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    /// Track a page view. Returns `None` when the request is ignored.
    ///
    /// A failed threshold flush leaves the hit buffered for the next flush.
    pub fn track_hit(&self, request: &RequestMeta<'_>, options: &HitOptions) -> Option<Hit> {
        if self.ignored(request) {
            return None;
        }
        let hit = self
            .builder
            .hit(request, options, &self.sessions, Utc::now());
        if let Err(e) = self.buffer.push_hit(hit.clone()) {
            tracing::error!(error = %e, "Flush failed, hit stays buffered");
        }
        Some(hit)
    }

    /// Track a custom event. Returns `None` when the request is ignored.
    pub fn track_event(
        &self,
        request: &RequestMeta<'_>,
        options: &HitOptions,
        event: &EventOptions,
    ) -> Option<Event> {
        if self.ignored(request) {
            return None;
        }
        let event = self
            .builder
            .event(request, options, event, &self.sessions, Utc::now());
        if let Err(e) = self.buffer.push_event(event.clone()) {
            tracing::error!(error = %e, "Flush failed, event stays buffered");
        }
        Some(event)
    }

    fn ignored(&self, request: &RequestMeta<'_>) -> bool {
        let ignored = self.filter_bots && self.bot_filter.should_ignore(request);
        if ignored {
            tracing::debug!("Ignoring request");
        }
        ignored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::buffer::testing::FlakyStore;
    use crate::model::Browser;
    use crate::storage::{DuckDbStore, Store};
    use axum::http::{HeaderMap, HeaderValue, Uri};
    use std::collections::HashMap;

    const CHROME: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

    fn tracker(filter_bots: bool) -> (Tracker, Arc<DuckDbStore>) {
        let store = Arc::new(DuckDbStore::open_in_memory().unwrap());
        let tracker = Tracker::new(
            BotFilter::new(HashMap::from([(Browser::Chrome, 84)])),
            filter_bots,
            HitBuilder::new("secret", None),
            SessionCache::new(Some(store.clone()), chrono::Duration::minutes(30), 100),
            Arc::new(HitBuffer::new(100, store.clone())),
        );
        (tracker, store)
    }

    fn headers(ua: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert("user-agent", HeaderValue::from_str(ua).unwrap());
        map
    }

    #[test]
    fn test_track_hit_buffers() {
        let (tracker, store) = tracker(true);
        let headers = headers(CHROME);
        let uri: Uri = "/pricing".parse().unwrap();
        let request = RequestMeta::new(&headers, &uri, None);

        let hit = tracker
            .track_hit(&request, &HitOptions::default())
            .unwrap();
        assert_eq!(hit.path, "/pricing");
        assert_eq!(tracker.buffer().len(), 1);
        assert_eq!(tracker.sessions().len(), 1);

        tracker.buffer().flush().unwrap();
        assert_eq!(store.count("SELECT count(*) FROM hit", &[]).unwrap(), 1);
    }

    #[test]
    fn test_bot_is_ignored() {
        let (tracker, _store) = tracker(true);
        let headers = headers("Googlebot/2.1");
        let uri: Uri = "/".parse().unwrap();
        let request = RequestMeta::new(&headers, &uri, None);
        assert!(tracker
            .track_hit(&request, &HitOptions::default())
            .is_none());
        assert!(tracker.buffer().is_empty());
    }

    #[test]
    fn test_bot_filter_disabled() {
        let (tracker, _store) = tracker(false);
        let headers = headers("Googlebot/2.1");
        let uri: Uri = "/".parse().unwrap();
        let request = RequestMeta::new(&headers, &uri, None);
        assert!(tracker
            .track_hit(&request, &HitOptions::default())
            .is_some());
    }

    #[test]
    fn test_track_event() {
        let (tracker, store) = tracker(true);
        let headers = headers(CHROME);
        let uri: Uri = "/signup".parse().unwrap();
        let request = RequestMeta::new(&headers, &uri, None);
        let event = tracker
            .track_event(
                &request,
                &HitOptions::default(),
                &EventOptions {
                    name: "signup".to_string(),
                    duration_seconds: 4,
                    meta: vec![("plan".to_string(), "pro".to_string())],
                },
            )
            .unwrap();
        assert_eq!(event.name, "signup");

        tracker.buffer().flush().unwrap();
        assert_eq!(store.count("SELECT count(*) FROM event", &[]).unwrap(), 1);
    }

    #[test]
    fn test_failed_flush_keeps_hit_buffered() {
        let store = Arc::new(FlakyStore::failing());
        let tracker = Tracker::new(
            BotFilter::default(),
            true,
            HitBuilder::new("secret", None),
            SessionCache::new(None, chrono::Duration::minutes(30), 100),
            Arc::new(HitBuffer::new(1, store.clone())),
        );
        let headers = headers(CHROME);
        let uri: Uri = "/pricing".parse().unwrap();
        let request = RequestMeta::new(&headers, &uri, None);

        assert!(tracker
            .track_hit(&request, &HitOptions::default())
            .is_some());
        assert_eq!(tracker.buffer().len(), 1);

        store.healthy.store(true, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(tracker.buffer().flush().unwrap(), 1);
        assert_eq!(store.count("SELECT count(*) FROM hit", &[]).unwrap(), 1);
    }
}
