//! Relay engine: the protocol side of a streaming session.
//!
//! The engine owns the shared pieces every session needs (admission policy,
//! storage, lifecycle hooks, and the live-event bus). Each websocket session
//! runs in its own task (see [`session`]) and calls back into the engine for
//! every inbound `EVENT`, `REQ` and `COUNT`.

pub mod message;
pub mod session;
pub mod subscription;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use gatehouse_core::metrics::{
    self, EVENTS_DUPLICATE_TOTAL, EVENTS_INVALID_TOTAL, EVENTS_RECEIVED_TOTAL, EVENTS_STORED_TOTAL,
};
use gatehouse_core::{AdmissionPolicy, Event, Filter, Verdict};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::store::{EventStore, SaveOutcome, StoreResult};

/// Capacity of the live-event bus. Slow sessions that fall further behind
/// than this skip events.
pub const BROADCAST_CAPACITY: usize = 1024;

pub const MSG_DUPLICATE: &str = "duplicate: already have this event";
pub const MSG_SUPERSEDED: &str = "duplicate: have a newer version";
pub const MSG_STORE_FAILED: &str = "error: could not store event";

/// Callbacks the engine fires around connections and stored events.
///
/// Implementations must be cheap and must not fail. They run inline on
/// whichever thread drives the session, possibly many at once.
pub trait LifecycleHooks: Send + Sync {
    /// A streaming session opened.
    fn on_connect(&self, remote: SocketAddr);

    /// A streaming session closed.
    fn on_disconnect(&self, remote: SocketAddr);

    /// An event was newly written to storage.
    fn on_event_persisted(&self, kind: u16, pubkey: &str);
}

/// Shared protocol engine. One instance serves every session.
pub struct RelayEngine {
    policy: AdmissionPolicy,
    store: Arc<dyn EventStore>,
    hooks: Arc<dyn LifecycleHooks>,
    bus: broadcast::Sender<Arc<Event>>,
}

impl RelayEngine {
    pub fn new(
        policy: AdmissionPolicy,
        store: Arc<dyn EventStore>,
        hooks: Arc<dyn LifecycleHooks>,
    ) -> Self {
        let (bus, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            policy,
            store,
            hooks,
            bus,
        }
    }

    pub fn policy(&self) -> &AdmissionPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn hooks(&self) -> &Arc<dyn LifecycleHooks> {
        &self.hooks
    }

    /// Receive every event accepted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Event>> {
        self.bus.subscribe()
    }

    /// Handle the payload of an `EVENT` message and build the `OK` reply.
    pub fn handle_event(&self, raw: &Value) -> Value {
        metrics::increment(EVENTS_RECEIVED_TOTAL, 1);

        match Event::from_json_verified(&raw.to_string()) {
            Ok(event) => self.admit(event),
            Err(e) => {
                metrics::increment(EVENTS_INVALID_TOTAL, 1);
                let id = raw.get("id").and_then(Value::as_str).unwrap_or_default();
                tracing::debug!(event_id = %id, error = %e, "invalid event");
                message::ok(id, false, &format!("invalid: {e}"))
            }
        }
    }

    /// Run a verified event through the admission policy and storage.
    pub fn admit(&self, event: Event) -> Value {
        if let Verdict::Reject(rejection) = self.policy.evaluate(&event) {
            metrics::record_rejection(&rejection);
            tracing::debug!(
                event_id = %event.id,
                kind = event.kind,
                rule = rejection.label(),
                "event rejected by policy"
            );
            return message::ok(&event.id, false, &rejection.to_string());
        }

        if event.is_ephemeral() {
            let reply = message::ok(&event.id, true, "");
            self.publish(event);
            return reply;
        }

        match self.store.save(&event) {
            Ok(outcome) if outcome.is_new() => {
                // Only a stored request may remove anything.
                if event.is_deletion() {
                    self.apply_deletion(&event);
                }
                metrics::increment(EVENTS_STORED_TOTAL, 1);
                self.hooks.on_event_persisted(event.kind, &event.pubkey);
                let reply = message::ok(&event.id, true, "");
                self.publish(event);
                reply
            }
            Ok(SaveOutcome::Superseded) => {
                metrics::increment(EVENTS_DUPLICATE_TOTAL, 1);
                message::ok(&event.id, true, MSG_SUPERSEDED)
            }
            Ok(_) => {
                metrics::increment(EVENTS_DUPLICATE_TOTAL, 1);
                message::ok(&event.id, true, MSG_DUPLICATE)
            }
            Err(e) => {
                tracing::error!(event_id = %event.id, error = %e, "failed to store event");
                message::ok(&event.id, false, MSG_STORE_FAILED)
            }
        }
    }

    /// Stored events matching any of `filters`, deduplicated, newest first.
    pub fn query(&self, filters: &[Filter]) -> StoreResult<Vec<Event>> {
        let mut seen = HashSet::new();
        let mut events = Vec::new();
        for filter in filters {
            for event in self.store.query(filter)? {
                if seen.insert(event.id.clone()) {
                    events.push(event);
                }
            }
        }
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(events)
    }

    /// Sum of per-filter counts.
    pub fn count(&self, filters: &[Filter]) -> StoreResult<u64> {
        filters
            .iter()
            .try_fold(0u64, |total, f| Ok(total + self.store.count(f)?))
    }

    fn publish(&self, event: Event) {
        // No receivers just means no open sessions.
        let _ = self.bus.send(Arc::new(event));
    }

    /// Remove events referenced by a deletion request, limited to the
    /// requester's own events.
    fn apply_deletion(&self, request: &Event) {
        for id in request.tag_values("e") {
            match self.store.get(id) {
                Ok(Some(target)) if target.pubkey == request.pubkey && !target.is_deletion() => {
                    if let Err(e) = self.store.delete(id) {
                        tracing::warn!(event_id = %id, error = %e, "deletion failed");
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(event_id = %id, error = %e, "deletion lookup failed"),
            }
        }

        for address in request.tag_values("a") {
            let Some(filter) = address_filter(address, request) else {
                continue;
            };
            let result = self.store.query(&filter).and_then(|targets| {
                for target in targets {
                    self.store.delete(&target.id)?;
                }
                Ok(())
            });
            if let Err(e) = result {
                tracing::warn!(address = %address, error = %e, "deletion failed");
            }
        }
    }
}

/// Filter for `<kind>:<pubkey>:<d>` coordinates owned by the requester,
/// bounded by the request's timestamp.
fn address_filter(address: &str, request: &Event) -> Option<Filter> {
    let mut parts = address.splitn(3, ':');
    let kind: u16 = parts.next()?.parse().ok()?;
    let pubkey = parts.next()?;
    let d = parts.next().unwrap_or("");
    if pubkey != request.pubkey {
        return None;
    }

    let filter = Filter::new()
        .kinds([kind])
        .authors([pubkey])
        .until(request.created_at);
    Some(if (30000..40000).contains(&kind) {
        filter.tag("d", [d])
    } else {
        filter
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::{SqliteStore, StoreError};
    use nostr::{EventBuilder, JsonUtil, Keys};
    use parking_lot::Mutex;
    use serde_json::json;

    /// Hooks that record every call.
    #[derive(Default)]
    pub(crate) struct RecordingHooks {
        pub connects: Mutex<Vec<SocketAddr>>,
        pub disconnects: Mutex<Vec<SocketAddr>>,
        pub persisted: Mutex<Vec<(u16, String)>>,
    }

    impl LifecycleHooks for RecordingHooks {
        fn on_connect(&self, remote: SocketAddr) {
            self.connects.lock().push(remote);
        }

        fn on_disconnect(&self, remote: SocketAddr) {
            self.disconnects.lock().push(remote);
        }

        fn on_event_persisted(&self, kind: u16, pubkey: &str) {
            self.persisted.lock().push((kind, pubkey.to_string()));
        }
    }

    pub(crate) fn engine_with(policy: AdmissionPolicy) -> (RelayEngine, Arc<RecordingHooks>) {
        let hooks = Arc::new(RecordingHooks::default());
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        (RelayEngine::new(policy, store, hooks.clone()), hooks)
    }

    pub(crate) fn unsigned(seed: char, kind: u16, created_at: u64, tags: &[&[&str]]) -> Event {
        Event {
            id: seed.to_string().repeat(64),
            pubkey: "a".repeat(64),
            created_at,
            kind,
            tags: tags
                .iter()
                .map(|t| t.iter().map(|s| s.to_string()).collect())
                .collect(),
            content: "hello".to_string(),
            sig: "0".repeat(128),
        }
    }

    fn signed_json(content: &str) -> Value {
        let keys = Keys::generate();
        let event = EventBuilder::text_note(content)
            .sign_with_keys(&keys)
            .unwrap();
        serde_json::from_str(&event.as_json()).unwrap()
    }

    #[test]
    fn signed_event_is_stored_once() {
        let (engine, hooks) = engine_with(AdmissionPolicy::default());
        let raw = signed_json("hello");
        let id = raw["id"].as_str().unwrap().to_string();

        assert_eq!(engine.handle_event(&raw), json!(["OK", id, true, ""]));
        assert_eq!(
            engine.handle_event(&raw),
            json!(["OK", id, true, MSG_DUPLICATE])
        );
        assert_eq!(hooks.persisted.lock().len(), 1);
        assert_eq!(hooks.persisted.lock()[0].0, 1);
    }

    #[test]
    fn tampered_event_is_invalid() {
        let (engine, hooks) = engine_with(AdmissionPolicy::default());
        let mut raw = signed_json("hello");
        raw["content"] = json!("tampered");

        let reply = engine.handle_event(&raw);
        assert_eq!(reply[0], "OK");
        assert_eq!(reply[1], raw["id"]);
        assert_eq!(reply[2], false);
        assert!(reply[3].as_str().unwrap().starts_with("invalid: "));
        assert!(hooks.persisted.lock().is_empty());
    }

    #[test]
    fn policy_rejection_is_reported_and_not_stored() {
        let (engine, hooks) = engine_with(AdmissionPolicy::new(gatehouse_core::PolicyLimits {
            allowed_kinds: vec![1, 30023],
            ..Default::default()
        }));
        let event = unsigned('1', 9999, 100, &[]);

        assert_eq!(
            engine.admit(event.clone()),
            json!([
                "OK",
                event.id,
                false,
                "blocked: event kind 9999 not allowed, allowed kinds: [1 30023]"
            ])
        );
        assert!(hooks.persisted.lock().is_empty());
        assert_eq!(engine.store().count(&Filter::new()).unwrap(), 0);
    }

    #[test]
    fn ephemeral_events_are_broadcast_not_stored() {
        let (engine, hooks) = engine_with(AdmissionPolicy::default());
        let mut live = engine.subscribe();
        let event = unsigned('1', 20001, 100, &[]);

        assert_eq!(engine.admit(event.clone())[2], true);
        assert_eq!(live.try_recv().unwrap().id, event.id);
        assert_eq!(engine.store().count(&Filter::new()).unwrap(), 0);
        assert!(hooks.persisted.lock().is_empty());
    }

    #[test]
    fn accepted_events_reach_live_subscribers() {
        let (engine, _) = engine_with(AdmissionPolicy::default());
        let mut live = engine.subscribe();
        let event = unsigned('1', 1, 100, &[]);

        engine.admit(event.clone());
        engine.admit(event.clone());

        assert_eq!(live.try_recv().unwrap().id, event.id);
        assert!(live.try_recv().is_err(), "duplicates are not re-broadcast");
    }

    #[test]
    fn superseded_replaceable() {
        let (engine, hooks) = engine_with(AdmissionPolicy::default());
        engine.admit(unsigned('2', 0, 200, &[]));
        let old = unsigned('1', 0, 100, &[]);

        assert_eq!(
            engine.admit(old.clone()),
            json!(["OK", old.id, true, MSG_SUPERSEDED])
        );
        assert_eq!(hooks.persisted.lock().len(), 1);
    }

    #[test]
    fn deletion_removes_own_events_only() {
        let (engine, _) = engine_with(AdmissionPolicy::default());
        let mine = unsigned('1', 1, 100, &[]);
        let mut theirs = unsigned('2', 1, 100, &[]);
        theirs.pubkey = "b".repeat(64);
        engine.admit(mine.clone());
        engine.admit(theirs.clone());

        let request = unsigned('3', 5, 200, &[&["e", &mine.id], &["e", &theirs.id]]);
        assert_eq!(engine.admit(request.clone())[2], true);

        let store = engine.store();
        assert_eq!(store.get(&mine.id).unwrap(), None);
        assert!(store.get(&theirs.id).unwrap().is_some());
        assert!(store.get(&request.id).unwrap().is_some());
    }

    /// Store that refuses to write deletion requests.
    struct RejectDeletions(SqliteStore);

    impl EventStore for RejectDeletions {
        fn save(&self, event: &Event) -> StoreResult<SaveOutcome> {
            if event.is_deletion() {
                return Err(StoreError::Database(rusqlite::Error::InvalidQuery));
            }
            self.0.save(event)
        }

        fn query(&self, filter: &Filter) -> StoreResult<Vec<Event>> {
            self.0.query(filter)
        }

        fn count(&self, filter: &Filter) -> StoreResult<u64> {
            self.0.count(filter)
        }

        fn get(&self, id: &str) -> StoreResult<Option<Event>> {
            self.0.get(id)
        }

        fn delete(&self, id: &str) -> StoreResult<bool> {
            self.0.delete(id)
        }
    }

    #[test]
    fn failed_deletion_request_removes_nothing() {
        let hooks = Arc::new(RecordingHooks::default());
        let store = Arc::new(RejectDeletions(SqliteStore::in_memory().unwrap()));
        let engine = RelayEngine::new(AdmissionPolicy::default(), store, hooks.clone());
        let mut live = engine.subscribe();

        let mine = unsigned('1', 1, 100, &[]);
        engine.admit(mine.clone());
        assert_eq!(live.try_recv().unwrap().id, mine.id);

        let request = unsigned('3', 5, 200, &[&["e", &mine.id]]);
        assert_eq!(
            engine.admit(request.clone()),
            json!(["OK", request.id, false, MSG_STORE_FAILED])
        );

        assert!(engine.store().get(&mine.id).unwrap().is_some());
        assert_eq!(hooks.persisted.lock().len(), 1);
        assert!(live.try_recv().is_err());
    }

    #[test]
    fn deletion_by_address() {
        let (engine, _) = engine_with(AdmissionPolicy::default());
        let article = unsigned('1', 30023, 100, &[&["d", "post"]]);
        let other = unsigned('2', 30023, 100, &[&["d", "other"]]);
        engine.admit(article.clone());
        engine.admit(other.clone());

        let address = format!("30023:{}:post", "a".repeat(64));
        engine.admit(unsigned('3', 5, 200, &[&["a", &address]]));

        assert_eq!(engine.store().get(&article.id).unwrap(), None);
        assert!(engine.store().get(&other.id).unwrap().is_some());
    }

    #[test]
    fn query_dedupes_across_filters() {
        let (engine, _) = engine_with(AdmissionPolicy::default());
        engine.admit(unsigned('1', 1, 100, &[]));
        engine.admit(unsigned('2', 7, 200, &[]));

        let events = engine
            .query(&[Filter::new().kinds([1, 7]), Filter::new().kinds([1])])
            .unwrap();
        let times: Vec<u64> = events.iter().map(|e| e.created_at).collect();
        assert_eq!(times, vec![200, 100]);

        assert_eq!(engine.count(&[Filter::new().kinds([7])]).unwrap(), 1);
    }
}
