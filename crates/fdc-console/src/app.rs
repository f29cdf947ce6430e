use std::collections::{HashMap, HashSet};

use fdc_core::wire::{
    Msg, ReplyPayload, SearchLogsReply, SubscribeLogsReply, CALL_SEARCH_LOGS, CALL_SEND_STDIN,
    CALL_SUBSCRIBE_LOGS,
};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::commands::CommandDispatcher;
use crate::filter::FilterEngine;
use crate::logs::LogAction;
use crate::registry::Registry;
use crate::transport::LinkEvent;
use crate::view::{project_row, EntityRow};

/// Connection state, surfaced as a persistent header indicator rather than an
/// error: the registry stays intact across drops and a fresh snapshot
/// re-applies idempotently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnStatus {
    Connecting,
    Connected,
    Closed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    /// Collecting a log-search query.
    Search(String),
    /// Collecting a stdin line for the selected entity.
    Stdin(String),
}

/// Request/reply calls awaiting their correlated reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingRequest {
    SubscribeLogs { identity: String },
    SearchLogs { query: String },
    SendStdin { identity: String },
}

/// The engine: owns the registry, filter, subscription and pending-request
/// state, and is the single consumer of link events. All mutation entry
/// points run to completion on one task, so idempotency against repeated or
/// out-of-order delivery is the only discipline required.
pub struct App {
    pub registry: Registry,
    pub filter: FilterEngine,
    pub dispatcher: CommandDispatcher,
    pub pending: HashMap<String, PendingRequest>,
    pub conn: ConnStatus,
    /// Highlight cursor over the visible list.
    pub cursor: usize,
    /// Entity whose detail panel is shown.
    pub selected: Option<String>,
    /// Detail panels in creation order; panels are never torn down.
    pub opened_details: Vec<String>,
    rows: HashMap<String, EntityRow>,
    pub input: InputMode,
    pub search_note: Option<String>,
    pub notice: Option<String>,
    pub help_open: bool,
}

impl App {
    pub fn new(dispatcher: CommandDispatcher) -> Self {
        Self {
            registry: Registry::default(),
            filter: FilterEngine::default(),
            dispatcher,
            pending: HashMap::new(),
            conn: ConnStatus::Connecting,
            cursor: 0,
            selected: None,
            opened_details: Vec::new(),
            rows: HashMap::new(),
            input: InputMode::Normal,
            search_note: None,
            notice: None,
            help_open: false,
        }
    }

    pub fn connected(&self) -> bool {
        self.conn == ConnStatus::Connected
    }

    // ---- event router ------------------------------------------------

    pub fn apply_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Connected => {
                self.conn = ConnStatus::Connected;
                self.notice = Some("connected".to_string());
            }
            LinkEvent::Closed { reason } => {
                self.conn = ConnStatus::Closed {
                    reason: reason.clone(),
                };
                self.fail_pending(&reason);
                self.notice = Some(format!("link closed: {reason}"));
            }
            LinkEvent::Push(msg) => self.route_push(msg),
            LinkEvent::Reply {
                request_id,
                payload,
            } => self.apply_reply(&request_id, payload),
        }
    }

    fn route_push(&mut self, msg: Msg) {
        match msg {
            Msg::NewEntity(payload) => {
                let record = self.registry.upsert(&payload);
                self.filter.refresh(record);
            }
            Msg::Snapshot(snapshot) => {
                // a snapshot is exactly N lifecycle events, in order
                for payload in &snapshot.entities {
                    let record = self.registry.upsert(payload);
                    self.filter.refresh(record);
                }
            }
            Msg::EntityUpdated(payload) | Msg::EntityStatus(payload) => {
                let routable = self
                    .registry
                    .get(&payload.identity)
                    .is_some_and(|record| !record.removed);
                if routable {
                    self.registry.upsert(&payload);
                } else {
                    // push ordering is not guaranteed relative to the
                    // snapshot; merges for identities we do not know yet
                    // (or no longer route to) are dropped
                    debug!(event = "push_dropped", identity = %payload.identity);
                }
            }
            Msg::EntityRemoved(entity) => {
                self.registry.remove(&entity.identity);
            }
            Msg::Log(log) => {
                let appended = match self.registry.get_mut(&log.identity) {
                    Some(record) if !record.removed => Some(record.logs.append(&log.line)),
                    _ => None,
                };
                match appended {
                    Some(true) => self.registry.mark_dirty(&log.identity),
                    Some(false) => {
                        debug!(event = "log_dropped", identity = %log.identity, reason = "not_streaming")
                    }
                    None => debug!(event = "log_dropped", identity = %log.identity, reason = "unknown"),
                }
            }
            // replies are routed by the link loop, and client-only kinds
            // never arrive inbound
            Msg::Reply(_) | Msg::Request(_) | Msg::Command(_) => {}
        }
    }

    fn apply_reply(&mut self, request_id: &str, payload: ReplyPayload) {
        let Some(pending) = self.pending.remove(request_id) else {
            warn!(event = "reply_unknown_request", request_id);
            return;
        };
        match pending {
            PendingRequest::SubscribeLogs { identity } => {
                self.apply_subscribe_reply(&identity, payload)
            }
            PendingRequest::SearchLogs { query } => self.apply_search_reply(&query, payload),
            PendingRequest::SendStdin { identity } => match payload.into_result() {
                Ok(_) => info!(event = "stdin_delivered", identity = %identity),
                Err(err) => {
                    self.notice = Some(format!("stdin to {identity} failed: {}", err.message));
                }
            },
        }
    }

    fn apply_subscribe_reply(&mut self, identity: &str, payload: ReplyPayload) {
        let data = match payload.into_result() {
            Ok(data) => data,
            Err(err) => {
                if let Some(record) = self.registry.get_mut(identity) {
                    record.logs.fail_acquisition();
                }
                self.notice = Some(format!("logs unavailable for {identity}: {}", err.message));
                return;
            }
        };
        let reply: SubscribeLogsReply = match serde_json::from_value(data) {
            Ok(reply) => reply,
            Err(err) => {
                warn!(event = "subscribe_reply_malformed", identity, error = %err);
                if let Some(record) = self.registry.get_mut(identity) {
                    record.logs.fail_acquisition();
                }
                return;
            }
        };
        let seeded = match self.registry.get_mut(identity) {
            Some(record) => {
                record.logs.seed(&reply.stream);
                true
            }
            None => false,
        };
        if seeded {
            self.registry.mark_dirty(identity);
        }
    }

    fn apply_search_reply(&mut self, query: &str, payload: ReplyPayload) {
        let data = match payload.into_result() {
            Ok(data) => data,
            Err(err) => {
                // filter untouched; retry is just another search
                self.notice = Some(format!("search failed: {} ({})", err.message, err.code));
                return;
            }
        };
        let reply: SearchLogsReply = match serde_json::from_value(data) {
            Ok(reply) => reply,
            Err(err) => {
                warn!(event = "search_reply_malformed", error = %err);
                return;
            }
        };
        let allow: HashSet<String> = reply.entities.into_iter().collect();
        self.filter.set_filter(Some(allow), &mut self.registry);
        self.search_note = Some(format!("search: {query}"));
    }

    /// The link dropped: nothing pending can ever complete. Subscriptions
    /// that were mid-acquisition revert so the next click retries.
    fn fail_pending(&mut self, reason: &str) {
        for (_, pending) in self.pending.drain() {
            if let PendingRequest::SubscribeLogs { identity } = pending {
                debug!(event = "pending_failed", identity = %identity, reason);
                if let Some(record) = self.registry.get_mut(&identity) {
                    record.logs.fail_acquisition();
                }
            }
        }
    }

    // ---- projection ----------------------------------------------------

    /// Recomputes rows for identities touched since the last frame. Only
    /// `set_filter` ever marks the whole registry.
    pub fn refresh_projection(&mut self) {
        for identity in self.registry.take_dirty() {
            match self.registry.get(&identity) {
                Some(record) => {
                    self.rows.insert(identity, project_row(record));
                }
                None => {
                    self.rows.remove(&identity);
                }
            }
        }
    }

    /// Visible, non-removed rows in insertion order.
    pub fn visible_rows(&self) -> Vec<&EntityRow> {
        self.registry
            .all()
            .filter(|record| record.visible && !record.removed)
            .filter_map(|record| self.rows.get(&record.identity))
            .collect()
    }

    // ---- user actions ----------------------------------------------------

    pub fn move_cursor(&mut self, step: i32) {
        let count = self.visible_rows().len();
        if count == 0 {
            self.cursor = 0;
            return;
        }
        let current = self.cursor.min(count - 1) as i32;
        self.cursor = (current + step).clamp(0, count as i32 - 1) as usize;
    }

    pub fn cursor_identity(&self) -> Option<String> {
        let rows = self.visible_rows();
        rows.get(self.cursor.min(rows.len().checked_sub(1)?))
            .map(|row| row.identity.clone())
    }

    /// Select an entity; its detail panel is materialized lazily, exactly
    /// once, and never destroyed afterwards.
    pub fn open_detail(&mut self, identity: &str) {
        if self.registry.get(identity).is_none() {
            return;
        }
        self.selected = Some(identity.to_string());
        let first_open = match self.registry.get_mut(identity) {
            Some(record) if !record.detail_opened => {
                record.detail_opened = true;
                true
            }
            _ => false,
        };
        if first_open {
            self.opened_details.push(identity.to_string());
            self.registry.mark_dirty(identity);
        }
    }

    pub fn request_logs(&mut self, identity: &str) {
        let action = match self.registry.get_mut(identity) {
            Some(record) if !record.removed => record.logs.request(),
            _ => return,
        };
        match action {
            LogAction::Acquire => {
                match self
                    .dispatcher
                    .request(CALL_SUBSCRIBE_LOGS, json!({ "identity": identity }))
                {
                    Ok(request_id) => {
                        if let Some(record) = self.registry.get_mut(identity) {
                            record.logs.begin_acquisition();
                        }
                        self.pending.insert(
                            request_id,
                            PendingRequest::SubscribeLogs {
                                identity: identity.to_string(),
                            },
                        );
                    }
                    Err(err) => self.notice = Some(err.notice().to_string()),
                }
            }
            LogAction::AlreadyPending => {}
            LogAction::TogglePanel => self.registry.mark_dirty(identity),
        }
    }

    pub fn terminate(&mut self, identity: &str, hard: bool) {
        if !self.connected() {
            self.notice = Some("link offline; command unavailable".to_string());
            return;
        }
        match self.dispatcher.terminate(identity, hard) {
            Ok(()) => {
                let verb = if hard { "kill" } else { "terminate" };
                self.notice = Some(format!("{verb} sent for {identity}"));
            }
            Err(err) => self.notice = Some(err.notice().to_string()),
        }
    }

    /// Empty query clears the filter locally; anything else goes to the
    /// controller and the reply's identity set becomes the allow-set.
    pub fn submit_search(&mut self, query: &str) {
        let query = query.trim();
        if query.is_empty() {
            self.filter.set_filter(None, &mut self.registry);
            self.search_note = None;
            return;
        }
        match self
            .dispatcher
            .request(CALL_SEARCH_LOGS, json!({ "query": query }))
        {
            Ok(request_id) => {
                self.pending.insert(
                    request_id,
                    PendingRequest::SearchLogs {
                        query: query.to_string(),
                    },
                );
            }
            Err(err) => self.notice = Some(err.notice().to_string()),
        }
    }

    pub fn submit_stdin(&mut self, identity: &str, line: &str) {
        match self
            .dispatcher
            .request(CALL_SEND_STDIN, json!({ "identity": identity, "line": line }))
        {
            Ok(request_id) => {
                self.pending.insert(
                    request_id,
                    PendingRequest::SendStdin {
                        identity: identity.to_string(),
                    },
                );
            }
            Err(err) => self.notice = Some(err.notice().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Outbound;
    use crate::logs::LogSubscription;
    use fdc_core::wire::{EntityPayload, EntityRef, LogLine, ReplyError, SnapshotPayload};
    use fdc_core::EntityStatus;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    fn new_app() -> (App, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(16);
        let mut app = App::new(CommandDispatcher::new(tx));
        app.apply_link_event(LinkEvent::Connected);
        (app, rx)
    }

    fn entity(identity: &str, status: EntityStatus, fields: &[(&str, Value)]) -> EntityPayload {
        let mut attributes = serde_json::Map::new();
        for (key, value) in fields {
            attributes.insert(key.to_string(), value.clone());
        }
        EntityPayload {
            identity: identity.to_string(),
            status: Some(status),
            attributes,
        }
    }

    fn take_request_id(rx: &mut mpsc::Receiver<Outbound>) -> String {
        match rx.try_recv().expect("one outbound request") {
            Outbound::Request { request_id, .. } => request_id,
            other => panic!("unexpected outbound: {other:?}"),
        }
    }

    fn ok_reply(data: Value) -> ReplyPayload {
        ReplyPayload { data, error: None }
    }

    fn err_reply(code: u32, message: &str) -> ReplyPayload {
        ReplyPayload {
            data: Value::Null,
            error: Some(ReplyError {
                code,
                message: message.to_string(),
            }),
        }
    }

    #[test]
    fn snapshot_equals_sequential_lifecycle_events() {
        let (mut bulk, _rx_a) = new_app();
        let entities = vec![
            entity("a", EntityStatus::Running, &[("game", json!("tanks"))]),
            entity("b", EntityStatus::Loading, &[]),
            entity("c", EntityStatus::Stopped, &[("version", json!("2"))]),
        ];
        bulk.apply_link_event(LinkEvent::Push(Msg::Snapshot(SnapshotPayload {
            entities: entities.clone(),
        })));

        let (mut one_by_one, _rx_b) = new_app();
        for payload in entities {
            one_by_one.apply_link_event(LinkEvent::Push(Msg::NewEntity(payload)));
        }

        let left: Vec<_> = bulk.registry.all().collect();
        let right: Vec<_> = one_by_one.registry.all().collect();
        assert_eq!(left, right);
    }

    #[test]
    fn status_push_for_unknown_identity_is_dropped() {
        let (mut app, _rx) = new_app();
        app.apply_link_event(LinkEvent::Push(Msg::EntityStatus(entity(
            "ghost",
            EntityStatus::Error,
            &[],
        ))));
        assert!(app.registry.get("ghost").is_none());
    }

    #[test]
    fn log_push_for_unknown_identity_has_no_effect() {
        let (mut app, _rx) = new_app();
        app.apply_link_event(LinkEvent::Push(Msg::Log(LogLine {
            identity: "ghost".to_string(),
            line: "noise".to_string(),
        })));
        assert!(app.registry.is_empty());
    }

    #[test]
    fn rapid_log_requests_issue_exactly_one_acquisition() {
        let (mut app, mut rx) = new_app();
        app.apply_link_event(LinkEvent::Push(Msg::NewEntity(entity(
            "s1",
            EntityStatus::Running,
            &[],
        ))));

        app.request_logs("s1");
        app.request_logs("s1");

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err(), "second request must be suppressed");
        assert_eq!(
            app.registry.get("s1").unwrap().logs,
            LogSubscription::Subscribing
        );
    }

    #[test]
    fn failed_acquisition_reverts_and_allows_retry() {
        let (mut app, mut rx) = new_app();
        app.apply_link_event(LinkEvent::Push(Msg::NewEntity(entity(
            "s1",
            EntityStatus::Running,
            &[],
        ))));

        app.request_logs("s1");
        let request_id = take_request_id(&mut rx);
        app.apply_link_event(LinkEvent::Reply {
            request_id,
            payload: err_reply(404, "No logs could be seen"),
        });

        assert_eq!(
            app.registry.get("s1").unwrap().logs,
            LogSubscription::Unsubscribed
        );
        assert!(app.notice.as_deref().unwrap_or("").contains("s1"));

        // the retry issues a fresh request
        app.request_logs("s1");
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn link_drop_fails_inflight_acquisitions() {
        let (mut app, mut rx) = new_app();
        app.apply_link_event(LinkEvent::Push(Msg::NewEntity(entity(
            "s1",
            EntityStatus::Running,
            &[],
        ))));
        app.request_logs("s1");
        let _ = take_request_id(&mut rx);

        app.apply_link_event(LinkEvent::Closed {
            reason: "read failed".to_string(),
        });

        assert!(app.pending.is_empty());
        assert_eq!(
            app.registry.get("s1").unwrap().logs,
            LogSubscription::Unsubscribed
        );
        assert!(matches!(app.conn, ConnStatus::Closed { .. }));
    }

    #[test]
    fn terminate_changes_nothing_until_status_push_arrives() {
        let (mut app, mut rx) = new_app();
        app.apply_link_event(LinkEvent::Push(Msg::NewEntity(entity(
            "s1",
            EntityStatus::Running,
            &[("game", json!("tanks"))],
        ))));
        app.refresh_projection();
        let before = app.registry.get("s1").unwrap().clone();

        app.terminate("s1", false);
        assert!(matches!(rx.try_recv(), Ok(Outbound::Command { .. })));
        assert_eq!(app.registry.get("s1").unwrap(), &before);

        app.apply_link_event(LinkEvent::Push(Msg::EntityStatus(entity(
            "s1",
            EntityStatus::Stopped,
            &[],
        ))));
        app.refresh_projection();
        let rows = app.visible_rows();
        assert_eq!(rows[0].status, EntityStatus::Stopped);
        assert_eq!(
            app.registry.get("s1").unwrap().attribute_str("game"),
            Some("tanks")
        );
    }

    #[test]
    fn search_reply_filters_without_data_loss_and_clear_restores() {
        let (mut app, mut rx) = new_app();
        for identity in ["a", "b"] {
            app.apply_link_event(LinkEvent::Push(Msg::NewEntity(entity(
                identity,
                EntityStatus::Running,
                &[],
            ))));
        }

        app.submit_search("panic");
        let request_id = take_request_id(&mut rx);
        app.apply_link_event(LinkEvent::Reply {
            request_id,
            payload: ok_reply(json!({ "entities": ["a"] })),
        });
        app.refresh_projection();

        let visible: Vec<&str> = app
            .visible_rows()
            .iter()
            .map(|row| row.identity.as_str())
            .collect();
        assert_eq!(visible, vec!["a"]);
        assert_eq!(app.registry.len(), 2);

        // empty query clears locally, no wire traffic
        app.submit_search("");
        assert!(rx.try_recv().is_err());
        app.refresh_projection();
        assert_eq!(app.visible_rows().len(), 2);
        assert_eq!(app.search_note, None);
    }

    #[test]
    fn search_failure_leaves_filter_untouched() {
        let (mut app, mut rx) = new_app();
        app.apply_link_event(LinkEvent::Push(Msg::NewEntity(entity(
            "a",
            EntityStatus::Running,
            &[],
        ))));
        app.submit_search("panic");
        let request_id = take_request_id(&mut rx);
        app.apply_link_event(LinkEvent::Reply {
            request_id,
            payload: err_reply(500, "index offline"),
        });
        app.refresh_projection();

        assert!(!app.filter.is_active());
        assert_eq!(app.visible_rows().len(), 1);
        assert!(app.notice.as_deref().unwrap_or("").contains("search failed"));
    }

    #[test]
    fn hidden_entities_keep_receiving_status_merges() {
        let (mut app, mut rx) = new_app();
        for identity in ["a", "b"] {
            app.apply_link_event(LinkEvent::Push(Msg::NewEntity(entity(
                identity,
                EntityStatus::Running,
                &[],
            ))));
        }
        app.submit_search("only-a");
        let request_id = take_request_id(&mut rx);
        app.apply_link_event(LinkEvent::Reply {
            request_id,
            payload: ok_reply(json!({ "entities": ["a"] })),
        });

        app.apply_link_event(LinkEvent::Push(Msg::EntityStatus(entity(
            "b",
            EntityStatus::Error,
            &[],
        ))));
        assert_eq!(app.registry.get("b").unwrap().status, EntityStatus::Error);
        assert!(!app.registry.get("b").unwrap().visible);
    }

    #[test]
    fn removal_stops_routing_and_snapshot_revives() {
        let (mut app, _rx) = new_app();
        app.apply_link_event(LinkEvent::Push(Msg::NewEntity(entity(
            "s1",
            EntityStatus::Running,
            &[],
        ))));
        app.apply_link_event(LinkEvent::Push(Msg::EntityRemoved(EntityRef {
            identity: "s1".to_string(),
        })));
        app.refresh_projection();
        assert!(app.visible_rows().is_empty());

        // status pushes no longer reach the removed record
        app.apply_link_event(LinkEvent::Push(Msg::EntityStatus(entity(
            "s1",
            EntityStatus::Error,
            &[],
        ))));
        assert_eq!(app.registry.get("s1").unwrap().status, EntityStatus::Running);

        // a reconnect snapshot brings it back
        app.apply_link_event(LinkEvent::Push(Msg::Snapshot(SnapshotPayload {
            entities: vec![entity("s1", EntityStatus::Loading, &[])],
        })));
        app.refresh_projection();
        assert_eq!(app.visible_rows().len(), 1);
    }

    #[test]
    fn detail_panel_opens_exactly_once() {
        let (mut app, _rx) = new_app();
        app.apply_link_event(LinkEvent::Push(Msg::NewEntity(entity(
            "s1",
            EntityStatus::Running,
            &[],
        ))));
        app.open_detail("s1");
        app.open_detail("s1");
        assert_eq!(app.opened_details, vec!["s1".to_string()]);
        assert!(app.registry.get("s1").unwrap().detail_opened);
    }

    #[test]
    fn reply_for_unknown_request_is_dropped() {
        let (mut app, _rx) = new_app();
        app.apply_link_event(LinkEvent::Reply {
            request_id: "never-issued".to_string(),
            payload: ok_reply(json!({})),
        });
        assert!(app.pending.is_empty());
    }

    #[test]
    fn full_session_scenario() {
        let (mut app, mut rx) = new_app();

        // snapshot with one running entity
        app.apply_link_event(LinkEvent::Push(Msg::Snapshot(SnapshotPayload {
            entities: vec![entity("s1", EntityStatus::Running, &[("game", json!("tanks"))])],
        })));
        app.refresh_projection();
        let rows = app.visible_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].identity, "s1");
        assert_eq!(rows[0].status, EntityStatus::Running);

        // status flips to error; identity and attributes untouched
        app.apply_link_event(LinkEvent::Push(Msg::EntityStatus(entity(
            "s1",
            EntityStatus::Error,
            &[],
        ))));
        app.refresh_projection();
        assert_eq!(app.visible_rows()[0].status, EntityStatus::Error);
        assert_eq!(
            app.registry.get("s1").unwrap().attribute_str("game"),
            Some("tanks")
        );

        // acquire logs, seeded from the reply
        app.open_detail("s1");
        app.request_logs("s1");
        let request_id = take_request_id(&mut rx);
        app.apply_link_event(LinkEvent::Reply {
            request_id,
            payload: ok_reply(json!({ "stream": "boot ok" })),
        });
        let record = app.registry.get("s1").unwrap();
        assert!(record.logs.is_streaming());
        assert!(record.logs.panel_open());
        assert_eq!(record.logs.lines(), ["boot ok"]);

        // a live line appends in order
        app.apply_link_event(LinkEvent::Push(Msg::Log(LogLine {
            identity: "s1".to_string(),
            line: "crash".to_string(),
        })));
        assert_eq!(
            app.registry.get("s1").unwrap().logs.lines(),
            ["boot ok", "crash"]
        );
    }

    #[test]
    fn cursor_stays_in_bounds_as_rows_disappear() {
        let (mut app, _rx) = new_app();
        for identity in ["a", "b", "c"] {
            app.apply_link_event(LinkEvent::Push(Msg::NewEntity(entity(
                identity,
                EntityStatus::Running,
                &[],
            ))));
        }
        app.refresh_projection();
        app.move_cursor(2);
        assert_eq!(app.cursor_identity().as_deref(), Some("c"));

        app.apply_link_event(LinkEvent::Push(Msg::EntityRemoved(EntityRef {
            identity: "c".to_string(),
        })));
        app.refresh_projection();
        // record disappeared mid-session; the projection tolerates it
        assert_eq!(app.cursor_identity().as_deref(), Some("b"));
    }
}
