use serde_json::{Map, Value};
use tokio::sync::MutexGuard;
use tracing::{debug, error, info, warn};

use super::document::LiveDocument;
use super::hub::Hub;
use crate::models::{
    CheckMessage, ClientEvent, CursorBlurMessage, NotePermission, PermissionMessage, ServerEvent,
    UserChangedMessage, UserOut, UserStatusMessage,
};
use crate::services::note_service::StoreError;

/// Edit origins relayed to peers; anything else is dropped.
pub const ALLOWED_ORIGINS: &[&str] = &[
    "+input",
    "+delete",
    "+transpose",
    "paste",
    "cut",
    "undo",
    "redo",
    "drag",
    "*compose",
    "case",
    "+insertLine",
    "+swapLine",
    "+joinLines",
    "+duplicateLine",
    "+sortLines",
];

/// Whether a session may apply edit operations to a note.
pub fn may_edit(
    permission: NotePermission,
    owner: Option<&str>,
    login: bool,
    user_id: Option<&str>,
) -> bool {
    match permission {
        NotePermission::Freely => true,
        NotePermission::Editable => login,
        NotePermission::Locked => login && owner.is_some() && user_id == owner,
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl Hub {
    /// Apply one inbound client event.
    ///
    /// Events from a session whose note is not live are ignored.
    pub async fn handle_event(&self, session_id: &str, event: ClientEvent) {
        match event {
            ClientEvent::Version => {
                let version = self.settings.app_version.clone();
                self.sessions.send(session_id, ServerEvent::Version(version)).await;
            }
            // the transport runs the disconnect once the close is flushed
            ClientEvent::Disconnect => self.sessions.close(session_id).await,
            ClientEvent::UserChanged(data) => self.on_user_changed(session_id, data).await,
            ClientEvent::Permission(permission) => {
                self.on_permission(session_id, &permission).await
            }
            event => {
                let Some(cell) = self.document_of(session_id).await else {
                    debug!("Ignoring event from detached session {}", session_id);
                    return;
                };
                let doc = cell.state.lock().await;
                if doc.evicted {
                    return;
                }
                self.relay(session_id, doc, event).await;
            }
        }
    }

    async fn relay(&self, session_id: &str, mut doc: MutexGuard<'_, LiveDocument>, event: ClientEvent) {
        match event {
            ClientEvent::Refresh => {
                self.sessions.send(session_id, self.refresh_event(&doc)).await;
            }
            ClientEvent::Update(encoded) => {
                let body = match self.services.wire.decode(&encoded) {
                    Ok(body) => body,
                    Err(e) => {
                        warn!("Dropping undecodable update from {}: {}", session_id, e);
                        return;
                    }
                };
                if doc.replace_body(body, now_ms()) {
                    debug!("Note '{}' updated by {}", doc.id, session_id);
                }
                doc.broadcast(&ServerEvent::Check(CheckMessage {
                    id: session_id.to_string(),
                    hash: doc.hash.clone(),
                    updatetime: doc.update_time,
                }));
            }
            ClientEvent::UserStatus(data) => {
                let updated = match data {
                    Some(UserStatusMessage { idle, kind }) => {
                        self.sessions
                            .update(session_id, |s| {
                                s.idle = idle;
                                s.kind = kind;
                            })
                            .await
                    }
                    None => self.sessions.get(session_id).await.map(|s| s.user_out()),
                };
                if let Some(user) = updated {
                    doc.broadcast_except(session_id, &ServerEvent::UserStatus(user));
                }
            }
            ClientEvent::OnlineUsers => {
                if let Some(roster) = self.roster_event(&doc).await {
                    self.sessions.send(session_id, roster).await;
                }
            }
            ClientEvent::CursorFocus(cursor) => {
                if let Some(user) = self.set_cursor(session_id, cursor).await {
                    doc.broadcast_except(session_id, &ServerEvent::CursorFocus(user));
                }
            }
            ClientEvent::CursorActivity(cursor) => {
                if let Some(user) = self.set_cursor(session_id, cursor).await {
                    doc.broadcast_except(session_id, &ServerEvent::CursorActivity(user));
                }
            }
            ClientEvent::CursorBlur => {
                if self.set_cursor(session_id, Value::Null).await.is_some() {
                    let blur = ServerEvent::CursorBlur(CursorBlurMessage {
                        id: session_id.to_string(),
                    });
                    doc.broadcast_except(session_id, &blur);
                }
            }
            ClientEvent::Change(encoded) => self.relay_change(session_id, &mut doc, &encoded).await,
            ClientEvent::Version
            | ClientEvent::Disconnect
            | ClientEvent::UserChanged(_)
            | ClientEvent::Permission(_) => {}
        }
    }

    async fn set_cursor(&self, session_id: &str, cursor: Value) -> Option<UserOut> {
        let cursor = (!cursor.is_null()).then_some(cursor);
        self.sessions.update(session_id, |s| s.cursor = cursor).await
    }

    /// Stamp an edit operation with the token chain and send it to every
    /// attached session, sender included.
    async fn relay_change(&self, session_id: &str, doc: &mut LiveDocument, encoded: &str) {
        let Some(session) = self.sessions.get(session_id).await else {
            return;
        };
        if !may_edit(
            doc.permission,
            doc.owner.as_deref(),
            session.login,
            session.user_id.as_deref(),
        ) {
            debug!(
                "Dropping change from {} on {} note '{}'",
                session_id, doc.permission, doc.id
            );
            return;
        }

        let mut op: Map<String, Value> = match self
            .services
            .wire
            .decode(encoded)
            .ok()
            .and_then(|json| serde_json::from_str(&json).ok())
        {
            Some(op) => op,
            None => {
                warn!("Dropping malformed change from {}", session_id);
                return;
            }
        };

        let origin = op.get("origin").and_then(Value::as_str).unwrap_or_default();
        if !ALLOWED_ORIGINS.contains(&origin) {
            warn!(
                "Dropping change with origin '{}' from {} on note '{}'",
                origin, session_id, doc.id
            );
            return;
        }

        let (otk, nextotk) = doc.rotate_token();
        op.insert("id".to_string(), Value::String(session_id.to_string()));
        op.insert("otk".to_string(), Value::String(otk));
        op.insert("nextotk".to_string(), Value::String(nextotk));

        if let Some(payload) = self.encode_json(&op) {
            doc.broadcast(&ServerEvent::Change(payload));
        }
    }

    async fn on_user_changed(&self, session_id: &str, data: Option<UserChangedMessage>) {
        let Some(cell) = self.document_of(session_id).await else {
            debug!("Ignoring user change from detached session {}", session_id);
            return;
        };
        if let Some(token) = data.and_then(|d| d.token) {
            self.sessions
                .update(session_id, |s| s.credentials = Some(token))
                .await;
        }
        let Some(session) = self.sessions.get(session_id).await else {
            return;
        };

        let auth = self
            .services
            .identity
            .resolve(session.credentials.as_deref(), true)
            .await;
        self.sessions
            .update(session_id, |s| s.bind_identity(&auth))
            .await;
        info!(
            "Session {} is now {}",
            session_id,
            auth.user_id.as_deref().unwrap_or("a guest")
        );

        let doc = cell.state.lock().await;
        if doc.evicted {
            return;
        }
        if let Some(roster) = self.roster_event(&doc).await {
            doc.broadcast(&roster);
        }
    }

    async fn on_permission(&self, session_id: &str, requested: &str) {
        let Ok(permission) = requested.parse::<NotePermission>() else {
            warn!("Ignoring unknown permission '{}' from {}", requested, session_id);
            return;
        };
        let Some(session) = self.sessions.get(session_id).await else {
            return;
        };
        if !session.login {
            return;
        }
        let Some(cell) = self.document_of(session_id).await else {
            return;
        };

        let (note_id, previous) = {
            let mut doc = cell.state.lock().await;
            if doc.evicted {
                return;
            }
            if doc.owner.is_none() || doc.owner != session.user_id {
                debug!("Non-owner {} tried to change permission of '{}'", session_id, doc.id);
                return;
            }
            let previous = doc.permission;
            doc.permission = permission;
            (doc.id.clone(), previous)
        };

        let notes = &self.services.notes;
        let persisted = match notes.find(&note_id).await {
            Ok(Some(record)) => notes.update_permission(record, permission).await.map(|_| ()),
            Ok(None) => Err(StoreError::NotFound(note_id.clone())),
            Err(e) => Err(e),
        };

        let mut doc = cell.state.lock().await;
        match persisted {
            Ok(()) => {
                info!("Note '{}' is now {}", note_id, permission);
                if !doc.evicted {
                    doc.broadcast(&ServerEvent::Permission(PermissionMessage { permission }));
                }
            }
            Err(e) => {
                error!("Failed to persist permission of note '{}': {}", note_id, e);
                if doc.permission == permission {
                    doc.permission = previous;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::ws::session::Outbound;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn op(origin: &str) -> ClientEvent {
        ClientEvent::Change(change_payload(json!({
            "origin": origin,
            "from": {"line": 0, "ch": 0},
            "to": {"line": 0, "ch": 0},
            "text": ["x"],
        })))
    }

    #[test]
    fn permission_gate() {
        use NotePermission::*;
        assert!(may_edit(Freely, None, false, None));
        assert!(may_edit(Freely, Some("u1"), false, None));
        assert!(!may_edit(Editable, Some("u1"), false, None));
        assert!(may_edit(Editable, Some("u1"), true, Some("u2")));
        assert!(!may_edit(Locked, Some("u1"), true, Some("u2")));
        assert!(!may_edit(Locked, Some("u1"), false, None));
        assert!(!may_edit(Locked, None, true, None));
        assert!(may_edit(Locked, Some("u1"), true, Some("u1")));
    }

    #[tokio::test]
    async fn change_is_stamped_and_chains_tokens() {
        let (hub, store) = test_hub();
        let foo = seed_note(&store, None, "foo");
        let mut a = TestClient::join(&hub, &foo).await;
        let mut b = TestClient::join(&hub, &foo).await;
        a.drain();
        b.drain();

        let before = current_token(&hub, &foo).await;
        hub.handle_event(&a.id, op("+input")).await;
        let after = current_token(&hub, &foo).await;
        assert_ne!(before, after);

        let seen_by_a = a.changes();
        let seen_by_b = b.changes();
        assert_eq!(seen_by_a.len(), 1);
        assert_eq!(seen_by_a, seen_by_b);
        let change = &seen_by_b[0];
        assert_eq!(change["id"], json!(a.id));
        assert_eq!(change["otk"], json!(before));
        assert_eq!(change["nextotk"], json!(after));
        assert_eq!(change["text"], json!(["x"]));

        hub.handle_event(&b.id, op("hack")).await;
        assert!(a.drain().is_empty());
        assert!(b.drain().is_empty());
        assert_eq!(current_token(&hub, &foo).await, after);
    }

    #[tokio::test]
    async fn consecutive_changes_link_up() {
        let (hub, store) = test_hub();
        let note = seed_note(&store, None, "");
        let mut a = TestClient::join(&hub, &note).await;
        a.drain();

        for origin in ["+input", "+delete", "paste", "undo", "+sortLines"] {
            hub.handle_event(&a.id, op(origin)).await;
        }
        let changes = a.changes();
        assert_eq!(changes.len(), 5);
        for pair in changes.windows(2) {
            assert_eq!(pair[0]["nextotk"], pair[1]["otk"]);
        }
        assert_eq!(changes[4]["nextotk"], json!(current_token(&hub, &note).await));
    }

    #[tokio::test]
    async fn locked_note_only_takes_changes_from_owner() {
        let (hub, store) = test_hub();
        let bar = seed_note(&store, Some("U1"), "bar");
        let mut owner = TestClient::join_as(&hub, &bar, "token-U1").await;
        let mut other = TestClient::join_as(&hub, &bar, "token-U2").await;
        hub.handle_event(&owner.id, ClientEvent::Permission("locked".to_string()))
            .await;
        owner.drain();
        other.drain();

        let token = current_token(&hub, &bar).await;
        hub.handle_event(&other.id, op("+input")).await;
        assert!(owner.changes().is_empty());
        assert!(other.changes().is_empty());
        assert_eq!(current_token(&hub, &bar).await, token);

        hub.handle_event(&owner.id, op("+input")).await;
        assert_eq!(owner.changes().len(), 1);
        assert_eq!(other.changes().len(), 1);
    }

    #[tokio::test]
    async fn editable_note_rejects_guests() {
        let (hub, store) = test_hub();
        let note = seed_note(&store, Some("U1"), "");
        let mut guest = TestClient::join(&hub, &note).await;
        let mut member = TestClient::join_as(&hub, &note, "token-U2").await;
        guest.drain();
        member.drain();

        hub.handle_event(&guest.id, op("+input")).await;
        assert!(member.changes().is_empty());

        hub.handle_event(&member.id, op("+input")).await;
        assert_eq!(guest.changes().len(), 1);
    }

    #[tokio::test]
    async fn update_replaces_body_and_broadcasts_check() {
        let (hub, store) = test_hub();
        let note = seed_note(&store, None, "old");
        let mut a = TestClient::join(&hub, &note).await;
        let mut b = TestClient::join(&hub, &note).await;
        a.drain();
        b.drain();

        hub.handle_event(&a.id, ClientEvent::Update(encode("new"))).await;
        let cell = hub.documents.resolve(&note).await.unwrap();
        let (hash, updatetime) = {
            let doc = cell.state.lock().await;
            assert_eq!(doc.body, "new");
            assert!(doc.dirty);
            (doc.hash.clone(), doc.update_time)
        };
        assert_eq!(hash, crate::ws::document::content_hash("new"));

        let expected = ServerEvent::Check(CheckMessage {
            id: a.id.clone(),
            hash,
            updatetime,
        });
        assert_eq!(a.events(), vec![expected.clone()]);
        assert_eq!(b.events(), vec![expected]);
    }

    #[tokio::test]
    async fn identical_update_stays_clean_but_still_checks() {
        let (hub, store) = test_hub();
        let note = seed_note(&store, None, "same");
        let mut a = TestClient::join(&hub, &note).await;
        a.drain();

        hub.handle_event(&a.id, ClientEvent::Update(encode("same"))).await;
        let cell = hub.documents.resolve(&note).await.unwrap();
        assert!(!cell.state.lock().await.dirty);
        assert!(matches!(a.events().as_slice(), [ServerEvent::Check(_)]));
    }

    #[tokio::test]
    async fn refresh_and_roster_answer_requester_only() {
        let (hub, store) = test_hub();
        let note = seed_note(&store, None, "text");
        let mut a = TestClient::join(&hub, &note).await;
        let mut b = TestClient::join(&hub, &note).await;
        a.drain();
        b.drain();

        hub.handle_event(&a.id, ClientEvent::Refresh).await;
        hub.handle_event(&a.id, ClientEvent::OnlineUsers).await;
        let events = a.events();
        assert!(matches!(events[0], ServerEvent::Refresh(_)));
        assert_eq!(roster_ids(&events[1]).map(|ids| ids.len()), Some(2));
        assert!(b.drain().is_empty());
    }

    #[tokio::test]
    async fn version_needs_no_note() {
        let (hub, _store) = test_hub();
        let mut lone = TestClient::open(&hub, None, None).await;
        hub.handle_event(&lone.id, ClientEvent::Version).await;
        assert_eq!(
            lone.events(),
            vec![ServerEvent::Version(env!("CARGO_PKG_VERSION").to_string())]
        );
    }

    #[tokio::test]
    async fn presence_events_skip_sender() {
        let (hub, store) = test_hub();
        let note = seed_note(&store, None, "");
        let mut a = TestClient::join(&hub, &note).await;
        let mut b = TestClient::join(&hub, &note).await;
        a.drain();
        b.drain();

        hub.handle_event(&a.id, ClientEvent::CursorFocus(json!({"line": 3, "ch": 1})))
            .await;
        hub.handle_event(
            &a.id,
            ClientEvent::UserStatus(Some(UserStatusMessage {
                idle: true,
                kind: Some("xs".to_string()),
            })),
        )
        .await;
        hub.handle_event(&a.id, ClientEvent::CursorBlur).await;
        assert!(a.drain().is_empty());

        let events = b.events();
        assert_eq!(events.len(), 3);
        match &events[0] {
            ServerEvent::CursorFocus(user) => {
                assert_eq!(user.id, a.id);
                assert_eq!(user.cursor, Some(json!({"line": 3, "ch": 1})));
            }
            other => panic!("expected cursor focus, got {:?}", other),
        }
        match &events[1] {
            ServerEvent::UserStatus(user) => {
                assert!(user.idle);
                assert_eq!(user.kind.as_deref(), Some("xs"));
                assert_eq!(user.cursor, Some(json!({"line": 3, "ch": 1})));
            }
            other => panic!("expected user status, got {:?}", other),
        }
        assert_eq!(
            events[2],
            ServerEvent::CursorBlur(CursorBlurMessage { id: a.id.clone() })
        );
        let session = hub.sessions.get(&a.id).await.unwrap();
        assert_eq!(session.cursor, None);
    }

    #[tokio::test]
    async fn permission_change_is_owner_only() {
        let (hub, store) = test_hub();
        let note = seed_note(&store, Some("U1"), "");
        let mut owner = TestClient::join_as(&hub, &note, "token-U1").await;
        let mut other = TestClient::join_as(&hub, &note, "token-U2").await;
        owner.drain();
        other.drain();

        hub.handle_event(&other.id, ClientEvent::Permission("freely".to_string()))
            .await;
        assert!(owner.drain().is_empty());
        assert_eq!(store.memory.permission(&note), Some(NotePermission::Editable));

        hub.handle_event(&owner.id, ClientEvent::Permission("locked".to_string()))
            .await;
        let expected = ServerEvent::Permission(PermissionMessage {
            permission: NotePermission::Locked,
        });
        assert_eq!(owner.events(), vec![expected.clone()]);
        assert_eq!(other.events(), vec![expected]);
        assert_eq!(store.memory.permission(&note), Some(NotePermission::Locked));
    }

    #[tokio::test]
    async fn failed_permission_write_rolls_back() {
        let (hub, store) = test_hub();
        let note = seed_note(&store, Some("U1"), "");
        let mut owner = TestClient::join_as(&hub, &note, "token-U1").await;
        owner.drain();
        store.fail_permission.store(true, Ordering::SeqCst);

        hub.handle_event(&owner.id, ClientEvent::Permission("locked".to_string()))
            .await;
        assert!(owner.drain().is_empty());
        let cell = hub.documents.resolve(&note).await.unwrap();
        assert_eq!(cell.state.lock().await.permission, NotePermission::Editable);
    }

    #[tokio::test]
    async fn user_changed_rebinds_identity_and_rebroadcasts_roster() {
        let (hub, store) = test_hub();
        let note = seed_note(&store, Some("U1"), "");
        let mut a = TestClient::join(&hub, &note).await;
        let mut b = TestClient::join(&hub, &note).await;
        a.drain();
        b.drain();

        hub.handle_event(
            &a.id,
            ClientEvent::UserChanged(Some(UserChangedMessage {
                token: Some("token-U1".to_string()),
            })),
        )
        .await;

        let roster = b.events().iter().find_map(decode_roster).unwrap();
        let me = roster.iter().find(|u| u.id == a.id).unwrap();
        assert!(me.login);
        assert_eq!(me.userid.as_deref(), Some("U1"));
        assert_eq!(me.name, "User U1");
        assert!(a.events().iter().any(|e| decode_roster(e).is_some()));

        // signed in as owner now, so permission changes go through
        hub.handle_event(&a.id, ClientEvent::Permission("locked".to_string()))
            .await;
        assert_eq!(store.memory.permission(&note), Some(NotePermission::Locked));
    }

    #[tokio::test]
    async fn events_from_unattached_sessions_are_ignored() {
        let (hub, store) = test_hub();
        let note = seed_note(&store, None, "text");
        let mut pending = TestClient::open(&hub, Some(referer_for(&note)), None).await;

        hub.handle_event(&pending.id, ClientEvent::Refresh).await;
        hub.handle_event(&pending.id, ClientEvent::Update(encode("x"))).await;
        hub.handle_event(&pending.id, op("+input")).await;
        assert!(pending.drain().is_empty());
        assert!(hub.documents.resolve(&note).await.is_none());
        assert!(store.saves().is_empty());

        hub.handle_event("nobody", ClientEvent::Refresh).await;
    }

    #[tokio::test]
    async fn disconnect_event_queues_close_for_the_transport() {
        let (hub, store) = test_hub();
        let note = seed_note(&store, None, "");
        let mut a = TestClient::join(&hub, &note).await;
        a.drain();

        hub.handle_event(&a.id, ClientEvent::Disconnect).await;
        assert_eq!(a.drain(), vec![Outbound::Close]);
        assert!(hub.sessions.contains(&a.id).await);

        hub.disconnect(&a.id).await;
        assert!(!hub.sessions.contains(&a.id).await);
        assert!(hub.documents.resolve(&note).await.is_none());
    }

    #[tokio::test]
    async fn aborted_disconnect_event_still_evicts_on_transport_disconnect() {
        let (hub, store) = test_hub();
        let note = seed_note(&store, None, "");
        let mut a = TestClient::join(&hub, &note).await;
        hub.handle_event(&a.id, ClientEvent::Update(encode("pending"))).await;
        a.drain();

        // a sweep write in flight holds the persist gate
        let cell = hub.documents.resolve(&note).await.unwrap();
        let sweep = cell.persist_gate.lock().await;

        let event = tokio::spawn({
            let hub = hub.clone();
            let id = a.id.clone();
            async move { hub.handle_event(&id, ClientEvent::Disconnect).await }
        });
        tokio::task::yield_now().await;
        event.abort();
        let _ = event.await;
        drop(sweep);

        hub.disconnect(&a.id).await;
        assert!(hub.documents.resolve(&note).await.is_none());
        assert!(cell.state.lock().await.sessions.is_empty());
        assert!(!hub.sessions.contains(&a.id).await);
        assert_eq!(store.saves_of(&note), 1);
        assert_eq!(store.stored_body(&note).as_deref(), Some("pending"));
    }

    #[tokio::test]
    async fn null_user_status_rebroadcasts_unchanged_presence() {
        let (hub, store) = test_hub();
        let note = seed_note(&store, None, "");
        let mut a = TestClient::join(&hub, &note).await;
        let mut b = TestClient::join(&hub, &note).await;
        hub.handle_event(
            &a.id,
            ClientEvent::UserStatus(Some(UserStatusMessage {
                idle: true,
                kind: Some("md".to_string()),
            })),
        )
        .await;
        a.drain();
        b.drain();

        hub.handle_event(&a.id, ClientEvent::UserStatus(None)).await;
        assert!(a.drain().is_empty());
        match b.events().as_slice() {
            [ServerEvent::UserStatus(user)] => {
                assert_eq!(user.id, a.id);
                assert!(user.idle);
                assert_eq!(user.kind.as_deref(), Some("md"));
            }
            other => panic!("expected one user status, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn user_changed_from_unattached_session_keeps_credentials() {
        let (hub, store) = test_hub();
        let note = seed_note(&store, None, "");
        let mut pending = TestClient::open(&hub, Some(referer_for(&note)), None).await;

        hub.handle_event(
            &pending.id,
            ClientEvent::UserChanged(Some(UserChangedMessage {
                token: Some("token-U9".to_string()),
            })),
        )
        .await;

        let session = hub.sessions.get(&pending.id).await.unwrap();
        assert_eq!(session.credentials, None);
        assert!(!session.login);
        assert!(pending.drain().is_empty());
    }

    #[tokio::test]
    async fn edits_survive_flush_and_reload() {
        let (hub, store) = test_hub();
        let note = seed_note(&store, None, "# Draft\n");
        let a = TestClient::join(&hub, &note).await;
        hub.handle_event(&a.id, ClientEvent::Update(encode("# Final\ntext")))
            .await;
        let hash = hub.documents.resolve(&note).await.unwrap().state.lock().await.hash.clone();

        assert_eq!(hub.flush_dirty().await, 1);
        assert_eq!(store.memory.title(&note).as_deref(), Some(encode("Final").as_str()));
        hub.disconnect(&a.id).await;
        assert_eq!(store.saves_of(&note), 1);

        let mut b = TestClient::join(&hub, &note).await;
        let refresh = b
            .events()
            .into_iter()
            .find_map(|e| match e {
                ServerEvent::Refresh(r) => Some(r),
                _ => None,
            })
            .unwrap();
        assert_eq!(refresh.body, encode("# Final\ntext"));
        assert_eq!(refresh.hash, hash);
    }
}
