use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chatwin_core::{
    AppAction, AppReconciler, AppUpdate, ChatApp, ChatHistory, ChatMessage, ChatService,
    ConnectionState, LinkStatus, Member, RealtimeConnector, RealtimeSink, RealtimeToken,
    ServiceError,
};
use reqwest::StatusCode;
use serde_json::json;
use tempfile::tempdir;

fn write_config(data_dir: &str, disable_network: bool) {
    let path = std::path::Path::new(data_dir).join("chatwin_config.json");
    let v = json!({
        "disable_network": disable_network,
        "api_base_url": "http://chat.invalid",
    });
    std::fs::write(path, serde_json::to_vec(&v).unwrap()).unwrap();
}

fn wait_until(what: &str, timeout: Duration, mut f: impl FnMut() -> bool) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("{what}: condition not met within {timeout:?}");
}

struct TestReconciler {
    updates: Arc<Mutex<Vec<AppUpdate>>>,
}

impl TestReconciler {
    fn new() -> (Self, Arc<Mutex<Vec<AppUpdate>>>) {
        let updates = Arc::new(Mutex::new(vec![]));
        (
            Self {
                updates: updates.clone(),
            },
            updates,
        )
    }
}

impl AppReconciler for TestReconciler {
    fn reconcile(&self, update: AppUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}

fn msg(id: &str, sender: &str, text: &str) -> ChatMessage {
    ChatMessage {
        id: id.into(),
        sender_name: sender.into(),
        text: text.into(),
    }
}

fn member(username: &str) -> Member {
    Member {
        username: username.into(),
        name: username.to_uppercase(),
    }
}

// ── Fake chat service ───────────────────────────────────────────────────────

#[derive(Default)]
struct FakeChat {
    name: String,
    description: String,
    members: Vec<Member>,
    /// Newest first, as the service lists them.
    messages: Vec<ChatMessage>,
}

#[derive(Default)]
struct FakeState {
    chats: HashMap<String, FakeChat>,
    profiles: Vec<Member>,
    next_id: u64,
    failing: HashSet<&'static str>,
    search_delays: HashMap<String, Duration>,
    omit_messages: bool,
}

#[derive(Default)]
struct FakeChatService {
    state: Mutex<FakeState>,
    history_calls: AtomicUsize,
    send_calls: AtomicUsize,
    update_calls: AtomicUsize,
}

impl FakeChatService {
    fn with_chat(chat_id: &str, name: &str, newest_first: Vec<ChatMessage>) -> Arc<Self> {
        let fake = Arc::new(Self::default());
        fake.add_chat(chat_id, name, newest_first);
        fake
    }

    fn add_chat(&self, chat_id: &str, name: &str, newest_first: Vec<ChatMessage>) {
        let mut st = self.state.lock().unwrap();
        st.next_id = st.next_id.max(100);
        st.chats.insert(
            chat_id.to_string(),
            FakeChat {
                name: name.into(),
                description: format!("{name} chat"),
                members: vec![member("alice")],
                messages: newest_first,
            },
        );
    }

    fn fail(&self, op: &'static str) {
        self.state.lock().unwrap().failing.insert(op);
    }

    fn check(&self, op: &'static str) -> Result<(), ServiceError> {
        if self.state.lock().unwrap().failing.contains(op) {
            return Err(ServiceError::Status {
                action: op,
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: "boom".into(),
            });
        }
        Ok(())
    }

    fn not_found(op: &'static str) -> ServiceError {
        ServiceError::Status {
            action: op,
            status: StatusCode::NOT_FOUND,
            body: String::new(),
        }
    }

    /// Changes a message server-side without any push.
    fn set_server_text(&self, chat_id: &str, message_id: &str, text: &str) {
        let mut st = self.state.lock().unwrap();
        let chat = st.chats.get_mut(chat_id).unwrap();
        for m in chat.messages.iter_mut().filter(|m| m.id == message_id) {
            m.text = text.into();
        }
    }
}

#[async_trait::async_trait]
impl ChatService for FakeChatService {
    async fn fetch_chat_history(&self, chat_id: &str) -> Result<ChatHistory, ServiceError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        self.check("fetch chat history")?;
        let st = self.state.lock().unwrap();
        let chat = st
            .chats
            .get(chat_id)
            .ok_or_else(|| Self::not_found("fetch chat history"))?;
        Ok(ChatHistory {
            chat_name: chat.name.clone(),
            description: chat.description.clone(),
            members: chat.members.clone(),
            chats: (!st.omit_messages).then(|| chat.messages.clone()),
        })
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ServiceError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        self.check("send message")?;
        let mut st = self.state.lock().unwrap();
        st.next_id += 1;
        let id = st.next_id.to_string();
        let chat = st
            .chats
            .get_mut(chat_id)
            .ok_or_else(|| Self::not_found("send message"))?;
        chat.messages.insert(0, msg(&id, "me", text));
        Ok(())
    }

    async fn update_message(
        &self,
        chat_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<(), ServiceError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.check("update message")?;
        self.set_server_text(chat_id, message_id, text);
        Ok(())
    }

    async fn delete_message(&self, chat_id: &str, message_id: &str) -> Result<(), ServiceError> {
        self.check("delete message")?;
        let mut st = self.state.lock().unwrap();
        if let Some(chat) = st.chats.get_mut(chat_id) {
            chat.messages.retain(|m| m.id != message_id);
        }
        Ok(())
    }

    async fn fetch_chat_members(&self, chat_id: &str) -> Result<Vec<Member>, ServiceError> {
        self.check("fetch chat members")?;
        let st = self.state.lock().unwrap();
        Ok(st
            .chats
            .get(chat_id)
            .map(|c| c.members.clone())
            .unwrap_or_default())
    }

    async fn add_chat_members(
        &self,
        chat_id: &str,
        usernames: &[String],
    ) -> Result<(), ServiceError> {
        self.check("add chat members")?;
        let mut st = self.state.lock().unwrap();
        let added: Vec<Member> = st
            .profiles
            .iter()
            .filter(|p| usernames.contains(&p.username))
            .cloned()
            .collect();
        if let Some(chat) = st.chats.get_mut(chat_id) {
            chat.members.extend(added);
        }
        Ok(())
    }

    async fn delete_chat_member(
        &self,
        chat_id: &str,
        username: &str,
    ) -> Result<(), ServiceError> {
        self.check("delete chat member")?;
        let mut st = self.state.lock().unwrap();
        if let Some(chat) = st.chats.get_mut(chat_id) {
            chat.members.retain(|m| m.username != username);
        }
        Ok(())
    }

    async fn search_profiles(&self, query: &str) -> Result<Vec<Member>, ServiceError> {
        let delay = self.state.lock().unwrap().search_delays.get(query).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check("search profiles")?;
        let st = self.state.lock().unwrap();
        Ok(st
            .profiles
            .iter()
            .filter(|p| p.username.contains(query))
            .cloned()
            .collect())
    }

    async fn fetch_realtime_token(&self) -> Result<RealtimeToken, ServiceError> {
        Ok(RealtimeToken {
            url: "ws://realtime.invalid/connection/websocket".into(),
            token: "t".into(),
        })
    }
}

// ── Scripted realtime connector ─────────────────────────────────────────────

/// Records every sink it is handed and keeps the link open until aborted.
#[derive(Default)]
struct ScriptedConnector {
    sinks: Mutex<Vec<RealtimeSink>>,
}

impl ScriptedConnector {
    fn sink_count(&self) -> usize {
        self.sinks.lock().unwrap().len()
    }

    fn sink(&self, index: usize) -> RealtimeSink {
        self.sinks.lock().unwrap()[index].clone()
    }

    fn last_sink(&self) -> RealtimeSink {
        self.sinks.lock().unwrap().last().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl RealtimeConnector for ScriptedConnector {
    async fn run(&self, sink: RealtimeSink) -> anyhow::Result<()> {
        self.sinks.lock().unwrap().push(sink.clone());
        sink.status(LinkStatus::Connected);
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Fails every link attempt, counting how often it was asked to connect.
#[derive(Default)]
struct FailingConnector {
    runs: AtomicUsize,
}

#[async_trait::async_trait]
impl RealtimeConnector for FailingConnector {
    async fn run(&self, _sink: RealtimeSink) -> anyhow::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        anyhow::bail!("realtime token rejected")
    }
}

struct Harness {
    app: Arc<ChatApp>,
    service: Arc<FakeChatService>,
    connector: Arc<ScriptedConnector>,
    _dir: tempfile::TempDir,
}

fn harness(service: Arc<FakeChatService>) -> Harness {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().to_str().unwrap().to_string();
    write_config(&data_dir, false);
    let connector = Arc::new(ScriptedConnector::default());
    let app = ChatApp::with_backends(&data_dir, service.clone(), connector.clone());
    Harness {
        app,
        service,
        connector,
        _dir: dir,
    }
}

/// Opens `chat_id` and waits for the first load and the live link.
fn open_and_settle(h: &Harness, chat_id: &str) {
    let sinks_before = h.connector.sink_count();
    h.app.dispatch(AppAction::OpenChat {
        chat_id: chat_id.into(),
    });
    wait_until("chat loaded", Duration::from_secs(2), || {
        let s = h.app.state();
        s.is_active_chat(chat_id) && s.chat_info.is_some() && !s.busy.loading_chat
    });
    wait_until("live link connected", Duration::from_secs(2), || {
        h.connector.sink_count() > sinks_before
            && h.app.state().connection == ConnectionState::Connected
    });
}

fn team_chat() -> Arc<FakeChatService> {
    FakeChatService::with_chat(
        "42",
        "Team",
        vec![
            msg("3", "bob", "third"),
            msg("2", "alice", "second"),
            msg("1", "bob", "first"),
        ],
    )
}

fn ids(h: &Harness) -> Vec<String> {
    h.app.state().messages.into_iter().map(|m| m.id).collect()
}

// ── Loading ─────────────────────────────────────────────────────────────────

#[test]
fn open_chat_loads_single_message_and_metadata() {
    let service = FakeChatService::with_chat("42", "Team", vec![msg("1", "alice", "hello")]);
    let h = harness(service);
    open_and_settle(&h, "42");

    let s = h.app.state();
    assert_eq!(s.messages, vec![msg("1", "alice", "hello")]);
    let info = s.chat_info.unwrap();
    assert_eq!(info.chat_name, "Team");
    assert_eq!(info.chat_id, "42");
    assert_eq!(info.members, vec![member("alice")]);
}

#[test]
fn history_is_shown_oldest_first() {
    let h = harness(team_chat());
    open_and_settle(&h, "42");
    assert_eq!(ids(&h), vec!["1", "2", "3"]);
}

#[test]
fn blank_chat_id_is_ignored() {
    let h = harness(team_chat());
    h.app.dispatch(AppAction::OpenChat {
        chat_id: "   ".into(),
    });
    std::thread::sleep(Duration::from_millis(100));
    assert!(h.app.state().active_chat_id.is_none());
    assert_eq!(h.service.history_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.connector.sink_count(), 0);
}

#[test]
fn failed_load_clears_state_and_toasts() {
    let h = harness(team_chat());
    open_and_settle(&h, "42");

    h.service.fail("fetch chat history");
    h.app.dispatch(AppAction::ReloadChat);
    wait_until("load failure surfaced", Duration::from_secs(2), || {
        h.app.state().toast.is_some()
    });
    let s = h.app.state();
    assert!(s.messages.is_empty());
    assert!(s.chat_info.is_none());
    assert!(s.toast.unwrap().starts_with("Failed to load chat"));

    h.app.dispatch(AppAction::ClearToast);
    wait_until("toast cleared", Duration::from_secs(2), || {
        h.app.state().toast.is_none()
    });
}

#[test]
fn history_without_messages_clears_state() {
    let h = harness(team_chat());
    open_and_settle(&h, "42");

    h.service.state.lock().unwrap().omit_messages = true;
    h.app.dispatch(AppAction::ReloadChat);
    wait_until("state cleared", Duration::from_secs(2), || {
        let s = h.app.state();
        s.messages.is_empty() && s.chat_info.is_none()
    });
}

#[test]
fn updates_arrive_with_increasing_revs() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().to_str().unwrap().to_string();
    write_config(&data_dir, true);
    let app = ChatApp::with_backends(
        &data_dir,
        team_chat(),
        Arc::new(ScriptedConnector::default()),
    );
    let (reconciler, updates) = TestReconciler::new();
    app.listen_for_updates(Box::new(reconciler));

    app.dispatch(AppAction::OpenChat {
        chat_id: "42".into(),
    });
    wait_until("loaded update delivered", Duration::from_secs(2), || {
        updates
            .lock()
            .unwrap()
            .iter()
            .any(|u| u.state().messages.len() == 3)
    });

    let revs: Vec<u64> = updates.lock().unwrap().iter().map(|u| u.rev()).collect();
    assert!(revs.windows(2).all(|w| w[0] < w[1]), "revs: {revs:?}");
    assert_eq!(app.state().rev, *revs.last().unwrap());
}

// ── Sending ─────────────────────────────────────────────────────────────────

#[test]
fn send_message_refetches_without_duplicates() {
    let h = harness(team_chat());
    open_and_settle(&h, "42");

    h.app.dispatch(AppAction::SendMessage {
        text: "fourth".into(),
    });
    wait_until("sent message visible", Duration::from_secs(2), || {
        h.app.state().messages.iter().any(|m| m.text == "fourth")
    });

    // The echo push for our own send triggers another full refetch.
    h.connector
        .last_sink()
        .publish(&json!({"type": "send_message", "data": {}}));
    wait_until("refetch settled", Duration::from_secs(2), || {
        !h.app.state().busy.loading_chat && h.service.history_calls.load(Ordering::SeqCst) >= 3
    });

    let ids = ids(&h);
    let unique: HashSet<&String> = ids.iter().collect();
    assert_eq!(unique.len(), ids.len(), "duplicate ids: {ids:?}");
    assert_eq!(ids.len(), 4);
    assert_eq!(h.app.state().messages.last().unwrap().text, "fourth");
}

#[test]
fn blank_message_is_not_sent() {
    let h = harness(team_chat());
    open_and_settle(&h, "42");
    let rev = h.app.state().rev;

    h.app.dispatch(AppAction::SendMessage {
        text: " \n\t ".into(),
    });
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(h.service.send_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.app.state().rev, rev);
}

#[test]
fn failed_send_toasts_and_keeps_messages() {
    let h = harness(team_chat());
    open_and_settle(&h, "42");
    h.service.fail("send message");

    h.app.dispatch(AppAction::SendMessage { text: "hi".into() });
    wait_until("send failure toast", Duration::from_secs(2), || {
        h.app.state().toast.is_some()
    });
    let s = h.app.state();
    assert!(!s.busy.sending_message);
    assert_eq!(s.messages.len(), 3);
}

// ── Deleting ────────────────────────────────────────────────────────────────

#[test]
fn delete_removes_exactly_that_message() {
    let h = harness(team_chat());
    open_and_settle(&h, "42");

    h.app.dispatch(AppAction::DeleteMessage {
        message_id: "2".into(),
    });
    wait_until("message removed", Duration::from_secs(2), || {
        ids(&h) == vec!["1", "3"]
    });

    // Replayed push for the same id, then one for an id we never had.
    let sink = h.connector.last_sink();
    sink.publish(&json!({"type": "delete_message", "data": {"messageId": 2}}));
    sink.publish(&json!({"type": "delete_message", "data": {"messageId": "999"}}));
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(ids(&h), vec!["1", "3"]);
}

#[test]
fn delete_push_removes_message_and_its_pending_edit() {
    let h = harness(team_chat());
    open_and_settle(&h, "42");

    h.app.dispatch(AppAction::StartEdit {
        message_id: "3".into(),
    });
    wait_until("edit started", Duration::from_secs(2), || {
        h.app.state().pending_edit.is_some()
    });

    h.connector
        .last_sink()
        .publish(&json!({"type": "delete_message", "data": {"messageId": 3}}));
    wait_until("message removed by push", Duration::from_secs(2), || {
        ids(&h) == vec!["1", "2"]
    });
    assert!(h.app.state().pending_edit.is_none());
}

// ── Editing ─────────────────────────────────────────────────────────────────

#[test]
fn start_then_cancel_edit_leaves_messages() {
    let h = harness(team_chat());
    open_and_settle(&h, "42");
    let before = h.app.state().messages;

    h.app.dispatch(AppAction::StartEdit {
        message_id: "2".into(),
    });
    wait_until("edit started", Duration::from_secs(2), || {
        h.app.state().pending_edit.is_some()
    });
    let pending = h.app.state().pending_edit.unwrap();
    assert_eq!(pending.target_message_id, "2");
    assert_eq!(pending.draft_text, "second");

    h.app.dispatch(AppAction::CancelEdit);
    wait_until("edit cancelled", Duration::from_secs(2), || {
        h.app.state().pending_edit.is_none()
    });
    assert_eq!(h.app.state().messages, before);
}

#[test]
fn start_edit_on_unknown_message_is_ignored() {
    let h = harness(team_chat());
    open_and_settle(&h, "42");
    h.app.dispatch(AppAction::StartEdit {
        message_id: "nope".into(),
    });
    std::thread::sleep(Duration::from_millis(100));
    assert!(h.app.state().pending_edit.is_none());
}

#[test]
fn whitespace_commit_changes_nothing() {
    let h = harness(team_chat());
    open_and_settle(&h, "42");
    h.app.dispatch(AppAction::StartEdit {
        message_id: "1".into(),
    });
    wait_until("edit started", Duration::from_secs(2), || {
        h.app.state().pending_edit.is_some()
    });
    let before = h.app.state();

    h.app.dispatch(AppAction::CommitEdit { text: "   ".into() });
    std::thread::sleep(Duration::from_millis(100));

    let after = h.app.state();
    assert_eq!(after.pending_edit, before.pending_edit);
    assert_eq!(after.messages, before.messages);
    assert_eq!(h.service.update_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn commit_edit_patches_text_and_clears_pending() {
    let h = harness(team_chat());
    open_and_settle(&h, "42");
    h.app.dispatch(AppAction::StartEdit {
        message_id: "1".into(),
    });
    h.app.dispatch(AppAction::CommitEdit {
        text: "first (edited)".into(),
    });
    wait_until("edit saved", Duration::from_secs(2), || {
        let s = h.app.state();
        s.pending_edit.is_none() && s.message("1").map(|m| m.text.as_str()) == Some("first (edited)")
    });
    assert!(!h.app.state().busy.saving_edit);
}

#[test]
fn failed_edit_keeps_pending_for_retry() {
    let h = harness(team_chat());
    open_and_settle(&h, "42");
    h.service.fail("update message");

    h.app.dispatch(AppAction::StartEdit {
        message_id: "1".into(),
    });
    h.app.dispatch(AppAction::CommitEdit {
        text: "nope".into(),
    });
    wait_until("edit failure toast", Duration::from_secs(2), || {
        h.app.state().toast.is_some()
    });
    let s = h.app.state();
    assert_eq!(s.pending_edit.as_ref().unwrap().target_message_id, "1");
    assert_eq!(s.message("1").unwrap().text, "first");
    assert!(!s.busy.saving_edit);
}

#[test]
fn edit_push_patches_text_without_replacing_messages() {
    let h = harness(team_chat());
    open_and_settle(&h, "42");

    // The server copy diverges; a full reload would bring "server side" back.
    h.service.set_server_text("42", "2", "server side");
    h.connector.last_sink().publish(&json!({
        "type": "edit_message",
        "data": {"messageId": 2, "text": "pushed"},
    }));
    wait_until("push applied", Duration::from_secs(2), || {
        h.app.state().message("2").map(|m| m.text.clone()) == Some("pushed".into())
    });
    std::thread::sleep(Duration::from_millis(150));
    assert_eq!(h.app.state().message("2").unwrap().text, "pushed");
}

// ── Realtime ────────────────────────────────────────────────────────────────

#[test]
fn unknown_publications_leave_state_alone() {
    let h = harness(team_chat());
    open_and_settle(&h, "42");
    std::thread::sleep(Duration::from_millis(100));
    let rev = h.app.state().rev;
    let calls = h.service.history_calls.load(Ordering::SeqCst);

    let sink = h.connector.last_sink();
    sink.publish(&json!({"type": "typing", "data": {"user": "bob"}}));
    sink.publish(&json!({"data": {"messageId": 1}}));
    sink.publish(&json!({"type": "edit_message", "data": {"messageId": 1}}));
    std::thread::sleep(Duration::from_millis(150));

    assert_eq!(h.app.state().rev, rev);
    assert_eq!(h.service.history_calls.load(Ordering::SeqCst), calls);
}

#[test]
fn switching_chats_closes_the_previous_subscription() {
    let service = team_chat();
    service.add_chat("7", "Other", vec![msg("70", "carol", "hey")]);
    let h = harness(service);

    open_and_settle(&h, "42");
    let sink_a = h.connector.sink(0);
    assert!(sink_a.is_alive());

    open_and_settle(&h, "7");
    assert!(!sink_a.is_alive());
    let sink_b = h.connector.last_sink();
    assert_eq!(sink_b.chat_id(), "7");
    assert!(sink_b.is_alive());

    // A late event from the old link must not touch the new chat.
    sink_a.publish(&json!({"type": "delete_message", "data": {"messageId": 70}}));
    sink_a.publish(&json!({"type": "send_message", "data": {}}));
    std::thread::sleep(Duration::from_millis(150));
    let s = h.app.state();
    assert_eq!(s.active_chat_id.as_deref(), Some("7"));
    assert_eq!(ids(&h), vec!["70"]);
    assert_eq!(s.chat_info.unwrap().chat_name, "Other");
}

#[test]
fn reopening_active_chat_keeps_the_subscription() {
    let h = harness(team_chat());
    open_and_settle(&h, "42");
    let calls = h.service.history_calls.load(Ordering::SeqCst);

    h.app.dispatch(AppAction::OpenChat {
        chat_id: " 42 ".into(),
    });
    wait_until("reload issued", Duration::from_secs(2), || {
        h.service.history_calls.load(Ordering::SeqCst) > calls
    });
    assert_eq!(h.connector.sink_count(), 1);
    assert!(h.connector.sink(0).is_alive());
}

#[test]
fn reopening_after_link_failure_reconnects() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().to_str().unwrap().to_string();
    write_config(&data_dir, false);
    let connector = Arc::new(FailingConnector::default());
    let app = ChatApp::with_backends(&data_dir, team_chat(), connector.clone());

    app.dispatch(AppAction::OpenChat {
        chat_id: "42".into(),
    });
    wait_until("link failure surfaced", Duration::from_secs(2), || {
        matches!(app.state().connection, ConnectionState::Failed { .. })
    });
    assert_eq!(connector.runs.load(Ordering::SeqCst), 1);

    app.dispatch(AppAction::OpenChat {
        chat_id: "42".into(),
    });
    wait_until("second link attempt", Duration::from_secs(2), || {
        connector.runs.load(Ordering::SeqCst) == 2
    });
    wait_until("retry failure surfaced", Duration::from_secs(2), || {
        matches!(app.state().connection, ConnectionState::Failed { .. })
    });
}

#[test]
fn reopening_after_server_disconnect_resubscribes() {
    let h = harness(team_chat());
    open_and_settle(&h, "42");
    let first = h.connector.sink(0);

    first.status(LinkStatus::Disconnected {
        reason: "3001 shutdown".into(),
    });
    wait_until("link dropped", Duration::from_secs(2), || {
        h.app.state().connection == ConnectionState::Disconnected
    });

    h.app.dispatch(AppAction::OpenChat {
        chat_id: "42".into(),
    });
    wait_until("new link connected", Duration::from_secs(2), || {
        h.connector.sink_count() == 2 && h.app.state().connection == ConnectionState::Connected
    });
    assert!(!first.is_alive());
    assert!(h.connector.sink(1).is_alive());
    assert_eq!(h.app.state().messages.len(), 3);
}

#[test]
fn close_chat_releases_the_subscription() {
    let h = harness(team_chat());
    open_and_settle(&h, "42");
    let sink = h.connector.last_sink();

    h.app.dispatch(AppAction::CloseChat);
    wait_until("chat closed", Duration::from_secs(2), || {
        h.app.state().active_chat_id.is_none()
    });
    assert!(!sink.is_alive());
    let s = h.app.state();
    assert!(s.messages.is_empty());
    assert_eq!(s.connection, ConnectionState::Disconnected);
}

#[test]
fn network_disabled_skips_live_updates() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().to_str().unwrap().to_string();
    write_config(&data_dir, true);
    let connector = Arc::new(ScriptedConnector::default());
    let app = ChatApp::with_backends(&data_dir, team_chat(), connector.clone());

    app.dispatch(AppAction::OpenChat {
        chat_id: "42".into(),
    });
    wait_until("chat loaded", Duration::from_secs(2), || {
        app.state().messages.len() == 3
    });
    assert_eq!(connector.sink_count(), 0);
    assert_eq!(app.state().connection, ConnectionState::Disconnected);
}

#[test]
fn failed_link_is_reported() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().to_str().unwrap().to_string();
    write_config(&data_dir, false);
    let app = ChatApp::with_backends(&data_dir, team_chat(), Arc::new(FailingConnector::default()));

    app.dispatch(AppAction::OpenChat {
        chat_id: "42".into(),
    });
    wait_until("link failure surfaced", Duration::from_secs(2), || {
        matches!(app.state().connection, ConnectionState::Failed { .. })
    });
    let toast = app.state().toast.unwrap_or_default();
    assert!(toast.contains("realtime token rejected"), "toast: {toast}");
    // History still loads without live updates.
    wait_until("chat loaded", Duration::from_secs(2), || {
        app.state().messages.len() == 3
    });
}

// ── Membership ──────────────────────────────────────────────────────────────

fn open_panel(h: &Harness) {
    h.app.dispatch(AppAction::OpenChatInfo);
    wait_until("members listed", Duration::from_secs(2), || {
        h.app
            .state()
            .membership
            .is_some_and(|p| !p.members.is_empty())
    });
}

#[test]
fn search_excludes_existing_members_and_add_moves_selection() {
    let service = team_chat();
    service.state.lock().unwrap().profiles =
        vec![member("alice"), member("albert"), member("alex")];
    let h = harness(service);
    open_and_settle(&h, "42");
    open_panel(&h);

    h.app.dispatch(AppAction::SearchProfiles { query: "al".into() });
    wait_until("search results", Duration::from_secs(2), || {
        h.app
            .state()
            .membership
            .is_some_and(|p| p.search_results.len() == 2)
    });
    let panel = h.app.state().membership.unwrap();
    let found: Vec<&str> = panel.search_results.iter().map(|m| m.username.as_str()).collect();
    assert_eq!(found, vec!["albert", "alex"]);

    h.app.dispatch(AppAction::ToggleProfileSelection {
        username: "albert".into(),
    });
    h.app.dispatch(AppAction::ToggleProfileSelection {
        username: "alex".into(),
    });
    h.app.dispatch(AppAction::ToggleProfileSelection {
        username: "alex".into(),
    });
    wait_until("selection applied", Duration::from_secs(2), || {
        h.app
            .state()
            .membership
            .is_some_and(|p| p.selected == vec![member("albert")])
    });

    h.app.dispatch(AppAction::AddSelectedMembers);
    wait_until("member added", Duration::from_secs(2), || {
        h.app
            .state()
            .membership
            .is_some_and(|p| p.members.iter().any(|m| m.username == "albert"))
    });
    let panel = h.app.state().membership.unwrap();
    assert!(panel.selected.is_empty());
    assert_eq!(panel.search_results, vec![member("alex")]);
    wait_until("chat info refreshed", Duration::from_secs(2), || {
        h.app
            .state()
            .chat_info
            .is_some_and(|i| i.members.len() == 2)
    });
}

#[test]
fn add_with_empty_selection_does_nothing() {
    let h = harness(team_chat());
    open_and_settle(&h, "42");
    open_panel(&h);
    let rev = h.app.state().rev;

    h.app.dispatch(AppAction::AddSelectedMembers);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(h.app.state().rev, rev);
}

#[test]
fn stale_search_results_are_dropped() {
    let service = team_chat();
    {
        let mut st = service.state.lock().unwrap();
        st.profiles = vec![member("albert"), member("bob")];
        st.search_delays
            .insert("al".into(), Duration::from_millis(300));
    }
    let h = harness(service);
    open_and_settle(&h, "42");
    open_panel(&h);

    h.app.dispatch(AppAction::SearchProfiles { query: "al".into() });
    h.app.dispatch(AppAction::SearchProfiles { query: "bo".into() });
    wait_until("latest search applied", Duration::from_secs(2), || {
        h.app
            .state()
            .membership
            .is_some_and(|p| p.search_results == vec![member("bob")])
    });

    // Let the slow search land; it must not overwrite the newer results.
    std::thread::sleep(Duration::from_millis(400));
    let panel = h.app.state().membership.unwrap();
    assert_eq!(panel.search_query, "bo");
    assert_eq!(panel.search_results, vec![member("bob")]);
}

#[test]
fn remove_member_updates_panel_and_chat_info() {
    let service = team_chat();
    {
        let mut st = service.state.lock().unwrap();
        st.chats.get_mut("42").unwrap().members.push(member("bob"));
    }
    let h = harness(service);
    open_and_settle(&h, "42");
    open_panel(&h);

    h.app.dispatch(AppAction::RemoveMember {
        username: "bob".into(),
    });
    wait_until("member removed", Duration::from_secs(2), || {
        let s = h.app.state();
        s.membership.is_some_and(|p| p.members == vec![member("alice")])
            && s.chat_info.is_some_and(|i| i.members == vec![member("alice")])
    });
}

#[test]
fn closing_the_chat_drops_late_results() {
    let service = team_chat();
    service
        .state
        .lock()
        .unwrap()
        .search_delays
        .insert("al".into(), Duration::from_millis(200));
    let h = harness(service);
    open_and_settle(&h, "42");
    open_panel(&h);

    h.app.dispatch(AppAction::SearchProfiles { query: "al".into() });
    h.app.dispatch(AppAction::CloseChat);
    std::thread::sleep(Duration::from_millis(350));
    let s = h.app.state();
    assert!(s.active_chat_id.is_none());
    assert!(s.membership.is_none());
}
