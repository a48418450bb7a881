use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::domain::{Chat, Message, User};
use crate::error::StoreIoError;
use crate::protocol::FederatedUser;

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct StoreInner {
    users: HashMap<Arc<str>, User>,
    chats: HashMap<Arc<str>, Chat>,
    /// token -> username. Plain `Arc<str>` rather than a `Session` struct:
    /// the session carries no state beyond who it belongs to.
    sessions: HashMap<String, Arc<str>>,
    /// Front-only; stays empty on a process that never redirects.
    chat_home: HashMap<String, String>,
    /// Front-only. `BTreeMap` so "ties broken by iteration order" is
    /// reproducible rather than hash-order roulette.
    load: BTreeMap<String, u64>,
    req_count: u64,
    avg_latency: f64,
}

/// The thread-safe registry of users, chats and sessions. One mutex guards
/// every field; no method holds it across an `.await` point.
pub struct Store {
    inner: Mutex<StoreInner>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Stats {
    pub number_of_users: usize,
    pub number_of_chats: usize,
    pub number_of_sent_messages: u64,
    pub average_operation_latency: f64,
}

impl Store {
    pub fn new(chat_servers: &[String]) -> Self {
        let mut inner = StoreInner::default();
        for server in chat_servers {
            inner.load.entry(server.clone()).or_insert(0);
        }
        Self { inner: Mutex::new(inner) }
    }

    /// Loads the on-disk snapshot if present, otherwise starts empty with
    /// `load` pre-populated for the configured chat servers.
    pub fn load_or_init(path: &Path, chat_servers: &[String]) -> Result<Self, StoreIoError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no snapshot found, starting with an empty store");
            return Ok(Self::new(chat_servers));
        }

        let bytes = std::fs::read(path)?;
        let mut inner: StoreInner = bincode::deserialize(&bytes)?;
        for server in chat_servers {
            inner.load.entry(server.clone()).or_insert(0);
        }
        tracing::info!(
            path = %path.display(),
            users = inner.users.len(),
            chats = inner.chats.len(),
            "loaded snapshot"
        );
        Ok(Self { inner: Mutex::new(inner) })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ---- users / sessions ----

    pub fn exists_user(&self, username: &str) -> bool {
        self.lock().users.contains_key(username)
    }

    pub fn create_user(&self, username: &str, password: &str, already_hashed: bool) {
        let mut inner = self.lock();
        inner.users.insert(Arc::from(username), User::new(username, password, already_hashed));
    }

    pub fn verify_password(&self, username: &str, password: &str) -> bool {
        self.lock().users.get(username).map(|u| u.verify_password(password)).unwrap_or(false)
    }

    pub fn open_session(&self, username: &str) -> String {
        let token = crate::domain::session::generate_token();
        let mut inner = self.lock();
        let key: Arc<str> = inner.users.get(username).map(|u| u.username().clone()).unwrap_or_else(|| Arc::from(username));
        inner.sessions.insert(token.clone(), key);
        token
    }

    pub fn close_session(&self, token: &str) {
        self.lock().sessions.remove(token);
    }

    pub fn is_logged_in(&self, token: &str) -> bool {
        self.lock().sessions.contains_key(token)
    }

    fn username_for_token(&self, token: &str) -> Option<Arc<str>> {
        self.lock().sessions.get(token).cloned()
    }

    pub fn list_users(&self) -> Vec<String> {
        self.lock().users.keys().map(|k| k.to_string()).collect()
    }

    // ---- chats ----

    pub fn exists_chat(&self, chatname: &str) -> bool {
        self.lock().chats.contains_key(chatname)
    }

    pub fn create_chat(&self, chatname: &str) {
        self.lock().chats.insert(Arc::from(chatname), Chat::new(chatname));
    }

    pub fn add_user_to_chat(&self, username: &str, chatname: &str) {
        let mut inner = self.lock();
        let member: Arc<str> = inner.users.get(username).map(|u| u.username().clone()).unwrap_or_else(|| Arc::from(username));
        if let Some(chat) = inner.chats.get_mut(chatname) {
            chat.add_user(member);
        }
    }

    pub fn remove_user_from_chat(&self, username: &str, chatname: &str) {
        if let Some(chat) = self.lock().chats.get_mut(chatname) {
            chat.remove_user(username);
        }
    }

    pub fn is_user_in_chat_by_username(&self, username: &str, chatname: &str) -> bool {
        self.lock().chats.get(chatname).map(|c| c.contains(username)).unwrap_or(false)
    }

    pub fn is_user_in_chat_by_token(&self, token: &str, chatname: &str) -> bool {
        match self.username_for_token(token) {
            Some(username) => self.is_user_in_chat_by_username(&username, chatname),
            None => false,
        }
    }

    pub fn send_message(&self, token: &str, chatname: &str, text: &str) {
        let mut inner = self.lock();
        let Some(sender) = inner.sessions.get(token).cloned() else { return };
        if let Some(chat) = inner.chats.get_mut(chatname) {
            chat.send(Message::new(sender, text));
        }
    }

    pub fn take_unseen(&self, token: &str, chatname: &str) -> Vec<Value> {
        let mut inner = self.lock();
        let Some(username) = inner.sessions.get(token).cloned() else { return Vec::new() };
        inner
            .chats
            .get_mut(chatname)
            .map(|chat| chat.take_unseen(&username).iter().map(Message::to_wire).collect())
            .unwrap_or_default()
    }

    pub fn get_history(&self, chatname: &str) -> Vec<Value> {
        self.lock()
            .chats
            .get(chatname)
            .map(|chat| chat.history().iter().map(Message::to_wire).collect())
            .unwrap_or_default()
    }

    pub fn list_chats(&self) -> Vec<String> {
        self.lock().chats.keys().map(|k| k.to_string()).collect()
    }

    /// Snapshot of every member's `{username, password_hash}` for a chat —
    /// the payload federation sends a chat server so it can provision those
    /// accounts locally.
    pub fn federated_users_for_chat(&self, chatname: &str) -> Vec<FederatedUser> {
        let inner = self.lock();
        let Some(chat) = inner.chats.get(chatname) else { return Vec::new() };
        chat_members_with_digests(&inner, chat)
    }

    // ---- federation (front only; no-ops produce empty/None on a chat server) ----

    pub fn get_lowest_load_server(&self) -> Option<String> {
        self.lock().load.iter().min_by_key(|(_, count)| **count).map(|(server, _)| server.clone())
    }

    pub fn associate_chat_with_server(&self, chatname: &str, server: &str) {
        let mut inner = self.lock();
        inner.chat_home.insert(chatname.to_string(), server.to_string());
        *inner.load.entry(server.to_string()).or_insert(0) += 1;
    }

    pub fn get_associated_server(&self, chatname: &str) -> Option<String> {
        self.lock().chat_home.get(chatname).cloned()
    }

    // ---- stats ----

    pub fn update_latency(&self, dt_seconds: f64) {
        let mut inner = self.lock();
        inner.req_count += 1;
        inner.avg_latency += (dt_seconds - inner.avg_latency) / inner.req_count as f64;
    }

    pub fn get_stats(&self) -> Stats {
        let inner = self.lock();
        Stats {
            number_of_users: inner.users.len(),
            number_of_chats: inner.chats.len(),
            number_of_sent_messages: inner.chats.values().map(|c| c.len() as u64).sum(),
            average_operation_latency: inner.avg_latency,
        }
    }

    /// Serializes the snapshot under the lock, then writes it to a temp
    /// file and renames it into place *without* holding the lock — crash
    /// safety without blocking every other connection on disk I/O.
    pub async fn backup(&self, path: &Path) -> Result<(), StoreIoError> {
        let bytes = {
            let inner = self.lock();
            bincode::serialize(&*inner)?
        };

        let tmp_path: PathBuf = {
            let mut p = path.as_os_str().to_owned();
            p.push(".tmp");
            PathBuf::from(p)
        };

        tokio::fs::write(&tmp_path, &bytes).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }
}

fn chat_members_with_digests(inner: &StoreInner, chat: &Chat) -> Vec<FederatedUser> {
    // `Chat` only exposes history/contains, not the member set directly —
    // recompute membership the same way `is_user_in_chat_by_username` does,
    // from the users known to carry a digest.
    inner
        .users
        .keys()
        .filter(|username| chat.contains(username))
        .filter_map(|username| {
            inner.users.get(username).map(|u| FederatedUser {
                username: username.to_string(),
                password_hash: u.password_digest().to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_login_send_recv_round_trip() {
        let store = Store::new(&[]);
        store.create_user("alice", "a", false);
        store.create_user("bob", "b", false);
        store.create_chat("x");
        store.add_user_to_chat("alice", "x");
        store.add_user_to_chat("bob", "x");

        assert!(store.verify_password("alice", "a"));
        let alice_token = store.open_session("alice");
        let bob_token = store.open_session("bob");

        assert!(store.take_unseen(&bob_token, "x").is_empty());

        store.send_message(&alice_token, "x", "hi");
        let unseen = store.take_unseen(&bob_token, "x");
        assert_eq!(unseen.len(), 1);
        assert_eq!(unseen[0]["sender"], "alice");

        // second recv returns empty
        assert!(store.take_unseen(&bob_token, "x").is_empty());
    }

    #[test]
    fn close_session_invalidates_token() {
        let store = Store::new(&[]);
        store.create_user("alice", "a", false);
        let token = store.open_session("alice");
        assert!(store.is_logged_in(&token));
        store.close_session(&token);
        assert!(!store.is_logged_in(&token));
        // retrying the close is tolerated
        store.close_session(&token);
    }

    #[test]
    fn lowest_load_server_breaks_ties_by_address_order() {
        let store = Store::new(&["s1".into(), "s2".into()]);
        assert_eq!(store.get_lowest_load_server().as_deref(), Some("s1"));
        store.associate_chat_with_server("x", "s1");
        assert_eq!(store.get_lowest_load_server().as_deref(), Some("s2"));
    }

    #[test]
    fn stats_count_messages_across_chats() {
        let store = Store::new(&[]);
        store.create_user("alice", "a", false);
        store.create_chat("x");
        store.create_chat("y");
        store.add_user_to_chat("alice", "x");
        store.add_user_to_chat("alice", "y");
        let token = store.open_session("alice");
        store.send_message(&token, "x", "1");
        store.send_message(&token, "x", "2");
        store.send_message(&token, "y", "3");

        let stats = store.get_stats();
        assert_eq!(stats.number_of_sent_messages, 3);
        assert_eq!(stats.number_of_chats, 2);
    }

    #[tokio::test]
    async fn backup_then_load_preserves_users_and_chats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.pickle");

        let store = Store::new(&[]);
        store.create_user("alice", "a", false);
        store.create_chat("x");
        store.add_user_to_chat("alice", "x");
        store.backup(&path).await.unwrap();

        let reloaded = Store::load_or_init(&path, &[]).unwrap();
        assert_eq!(reloaded.list_users(), vec!["alice".to_string()]);
        assert_eq!(reloaded.list_chats(), vec!["x".to_string()]);
    }
}
