use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::message::Message;

/// A named chat room: its membership, the full message history, and each
/// member's outstanding unseen queue.
///
/// Invariant: `unseen.keys() == members` at all times. Nothing here is
/// independently synchronized — every mutating method is only ever called
/// while the owning `Store`'s lock is held, which is what gives
/// `take_unseen` its atomicity.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Chat {
    name: Arc<str>,
    members: HashSet<Arc<str>>,
    history: Vec<Message>,
    unseen: HashMap<Arc<str>, Vec<Message>>,
}

impl Chat {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            members: HashSet::new(),
            history: Vec::new(),
            unseen: HashMap::new(),
        }
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn contains(&self, username: &str) -> bool {
        self.members.contains(username)
    }

    pub fn add_user(&mut self, username: Arc<str>) {
        self.unseen.entry(username.clone()).or_insert_with(Vec::new);
        self.members.insert(username);
    }

    pub fn remove_user(&mut self, username: &str) {
        self.members.remove(username);
        self.unseen.remove(username);
    }

    /// Appends `message` to history and to every other member's unseen queue.
    pub fn send(&mut self, message: Message) {
        for member in self.members.iter().filter(|m| m.as_ref() != message.sender().as_ref()) {
            self.unseen.entry(member.clone()).or_insert_with(Vec::new).push(message.clone());
        }
        self.history.push(message);
    }

    /// Drains and returns `username`'s unseen queue.
    pub fn take_unseen(&mut self, username: &str) -> Vec<Message> {
        self.unseen.get_mut(username).map(std::mem::take).unwrap_or_default()
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

impl std::fmt::Display for Chat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} has {} users and {} messages", self.name, self.members.len(), self.history.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_fans_out_to_everyone_but_the_sender() {
        let mut chat = Chat::new("x");
        chat.add_user(Arc::from("alice"));
        chat.add_user(Arc::from("bob"));

        chat.send(Message::new("alice", "hi"));

        assert_eq!(chat.take_unseen("alice").len(), 0);
        assert_eq!(chat.take_unseen("bob").len(), 1);
        assert_eq!(chat.history().len(), 1);
    }

    #[test]
    fn take_unseen_drains_the_queue() {
        let mut chat = Chat::new("x");
        chat.add_user(Arc::from("alice"));
        chat.add_user(Arc::from("bob"));
        chat.send(Message::new("alice", "hi"));

        assert_eq!(chat.take_unseen("bob").len(), 1);
        assert_eq!(chat.take_unseen("bob").len(), 0);
    }

    #[test]
    fn remove_user_drops_membership_and_unseen() {
        let mut chat = Chat::new("x");
        chat.add_user(Arc::from("alice"));
        chat.remove_user("alice");
        assert!(!chat.contains("alice"));
        assert_eq!(chat.take_unseen("alice").len(), 0);
    }
}
