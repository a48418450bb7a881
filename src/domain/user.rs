use std::sync::Arc;

use sha2::{Digest, Sha256};

/// A registered account. Identity is the username alone — two `User`s with the
/// same username are the same user, regardless of what the digest says.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct User {
    username: Arc<str>,
    password_digest: String,
}

impl User {
    /// Builds a user, hashing `password` unless it already arrived pre-hashed
    /// (the federation path provisions accounts with a digest it received
    /// from the front server, not a plaintext password).
    pub fn new(username: impl Into<Arc<str>>, password: &str, already_hashed: bool) -> Self {
        Self {
            username: username.into(),
            password_digest: if already_hashed {
                password.to_owned()
            } else {
                hash_password(password)
            },
        }
    }

    pub fn username(&self) -> &Arc<str> {
        &self.username
    }

    pub fn password_digest(&self) -> &str {
        &self.password_digest
    }

    /// Constant-time comparison of the stored digest against a freshly hashed
    /// candidate password.
    pub fn verify_password(&self, password: &str) -> bool {
        constant_time_eq(self.password_digest.as_bytes(), hash_password(password).as_bytes())
    }
}

impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        self.username == other.username
    }
}
impl Eq for User {}

impl std::hash::Hash for User {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.username.hash(state)
    }
}

impl std::fmt::Display for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.username)
    }
}

pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// Bitwise, length-checked comparison that doesn't short-circuit on the first
/// mismatching byte — the hex digests being compared are a fixed 64 bytes, so
/// this costs nothing the caller would notice.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifies_matching_password() {
        let user = User::new("alice", "hunter2", false);
        assert!(user.verify_password("hunter2"));
        assert!(!user.verify_password("wrong"));
    }

    #[test]
    fn already_hashed_is_stored_verbatim() {
        let digest = hash_password("hunter2");
        let user = User::new("alice", &digest, true);
        assert_eq!(user.password_digest(), digest);
        assert!(user.verify_password("hunter2"));
    }

    #[test]
    fn equality_and_hash_are_username_only() {
        let a = User::new("alice", "one", false);
        let b = User::new("alice", "two", false);
        assert_eq!(a, b);
    }

    #[test]
    fn constant_time_eq_rejects_length_mismatch() {
        assert!(!constant_time_eq(b"abc", b"ab"));
        assert!(constant_time_eq(b"abc", b"abc"));
    }
}
