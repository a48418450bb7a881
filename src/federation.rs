//! Front-server-to-chat-server calls. Each call is a single short-lived TCP
//! connection, encrypted under the base key (the target has no standing
//! session with the caller, so there's no session key to reuse), one
//! request, one reply.

use tokio::io::BufReader;
use tokio::net::TcpStream;

use crate::codec::{self, Envelope};
use crate::protocol::FederatedUser;

async fn round_trip(addr: &str, base_key: &str, request: serde_json::Value) -> anyhow::Result<serde_json::Value> {
    let envelope = Envelope::new(base_key).ok_or_else(|| anyhow::anyhow!("invalid base key"))?;
    let stream = TcpStream::connect(addr).await?;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    codec::write_frame(&mut write_half, &envelope.encrypt(request.to_string().as_bytes())).await?;

    let frame = codec::read_frame(&mut reader)
        .await?
        .ok_or_else(|| anyhow::anyhow!("chat server closed the connection without replying"))?;
    let plaintext = envelope.decrypt(&frame)?;
    Ok(serde_json::from_slice(&plaintext)?)
}

/// Provisions a chat and its members on the chat server that now owns it.
/// Best-effort: failures are logged and swallowed, the binding is recorded
/// regardless (§4.6).
pub async fn notify_createchat(addr: &str, base_key: &str, chatname: &str, users: Vec<FederatedUser>) {
    let request = serde_json::json!({
        "server_operation": "createchat",
        "chatname": chatname,
        "users": users,
    });
    if let Err(err) = round_trip(addr, base_key, request).await {
        tracing::warn!(%addr, %chatname, %err, "createchat federation call failed, binding recorded anyway");
    }
}

/// Tells the chat server a user left. Best-effort, same as above.
pub async fn notify_leavechat(addr: &str, base_key: &str, chatname: &str, username: &str) {
    let request = serde_json::json!({
        "server_operation": "leavechat",
        "chatname": chatname,
        "username": username,
    });
    if let Err(err) = round_trip(addr, base_key, request).await {
        tracing::warn!(%addr, %chatname, %username, %err, "leavechat federation call failed");
    }
}

/// Fetches `number_of_sent_messages` from one chat server. `None` means the
/// server was unreachable or replied unusably; its contribution is skipped.
pub async fn fetch_remote_message_count(addr: &str, base_key: &str) -> Option<u64> {
    let request = serde_json::json!({ "server_operation": "stats" });
    match round_trip(addr, base_key, request).await {
        Ok(reply) => reply.get("number_of_sent_messages").and_then(|v| v.as_u64()),
        Err(err) => {
            tracing::warn!(%addr, %err, "stats federation call failed, skipping this server's contribution");
            None
        }
    }
}

/// Handles an inbound `server_operation` request on this process acting as a
/// chat server.
pub fn handle_inbound(store: &crate::store::Store, op: crate::protocol::ServerOperation) -> serde_json::Value {
    use crate::protocol::{failure, success, ServerOperation};

    match op {
        ServerOperation::Createchat { chatname, users } => {
            for user in &users {
                if !store.exists_user(&user.username) {
                    store.create_user(&user.username, &user.password_hash, true);
                }
            }
            if !store.exists_chat(&chatname) {
                store.create_chat(&chatname);
            }
            for user in &users {
                store.add_user_to_chat(&user.username, &chatname);
            }
            success("Chat provisioned", Default::default())
        }
        ServerOperation::Leavechat { chatname, username } => {
            if store.is_user_in_chat_by_username(&username, &chatname) {
                store.remove_user_from_chat(&username, &chatname);
                success("User removed", Default::default())
            } else {
                failure("User was not a member", Default::default())
            }
        }
        ServerOperation::Stats {} => {
            let stats = store.get_stats();
            let mut extra = serde_json::Map::new();
            extra.insert("number_of_sent_messages".into(), stats.number_of_sent_messages.into());
            success("ok", extra)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[test]
    fn inbound_createchat_provisions_accounts_and_membership() {
        let store = Store::new(&[]);
        let reply = handle_inbound(
            &store,
            crate::protocol::ServerOperation::Createchat {
                chatname: "x".into(),
                users: vec![FederatedUser { username: "bob".into(), password_hash: "deadbeef".into() }],
            },
        );
        assert_eq!(reply["rpl"], "Success");
        assert!(store.exists_user("bob"));
        assert!(store.is_user_in_chat_by_username("bob", "x"));
    }

    #[test]
    fn inbound_stats_reports_message_count() {
        let store = Store::new(&[]);
        store.create_user("alice", "a", false);
        store.create_chat("x");
        store.add_user_to_chat("alice", "x");
        let token = store.open_session("alice");
        store.send_message(&token, "x", "hi");

        let reply = handle_inbound(&store, crate::protocol::ServerOperation::Stats {});
        assert_eq!(reply["number_of_sent_messages"], 1);
    }
}
