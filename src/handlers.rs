//! One function per wire operation. Each enforces its own preconditions
//! top-down and returns on the first failure — §7's propagation policy —
//! and none of them mutate the `Store` before every precondition has
//! passed.

use serde_json::{Map, Value};

use crate::config::Config;
use crate::error::HandlerError;
use crate::federation;
use crate::protocol::{failure, success, ClientRequest};
use crate::store::Store;

/// Parses the request and routes it to a handler, producing the full
/// `{rpl, feedback, ...}` reply. `session_token` is filled in by a
/// successful `login` so the dispatcher can close it on teardown.
pub async fn dispatch(store: &Store, config: &Config, request: Value, session_token: &mut Option<String>) -> Value {
    let parsed: Result<ClientRequest, _> = serde_json::from_value(request);
    let Ok(request) = parsed else {
        return failure(HandlerError::InvalidRequest.to_string(), Map::new());
    };

    let outcome = match request {
        ClientRequest::Register { username, password } => register(store, &username, &password),
        ClientRequest::Login { username, password, chatname } => {
            login(store, &username, &password, chatname.as_deref()).map(|(extra, token)| {
                *session_token = Some(token);
                extra
            })
        }
        ClientRequest::Createchat { username, password, chatname, users } => {
            createchat(store, config, &username, &password, &chatname, &users).await
        }
        ClientRequest::Sendmsg { token, chatname, msg } => sendmsg(store, &token, &chatname, &msg),
        ClientRequest::Recvmsg { token, chatname } => recvmsg(store, &token, &chatname),
        ClientRequest::Leavechat { username, password, chatname } => {
            leavechat(store, config, &username, &password, &chatname).await
        }
        ClientRequest::Listusers {} => Ok(listusers(store)),
        ClientRequest::Listchats {} => Ok(listchats(store)),
        ClientRequest::Stats {} => Ok(stats(store, config).await),
    };

    match outcome {
        Ok(extra) => success(success_feedback(&extra), extra),
        Err(HandlerError::Redirect(addr)) => {
            let mut extra = Map::new();
            extra.insert("redirect".into(), addr.into());
            failure(HandlerError::Redirect(String::new()).to_string(), extra)
        }
        Err(err) => failure(err.to_string(), Map::new()),
    }
}

fn success_feedback(extra: &Map<String, Value>) -> &'static str {
    if extra.contains_key("token") {
        "Logged in successfully"
    } else if extra.contains_key("users") {
        "Users listed successfully"
    } else if extra.contains_key("chats") {
        "Chats listed successfully"
    } else if extra.contains_key("stats") {
        "Stats retrieved successfully"
    } else if extra.contains_key("messages") {
        "Messages retrieved successfully"
    } else {
        "OK"
    }
}

fn authenticate(store: &Store, username: &str, password: &str) -> Result<(), HandlerError> {
    if !store.exists_user(username) {
        return Err(HandlerError::UserNotFound);
    }
    if !store.verify_password(username, password) {
        return Err(HandlerError::WrongPassword);
    }
    Ok(())
}

fn register(store: &Store, username: &str, password: &str) -> Result<Map<String, Value>, HandlerError> {
    if store.exists_user(username) {
        return Err(HandlerError::UserAlreadyExists);
    }
    store.create_user(username, password, false);
    Ok(Map::new())
}

/// Returns the reply's extra fields plus the freshly opened session token
/// (the dispatcher needs the latter to close it on teardown).
fn login(
    store: &Store,
    username: &str,
    password: &str,
    chatname: Option<&str>,
) -> Result<(Map<String, Value>, String), HandlerError> {
    authenticate(store, username, password)?;

    if let Some(chatname) = chatname {
        if let Some(addr) = store.get_associated_server(chatname) {
            return Err(HandlerError::Redirect(addr));
        }
        if !store.exists_chat(chatname) {
            return Err(HandlerError::ChatNotFound);
        }
        if !store.is_user_in_chat_by_username(username, chatname) {
            return Err(HandlerError::NotAMember);
        }
    }

    let token = store.open_session(username);
    let mut extra = Map::new();
    extra.insert("token".into(), token.clone().into());
    extra.insert("encryption_key".into(), fernet::Fernet::generate_key().into());

    if let Some(chatname) = chatname {
        extra.insert("messages".into(), store.get_history(chatname).into());
        store.take_unseen(&token, chatname); // clear unseen now that history was sent in full
    }

    Ok((extra, token))
}

async fn createchat(
    store: &Store,
    config: &Config,
    username: &str,
    password: &str,
    chatname: &str,
    users: &[String],
) -> Result<Map<String, Value>, HandlerError> {
    authenticate(store, username, password)?;

    if store.exists_chat(chatname) {
        return Err(HandlerError::ChatAlreadyExists);
    }
    for member in users {
        if !store.exists_user(member) {
            return Err(HandlerError::UserNotFound);
        }
    }

    store.create_chat(chatname);
    store.add_user_to_chat(username, chatname);
    for member in users {
        store.add_user_to_chat(member, chatname);
    }

    if !config.chat_servers.is_empty() {
        if let Some(server) = store.get_lowest_load_server() {
            let members = store.federated_users_for_chat(chatname);
            federation::notify_createchat(&server, &config.base_key, chatname, members).await;
            store.associate_chat_with_server(chatname, &server);
        }
    }

    Ok(Map::new())
}

fn sendmsg(store: &Store, token: &str, chatname: &str, msg: &str) -> Result<Map<String, Value>, HandlerError> {
    ensure_member_by_token(store, token, chatname)?;
    store.send_message(token, chatname, msg);
    Ok(Map::new())
}

fn recvmsg(store: &Store, token: &str, chatname: &str) -> Result<Map<String, Value>, HandlerError> {
    ensure_member_by_token(store, token, chatname)?;
    let mut extra = Map::new();
    extra.insert("messages".into(), store.take_unseen(token, chatname).into());
    Ok(extra)
}

fn ensure_member_by_token(store: &Store, token: &str, chatname: &str) -> Result<(), HandlerError> {
    if !store.is_logged_in(token) {
        return Err(HandlerError::SessionInvalid);
    }
    if !store.exists_chat(chatname) {
        return Err(HandlerError::ChatNotFound);
    }
    if !store.is_user_in_chat_by_token(token, chatname) {
        return Err(HandlerError::NotAMember);
    }
    Ok(())
}

async fn leavechat(
    store: &Store,
    config: &Config,
    username: &str,
    password: &str,
    chatname: &str,
) -> Result<Map<String, Value>, HandlerError> {
    authenticate(store, username, password)?;

    if !store.exists_chat(chatname) {
        return Err(HandlerError::ChatNotFound);
    }
    if !store.is_user_in_chat_by_username(username, chatname) {
        return Err(HandlerError::NotAMember);
    }

    store.remove_user_from_chat(username, chatname);

    if !config.chat_servers.is_empty() {
        if let Some(server) = store.get_associated_server(chatname) {
            federation::notify_leavechat(&server, &config.base_key, chatname, username).await;
        }
    }

    Ok(Map::new())
}

fn listusers(store: &Store) -> Map<String, Value> {
    let mut extra = Map::new();
    extra.insert("users".into(), store.list_users().into());
    extra
}

fn listchats(store: &Store) -> Map<String, Value> {
    let mut extra = Map::new();
    extra.insert("chats".into(), store.list_chats().into());
    extra
}

async fn stats(store: &Store, config: &Config) -> Map<String, Value> {
    let mut stats = store.get_stats();

    if !config.chat_servers.is_empty() {
        for server in &config.chat_servers {
            if let Some(count) = federation::fetch_remote_message_count(server, &config.base_key).await {
                stats.number_of_sent_messages += count;
            }
        }
    }

    let mut extra = Map::new();
    extra.insert("stats".into(), serde_json::to_value(stats).unwrap_or(Value::Null));
    extra
}
