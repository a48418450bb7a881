//! JSON request/reply shapes for both the client-facing protocol (`operation`)
//! and the front/chat-server federation protocol (`server_operation`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Deserialize)]
#[serde(tag = "operation", rename_all = "lowercase")]
pub enum ClientRequest {
    Register {
        username: String,
        password: String,
    },
    Login {
        username: String,
        password: String,
        chatname: Option<String>,
    },
    Createchat {
        username: String,
        password: String,
        chatname: String,
        #[serde(default)]
        users: Vec<String>,
    },
    Sendmsg {
        token: String,
        chatname: String,
        msg: String,
    },
    Recvmsg {
        token: String,
        chatname: String,
    },
    Leavechat {
        username: String,
        password: String,
        chatname: String,
    },
    Listusers {},
    Listchats {},
    Stats {},
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FederatedUser {
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "server_operation", rename_all = "lowercase")]
pub enum ServerOperation {
    Createchat {
        chatname: String,
        users: Vec<FederatedUser>,
    },
    Leavechat {
        chatname: String,
        username: String,
    },
    Stats {},
}

pub const SUCCESS: &str = "Success";
pub const FAILURE: &str = "Failure";

/// Builds `{rpl: "Success", feedback, ...extra}`.
pub fn success(feedback: impl Into<String>, extra: serde_json::Map<String, Value>) -> Value {
    let mut map = serde_json::Map::new();
    map.insert("rpl".into(), SUCCESS.into());
    map.insert("feedback".into(), feedback.into().into());
    map.extend(extra);
    Value::Object(map)
}

/// Builds `{rpl: "Failure", feedback, ...extra}` — also used for the
/// redirect signal, which is a `Failure` reply carrying a `redirect` field.
pub fn failure(feedback: impl Into<String>, extra: serde_json::Map<String, Value>) -> Value {
    let mut map = serde_json::Map::new();
    map.insert("rpl".into(), FAILURE.into());
    map.insert("feedback".into(), feedback.into().into());
    map.extend(extra);
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_login_with_optional_chatname() {
        let req: ClientRequest = serde_json::from_value(serde_json::json!({
            "operation": "login",
            "username": "alice",
            "password": "a",
        }))
        .unwrap();
        assert!(matches!(req, ClientRequest::Login { chatname: None, .. }));
    }

    #[test]
    fn parses_server_operation_createchat() {
        let req: ServerOperation = serde_json::from_value(serde_json::json!({
            "server_operation": "createchat",
            "chatname": "x",
            "users": [{"username": "bob", "password_hash": "deadbeef"}],
        }))
        .unwrap();
        assert!(matches!(req, ServerOperation::Createchat { .. }));
    }

    #[test]
    fn unknown_operation_fails_to_parse() {
        let req: Result<ClientRequest, _> = serde_json::from_value(serde_json::json!({
            "operation": "teleport",
        }));
        assert!(req.is_err());
    }
}
