//! The JSON command envelope and the closed set of commands it carries.
//!
//! Every client-facing and inter-node frame is `{"CmdName": "...", "Args":
//! [...]}`. `STORE_SESSION_CMD` / `STORE_TOPIC_CMD` (MsgServer -> Manager
//! only) instead carry typed body fields — see [`StoreSessionCmd`] and
//! [`StoreTopicCmd`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Control channel names, enumerated at startup.
pub const SYSCTRL_CLIENT_STATUS: &str = "SYSCTRL_CLIENT_STATUS";
pub const SYSCTRL_TOPIC_STATUS: &str = "SYSCTRL_TOPIC_STATUS";

/// Every fixed control channel a MsgServer creates at startup.
pub const CONTROL_CHANNELS: &[&str] = &[SYSCTRL_CLIENT_STATUS, SYSCTRL_TOPIC_STATUS];

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("malformed command envelope: {0}")]
    MalformedJson(#[from] serde_json::Error),
    #[error("command {cmd_name} requires {expected} args, got {actual}")]
    ArityMismatch {
        cmd_name: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// The raw envelope as it appears on the wire, before arity validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "CmdName")]
    pub cmd_name: String,
    #[serde(rename = "Args", default)]
    pub args: Vec<String>,
}

/// Every `CmdName` the dispatcher understands, as a closed enum. Matching
/// on this exhaustively (plus the explicit `Unknown` catch-all) means a new
/// command added to the wire protocol must also be added here, rather than
/// silently falling through a string `switch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SendPing,
    SendClientId { client_id: String },
    SubscribeChannel { channel: String, subscriber_uuid: Option<String> },
    SendMessageP2p { dest_client_id: String, payload: String },
    RouteMessageP2p { dest_client_id: String, payload: String },
    CreateTopic { name: String },
    JoinTopic { name: String },
    SendMessageTopic { name: String, payload: String },
    /// Forward-compatible catch-all: parses fine, dispatcher logs and drops.
    Unknown(String),
}

const SEND_PING_CMD: &str = "SEND_PING_CMD";
const SEND_CLIENT_ID_CMD: &str = "SEND_CLIENT_ID_CMD";
const SUBSCRIBE_CHANNEL_CMD: &str = "SUBSCRIBE_CHANNEL_CMD";
const SEND_MESSAGE_P2P_CMD: &str = "SEND_MESSAGE_P2P_CMD";
const ROUTE_MESSAGE_P2P_CMD: &str = "ROUTE_MESSAGE_P2P_CMD";
const CREATE_TOPIC_CMD: &str = "CREATE_TOPIC_CMD";
const JOIN_TOPIC_CMD: &str = "JOIN_TOPIC_CMD";
const SEND_MESSAGE_TOPIC_CMD: &str = "SEND_MESSAGE_TOPIC_CMD";

impl Command {
    /// Parse a raw frame body into a `Command`. Unknown `CmdName`s decode to
    /// `Command::Unknown` rather than erroring — only truly malformed JSON
    /// or an arity mismatch on a *known* command is a [`ProtoError`].
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtoError> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        Self::from_envelope(envelope)
    }

    pub fn from_envelope(envelope: Envelope) -> Result<Self, ProtoError> {
        let Envelope { cmd_name, args } = envelope;
        let cmd = match cmd_name.as_str() {
            SEND_PING_CMD => Command::SendPing,
            SEND_CLIENT_ID_CMD => Command::SendClientId {
                client_id: arg(&args, 0, SEND_CLIENT_ID_CMD, 1)?,
            },
            SUBSCRIBE_CHANNEL_CMD => Command::SubscribeChannel {
                channel: arg(&args, 0, SUBSCRIBE_CHANNEL_CMD, 1)?,
                subscriber_uuid: args.get(1).cloned(),
            },
            SEND_MESSAGE_P2P_CMD => Command::SendMessageP2p {
                dest_client_id: arg(&args, 0, SEND_MESSAGE_P2P_CMD, 2)?,
                payload: arg(&args, 1, SEND_MESSAGE_P2P_CMD, 2)?,
            },
            ROUTE_MESSAGE_P2P_CMD => Command::RouteMessageP2p {
                dest_client_id: arg(&args, 0, ROUTE_MESSAGE_P2P_CMD, 2)?,
                payload: arg(&args, 1, ROUTE_MESSAGE_P2P_CMD, 2)?,
            },
            CREATE_TOPIC_CMD => Command::CreateTopic {
                name: arg(&args, 0, CREATE_TOPIC_CMD, 1)?,
            },
            JOIN_TOPIC_CMD => Command::JoinTopic {
                name: arg(&args, 0, JOIN_TOPIC_CMD, 1)?,
            },
            SEND_MESSAGE_TOPIC_CMD => Command::SendMessageTopic {
                name: arg(&args, 0, SEND_MESSAGE_TOPIC_CMD, 2)?,
                payload: arg(&args, 1, SEND_MESSAGE_TOPIC_CMD, 2)?,
            },
            other => Command::Unknown(other.to_string()),
        };
        Ok(cmd)
    }

    /// Encode back into the wire envelope (used for forwarding
    /// `ROUTE_MESSAGE_P2P_CMD` to a peer MsgServer, and for client-originated
    /// commands in tests).
    pub fn encode(&self) -> Vec<u8> {
        let envelope = match self {
            Command::SendPing => Envelope {
                cmd_name: SEND_PING_CMD.to_string(),
                args: vec![],
            },
            Command::SendClientId { client_id } => Envelope {
                cmd_name: SEND_CLIENT_ID_CMD.to_string(),
                args: vec![client_id.clone()],
            },
            Command::SubscribeChannel { channel, subscriber_uuid } => Envelope {
                cmd_name: SUBSCRIBE_CHANNEL_CMD.to_string(),
                args: match subscriber_uuid {
                    Some(uuid) => vec![channel.clone(), uuid.clone()],
                    None => vec![channel.clone()],
                },
            },
            Command::SendMessageP2p { dest_client_id, payload } => Envelope {
                cmd_name: SEND_MESSAGE_P2P_CMD.to_string(),
                args: vec![dest_client_id.clone(), payload.clone()],
            },
            Command::RouteMessageP2p { dest_client_id, payload } => Envelope {
                cmd_name: ROUTE_MESSAGE_P2P_CMD.to_string(),
                args: vec![dest_client_id.clone(), payload.clone()],
            },
            Command::CreateTopic { name } => Envelope {
                cmd_name: CREATE_TOPIC_CMD.to_string(),
                args: vec![name.clone()],
            },
            Command::JoinTopic { name } => Envelope {
                cmd_name: JOIN_TOPIC_CMD.to_string(),
                args: vec![name.clone()],
            },
            Command::SendMessageTopic { name, payload } => Envelope {
                cmd_name: SEND_MESSAGE_TOPIC_CMD.to_string(),
                args: vec![name.clone(), payload.clone()],
            },
            Command::Unknown(cmd_name) => Envelope {
                cmd_name: cmd_name.clone(),
                args: vec![],
            },
        };
        serde_json::to_vec(&envelope).expect("Envelope always serializes")
    }

    /// Human-readable `CmdName`, for logging.
    pub fn cmd_name(&self) -> &str {
        match self {
            Command::SendPing => SEND_PING_CMD,
            Command::SendClientId { .. } => SEND_CLIENT_ID_CMD,
            Command::SubscribeChannel { .. } => SUBSCRIBE_CHANNEL_CMD,
            Command::SendMessageP2p { .. } => SEND_MESSAGE_P2P_CMD,
            Command::RouteMessageP2p { .. } => ROUTE_MESSAGE_P2P_CMD,
            Command::CreateTopic { .. } => CREATE_TOPIC_CMD,
            Command::JoinTopic { .. } => JOIN_TOPIC_CMD,
            Command::SendMessageTopic { .. } => SEND_MESSAGE_TOPIC_CMD,
            Command::Unknown(cmd_name) => cmd_name,
        }
    }
}

fn arg(
    args: &[String],
    index: usize,
    cmd_name: &'static str,
    expected: usize,
) -> Result<String, ProtoError> {
    args.get(index).cloned().ok_or(ProtoError::ArityMismatch {
        cmd_name,
        expected,
        actual: args.len(),
    })
}

/// MsgServer -> Manager: mirror a freshly registered session into the KV
/// store. Sent on [`SYSCTRL_CLIENT_STATUS`] instead of the simple envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSessionCmd {
    #[serde(rename = "CmdName")]
    pub cmd_name: String,
    #[serde(rename = "ClientID")]
    pub client_id: String,
    #[serde(rename = "ClientAddr")]
    pub client_addr: String,
    #[serde(rename = "MsgServerAddr")]
    pub msg_server_addr: String,
}

pub const STORE_SESSION_CMD: &str = "STORE_SESSION_CMD";

impl StoreSessionCmd {
    pub fn new(client_id: String, client_addr: String, msg_server_addr: String) -> Self {
        Self {
            cmd_name: STORE_SESSION_CMD.to_string(),
            client_id,
            client_addr,
            msg_server_addr,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("StoreSessionCmd always serializes")
    }
}

/// MsgServer -> Manager: mirror a topic mutation into the KV store. Sent on
/// [`SYSCTRL_TOPIC_STATUS`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreTopicCmd {
    #[serde(rename = "CmdName")]
    pub cmd_name: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "CreatorID")]
    pub creator_id: String,
    #[serde(rename = "MemberList")]
    pub member_list: Vec<String>,
}

pub const STORE_TOPIC_CMD: &str = "STORE_TOPIC_CMD";

impl StoreTopicCmd {
    pub fn new(name: String, creator_id: String, member_list: Vec<String>) -> Self {
        Self {
            cmd_name: STORE_TOPIC_CMD.to_string(),
            name,
            creator_id,
            member_list,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("StoreTopicCmd always serializes")
    }
}

/// MsgServer -> Manager: tear down a topic whose creator's session just
/// disconnected, removing it from the cluster-wide KV mirror. Sent on
/// [`SYSCTRL_TOPIC_STATUS`], same as [`StoreTopicCmd`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteTopicCmd {
    #[serde(rename = "CmdName")]
    pub cmd_name: String,
    #[serde(rename = "Name")]
    pub name: String,
}

pub const DELETE_TOPIC_CMD: &str = "DELETE_TOPIC_CMD";

impl DeleteTopicCmd {
    pub fn new(name: String) -> Self {
        Self {
            cmd_name: DELETE_TOPIC_CMD.to_string(),
            name,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("DeleteTopicCmd always serializes")
    }
}

/// The subset of command names a Manager's control-channel switch
/// understands. Anything else on those channels is a protocol error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerInboundCmd {
    StoreSession(StoreSessionCmd),
    StoreTopic(StoreTopicCmd),
    DeleteTopic(DeleteTopicCmd),
    Unknown(String),
}

impl ManagerInboundCmd {
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtoError> {
        let probe: Envelope = serde_json::from_slice(bytes)?;
        match probe.cmd_name.as_str() {
            STORE_SESSION_CMD => Ok(ManagerInboundCmd::StoreSession(serde_json::from_slice(bytes)?)),
            STORE_TOPIC_CMD => Ok(ManagerInboundCmd::StoreTopic(serde_json::from_slice(bytes)?)),
            DELETE_TOPIC_CMD => Ok(ManagerInboundCmd::DeleteTopic(serde_json::from_slice(bytes)?)),
            other => Ok(ManagerInboundCmd::Unknown(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(cmd: Command) {
        let encoded = cmd.encode();
        let decoded = Command::decode(&encoded).unwrap();
        assert_eq!(cmd, decoded);
    }

    #[test]
    fn every_known_cmd_name_round_trips() {
        round_trip(Command::SendPing);
        round_trip(Command::SendClientId { client_id: "alice".into() });
        round_trip(Command::SubscribeChannel {
            channel: SYSCTRL_CLIENT_STATUS.into(),
            subscriber_uuid: Some("uuid-1".into()),
        });
        round_trip(Command::SubscribeChannel {
            channel: SYSCTRL_CLIENT_STATUS.into(),
            subscriber_uuid: None,
        });
        round_trip(Command::SendMessageP2p { dest_client_id: "bob".into(), payload: "hi".into() });
        round_trip(Command::RouteMessageP2p { dest_client_id: "bob".into(), payload: "hi".into() });
        round_trip(Command::CreateTopic { name: "t".into() });
        round_trip(Command::JoinTopic { name: "t".into() });
        round_trip(Command::SendMessageTopic { name: "t".into(), payload: "hello".into() });
    }

    #[test]
    fn unknown_cmd_name_parses_without_error() {
        let bytes = br#"{"CmdName":"SOME_FUTURE_CMD","Args":["x"]}"#;
        let cmd = Command::decode(bytes).unwrap();
        assert_eq!(cmd, Command::Unknown("SOME_FUTURE_CMD".into()));
    }

    #[test]
    fn malformed_json_is_a_proto_error() {
        let bytes = b"not json";
        assert!(Command::decode(bytes).is_err());
    }

    #[test]
    fn missing_required_arg_is_arity_mismatch() {
        let bytes = br#"{"CmdName":"SEND_CLIENT_ID_CMD","Args":[]}"#;
        let err = Command::decode(bytes).unwrap_err();
        assert!(matches!(err, ProtoError::ArityMismatch { .. }));
    }

    #[test]
    fn manager_inbound_store_session_decodes() {
        let cmd = StoreSessionCmd::new("alice".into(), "1.2.3.4:1".into(), "10.0.0.1:8000".into());
        let decoded = ManagerInboundCmd::decode(&cmd.encode()).unwrap();
        assert_eq!(decoded, ManagerInboundCmd::StoreSession(cmd));
    }

    #[test]
    fn manager_inbound_store_topic_decodes() {
        let cmd = StoreTopicCmd::new("t".into(), "alice".into(), vec!["alice".into(), "bob".into()]);
        let decoded = ManagerInboundCmd::decode(&cmd.encode()).unwrap();
        assert_eq!(decoded, ManagerInboundCmd::StoreTopic(cmd));
    }

    #[test]
    fn manager_inbound_delete_topic_decodes() {
        let cmd = DeleteTopicCmd::new("t".into());
        let decoded = ManagerInboundCmd::decode(&cmd.encode()).unwrap();
        assert_eq!(decoded, ManagerInboundCmd::DeleteTopic(cmd));
    }
}
