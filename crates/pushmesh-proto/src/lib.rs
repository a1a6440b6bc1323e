//! Wire framing and command envelope shared by the gateway, msgserver and
//! manager binaries.

pub mod command;
pub mod frame;

pub use command::{
    Command, DeleteTopicCmd, Envelope, ManagerInboundCmd, ProtoError, StoreSessionCmd,
    StoreTopicCmd, CONTROL_CHANNELS, DELETE_TOPIC_CMD, STORE_SESSION_CMD, STORE_TOPIC_CMD,
    SYSCTRL_CLIENT_STATUS, SYSCTRL_TOPIC_STATUS,
};
pub use frame::{codec, framed, Framed, MAX_FRAME_LEN};
