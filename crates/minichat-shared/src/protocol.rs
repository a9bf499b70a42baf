//! JSON wire protocol spoken over the `/ws` WebSocket.
//!
//! Every frame is an object dispatched by its `type` tag. Inbound frames
//! decode into [`ClientFrame`]; tags the server does not know decode into
//! [`ClientFrame::Unknown`] and are ignored. Outbound events are
//! [`ServerEvent`]s.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MinichatError;
use crate::types::{
    CallId, ChannelEndpoint, ChannelMessage, ChatMessage, ConversationId, MessageContent, UserId,
    UserProfile,
};

/// Frames sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Bind this connection to the session's user.
    Auth { token: String },

    #[serde(rename_all = "camelCase")]
    SendMessage {
        chat_id: ConversationId,
        #[serde(flatten)]
        content: MessageContent,
    },

    #[serde(rename_all = "camelCase")]
    Typing { chat_id: ConversationId },

    #[serde(rename_all = "camelCase")]
    Read { chat_id: ConversationId },

    StartCall { to: UserId },

    #[serde(rename_all = "camelCase")]
    AcceptCall { call_id: CallId },

    #[serde(rename_all = "camelCase")]
    EndCall { call_id: CallId },

    #[serde(rename_all = "camelCase")]
    RtcOffer { call_id: CallId, offer: Value },

    #[serde(rename_all = "camelCase")]
    RtcAnswer { call_id: CallId, answer: Value },

    #[serde(rename_all = "camelCase")]
    RtcIce { call_id: CallId, candidate: Value },

    #[serde(rename_all = "camelCase")]
    StartGroupCall { group_id: ConversationId },

    #[serde(rename_all = "camelCase")]
    JoinGroupCall { group_id: ConversationId },

    #[serde(rename_all = "camelCase")]
    LeaveGroupCall { group_id: ConversationId },

    #[serde(rename_all = "camelCase")]
    GroupRtcOffer {
        group_id: ConversationId,
        to: UserId,
        offer: Value,
    },

    #[serde(rename_all = "camelCase")]
    GroupRtcAnswer {
        group_id: ConversationId,
        to: UserId,
        answer: Value,
    },

    #[serde(rename_all = "camelCase")]
    GroupRtcIce {
        group_id: ConversationId,
        to: UserId,
        candidate: Value,
    },

    #[serde(rename_all = "camelCase")]
    ChannelMessage {
        channel_id: ConversationId,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        image: Option<String>,
        #[serde(default)]
        endpoint: ChannelEndpoint,
    },

    /// Any tag not listed above.
    #[serde(other)]
    Unknown,
}

impl ClientFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Tag name, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::SendMessage { .. } => "send_message",
            Self::Typing { .. } => "typing",
            Self::Read { .. } => "read",
            Self::StartCall { .. } => "start_call",
            Self::AcceptCall { .. } => "accept_call",
            Self::EndCall { .. } => "end_call",
            Self::RtcOffer { .. } => "rtc_offer",
            Self::RtcAnswer { .. } => "rtc_answer",
            Self::RtcIce { .. } => "rtc_ice",
            Self::StartGroupCall { .. } => "start_group_call",
            Self::JoinGroupCall { .. } => "join_group_call",
            Self::LeaveGroupCall { .. } => "leave_group_call",
            Self::GroupRtcOffer { .. } => "group_rtc_offer",
            Self::GroupRtcAnswer { .. } => "group_rtc_answer",
            Self::GroupRtcIce { .. } => "group_rtc_ice",
            Self::ChannelMessage { .. } => "channel_message",
            Self::Unknown => "unknown",
        }
    }
}

/// Opaque signaling payload relayed between call peers.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Offer(Value),
    Answer(Value),
    Ice(Value),
}

/// A chat message as delivered to clients: the stored record plus the
/// sender's profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    #[serde(flatten)]
    pub message: ChatMessage,
    pub from_user: Option<UserProfile>,
}

/// A channel post or chat entry as delivered to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessageView {
    #[serde(flatten)]
    pub message: ChannelMessage,
    pub author: Option<UserProfile>,
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    AuthSuccess { user: UserProfile },

    /// Generic failure, sent only to the originating connection.
    Error { error: String },

    #[serde(rename_all = "camelCase")]
    NewMessage {
        chat_id: ConversationId,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_group: bool,
        message: MessageView,
    },

    LevelUp { level: u32, bonus: i64 },

    #[serde(rename_all = "camelCase")]
    Typing {
        chat_id: ConversationId,
        user_id: UserId,
    },

    #[serde(rename_all = "camelCase")]
    UserOnline { user_id: UserId },

    #[serde(rename_all = "camelCase")]
    UserOffline { user_id: UserId },

    #[serde(rename_all = "camelCase")]
    CallStarted { call_id: CallId },

    #[serde(rename_all = "camelCase")]
    IncomingCall {
        call_id: CallId,
        from: UserId,
        name: String,
        avatar: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    CallAccepted { call_id: CallId },

    #[serde(rename_all = "camelCase")]
    CallEnded { call_id: CallId },

    CallError { error: String },

    #[serde(rename_all = "camelCase")]
    RtcOffer {
        call_id: CallId,
        from: UserId,
        offer: Value,
    },

    #[serde(rename_all = "camelCase")]
    RtcAnswer {
        call_id: CallId,
        from: UserId,
        answer: Value,
    },

    #[serde(rename_all = "camelCase")]
    RtcIce {
        call_id: CallId,
        from: UserId,
        candidate: Value,
    },

    #[serde(rename_all = "camelCase")]
    GroupCallStarted {
        group_id: ConversationId,
        group_name: String,
        call_id: CallId,
        participants: Vec<UserProfile>,
    },

    #[serde(rename_all = "camelCase")]
    IncomingGroupCall {
        group_id: ConversationId,
        group_name: String,
        call_id: CallId,
        participants: Vec<UserProfile>,
    },

    #[serde(rename_all = "camelCase")]
    GroupCallUpdated {
        group_id: ConversationId,
        participants: Vec<UserProfile>,
    },

    #[serde(rename_all = "camelCase")]
    GroupCallEnded {
        group_id: ConversationId,
        participants: Vec<UserProfile>,
    },

    #[serde(rename_all = "camelCase")]
    GroupRtcOffer {
        group_id: ConversationId,
        from: UserId,
        to: UserId,
        offer: Value,
    },

    #[serde(rename_all = "camelCase")]
    GroupRtcAnswer {
        group_id: ConversationId,
        from: UserId,
        to: UserId,
        answer: Value,
    },

    #[serde(rename_all = "camelCase")]
    GroupRtcIce {
        group_id: ConversationId,
        from: UserId,
        to: UserId,
        candidate: Value,
    },

    #[serde(rename_all = "camelCase")]
    GroupInvite {
        group_id: ConversationId,
        group_name: String,
    },

    #[serde(rename_all = "camelCase")]
    ChannelPost {
        channel_id: ConversationId,
        post: ChannelMessageView,
    },

    #[serde(rename_all = "camelCase")]
    ChannelChat {
        channel_id: ConversationId,
        message: ChannelMessageView,
    },
}

impl ServerEvent {
    pub fn error(msg: impl Into<String>) -> Self {
        Self::Error { error: msg.into() }
    }

    /// 1:1 relay event carrying the sender identity.
    pub fn rtc(call_id: CallId, from: UserId, signal: Signal) -> Self {
        match signal {
            Signal::Offer(offer) => Self::RtcOffer { call_id, from, offer },
            Signal::Answer(answer) => Self::RtcAnswer { call_id, from, answer },
            Signal::Ice(candidate) => Self::RtcIce { call_id, from, candidate },
        }
    }

    /// Point-to-point group call relay event.
    pub fn group_rtc(
        group_id: ConversationId,
        from: UserId,
        to: UserId,
        signal: Signal,
    ) -> Self {
        match signal {
            Signal::Offer(offer) => Self::GroupRtcOffer { group_id, from, to, offer },
            Signal::Answer(answer) => Self::GroupRtcAnswer { group_id, from, to, answer },
            Signal::Ice(candidate) => Self::GroupRtcIce { group_id, from, to, candidate },
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<&MinichatError> for ServerEvent {
    fn from(err: &MinichatError) -> Self {
        match err {
            MinichatError::Call(msg) => Self::CallError { error: msg.clone() },
            other => Self::error(other.to_string()),
        }
    }
}
