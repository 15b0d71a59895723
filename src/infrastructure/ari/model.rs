//! ARI wire types
//!
//! Only the fields the orchestrator reads are modelled; everything else in
//! the JSON is ignored.

use crate::domain::call::LegState;
use serde::{Deserialize, Serialize};

/// Caller id block of a channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AriCallerId {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AriChannel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Asterisk channel state (`Down`, `Ring`, `Ringing`, `Up`, ...)
    pub state: String,
    #[serde(default)]
    pub caller: AriCallerId,
}

impl AriChannel {
    pub fn leg_state(&self) -> LegState {
        LegState::from_ari(&self.state)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AriBridge {
    pub id: String,
    #[serde(default)]
    pub bridge_type: String,
    #[serde(default)]
    pub channels: Vec<String>,
}

/// Events of the ARI event feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AriEvent {
    StasisStart {
        channel: AriChannel,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        application: String,
    },
    StasisEnd {
        channel: AriChannel,
    },
    ChannelStateChange {
        channel: AriChannel,
    },
    ChannelHangupRequest {
        channel: AriChannel,
        #[serde(default)]
        cause: Option<i32>,
    },
    ChannelDestroyed {
        channel: AriChannel,
        #[serde(default)]
        cause: Option<i32>,
        #[serde(default)]
        cause_txt: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl AriEvent {
    /// Channel the event is about, if any
    pub fn channel(&self) -> Option<&AriChannel> {
        match self {
            AriEvent::StasisStart { channel, .. }
            | AriEvent::StasisEnd { channel }
            | AriEvent::ChannelStateChange { channel }
            | AriEvent::ChannelHangupRequest { channel, .. }
            | AriEvent::ChannelDestroyed { channel, .. } => Some(channel),
            AriEvent::Unknown => None,
        }
    }
}
