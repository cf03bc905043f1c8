use serde::{Deserialize, Serialize};

use crate::challenge::ChallengeMechanism;
use crate::ident::SignupBundle;

/// Messages a peer may send, tagged by the protocol verb.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "signup")]
    Signup(SignupBundle),

    #[serde(rename = "listPeeps")]
    ListPeeps,
}

impl ClientMessage {
    /// The verb the dispatcher keys on.
    pub fn verb(&self) -> &'static str {
        match self {
            ClientMessage::Signup(_) => "signup",
            ClientMessage::ListPeeps => "listPeeps",
        }
    }
}

/// Terminal messages the server answers with. Exactly one is sent per
/// completed task, then the connection closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "challenge")]
    Challenge { challenge: ChallengeInfo },

    #[serde(rename = "signedUp")]
    SignedUp,

    #[serde(rename = "listing")]
    #[serde(rename_all = "camelCase")]
    Listing { self_ident_blobs: Vec<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeInfo {
    pub mechanism: ChallengeMechanism,
}

impl ServerMessage {
    pub fn challenge(mechanism: ChallengeMechanism) -> Self {
        ServerMessage::Challenge {
            challenge: ChallengeInfo { mechanism },
        }
    }
}
