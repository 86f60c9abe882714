//! Tagged union of state-changing operations: the unit of replication.

use std::fmt;
use std::net::Ipv4Addr;

use crate::utils::ChartpaxError;

use bytes::Bytes;

use serde::{Deserialize, Serialize};

/// A replicated operation. Votes are taken on its JSON encoding, so every
/// field a learner needs to reproduce the effect is carried here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Operation {
    CreateAccount {
        name: String,
        digest: String,
    },

    Login {
        name: String,
        /// Generated by the proposing replica before the vote.
        token: String,
    },

    Logout {
        name: String,
    },

    CreateDocument {
        actor: String,
        document: String,
        sections: usize,
    },

    BeginEdit {
        actor: String,
        document: String,
        section: usize,
        /// Reserved by the proposing replica before the vote.
        channel: Ipv4Addr,
    },

    EndEdit {
        actor: String,
        document: String,
        section: usize,
        content: Bytes,
    },

    ShareDocument {
        actor: String,
        document: String,
        target: String,
    },

    /// Drains the first `count` notifications of `name`.
    FetchNotifications {
        name: String,
        count: usize,
    },
}

impl Operation {
    /// Short tag name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::CreateAccount { .. } => "CreateAccount",
            Operation::Login { .. } => "Login",
            Operation::Logout { .. } => "Logout",
            Operation::CreateDocument { .. } => "CreateDocument",
            Operation::BeginEdit { .. } => "BeginEdit",
            Operation::EndEdit { .. } => "EndEdit",
            Operation::ShareDocument { .. } => "ShareDocument",
            Operation::FetchNotifications { .. } => "FetchNotifications",
        }
    }

    /// Encodes into proposal content.
    pub fn encode_content(&self) -> Result<String, ChartpaxError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes from decided proposal content.
    pub fn decode_content(content: &str) -> Result<Self, ChartpaxError> {
        Ok(serde_json::from_str(content)?)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operation::CreateAccount { name, .. }
            | Operation::Login { name, .. }
            | Operation::Logout { name }
            | Operation::FetchNotifications { name, .. } => {
                write!(f, "{} {}", self.kind(), name)
            }
            Operation::CreateDocument { actor, document, sections } => {
                write!(f, "{} {} '{}' x{}", self.kind(), actor, document,
                       sections)
            }
            Operation::BeginEdit { actor, document, section, .. }
            | Operation::EndEdit { actor, document, section, .. } => {
                write!(f, "{} {} '{}' #{}", self.kind(), actor, document,
                       section)
            }
            Operation::ShareDocument { actor, document, target } => {
                write!(f, "{} {} '{}' -> {}", self.kind(), actor, document,
                       target)
            }
        }
    }
}
