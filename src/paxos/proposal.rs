//! Proposal and promise value types.

use serde::{Deserialize, Serialize};

/// Vote number type; strictly increasing across votes issued by the
/// dispatcher. Zero is reserved for the empty proposal.
pub type VoteNumber = u64;

/// A proposal carrying a vote number and an opaque content label.
///
/// Equality is by vote number plus case-insensitive content; ranking between
/// proposals only looks at the vote number (see `outranks()`), so no `Ord` is
/// derived here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Proposal {
    vote: VoteNumber,
    content: Option<String>,
}

impl Proposal {
    /// Creates a new proposal with given vote number and content.
    pub fn new(vote: VoteNumber, content: impl Into<String>) -> Self {
        Proposal {
            vote,
            content: Some(content.into()),
        }
    }

    /// The vote number.
    #[inline]
    pub fn vote(&self) -> VoteNumber {
        self.vote
    }

    /// The content label, `None` for the empty proposal.
    #[inline]
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    /// Is this the empty proposal (vote 0, no content)?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vote == 0 && self.content.is_none()
    }

    /// Does this proposal carry a strictly higher vote number than `other`?
    #[inline]
    pub fn outranks(&self, other: &Proposal) -> bool {
        self.vote > other.vote
    }
}

impl PartialEq for Proposal {
    fn eq(&self, other: &Self) -> bool {
        if self.vote != other.vote {
            return false;
        }
        match (&self.content, &other.content) {
            (Some(a), Some(b)) => a.to_lowercase() == b.to_lowercase(),
            (None, None) => true,
            _ => false,
        }
    }
}

impl Eq for Proposal {}

/// Acceptor's answer to a prepare request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promise {
    /// Whether the acceptor promised this proposal.
    pub ack: bool,

    /// The proposal held before this promise; `None` on rejection.
    pub previous: Option<Proposal>,
}

impl Promise {
    pub(crate) fn granted(previous: Proposal) -> Self {
        Promise {
            ack: true,
            previous: Some(previous),
        }
    }

    pub(crate) fn rejected() -> Self {
        Promise {
            ack: false,
            previous: None,
        }
    }
}
