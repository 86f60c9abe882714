//! Replica -- commit pipeline: vote on an operation, apply the decided
//! operation locally, then have it learned everywhere else.

use super::*;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a client request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    NotLoggedIn,
    TokenMismatch,
    NotFound,
    PermissionDenied,
    AlreadyOccupied,
    AlreadyExists,
    AlreadyLoggedIn,
    BadCredentials,
    InvalidArgument,
    VoteAborted,
}

/// A structured rejection with a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: RejectReason,
    pub message: String,
}

impl Rejection {
    pub fn new(reason: RejectReason, message: impl Into<String>) -> Self {
        Rejection {
            reason,
            message: message.into(),
        }
    }

    pub fn vote_aborted() -> Self {
        Self::new(RejectReason::VoteAborted, "Request aborted.")
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.reason, self.message)
    }
}

// Replica commit pipeline
impl Replica {
    /// Votes on `op`, then applies and learns the decided operation. The
    /// decided operation is returned on success. A vote that fails leaves
    /// any pre-vote mutation done by the caller in place.
    pub(crate) async fn commit(
        &self,
        op: Operation,
    ) -> Result<Operation, Rejection> {
        let content = op.encode_content().map_err(|e| {
            pf_error!(self.me; "error encoding {}: {}", op, e);
            Rejection::new(RejectReason::InvalidArgument, e.to_string())
        })?;

        let coordinator = match self.coordinator.upgrade() {
            Some(c) => c,
            None => {
                pf_warn!(self.me; "coordinator gone, aborting {}", op);
                return Err(Rejection::vote_aborted());
            }
        };

        let decided = match coordinator.run_vote(content).await {
            Some(p) => p,
            None => {
                pf_info!(self.me; "vote for {} aborted", op);
                return Err(Rejection::vote_aborted());
            }
        };
        let decided_op = match decided.content().map(Operation::decode_content)
        {
            Some(Ok(decided_op)) => decided_op,
            _ => {
                pf_error!(self.me; "undecodable decided content at vote {}",
                                   decided.vote());
                return Err(Rejection::vote_aborted());
            }
        };
        pf_debug!(self.me; "vote {} decided {}", decided.vote(), decided_op);

        // the vote has passed, so others learn it even if my apply rejects
        let applied = self.apply(&decided_op).await;
        coordinator.learn(decided, self.me).await;
        applied.map(|_| decided_op)
    }

    /// Learner entrance: decodes a decided proposal and applies it. Apply
    /// rejections are logged and not retried.
    pub async fn learn(&self, decided: &Proposal) -> Result<(), ChartpaxError> {
        let op = match decided.content() {
            Some(content) => Operation::decode_content(content)?,
            None => {
                return logged_err!(self.me; "learned vote {} has no content",
                                            decided.vote())
            }
        };
        if let Err(rej) = self.apply(&op).await {
            pf_warn!(self.me; "learned {} rejected on apply: {}", op, rej);
        }
        Ok(())
    }

    /// Performs the primary effect of a decided operation on local state.
    pub(crate) async fn apply(&self, op: &Operation) -> Result<(), Rejection> {
        match op {
            Operation::CreateAccount { name, digest } => {
                if !self.accounts.insert(name, digest) {
                    return Err(Rejection::new(
                        RejectReason::AlreadyExists,
                        "Username already exists",
                    ));
                }
            }

            Operation::Login { name, token } => {
                if !self.sessions.open(name, token) {
                    return Err(Rejection::new(
                        RejectReason::AlreadyLoggedIn,
                        "Already logged in.",
                    ));
                }
            }

            Operation::Logout { name } => {
                if !self.sessions.close(name) {
                    return Err(Rejection::new(
                        RejectReason::NotLoggedIn,
                        "Not logged in.",
                    ));
                }
            }

            Operation::CreateDocument {
                actor,
                document,
                sections,
            } => {
                if self.documents.contains(document) {
                    return Err(Rejection::new(
                        RejectReason::AlreadyExists,
                        "Document already exists.",
                    ));
                }
                let doc = self
                    .create_document_storage(actor, document, *sections)
                    .await;
                if !self.documents.insert(doc) {
                    return Err(Rejection::new(
                        RejectReason::AlreadyExists,
                        "Document already exists.",
                    ));
                }
            }

            Operation::BeginEdit {
                actor,
                document,
                section,
                channel,
            } => {
                let doc = self.lookup_document(document)?;
                let sec = Self::lookup_section(&doc, *section)?;
                if !sec.claim(actor) {
                    return Err(Rejection::new(
                        RejectReason::AlreadyOccupied,
                        "The section is being edited",
                    ));
                }
                self.channels.record(document, *channel);
            }

            Operation::EndEdit {
                document,
                section,
                content,
                ..
            } => {
                let doc = self.lookup_document(document)?;
                let sec = Self::lookup_section(&doc, *section)?;
                if let Err(e) = tokio::fs::write(sec.path(), content).await {
                    pf_error!(self.me; "error writing {}: {}",
                                       sec.path().display(), e);
                }
                sec.occupy(None);
                if doc.occupied_sections().is_empty() {
                    self.channels.retire(document);
                }
            }

            Operation::ShareDocument {
                document, target, ..
            } => {
                let doc = self.lookup_document(document)?;
                let target_acct = self.accounts.get(target).ok_or_else(|| {
                    Rejection::new(
                        RejectReason::NotFound,
                        "The target user does not exist.",
                    )
                })?;
                doc.add_coauthor(target);
                target_acct.push_notification(document.clone());
            }

            Operation::FetchNotifications { name, count } => {
                let acct = self.accounts.get(name).ok_or_else(|| {
                    Rejection::new(RejectReason::NotFound, "No such user.")
                })?;
                acct.drain_notifications(*count);
            }
        }

        pf_trace!(self.me; "applied {}", op);
        Ok(())
    }

    /// Creates the directory and empty section files of a new document under
    /// my own data root. I/O failures are logged; the record is still built.
    async fn create_document_storage(
        &self,
        actor: &str,
        document: &str,
        sections: usize,
    ) -> Document {
        let dir = self.data_root.join(DOCS_DIR).join(document);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            pf_error!(self.me; "error creating {}: {}", dir.display(), e);
        }

        let mut subdivisions = Vec::with_capacity(sections);
        for i in 0..sections {
            let path = dir.join(format!("section{}", i));
            if let Err(e) = tokio::fs::write(&path, b"").await {
                pf_error!(self.me; "error creating {}: {}", path.display(), e);
            }
            subdivisions.push(Subdivision::new(path));
        }
        Document::new(document.into(), actor.into(), subdivisions)
    }

    pub(crate) fn lookup_document(
        &self,
        document: &str,
    ) -> Result<Arc<Document>, Rejection> {
        self.documents.get(document).ok_or_else(|| {
            Rejection::new(RejectReason::NotFound, "Document does not exist.")
        })
    }

    pub(crate) fn lookup_section(
        doc: &Document,
        section: usize,
    ) -> Result<&Subdivision, Rejection> {
        doc.section(section).ok_or_else(|| {
            Rejection::new(RejectReason::NotFound, "Section does not exist.")
        })
    }
}
