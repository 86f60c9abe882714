//! Replica -- client requests entrance.

use super::*;

use crate::utils::{password_digest, session_token};

use bytes::Bytes;

// Replica client requests entrance
impl Replica {
    /// Serves one client request. Every outcome is turned into an
    /// `ApiReply`; nothing here is fatal to the replica.
    pub async fn handle_request(&self, req: ApiRequest) -> ApiReply {
        let result = match req {
            ApiRequest::Register { name, password } => {
                self.handle_register(name, password).await
            }
            ApiRequest::Login { name, password } => {
                self.handle_login(name, password).await
            }
            ApiRequest::Logout { name, token } => {
                self.handle_logout(name, token).await
            }
            ApiRequest::CreateDocument {
                name,
                token,
                document,
                sections,
            } => {
                self.handle_create_document(name, token, document, sections)
                    .await
            }
            ApiRequest::BeginEdit {
                name,
                token,
                document,
                section,
            } => self.handle_begin_edit(name, token, document, section).await,
            ApiRequest::EndEdit {
                name,
                token,
                document,
                section,
                content,
            } => {
                self.handle_end_edit(name, token, document, section, content)
                    .await
            }
            ApiRequest::ShareDocument {
                name,
                token,
                document,
                target,
            } => self.handle_share(name, token, document, target).await,
            ApiRequest::FetchNotifications { name, token } => {
                self.handle_fetch_notifications(name, token).await
            }
            ApiRequest::ListDocuments { name, token } => {
                self.handle_list_documents(name, token)
            }
            ApiRequest::Leave => Ok(ApiReply::success("Bye")),
        };

        match result {
            Ok(reply) => reply,
            Err(rej) => {
                pf_debug!(self.me; "request rejected: {}", rej);
                rej.into()
            }
        }
    }

    /// Checks that `name` is logged in and `token` was issued to it.
    fn check_session(&self, name: &str, token: &str) -> Result<(), Rejection> {
        if !self.sessions.is_logged_in(name) {
            return Err(Rejection::new(
                RejectReason::NotLoggedIn,
                "Not logged in.",
            ));
        }
        if self.sessions.account_of(token).as_deref() != Some(name) {
            return Err(Rejection::new(
                RejectReason::TokenMismatch,
                "User does not match token.",
            ));
        }
        Ok(())
    }

    async fn handle_register(
        &self,
        name: String,
        password: String,
    ) -> Result<ApiReply, Rejection> {
        if name.is_empty() {
            return Err(Rejection::new(
                RejectReason::InvalidArgument,
                "Username must not be empty.",
            ));
        }
        if self.accounts.contains(&name) {
            return Err(Rejection::new(
                RejectReason::AlreadyExists,
                "Username already exists",
            ));
        }

        let digest = password_digest(&password);
        self.commit(Operation::CreateAccount { name, digest }).await?;
        Ok(ApiReply::success("Create user succeed"))
    }

    async fn handle_login(
        &self,
        name: String,
        password: String,
    ) -> Result<ApiReply, Rejection> {
        if self.sessions.is_logged_in(&name) {
            return Err(Rejection::new(
                RejectReason::AlreadyLoggedIn,
                "Already logged in.",
            ));
        }
        let digest = match self.accounts.get(&name) {
            Some(acct) if acct.digest() == password_digest(&password) => {
                acct.digest().to_string()
            }
            _ => {
                return Err(Rejection::new(
                    RejectReason::BadCredentials,
                    "Unregistered or password do not match.",
                ))
            }
        };

        let token = session_token(&digest);
        self.commit(Operation::Login {
            name,
            token: token.clone(),
        })
        .await?;
        Ok(ApiReply::success(token))
    }

    async fn handle_logout(
        &self,
        name: String,
        token: String,
    ) -> Result<ApiReply, Rejection> {
        self.check_session(&name, &token)?;
        self.commit(Operation::Logout { name }).await?;
        Ok(ApiReply::success("succeed"))
    }

    async fn handle_create_document(
        &self,
        name: String,
        token: String,
        document: String,
        sections: usize,
    ) -> Result<ApiReply, Rejection> {
        self.check_session(&name, &token)?;
        if self.documents.contains(&document) {
            return Err(Rejection::new(
                RejectReason::AlreadyExists,
                "Document already exists.",
            ));
        }
        if sections == 0 {
            return Err(Rejection::new(
                RejectReason::InvalidArgument,
                "Section number must be positive.",
            ));
        }
        if !is_valid_document_name(&document) {
            return Err(Rejection::new(
                RejectReason::InvalidArgument,
                "Invalid document name.",
            ));
        }

        self.commit(Operation::CreateDocument {
            actor: name,
            document,
            sections,
        })
        .await?;
        Ok(ApiReply::success("Succeed"))
    }

    async fn handle_begin_edit(
        &self,
        name: String,
        token: String,
        document: String,
        section: usize,
    ) -> Result<ApiReply, Rejection> {
        self.check_session(&name, &token)?;
        let doc = self.lookup_document(&document)?;
        if !doc.permits(&name) {
            return Err(Rejection::new(
                RejectReason::PermissionDenied,
                "You do not have access.",
            ));
        }
        if Self::lookup_section(&doc, section)?.is_occupied() {
            return Err(Rejection::new(
                RejectReason::AlreadyOccupied,
                "The section is being edited",
            ));
        }

        // reserved before the vote and kept even if the vote aborts
        let channel = self.channels.reserve(&document).ok_or_else(|| {
            Rejection::new(
                RejectReason::InvalidArgument,
                "No channel address available.",
            )
        })?;
        self.commit(Operation::BeginEdit {
            actor: name,
            document: document.clone(),
            section,
            channel,
        })
        .await?;

        let path = Self::lookup_section(&doc, section)?.path().to_path_buf();
        let content = match tokio::fs::read(&path).await {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                pf_error!(self.me; "error reading {}: {}", path.display(), e);
                return Err(Rejection::new(
                    RejectReason::NotFound,
                    "Exception while accessing the section",
                ));
            }
        };
        let channel = self.channels.get(&document).unwrap_or(channel);
        Ok(ApiReply::success(channel.to_string()).with_content(content))
    }

    async fn handle_end_edit(
        &self,
        name: String,
        token: String,
        document: String,
        section: usize,
        content: Bytes,
    ) -> Result<ApiReply, Rejection> {
        self.check_session(&name, &token)?;
        let doc = self.lookup_document(&document)?;
        if !doc.permits(&name) {
            return Err(Rejection::new(
                RejectReason::PermissionDenied,
                "You do not have access.",
            ));
        }
        if Self::lookup_section(&doc, section)?.occupant().as_deref()
            != Some(name.as_str())
        {
            return Err(Rejection::new(
                RejectReason::PermissionDenied,
                "The section is being edited by other",
            ));
        }

        self.commit(Operation::EndEdit {
            actor: name,
            document,
            section,
            content,
        })
        .await?;
        Ok(ApiReply::success("Succeed"))
    }

    async fn handle_share(
        &self,
        name: String,
        token: String,
        document: String,
        target: String,
    ) -> Result<ApiReply, Rejection> {
        self.check_session(&name, &token)?;
        let doc = self.lookup_document(&document)?;
        if doc.creator() != name {
            return Err(Rejection::new(
                RejectReason::PermissionDenied,
                "You do not have access.",
            ));
        }
        if !self.accounts.contains(&target) {
            return Err(Rejection::new(
                RejectReason::NotFound,
                "The target user does not exist.",
            ));
        }

        self.commit(Operation::ShareDocument {
            actor: name,
            document,
            target,
        })
        .await?;
        Ok(ApiReply::success("Succeed"))
    }

    async fn handle_fetch_notifications(
        &self,
        name: String,
        token: String,
    ) -> Result<ApiReply, Rejection> {
        self.check_session(&name, &token)?;
        let acct = self.accounts.get(&name).ok_or_else(|| {
            Rejection::new(RejectReason::NotFound, "No such user.")
        })?;

        let pending = acct.notifications();
        if pending.is_empty() {
            return Ok(ApiReply::success("None"));
        }

        // delivery is at-most-once: the drain is decided before the reply
        // reaches the client
        self.commit(Operation::FetchNotifications {
            name,
            count: pending.len(),
        })
        .await?;
        Ok(ApiReply::success(pending.join(",")).with_notifications(pending))
    }

    fn handle_list_documents(
        &self,
        name: String,
        token: String,
    ) -> Result<ApiReply, Rejection> {
        self.check_session(&name, &token)?;
        let names = self.documents.names_permitting(&name);
        if names.is_empty() {
            Ok(ApiReply::success("None"))
        } else {
            Ok(ApiReply::success(names.join(",")))
        }
    }
}

/// Document names become a directory under the data root, so they must be a
/// single plain path component.
fn is_valid_document_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}
