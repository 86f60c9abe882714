//! A logged-in editing session against one assigned replica.

use std::net::SocketAddr;

use crate::utils::ChartpaxError;
use crate::server::{ApiReply, ApiRequest, ReplicaId};
use crate::client::{ClientApiStub, ClientCtrlStub};

use bytes::Bytes;

/// Editing session of one user: asks the dispatcher for a replica, then
/// talks to that replica, remembering the token handed out at login.
pub struct EditorSession {
    /// Assigned replica.
    server: ReplicaId,

    /// API stub to the assigned replica.
    api_stub: ClientApiStub,

    /// Account name.
    name: String,

    /// Session token; set on a successful login.
    token: Option<String>,
}

impl EditorSession {
    /// Gets a replica assigned by the dispatcher at `dispatcher` and connects
    /// to it on behalf of account `name`.
    pub async fn new_by_assign(
        dispatcher: SocketAddr,
        name: impl Into<String>,
    ) -> Result<Self, ChartpaxError> {
        let mut ctrl_stub = ClientCtrlStub::new_by_connect(dispatcher).await?;
        let (server, addr) = ctrl_stub.assign().await?;
        ctrl_stub.leave().await?;

        let api_stub = ClientApiStub::new_by_connect(addr).await?;
        pf_info!("c"; "assigned replica {} at '{}'", server, addr);
        Ok(EditorSession {
            server,
            api_stub,
            name: name.into(),
            token: None,
        })
    }

    /// Connects straight to a known replica, bypassing assignment.
    pub async fn new_by_connect(
        server: ReplicaId,
        addr: SocketAddr,
        name: impl Into<String>,
    ) -> Result<Self, ChartpaxError> {
        let api_stub = ClientApiStub::new_by_connect(addr).await?;
        Ok(EditorSession {
            server,
            api_stub,
            name: name.into(),
            token: None,
        })
    }

    #[inline]
    pub fn server(&self) -> ReplicaId {
        self.server
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Reuses a token obtained by an earlier session of the same account.
    pub fn resume(&mut self, token: impl Into<String>) {
        self.token = Some(token.into());
    }

    fn session_token(&self) -> String {
        self.token.clone().unwrap_or_default()
    }

    pub async fn register(
        &mut self,
        password: &str,
    ) -> Result<ApiReply, ChartpaxError> {
        self.api_stub
            .call(&ApiRequest::Register {
                name: self.name.clone(),
                password: password.into(),
            })
            .await
    }

    /// Logs in; the reply message carries the token on success.
    pub async fn login(
        &mut self,
        password: &str,
    ) -> Result<ApiReply, ChartpaxError> {
        let reply = self
            .api_stub
            .call(&ApiRequest::Login {
                name: self.name.clone(),
                password: password.into(),
            })
            .await?;
        if reply.is_success() {
            self.token = Some(reply.message.clone());
        }
        Ok(reply)
    }

    pub async fn logout(&mut self) -> Result<ApiReply, ChartpaxError> {
        let reply = self
            .api_stub
            .call(&ApiRequest::Logout {
                name: self.name.clone(),
                token: self.session_token(),
            })
            .await?;
        if reply.is_success() {
            self.token = None;
        }
        Ok(reply)
    }

    pub async fn create_document(
        &mut self,
        document: &str,
        sections: usize,
    ) -> Result<ApiReply, ChartpaxError> {
        let req = ApiRequest::CreateDocument {
            name: self.name.clone(),
            token: self.session_token(),
            document: document.into(),
            sections,
        };
        self.api_stub.call(&req).await
    }

    /// Starts editing a section; the reply carries its content and the
    /// document's channel address.
    pub async fn begin_edit(
        &mut self,
        document: &str,
        section: usize,
    ) -> Result<ApiReply, ChartpaxError> {
        let req = ApiRequest::BeginEdit {
            name: self.name.clone(),
            token: self.session_token(),
            document: document.into(),
            section,
        };
        self.api_stub.call(&req).await
    }

    pub async fn end_edit(
        &mut self,
        document: &str,
        section: usize,
        content: Bytes,
    ) -> Result<ApiReply, ChartpaxError> {
        let req = ApiRequest::EndEdit {
            name: self.name.clone(),
            token: self.session_token(),
            document: document.into(),
            section,
            content,
        };
        self.api_stub.call(&req).await
    }

    pub async fn share_document(
        &mut self,
        document: &str,
        target: &str,
    ) -> Result<ApiReply, ChartpaxError> {
        let req = ApiRequest::ShareDocument {
            name: self.name.clone(),
            token: self.session_token(),
            document: document.into(),
            target: target.into(),
        };
        self.api_stub.call(&req).await
    }

    pub async fn fetch_notifications(
        &mut self,
    ) -> Result<ApiReply, ChartpaxError> {
        let req = ApiRequest::FetchNotifications {
            name: self.name.clone(),
            token: self.session_token(),
        };
        self.api_stub.call(&req).await
    }

    pub async fn list_documents(&mut self) -> Result<ApiReply, ChartpaxError> {
        let req = ApiRequest::ListDocuments {
            name: self.name.clone(),
            token: self.session_token(),
        };
        self.api_stub.call(&req).await
    }

    /// Leaves the replica, consuming `self`.
    pub async fn leave(self) -> Result<(), ChartpaxError> {
        self.api_stub.leave().await
    }
}
