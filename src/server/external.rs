//! Replica client-facing TCP API.

use std::net::SocketAddr;
use std::sync::Weak;

use crate::utils::{
    recv_frame, send_frame, tcp_bind_with_retry, ChartpaxError,
};
use crate::server::{RejectReason, Rejection, Replica, ReplicaId};

use bytes::Bytes;

use serde::{Deserialize, Serialize};

use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};

/// Request received from client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiRequest {
    /// Register a new account.
    Register { name: String, password: String },

    Login { name: String, password: String },

    Logout { name: String, token: String },

    CreateDocument {
        name: String,
        token: String,
        document: String,
        sections: usize,
    },

    /// Start editing a section; replied with its content and the document's
    /// channel address.
    BeginEdit {
        name: String,
        token: String,
        document: String,
        section: usize,
    },

    /// Finish editing a section, overwriting it with `content`.
    EndEdit {
        name: String,
        token: String,
        document: String,
        section: usize,
        content: Bytes,
    },

    ShareDocument {
        name: String,
        token: String,
        document: String,
        target: String,
    },

    FetchNotifications { name: String, token: String },

    /// Names of documents the caller may edit. Read-only.
    ListDocuments { name: String, token: String },

    /// Client leave notification.
    Leave,
}

/// Reply back to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiReply {
    /// 1 on success, 0 on failure.
    pub status: u8,

    /// Human-readable message; carries the token for a successful login and
    /// the channel address for a successful begin-edit.
    pub message: String,

    /// Set on failure.
    pub reason: Option<RejectReason>,

    /// Section content for begin-edit.
    pub content: Option<Bytes>,

    /// Notifications for fetch-notifications.
    pub notifications: Vec<String>,
}

impl ApiReply {
    pub fn success(message: impl Into<String>) -> Self {
        ApiReply {
            status: 1,
            message: message.into(),
            reason: None,
            content: None,
            notifications: vec![],
        }
    }

    pub fn with_content(mut self, content: Bytes) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_notifications(mut self, notifications: Vec<String>) -> Self {
        self.notifications = notifications;
        self
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.status == 1
    }
}

impl From<Rejection> for ApiReply {
    fn from(rej: Rejection) -> Self {
        ApiReply {
            status: 0,
            message: rej.message,
            reason: Some(rej.reason),
            content: None,
            notifications: vec![],
        }
    }
}

/// The external client-facing API module of one replica. Dropping or
/// shutting it down stops the listener and every client connection.
pub struct ExternalApi {
    /// My replica ID.
    me: ReplicaId,

    /// Address actually bound.
    local_addr: SocketAddr,

    /// Join handle of the client acceptor thread.
    client_acceptor_handle: JoinHandle<()>,
}

// ExternalApi public API implementation
impl ExternalApi {
    /// Binds the client listener on `api_addr` and spawns the client acceptor
    /// thread serving requests against `replica`.
    pub async fn new_and_setup(
        me: ReplicaId,
        api_addr: SocketAddr,
        replica: Weak<Replica>,
    ) -> Result<Self, ChartpaxError> {
        let client_listener = tcp_bind_with_retry(api_addr, 10).await?;
        let local_addr = client_listener.local_addr()?;

        let client_acceptor_handle = tokio::spawn(
            Self::client_acceptor_thread(me, client_listener, replica),
        );

        Ok(ExternalApi {
            me,
            local_addr,
            client_acceptor_handle,
        })
    }

    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting clients and drops all client connections.
    pub fn shutdown(&self) {
        self.client_acceptor_handle.abort();
        pf_debug!(self.me; "external api on '{}' shut down", self.local_addr);
    }
}

impl Drop for ExternalApi {
    fn drop(&mut self) {
        self.client_acceptor_handle.abort();
    }
}

// ExternalApi client_acceptor thread implementation
impl ExternalApi {
    /// Client acceptor thread function. Servant threads live in a `JoinSet`
    /// owned by this thread, so aborting it aborts them too.
    async fn client_acceptor_thread(
        me: ReplicaId,
        client_listener: TcpListener,
        replica: Weak<Replica>,
    ) {
        pf_debug!(me; "client_acceptor thread spawned");

        let mut servants = JoinSet::new();
        loop {
            tokio::select! {
                accepted = client_listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            pf_debug!(me; "accepted client {}", addr);
                            servants.spawn(Self::client_servant_thread(
                                me,
                                addr,
                                stream,
                                replica.clone(),
                            ));
                        }
                        Err(e) => {
                            pf_warn!(me; "error accepting client connection: {}", e);
                        }
                    }
                },

                // reap finished servants
                Some(_) = servants.join_next(), if !servants.is_empty() => {},
            }
        }
    }
}

// ExternalApi client_servant thread implementation
impl ExternalApi {
    /// Client request listener and reply sender thread function.
    async fn client_servant_thread(
        me: ReplicaId,
        addr: SocketAddr,
        mut conn: TcpStream,
        replica: Weak<Replica>,
    ) {
        pf_debug!(me; "client_servant thread for {} spawned", addr);

        let (mut conn_read, mut conn_write) = conn.split();
        loop {
            let req: ApiRequest = match recv_frame(&mut conn_read).await {
                Ok(req) => req,
                Err(e) => {
                    pf_debug!(me; "client {} gone: {}", addr, e);
                    break;
                }
            };

            if req == ApiRequest::Leave {
                if let Err(e) =
                    send_frame(&mut conn_write, &ApiReply::success("Bye"))
                        .await
                {
                    pf_error!(me; "error replying leave to {}: {}", addr, e);
                }
                break;
            }

            let reply = match replica.upgrade() {
                Some(replica) => replica.handle_request(req).await,
                None => Rejection::new(
                    RejectReason::VoteAborted,
                    "Server unavailable.",
                )
                .into(),
            };
            if let Err(e) = send_frame(&mut conn_write, &reply).await {
                pf_error!(me; "error replying to {}: {}", addr, e);
                break;
            }
        }

        pf_debug!(me; "client_servant thread for {} exited", addr);
    }
}
