//! Dispatcher control API: client assignment and administration over TCP.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::utils::{
    recv_frame, send_frame, tcp_bind_with_retry, ChartpaxError,
};
use crate::server::ReplicaId;
use crate::manager::{Dispatcher, ReplicaStatus};

use serde::{Deserialize, Serialize};

use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};

/// Control request from a client or administrator.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum CtrlRequest {
    /// Ask for a live replica to talk to.
    Assign,

    /// Mark a replica dead.
    Kill { id: ReplicaId },

    /// Restart a dead replica and recover it from a live peer.
    Restart { id: ReplicaId },

    /// Query all replicas' statuses.
    QueryStatus,

    /// Set a replica's status.
    SetStatus { id: ReplicaId, status: ReplicaStatus },

    /// Client leave notification.
    Leave,
}

/// Control reply.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub enum CtrlReply {
    /// Assigned replica and its client API address; `None` if no replica
    /// is available.
    Assign {
        server: Option<(ReplicaId, SocketAddr)>,
    },

    Kill {
        error: Option<String>,
    },

    Restart {
        recovered: bool,
        error: Option<String>,
    },

    QueryStatus {
        statuses: Vec<(ReplicaId, ReplicaStatus)>,
    },

    SetStatus {
        error: Option<String>,
    },

    Leave,
}

/// The control API module of the dispatcher.
pub struct CtrlReactor {
    /// Address actually bound.
    local_addr: SocketAddr,

    /// Join handle of the control acceptor thread.
    ctrl_acceptor_handle: JoinHandle<()>,
}

// CtrlReactor public API implementation
impl CtrlReactor {
    /// Binds the control listener on `ctrl_addr` and spawns the control
    /// acceptor thread.
    pub async fn new_and_setup(
        ctrl_addr: SocketAddr,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Self, ChartpaxError> {
        let ctrl_listener = tcp_bind_with_retry(ctrl_addr, 10).await?;
        let local_addr = ctrl_listener.local_addr()?;
        pf_info!("d"; "accepting control connections on '{}'", local_addr);

        let ctrl_acceptor_handle = tokio::spawn(Self::ctrl_acceptor_thread(
            ctrl_listener,
            dispatcher,
        ));

        Ok(CtrlReactor {
            local_addr,
            ctrl_acceptor_handle,
        })
    }

    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for CtrlReactor {
    fn drop(&mut self) {
        self.ctrl_acceptor_handle.abort();
    }
}

// CtrlReactor ctrl_acceptor thread implementation
impl CtrlReactor {
    /// Control acceptor thread function.
    async fn ctrl_acceptor_thread(
        ctrl_listener: TcpListener,
        dispatcher: Arc<Dispatcher>,
    ) {
        pf_debug!("d"; "ctrl_acceptor thread spawned");

        let mut servants = JoinSet::new();
        loop {
            tokio::select! {
                accepted = ctrl_listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            pf_debug!("d"; "accepted control client {}", addr);
                            servants.spawn(Self::ctrl_servant_thread(
                                addr,
                                stream,
                                dispatcher.clone(),
                            ));
                        }
                        Err(e) => {
                            pf_warn!("d"; "error accepting control connection: {}", e);
                        }
                    }
                },

                Some(_) = servants.join_next(), if !servants.is_empty() => {},
            }
        }
    }
}

// CtrlReactor ctrl_servant thread implementation
impl CtrlReactor {
    /// Serves one control request.
    async fn handle_ctrl_req(
        dispatcher: &Dispatcher,
        req: CtrlRequest,
    ) -> CtrlReply {
        match req {
            CtrlRequest::Assign => {
                let server = dispatcher.assign().ok().and_then(|id| {
                    dispatcher.api_addr(id).map(|addr| (id, addr))
                });
                CtrlReply::Assign { server }
            }

            CtrlRequest::Kill { id } => CtrlReply::Kill {
                error: dispatcher.mark_dead(id).err().map(|e| e.to_string()),
            },

            CtrlRequest::Restart { id } => match dispatcher.restart(id).await {
                Ok(recovered) => CtrlReply::Restart {
                    recovered,
                    error: None,
                },
                Err(e) => CtrlReply::Restart {
                    recovered: false,
                    error: Some(e.to_string()),
                },
            },

            CtrlRequest::QueryStatus => CtrlReply::QueryStatus {
                statuses: dispatcher.statuses(),
            },

            CtrlRequest::SetStatus { id, status } => CtrlReply::SetStatus {
                error: dispatcher
                    .set_status(id, status)
                    .err()
                    .map(|e| e.to_string()),
            },

            CtrlRequest::Leave => CtrlReply::Leave,
        }
    }

    /// Control request listener and reply sender thread function.
    async fn ctrl_servant_thread(
        addr: SocketAddr,
        mut conn: TcpStream,
        dispatcher: Arc<Dispatcher>,
    ) {
        let (mut conn_read, mut conn_write) = conn.split();
        loop {
            let req: CtrlRequest = match recv_frame(&mut conn_read).await {
                Ok(req) => req,
                Err(e) => {
                    pf_debug!("d"; "control client {} gone: {}", addr, e);
                    break;
                }
            };
            let leaving = req == CtrlRequest::Leave;

            let reply = Self::handle_ctrl_req(&dispatcher, req).await;
            if let Err(e) = send_frame(&mut conn_write, &reply).await {
                pf_error!("d"; "error replying to {}: {}", addr, e);
                break;
            }
            if leaving {
                break;
            }
        }
    }
}
