//! Chartpax client -> dispatcher control API stub implementation.

use std::net::SocketAddr;

use crate::utils::{
    recv_frame, send_frame, tcp_connect_with_retry, ChartpaxError,
};
use crate::manager::{CtrlReply, CtrlRequest, ReplicaStatus};
use crate::server::ReplicaId;

use tokio::net::TcpStream;

/// Client -> dispatcher control API stub.
pub struct ClientCtrlStub {
    /// The TCP connection stream.
    conn: TcpStream,
}

impl ClientCtrlStub {
    /// Creates a new control API stub and connects to the dispatcher.
    pub async fn new_by_connect(
        dispatcher: SocketAddr,
    ) -> Result<Self, ChartpaxError> {
        pf_debug!("c"; "connecting to dispatcher '{}'...", dispatcher);
        let conn = tcp_connect_with_retry(dispatcher, 3).await?;
        Ok(ClientCtrlStub { conn })
    }

    /// Sends a control request and waits for its reply.
    pub async fn call(
        &mut self,
        req: &CtrlRequest,
    ) -> Result<CtrlReply, ChartpaxError> {
        send_frame(&mut self.conn, req).await?;
        recv_frame(&mut self.conn).await
    }

    /// Asks for a live replica to talk to.
    pub async fn assign(
        &mut self,
    ) -> Result<(ReplicaId, SocketAddr), ChartpaxError> {
        match self.call(&CtrlRequest::Assign).await? {
            CtrlReply::Assign {
                server: Some(server),
            } => Ok(server),
            CtrlReply::Assign { server: None } => {
                Err(ChartpaxError::msg("no live replica to assign"))
            }
            reply => logged_err!("c"; "unexpected ctrl reply: {:?}", reply),
        }
    }

    pub async fn kill(&mut self, id: ReplicaId) -> Result<(), ChartpaxError> {
        match self.call(&CtrlRequest::Kill { id }).await? {
            CtrlReply::Kill { error: None } => Ok(()),
            CtrlReply::Kill { error: Some(e) } => Err(ChartpaxError(e)),
            reply => logged_err!("c"; "unexpected ctrl reply: {:?}", reply),
        }
    }

    /// Restarts a dead replica. Returns `Ok(false)` if it could not be
    /// recovered and stays dead.
    pub async fn restart(
        &mut self,
        id: ReplicaId,
    ) -> Result<bool, ChartpaxError> {
        match self.call(&CtrlRequest::Restart { id }).await? {
            CtrlReply::Restart {
                recovered,
                error: None,
            } => Ok(recovered),
            CtrlReply::Restart { error: Some(e), .. } => Err(ChartpaxError(e)),
            reply => logged_err!("c"; "unexpected ctrl reply: {:?}", reply),
        }
    }

    pub async fn statuses(
        &mut self,
    ) -> Result<Vec<(ReplicaId, ReplicaStatus)>, ChartpaxError> {
        match self.call(&CtrlRequest::QueryStatus).await? {
            CtrlReply::QueryStatus { statuses } => Ok(statuses),
            reply => logged_err!("c"; "unexpected ctrl reply: {:?}", reply),
        }
    }

    pub async fn set_status(
        &mut self,
        id: ReplicaId,
        status: ReplicaStatus,
    ) -> Result<(), ChartpaxError> {
        match self.call(&CtrlRequest::SetStatus { id, status }).await? {
            CtrlReply::SetStatus { error: None } => Ok(()),
            CtrlReply::SetStatus { error: Some(e) } => Err(ChartpaxError(e)),
            reply => logged_err!("c"; "unexpected ctrl reply: {:?}", reply),
        }
    }

    /// Sends a leave notification, consuming `self`.
    pub async fn leave(mut self) -> Result<(), ChartpaxError> {
        match self.call(&CtrlRequest::Leave).await? {
            CtrlReply::Leave => Ok(()),
            reply => logged_err!("c"; "unexpected ctrl reply: {:?}", reply),
        }
    }
}

// Unit tests are done together with `manager::reactor`.
