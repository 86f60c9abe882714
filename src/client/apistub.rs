//! Chartpax client -> replica API stub implementation.

use std::net::SocketAddr;

use crate::utils::{
    recv_frame, send_frame, tcp_connect_with_retry, ChartpaxError,
};
use crate::server::{ApiReply, ApiRequest};

use tokio::net::TcpStream;

/// Client -> replica API connection stub. Requests are served one at a time
/// per connection, so a call is a send followed by a receive.
pub struct ClientApiStub {
    /// Address of the connected replica.
    server: SocketAddr,

    /// The TCP connection stream.
    conn: TcpStream,
}

impl ClientApiStub {
    /// Creates a new API stub and connects to the given replica.
    pub async fn new_by_connect(
        server: SocketAddr,
    ) -> Result<Self, ChartpaxError> {
        pf_debug!("c"; "connecting to replica '{}'...", server);
        let conn = tcp_connect_with_retry(server, 3).await?;
        Ok(ClientApiStub { server, conn })
    }

    #[inline]
    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// Sends a request and waits for its reply.
    pub async fn call(
        &mut self,
        req: &ApiRequest,
    ) -> Result<ApiReply, ChartpaxError> {
        send_frame(&mut self.conn, req).await?;
        let reply = recv_frame(&mut self.conn).await?;
        pf_trace!("c"; "reply from {}: {:?}", self.server, reply);
        Ok(reply)
    }

    /// Sends a leave notification and waits for the server's goodbye,
    /// consuming `self`.
    pub async fn leave(mut self) -> Result<(), ChartpaxError> {
        let reply = self.call(&ApiRequest::Leave).await?;
        if !reply.is_success() {
            return logged_err!("c"; "unexpected leave reply: {:?}", reply);
        }
        Ok(())
    }
}

// Unit tests are done together with `server::external`.
