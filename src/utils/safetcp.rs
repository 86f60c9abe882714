//! Length-prefixed TCP frame read/write and bind/connect helper functions.

use std::marker::Unpin;
use std::net::SocketAddr;

use serde::Serialize;
use serde::de::DeserializeOwned;

use rmp_serde::encode::to_vec as encode_to_vec;
use rmp_serde::decode::from_slice as decode_from_slice;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::time::{self, Duration};

use crate::utils::ChartpaxError;

/// Largest frame body accepted from the wire. Section payloads and recovery
/// bundles travel in-process, so client frames stay well below this.
const MAX_FRAME_LEN: u64 = 64 * 1024 * 1024;

/// Sends an object of type `T` through TCP writable connection `conn_write`:
/// first 8 bytes being the body length in big-endian, then the rmp-serde
/// encoded body itself.
pub(crate) async fn send_frame<T, Conn>(
    conn_write: &mut Conn,
    obj: &T,
) -> Result<(), ChartpaxError>
where
    T: Serialize,
    Conn: AsyncWriteExt + Unpin,
{
    let obj_bytes = encode_to_vec(obj)?;
    conn_write.write_u64(obj_bytes.len() as u64).await?; // send length first
    conn_write.write_all(&obj_bytes[..]).await?;
    conn_write.flush().await?;
    Ok(())
}

/// Receives an object of type `T` from TCP readable connection `conn_read`.
///
/// Not cancellation-safe: callers must not race this against other branches
/// in a `tokio::select!`.
pub(crate) async fn recv_frame<T, Conn>(
    conn_read: &mut Conn,
) -> Result<T, ChartpaxError>
where
    T: DeserializeOwned,
    Conn: AsyncReadExt + Unpin,
{
    let obj_len = conn_read.read_u64().await?;
    if obj_len > MAX_FRAME_LEN {
        return Err(ChartpaxError(format!(
            "frame length {} exceeds limit {}",
            obj_len, MAX_FRAME_LEN
        )));
    }

    let mut obj_buf: Vec<u8> = vec![0; obj_len as usize];
    conn_read.read_exact(&mut obj_buf[..]).await?;
    let obj = decode_from_slice(&obj_buf)?;
    Ok(obj)
}

/// Wrapper over tokio `TcpListener::bind()` that provides a retrying logic.
pub(crate) async fn tcp_bind_with_retry(
    bind_addr: SocketAddr,
    mut retries: u8,
) -> Result<TcpListener, ChartpaxError> {
    loop {
        let socket = match bind_addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        socket.set_nodelay(true)?;

        let bound = socket.bind(bind_addr).and_then(|_| socket.listen(1024));
        match bound {
            Ok(listener) => return Ok(listener),
            Err(err) => {
                if retries == 0 {
                    return Err(err.into());
                }
                retries -= 1;
                time::sleep(Duration::from_millis(200)).await;
            }
        }
    }
}

/// Wrapper over tokio `TcpStream::connect()` that provides a retrying logic.
pub(crate) async fn tcp_connect_with_retry(
    conn_addr: SocketAddr,
    mut retries: u8,
) -> Result<TcpStream, ChartpaxError> {
    loop {
        match TcpStream::connect(conn_addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(err) => {
                if retries == 0 {
                    return Err(err.into());
                }
                retries -= 1;
                time::sleep(Duration::from_millis(200)).await;
            }
        }
    }
}
