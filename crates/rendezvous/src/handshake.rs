//! Handshake token I/O.
//!
//! The connecting side writes the raw `RequestId` token and nothing else; the
//! accepting side reads exactly `TOKEN_LEN` bytes. Bytes after the token stay
//! in the socket for the application.

use std::io;
use std::time::Duration;

use corelib::id::TOKEN_LEN;
use corelib::{Error, RequestId, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Reads one token, giving up after `limit`.
pub async fn read_token<R>(reader: &mut R, limit: Duration) -> Result<RequestId>
where
    R: AsyncRead + Unpin,
{
    let mut token = [0u8; TOKEN_LEN];
    match tokio::time::timeout(limit, reader.read_exact(&mut token)).await {
        Ok(Ok(_)) => RequestId::decode(&token),
        Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => Err(Error::Handshake(
            "connection closed before the full token arrived".into(),
        )),
        Ok(Err(e)) => Err(Error::Handshake(format!("unable to read token: {}", e))),
        Err(_) => Err(Error::Handshake(format!("no token within {:?}", limit))),
    }
}

/// Writes the token for `id` and flushes it.
pub async fn write_token<W>(writer: &mut W, id: RequestId) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(&id.encode())
        .await
        .map_err(Error::HandshakeWrite)?;
    writer.flush().await.map_err(Error::HandshakeWrite)
}
