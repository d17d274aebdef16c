use super::{Connection, Pipeline};
use crate::error::{Error, Result, TransportError};
use bytes::BytesMut;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

const READ_BUFFER_SIZE: usize = 8 * 1024;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts connections and gives each one its own [`Pipeline`].
pub struct Server<F> {
    listener: TcpListener,
    new_pipeline: F,
}

impl<F> std::fmt::Debug for Server<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.listener.local_addr().ok())
            .finish()
    }
}

impl<F> Server<F>
where
    F: Fn() -> Pipeline + Send + Sync + 'static,
{
    /// Bind to `addr`. `new_pipeline` is called once per accepted connection.
    pub async fn bind(addr: &str, new_pipeline: F) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_owned(),
                source,
            })?;
        Ok(Server {
            listener,
            new_pipeline,
        })
    }

    /// Address actually bound, useful after binding port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(|source| {
            Error::from(TransportError::Bind {
                addr: "<unknown>".to_owned(),
                source,
            })
        })
    }

    /// Accept connections until the process exits.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Accept connections until `signal` completes, then close every open
    /// connection.
    ///
    /// A failed accept is logged and retried after a short backoff, which
    /// `signal` can cut short.
    pub async fn serve_with_shutdown<S>(self, signal: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        let mut connections = JoinSet::new();
        tokio::pin!(signal);

        if let Ok(addr) = self.listener.local_addr() {
            info!(name: "ServerListening", %addr);
        }

        loop {
            tokio::select! {
                _ = &mut signal => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(name: "ConnectionAccepted", %peer);
                        connections.spawn(serve_connection(stream, peer, (self.new_pipeline)()));
                    }
                    Err(source) => {
                        warn!(name: "AcceptFailed", error = %TransportError::Accept(source));
                        if backoff(signal.as_mut()).await {
                            break;
                        }
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(err) = joined {
                        warn!(name: "ConnectionTaskFailed", error = %err);
                    }
                }
            }
        }

        info!(name: "ServerStopping", open_connections = connections.len());
        connections.shutdown().await;
        Ok(())
    }
}

/// Wait out the accept backoff. Returns `true` if `signal` fired first.
async fn backoff<S: Future<Output = ()>>(signal: Pin<&mut S>) -> bool {
    tokio::select! {
        _ = signal => true,
        _ = tokio::time::sleep(ACCEPT_BACKOFF) => false,
    }
}

async fn serve_connection(mut stream: TcpStream, peer: SocketAddr, mut pipeline: Pipeline) {
    let mut conn = Connection::new(peer);
    let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

    loop {
        match stream.read_buf(&mut buf).await {
            Ok(0) => {
                debug!(name: "ConnectionClosed", %peer);
                return;
            }
            Ok(_) => {
                let data = buf.split().freeze();
                if let Err(err) = pipeline.fire_data(&mut conn, &data) {
                    pipeline.fire_error(&conn, &err);
                    return;
                }
                pipeline.fire_complete(&mut conn);

                if let Err(err) = flush(&mut stream, &mut conn).await {
                    pipeline.fire_error(&conn, &err);
                    return;
                }
            }
            Err(source) => {
                let err = TransportError::Read {
                    peer: peer.to_string(),
                    source,
                };
                pipeline.fire_error(&conn, &err.into());
                return;
            }
        }
    }
}

async fn flush(stream: &mut TcpStream, conn: &mut Connection) -> Result<()> {
    let peer = conn.peer().to_string();
    if let Some(reply) = conn.take_outbound() {
        stream
            .write_all(&reply)
            .await
            .map_err(|source| TransportError::Write {
                peer: peer.clone(),
                source,
            })?;
    }
    stream
        .flush()
        .await
        .map_err(|source| TransportError::Write { peer, source })?;
    Ok(())
}
