//! Request/response calls over one agent connection.

use async_trait::async_trait;
use replicant_agent::{AgentConnection, Error, InstanceStatus, Request, Response, SourceEndpoint};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::client::TlsStream;
use tracing::debug;

use crate::codec::{read_frame, write_frame};

/// Connection to one agent over TLS.
///
/// Calls on a connection are serialized; the socket is released by `close`
/// or when the connection is dropped.
#[derive(Debug)]
pub struct TlsAgentConnection<S = TlsStream<TcpStream>> {
    peer: String,
    stream: Mutex<Option<S>>,
}

impl<S> TlsAgentConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub(crate) fn new(peer: String, stream: S) -> Self {
        Self {
            peer,
            stream: Mutex::new(Some(stream)),
        }
    }

    async fn call(&self, request: Request) -> Result<Response, Error> {
        let method = request.method();
        debug!("sending {} to {}", method, self.peer);

        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or_else(|| Error::Rpc {
            method,
            errno: None,
            reason: "connection already closed".to_string(),
        })?;

        let exchange = async {
            write_frame(&mut *stream, &request).await?;
            read_frame::<_, Response>(&mut *stream).await
        };
        let outcome = exchange.await;

        match outcome {
            Ok(Response::Failed { errno, message }) => Err(Error::Rpc {
                method,
                errno,
                reason: message,
            }),
            Ok(response) => Ok(response),
            Err(e) => {
                // The stream is in an unknown state after a partial exchange.
                guard.take();
                Err(Error::Rpc {
                    method,
                    errno: None,
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn call_done(&self, request: Request) -> Result<(), Error> {
        let method = request.method();
        match self.call(request).await? {
            Response::Done => Ok(()),
            other => Err(unexpected(method, &other)),
        }
    }
}

fn unexpected(method: &'static str, response: &Response) -> Error {
    Error::Rpc {
        method,
        errno: None,
        reason: format!("unexpected response: {response:?}"),
    }
}

#[async_trait]
impl<S> AgentConnection for TlsAgentConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn get_status(&self) -> Result<InstanceStatus, Error> {
        match self.call(Request::GetStatus).await? {
            Response::Status(status) => Ok(status),
            other => Err(unexpected("GetStatus", &other)),
        }
    }

    async fn change_replication_source(&self, source: &SourceEndpoint) -> Result<(), Error> {
        self.call_done(Request::ChangeReplicationSource(source.clone()))
            .await
    }

    async fn start_replication(&self) -> Result<(), Error> {
        self.call_done(Request::StartReplication).await
    }

    async fn stop_replication(&self) -> Result<(), Error> {
        self.call_done(Request::StopReplication).await
    }

    async fn set_read_only(&self, read_only: bool) -> Result<(), Error> {
        self.call_done(Request::SetReadOnly(read_only)).await
    }

    async fn clone_from(&self, donor: &SourceEndpoint) -> Result<(), Error> {
        self.call_done(Request::Clone(donor.clone())).await
    }

    async fn close(&self) -> Result<(), Error> {
        let Some(mut stream) = self.stream.lock().await.take() else {
            return Ok(());
        };

        debug!("closing agent connection to {}", self.peer);
        stream.shutdown().await.map_err(|e| Error::Connection {
            addr: self.peer.clone(),
            reason: e.to_string(),
        })
    }
}
