//! Wire-level framing for the two supported netsim transports: one JSON
//! document per WebSocket text frame, or one JSON document per newline on a
//! plain TCP stream. Both directions go through the same `Sink`/`Stream` of
//! raw `String` frames so [`crate::client::Connection`] never has to care
//! which one it's holding.

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::codec::{Framed, LinesCodec};

use crate::error::Error;

/// A connected transport: a boxed stream/sink of text frames.
pub struct Transport {
    inner: Box<dyn TextTransport>,
}

trait TextTransport: Send {
    fn send<'a>(&'a mut self, frame: String) -> futures::future::BoxFuture<'a, Result<(), Error>>;
    fn recv<'a>(&'a mut self) -> futures::future::BoxFuture<'a, Option<Result<String, Error>>>;
}

struct WsTransport {
    inner: tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>,
}

impl TextTransport for WsTransport {
    fn send<'a>(&'a mut self, frame: String) -> futures::future::BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move { Ok(self.inner.send(Message::Text(frame)).await?) })
    }

    fn recv<'a>(&'a mut self) -> futures::future::BoxFuture<'a, Option<Result<String, Error>>> {
        Box::pin(async move {
            loop {
                match self.inner.next().await {
                    Some(Ok(Message::Text(t))) => return Some(Ok(t)),
                    Some(Ok(Message::Binary(b))) => {
                        return Some(Ok(String::from_utf8_lossy(&b).into_owned()))
                    }
                    Some(Ok(Message::Close(_))) | None => return None,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Some(Err(e.into())),
                }
            }
        })
    }
}

struct TcpTransport {
    inner: Framed<TcpStream, LinesCodec>,
}

impl TextTransport for TcpTransport {
    fn send<'a>(&'a mut self, frame: String) -> futures::future::BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            self.inner.send(frame).await.map_err(|e| Error::Transport(e.to_string()))
        })
    }

    fn recv<'a>(&'a mut self) -> futures::future::BoxFuture<'a, Option<Result<String, Error>>> {
        Box::pin(async move {
            match self.inner.next().await {
                Some(Ok(line)) => Some(Ok(line)),
                Some(Err(e)) => Some(Err(Error::Transport(e.to_string()))),
                None => None,
            }
        })
    }
}

impl Transport {
    /// Connects to `url`, dispatching on its scheme: `ws`/`wss` go through
    /// `tokio-tungstenite`, `tcp`/`tcps` open a raw newline-delimited
    /// connection. `tcps` is accepted but does not itself add TLS here --
    /// it is distinguished for configuration/logging purposes, matching the
    /// scheme set documented in spec.md section 6; a TLS-wrapped TCP
    /// transport can be layered in by a caller that needs it.
    pub async fn connect(url: &url::Url) -> Result<Self, Error> {
        match url.scheme() {
            "ws" | "wss" => {
                let (stream, _resp) = tokio_tungstenite::connect_async(url.as_str()).await?;
                Ok(Self { inner: Box::new(WsTransport { inner: stream }) })
            }
            "tcp" | "tcps" => {
                let host = url.host_str().ok_or_else(|| Error::MissingHost(url.to_string()))?;
                let port = url.port().ok_or_else(|| Error::MissingHost(url.to_string()))?;
                let stream = TcpStream::connect((host, port)).await?;
                let framed = Framed::new(stream, LinesCodec::new_with_max_length(1 << 20));
                Ok(Self { inner: Box::new(TcpTransport { inner: framed }) })
            }
            other => Err(Error::UnsupportedScheme(other.to_string())),
        }
    }

    pub async fn send(&mut self, frame: String) -> Result<(), Error> {
        self.inner.send(frame).await
    }

    /// Returns `None` when the transport has closed.
    pub async fn recv(&mut self) -> Option<Result<String, Error>> {
        self.inner.recv().await
    }
}
