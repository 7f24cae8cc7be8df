//! MQTT over WebSocket transport.
//!
//! # Responsibilities
//! - Complete the server handshake, refusing paths outside the listener prefix
//! - Dial upstream WebSocket targets offering the `mqtt` subprotocol
//! - Expose a WebSocket as a plain byte stream so the relay can frame MQTT on it
//!
//! # Data Flow
//! ```text
//! binary frame ─┐
//! binary frame ─┼─▶ WsStream::poll_read ─▶ contiguous bytes ─▶ MqttCodec
//! ping / pong  ─┘ (skipped)
//!
//! MqttCodec ─▶ WsStream::poll_write ─▶ one binary frame per write
//! ```

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use futures_util::{Sink, Stream};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::{HeaderMap, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Subprotocol registered for MQTT over WebSocket.
pub const MQTT_SUBPROTOCOL: &str = "mqtt";

/// Byte stream view of a WebSocket connection.
pub struct WsStream<S> {
    inner: WebSocketStream<S>,
    pending: Bytes,
    eof: bool,
}

impl<S> WsStream<S> {
    pub fn new(inner: WebSocketStream<S>) -> Self {
        Self {
            inner,
            pending: Bytes::new(),
            eof: false,
        }
    }
}

/// Complete a server-side handshake on `stream`.
///
/// Requests whose path is not under `path_prefix`, segment by segment, get a
/// 404. The `mqtt` subprotocol is echoed back when the client offers it.
pub async fn accept<S>(stream: S, path_prefix: &str) -> Result<WsStream<S>, tungstenite::Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let prefix = path_prefix.to_string();
    let callback = move |req: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        if super::strip_path_prefix(req.uri().path(), &prefix).is_none() {
            tracing::debug!(path = %req.uri().path(), prefix = %prefix, "WebSocket path outside prefix");
            let mut refusal = ErrorResponse::new(Some("not found".to_string()));
            *refusal.status_mut() = StatusCode::NOT_FOUND;
            return Err(refusal);
        }
        if offers_mqtt(req.headers()) {
            response
                .headers_mut()
                .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(MQTT_SUBPROTOCOL));
        }
        Ok(response)
    };

    let ws = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
    Ok(WsStream::new(ws))
}

/// Dial a `ws://` target offering the `mqtt` subprotocol.
pub async fn connect(target: &str) -> Result<WsStream<MaybeTlsStream<TcpStream>>, tungstenite::Error> {
    let mut request = target.into_client_request()?;
    request
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(MQTT_SUBPROTOCOL));

    let (ws, response) = tokio_tungstenite::connect_async(request).await?;
    tracing::debug!(target, status = %response.status(), "Upstream WebSocket connected");
    Ok(WsStream::new(ws))
}

fn offers_mqtt(headers: &HeaderMap) -> bool {
    headers
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|p| p.trim().eq_ignore_ascii_case(MQTT_SUBPROTOCOL))
}

fn into_io(err: tungstenite::Error) -> io::Error {
    match err {
        tungstenite::Error::Io(e) => e,
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            io::Error::from(io::ErrorKind::BrokenPipe)
        }
        other => io::Error::other(other),
    }
}

impl<S> AsyncRead for WsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.pending.is_empty() {
                let n = this.pending.len().min(buf.remaining());
                buf.put_slice(&this.pending.split_to(n));
                return Poll::Ready(Ok(()));
            }
            if this.eof {
                return Poll::Ready(Ok(()));
            }

            match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
                Some(Ok(Message::Binary(data))) => this.pending = data,
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) | None => this.eof = true,
                Some(Ok(Message::Text(_))) => {
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "text frame on an MQTT WebSocket",
                    )));
                }
                Some(Err(e)) => return Poll::Ready(Err(into_io(e))),
            }
        }
    }
}

impl<S> AsyncWrite for WsStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(Pin::new(&mut this.inner).poll_ready(cx)).map_err(into_io)?;
        Pin::new(&mut this.inner)
            .start_send(Message::Binary(Bytes::copy_from_slice(buf)))
            .map_err(into_io)?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx).map_err(into_io)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match ready!(Pin::new(&mut self.get_mut().inner).poll_close(cx)) {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Poll::Ready(Ok(())),
            Err(e) => Poll::Ready(Err(into_io(e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio_tungstenite::tungstenite::protocol::Role;

    async fn pair() -> (WsStream<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (a, b) = tokio::io::duplex(16 * 1024);
        let server = WebSocketStream::from_raw_socket(a, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(b, Role::Client, None).await;
        (WsStream::new(server), client)
    }

    #[tokio::test]
    async fn binary_frames_read_as_one_stream() {
        let (mut stream, mut peer) = pair().await;

        peer.send(Message::Binary(Bytes::from_static(&[0x30, 0x03]))).await.unwrap();
        peer.send(Message::Ping(Bytes::from_static(b"hi"))).await.unwrap();
        peer.send(Message::Binary(Bytes::from_static(&[0x00, 0x01, b'a']))).await.unwrap();

        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x30, 0x03, 0x00, 0x01, b'a']);
    }

    #[tokio::test]
    async fn close_frame_is_end_of_stream() {
        let (mut stream, mut peer) = pair().await;
        peer.close(None).await.unwrap();

        let mut buf = Vec::new();
        assert_eq!(stream.read_to_end(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn text_frame_is_invalid_data() {
        let (mut stream, mut peer) = pair().await;
        peer.send(Message::Text("hello".into())).await.unwrap();

        let mut buf = [0u8; 8];
        let err = stream.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn each_write_is_one_binary_frame() {
        let (mut stream, mut peer) = pair().await;
        stream.write_all(&[0xc0, 0x00]).await.unwrap();
        stream.flush().await.unwrap();

        match peer.next().await.unwrap().unwrap() {
            Message::Binary(data) => assert_eq!(&data[..], &[0xc0, 0x00]),
            other => panic!("expected binary frame, got {other:?}"),
        }
    }

    async fn upgrade(path: &str) -> (bool, bool) {
        let (a, b) = tokio::io::duplex(16 * 1024);
        let server = tokio::spawn(async move { accept(a, "/mqtt").await.is_ok() });
        let client = tokio_tungstenite::client_async(format!("ws://localhost{path}"), b)
            .await
            .is_ok();
        (server.await.unwrap(), client)
    }

    #[tokio::test]
    async fn accepts_paths_under_prefix() {
        assert_eq!(upgrade("/mqtt").await, (true, true));
        assert_eq!(upgrade("/mqtt/devices").await, (true, true));
    }

    #[tokio::test]
    async fn refuses_sibling_of_prefix() {
        assert_eq!(upgrade("/mqttx").await, (false, false));
        assert_eq!(upgrade("/other").await, (false, false));
    }

    #[test]
    fn detects_offered_subprotocol() {
        let mut headers = HeaderMap::new();
        headers.insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("wamp, MQTT"));
        assert!(offers_mqtt(&headers));

        headers.insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("mqttv3.1"));
        assert!(!offers_mqtt(&headers));
    }
}
