//! Websocket control channel.
//!
//! One [`ControlChannel`] is one connection attempt. Its task connects,
//! shuttles text frames and keeps the connection alive with pings. Everything
//! it observes is reported through the event callback, ending with exactly one
//! [`ChannelEvent::Closed`] unless the channel is dropped first.

use crate::error::{RelayError, Result};
use crate::relay::Endpoint;
use crate::tunnel::resolve_address;
use futures_util::{SinkExt, StreamExt};
use moblink_transport::{Network, SocketFactory};
use std::net::{SocketAddr, SocketAddrV6};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, client_async_tls};
use url::{Host, Url};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Channel notifications.
#[derive(Debug)]
pub(crate) enum ChannelEvent {
    /// Websocket handshake completed
    Opened,
    /// Text frame received
    Message(String),
    /// Connection failed or closed
    Closed(RelayError),
}

/// Timing of a channel.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChannelTimings {
    pub(crate) connect_timeout: Duration,
    pub(crate) keepalive_interval: Duration,
}

/// A live control channel. Dropping it closes the connection.
#[derive(Debug)]
pub(crate) struct ControlChannel {
    outgoing: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

impl ControlChannel {
    /// Start connecting to `endpoint`.
    ///
    /// Frames queued with [`ControlChannel::send`] before the handshake
    /// completes are sent once it does.
    pub(crate) fn open<F>(
        endpoint: &Endpoint,
        factory: Arc<dyn SocketFactory>,
        timings: ChannelTimings,
        on_event: F,
    ) -> Result<Self>
    where
        F: Fn(ChannelEvent) + Send + Sync + 'static,
    {
        let target = parse_url(&endpoint.url)?;
        let network = endpoint.network.clone();
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            let reason = match timeout(
                timings.connect_timeout,
                connect(&target, network.as_ref(), factory.as_ref()),
            )
            .await
            {
                Ok(Ok(ws)) => {
                    tracing::debug!("Websocket connected to {}", target.url);
                    on_event(ChannelEvent::Opened);
                    run(ws, outgoing_rx, timings.keepalive_interval, &on_event).await
                }
                Ok(Err(e)) => e,
                Err(_) => RelayError::ConnectTimeout(timings.connect_timeout),
            };
            on_event(ChannelEvent::Closed(reason));
        });

        Ok(Self { outgoing, task })
    }

    /// Queue a text frame.
    pub(crate) fn send(&self, text: String) {
        let _ = self.outgoing.send(text);
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A validated streamer URL.
///
/// `url` never carries an IPv6 zone; the zone of a link-local host is kept
/// as `scope_id` (0 when absent).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StreamerUrl {
    pub(crate) url: Url,
    pub(crate) scope_id: u32,
}

/// Parse and validate a streamer URL.
///
/// A zone in an IPv6 host (`ws://[fe80::1%25wlan0]:7777`) may be an
/// interface name or index.
pub(crate) fn parse_url(text: &str) -> Result<StreamerUrl> {
    let invalid = |reason: &str| RelayError::InvalidUrl {
        url: text.to_string(),
        reason: reason.to_string(),
    };

    if text.is_empty() {
        return Err(invalid("empty"));
    }
    let (unzoned, zone) = split_zone(text);
    let url = Url::parse(&unzoned).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(invalid("scheme must be ws or wss"));
    }
    let scope_id = match (url.host(), zone) {
        (None, _) => return Err(invalid("missing host")),
        (_, None) => 0,
        (Some(Host::Ipv6(_)), Some(zone)) => zone
            .parse()
            .ok()
            .or_else(|| moblink_transport::interface_index(zone))
            .ok_or_else(|| invalid(&format!("unknown interface {zone}")))?,
        (Some(_), Some(_)) => return Err(invalid("zone on a non-IPv6 host")),
    };
    Ok(StreamerUrl { url, scope_id })
}

/// Split a `%25` zone out of a bracketed IPv6 host.
fn split_zone(text: &str) -> (String, Option<&str>) {
    let bracketed = text
        .find('[')
        .and_then(|open| text[open..].find(']').map(|len| (open, open + len)));
    let Some((open, close)) = bracketed else {
        return (text.to_string(), None);
    };
    match text[open + 1..close].split_once("%25") {
        Some((address, zone)) => (
            format!("{}{}{}", &text[..=open], address, &text[close..]),
            Some(zone),
        ),
        None => (text.to_string(), None),
    }
}

async fn target_addr(target: &StreamerUrl, network: Option<&Network>) -> Result<SocketAddr> {
    let url = &target.url;
    let port = url.port_or_known_default().unwrap_or(80);
    match url.host() {
        Some(Host::Ipv4(ip)) => Ok(SocketAddr::from((ip, port))),
        Some(Host::Ipv6(ip)) => Ok(SocketAddr::V6(SocketAddrV6::new(
            ip,
            port,
            0,
            target.scope_id,
        ))),
        Some(Host::Domain(domain)) => {
            resolve_address(domain, port, network.map(|n| n.address)).await
        }
        None => Err(RelayError::InvalidUrl {
            url: url.to_string(),
            reason: "missing host".to_string(),
        }),
    }
}

async fn connect(
    target: &StreamerUrl,
    network: Option<&Network>,
    factory: &dyn SocketFactory,
) -> Result<WsStream> {
    let addr = target_addr(target, network).await?;
    let stream = factory.connect_tcp(addr, network).await?;
    let _ = stream.set_nodelay(true);
    let (ws, _response) = client_async_tls(target.url.as_str(), stream)
        .await
        .map_err(|e| RelayError::Websocket(e.to_string()))?;
    Ok(ws)
}

async fn run<F>(
    ws: WsStream,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    keepalive_interval: Duration,
    on_event: &F,
) -> RelayError
where
    F: Fn(ChannelEvent),
{
    let (mut sink, mut stream) = ws.split();
    let mut keepalive = interval_at(Instant::now() + keepalive_interval, keepalive_interval);
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            text = outgoing.recv() => {
                let Some(text) = text else {
                    return RelayError::ChannelClosed("channel dropped".to_string());
                };
                if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
                    return RelayError::Websocket(e.to_string());
                }
            }
            _ = keepalive.tick() => {
                if awaiting_pong {
                    return RelayError::KeepaliveTimeout;
                }
                awaiting_pong = true;
                if let Err(e) = sink.send(WsMessage::Ping(Default::default())).await {
                    return RelayError::Websocket(e.to_string());
                }
            }
            message = stream.next() => match message {
                Some(Ok(WsMessage::Text(text))) => {
                    on_event(ChannelEvent::Message(text.as_str().to_string()));
                }
                Some(Ok(WsMessage::Pong(_))) => awaiting_pong = false,
                Some(Ok(WsMessage::Close(frame))) => {
                    let reason = frame.map_or_else(
                        || "no reason".to_string(),
                        |frame| format!("{} (code {})", frame.reason.as_str(), u16::from(frame.code)),
                    );
                    return RelayError::ChannelClosed(reason);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return RelayError::Websocket(e.to_string()),
                None => return RelayError::ChannelClosed("connection ended".to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moblink_transport::SystemSocketFactory;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    fn timings() -> ChannelTimings {
        ChannelTimings {
            connect_timeout: Duration::from_secs(2),
            keepalive_interval: Duration::from_millis(100),
        }
    }

    fn open(
        url: &str,
    ) -> (
        ControlChannel,
        mpsc::UnboundedReceiver<ChannelEvent>,
    ) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let channel = ControlChannel::open(
            &Endpoint::new(url, None),
            Arc::new(SystemSocketFactory::default()),
            timings(),
            move |event| {
                let _ = events_tx.send(event);
            },
        )
        .unwrap();
        (channel, events_rx)
    }

    async fn next(events: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> ChannelEvent {
        timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("Timeout")
            .unwrap()
    }

    #[test]
    fn test_parse_url() {
        assert!(parse_url("ws://192.168.1.5:7777").is_ok());
        assert!(parse_url("wss://streamer.local/path").is_ok());
        assert!(parse_url("ws://[fe80::1]:7777").is_ok());

        for text in ["", "http://host:1", "not a url", "ws://"] {
            assert!(
                matches!(parse_url(text), Err(RelayError::InvalidUrl { .. })),
                "accepted {text:?}"
            );
        }
    }

    #[test]
    fn test_parse_url_zone() {
        let target = parse_url("ws://[fe80::1%253]:7777").unwrap();
        assert_eq!(target.url.as_str(), "ws://[fe80::1]:7777/");
        assert_eq!(target.scope_id, 3);

        assert_eq!(parse_url("ws://[fe80::1]:7777").unwrap().scope_id, 0);
        assert!(matches!(
            parse_url("ws://[fe80::1%25no-such-if0]:7777"),
            Err(RelayError::InvalidUrl { .. })
        ));
        if let Some(index) = moblink_transport::interface_index("lo") {
            assert_eq!(parse_url("ws://[fe80::1%25lo]:7777").unwrap().scope_id, index);
        }
    }

    #[tokio::test]
    async fn test_target_addr_literal() {
        let target = parse_url("ws://[::1]:7777").unwrap();
        assert_eq!(target_addr(&target, None).await.unwrap(), "[::1]:7777".parse().unwrap());
        let target = parse_url("ws://10.0.0.1").unwrap();
        assert_eq!(target_addr(&target, None).await.unwrap(), "10.0.0.1:80".parse().unwrap());

        let target = parse_url("ws://[fe80::1%252]:7777").unwrap();
        match target_addr(&target, None).await.unwrap() {
            SocketAddr::V6(addr) => assert_eq!(addr.scope_id(), 2),
            other => panic!("unexpected {other}"),
        }
    }

    #[tokio::test]
    async fn test_text_frames_both_ways() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (channel, mut events) = open(&url);
        channel.send("queued before connect".to_string());

        let (tcp, _) = listener.accept().await.unwrap();
        let mut server = accept_async(tcp).await.unwrap();

        assert!(matches!(next(&mut events).await, ChannelEvent::Opened));
        let frame = server.next().await.unwrap().unwrap();
        assert_eq!(frame.into_text().unwrap().as_str(), "queued before connect");

        server
            .send(WsMessage::Text("hello".to_string().into()))
            .await
            .unwrap();
        match next(&mut events).await {
            ChannelEvent::Message(text) => assert_eq!(text, "hello"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_close_reports_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (_channel, mut events) = open(&url);

        let (tcp, _) = listener.accept().await.unwrap();
        let mut server = accept_async(tcp).await.unwrap();
        assert!(matches!(next(&mut events).await, ChannelEvent::Opened));

        server.close(None).await.unwrap();
        assert!(matches!(
            next(&mut events).await,
            ChannelEvent::Closed(RelayError::ChannelClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_refused_reports_closed() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let (_channel, mut events) = open(&format!("ws://127.0.0.1:{port}"));
        assert!(matches!(
            next(&mut events).await,
            ChannelEvent::Closed(RelayError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_silent_peer_fails_keepalive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (_channel, mut events) = open(&url);

        let (tcp, _) = listener.accept().await.unwrap();
        // Handshake, then never read again so pings go unanswered.
        let _server = accept_async(tcp).await.unwrap();
        assert!(matches!(next(&mut events).await, ChannelEvent::Opened));
        assert!(matches!(
            next(&mut events).await,
            ChannelEvent::Closed(RelayError::KeepaliveTimeout)
        ));
    }

    #[tokio::test]
    async fn test_drop_sends_no_event() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (channel, mut events) = open(&url);
        drop(channel);
        assert!(
            timeout(Duration::from_millis(200), events.recv())
                .await
                .map_or(true, |event| event.is_none())
        );
    }
}
