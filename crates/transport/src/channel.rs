use crate::{ChannelEvent, Connection, Connector, Result, Transport, TransportError};
use apollolytics_protocol::Envelope;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;

/// WebSocket channel to the conversation backend.
pub struct Channel {
    endpoint: String,
    outbound: mpsc::UnboundedSender<Message>,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
    events: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
}

impl Channel {
    /// Connect and complete the handshake.
    pub async fn open(endpoint: &str) -> Result<Self> {
        tracing::info!(endpoint, "opening conversation channel");
        let (ws, _response) =
            tokio_tungstenite::connect_async(endpoint)
                .await
                .map_err(|e| TransportError::Connection {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                })?;
        let (sink, stream) = ws.split();
        Ok(Self::spawn(endpoint, sink, stream))
    }

    fn spawn<K, S>(endpoint: &str, sink: K, stream: S) -> Self
    where
        K: Sink<Message, Error = WsError> + Unpin + Send + 'static,
        S: Stream<Item = std::result::Result<Message, WsError>> + Unpin + Send + 'static,
    {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        let _ = ev_tx.send(ChannelEvent::Opened);
        tokio::spawn(write_loop(
            sink,
            out_rx,
            ev_tx.clone(),
            open.clone(),
            cancel.clone(),
        ));
        tokio::spawn(read_loop(stream, ev_tx, open.clone(), cancel.clone()));

        tracing::info!(endpoint, "conversation channel open");
        Self {
            endpoint: endpoint.to_string(),
            outbound: out_tx,
            open,
            cancel,
            events: Some(ev_rx),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Take the inbound event receiver (can only be called once).
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ChannelEvent>> {
        self.events.take()
    }

    pub fn into_connection(mut self) -> Connection {
        let (_tx, empty) = mpsc::unbounded_channel();
        let events = self.take_events().unwrap_or(empty);
        Connection {
            transport: Box::new(self),
            events,
        }
    }
}

impl Transport for Channel {
    fn send_frame(&self, frame: String) -> Result<()> {
        if !self.open.load(Ordering::Acquire) {
            return Err(TransportError::NotOpen);
        }
        self.outbound
            .send(Message::Text(frame))
            .map_err(|_| TransportError::NotOpen)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            tracing::info!(endpoint = %self.endpoint, "closing conversation channel");
        }
        self.cancel.cancel();
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Report a terminal event unless the channel was already closed.
fn finish(
    events: &mpsc::UnboundedSender<ChannelEvent>,
    open: &AtomicBool,
    cancel: &CancellationToken,
    event: ChannelEvent,
) {
    if open.swap(false, Ordering::AcqRel) {
        let _ = events.send(event);
    }
    cancel.cancel();
}

async fn write_loop<K>(
    mut sink: K,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
) where
    K: Sink<Message, Error = WsError> + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = outbound.recv() => next,
        };
        let Some(message) = next else { break };
        if let Err(e) = sink.send(message).await {
            tracing::warn!(error = %e, "channel write failed");
            finish(&events, &open, &cancel, ChannelEvent::Error(e.to_string()));
            return;
        }
    }

    // Frames queued before close() still go out.
    while let Ok(message) = outbound.try_recv() {
        if sink.send(message).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
    tracing::debug!("channel writer stopped");
}

async fn read_loop<S>(
    mut stream: S,
    events: mpsc::UnboundedSender<ChannelEvent>,
    open: Arc<AtomicBool>,
    cancel: CancellationToken,
) where
    S: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => match Envelope::parse(&text) {
                Ok(envelope) => {
                    tracing::trace!(kind = %envelope.kind, "frame received");
                    if events.send(ChannelEvent::Message(envelope)).is_err() {
                        // Owner is gone.
                        cancel.cancel();
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, bytes = text.len(), "dropping malformed frame");
                }
            },
            Some(Ok(Message::Close(frame))) => {
                let reason = frame
                    .map(|f| f.reason.to_string())
                    .filter(|r| !r.is_empty());
                tracing::info!(?reason, "channel closed by remote");
                finish(&events, &open, &cancel, ChannelEvent::Closed { reason });
                return;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "channel read failed");
                finish(&events, &open, &cancel, ChannelEvent::Error(e.to_string()));
                return;
            }
            None => {
                finish(&events, &open, &cancel, ChannelEvent::Closed { reason: None });
                return;
            }
        }
    }
}

/// [`Connector`] backed by real WebSocket connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait::async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &str) -> Result<Connection> {
        Ok(Channel::open(endpoint).await?.into_connection())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as fmpsc;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    type Inbound = fmpsc::UnboundedSender<std::result::Result<Message, WsError>>;

    fn test_channel() -> (Channel, Inbound, fmpsc::UnboundedReceiver<Message>) {
        let (sink_tx, sink_rx) = fmpsc::unbounded::<Message>();
        let (stream_tx, stream_rx) = fmpsc::unbounded();
        let sink = sink_tx.sink_map_err(|_| WsError::ConnectionClosed);
        let channel = Channel::spawn("ws://test", Box::pin(sink), stream_rx);
        (channel, stream_tx, sink_rx)
    }

    #[tokio::test]
    async fn test_events_arrive_in_frame_order() {
        let (mut channel, inbound, _sent) = test_channel();
        let mut events = channel.take_events().unwrap();
        assert!(channel.take_events().is_none());

        for text in ["first", "second", "third"] {
            let frame = format!(r#"{{"type":"assistant_delta","payload":{{"text":"{text}"}}}}"#);
            inbound.unbounded_send(Ok(Message::Text(frame))).unwrap();
        }

        assert_eq!(events.recv().await, Some(ChannelEvent::Opened));
        for text in ["first", "second", "third"] {
            let Some(ChannelEvent::Message(env)) = events.recv().await else {
                panic!("expected message");
            };
            assert_eq!(env.payload["text"], text);
        }
    }

    #[tokio::test]
    async fn test_malformed_frames_are_skipped() {
        let (mut channel, inbound, _sent) = test_channel();
        let mut events = channel.take_events().unwrap();
        inbound
            .unbounded_send(Ok(Message::Text("garbage".into())))
            .unwrap();
        inbound
            .unbounded_send(Ok(Message::Text(r#"{"type":"conversation_end"}"#.into())))
            .unwrap();

        assert_eq!(events.recv().await, Some(ChannelEvent::Opened));
        let Some(ChannelEvent::Message(env)) = events.recv().await else {
            panic!("expected message");
        };
        assert_eq!(env.kind, "conversation_end");
    }

    #[tokio::test]
    async fn test_send_reaches_the_socket() {
        let (channel, _inbound, mut sent) = test_channel();
        channel.send_frame(r#"{"type":"start"}"#.to_string()).unwrap();
        let message = sent.next().await.unwrap();
        assert_eq!(message, Message::Text(r#"{"type":"start"}"#.to_string()));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_rejects_sends() {
        let (channel, _inbound, _sent) = test_channel();
        assert!(channel.is_open());
        channel.close();
        channel.close();
        channel.close();
        assert!(!channel.is_open());
        assert!(matches!(
            channel.send_frame("{}".to_string()),
            Err(TransportError::NotOpen)
        ));
    }

    #[tokio::test]
    async fn test_remote_close_is_reported_once() {
        let (mut channel, inbound, _sent) = test_channel();
        let mut events = channel.take_events().unwrap();
        inbound
            .unbounded_send(Ok(Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "bye".into(),
            }))))
            .unwrap();

        assert_eq!(events.recv().await, Some(ChannelEvent::Opened));
        assert_eq!(
            events.recv().await,
            Some(ChannelEvent::Closed {
                reason: Some("bye".into())
            })
        );
        assert!(!channel.is_open());
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_read_error_is_reported() {
        let (mut channel, inbound, _sent) = test_channel();
        let mut events = channel.take_events().unwrap();
        inbound
            .unbounded_send(Err(WsError::ConnectionClosed))
            .unwrap();

        assert_eq!(events.recv().await, Some(ChannelEvent::Opened));
        assert!(matches!(events.recv().await, Some(ChannelEvent::Error(_))));
        assert!(!channel.is_open());
    }

    #[tokio::test]
    async fn test_open_unreachable_endpoint_fails() {
        let result = Channel::open("ws://127.0.0.1:9/ws/conversation").await;
        assert!(matches!(result, Err(TransportError::Connection { .. })));
    }
}
