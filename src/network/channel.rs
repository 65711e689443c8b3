//! Duplex Channel
//!
//! One reliable, ordered, bidirectional message link over a WebSocket
//! connection. The same type serves both sides: a server wraps each
//! accepted connection, a client wraps its one outbound connection. Two
//! tasks run per channel: a writer draining the outbound queue and a
//! reader publishing inbound messages, in arrival order, on the channel's
//! own event bus.
//!
//! The receive loop starts immediately, but message delivery is gated on
//! [`Channel::open`]: frames read before then are buffered, so a consumer
//! can finish wiring its subscriptions without losing the peer's first
//! messages. `Disconnected` is not gated; it fires exactly once, on
//! explicit [`Channel::close`] or on a detected peer close or read error,
//! whichever happens first. After that the channel stops reading and
//! writing; nothing retries silently.

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

use crate::event::{EventBus, Subscription};
use crate::network::protocol::{ClientMessage, ServerMessage};

/// Channel on the server side of a connection.
pub type ServerChannel = Channel<ClientMessage, ServerMessage>;
/// Channel on the client side of a connection.
pub type ClientChannel = Channel<ServerMessage, ClientMessage>;

/// Failures on a channel or while establishing one.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The link is down; the message was not sent.
    #[error("connection closed")]
    Closed,
    /// WebSocket-level failure.
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    /// Outbound message could not be encoded.
    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// What a channel publishes on its bus.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelEvent<In> {
    /// An inbound message, delivered in arrival order.
    Message(In),
    /// The link went down. Fires exactly once per channel.
    Disconnected,
}

enum Delivery<In> {
    /// Pre-`open`: inbound messages wait here.
    Buffering(VecDeque<In>),
    /// Post-`open`: inbound messages publish as they arrive.
    Live,
}

struct Shared<In> {
    closed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    events: EventBus<ChannelEvent<In>>,
    delivery: Mutex<Delivery<In>>,
}

impl<In> Shared<In> {
    fn deliver(&self, message: In) {
        {
            let mut delivery = self.delivery.lock().expect("delivery lock poisoned");
            if let Delivery::Buffering(queue) = &mut *delivery {
                queue.push_back(message);
                return;
            }
        }
        self.events.publish(&ChannelEvent::Message(message));
    }

    /// Transition to disconnected; only the first caller publishes.
    fn mark_disconnected(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.shutdown_tx.send(true);
            self.events.publish(&ChannelEvent::Disconnected);
        }
    }
}

/// One duplex link. `In` is what the peer sends us, `Out` what we send the
/// peer. Cheap to clone; all clones share the underlying connection.
pub struct Channel<In, Out> {
    shared: Arc<Shared<In>>,
    outbound: mpsc::UnboundedSender<Message>,
    _out: PhantomData<fn(Out)>,
}

impl<In, Out> Clone for Channel<In, Out> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            outbound: self.outbound.clone(),
            _out: PhantomData,
        }
    }
}

impl<In, Out> Channel<In, Out>
where
    In: DeserializeOwned + Send + Sync + 'static,
    Out: Serialize,
{
    /// Wrap an established WebSocket connection, spawning its reader and
    /// writer tasks. Messages buffer until [`Channel::open`].
    pub fn spawn<S>(ws: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            closed: AtomicBool::new(false),
            shutdown_tx,
            events: EventBus::new(),
            delivery: Mutex::new(Delivery::Buffering(VecDeque::new())),
        });
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let (sink, stream) = ws.split();
        tokio::spawn(write_loop(sink, outbound_rx, Arc::clone(&shared)));
        tokio::spawn(read_loop(stream, shutdown_rx, Arc::clone(&shared)));

        Self {
            shared,
            outbound: outbound_tx,
            _out: PhantomData,
        }
    }

    /// Register a handler on this channel's bus.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ChannelEvent<In>) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(handler)
    }

    /// Flush buffered inbound messages, in arrival order, and deliver live
    /// from now on. Call once after subscriptions are wired.
    pub fn open(&self) {
        loop {
            let batch = {
                let mut delivery = self
                    .shared
                    .delivery
                    .lock()
                    .expect("delivery lock poisoned");
                match &mut *delivery {
                    Delivery::Live => return,
                    Delivery::Buffering(queue) => {
                        if queue.is_empty() {
                            // Only an empty drain round may go live, so
                            // frames arriving mid-flush keep their order.
                            *delivery = Delivery::Live;
                            return;
                        }
                        std::mem::take(queue)
                    }
                }
            };
            for message in batch {
                self.shared.events.publish(&ChannelEvent::Message(message));
            }
        }
    }

    /// Queue a message for the peer. Fails fast once the link is down.
    pub fn send(&self, message: &Out) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        let text = serde_json::to_string(message)?;
        self.outbound
            .send(Message::Text(text))
            .map_err(|_| ConnectionError::Closed)
    }

    /// Whether the link is down.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Close the link. Idempotent and safe from any task; the disconnect
    /// event fires at most once across close and peer-side detection.
    pub fn close(&self) {
        // Queue the close frame first so the writer can still flush
        // everything already queued.
        let _ = self.outbound.send(Message::Close(None));
        self.shared.mark_disconnected();
    }
}

async fn write_loop<S, In>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    shared: Arc<Shared<In>>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        let is_close = matches!(frame, Message::Close(_));
        if sink.send(frame).await.is_err() {
            shared.mark_disconnected();
            return;
        }
        if is_close {
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop<S, In>(
    mut stream: SplitStream<WebSocketStream<S>>,
    mut shutdown_rx: watch::Receiver<bool>,
    shared: Arc<Shared<In>>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
    In: DeserializeOwned + Send + Sync + 'static,
{
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<In>(&text) {
                    Ok(message) => shared.deliver(message),
                    Err(e) => warn!("dropping malformed text frame: {e}"),
                },
                Some(Ok(Message::Binary(bytes))) => match bincode::deserialize::<In>(&bytes) {
                    Ok(message) => shared.deliver(message),
                    Err(e) => warn!("dropping malformed binary frame: {e}"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // ping/pong answered by tungstenite
                Some(Err(e)) => {
                    debug!("read error, dropping connection: {e}");
                    break;
                }
            }
        }
    }
    shared.mark_disconnected();
}
