//! TCP transport
//!
//! One reader task and one writer task per connection. Responses are matched
//! to pending requests by id; every other inbound message is forwarded to the
//! node on a channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    Message, MessageCodec, PeerId, PeerManager, SyncRequest, SyncResponse, Transport,
    TransportError, MALFORMED_PENALTY, UNRESPONSIVE_PENALTY,
};

pub type Inbound = mpsc::UnboundedReceiver<(PeerId, Message)>;

pub struct TcpTransport {
    magic: [u8; 4],
    peers: Arc<PeerManager>,
    connections: DashMap<PeerId, mpsc::UnboundedSender<Message>>,
    pending: DashMap<u64, oneshot::Sender<SyncResponse>>,
    next_id: AtomicU64,
    inbound: mpsc::UnboundedSender<(PeerId, Message)>,
}

impl TcpTransport {
    pub fn new(magic: [u8; 4], peers: Arc<PeerManager>) -> (Arc<Self>, Inbound) {
        let (inbound, receiver) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            magic,
            peers,
            connections: DashMap::new(),
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
            inbound,
        });
        (transport, receiver)
    }

    /// Accept connections until `cancel` fires
    pub async fn listen(
        self: Arc<Self>,
        addr: &str,
        cancel: CancellationToken,
    ) -> Result<(), TransportError> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr, "Listening for peers");
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, remote) = accepted?;
                    let id = PeerId::new(remote.to_string());
                    if self.peers.is_denylisted(&id) {
                        debug!(peer = %id, "Refusing denylisted peer");
                        continue;
                    }
                    self.spawn_connection(stream, id);
                }
                _ = cancel.cancelled() => return Ok(()),
            }
        }
    }

    pub async fn connect(self: &Arc<Self>, addr: &str) -> Result<PeerId, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        let id = PeerId::new(addr);
        self.spawn_connection(stream, id.clone());
        Ok(id)
    }

    /// Send one message to one peer
    pub fn send(&self, peer: &PeerId, message: Message) -> Result<(), TransportError> {
        let sender = self
            .connections
            .get(peer)
            .ok_or_else(|| TransportError::NotConnected(peer.clone()))?;
        sender
            .send(message)
            .map_err(|_| TransportError::Closed(peer.clone()))
    }

    fn spawn_connection(self: &Arc<Self>, stream: TcpStream, id: PeerId) {
        let (mut sink, mut stream) = Framed::new(stream, MessageCodec::new(self.magic)).split();
        let (sender, mut outbound) = mpsc::unbounded_channel::<Message>();
        self.connections.insert(id.clone(), sender);
        self.peers.add_peer(id.clone());
        info!(peer = %id, "Peer connected");

        let writer_id = id.clone();
        tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                if let Err(error) = sink.send(message).await {
                    debug!(peer = %writer_id, %error, "Write failed");
                    break;
                }
            }
        });

        let transport = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Response { id: request_id, response }) => {
                        if let Some((_, waiter)) = transport.pending.remove(&request_id) {
                            let _ = waiter.send(response);
                        }
                    }
                    Ok(message) => {
                        if transport.inbound.send((id.clone(), message)).is_err() {
                            break;
                        }
                    }
                    Err(TransportError::Io(error)) => {
                        debug!(peer = %id, %error, "Read failed");
                        break;
                    }
                    Err(error) => {
                        warn!(peer = %id, %error, "Malformed frame");
                        transport.peers.record_misbehaviour(&id, MALFORMED_PENALTY);
                        break;
                    }
                }
                if transport.peers.is_denylisted(&id) {
                    break;
                }
            }
            transport.connections.remove(&id);
            transport.peers.peer_disconnected(&id);
            info!(peer = %id, "Peer disconnected");
        });
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn broadcast(&self, message: Message) -> Result<usize, TransportError> {
        let mut reached = 0;
        for entry in self.connections.iter() {
            if self.peers.is_denylisted(entry.key()) {
                continue;
            }
            if entry.value().send(message.clone()).is_ok() {
                reached += 1;
            }
        }
        Ok(reached)
    }

    async fn request(
        &self,
        peer: &PeerId,
        request: SyncRequest,
        timeout: Duration,
    ) -> Result<SyncResponse, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (waiter, response) = oneshot::channel();
        self.pending.insert(id, waiter);
        let started = Instant::now();
        if let Err(error) = self.send(peer, Message::Request { id, request }) {
            self.pending.remove(&id);
            return Err(error);
        }
        match tokio::time::timeout(timeout, response).await {
            Ok(Ok(response)) => {
                self.peers.record_latency(peer, started.elapsed());
                Ok(response)
            }
            Ok(Err(_)) => Err(TransportError::Closed(peer.clone())),
            Err(_) => {
                self.pending.remove(&id);
                self.peers.record_misbehaviour(peer, UNRESPONSIVE_PENALTY);
                Err(TransportError::Timeout(peer.clone()))
            }
        }
    }
}
