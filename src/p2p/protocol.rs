//! P2P protocol messages
//!
//! Frames are `magic (4) | payload length (u32 LE) | bincode payload`. The
//! magic identifies the network so nodes of different networks never talk.

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::chain::{ChainMetadata, HorizonSnapshot};
use crate::consensus::{Block, BlockHeader};
use crate::transaction::Transaction;

use super::TransportError;

/// Protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum frame payload (32 MB, enough for a horizon snapshot)
pub const MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;

/// Maximum headers returned for one request
pub const MAX_HEADERS_PER_REQUEST: u64 = 500;

/// Maximum blocks returned for one request
pub const MAX_BLOCKS_PER_REQUEST: u64 = 50;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Frame too short")]
    TooShort,
    #[error("Wrong network magic")]
    BadMagic,
    #[error("Frame of {0} bytes exceeds the limit")]
    TooLarge(usize),
    #[error("Incomplete frame")]
    Incomplete,
    #[error("Payload error: {0}")]
    Payload(String),
}

/// P2P message types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    /// Handshake carrying the sender's chain summary
    Hello { version: u32, metadata: ChainMetadata },
    Ping(u64),
    Pong(u64),
    /// Announce a newly mined or accepted block
    NewBlock(Block),
    /// Relay a pool transaction
    NewTransaction(Transaction),
    Request { id: u64, request: SyncRequest },
    Response { id: u64, response: SyncResponse },
}

/// Queries served by `sync::serve_request`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncRequest {
    /// Liveness probe
    ChainMetadata,
    /// Main-chain headers starting at `from`
    Headers { from: u64, count: u64 },
    HeaderAtHeight(u64),
    /// UTXO set and kernels as of `height`
    UtxoSnapshot { height: u64 },
    /// Main-chain blocks `from..=to`
    Blocks { from: u64, to: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncResponse {
    ChainMetadata(ChainMetadata),
    Headers(Vec<BlockHeader>),
    Header(Option<BlockHeader>),
    UtxoSnapshot(HorizonSnapshot),
    Blocks(Vec<Block>),
    /// The request could not be served
    Unavailable(String),
}

impl Message {
    /// Serialize to a frame
    pub fn to_bytes(&self, magic: [u8; 4]) -> Result<Vec<u8>, ProtocolError> {
        let payload =
            bincode::serialize(self).map_err(|e| ProtocolError::Payload(e.to_string()))?;
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::TooLarge(payload.len()));
        }
        let mut bytes = Vec::with_capacity(8 + payload.len());
        bytes.extend_from_slice(&magic);
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    /// Deserialize a frame
    pub fn from_bytes(bytes: &[u8], magic: [u8; 4]) -> Result<Self, ProtocolError> {
        let length = parse_frame_header(bytes, magic)?;
        if bytes.len() < 8 + length {
            return Err(ProtocolError::Incomplete);
        }
        Self::from_payload(&bytes[8..8 + length])
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        bincode::deserialize(payload).map_err(|e| ProtocolError::Payload(e.to_string()))
    }

    pub fn command(&self) -> &'static str {
        match self {
            Message::Hello { .. } => "hello",
            Message::Ping(_) => "ping",
            Message::Pong(_) => "pong",
            Message::NewBlock(_) => "block",
            Message::NewTransaction(_) => "tx",
            Message::Request { .. } => "request",
            Message::Response { .. } => "response",
        }
    }
}

/// Check the 8-byte frame header and return the payload length
pub fn parse_frame_header(bytes: &[u8], magic: [u8; 4]) -> Result<usize, ProtocolError> {
    if bytes.len() < 8 {
        return Err(ProtocolError::TooShort);
    }
    if bytes[0..4] != magic {
        return Err(ProtocolError::BadMagic);
    }
    let length = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    if length > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::TooLarge(length));
    }
    Ok(length)
}

/// Stream codec for framed messages
#[derive(Debug, Clone, Copy)]
pub struct MessageCodec {
    magic: [u8; 4],
}

impl MessageCodec {
    pub fn new(magic: [u8; 4]) -> Self {
        Self { magic }
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, TransportError> {
        if src.len() < 8 {
            return Ok(None);
        }
        let length = parse_frame_header(&src[..8], self.magic)?;
        if src.len() < 8 + length {
            src.reserve(8 + length - src.len());
            return Ok(None);
        }
        src.advance(8);
        let payload = src.split_to(length);
        Ok(Some(Message::from_payload(&payload)?))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = TransportError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<(), TransportError> {
        dst.extend_from_slice(&message.to_bytes(self.magic)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Network;

    #[test]
    fn test_message_serialization() {
        let magic = Network::LocalNet.magic();
        let msg = Message::Request {
            id: 7,
            request: SyncRequest::Blocks { from: 3, to: 9 },
        };
        let bytes = msg.to_bytes(magic).unwrap();
        match Message::from_bytes(&bytes, magic).unwrap() {
            Message::Request { id, request } => {
                assert_eq!(id, 7);
                assert_eq!(request, SyncRequest::Blocks { from: 3, to: 9 });
            }
            other => panic!("unexpected {}", other.command()),
        }
    }

    #[test]
    fn test_other_network_rejected() {
        let bytes = Message::Ping(1).to_bytes(Network::Mainnet.magic()).unwrap();
        assert_eq!(
            Message::from_bytes(&bytes, Network::Testnet.magic()).unwrap_err(),
            ProtocolError::BadMagic
        );
    }

    #[test]
    fn test_truncated_frame() {
        let magic = Network::LocalNet.magic();
        let bytes = Message::Pong(42).to_bytes(magic).unwrap();
        assert_eq!(
            Message::from_bytes(&bytes[..bytes.len() - 1], magic).unwrap_err(),
            ProtocolError::Incomplete
        );
        assert_eq!(Message::from_bytes(&bytes[..4], magic).unwrap_err(), ProtocolError::TooShort);
    }

    #[test]
    fn test_codec_waits_for_full_frame() {
        let magic = Network::LocalNet.magic();
        let mut codec = MessageCodec::new(magic);
        let mut buf = BytesMut::new();
        codec.encode(Message::Ping(5), &mut buf).unwrap();
        codec.encode(Message::Pong(6), &mut buf).unwrap();
        let mut partial = buf.split_to(10);
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.unsplit(buf);
        assert!(matches!(codec.decode(&mut partial).unwrap(), Some(Message::Ping(5))));
        assert!(matches!(codec.decode(&mut partial).unwrap(), Some(Message::Pong(6))));
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }
}
