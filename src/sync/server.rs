use tracing::trace;

use crate::chain::Blockchain;
use crate::p2p::{SyncRequest, SyncResponse, MAX_BLOCKS_PER_REQUEST, MAX_HEADERS_PER_REQUEST};

/// Answer a peer's sync query from the local chain
pub fn serve_request(chain: &Blockchain, request: &SyncRequest) -> SyncResponse {
    trace!(?request, "Serving sync request");
    match *request {
        SyncRequest::ChainMetadata => SyncResponse::ChainMetadata(chain.metadata()),
        SyncRequest::Headers { from, count } => {
            let count = count.min(MAX_HEADERS_PER_REQUEST) as usize;
            SyncResponse::Headers(chain.headers(from, count))
        }
        SyncRequest::HeaderAtHeight(height) => {
            SyncResponse::Header(chain.header_at(height).cloned())
        }
        SyncRequest::UtxoSnapshot { height } => match chain.horizon_snapshot(height) {
            Ok(snapshot) => SyncResponse::UtxoSnapshot(snapshot),
            Err(error) => SyncResponse::Unavailable(error.to_string()),
        },
        SyncRequest::Blocks { from, to } => {
            if to < from {
                return SyncResponse::Blocks(Vec::new());
            }
            let to = to.min(from.saturating_add(MAX_BLOCKS_PER_REQUEST - 1));
            let mut blocks = Vec::new();
            for height in from..=to {
                match chain.block_at(height) {
                    Ok(Some(block)) => blocks.push(block),
                    Ok(None) => break,
                    Err(error) => return SyncResponse::Unavailable(error.to_string()),
                }
            }
            if blocks.is_empty() && from <= chain.height() {
                return SyncResponse::Unavailable(format!("block {from} is pruned"));
            }
            SyncResponse::Blocks(blocks)
        }
    }
}
