use std::fmt::{self, Display};
use std::io;
use std::io::{Read, Write};

use chain::config::MAX_BLOCKS_PER_RESPONSE;
use containers::{Height, RawBlock};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use snap::read::FrameDecoder;
use snap::write::FrameEncoder;

/// Upper bound for an encoded message after decompression.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetBlocksRequest {
    pub from_height: Height,
    /// Echoed by the response so stale replies can be told apart.
    pub nonce: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetBlocksResponse {
    pub nonce: u32,
    /// Consecutive raw blocks starting at the requested height.
    pub blocks: Vec<RawBlock>,
}

impl GetBlocksResponse {
    pub fn height_range(&self) -> Option<(Height, Height)> {
        Some((self.blocks.first()?.height, self.blocks.last()?.height))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBlockBroadcast {
    pub block: RawBlock,
}

/// Everything the accounting protocol puts on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AccountingMessage {
    GetBlocksRequest(GetBlocksRequest),
    GetBlocksResponse(GetBlocksResponse),
    NewBlockBroadcast(NewBlockBroadcast),
}

impl Display for AccountingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountingMessage::GetBlocksRequest(request) => write!(
                f,
                "GetBlocksRequest(from={}, nonce={})",
                request.from_height, request.nonce
            ),
            AccountingMessage::GetBlocksResponse(response) => write!(
                f,
                "GetBlocksResponse(nonce={}, blocks={})",
                response.nonce,
                response.blocks.len()
            ),
            AccountingMessage::NewBlockBroadcast(broadcast) => {
                write!(f, "NewBlockBroadcast(height={})", broadcast.block.height)
            }
        }
    }
}

/// JSON payloads in Snappy framing.
#[derive(Clone, Default)]
pub struct AccountingCodec;

impl AccountingCodec {
    fn compress(data: &[u8]) -> io::Result<Vec<u8>> {
        let mut encoder = FrameEncoder::new(Vec::new());
        encoder.write_all(data)?;
        encoder
            .into_inner()
            .map_err(|e| io::Error::other(format!("Snappy framing failed: {e}")))
    }

    fn decompress(data: &[u8]) -> io::Result<Vec<u8>> {
        let mut decoder = FrameDecoder::new(data).take(MAX_MESSAGE_SIZE as u64 + 1);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed)?;
        if decompressed.len() > MAX_MESSAGE_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Message exceeds {MAX_MESSAGE_SIZE} bytes"),
            ));
        }
        Ok(decompressed)
    }

    pub fn encode<M: Serialize>(message: &M) -> io::Result<Vec<u8>> {
        let json = serde_json::to_vec(message)
            .map_err(|e| io::Error::other(format!("JSON encode failed: {e}")))?;
        Self::compress(&json)
    }

    pub fn decode<M: DeserializeOwned>(data: &[u8]) -> io::Result<M> {
        let json = Self::decompress(data)?;
        serde_json::from_slice(&json).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("JSON decode failed: {e}"))
        })
    }

    /// Decode a message received from a peer. Responses carrying more than
    /// `MAX_BLOCKS_PER_RESPONSE` blocks are rejected.
    pub fn decode_message(data: &[u8]) -> io::Result<AccountingMessage> {
        let message: AccountingMessage = Self::decode(data)?;
        if let AccountingMessage::GetBlocksResponse(response) = &message {
            if response.blocks.len() > MAX_BLOCKS_PER_RESPONSE {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "Too many blocks in response: {} > {}",
                        response.blocks.len(),
                        MAX_BLOCKS_PER_RESPONSE
                    ),
                ));
            }
        }
        Ok(message)
    }
}
