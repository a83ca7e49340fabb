//! JSON-RPC messages exchanged over the node's websocket.
//!
//! Only the fields the manager needs are decoded so that unrelated changes
//! in the event payload cannot break the subscription.

use chrono::{DateTime, Utc};
use liquidator_core::NewBlockEvent;
use serde::{Deserialize, Serialize};

use crate::error::ChainResult;

/// Query selecting block commit events.
pub const NEW_BLOCK_QUERY: &str = "tm.event='NewBlock'";

#[derive(Debug, Serialize)]
pub struct SubscribeRequest<'a> {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    pub id: u64,
    pub params: SubscribeParams<'a>,
}

#[derive(Debug, Serialize)]
pub struct SubscribeParams<'a> {
    pub query: &'a str,
}

impl SubscribeRequest<'static> {
    pub fn new_blocks() -> Self {
        Self {
            jsonrpc: "2.0",
            method: "subscribe",
            id: 0,
            params: SubscribeParams {
                query: NEW_BLOCK_QUERY,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    result: Option<EventResult>,
}

#[derive(Debug, Deserialize)]
struct EventResult {
    #[serde(default)]
    data: Option<EventData>,
}

#[derive(Debug, Deserialize)]
struct EventData {
    value: EventValue,
}

#[derive(Debug, Deserialize)]
struct EventValue {
    block: Block,
}

#[derive(Debug, Deserialize)]
struct Block {
    header: Header,
}

#[derive(Debug, Deserialize)]
struct Header {
    height: String,
    time: DateTime<Utc>,
}

/// Decode one inbound message.
///
/// Subscribe/unsubscribe acknowledgements carry an empty result and yield
/// `Ok(None)`; anything that is not valid JSON is an error.
pub fn decode_new_block(message: &str) -> ChainResult<Option<NewBlockEvent>> {
    let response: Response = serde_json::from_str(message)?;
    Ok(response
        .result
        .and_then(|result| result.data)
        .map(|data| {
            let header = data.value.block.header;
            NewBlockEvent::new(header.height, header.time)
        }))
}
