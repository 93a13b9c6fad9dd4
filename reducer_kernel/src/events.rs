//! Reducer kernel: upstream blocks and logs.
//!
//! Blocks arrive as JSON with hex-string quantities (`"0x1b4"`). They are
//! normalized once, at the edge, into typed `Block`/`Log` values that
//! reducers consume.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::NormalizeError;

/// At most four topics per log (event signature plus three indexed args).
pub const MAX_TOPICS: usize = 4;

/// Block as delivered upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBlock {
    pub number: String,
    pub hash: String,
    pub parent_hash: String,
    pub timestamp: String,
    #[serde(default)]
    pub logs: Vec<RawLog>,
}

/// Log as delivered upstream. `event`/`args` are present when the source
/// already decoded the log against an ABI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    pub log_index: String,
    pub block_number: String,
    pub block_hash: String,
    pub transaction_hash: String,
    pub transaction_index: String,
    pub address: String,
    pub data: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub args: Value,
}

impl RawBlock {
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub number: u64,
    pub hash: String,
    pub parent_hash: String,
    pub timestamp: u64,
    pub logs: Vec<Log>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Log {
    pub log_index: u64,
    pub block_number: u64,
    pub block_hash: String,
    pub transaction_hash: String,
    pub transaction_index: u64,
    pub address: String,
    pub data: String,
    pub topics: Vec<String>,
    pub event: Option<String>,
    pub args: Value,
}

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_quantity(field: &'static str, value: &str) -> Result<u64, NormalizeError> {
    let invalid = || NormalizeError::InvalidHex {
        field,
        value: value.to_string(),
    };
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(invalid)?;
    if digits.is_empty() {
        return Err(invalid());
    }
    u64::from_str_radix(digits, 16).map_err(|_| invalid())
}

impl Block {
    pub fn normalize(raw: RawBlock) -> Result<Block, NormalizeError> {
        let logs = raw
            .logs
            .into_iter()
            .map(Log::normalize)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Block {
            number: parse_quantity("number", &raw.number)?,
            hash: raw.hash,
            parent_hash: raw.parent_hash,
            timestamp: parse_quantity("timestamp", &raw.timestamp)?,
            logs,
        })
    }
}

impl Log {
    pub fn normalize(raw: RawLog) -> Result<Log, NormalizeError> {
        if raw.topics.len() > MAX_TOPICS {
            return Err(NormalizeError::TooManyTopics(raw.topics.len()));
        }
        Ok(Log {
            log_index: parse_quantity("logIndex", &raw.log_index)?,
            block_number: parse_quantity("blockNumber", &raw.block_number)?,
            block_hash: raw.block_hash,
            transaction_hash: raw.transaction_hash,
            transaction_index: parse_quantity("transactionIndex", &raw.transaction_index)?,
            address: raw.address,
            data: raw.data,
            topics: raw.topics,
            event: raw.event,
            args: raw.args,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_log(topics: usize) -> Value {
        json!({
            "logIndex": "0x0",
            "blockNumber": "0x10",
            "blockHash": "0xb10",
            "transactionHash": "0xt1",
            "transactionIndex": "0x2",
            "address": "0xabc",
            "data": "0x",
            "topics": vec!["0x01"; topics],
            "event": "Transfer",
            "args": {"value": "5"}
        })
    }

    #[test]
    fn normalizes_hex_quantities() {
        let raw = RawBlock::from_value(json!({
            "number": "0x10",
            "hash": "0xb10",
            "parentHash": "0xb0f",
            "timestamp": "0x5f5e100",
            "logs": [raw_log(2)]
        }))
        .unwrap();
        let block = Block::normalize(raw).unwrap();
        assert_eq!(block.number, 16);
        assert_eq!(block.timestamp, 100_000_000);
        assert_eq!(block.logs[0].transaction_index, 2);
        assert_eq!(block.logs[0].event.as_deref(), Some("Transfer"));
    }

    #[test]
    fn rejects_bad_hex_and_topic_overflow() {
        assert_eq!(
            parse_quantity("number", "16"),
            Err(NormalizeError::InvalidHex { field: "number", value: "16".into() })
        );
        assert!(parse_quantity("number", "0x").is_err());
        assert!(parse_quantity("number", "0xzz").is_err());

        let raw: RawLog = serde_json::from_value(raw_log(5)).unwrap();
        assert_eq!(Log::normalize(raw), Err(NormalizeError::TooManyTopics(5)));
    }

    #[test]
    fn missing_logs_default_to_empty() {
        let raw = RawBlock::from_value(json!({
            "number": "0x1", "hash": "0xh", "parentHash": "0xp", "timestamp": "0x0"
        }))
        .unwrap();
        assert!(Block::normalize(raw).unwrap().logs.is_empty());
    }
}
