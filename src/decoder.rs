//! Decoding of position manager logs into [`DomainEvent`]s.
//!
//! The decoder is total over topic values: logs whose first topic is not one
//! of the three position events come back as [`Decoded::Unrecognized`].
//! Only recognized events with a malformed payload are errors.

use crate::domain::{Address, Chain, DomainEvent, EventKind, PositionKey, RawLog};
use thiserror::Error;

/// `IncreaseLiquidity(uint256 indexed tokenId, uint128 liquidity, uint256 amount0, uint256 amount1)`
pub const INCREASE_LIQUIDITY_TOPIC: &str =
    "0x3067048beee31b25b2f1681f88dac838c8bba36af25bfb2b7cf7473a5847e35f";
/// `DecreaseLiquidity(uint256 indexed tokenId, uint128 liquidity, uint256 amount0, uint256 amount1)`
pub const DECREASE_LIQUIDITY_TOPIC: &str =
    "0x26f6a048ee9138f2c0ce266f322cb99228e8d619ae2bff30c67f8dcf9d2377b4";
/// `Collect(uint256 indexed tokenId, address recipient, uint256 amount0, uint256 amount1)`
pub const COLLECT_TOPIC: &str =
    "0x40d0efd1a53d60ecbf40971b9daf7dc90178c3aadc7aab1765632738fa8b8f01";

const WORD: usize = 32;

/// Every topic0 the decoder recognizes.
pub fn event_topics() -> Vec<String> {
    vec![
        INCREASE_LIQUIDITY_TOPIC.to_string(),
        DECREASE_LIQUIDITY_TOPIC.to_string(),
        COLLECT_TOPIC.to_string(),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Event(DomainEvent),
    Unrecognized,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("missing indexed tokenId topic")]
    MissingTokenId,
    #[error("invalid hex in {0}")]
    InvalidHex(&'static str),
    #[error("expected {expected} data bytes, got {actual}")]
    DataLength { expected: usize, actual: usize },
    #[error("{0} does not fit in 128 bits")]
    Overflow(&'static str),
    #[error("block timestamp not known")]
    MissingTimestamp,
}

/// Binds decoded events to positions on one chain and protocol.
#[derive(Debug, Clone)]
pub struct EventDecoder {
    chain: Chain,
    protocol: String,
}

enum Signature {
    Increase,
    Decrease,
    Collect,
}

impl EventDecoder {
    pub fn new(chain: Chain, protocol: impl Into<String>) -> Self {
        Self {
            chain,
            protocol: protocol.into(),
        }
    }

    pub fn decode(&self, log: &RawLog) -> Result<Decoded, DecodeError> {
        let Some(topic0) = log.topics.first() else {
            return Ok(Decoded::Unrecognized);
        };
        let signature = if topic0.eq_ignore_ascii_case(INCREASE_LIQUIDITY_TOPIC) {
            Signature::Increase
        } else if topic0.eq_ignore_ascii_case(DECREASE_LIQUIDITY_TOPIC) {
            Signature::Decrease
        } else if topic0.eq_ignore_ascii_case(COLLECT_TOPIC) {
            Signature::Collect
        } else {
            return Ok(Decoded::Unrecognized);
        };

        let token_topic = log.topics.get(1).ok_or(DecodeError::MissingTokenId)?;
        let token_word = decode_hex(token_topic, "tokenId topic")?;
        if token_word.len() != WORD {
            return Err(DecodeError::InvalidHex("tokenId topic"));
        }
        let token_id = word_to_u128(&token_word, "tokenId")?;

        let data = decode_hex(&log.data, "data")?;
        if data.len() != 3 * WORD {
            return Err(DecodeError::DataLength {
                expected: 3 * WORD,
                actual: data.len(),
            });
        }
        let word = |i: usize| &data[i * WORD..(i + 1) * WORD];
        let amount0 = word_to_u128(word(1), "amount0")?;
        let amount1 = word_to_u128(word(2), "amount1")?;

        let kind = match signature {
            Signature::Increase => EventKind::IncreaseLiquidity {
                liquidity: word_to_u128(word(0), "liquidity")?,
                amount0,
                amount1,
            },
            Signature::Decrease => EventKind::DecreaseLiquidity {
                liquidity: word_to_u128(word(0), "liquidity")?,
                amount0,
                amount1,
            },
            Signature::Collect => {
                let mut recipient = [0u8; 20];
                recipient.copy_from_slice(&word(0)[12..]);
                EventKind::Collect {
                    recipient: Address::from_bytes(&recipient),
                    amount0,
                    amount1,
                }
            }
        };

        Ok(Decoded::Event(DomainEvent {
            position: PositionKey {
                chain: self.chain.clone(),
                protocol: self.protocol.clone(),
                external_id: token_id.to_string(),
            },
            kind,
            block_number: log.block_number,
            block_timestamp: log.block_timestamp.ok_or(DecodeError::MissingTimestamp)?,
            transaction_hash: log.transaction_hash.to_ascii_lowercase(),
            transaction_index: log.transaction_index,
            log_index: log.log_index,
        }))
    }
}

/// Encode an event's topics and data the way the position manager emits them.
pub fn encode_event(token_id: u128, kind: &EventKind) -> (Vec<String>, String) {
    let topic0 = match kind {
        EventKind::IncreaseLiquidity { .. } => INCREASE_LIQUIDITY_TOPIC,
        EventKind::DecreaseLiquidity { .. } => DECREASE_LIQUIDITY_TOPIC,
        EventKind::Collect { .. } => COLLECT_TOPIC,
    };
    let first = match kind {
        EventKind::IncreaseLiquidity { liquidity, .. }
        | EventKind::DecreaseLiquidity { liquidity, .. } => u128_word(*liquidity),
        EventKind::Collect { recipient, .. } => {
            let raw = recipient.as_str().trim_start_matches("0x");
            format!("{:0>64}", raw)
        }
    };
    let (amount0, amount1) = kind.amounts();
    let data = format!("0x{}{}{}", first, u128_word(amount0), u128_word(amount1));
    (
        vec![topic0.to_string(), format!("0x{}", u128_word(token_id))],
        data,
    )
}

fn u128_word(value: u128) -> String {
    format!("{:064x}", value)
}

fn decode_hex(s: &str, what: &'static str) -> Result<Vec<u8>, DecodeError> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s)).map_err(|_| DecodeError::InvalidHex(what))
}

/// Big-endian 32-byte word to u128; the upper 16 bytes must be zero.
fn word_to_u128(word: &[u8], what: &'static str) -> Result<u128, DecodeError> {
    let (high, low) = word.split_at(WORD - 16);
    if high.iter().any(|b| *b != 0) {
        return Err(DecodeError::Overflow(what));
    }
    let mut buf = [0u8; 16];
    buf.copy_from_slice(low);
    Ok(u128::from_be_bytes(buf))
}
