//! Per-IMSI SQN freshness state
//!
//! Implements the array-based freshness window of 3GPP TS 33.102 Annex C
//! (method 1): the 48-bit SQN splits into a 43-bit SEQ and a 5-bit IND, and
//! one high-water SEQ is kept per IND bucket. Out-of-order arrivals across
//! buckets are tolerated; within a bucket SEQ must be strictly increasing.
//!
//! Two store backends share identical semantics: [`MemoryStore`] for a
//! single process run and [`FileStore`] with atomic JSON persistence.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use thiserror::Error;

/// Bits of the SQN used as the array index
pub const IND_BITS: u32 = 5;
/// Number of IND buckets
pub const ARRAY_SIZE: usize = 1 << IND_BITS;
/// Hex digits in the canonical SQN text form
pub const SQN_HEX_LEN: usize = 12;
/// Largest representable SQN (48 bits)
pub const MAX_SQN: u64 = (1 << 48) - 1;
/// Largest representable SEQ (43 bits)
pub const MAX_SEQ: u64 = MAX_SQN >> IND_BITS;

#[derive(Debug, Error)]
pub enum SqnStoreError {
    #[error("sqn exceeds 48 bits: {0:#x}")]
    SqnOutOfRange(u64),

    #[error("seq out of range: {0}")]
    SeqOutOfRange(u64),

    #[error("ind out of range: {0}")]
    IndOutOfRange(u8),

    #[error("invalid sqn hex {0:?}")]
    InvalidSqnHex(String),

    #[error("imsi is required")]
    EmptyImsi,

    #[error("corrupt sqn store: {0}")]
    Corrupt(String),

    #[error("sqn store io: {0}")]
    Io(#[from] std::io::Error),
}

/// Split an SQN into (SEQ, IND).
pub fn split_sqn(sqn: u64) -> Result<(u64, u8), SqnStoreError> {
    if sqn > MAX_SQN {
        return Err(SqnStoreError::SqnOutOfRange(sqn));
    }
    let ind = (sqn & ((1 << IND_BITS) - 1)) as u8;
    let seq = sqn >> IND_BITS;
    Ok((seq, ind))
}

/// Combine SEQ and IND back into a 48-bit SQN.
pub fn combine_sqn(seq: u64, ind: u8) -> Result<u64, SqnStoreError> {
    if ind as usize >= ARRAY_SIZE {
        return Err(SqnStoreError::IndOutOfRange(ind));
    }
    if seq > MAX_SEQ {
        return Err(SqnStoreError::SeqOutOfRange(seq));
    }
    Ok((seq << IND_BITS) | ind as u64)
}

/// Parse a 12-hex-digit SQN string.
pub fn parse_sqn_hex(text: &str) -> Result<u64, SqnStoreError> {
    if text.len() != SQN_HEX_LEN {
        return Err(SqnStoreError::InvalidSqnHex(text.to_string()));
    }
    let value = u64::from_str_radix(text, 16)
        .map_err(|_| SqnStoreError::InvalidSqnHex(text.to_string()))?;
    if value > MAX_SQN {
        return Err(SqnStoreError::SqnOutOfRange(value));
    }
    Ok(value)
}

/// Format an SQN as a zero-padded 12-hex-digit string.
pub fn format_sqn_hex(sqn: u64) -> Result<String, SqnStoreError> {
    if sqn > MAX_SQN {
        return Err(SqnStoreError::SqnOutOfRange(sqn));
    }
    Ok(format!("{:012x}", sqn))
}

/// Per-IMSI SQN state tracked by the tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberState {
    /// High-water SEQ per IND bucket
    pub seq_ms: [u64; ARRAY_SIZE],
    /// Last accepted SQN
    pub sqn_ms: u64,
    /// RFC 3339 timestamp of the last save, empty until first persisted
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Default for SubscriberState {
    fn default() -> Self {
        SubscriberState {
            seq_ms: [0; ARRAY_SIZE],
            sqn_ms: 0,
            updated_at: None,
        }
    }
}

impl SubscriberState {
    /// Seed a fresh state so that `initial_sqn` itself counts as already
    /// seen; the next acceptable SQN in its bucket must be strictly newer.
    pub fn with_initial_sqn(initial_sqn: u64) -> Self {
        let mut state = SubscriberState::default();
        if let Ok((seq, ind)) = split_sqn(initial_sqn) {
            state.seq_ms[ind as usize] = seq;
            state.sqn_ms = initial_sqn;
        }
        state
    }

    /// Apply the freshness rule and update the state when accepted.
    ///
    /// Accept iff `seq > seq_ms[ind]`; on accept the bucket high-water mark
    /// is raised and `sqn_ms` tracks the maximum accepted SQN.
    pub fn accept_sqn(&mut self, sqn: u64) -> Result<bool, SqnStoreError> {
        let (seq, ind) = split_sqn(sqn)?;
        if seq > self.seq_ms[ind as usize] {
            self.seq_ms[ind as usize] = seq;
            if sqn > self.sqn_ms {
                self.sqn_ms = sqn;
            }
            return Ok(true);
        }
        Ok(false)
    }
}

/// Persistence backend for [`SubscriberState`].
///
/// Operations are serialized by the single-threaded runner; `reset` is
/// idempotent.
pub trait SqnStore {
    fn load(&self, imsi: &str) -> Result<Option<SubscriberState>, SqnStoreError>;
    fn save(&mut self, imsi: &str, state: &SubscriberState) -> Result<(), SqnStoreError>;
    fn reset(&mut self, imsi: &str) -> Result<(), SqnStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_sqn_fresh_then_replay() {
        let mut state = SubscriberState::default();
        // seq=1, ind=1
        assert!(state.accept_sqn(0x000000000021).unwrap());
        assert_eq!(state.seq_ms[1], 1);
        assert_eq!(state.sqn_ms, 0x21);

        assert!(!state.accept_sqn(0x000000000021).unwrap());
        assert_eq!(state.seq_ms[1], 1);
        assert_eq!(state.sqn_ms, 0x21);
    }

    #[test]
    fn test_accept_sqn_out_of_order_across_buckets() {
        let mut state = SubscriberState::default();
        assert!(state.accept_sqn(combine_sqn(5, 2).unwrap()).unwrap());
        // older SEQ in a different bucket is still fresh
        assert!(state.accept_sqn(combine_sqn(3, 7).unwrap()).unwrap());
        // but not within the same bucket
        assert!(!state.accept_sqn(combine_sqn(5, 2).unwrap()).unwrap());
        assert!(!state.accept_sqn(combine_sqn(4, 2).unwrap()).unwrap());
        assert_eq!(state.sqn_ms, combine_sqn(5, 2).unwrap());
    }

    #[test]
    fn test_sqn_ms_tracks_maximum() {
        let mut state = SubscriberState::default();
        let high = combine_sqn(9, 0).unwrap();
        let low = combine_sqn(2, 31).unwrap();
        assert!(state.accept_sqn(high).unwrap());
        assert!(state.accept_sqn(low).unwrap());
        assert_eq!(state.sqn_ms, high);
    }

    #[test]
    fn test_split_combine_round_trip() {
        for sqn in [0u64, 1, 0x21, 0x1234, MAX_SQN] {
            let (seq, ind) = split_sqn(sqn).unwrap();
            assert_eq!(combine_sqn(seq, ind).unwrap(), sqn);
        }
    }

    #[test]
    fn test_split_rejects_oversized() {
        assert!(matches!(
            split_sqn(MAX_SQN + 1),
            Err(SqnStoreError::SqnOutOfRange(_))
        ));
    }

    #[test]
    fn test_combine_rejects_out_of_range() {
        assert!(matches!(
            combine_sqn(0, 32),
            Err(SqnStoreError::IndOutOfRange(32))
        ));
        assert!(matches!(
            combine_sqn(MAX_SEQ + 1, 0),
            Err(SqnStoreError::SeqOutOfRange(_))
        ));
    }

    #[test]
    fn test_sqn_hex_round_trip() {
        let value = 0x000000abcdefu64;
        let encoded = format_sqn_hex(value).unwrap();
        assert_eq!(encoded, "000000abcdef");
        assert_eq!(parse_sqn_hex(&encoded).unwrap(), value);
    }

    #[test]
    fn test_parse_sqn_hex_rejects_bad_input() {
        assert!(parse_sqn_hex("123").is_err());
        assert!(parse_sqn_hex("zzzzzzzzzzzz").is_err());
    }

    #[test]
    fn test_with_initial_sqn_marks_seen() {
        let mut state = SubscriberState::with_initial_sqn(0x21);
        assert_eq!(state.sqn_ms, 0x21);
        assert!(!state.accept_sqn(0x21).unwrap());
        assert!(state.accept_sqn(0x41).unwrap()); // seq=2, ind=1
    }
}
