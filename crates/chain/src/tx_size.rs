//! Pre-submission transaction size gate.
//!
//! A transaction must fit in a single packet. The check here is pure and
//! runs on the fully assembled, signed transaction, after any address
//! lookup table compaction.

use serde::Serialize;
use solana_sdk::packet::PACKET_DATA_SIZE;
use solana_sdk::transaction::{Transaction, VersionedTransaction};

/// Hard ceiling on a serialized transaction, in bytes.
pub const MAX_TX_BYTES: usize = PACKET_DATA_SIZE;

/// Exact on-wire size of a transaction.
pub trait WireSize {
    fn wire_size(&self) -> usize;
}

/// Serialized length via bincode, which matches the wire format
/// (short-vec length prefixes included). Unserializable input reports
/// `usize::MAX` so it can never pass the gate.
fn bincode_len<T: Serialize>(value: &T) -> usize {
    bincode::serialized_size(value)
        .ok()
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(usize::MAX)
}

impl WireSize for Transaction {
    fn wire_size(&self) -> usize {
        bincode_len(self)
    }
}

impl WireSize for VersionedTransaction {
    fn wire_size(&self) -> usize {
        bincode_len(self)
    }
}

/// Result of a size check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TxSizeCheck {
    /// Serialized length in bytes
    pub raw: usize,
    /// `raw > MAX_TX_BYTES`
    pub too_large: bool,
}

impl TxSizeCheck {
    /// Bytes left under the ceiling (zero when over).
    pub fn headroom(&self) -> usize {
        MAX_TX_BYTES.saturating_sub(self.raw)
    }
}

/// Serialized byte length of a signed transaction.
#[inline]
pub fn raw_tx_bytes<T: WireSize + ?Sized>(tx: &T) -> usize {
    tx.wire_size()
}

/// Compare a transaction's serialized size against [`MAX_TX_BYTES`].
pub fn is_tx_too_large<T: WireSize + ?Sized>(tx: &T) -> TxSizeCheck {
    let raw = raw_tx_bytes(tx);
    TxSizeCheck {
        raw,
        too_large: raw > MAX_TX_BYTES,
    }
}
