// Plexus - Embedded telemetry client
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Persistent ring buffer for undeliverable batches
//!
//! Failed batches are written to a small, fixed number of storage slots
//! arranged as a ring so they survive reboot and power loss. Each slot
//! carries a CRC32 and length header; the ring's head/tail/count metadata
//! is stored under its own key with its own CRC32.
//!
//! # Record layouts
//!
//! ```text
//! slot  "plexus_b<i>":  [crc32 LE u32][len LE u32][payload...]
//! meta  "plexus_meta":  [head u8][tail u8][count u8][slots u8][crc32 LE u32]
//! ```
//!
//! Reads are two-phase: [`PersistentRing::peek_oldest`] returns the oldest
//! valid batch without removing it and [`PersistentRing::confirm_oldest`]
//! removes it once delivery succeeded, so a failure mid-attempt loses
//! nothing. When the ring is full the oldest batch is evicted.

use crate::error::StorageError;
use crate::hal::Hal;
use crc::{Crc, CRC_32_ISO_HDLC};

/// CRC-32 (ISO-HDLC), the common zlib/Ethernet variant
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Storage key of the ring metadata
pub const META_KEY: &str = "plexus_meta";

/// Default number of slots
pub const DEFAULT_SLOTS: usize = 8;

/// Bytes preceding the payload in a slot record
pub const SLOT_HEADER_LEN: usize = 8;

const META_LEN: usize = 8;

/// Storage key of slot `index`
pub fn slot_key(index: usize) -> String {
    format!("plexus_b{}", index)
}

/// Why a slot record was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    /// Shorter than its header
    Truncated { len: usize },
    /// Declared length disagrees with the stored bytes
    LengthMismatch { declared: usize, actual: usize },
    /// Payload checksum mismatch
    InvalidChecksum { expected: u32, actual: u32 },
}

/// Prepend the checksum and length header to a payload
pub fn encode_slot(payload: &[u8]) -> Vec<u8> {
    let mut record = Vec::with_capacity(SLOT_HEADER_LEN + payload.len());
    record.extend_from_slice(&CRC32.checksum(payload).to_le_bytes());
    record.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    record.extend_from_slice(payload);
    record
}

/// Validate a slot record and return its payload
pub fn decode_slot(record: &[u8]) -> Result<&[u8], SlotError> {
    if record.len() < SLOT_HEADER_LEN {
        return Err(SlotError::Truncated { len: record.len() });
    }
    let expected = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
    let declared = u32::from_le_bytes([record[4], record[5], record[6], record[7]]) as usize;
    let payload = &record[SLOT_HEADER_LEN..];
    if declared != payload.len() {
        return Err(SlotError::LengthMismatch {
            declared,
            actual: payload.len(),
        });
    }
    let actual = CRC32.checksum(payload);
    if actual != expected {
        return Err(SlotError::InvalidChecksum { expected, actual });
    }
    Ok(payload)
}

/// Ring position, as persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RingMeta {
    head: u8,
    tail: u8,
    count: u8,
    slots: u8,
}

impl RingMeta {
    fn empty(slots: u8) -> Self {
        Self {
            head: 0,
            tail: 0,
            count: 0,
            slots,
        }
    }

    fn to_bytes(self) -> [u8; META_LEN] {
        let body = [self.head, self.tail, self.count, self.slots];
        let crc = CRC32.checksum(&body).to_le_bytes();
        [body[0], body[1], body[2], body[3], crc[0], crc[1], crc[2], crc[3]]
    }

    /// Decode and sanity-check persisted metadata for a ring of `slots`
    fn from_bytes(bytes: &[u8], slots: u8) -> Option<Self> {
        if bytes.len() != META_LEN {
            return None;
        }
        let crc = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if CRC32.checksum(&bytes[..4]) != crc {
            return None;
        }
        let meta = Self {
            head: bytes[0],
            tail: bytes[1],
            count: bytes[2],
            slots: bytes[3],
        };
        let consistent = meta.slots == slots
            && meta.head < slots
            && meta.tail < slots
            && meta.count <= slots
            && (u16::from(meta.tail) + u16::from(meta.count)) % u16::from(slots)
                == u16::from(meta.head);
        consistent.then_some(meta)
    }

    fn next(&self, index: u8) -> u8 {
        ((u16::from(index) + 1) % u16::from(self.slots)) as u8
    }
}

/// Crash-safe ring of persisted batches
#[derive(Debug, Clone)]
pub struct PersistentRing {
    meta: RingMeta,
}

impl PersistentRing {
    /// Empty ring with `slots` slots (clamped to 1..=255), not yet persisted
    pub fn new(slots: usize) -> Self {
        let slots = slots.clamp(1, u8::MAX as usize) as u8;
        Self {
            meta: RingMeta::empty(slots),
        }
    }

    /// Restore the ring from storage
    ///
    /// Missing or corrupt metadata yields an empty ring; stale slots are
    /// then simply overwritten.
    pub fn load<H: Hal>(hal: &mut H, slots: usize) -> Self {
        let mut ring = Self::new(slots);
        match hal.storage_read(META_KEY) {
            Ok(Some(bytes)) => match RingMeta::from_bytes(&bytes, ring.meta.slots) {
                Some(meta) => {
                    log::debug!("Restored persistent ring: {} batch(es) pending", meta.count);
                    ring.meta = meta;
                }
                None => log::warn!("Discarding corrupt persistent ring metadata"),
            },
            Ok(None) => {}
            Err(e) => log::warn!("Could not read persistent ring metadata: {}", e),
        }
        ring
    }

    /// Number of persisted batches
    pub fn len(&self) -> usize {
        usize::from(self.meta.count)
    }

    /// True if no batch is persisted
    pub fn is_empty(&self) -> bool {
        self.meta.count == 0
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        usize::from(self.meta.slots)
    }

    /// Persist a batch at the head, evicting the oldest if the ring is full
    ///
    /// A full ring's head slot is the tail slot, so the eviction is
    /// committed before that slot is overwritten. Power loss at any point
    /// never leaves the metadata pointing at a newer batch as the oldest.
    pub fn push<H: Hal>(&mut self, hal: &mut H, batch: &[u8]) -> Result<(), StorageError> {
        if self.meta.count == self.meta.slots {
            log::warn!("Persistent ring full, evicting oldest batch");
            self.discard_oldest(hal)?;
        }

        let mut meta = self.meta;
        hal.storage_write(&slot_key(usize::from(meta.head)), &encode_slot(batch))?;
        meta.count += 1;
        meta.head = meta.next(meta.head);

        self.save(hal, meta)
    }

    /// Oldest valid batch, left in place
    ///
    /// Missing or corrupt slots met on the way are discarded.
    pub fn peek_oldest<H: Hal>(&mut self, hal: &mut H) -> Result<Option<Vec<u8>>, StorageError> {
        while self.meta.count > 0 {
            let key = slot_key(usize::from(self.meta.tail));
            match hal.storage_read(&key)? {
                Some(record) => match decode_slot(&record) {
                    Ok(payload) => return Ok(Some(payload.to_vec())),
                    Err(e) => log::warn!("Discarding corrupt batch in {}: {:?}", key, e),
                },
                None => log::warn!("Discarding missing batch {}", key),
            }
            self.discard_oldest(hal)?;
        }
        Ok(None)
    }

    /// Remove the oldest batch after it was delivered
    pub fn confirm_oldest<H: Hal>(&mut self, hal: &mut H) -> Result<(), StorageError> {
        self.discard_oldest(hal)
    }

    fn discard_oldest<H: Hal>(&mut self, hal: &mut H) -> Result<(), StorageError> {
        if self.meta.count == 0 {
            return Ok(());
        }
        let key = slot_key(usize::from(self.meta.tail));
        let mut meta = self.meta;
        meta.tail = meta.next(meta.tail);
        meta.count -= 1;
        // metadata first: an orphaned slot is harmless, a dangling reference is not
        self.save(hal, meta)?;
        if let Err(e) = hal.storage_clear(&key) {
            log::debug!("Could not clear {}: {}", key, e);
        }
        Ok(())
    }

    fn save<H: Hal>(&mut self, hal: &mut H, meta: RingMeta) -> Result<(), StorageError> {
        hal.storage_write(META_KEY, &meta.to_bytes())?;
        self.meta = meta;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::hal::{HttpRequest, MockHal};

    fn drain(ring: &mut PersistentRing, hal: &mut MockHal) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(batch) = ring.peek_oldest(hal).unwrap() {
            out.push(batch);
            ring.confirm_oldest(hal).unwrap();
        }
        out
    }

    #[test]
    fn test_slot_roundtrip() {
        let record = encode_slot(b"{\"points\":[]}");
        assert_eq!(record.len(), SLOT_HEADER_LEN + 13);
        assert_eq!(decode_slot(&record), Ok(&b"{\"points\":[]}"[..]));
    }

    #[test]
    fn test_slot_corruption_detected() {
        let mut record = encode_slot(b"payload");
        let last = record.len() - 1;
        record[last] ^= 0x01;
        assert!(matches!(
            decode_slot(&record),
            Err(SlotError::InvalidChecksum { .. })
        ));

        let record = encode_slot(b"payload");
        assert!(matches!(
            decode_slot(&record[..record.len() - 2]),
            Err(SlotError::LengthMismatch { declared: 7, actual: 5 })
        ));
        assert_eq!(decode_slot(b"garbage"), Err(SlotError::Truncated { len: 7 }));
    }

    #[test]
    fn test_crc_matches_reference_vector() {
        // standard check value for CRC-32/ISO-HDLC
        assert_eq!(CRC32.checksum(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_fifo_order() {
        let mut hal = MockHal::new();
        let mut ring = PersistentRing::new(4);
        ring.push(&mut hal, b"one").unwrap();
        ring.push(&mut hal, b"two").unwrap();
        ring.push(&mut hal, b"three").unwrap();
        assert_eq!(ring.len(), 3);

        let batches = drain(&mut ring, &mut hal);
        assert_eq!(batches, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut hal = MockHal::new();
        let mut ring = PersistentRing::new(4);
        ring.push(&mut hal, b"keep").unwrap();
        assert_eq!(ring.peek_oldest(&mut hal).unwrap(), Some(b"keep".to_vec()));
        assert_eq!(ring.peek_oldest(&mut hal).unwrap(), Some(b"keep".to_vec()));
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let mut hal = MockHal::new();
        let mut ring = PersistentRing::new(DEFAULT_SLOTS);
        for i in 0..DEFAULT_SLOTS + 3 {
            ring.push(&mut hal, format!("batch-{}", i).as_bytes()).unwrap();
        }
        assert_eq!(ring.len(), DEFAULT_SLOTS);

        let batches = drain(&mut ring, &mut hal);
        let expected: Vec<Vec<u8>> = (3..DEFAULT_SLOTS + 3)
            .map(|i| format!("batch-{}", i).into_bytes())
            .collect();
        assert_eq!(batches, expected);
    }

    /// Passes the first `writes_left` storage writes through, fails the rest
    struct PowerCut<'a> {
        hal: &'a mut MockHal,
        writes_left: usize,
    }

    impl Hal for PowerCut<'_> {
        fn http_post(&mut self, request: &HttpRequest<'_>) -> Result<(), TransportError> {
            self.hal.http_post(request)
        }

        fn tick_ms(&self) -> u32 {
            self.hal.tick_ms()
        }

        fn delay_ms(&mut self, ms: u32) {
            self.hal.delay_ms(ms)
        }

        fn storage_write(&mut self, key: &str, data: &[u8]) -> Result<(), StorageError> {
            if self.writes_left == 0 {
                return Err(StorageError::WriteFailed { key: key.to_string() });
            }
            self.writes_left -= 1;
            self.hal.storage_write(key, data)
        }

        fn storage_read(&mut self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
            self.hal.storage_read(key)
        }

        fn storage_clear(&mut self, key: &str) -> Result<(), StorageError> {
            self.hal.storage_clear(key)
        }
    }

    #[test]
    fn test_interrupted_eviction_keeps_order() {
        for writes in 0..3 {
            let mut hal = MockHal::new();
            let mut ring = PersistentRing::new(2);
            ring.push(&mut hal, b"a").unwrap();
            ring.push(&mut hal, b"b").unwrap();

            let mut cut = PowerCut {
                hal: &mut hal,
                writes_left: writes,
            };
            assert!(ring.push(&mut cut, b"c").is_err());

            // reboot
            let mut ring = PersistentRing::load(&mut hal, 2);
            let batches = drain(&mut ring, &mut hal);
            assert_eq!(batches.last(), Some(&b"b".to_vec()), "cut after {} writes", writes);
            assert!(!batches.contains(&b"c".to_vec()), "cut after {} writes", writes);
        }
    }

    #[test]
    fn test_survives_reload() {
        let mut hal = MockHal::new();
        {
            let mut ring = PersistentRing::new(DEFAULT_SLOTS);
            ring.push(&mut hal, b"before-reboot").unwrap();
            ring.push(&mut hal, b"second").unwrap();
        }
        let mut ring = PersistentRing::load(&mut hal, DEFAULT_SLOTS);
        assert_eq!(ring.len(), 2);
        assert_eq!(
            drain(&mut ring, &mut hal),
            vec![b"before-reboot".to_vec(), b"second".to_vec()]
        );
    }

    #[test]
    fn test_corrupt_slot_skipped() {
        let mut hal = MockHal::new();
        let mut ring = PersistentRing::new(DEFAULT_SLOTS);
        ring.push(&mut hal, b"a").unwrap();
        ring.push(&mut hal, b"b").unwrap();
        hal.put_stored("plexus_b0", b"garbage");

        assert_eq!(ring.peek_oldest(&mut hal).unwrap(), Some(b"b".to_vec()));
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_missing_slot_skipped() {
        let mut hal = MockHal::new();
        let mut ring = PersistentRing::new(DEFAULT_SLOTS);
        ring.push(&mut hal, b"a").unwrap();
        hal.storage_clear("plexus_b0").unwrap();
        assert_eq!(ring.peek_oldest(&mut hal).unwrap(), None);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_corrupt_meta_resets() {
        let mut hal = MockHal::new();
        let mut ring = PersistentRing::new(DEFAULT_SLOTS);
        ring.push(&mut hal, b"a").unwrap();
        hal.put_stored(META_KEY, &[1, 0, 1, 8, 0, 0, 0, 0]);

        let ring = PersistentRing::load(&mut hal, DEFAULT_SLOTS);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_slot_count_change_resets() {
        let mut hal = MockHal::new();
        let mut ring = PersistentRing::new(8);
        ring.push(&mut hal, b"a").unwrap();
        assert!(PersistentRing::load(&mut hal, 4).is_empty());
        assert_eq!(PersistentRing::load(&mut hal, 8).len(), 1);
    }

    #[test]
    fn test_failed_write_leaves_ring_unchanged() {
        let mut hal = MockHal::new();
        let mut ring = PersistentRing::new(DEFAULT_SLOTS);
        hal.set_fail_storage_writes(true);
        assert!(ring.push(&mut hal, b"a").is_err());
        assert!(ring.is_empty());
    }

    #[test]
    fn test_confirm_clears_slot() {
        let mut hal = MockHal::new();
        let mut ring = PersistentRing::new(2);
        ring.push(&mut hal, b"a").unwrap();
        assert!(hal.stored("plexus_b0").is_some());
        ring.confirm_oldest(&mut hal).unwrap();
        assert!(hal.stored("plexus_b0").is_none());
        // confirming an empty ring is a no-op
        ring.confirm_oldest(&mut hal).unwrap();
    }
}
