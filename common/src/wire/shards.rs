use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use log::debug;

use crate::{
    config::MAX_DATAGRAM_SIZE,
    serializer::{Reader, ReaderError, Serializer, Writer},
};

use super::WireError;

/// message_id (4) + index (2) + total (2).
pub const SHARD_HEADER_SIZE: usize = 8;

/// Ciphertext bytes one datagram can carry.
pub const MAX_SHARD_PAYLOAD: usize = MAX_DATAGRAM_SIZE - SHARD_HEADER_SIZE;

/// One UDP datagram of a sharded message. The header is routing metadata
/// in the clear; the payload is a fragment of the AEAD ciphertext, so any
/// tampering surfaces as an authentication failure after reassembly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Shard {
    pub message_id: u32,
    pub index: u16,
    pub total: u16,
    pub payload: Vec<u8>,
}

impl Serializer for Shard {
    fn write(&self, writer: &mut Writer) {
        writer.write_u32(&self.message_id);
        writer.write_u16(self.index);
        writer.write_u16(self.total);
        // The datagram boundary delimits the payload.
        writer.write_bytes(&self.payload);
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let message_id = reader.read_u32()?;
        let index = reader.read_u16()?;
        let total = reader.read_u16()?;
        if total == 0 || index >= total {
            return Err(ReaderError::InvalidValue);
        }
        let payload = reader.read_bytes(reader.remaining())?.to_vec();
        if payload.is_empty() || payload.len() > MAX_SHARD_PAYLOAD {
            return Err(ReaderError::InvalidValue);
        }
        Ok(Self {
            message_id,
            index,
            total,
            payload,
        })
    }

    fn size(&self) -> usize {
        SHARD_HEADER_SIZE + self.payload.len()
    }
}

/// Split an encrypted blob into ready-to-send datagrams under a fresh
/// random message id.
pub fn make_shards(encrypted: &[u8]) -> Result<Vec<Vec<u8>>, WireError> {
    if encrypted.is_empty() {
        return Err(WireError::Empty);
    }
    let total = encrypted.len().div_ceil(MAX_SHARD_PAYLOAD);
    if total > u16::MAX as usize {
        return Err(WireError::TooManyShards(u16::MAX as usize));
    }

    let message_id: u32 = rand::random();
    let shards = encrypted
        .chunks(MAX_SHARD_PAYLOAD)
        .enumerate()
        .map(|(index, chunk)| {
            Shard {
                message_id,
                index: index as u16,
                total: total as u16,
                payload: chunk.to_vec(),
            }
            .to_bytes()
        })
        .collect();
    Ok(shards)
}

struct Pending {
    fragments: Vec<Option<Vec<u8>>>,
    received: usize,
    last_update: Instant,
}

/// Reassembles sharded messages per (source, message id). A reassembly
/// untouched for the TTL is discarded on the next insert.
pub struct Reassembler {
    pending: HashMap<(SocketAddr, u32), Pending>,
    ttl: Duration,
}

impl Reassembler {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            ttl,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Feed one datagram; returns the reassembled ciphertext once the last
    /// fragment of a message arrives. Malformed datagrams are dropped.
    pub fn insert(&mut self, src: SocketAddr, datagram: &[u8]) -> Option<Vec<u8>> {
        let now = Instant::now();
        self.pending
            .retain(|_, p| now.duration_since(p.last_update) < self.ttl);

        let shard = match Shard::from_bytes(datagram) {
            Ok(shard) => shard,
            Err(e) => {
                debug!("dropping malformed shard from {}: {}", src, e);
                return None;
            }
        };

        let key = (src, shard.message_id);
        let total = shard.total as usize;
        let entry = self.pending.entry(key).or_insert_with(|| Pending {
            fragments: vec![None; total],
            received: 0,
            last_update: now,
        });

        if entry.fragments.len() != total {
            // Same id reused with a different shape; start over.
            *entry = Pending {
                fragments: vec![None; total],
                received: 0,
                last_update: now,
            };
        }

        let index = shard.index as usize;
        if entry.fragments[index].is_none() {
            entry.fragments[index] = Some(shard.payload);
            entry.received += 1;
        }
        entry.last_update = now;

        if entry.received == total {
            let entry = self.pending.remove(&key)?;
            let mut blob = Vec::new();
            for fragment in entry.fragments {
                blob.extend_from_slice(&fragment?);
            }
            return Some(blob);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    #[test]
    fn test_single_shard_round_trip() {
        let blob = vec![0xABu8; 100];
        let shards = make_shards(&blob).unwrap();
        assert_eq!(shards.len(), 1);

        let mut reassembler = Reassembler::new(Duration::from_secs(3));
        assert_eq!(reassembler.insert(addr(1), &shards[0]), Some(blob));
    }

    #[test]
    fn test_multi_shard_out_of_order() {
        let blob: Vec<u8> = (0..MAX_SHARD_PAYLOAD * 2 + 17).map(|i| i as u8).collect();
        let shards = make_shards(&blob).unwrap();
        assert_eq!(shards.len(), 3);

        let mut reassembler = Reassembler::new(Duration::from_secs(3));
        assert_eq!(reassembler.insert(addr(1), &shards[2]), None);
        assert_eq!(reassembler.insert(addr(1), &shards[0]), None);
        assert_eq!(reassembler.insert(addr(1), &shards[1]), Some(blob));
        assert_eq!(reassembler.pending_count(), 0);
    }

    #[test]
    fn test_duplicate_fragment_ignored() {
        let blob: Vec<u8> = (0..MAX_SHARD_PAYLOAD + 1).map(|i| i as u8).collect();
        let shards = make_shards(&blob).unwrap();
        assert_eq!(shards.len(), 2);

        let mut reassembler = Reassembler::new(Duration::from_secs(3));
        assert_eq!(reassembler.insert(addr(1), &shards[0]), None);
        assert_eq!(reassembler.insert(addr(1), &shards[0]), None);
        assert_eq!(reassembler.insert(addr(1), &shards[1]), Some(blob));
    }

    #[test]
    fn test_sources_do_not_mix() {
        let blob: Vec<u8> = (0..MAX_SHARD_PAYLOAD + 1).map(|i| i as u8).collect();
        let shards = make_shards(&blob).unwrap();

        let mut reassembler = Reassembler::new(Duration::from_secs(3));
        assert_eq!(reassembler.insert(addr(1), &shards[0]), None);
        // Same message id from another source is a separate reassembly.
        assert_eq!(reassembler.insert(addr(2), &shards[1]), None);
        assert_eq!(reassembler.pending_count(), 2);
    }

    #[test]
    fn test_expired_reassembly_discarded() {
        let blob: Vec<u8> = (0..MAX_SHARD_PAYLOAD + 1).map(|i| i as u8).collect();
        let shards = make_shards(&blob).unwrap();

        let mut reassembler = Reassembler::new(Duration::from_millis(0));
        assert_eq!(reassembler.insert(addr(1), &shards[0]), None);
        // TTL zero: the pending entry dies before the second fragment.
        assert_eq!(reassembler.insert(addr(1), &shards[1]), None);
    }

    #[test]
    fn test_malformed_datagram_dropped() {
        let mut reassembler = Reassembler::new(Duration::from_secs(3));
        assert_eq!(reassembler.insert(addr(1), &[1, 2, 3]), None);
    }

    #[test]
    fn test_shards_fit_datagram_limit() {
        let blob = vec![7u8; MAX_DATAGRAM_SIZE * 3];
        for shard in make_shards(&blob).unwrap() {
            assert!(shard.len() <= MAX_DATAGRAM_SIZE);
        }
    }
}
