use indexmap::IndexMap;

use crate::{
    crypto::{hash, Hash},
    fork::TargetBits,
    serializer::{Reader, ReaderError, Serializer, Writer},
    wire::Container,
};

use super::NodeAnnouncement;

const MAX_ALGOS: usize = 32;

/// The unit of work a controller broadcasts: everything a worker needs to
/// mine the next block under any of the current algorithms.
///
/// Invariant: `bitses` and `merkles` are keyed by exactly the same
/// algorithm versions; decoding enforces it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Job {
    pub announcement: NodeAnnouncement,
    pub height: i32,
    pub prev_block: Hash,
    pub bitses: TargetBits,
    pub merkles: IndexMap<i32, Hash>,
}

impl Job {
    pub fn controller_port(&self) -> u16 {
        self.announcement.controller_port
    }

    /// Algorithm versions this job covers, in map order.
    pub fn algos(&self) -> Vec<i32> {
        self.bitses.keys().copied().collect()
    }

    /// Digest of the whole merkle mapping: the worker's deduplication key.
    /// Two jobs with equal mappings are the same work regardless of which
    /// controller rebroadcast them.
    pub fn merkle_digest(&self) -> Hash {
        let mut writer = Writer::with_capacity(self.merkles.len() * 36);
        let mut versions: Vec<i32> = self.merkles.keys().copied().collect();
        versions.sort_unstable();
        for version in versions {
            writer.write_i32(&version);
            self.merkles[&version].write(&mut writer);
        }
        hash(&writer.into_bytes())
    }

    pub fn to_container(&self) -> Container {
        let mut container = Container::new();
        self.announcement.write_fields(&mut container);
        container.push(&self.height);
        container.push(&self.prev_block);
        container.push(&BitsesField(self.bitses.clone()));
        container.push(&MerklesField(self.merkles.clone()));
        container
    }

    pub fn from_container(container: &Container) -> Result<Self, ReaderError> {
        let announcement = NodeAnnouncement::from_container(container)?;
        let height = container.get(4)?;
        let prev_block = container.get(5)?;
        let bitses = container.get::<BitsesField>(6)?.0;
        let merkles = container.get::<MerklesField>(7)?.0;

        // Every difficulty entry needs its merkle root and vice versa.
        if bitses.len() != merkles.len() || bitses.keys().any(|v| !merkles.contains_key(v)) {
            return Err(ReaderError::InvalidValue);
        }

        Ok(Self {
            announcement,
            height,
            prev_block,
            bitses,
            merkles,
        })
    }
}

/// Difficulty map field: count byte, then (version, bits) pairs.
struct BitsesField(TargetBits);

impl Serializer for BitsesField {
    fn write(&self, writer: &mut Writer) {
        writer.write_u8(self.0.len() as u8);
        for (version, bits) in &self.0 {
            writer.write_i32(version);
            writer.write_u32(bits);
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let count = reader.read_u8()? as usize;
        if count > MAX_ALGOS {
            return Err(ReaderError::InvalidValue);
        }
        let mut map = TargetBits::with_capacity(count);
        for _ in 0..count {
            let version = reader.read_i32()?;
            let bits = reader.read_u32()?;
            if map.insert(version, bits).is_some() {
                return Err(ReaderError::InvalidValue);
            }
        }
        Ok(Self(map))
    }

    fn size(&self) -> usize {
        1 + self.0.len() * 8
    }
}

/// Merkle map field: count byte, then (version, root) pairs.
struct MerklesField(IndexMap<i32, Hash>);

impl Serializer for MerklesField {
    fn write(&self, writer: &mut Writer) {
        writer.write_u8(self.0.len() as u8);
        for (version, root) in &self.0 {
            writer.write_i32(version);
            root.write(writer);
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let count = reader.read_u8()? as usize;
        if count > MAX_ALGOS {
            return Err(ReaderError::InvalidValue);
        }
        let mut map = IndexMap::with_capacity(count);
        for _ in 0..count {
            let version = reader.read_i32()?;
            let root = Hash::read(reader)?;
            if map.insert(version, root).is_some() {
                return Err(ReaderError::InvalidValue);
            }
        }
        Ok(Self(map))
    }

    fn size(&self) -> usize {
        1 + self.0.len() * 36
    }
}

#[cfg(test)]
pub(crate) fn sample_job(ips: Vec<std::net::IpAddr>) -> Job {
    let mut bitses = TargetBits::new();
    bitses.insert(2, 0x1d00ffff);
    bitses.insert(514, 0x1c00ffff);
    let mut merkles = IndexMap::new();
    merkles.insert(2, hash(b"merkle-2"));
    merkles.insert(514, hash(b"merkle-514"));

    Job {
        announcement: NodeAnnouncement {
            ips,
            p2p_port: 11047,
            rpc_port: 11048,
            controller_port: 11050,
        },
        height: 1000,
        prev_block: hash(b"tip"),
        bitses,
        merkles,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_round_trip() {
        let job = sample_job(vec!["10.1.2.3".parse().unwrap()]);
        let bytes = job.to_container().to_bytes();
        let decoded = Job::from_container(&Container::from_bytes(&bytes).unwrap()).unwrap();
        assert_eq!(decoded, job);
    }

    #[test]
    fn test_mismatched_maps_rejected() {
        let mut job = sample_job(vec![]);
        job.merkles.shift_remove(&514);
        let bytes = job.to_container().to_bytes();
        assert!(Job::from_container(&Container::from_bytes(&bytes).unwrap()).is_err());
    }

    #[test]
    fn test_merkle_digest_is_order_independent() {
        let job = sample_job(vec![]);
        let mut reordered = job.clone();
        reordered.merkles.move_index(0, 1);
        assert_eq!(job.merkle_digest(), reordered.merkle_digest());
    }

    #[test]
    fn test_merkle_digest_tracks_content() {
        let job = sample_job(vec![]);
        let mut changed = job.clone();
        changed.merkles.insert(2, hash(b"other root"));
        assert_ne!(job.merkle_digest(), changed.merkle_digest());
    }

    #[test]
    fn test_algos_follow_bitses() {
        let job = sample_job(vec![]);
        assert_eq!(job.algos(), vec![2, 514]);
    }
}
