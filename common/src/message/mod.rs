//! Typed views over wire containers: the five bus message kinds.

mod announcement;
mod hashrate;
mod job;
mod solution;

pub use announcement::NodeAnnouncement;
pub use hashrate::HashrateReport;
pub use job::Job;
pub use solution::Solution;

use std::net::IpAddr;

use crate::{
    serializer::{Reader, ReaderError, Serializer, Writer},
    wire::{Container, WireError},
};

pub type Magic = [u8; 4];

pub const JOB_MAGIC: Magic = *b"work";
pub const PAUSE_MAGIC: Magic = *b"paus";
pub const ADVERTISEMENT_MAGIC: Magic = *b"advt";
pub const SOLUTION_MAGIC: Magic = *b"solv";
pub const HASHRATE_MAGIC: Magic = *b"rate";

const MAX_IPS: usize = 64;

/// A decoded bus message, dispatched on its magic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BusEnvelope {
    Job(Job),
    Pause(NodeAnnouncement),
    Advertisement(NodeAnnouncement),
    Solution(Solution),
    Hashrate(HashrateReport),
}

impl BusEnvelope {
    pub fn magic(&self) -> Magic {
        match self {
            BusEnvelope::Job(_) => JOB_MAGIC,
            BusEnvelope::Pause(_) => PAUSE_MAGIC,
            BusEnvelope::Advertisement(_) => ADVERTISEMENT_MAGIC,
            BusEnvelope::Solution(_) => SOLUTION_MAGIC,
            BusEnvelope::Hashrate(_) => HASHRATE_MAGIC,
        }
    }

    fn container(&self) -> Container {
        match self {
            BusEnvelope::Job(m) => m.to_container(),
            BusEnvelope::Pause(m) => m.to_container(),
            BusEnvelope::Advertisement(m) => m.to_container(),
            BusEnvelope::Solution(m) => m.to_container(),
            BusEnvelope::Hashrate(m) => m.to_container(),
        }
    }

    /// Plaintext form: magic followed by the serialized container.
    pub fn encode(&self) -> Vec<u8> {
        let container = self.container();
        let mut bytes = Vec::with_capacity(4 + container.size());
        bytes.extend_from_slice(&self.magic());
        bytes.extend_from_slice(&container.to_bytes());
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < 4 {
            return Err(WireError::Serialization(ReaderError::InvalidSize));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[..4]);
        let container = Container::from_bytes(&bytes[4..])?;

        let envelope = match magic {
            JOB_MAGIC => BusEnvelope::Job(Job::from_container(&container)?),
            PAUSE_MAGIC => BusEnvelope::Pause(NodeAnnouncement::from_container(&container)?),
            ADVERTISEMENT_MAGIC => {
                BusEnvelope::Advertisement(NodeAnnouncement::from_container(&container)?)
            }
            SOLUTION_MAGIC => BusEnvelope::Solution(Solution::from_container(&container)?),
            HASHRATE_MAGIC => BusEnvelope::Hashrate(HashrateReport::from_container(&container)?),
            other => return Err(WireError::UnknownMagic(other)),
        };
        Ok(envelope)
    }
}

/// IP list field: count byte, then per address a version byte (4 or 6)
/// followed by the octets.
pub(crate) struct IpsField(pub Vec<IpAddr>);

impl Serializer for IpsField {
    fn write(&self, writer: &mut Writer) {
        writer.write_u8(self.0.len() as u8);
        for ip in &self.0 {
            match ip {
                IpAddr::V4(v4) => {
                    writer.write_u8(4);
                    writer.write_bytes(&v4.octets());
                }
                IpAddr::V6(v6) => {
                    writer.write_u8(6);
                    writer.write_bytes(&v6.octets());
                }
            }
        }
    }

    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let count = reader.read_u8()? as usize;
        if count > MAX_IPS {
            return Err(ReaderError::InvalidValue);
        }
        let mut ips = Vec::with_capacity(count);
        for _ in 0..count {
            let version = reader.read_u8()?;
            let ip = match version {
                4 => {
                    let bytes = reader.read_bytes(4)?;
                    let mut octets = [0u8; 4];
                    octets.copy_from_slice(bytes);
                    IpAddr::from(octets)
                }
                6 => {
                    let bytes = reader.read_bytes(16)?;
                    let mut octets = [0u8; 16];
                    octets.copy_from_slice(bytes);
                    IpAddr::from(octets)
                }
                _ => return Err(ReaderError::InvalidValue),
            };
            ips.push(ip);
        }
        Ok(Self(ips))
    }

    fn size(&self) -> usize {
        1 + self
            .0
            .iter()
            .map(|ip| 1 + if ip.is_ipv4() { 4 } else { 16 })
            .sum::<usize>()
    }
}
