use std::net::IpAddr;

use crate::{serializer::ReaderError, wire::Container};

use super::IpsField;

/// Listener endpoints of a node: carried whole in `advt` messages and as
/// the payload of `paus`, and embedded as the head of every job.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeAnnouncement {
    pub ips: Vec<IpAddr>,
    pub p2p_port: u16,
    pub rpc_port: u16,
    pub controller_port: u16,
}

impl NodeAnnouncement {
    pub fn to_container(&self) -> Container {
        let mut container = Container::new();
        self.write_fields(&mut container);
        container
    }

    /// The first four fields of jobs, pauses and advertisements are the
    /// same; jobs append their work fields after these.
    pub(crate) fn write_fields(&self, container: &mut Container) {
        container.push(&IpsField(self.ips.clone()));
        container.push(&self.p2p_port);
        container.push(&self.rpc_port);
        container.push(&self.controller_port);
    }

    pub fn from_container(container: &Container) -> Result<Self, ReaderError> {
        Ok(Self {
            ips: container.get::<IpsField>(0)?.0,
            p2p_port: container.get(1)?,
            rpc_port: container.get(2)?,
            controller_port: container.get(3)?,
        })
    }

    /// Peer endpoints as host:port pairs against the p2p port.
    pub fn p2p_listeners(&self) -> Vec<String> {
        self.ips
            .iter()
            .map(|ip| format!("{}:{}", ip, self.p2p_port))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::Serializer;

    fn announcement() -> NodeAnnouncement {
        NodeAnnouncement {
            ips: vec!["10.0.0.3".parse().unwrap()],
            p2p_port: 11047,
            rpc_port: 11048,
            controller_port: 11049,
        }
    }

    #[test]
    fn test_container_round_trip() {
        let original = announcement();
        let container = original.to_container();
        let bytes = container.to_bytes();
        let decoded = Container::from_bytes(&bytes).unwrap();
        assert_eq!(NodeAnnouncement::from_container(&decoded).unwrap(), original);
    }

    #[test]
    fn test_p2p_listeners() {
        assert_eq!(announcement().p2p_listeners(), vec!["10.0.0.3:11047"]);
    }
}
