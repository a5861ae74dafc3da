use crate::{serializer::ReaderError, wire::Container};

/// Periodic worker report: `count` hash attempts since the last report.
/// `nonce_marker` is the worker's counter position and is monotonic per
/// worker; the controller drops a repeated marker as a rebroadcast
/// duplicate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HashrateReport {
    pub count: i32,
    pub nonce_marker: i32,
    pub height: i32,
}

impl HashrateReport {
    pub fn new(count: i32, nonce_marker: i32, height: i32) -> Self {
        Self {
            count,
            nonce_marker,
            height,
        }
    }

    pub fn to_container(&self) -> Container {
        let mut container = Container::new();
        container.push(&self.count);
        container.push(&self.nonce_marker);
        container.push(&self.height);
        container
    }

    pub fn from_container(container: &Container) -> Result<Self, ReaderError> {
        Ok(Self {
            count: container.get(0)?,
            nonce_marker: container.get(1)?,
            height: container.get(2)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::Serializer;

    #[test]
    fn test_hashrate_round_trip() {
        let report = HashrateReport::new(69, 12345, 100000);
        let bytes = report.to_container().to_bytes();
        let decoded =
            HashrateReport::from_container(&Container::from_bytes(&bytes).unwrap()).unwrap();
        assert_eq!(decoded, report);
    }
}
