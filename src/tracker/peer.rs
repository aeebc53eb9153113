use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// A swarm member as reported by the tracker
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackerPeer {
    pub addr: SocketAddr,
    /// Only dict-form responses carry peer ids; compact lists do not
    pub peer_id: Option<Vec<u8>>,
}

impl TrackerPeer {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self {
            addr: SocketAddr::new(ip, port),
            peer_id: None,
        }
    }

    pub fn with_peer_id(ip: IpAddr, port: u16, peer_id: Vec<u8>) -> Self {
        Self {
            addr: SocketAddr::new(ip, port),
            peer_id: Some(peer_id),
        }
    }

    /// The 20-byte peer id, when the tracker supplied a well-formed one
    pub fn peer_id_bytes(&self) -> Option<[u8; 20]> {
        let id = self.peer_id.as_ref()?;
        if id.len() != 20 {
            return None;
        }
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(id);
        Some(bytes)
    }

    /// Parse a peer from compact format (6 bytes: 4 IP + 2 port)
    pub fn from_compact(data: &[u8]) -> Option<Self> {
        if data.len() != 6 {
            return None;
        }

        let ip = Ipv4Addr::new(data[0], data[1], data[2], data[3]);
        let port = u16::from_be_bytes([data[4], data[5]]);

        Some(Self::new(IpAddr::V4(ip), port))
    }

    /// Parse multiple peers from compact format
    pub fn from_compact_list(data: &[u8]) -> Vec<Self> {
        data.chunks_exact(6).filter_map(Self::from_compact).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_parse() {
        let peer = TrackerPeer::from_compact(&[127, 0, 0, 1, 0x1a, 0xe1]).unwrap();
        assert_eq!(peer.addr, "127.0.0.1:6881".parse().unwrap());
        assert!(peer.peer_id.is_none());
    }

    #[test]
    fn test_compact_list_drops_ragged_tail() {
        let data = [10, 0, 0, 1, 0x1a, 0xe1, 10, 0, 0, 2, 0x1a, 0xe2, 99];
        let peers = TrackerPeer::from_compact_list(&data);
        assert_eq!(peers.len(), 2);
    }

    #[test]
    fn test_peer_id_bytes_requires_20() {
        let peer = TrackerPeer::with_peer_id("10.0.0.1".parse().unwrap(), 6881, vec![1, 2, 3]);
        assert!(peer.peer_id_bytes().is_none());

        let peer =
            TrackerPeer::with_peer_id("10.0.0.1".parse().unwrap(), 6881, vec![7u8; 20]);
        assert_eq!(peer.peer_id_bytes(), Some([7u8; 20]));
    }
}
