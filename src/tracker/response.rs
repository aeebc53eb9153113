use std::net::IpAddr;

use super::TrackerPeer;
use crate::bencode::BencodeValue;
use crate::error::{DrizzleError, Result};

/// Response from a tracker announce
#[derive(Debug, Clone)]
pub struct TrackerResponse {
    /// Seconds to wait before the next announce
    pub interval: u64,
    /// Minimum announce interval (optional)
    pub min_interval: Option<u64>,
    /// Number of seeders (optional)
    pub complete: Option<u64>,
    /// Number of leechers (optional)
    pub incomplete: Option<u64>,
    /// List of peers
    pub peers: Vec<TrackerPeer>,
}

impl TrackerResponse {
    pub fn from_bencode(value: BencodeValue) -> Result<Self> {
        let dict = value
            .as_dict()
            .ok_or_else(|| DrizzleError::TrackerError("Response must be a dict".to_string()))?;

        if let Some(failure) = dict.get(b"failure reason".as_ref()) {
            let reason = failure.as_str().unwrap_or("Unknown failure").to_string();
            return Err(DrizzleError::TrackerError(reason));
        }

        let interval = dict
            .get(b"interval".as_ref())
            .and_then(|v| v.as_integer())
            .ok_or_else(|| DrizzleError::TrackerError("Missing 'interval' field".to_string()))?
            as u64;

        let min_interval = dict
            .get(b"min interval".as_ref())
            .and_then(|v| v.as_integer())
            .map(|i| i as u64);

        let complete = dict
            .get(b"complete".as_ref())
            .and_then(|v| v.as_integer())
            .map(|i| i as u64);

        let incomplete = dict
            .get(b"incomplete".as_ref())
            .and_then(|v| v.as_integer())
            .map(|i| i as u64);

        let peers_value = dict
            .get(b"peers".as_ref())
            .ok_or_else(|| DrizzleError::TrackerError("Missing 'peers' field".to_string()))?;

        // Compact format is a binary string; the alternative is a list
        // of dicts carrying ip/port/peer id.
        let peers = if let Some(compact_peers) = peers_value.as_bytes() {
            TrackerPeer::from_compact_list(compact_peers)
        } else if let Some(peer_list) = peers_value.as_list() {
            parse_peer_list(peer_list)?
        } else {
            return Err(DrizzleError::TrackerError(
                "Invalid 'peers' format".to_string(),
            ));
        };

        Ok(TrackerResponse {
            interval,
            min_interval,
            complete,
            incomplete,
            peers,
        })
    }
}

fn parse_peer_list(list: &[BencodeValue]) -> Result<Vec<TrackerPeer>> {
    let mut peers = Vec::new();

    for peer_value in list {
        let peer_dict = peer_value
            .as_dict()
            .ok_or_else(|| DrizzleError::TrackerError("Peer must be a dict".to_string()))?;

        let ip_str = peer_dict
            .get(b"ip".as_ref())
            .and_then(|v| v.as_str())
            .ok_or_else(|| DrizzleError::TrackerError("Missing peer 'ip'".to_string()))?;

        let ip: IpAddr = ip_str
            .parse()
            .map_err(|_| DrizzleError::TrackerError("Invalid peer IP address".to_string()))?;

        let port = peer_dict
            .get(b"port".as_ref())
            .and_then(|v| v.as_integer())
            .ok_or_else(|| DrizzleError::TrackerError("Missing peer 'port'".to_string()))?
            as u16;

        let peer_id = peer_dict
            .get(b"peer id".as_ref())
            .and_then(|v| v.as_bytes())
            .map(|b| b.to_vec());

        let peer = match peer_id {
            Some(id) => TrackerPeer::with_peer_id(ip, port, id),
            None => TrackerPeer::new(ip, port),
        };

        peers.push(peer);
    }

    Ok(peers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::decode;

    #[test]
    fn test_compact_response() {
        let mut raw = b"d8:completei13e10:incompletei2e8:intervali1800e12:min intervali1800e5:peers12:".to_vec();
        raw.extend_from_slice(&[10, 0, 0, 1, 0x1a, 0xe1, 10, 0, 0, 2, 0x1a, 0xe2]);
        raw.push(b'e');

        let response = TrackerResponse::from_bencode(decode(&raw).unwrap()).unwrap();
        assert_eq!(response.interval, 1800);
        assert_eq!(response.min_interval, Some(1800));
        assert_eq!(response.complete, Some(13));
        assert_eq!(response.incomplete, Some(2));
        assert_eq!(response.peers.len(), 2);
        assert_eq!(response.peers[0].addr, "10.0.0.1:6881".parse().unwrap());
    }

    #[test]
    fn test_dict_form_peers() {
        let raw =
            b"d8:intervali900e5:peersld2:ip8:10.0.0.37:peer id20:-XX0001-abcdefghijkl4:porti6881eeee";
        let response = TrackerResponse::from_bencode(decode(raw).unwrap()).unwrap();
        assert_eq!(response.peers.len(), 1);
        assert_eq!(
            response.peers[0].peer_id.as_deref(),
            Some(b"-XX0001-abcdefghijkl".as_ref())
        );
    }

    #[test]
    fn test_failure_reason() {
        let raw = b"d14:failure reason12:unregisterede";
        let err = TrackerResponse::from_bencode(decode(raw).unwrap()).unwrap_err();
        assert!(matches!(err, DrizzleError::TrackerError(reason) if reason == "unregistered"));
    }
}
