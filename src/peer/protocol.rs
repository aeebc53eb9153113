use crate::error::ProtocolError;

pub const PROTOCOL_STRING: &[u8] = b"BitTorrent protocol";

/// Handshake length: 1 + 19 + 8 + 20 + 20
pub const HANDSHAKE_LEN: usize = 68;

/// Handshake message for the peer wire protocol
/// Format: <pstrlen><pstr><reserved><info_hash><peer_id>
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self { info_hash, peer_id }
    }

    /// Serialize handshake to its fixed 68-byte form. Unlike every other
    /// wire message, a handshake carries no length prefix.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HANDSHAKE_LEN);

        buf.push(PROTOCOL_STRING.len() as u8);
        buf.extend_from_slice(PROTOCOL_STRING);

        // Reserved bytes (8 bytes, all zeros)
        buf.extend_from_slice(&[0u8; 8]);

        buf.extend_from_slice(&self.info_hash);
        buf.extend_from_slice(&self.peer_id);

        buf
    }

    /// Deserialize a handshake from the front of `data`. Returns the
    /// handshake and any trailing bytes, which belong to the framed
    /// message stream: a peer may pipeline its first messages in the
    /// same TCP segment as the handshake.
    pub fn decode(data: &[u8]) -> Result<(Self, &[u8]), ProtocolError> {
        if data.len() < HANDSHAKE_LEN {
            return Err(ProtocolError::BadHandshake(format!(
                "Handshake too short: {} bytes",
                data.len()
            )));
        }

        if !is_handshake(data) {
            return Err(ProtocolError::BadHandshake(
                "Invalid protocol string".to_string(),
            ));
        }

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&data[28..48]);

        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[48..68]);

        Ok((Handshake { info_hash, peer_id }, &data[HANDSHAKE_LEN..]))
    }
}

/// True iff the buffer starts with `\x13BitTorrent protocol`.
pub fn is_handshake(data: &[u8]) -> bool {
    let prefix_len = 1 + PROTOCOL_STRING.len();
    data.len() >= prefix_len
        && data[0] as usize == PROTOCOL_STRING.len()
        && &data[1..prefix_len] == PROTOCOL_STRING
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_serialization() {
        let info_hash = [1u8; 20];
        let peer_id = [2u8; 20];

        let handshake = Handshake::new(info_hash, peer_id);
        let bytes = handshake.encode();

        assert_eq!(bytes.len(), 68);
        assert_eq!(bytes[0], 19); // pstrlen
        assert_eq!(&bytes[1..20], PROTOCOL_STRING);

        let (decoded, extra) = Handshake::decode(&bytes).unwrap();
        assert_eq!(decoded, handshake);
        assert!(extra.is_empty());
    }

    #[test]
    fn test_handshake_with_pipelined_tail() {
        let mut bytes = Handshake::new([3u8; 20], [4u8; 20]).encode();
        // An Unchoke frame immediately after the handshake
        bytes.extend_from_slice(&[0, 0, 0, 1, 1]);

        let (decoded, extra) = Handshake::decode(&bytes).unwrap();
        assert_eq!(decoded.info_hash, [3u8; 20]);
        assert_eq!(extra, &[0, 0, 0, 1, 1]);
    }

    #[test]
    fn test_is_handshake() {
        let bytes = Handshake::new([0u8; 20], [0u8; 20]).encode();
        assert!(is_handshake(&bytes));
        assert!(!is_handshake(&[0, 0, 0, 1, 1]));
        assert!(!is_handshake(b"\x12BitTorrent protocol"));
    }

    #[test]
    fn test_handshake_too_short() {
        let bytes = Handshake::new([0u8; 20], [0u8; 20]).encode();
        assert!(Handshake::decode(&bytes[..67]).is_err());
    }
}
