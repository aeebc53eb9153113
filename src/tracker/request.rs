/// Events sent to the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    Started,
    Stopped,
    Completed,
}

impl TrackerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerEvent::Started => "started",
            TrackerEvent::Stopped => "stopped",
            TrackerEvent::Completed => "completed",
        }
    }
}

/// Request parameters for a tracker announce
#[derive(Debug, Clone)]
pub struct TrackerRequest {
    /// SHA1 hash of the info dictionary
    pub info_hash: [u8; 20],
    /// Our peer ID
    pub peer_id: [u8; 20],
    /// Port this peer is listening on
    pub port: u16,
    /// Total amount uploaded
    pub uploaded: u64,
    /// Total amount downloaded
    pub downloaded: u64,
    /// Number of bytes left to download
    pub left: u64,
    /// Event (optional)
    pub event: Option<TrackerEvent>,
    /// Request compact peer list format
    pub compact: bool,
}

impl TrackerRequest {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20], port: u16, left: u64) -> Self {
        Self {
            info_hash,
            peer_id,
            port,
            uploaded: 0,
            downloaded: 0,
            left,
            event: Some(TrackerEvent::Started),
            compact: true,
        }
    }

    /// Build the announce query string. info_hash and peer_id are raw
    /// bytes and must be percent-encoded by hand; reqwest's form
    /// encoding would mangle them.
    pub fn to_query_string(&self) -> String {
        let mut query = format!(
            "info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact={}",
            percent_encode(&self.info_hash),
            percent_encode(&self.peer_id),
            self.port,
            self.uploaded,
            self.downloaded,
            self.left,
            if self.compact { 1 } else { 0 },
        );

        if let Some(event) = &self.event {
            query.push_str("&event=");
            query.push_str(event.as_str());
        }

        query
    }
}

/// Percent-encode every byte of a binary field
fn percent_encode(bytes: &[u8; 20]) -> String {
    bytes.iter().map(|b| format!("%{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_string() {
        let request = TrackerRequest::new([0xab; 20], [0x2d; 20], 6881, 1000);
        let query = request.to_query_string();

        assert!(query.contains(&format!("info_hash={}", "%ab".repeat(20))));
        assert!(query.contains("port=6881"));
        assert!(query.contains("left=1000"));
        assert!(query.contains("compact=1"));
        assert!(query.ends_with("event=started"));
    }
}
