use reqwest::Client;
use tracing::{debug, info};

use super::{TrackerRequest, TrackerResponse};
use crate::bencode::decode;
use crate::error::{DrizzleError, Result};

/// Client for communicating with BitTorrent trackers
pub struct TrackerClient {
    client: Client,
}

impl TrackerClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    /// Send an announce to a tracker and get the peer list
    pub async fn announce(
        &self,
        tracker_url: &str,
        request: &TrackerRequest,
    ) -> Result<TrackerResponse> {
        info!("Announcing to tracker: {}", tracker_url);

        // The query carries pre-encoded binary fields, so it is glued
        // on verbatim rather than built through a form encoder.
        let separator = if tracker_url.contains('?') { '&' } else { '?' };
        let url_text = format!("{}{}{}", tracker_url, separator, request.to_query_string());
        let url = reqwest::Url::parse(&url_text)?;

        debug!("Tracker request URL: {}", url);

        let response = self.client.get(url).send().await?;

        let status = response.status();
        let body = response.bytes().await?;

        debug!(
            "Tracker response status: {}, body length: {}",
            status,
            body.len()
        );

        if !status.is_success() {
            return Err(DrizzleError::TrackerError(format!("HTTP error: {}", status)));
        }

        let decoded = decode(&body)?;
        let tracker_response = TrackerResponse::from_bencode(decoded)?;

        info!(
            "Received {} peers from tracker (interval: {}s)",
            tracker_response.peers.len(),
            tracker_response.interval
        );

        Ok(tracker_response)
    }
}

impl Default for TrackerClient {
    fn default() -> Self {
        Self::new()
    }
}
