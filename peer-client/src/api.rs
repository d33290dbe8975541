use chat_wire::{ChatMessage, PeerSummary};
use serde::{Deserialize, Serialize};

/// REST client for the relay's history/peers surface.
#[derive(Clone)]
pub struct RelayApi {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct MessagesResponse {
    messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
struct PeersResponse {
    peers: Vec<PeerSummary>,
}

#[derive(Deserialize)]
struct MessageResponse {
    message: ChatMessage,
}

/// Body of `POST /api/messages`; the relay assigns id and creation time.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage<'a> {
    pub sender_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<&'a str>,
    pub content: &'a str,
}

impl RelayApi {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub async fn fetch_messages(&self, limit: usize) -> Result<Vec<ChatMessage>, reqwest::Error> {
        let response = self
            .http
            .get(format!("{}/api/messages", self.base_url))
            .query(&[("limit", limit)])
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<MessagesResponse>().await?.messages)
    }

    pub async fn fetch_peers(&self) -> Result<Vec<PeerSummary>, reqwest::Error> {
        let response = self
            .http
            .get(format!("{}/api/peers", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<PeersResponse>().await?.peers)
    }

    /// Persist a message through the relay without delivering it.
    pub async fn post_message(&self, message: &NewMessage<'_>) -> Result<ChatMessage, reqwest::Error> {
        let response = self
            .http
            .post(format!("{}/api/messages", self.base_url))
            .json(message)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<MessageResponse>().await?.message)
    }
}
