use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgrestConfig {
    /// Base URL of the backend, without the `/rest/v1` suffix
    pub base_url: String,

    /// Project key sent as the `apikey` header
    #[serde(default)]
    pub api_key: Option<String>,

    /// Bearer token for the signed-in session
    #[serde(default)]
    pub access_token: Option<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    15
}

impl PostgrestConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn rpc_url(&self, procedure: &str) -> String {
        format!(
            "{}/rest/v1/rpc/{}",
            self.base_url.trim_end_matches('/'),
            procedure
        )
    }
}
