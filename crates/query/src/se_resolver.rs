use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use storage_domain::SeId;
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Deserialize)]
struct InfoResponse {
    se_id: String,
}

/// Maps a storage element's id to the base URL Query should proxy byte
/// reads to. Query has no adaptive capacity view of its own — unlike
/// [`ingester::capacity_monitor::CapacityMonitor`] it never picks a target,
/// only resolves one an event already named — so this just learns identity
/// via each configured SE's `GET /api/v1/info`.
pub struct SeResolver {
    client: reqwest::Client,
    auth_token: String,
    storage_elements: Vec<String>,
    base_urls: RwLock<HashMap<SeId, String>>,
}

impl SeResolver {
    pub fn new(storage_elements: Vec<String>, auth_token: String) -> Self {
        SeResolver {
            client: reqwest::Client::builder().timeout(Duration::from_secs(10)).build().expect("reqwest client builds"),
            auth_token,
            storage_elements,
            base_urls: RwLock::new(HashMap::new()),
        }
    }

    pub async fn sync_once(&self) {
        for base_url in &self.storage_elements {
            let url = format!("{}/api/v1/info", base_url.trim_end_matches('/'));
            let result = self.client.get(&url).bearer_auth(&self.auth_token).send().await;
            match result {
                Ok(resp) => match resp.json::<InfoResponse>().await {
                    Ok(info) => {
                        self.base_urls.write().await.insert(SeId::new(info.se_id), base_url.clone());
                    }
                    Err(e) => warn!(se = base_url, error = %e, "malformed info response during se identity sync"),
                },
                Err(e) => warn!(se = base_url, error = %e, "could not reach storage element for identity sync"),
            }
        }
    }

    pub async fn resolve(&self, se_id: &SeId) -> Option<String> {
        self.base_urls.read().await.get(se_id).cloned()
    }
}

pub async fn run_loop(resolver: std::sync::Arc<SeResolver>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        resolver.sync_once().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn sync_once_learns_se_id_to_base_url_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "se_id": "se-1", "mode": "RW", "priority": 1
            })))
            .mount(&server)
            .await;

        let resolver = SeResolver::new(vec![server.uri()], "secret".into());
        resolver.sync_once().await;
        assert_eq!(resolver.resolve(&SeId::new("se-1")).await, Some(server.uri()));
        assert_eq!(resolver.resolve(&SeId::new("se-unknown")).await, None);
    }
}
