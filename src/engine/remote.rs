//! Client for the hosted compute service

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::encode::{encode, encode_clipped};
use super::{Engine, ExportTask};
use crate::graph::{Expr, Handle};
use crate::types::{RendviError, RendviResult};

/// Environment variable consulted when no access token is configured
pub const TOKEN_ENV: &str = "EE_ACCESS_TOKEN";

/// Connection settings for [`RemoteEngine`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub base_url: String,
    /// Cloud project the requests are billed to
    pub project: String,
    /// OAuth bearer token; falls back to `EE_ACCESS_TOKEN`
    pub access_token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "https://earthengine.googleapis.com".to_string(),
            project: "earthengine-legacy".to_string(),
            access_token: None,
            timeout_secs: 300,
        }
    }
}

/// Engine submitting encoded graphs over HTTP
///
/// Every `compute` is one blocking round trip. Failures are reported as they
/// come back; nothing is retried.
pub struct RemoteEngine {
    config: EngineConfig,
    token: Option<String>,
    client: reqwest::blocking::Client,
}

impl RemoteEngine {
    pub fn new(config: EngineConfig) -> RendviResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("rendvi/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let token = config.access_token.clone().or_else(|| std::env::var(TOKEN_ENV).ok());
        if token.is_none() {
            log::warn!("No access token configured; requests will be sent unauthenticated");
        }
        Ok(Self { config, token, client })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn url(&self, method: &str) -> String {
        format!("{}/v1/projects/{}/{}", self.config.base_url.trim_end_matches('/'), self.config.project, method)
    }

    fn post(&self, method: &str, body: &Value) -> RendviResult<Value> {
        let url = self.url(method);
        log::debug!("POST {}", url);
        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(RendviError::Service { status: status.as_u16(), message });
        }
        Ok(response.json()?)
    }

    /// Full asset name; ids already rooted at `projects/` are used as given
    fn asset_name(&self, asset_id: &str) -> String {
        if asset_id.starts_with("projects/") {
            asset_id.to_string()
        } else {
            format!("projects/{}/assets/{}", self.config.project, asset_id.trim_start_matches('/'))
        }
    }

    /// Export request body: the image clipped to the region at the output scale
    pub(crate) fn export_request(&self, task: &ExportTask) -> Value {
        let overrides: serde_json::Map<String, Value> = task
            .pyramiding
            .iter()
            .filter(|(band, _)| band.as_str() != ".default")
            .map(|(band, policy)| (band.clone(), Value::String(policy.as_api_str().to_string())))
            .collect();
        let default_policy = task.pyramiding.get(".default").map(|p| p.as_api_str()).unwrap_or("MEAN");
        json!({
            "expression": encode_clipped(task.image.expr(), &task.region, task.scale),
            "description": task.description,
            "assetExportOptions": {
                "earthEngineDestination": {
                    "name": self.asset_name(&task.asset_id),
                },
                "pyramidingPolicy": default_policy,
                "pyramidingPolicyOverrides": overrides,
            },
            "grid": { "crsCode": task.crs },
            "maxPixels": format!("{}", task.max_pixels as u64),
        })
    }
}

impl Engine for RemoteEngine {
    fn compute(&self, expr: &Expr) -> RendviResult<Value> {
        let response = self.post("value:compute", &json!({ "expression": encode(expr) }))?;
        response
            .get("result")
            .cloned()
            .ok_or_else(|| RendviError::UnexpectedValue(format!("compute response without result: {}", response)))
    }

    fn start_export(&self, task: &ExportTask) -> RendviResult<String> {
        let response = self.post("image:export", &self.export_request(task))?;
        let name = response
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RendviError::UnexpectedValue(format!("export response without name: {}", response)))?;
        log::info!("Started export {} -> {}", name, task.asset_id);
        Ok(name.to_string())
    }
}
