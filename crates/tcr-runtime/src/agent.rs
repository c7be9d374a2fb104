//! HTTP-backed [`AgentClient`] -- talks to the LLM coding agent listening
//! inside a provisioned cell.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tcr_core::capabilities::{AgentClient, AgentResponse};
use tcr_core::types::CellBootstrap;

#[derive(Debug, Serialize)]
struct InvokeRequest<'a> {
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    response: String,
    #[serde(default)]
    files_modified: Vec<String>,
}

pub struct HttpAgentClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpAgentClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

impl Default for HttpAgentClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[async_trait]
impl AgentClient for HttpAgentClient {
    async fn invoke(&self, cell: &CellBootstrap, prompt: &str) -> anyhow::Result<AgentResponse> {
        let url = format!("{}:{}/invoke", cell.base_url, cell.port);
        let resp = self
            .client
            .post(&url)
            .json(&InvokeRequest { prompt })
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .json::<InvokeResponse>()
            .await?;

        Ok(AgentResponse {
            response: resp.response,
            files_modified: resp.files_modified,
        })
    }
}
