//! PostgREST-style HTTP client for the hosted remote store.
//!
//! Every collection is a table exposed at `{base_url}/{collection}`.
//! Requests carry the project key both as `apikey` and as a bearer token.
//! Calls are not retried here: the sync worker decides what a failure means.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, TrackerError};
use crate::remote::{Collection, Filter, RemoteStore};

#[derive(Debug, Clone)]
pub struct RestRemote {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RestRemote {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn endpoint(&self, collection: Collection) -> String {
        format!("{}/{}", self.base_url, collection.as_str())
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }
}

/// Render a [`Filter`] as PostgREST `field=eq.value` query pairs.
fn filter_params(filter: &Filter) -> Vec<(String, String)> {
    filter
        .equals
        .iter()
        .map(|(field, value)| {
            let rendered = match value {
                Value::String(s) => s.clone(),
                Value::Null => return (field.clone(), "is.null".to_string()),
                other => other.to_string(),
            };
            (field.clone(), format!("eq.{rendered}"))
        })
        .collect()
}

fn id_param(id: &str) -> [(&'static str, String); 1] {
    [("id", format!("eq.{id}"))]
}

/// Turn a non-2xx response into a [`TrackerError::Remote`].
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TrackerError::Remote(format!("HTTP {status}: {body}")))
}

async fn rows(response: Response) -> Result<Vec<Value>> {
    let body: Value = check(response).await?.json().await?;
    match body {
        Value::Array(rows) => Ok(rows),
        other => Err(TrackerError::Remote(format!(
            "expected a JSON array, got {other}"
        ))),
    }
}

#[async_trait]
impl RemoteStore for RestRemote {
    fn name(&self) -> &'static str {
        "rest"
    }

    async fn upsert(&self, collection: Collection, id: &str, record: &Value) -> Result<()> {
        let mut body = record.clone();
        if let Value::Object(map) = &mut body {
            map.entry("id").or_insert_with(|| Value::String(id.to_string()));
        }
        let response = self
            .authorize(self.client.post(self.endpoint(collection)))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&body)
            .send()
            .await?;
        check(response).await?;
        debug!("Upserted {}/{id} via REST", collection.as_str());
        Ok(())
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Option<Value>> {
        let response = self
            .authorize(self.client.get(self.endpoint(collection)))
            .query(&id_param(id))
            .query(&[("limit", "1")])
            .send()
            .await?;
        Ok(rows(response).await?.into_iter().next())
    }

    async fn list(&self, collection: Collection, filter: &Filter) -> Result<Vec<Value>> {
        let response = self
            .authorize(self.client.get(self.endpoint(collection)))
            .query(&[("select", "*"), ("order", "id.asc")])
            .query(&filter_params(filter))
            .send()
            .await?;
        rows(response).await
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<bool> {
        let response = self
            .authorize(self.client.delete(self.endpoint(collection)))
            .query(&id_param(id))
            .header("Prefer", "return=representation")
            .send()
            .await?;
        Ok(!rows(response).await?.is_empty())
    }

    async fn clear(&self, collection: Collection) -> Result<u64> {
        // PostgREST refuses an unfiltered DELETE.
        let response = self
            .authorize(self.client.delete(self.endpoint(collection)))
            .query(&[("id", "not.is.null")])
            .header("Prefer", "return=representation")
            .send()
            .await?;
        Ok(rows(response).await?.len() as u64)
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
