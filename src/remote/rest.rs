//! `RemoteStore` over the hosted backend's PostgREST-style row API.

use super::{RemoteStore, RestStoreConfig, StoreOp};
use crate::core::{DisplayFields, ItemDraft, RemoteRowId, Result, SyncError, TrackedItem};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{Level, event};

const OWNER_COLUMN: &str = "user_id";
const ITEM_COLUMN: &str = "product_id";
const PREFER_UPSERT: &str = "resolution=merge-duplicates,return=representation";
const PREFER_REPRESENTATION: &str = "return=representation";

/// Wire shape of one collection row.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RowRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<JsonValue>,
    user_id: String,
    product_id: String,
    name: String,
    #[serde(default)]
    image_url: Option<String>,
    price: f64,
    #[serde(default = "default_quantity")]
    quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
}

fn default_quantity() -> u32 {
    1
}

impl RowRecord {
    fn from_draft(owner_id: &str, item: &ItemDraft) -> Self {
        Self {
            id: None,
            user_id: owner_id.to_string(),
            product_id: item.item_id.clone(),
            name: item.fields.name.clone(),
            image_url: item.fields.image_ref.clone(),
            price: item.fields.price,
            quantity: item.quantity,
            created_at: None,
        }
    }

    fn row_id(&self) -> Result<String> {
        match &self.id {
            Some(JsonValue::String(id)) => Ok(id.clone()),
            Some(JsonValue::Number(id)) => Ok(id.to_string()),
            other => Err(SyncError::RemoteUnavailable(format!(
                "row for '{}' has no usable id: {:?}",
                self.product_id, other
            ))),
        }
    }

    fn into_tracked(self) -> Result<TrackedItem> {
        let row_id = self.row_id()?;
        let mut fields = DisplayFields::new(self.name, self.price);
        fields.image_ref = self.image_url;
        Ok(TrackedItem {
            owner_id: self.user_id,
            item_id: self.product_id,
            fields,
            quantity: self.quantity,
            remote_row_id: RemoteRowId::Assigned(row_id),
            added_at: self.created_at.unwrap_or_else(Utc::now),
        })
    }
}

/// Hosted row store client. One instance per table.
#[derive(Clone)]
pub struct RestRemoteStore {
    client: Client,
    config: RestStoreConfig,
}

impl RestRemoteStore {
    pub fn new(config: RestStoreConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &RestStoreConfig {
        &self.config
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.config.api_key)
            .bearer_auth(self.config.bearer())
    }

    async fn send(&self, op: StoreOp, request: RequestBuilder) -> Result<Vec<RowRecord>> {
        let response = self.authorized(request).send().await?;
        let response = check_status(op, response).await?;
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&body)?)
    }
}

async fn check_status(op: StoreOp, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    event!(Level::WARN, op = %op, status = %status, "remote store request failed");
    Err(map_status(op, status, &body))
}

fn map_status(op: StoreOp, status: StatusCode, body: &str) -> SyncError {
    let detail = format!("{} returned {}: {}", op, status, body.trim());
    // Rejected is reserved for local checks made before any request.
    match status {
        StatusCode::CONFLICT => SyncError::Conflict(detail),
        _ => SyncError::RemoteUnavailable(detail),
    }
}

fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

#[async_trait]
impl RemoteStore for RestRemoteStore {
    async fn list(&self, owner_id: &str) -> Result<Vec<TrackedItem>> {
        let request = self.client.get(self.config.endpoint()).query(&[
            ("select", "*".to_string()),
            (OWNER_COLUMN, eq(owner_id)),
            ("order", "created_at.asc".to_string()),
        ]);

        self.send(StoreOp::List, request)
            .await?
            .into_iter()
            .map(RowRecord::into_tracked)
            .collect()
    }

    async fn upsert(&self, owner_id: &str, item: &ItemDraft) -> Result<String> {
        let request = self
            .client
            .post(self.config.endpoint())
            .query(&[("on_conflict", format!("{},{}", OWNER_COLUMN, ITEM_COLUMN))])
            .header("Prefer", PREFER_UPSERT)
            .json(&[RowRecord::from_draft(owner_id, item)]);

        let rows = self.send(StoreOp::Upsert, request).await?;
        rows.iter()
            .find(|row| row.product_id == item.item_id)
            .ok_or_else(|| {
                SyncError::RemoteUnavailable(format!(
                    "upsert of '{}' returned no representation",
                    item.item_id
                ))
            })?
            .row_id()
    }

    async fn remove(&self, owner_id: &str, item_id: &str) -> Result<bool> {
        let request = self
            .client
            .delete(self.config.endpoint())
            .query(&[(OWNER_COLUMN, eq(owner_id)), (ITEM_COLUMN, eq(item_id))])
            .header("Prefer", PREFER_REPRESENTATION);

        Ok(!self.send(StoreOp::Remove, request).await?.is_empty())
    }

    async fn remove_all(&self, owner_id: &str) -> Result<bool> {
        let request = self
            .client
            .delete(self.config.endpoint())
            .query(&[(OWNER_COLUMN, eq(owner_id))])
            .header("Prefer", PREFER_REPRESENTATION);

        Ok(!self.send(StoreOp::RemoveAll, request).await?.is_empty())
    }
}
