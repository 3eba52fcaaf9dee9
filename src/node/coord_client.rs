//! HTTP client for node -> coordinator calls

use crate::common::wire::{
    decode, expect_ok, AllocatedId, CallerRequest, LookupRequest, RegisterRequest, ServiceInfo,
    COORDINATOR_SERVICE,
};
use crate::common::{Error, Grant, ObjectId, ObjectRef, Payload, Result, ServerId};
use crate::node::api::CoordinatorApi;
use async_trait::async_trait;
use std::time::Duration;

pub struct HttpCoordinatorClient {
    base: String,
    http: reqwest::Client,
}

impl HttpCoordinatorClient {
    /// Resolve the coordinator at `base` and check it answers under the
    /// coordinator service name.
    pub async fn connect(base: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base = base.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let client = Self { base, http };

        let info: ServiceInfo = decode(client.http.get(client.url("/service")).send().await?).await?;
        if info.service != COORDINATOR_SERVICE {
            return Err(Error::TransportFailure(format!(
                "{} is '{}', not a coordinator",
                client.base, info.service
            )));
        }
        tracing::info!("Resolved coordinator at {} (v{})", client.base, info.version);
        Ok(client)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn post<B: serde::Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        Ok(self.http.post(self.url(path)).json(body).send().await?)
    }
}

#[async_trait]
impl CoordinatorApi for HttpCoordinatorClient {
    async fn allocate_id(&self) -> Result<ObjectId> {
        let resp = self.post("/objects/allocate", &serde_json::json!({})).await?;
        let allocated: AllocatedId = decode(resp).await?;
        Ok(allocated.id)
    }

    async fn register_object(
        &self,
        name: &str,
        id: ObjectId,
        payload: Payload,
        caller: &ServerId,
    ) -> Result<()> {
        let req = RegisterRequest {
            name: name.to_string(),
            id,
            payload,
            caller: caller.clone(),
        };
        expect_ok(self.post("/objects/register", &req).await?).await
    }

    async fn lookup_object(&self, name: &str, caller: &ServerId) -> Result<ObjectRef> {
        let req = LookupRequest {
            name: name.to_string(),
            caller: caller.clone(),
        };
        decode(self.post("/objects/lookup", &req).await?).await
    }

    async fn acquire_read(&self, id: ObjectId, caller: &ServerId) -> Result<Grant> {
        let req = CallerRequest {
            caller: caller.clone(),
        };
        decode(self.post(&format!("/objects/{}/read", id), &req).await?).await
    }

    async fn acquire_write(&self, id: ObjectId, caller: &ServerId) -> Result<Grant> {
        let req = CallerRequest {
            caller: caller.clone(),
        };
        decode(self.post(&format!("/objects/{}/write", id), &req).await?).await
    }

    async fn terminate(&self, caller: &ServerId) -> Result<()> {
        let req = CallerRequest {
            caller: caller.clone(),
        };
        expect_ok(self.post("/servers/terminate", &req).await?).await
    }
}
