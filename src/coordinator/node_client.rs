//! HTTP client for coordinator -> node callbacks

use crate::common::wire::{decode, expect_ok, PayloadBody};
use crate::common::{Invalidation, Payload, Result, ServerId};
use crate::coordinator::callbacks::NodeCallbacks;
use async_trait::async_trait;
use std::time::Duration;

/// Reaches nodes at the callback URL their [`ServerId`] carries
#[derive(Debug, Clone)]
pub struct HttpNodeClient {
    http: reqwest::Client,
}

impl HttpNodeClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { http })
    }

    fn url(server: &ServerId, path: &str) -> String {
        format!("{}{}", server.as_str(), path)
    }

    async fn post(&self, server: &ServerId, path: &str, inv: Invalidation) -> Result<reqwest::Response> {
        Ok(self
            .http
            .post(Self::url(server, path))
            .json(&inv)
            .send()
            .await?)
    }
}

#[async_trait]
impl NodeCallbacks for HttpNodeClient {
    async fn invalidate_reader(&self, server: &ServerId, inv: Invalidation) -> Result<()> {
        expect_ok(self.post(server, "/invalidate/reader", inv).await?).await
    }

    async fn invalidate_writer(&self, server: &ServerId, inv: Invalidation) -> Result<Payload> {
        let body: PayloadBody = decode(self.post(server, "/invalidate/writer", inv).await?).await?;
        Ok(body.payload)
    }

    async fn invalidate_writer_for_reader(
        &self,
        server: &ServerId,
        inv: Invalidation,
    ) -> Result<Payload> {
        let resp = self
            .post(server, "/invalidate/writer-for-reader", inv)
            .await?;
        let body: PayloadBody = decode(resp).await?;
        Ok(body.payload)
    }

    async fn probe(&self, server: &ServerId) -> Result<()> {
        let resp = self
            .http
            .get(Self::url(server, "/health/live"))
            .send()
            .await?;
        expect_ok(resp).await
    }
}
