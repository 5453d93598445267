use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, HeaderValue};
use serde::Deserialize;
use tracing::trace;
use url::Url;

use colossus_model::Context;
use colossus_model::headers::STICKY_HOST;

use super::HostAvailability;
use crate::client::context_headers;
use crate::error::StickyHostError;

/// Asks one replica, selected by `hint`, how loaded it is.
#[async_trait]
pub trait AvailabilityProbe: Send + Sync + 'static {
    async fn probe(
        &self,
        ctx: &Context,
        resource: &str,
        hint: &str,
    ) -> Result<HostAvailability, StickyHostError>;
}

#[derive(Debug, Deserialize)]
struct AvailabilityBody {
    #[serde(default)]
    hostname: String,
    #[serde(default)]
    score: f64,
}

/// Probes the builder's availability endpoint.
#[derive(Debug, Clone)]
pub struct HttpAvailabilityProbe {
    client: reqwest::Client,
    builder_endpoint: Url,
}

impl HttpAvailabilityProbe {
    pub fn new(client: reqwest::Client, builder_endpoint: Url) -> Self {
        Self {
            client,
            builder_endpoint,
        }
    }

    fn availability_url(&self, ctx: &Context, resource: &str) -> Result<Url, StickyHostError> {
        let mut url = self.builder_endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| {
                StickyHostError::InvalidRequest(format!(
                    "builder endpoint {} cannot be a base URL",
                    self.builder_endpoint
                ))
            })?
            .pop_if_empty()
            .extend([
                ctx.account.as_str(),
                ctx.workspace.as_str(),
                "_v",
                "builder",
                "0",
                "availability",
                resource,
            ]);
        Ok(url)
    }
}

#[async_trait]
impl AvailabilityProbe for HttpAvailabilityProbe {
    async fn probe(
        &self,
        ctx: &Context,
        resource: &str,
        hint: &str,
    ) -> Result<HostAvailability, StickyHostError> {
        let url = self.availability_url(ctx, resource)?;
        let mut headers =
            context_headers(ctx).map_err(|err| StickyHostError::InvalidRequest(err.to_string()))?;
        let hint_value = HeaderValue::from_str(hint)
            .map_err(|err| StickyHostError::InvalidRequest(format!("sticky hint: {err}")))?;
        headers.insert(STICKY_HOST, hint_value);
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let response = self
            .client
            .get(url)
            .headers(headers)
            .send()
            .await?
            .error_for_status()?;

        let host = response
            .headers()
            .get(STICKY_HOST)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| StickyHostError::MissingHost(resource.to_owned()))?;
        let body: AvailabilityBody = response.json().await?;
        trace!(resource, hint, host = %host, score = body.score, "availability probed");

        Ok(HostAvailability {
            host,
            hostname: body.hostname,
            score: body.score,
            hint: hint.to_owned(),
        })
    }
}
