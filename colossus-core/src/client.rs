use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, COOKIE, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{RequestBuilder, Response};
use tracing::{debug, warn};
use uuid::Uuid;

use colossus_model::Context;
use colossus_model::headers::{STICKY_HOST, TRACE_DEBUG, TRACE_ID, UPSTREAM_TARGET};

use crate::error::{ClientError, Result};
use crate::sticky::{BindingUpdate, StickyHostResolver};

/// Headers every backend request carries for `ctx`, plus a fresh trace id.
pub fn context_headers(ctx: &Context) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();

    let mut authorization = header_value("authorization", &format!("bearer {}", ctx.token))?;
    authorization.set_sensitive(true);
    headers.insert(AUTHORIZATION, authorization);
    headers.insert(USER_AGENT, header_value("user-agent", &ctx.user_agent)?);

    if let Some(cookie) = &ctx.cookie {
        let mut cookie = header_value("cookie", cookie)?;
        cookie.set_sensitive(true);
        headers.insert(COOKIE, cookie);
    }
    if let Some(target) = &ctx.upstream_target {
        headers.insert(UPSTREAM_TARGET, header_value(UPSTREAM_TARGET, target)?);
    }
    if ctx.trace_debug {
        headers.insert(TRACE_DEBUG, HeaderValue::from_static("true"));
    }

    let trace_id = Uuid::new_v4().simple().to_string();
    headers.insert(TRACE_ID, header_value(TRACE_ID, &trace_id)?);
    Ok(headers)
}

fn header_value(name: &'static str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|err| ClientError::InvalidHeader {
        name,
        reason: err.to_string(),
    })
}

fn header_str(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

/// Successful response of a sticky request.
#[derive(Debug)]
pub struct StickyResponse {
    pub response: Response,
    /// Replica that served the request.
    pub host: Option<String>,
    pub trace_id: Option<String>,
    pub update: BindingUpdate,
}

/// Backend client that keeps replica affinity per resource.
#[derive(Debug, Clone)]
pub struct ColossusClient {
    http: reqwest::Client,
    ctx: Context,
    resolver: Arc<StickyHostResolver>,
}

impl ColossusClient {
    pub fn new(http: reqwest::Client, ctx: Context, resolver: Arc<StickyHostResolver>) -> Self {
        Self { http, ctx, resolver }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn resolver(&self) -> &Arc<StickyHostResolver> {
        &self.resolver
    }

    /// Sends `request` for `resource` with the context headers and the
    /// resource's sticky hint, then folds the serving replica into the
    /// binding.
    ///
    /// A strict request served by a different replica fails with
    /// [`StickyHostError::StrictDrift`](crate::error::StickyHostError::StrictDrift)
    /// even when the backend answered 2xx. Non-2xx answers map to
    /// [`ClientError::Status`].
    pub async fn send_sticky(
        &self,
        resource: &str,
        request: RequestBuilder,
        strict: bool,
    ) -> Result<StickyResponse> {
        let hint = self.resolver.hint_for(&self.ctx, resource);
        let mut headers = context_headers(&self.ctx)?;
        headers.insert(STICKY_HOST, header_value(STICKY_HOST, &hint)?);

        let response = request.headers(headers).send().await?;
        let host = header_str(&response, STICKY_HOST);
        let trace_id = header_str(&response, TRACE_ID);
        debug!(
            resource,
            status = %response.status(),
            host = host.as_deref().unwrap_or("-"),
            trace_id = trace_id.as_deref().unwrap_or("-"),
            "sticky request answered"
        );

        let update = self
            .resolver
            .update_binding(resource, &hint, host.as_deref(), strict)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let trace_id = trace_id.unwrap_or_default();
            warn!(resource, %status, trace_id = %trace_id, "sticky request failed");
            return Err(ClientError::Status {
                status,
                trace_id,
                body,
            });
        }

        Ok(StickyResponse {
            response,
            host,
            trace_id,
            update,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_headers_carry_credentials_and_options() {
        let ctx = Context::new("acme", "dev", "secret")
            .with_user_agent("colossusctl/test")
            .with_cookie("VtexIdclientAutCookie=secret")
            .with_upstream_target("cluster-b")
            .with_trace_debug(true);
        let headers = context_headers(&ctx).unwrap();

        assert_eq!(headers[AUTHORIZATION], "bearer secret");
        assert!(headers[AUTHORIZATION].is_sensitive());
        assert_eq!(headers[USER_AGENT], "colossusctl/test");
        assert_eq!(headers[COOKIE], "VtexIdclientAutCookie=secret");
        assert_eq!(headers[UPSTREAM_TARGET], "cluster-b");
        assert_eq!(headers[TRACE_DEBUG], "true");
        assert_eq!(headers[TRACE_ID].len(), 32);
    }

    #[test]
    fn optional_headers_are_omitted() {
        let headers = context_headers(&Context::new("acme", "dev", "t")).unwrap();
        assert!(!headers.contains_key(COOKIE));
        assert!(!headers.contains_key(UPSTREAM_TARGET));
        assert!(!headers.contains_key(TRACE_DEBUG));
    }

    #[test]
    fn trace_ids_are_fresh_per_call() {
        let ctx = Context::new("acme", "dev", "t");
        let first = context_headers(&ctx).unwrap();
        let second = context_headers(&ctx).unwrap();
        assert_ne!(first[TRACE_ID], second[TRACE_ID]);
    }

    #[test]
    fn invalid_token_is_rejected() {
        let ctx = Context::new("acme", "dev", "bad\ntoken");
        assert!(matches!(
            context_headers(&ctx),
            Err(ClientError::InvalidHeader {
                name: "authorization",
                ..
            })
        ));
    }
}
