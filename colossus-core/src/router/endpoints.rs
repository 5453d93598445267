use url::Url;

use colossus_model::{Context, Level};

use crate::error::ClientError;

/// `{endpoint}/{account}/{workspace}/events?onUnsubscribe=link_interrupted&sender=..&keys=..`
pub fn events_url(
    endpoint: &Url,
    ctx: &Context,
    sender: &str,
    keys: &[&str],
) -> Result<Url, ClientError> {
    let mut url = scoped(endpoint, ctx, "events")?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("onUnsubscribe", "link_interrupted")
            .append_pair("sender", sender);
        for key in keys {
            query.append_pair("keys", key);
        }
    }
    Ok(url)
}

/// `{endpoint}/{account}/{workspace}/logs?level=..`
pub fn logs_url(endpoint: &Url, ctx: &Context, level: Level) -> Result<Url, ClientError> {
    let mut url = scoped(endpoint, ctx, "logs")?;
    url.query_pairs_mut().append_pair("level", level.as_str());
    Ok(url)
}

fn scoped(endpoint: &Url, ctx: &Context, leaf: &str) -> Result<Url, ClientError> {
    let mut url = endpoint.clone();
    url.set_query(None);
    url.path_segments_mut()
        .map_err(|_| ClientError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: "cannot be a base URL".to_owned(),
        })?
        .pop_if_empty()
        .extend([ctx.account.as_str(), ctx.workspace.as_str(), leaf]);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> Url {
        Url::parse("https://infra.io.vtex.com/colossus/v0").unwrap()
    }

    #[test]
    fn events_url_repeats_keys() {
        let ctx = Context::new("acme", "dev", "t");
        let url = events_url(
            &endpoint(),
            &ctx,
            "vtex.builder-hub",
            &["build.status", "receive.status"],
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://infra.io.vtex.com/colossus/v0/acme/dev/events?onUnsubscribe=link_interrupted&sender=vtex.builder-hub&keys=build.status&keys=receive.status"
        );
    }

    #[test]
    fn logs_url_tolerates_trailing_slash() {
        let ctx = Context::new("acme", "dev", "t");
        let endpoint = Url::parse("https://infra.io.vtex.com/colossus/v0/").unwrap();
        let url = logs_url(&endpoint, &ctx, Level::Debug).unwrap();
        assert_eq!(
            url.as_str(),
            "https://infra.io.vtex.com/colossus/v0/acme/dev/logs?level=debug"
        );
    }

    #[test]
    fn rejects_opaque_endpoints() {
        let ctx = Context::new("acme", "dev", "t");
        let endpoint = Url::parse("mailto:ops@example.com").unwrap();
        assert!(matches!(
            logs_url(&endpoint, &ctx, Level::Info),
            Err(ClientError::InvalidEndpoint { .. })
        ));
    }
}
