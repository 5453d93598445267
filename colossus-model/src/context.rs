use std::fmt;

/// Account/workspace scope and credentials for one caller.
///
/// Passed explicitly into every channel, probe and client call so sessions
/// for different workspaces can coexist in one process.
#[derive(Clone, PartialEq, Eq)]
pub struct Context {
    pub account: String,
    pub workspace: String,
    pub token: String,
    pub user_agent: String,
    pub cookie: Option<String>,
    pub upstream_target: Option<String>,
    pub trace_debug: bool,
}

impl Context {
    pub fn new(
        account: impl Into<String>,
        workspace: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            workspace: workspace.into(),
            token: token.into(),
            user_agent: default_user_agent(),
            cookie: None,
            upstream_target: None,
            trace_debug: false,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    pub fn with_upstream_target(mut self, target: impl Into<String>) -> Self {
        self.upstream_target = Some(target.into());
        self
    }

    pub fn with_trace_debug(mut self, enabled: bool) -> Self {
        self.trace_debug = enabled;
        self
    }
}

// Token and cookie stay out of logs.
impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("account", &self.account)
            .field("workspace", &self.workspace)
            .field("token", &"<redacted>")
            .field("user_agent", &self.user_agent)
            .field("cookie", &self.cookie.as_ref().map(|_| "<redacted>"))
            .field("upstream_target", &self.upstream_target)
            .field("trace_debug", &self.trace_debug)
            .finish()
    }
}

fn default_user_agent() -> String {
    format!("colossus/{}", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_redacts_credentials() {
        let ctx = Context::new("acme", "dev", "secret-token").with_cookie("session=1");
        let rendered = format!("{ctx:?}");
        assert!(!rendered.contains("secret-token"));
        assert!(!rendered.contains("session=1"));
        assert!(rendered.contains("acme"));
    }
}
