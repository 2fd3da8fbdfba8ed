use std::collections::BTreeMap;
use std::fmt;

/// API key, shared secret and a previously granted auth token.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
    auth_token: String,
}

impl Credentials {
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            auth_token: auth_token.into(),
        }
    }

    /// Adds `api_key`, `auth_token` and the matching `api_sig` to `params`.
    pub fn sign(&self, params: &mut BTreeMap<String, String>) {
        params.remove("api_sig");
        params.insert("api_key".into(), self.api_key.clone());
        params.insert("auth_token".into(), self.auth_token.clone());
        let sig = signature(&self.api_secret, params);
        params.insert("api_sig".into(), sig);
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("auth_token", &"<redacted>")
            .finish()
    }
}

/// md5 over the secret followed by every key and value in key order.
pub fn signature(secret: &str, params: &BTreeMap<String, String>) -> String {
    let mut ctx = md5::Context::new();
    ctx.consume(secret.as_bytes());
    for (key, value) in params {
        ctx.consume(key.as_bytes());
        ctx.consume(value.as_bytes());
    }
    format!("{:x}", ctx.compute())
}
