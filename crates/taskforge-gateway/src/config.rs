//! Gateway-layer configuration: bind address, port, and bearer-token auth.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BindMode {
    #[default]
    Local,
    Lan,
}

impl BindMode {
    pub fn to_addr(self) -> &'static str {
        match self {
            BindMode::Local => "127.0.0.1",
            BindMode::Lan => "0.0.0.0",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    #[default]
    None,
    Token,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub token: Option<String>,
    /// A second, weaker token that only satisfies read-scoped routes
    /// (task/tree status, `/active`). Dashboards and monitors can hold this
    /// one without also being able to submit or cancel work. Absent means
    /// only `token` exists and it covers both scopes.
    #[serde(default)]
    pub read_only_token: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub bind: BindMode,
    pub port: u16,
    pub auth: AuthConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: BindMode::Local,
            port: 8787,
            auth: AuthConfig::default(),
        }
    }
}
