use super::vendor::VendorApi;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::providers::Provider;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Vendor APIs the routes wrap
    pub vendor: Arc<dyn VendorApi>,
    /// Agent id per provider when an LLM key's variable is unset
    pub default_agents: Arc<HashMap<Provider, String>>,
}

impl AppState {
    pub fn new(vendor: Arc<dyn VendorApi>) -> Self {
        Self {
            vendor,
            default_agents: Arc::new(HashMap::new()),
        }
    }

    pub fn from_config(vendor: Arc<dyn VendorApi>, config: &Config) -> Self {
        let mut default_agents = HashMap::new();
        if let Some(agent) = &config.retell.default_agent_id {
            default_agents.insert(Provider::Retell, agent.clone());
        }
        if let Some(agent) = &config.eleven.default_agent_id {
            default_agents.insert(Provider::Eleven, agent.clone());
        }

        Self {
            vendor,
            default_agents: Arc::new(default_agents),
        }
    }

    pub fn with_default_agent(mut self, provider: Provider, agent_id: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.default_agents).insert(provider, agent_id.into());
        self
    }

    pub fn default_agent(&self, provider: Provider) -> Option<&str> {
        self.default_agents.get(&provider).map(String::as_str)
    }
}
