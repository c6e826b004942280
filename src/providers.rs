//! Voice providers and the LLM choices each one offers
//!
//! Every LLM key maps to an environment variable holding the provider agent
//! id configured with that model.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// LLM key used when none is given
pub const DEFAULT_LLM: &str = "gpt4ominirt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Retell,
    Eleven,
}

/// One selectable model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LlmOption {
    pub key: &'static str,
    pub name: &'static str,
    /// Environment variable naming the agent id
    pub env_var: &'static str,
}

const fn llm(key: &'static str, name: &'static str, env_var: &'static str) -> LlmOption {
    LlmOption { key, name, env_var }
}

const RETELL_LLMS: &[LlmOption] = &[
    llm("gpt41", "GPT 4.1", "RETELL_GPT41"),
    llm("gpt4ort", "GPT 4o realtime", "RETELL_GPTREALTIME"),
    llm("gpt4ominirt", "GPT 4o mini realtime", "RETELL_GPTMINIREALTIME"),
    llm("claude37sonnet", "Claude 3.7 Sonnet", "RETELL_SONNET37"),
    llm("claude35haiku", "Claude 3.5 Haiku", "RETELL_HAIKU35"),
    llm("gemini20flash", "Gemini 2.0 Flash", "RETELL_GEMINI20FLASH"),
];

const ELEVEN_LLMS: &[LlmOption] = &[
    llm("claude37sonnet", "Claude 3.7 Sonnet", "ELEVEN_SONNET37"),
    llm("claudesonnet4", "Claude Sonnet 4", "ELEVEN_SONNET4"),
    llm("gemini20flash", "Gemini 2.0 Flash", "ELEVEN_GEMINI20FLASH"),
    llm("gemini25flash", "Gemini 2.5 Flash", "ELEVEN_GEMINI25FLASH"),
    llm("gemini20flashlite", "Gemini 2.0 Flash Lite", "ELEVEN_GEMINI20FLASHLITE"),
    llm("claude35haiku", "Claude 3.5 Haiku", "ELEVEN_CLAUDE35HAIKU"),
];

impl Provider {
    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Retell => "Retell",
            Provider::Eleven => "ElevenLabs",
        }
    }

    pub fn llms(&self) -> &'static [LlmOption] {
        match self {
            Provider::Retell => RETELL_LLMS,
            Provider::Eleven => ELEVEN_LLMS,
        }
    }

    pub fn find_llm(&self, key: &str) -> Option<&'static LlmOption> {
        self.llms().iter().find(|option| option.key == key)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Agent id for an LLM key
///
/// Reads the key's environment variable and falls back to `default_agent_id`.
/// Empty values count as unset.
pub fn resolve_agent_id(provider: Provider, llm: &str, default_agent_id: Option<&str>) -> Option<String> {
    resolve_agent_id_with(provider, llm, default_agent_id, |name| std::env::var(name).ok())
}

pub fn resolve_agent_id_with<F>(
    provider: Provider,
    llm: &str,
    default_agent_id: Option<&str>,
    lookup: F,
) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    provider
        .find_llm(llm)
        .and_then(|option| lookup(option.env_var))
        .filter(|id| !id.trim().is_empty())
        .or_else(|| {
            default_agent_id
                .filter(|id| !id.trim().is_empty())
                .map(str::to_string)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_llm_is_offered_by_retell() {
        assert_eq!(
            Provider::Retell.find_llm(DEFAULT_LLM).map(|o| o.name),
            Some("GPT 4o mini realtime")
        );
        assert!(Provider::Eleven.find_llm(DEFAULT_LLM).is_none());
    }

    #[test]
    fn test_same_key_maps_per_provider() {
        assert_eq!(Provider::Retell.find_llm("claude35haiku").unwrap().env_var, "RETELL_HAIKU35");
        assert_eq!(Provider::Eleven.find_llm("claude35haiku").unwrap().env_var, "ELEVEN_CLAUDE35HAIKU");
    }

    #[test]
    fn test_resolve_prefers_env_then_default() {
        let lookup = |name: &str| (name == "ELEVEN_SONNET4").then(|| "agent_env".to_string());

        assert_eq!(
            resolve_agent_id_with(Provider::Eleven, "claudesonnet4", Some("agent_default"), lookup),
            Some("agent_env".to_string())
        );
        assert_eq!(
            resolve_agent_id_with(Provider::Eleven, "gemini25flash", Some("agent_default"), lookup),
            Some("agent_default".to_string())
        );
        assert_eq!(
            resolve_agent_id_with(Provider::Eleven, "gemini25flash", Some("  "), lookup),
            None
        );
    }
}
