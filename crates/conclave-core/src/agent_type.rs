//! Agent-type grammar: `backend ':' name | '@' name | name`.
//!
//! A tiny, pure parser -- no filesystem access, no I/O -- plus the
//! reserved built-in agent names and their default Claude slash
//! commands, and a registry for custom slash commands that must never
//! shadow a reserved name.

use std::collections::HashMap;

use conclave_store::models::{AgentBackend, ParsedAgentType};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AgentTypeParseError {
    #[error("empty agent type")]
    Empty,
    #[error("unknown backend '{0}'")]
    UnknownBackend(String),
    #[error("empty agent name in '{0}'")]
    EmptyName(String),
}

/// Parse `agent-type := backend ':' name | '@' name | name`. An omitted
/// backend defaults to `copilot`. A leading `@` is sugar for an omitted
/// backend and is stripped before the name is read.
pub fn parse_agent_type(raw: &str) -> Result<ParsedAgentType, AgentTypeParseError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AgentTypeParseError::Empty);
    }

    if let Some(name) = raw.strip_prefix('@') {
        if name.is_empty() {
            return Err(AgentTypeParseError::EmptyName(raw.to_string()));
        }
        return Ok(ParsedAgentType {
            backend: AgentBackend::Copilot,
            agent_name: name.to_string(),
            slash_command: default_slash_command(name),
        });
    }

    if let Some((backend_raw, name)) = raw.split_once(':') {
        let backend: AgentBackend = backend_raw
            .parse()
            .map_err(|_| AgentTypeParseError::UnknownBackend(backend_raw.to_string()))?;
        if name.is_empty() {
            return Err(AgentTypeParseError::EmptyName(raw.to_string()));
        }
        return Ok(ParsedAgentType {
            backend,
            agent_name: name.to_string(),
            slash_command: default_slash_command(name),
        });
    }

    Ok(ParsedAgentType {
        backend: AgentBackend::Copilot,
        agent_name: raw.to_string(),
        slash_command: default_slash_command(raw),
    })
}

/// Built-in reserved agent names and their default Claude slash
/// commands. `reviewer` maps to `/review`, not `/reviewer` -- the one
/// irregular entry in the reserved set.
pub const RESERVED_AGENT_NAMES: &[&str] = &["agent", "architect", "reviewer", "planner", "repository-researcher"];

fn default_slash_command(agent_name: &str) -> Option<String> {
    match agent_name {
        "agent" => Some("/agent".to_string()),
        "architect" => Some("/architect".to_string()),
        "reviewer" => Some("/review".to_string()),
        "planner" => Some("/plan".to_string()),
        "repository-researcher" => Some("/repository-researcher".to_string()),
        _ => None,
    }
}

pub fn is_reserved(agent_name: &str) -> bool {
    RESERVED_AGENT_NAMES.contains(&agent_name)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlashCommandRegistryError {
    #[error("'{0}' is a reserved agent name and cannot have a custom slash command")]
    Reserved(String),
}

/// Custom slash-command registry. Registration is rejected outright for
/// any name in [`RESERVED_AGENT_NAMES`]; those keep their fixed default
/// forever.
#[derive(Debug, Default)]
pub struct SlashCommandRegistry {
    custom: HashMap<String, String>,
}

impl SlashCommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, agent_name: &str, slash_command: &str) -> Result<(), SlashCommandRegistryError> {
        if is_reserved(agent_name) {
            return Err(SlashCommandRegistryError::Reserved(agent_name.to_string()));
        }
        self.custom.insert(agent_name.to_string(), slash_command.to_string());
        Ok(())
    }

    /// Resolve the slash command for `agent_name`: a registered custom
    /// command if present, else the built-in reserved default, else
    /// none.
    pub fn resolve(&self, agent_name: &str) -> Option<String> {
        self.custom
            .get(agent_name)
            .cloned()
            .or_else(|| default_slash_command(agent_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_defaults_to_copilot_backend() {
        let parsed = parse_agent_type("architect").unwrap();
        assert_eq!(parsed.backend, AgentBackend::Copilot);
        assert_eq!(parsed.agent_name, "architect");
        assert_eq!(parsed.slash_command.as_deref(), Some("/architect"));
    }

    #[test]
    fn at_prefix_is_sugar_for_omitted_backend() {
        let parsed = parse_agent_type("@reviewer").unwrap();
        assert_eq!(parsed.backend, AgentBackend::Copilot);
        assert_eq!(parsed.agent_name, "reviewer");
        assert_eq!(parsed.slash_command.as_deref(), Some("/review"));
    }

    #[test]
    fn explicit_backend_is_parsed() {
        let parsed = parse_agent_type("claude:my-custom-agent").unwrap();
        assert_eq!(parsed.backend, AgentBackend::Claude);
        assert_eq!(parsed.agent_name, "my-custom-agent");
        assert_eq!(parsed.slash_command, None);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let err = parse_agent_type("openai:foo").unwrap_err();
        assert_eq!(err, AgentTypeParseError::UnknownBackend("openai".to_string()));
    }

    #[test]
    fn empty_input_is_rejected() {
        assert_eq!(parse_agent_type("").unwrap_err(), AgentTypeParseError::Empty);
        assert_eq!(parse_agent_type("  ").unwrap_err(), AgentTypeParseError::Empty);
    }

    #[test]
    fn empty_name_after_prefix_is_rejected() {
        assert!(matches!(parse_agent_type("@"), Err(AgentTypeParseError::EmptyName(_))));
        assert!(matches!(parse_agent_type("claude:"), Err(AgentTypeParseError::EmptyName(_))));
    }

    #[test]
    fn registry_rejects_reserved_names() {
        let mut reg = SlashCommandRegistry::new();
        let err = reg.register("architect", "/my-architect").unwrap_err();
        assert_eq!(err, SlashCommandRegistryError::Reserved("architect".to_string()));
    }

    #[test]
    fn registry_resolves_custom_then_falls_back_to_reserved_default() {
        let mut reg = SlashCommandRegistry::new();
        reg.register("my-agent", "/my-agent").unwrap();
        assert_eq!(reg.resolve("my-agent").as_deref(), Some("/my-agent"));
        assert_eq!(reg.resolve("reviewer").as_deref(), Some("/review"));
        assert_eq!(reg.resolve("unregistered"), None);
    }
}
