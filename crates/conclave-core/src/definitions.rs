//! DefinitionProvider -- the interface the scheduler queries for agent,
//! command, and skill definitions. Discovery (walking `assets/…/` and
//! `.github/…/`, parsing markdown + YAML frontmatter) is out of scope
//! here; only the contract and the data shapes it returns are modeled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Sonnet,
    Opus,
    Haiku,
    Inherit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionBackend {
    Copilot,
    Claude,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefinition {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub disallowed_tools: Vec<String>,
    pub model: ModelTier,
    #[serde(default)]
    pub use_skills: Vec<String>,
    pub has_architecture_access: bool,
    pub backend: DefinitionBackend,
    pub claude_slash_command: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandDefinition {
    pub name: String,
    pub description: String,
    pub argument_hint: Option<String>,
    #[serde(default)]
    pub agents: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillDefinition {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Where a definition was discovered, for override resolution: a repo
/// entry overrides a built-in one that shares its id, case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionSource {
    BuiltIn,
    Repo,
}

/// Queried by the scheduler to resolve agent/command/skill definitions.
/// Implementations are expected to cache results with a TTL (30s in the
/// reference deployment) since definitions live on disk and change
/// rarely relative to scheduling traffic.
#[async_trait]
pub trait DefinitionProvider: Send + Sync {
    async fn agent(&self, name: &str) -> Option<(AgentDefinition, DefinitionSource)>;
    async fn command(&self, name: &str) -> Option<(CommandDefinition, DefinitionSource)>;
    async fn skill(&self, name: &str) -> Option<(SkillDefinition, DefinitionSource)>;
    async fn list_agents(&self) -> Vec<AgentDefinition>;
    async fn list_commands(&self) -> Vec<CommandDefinition>;
    async fn list_skills(&self) -> Vec<SkillDefinition>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticProvider {
        agents: Vec<AgentDefinition>,
    }

    #[async_trait]
    impl DefinitionProvider for StaticProvider {
        async fn agent(&self, name: &str) -> Option<(AgentDefinition, DefinitionSource)> {
            self.agents
                .iter()
                .find(|a| a.name.eq_ignore_ascii_case(name))
                .cloned()
                .map(|a| (a, DefinitionSource::BuiltIn))
        }
        async fn command(&self, _name: &str) -> Option<(CommandDefinition, DefinitionSource)> {
            None
        }
        async fn skill(&self, _name: &str) -> Option<(SkillDefinition, DefinitionSource)> {
            None
        }
        async fn list_agents(&self) -> Vec<AgentDefinition> {
            self.agents.clone()
        }
        async fn list_commands(&self) -> Vec<CommandDefinition> {
            Vec::new()
        }
        async fn list_skills(&self) -> Vec<SkillDefinition> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn agent_lookup_is_case_insensitive() {
        let provider = StaticProvider {
            agents: vec![AgentDefinition {
                name: "Architect".to_string(),
                description: "plans work".to_string(),
                tools: vec![],
                disallowed_tools: vec![],
                model: ModelTier::Inherit,
                use_skills: vec![],
                has_architecture_access: true,
                backend: DefinitionBackend::Claude,
                claude_slash_command: Some("/architect".to_string()),
            }],
        };
        let (def, source) = provider.agent("architect").await.unwrap();
        assert_eq!(def.name, "Architect");
        assert_eq!(source, DefinitionSource::BuiltIn);
    }
}
