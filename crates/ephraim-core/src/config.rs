//! Configuration loaded from `Ephraim.md`.
//!
//! The configuration document is human-edited Markdown: `# Section`
//! headers followed by bulleted lists. Unknown sections are ignored;
//! missing sections fall back to defaults.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Model backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: String,
    /// Model used while planning.
    pub planning_model: String,
    /// Model used while executing an approved plan.
    pub execution_model: String,
    pub endpoint: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Overall timeout for a single model invocation, in seconds.
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            planning_model: "llama3.1:8b".to_string(),
            execution_model: "llama3.1:8b".to_string(),
            endpoint: "http://localhost:11434".to_string(),
            temperature: 0.1,
            max_tokens: 4096,
            timeout_secs: 120,
        }
    }
}

/// Git integration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    pub auto_commit: bool,
    pub commit_prefix: String,
    pub require_clean_start: bool,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            auto_commit: true,
            commit_prefix: "Ephraim:".to_string(),
            require_clean_start: false,
        }
    }
}

/// CI integration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiConfig {
    pub enabled: bool,
    pub provider: String,
    pub check_after_commit: bool,
    pub max_wait_secs: u64,
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: "github".to_string(),
            check_after_commit: true,
            max_wait_secs: 300,
        }
    }
}

/// Safety and approval configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    pub require_approval: bool,
    pub max_iterations: u32,
    pub protected_paths: Vec<String>,
    pub dangerous_commands: Vec<String>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            require_approval: true,
            max_iterations: 20,
            protected_paths: Vec::new(),
            dangerous_commands: vec![
                "rm -rf".to_string(),
                "git push --force".to_string(),
                "git reset --hard".to_string(),
                "DROP TABLE".to_string(),
                "DELETE FROM".to_string(),
            ],
        }
    }
}

/// A configured MCP tool server (`name: command args…`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
}

impl McpServerConfig {
    /// Parse a `name: command args…` list item. The command line is split
    /// with shell quoting rules.
    pub fn parse(item: &str) -> Option<Self> {
        let (name, rest) = item.split_once(':')?;
        let words = shell_words::split(rest.trim()).ok()?;
        let (command, args) = words.split_first()?;
        Some(Self {
            name: name.trim().to_string(),
            command: command.clone(),
            args: args.to_vec(),
        })
    }
}

/// Full configuration for a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EphraimConfig {
    pub model: ModelConfig,
    pub git: GitConfig,
    pub ci: CiConfig,
    pub safety: SafetyConfig,

    // Project-specific rules from Ephraim.md
    pub architecture_constraints: Vec<String>,
    pub coding_standards: Vec<String>,
    pub protected_areas: Vec<String>,
    pub validation_expectations: Vec<String>,
    pub git_rules: Vec<String>,

    /// Raw `Hooks` section items; parsed by the hooks module.
    pub hook_lines: Vec<String>,
    pub mcp_servers: Vec<McpServerConfig>,
}

/// Parse the markdown document into `section -> items`. Section names are
/// lowercased with spaces replaced by underscores. A non-list line under a
/// section continues the previous item.
pub fn parse_sections(content: &str) -> HashMap<String, Vec<String>> {
    let mut sections: HashMap<String, Vec<String>> = HashMap::new();
    let mut current: Option<String> = None;

    for raw in content.lines() {
        let line = raw.trim();
        if let Some(title) = line.strip_prefix("# ") {
            let key = title.trim().to_lowercase().replace(' ', "_");
            sections.entry(key.clone()).or_default();
            current = Some(key);
        } else if let Some(item) = line.strip_prefix("- ") {
            if let Some(key) = &current {
                sections
                    .entry(key.clone())
                    .or_default()
                    .push(item.trim().to_string());
            }
        } else if !line.is_empty() {
            if let Some(key) = &current {
                if let Some(last) = sections.entry(key.clone()).or_default().last_mut() {
                    last.push(' ');
                    last.push_str(line);
                }
            }
        }
    }

    sections
}

impl EphraimConfig {
    /// Load configuration from an `Ephraim.md` file, falling back to
    /// defaults when the file is missing or a section is absent.
    pub fn load(path: &Path) -> Self {
        let mut config = Self::default();

        let Ok(content) = fs::read_to_string(path) else {
            return config;
        };
        config.apply_sections(&parse_sections(&content));
        config
    }

    fn apply_sections(&mut self, sections: &HashMap<String, Vec<String>>) {
        let take = |key: &str| sections.get(key).cloned().unwrap_or_default();

        if sections.contains_key("architecture_constraints") {
            self.architecture_constraints = take("architecture_constraints");
        }
        if sections.contains_key("coding_standards") {
            self.coding_standards = take("coding_standards");
        }
        if sections.contains_key("protected_areas") {
            self.protected_areas = take("protected_areas");
            self.safety.protected_paths = self.protected_areas.clone();
        }
        if sections.contains_key("validation_expectations") {
            self.validation_expectations = take("validation_expectations");
        }
        if sections.contains_key("git_rules") {
            self.git_rules = take("git_rules");
        }
        if sections.contains_key("hooks") {
            self.hook_lines = take("hooks");
        }
        if sections.contains_key("mcp_servers") {
            self.mcp_servers = take("mcp_servers")
                .iter()
                .filter_map(|item| McpServerConfig::parse(item))
                .collect();
        }
    }
}

/// Default `Ephraim.md` written on first boot.
pub fn default_config_doc() -> &'static str {
    "# Architecture Constraints\n\
     - Maintain existing module boundaries\n\
     - Preserve public API interfaces\n\
     - Follow established patterns in the codebase\n\
     \n\
     # Coding Standards\n\
     - Follow project's existing style conventions\n\
     - Write clear, self-documenting code\n\
     - Include type hints for function signatures\n\
     \n\
     # Protected Areas\n\
     - Do not modify configuration files without explicit approval\n\
     - Do not modify authentication/security modules without explicit approval\n\
     - Do not delete existing tests\n\
     \n\
     # Validation Expectations\n\
     - All changes must pass existing tests\n\
     - New functionality should include tests\n\
     - Code should be linted before commit\n\
     \n\
     # Git Rules\n\
     - Use descriptive commit messages\n\
     - Commit atomic, focused changes\n\
     - Do not force push to main/master\n"
}

/// Default `Context.md` written on first boot and by `ephraim reset`.
pub fn default_context_doc() -> &'static str {
    "# Current Task\n\
     No active task.\n\
     \n\
     # Recent Decisions\n\
     None yet.\n\
     \n\
     # CI Status\n\
     Not checked.\n\
     \n\
     # Next Steps\n\
     Awaiting user input.\n"
}
