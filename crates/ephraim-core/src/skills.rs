//! Skills: named prompt templates that expand into full task prompts.
//!
//! `/commit fix typo` expands the commit template with the argument
//! string and feeds the result into the loop as if the user had typed it.

use once_cell::sync::Lazy;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct Skill {
    pub name: &'static str,
    pub description: &'static str,
    pub template: &'static str,
    pub requires_args: bool,
}

impl Skill {
    /// Expand the template with the argument string.
    pub fn expand(&self, args: &str) -> Result<String, String> {
        if self.requires_args && args.trim().is_empty() {
            return Err(format!(
                "Skill /{} requires arguments. Usage: /{} <args>",
                self.name, self.name
            ));
        }
        Ok(self.template.replace("{args}", args.trim()))
    }
}

static SKILLS: Lazy<BTreeMap<&'static str, Skill>> = Lazy::new(|| {
    let skills = [
        Skill {
            name: "commit",
            description: "Stage and commit current changes with a good message",
            template: "Review the current git changes, stage the relevant files, and create a \
                       well-formed commit. {args}",
            requires_args: false,
        },
        Skill {
            name: "test",
            description: "Run the project's test suite and report results",
            template: "Run the project's test suite and report failures with suggested fixes. \
                       {args}",
            requires_args: false,
        },
        Skill {
            name: "review",
            description: "Review recent changes for problems",
            template: "Review the most recent changes in this repository for bugs, style issues \
                       and missing tests. {args}",
            requires_args: false,
        },
        Skill {
            name: "fix",
            description: "Fix a described bug or failing test",
            template: "Investigate and fix the following problem, validating the fix afterwards: \
                       {args}",
            requires_args: true,
        },
        Skill {
            name: "explain",
            description: "Explain a file or concept in this repository",
            template: "Explain the following part of this repository in detail: {args}",
            requires_args: true,
        },
        Skill {
            name: "search",
            description: "Search the codebase for a pattern",
            template: "Search the codebase for '{args}' and summarize every relevant match.",
            requires_args: true,
        },
        Skill {
            name: "init",
            description: "Analyze the repository and refresh Ephraim.md",
            template: "Explore this repository's structure, then update Ephraim.md so its \
                       sections reflect the project's real architecture and conventions. {args}",
            requires_args: false,
        },
        Skill {
            name: "pr",
            description: "Prepare a pull request for the current branch",
            template: "Prepare a pull request for the current branch: summarize the changes, \
                       verify tests pass, and draft the PR description. {args}",
            requires_args: false,
        },
        Skill {
            name: "debug",
            description: "Debug an error message or stack trace",
            template: "Debug the following error, find the root cause, and propose a fix: {args}",
            requires_args: true,
        },
    ];

    skills.into_iter().map(|s| (s.name, s)).collect()
});

/// Look up a built-in skill by name (without the leading slash).
pub fn get(name: &str) -> Option<&'static Skill> {
    SKILLS.get(name)
}

/// All built-in skills, sorted by name.
pub fn all() -> impl Iterator<Item = &'static Skill> {
    SKILLS.values()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_set_is_complete() {
        for name in [
            "commit", "test", "review", "fix", "explain", "search", "init", "pr", "debug",
        ] {
            assert!(get(name).is_some(), "missing skill: {name}");
        }
    }

    #[test]
    fn expand_interpolates_args() {
        let skill = get("fix").expect("fix skill");
        let prompt = skill.expand("tests fail on empty input").expect("expanded");
        assert!(prompt.contains("tests fail on empty input"));
    }

    #[test]
    fn required_args_are_enforced() {
        let skill = get("debug").expect("debug skill");
        let err = skill.expand("  ").expect_err("args required");
        assert!(err.contains("requires arguments"));

        let optional = get("commit").expect("commit skill");
        assert!(optional.expand("").is_ok());
    }

    #[test]
    fn unknown_skill_is_none() {
        assert!(get("teleport").is_none());
    }
}
