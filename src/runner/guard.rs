//! Forbidden-pattern rules for inbound prompts.
//!
//! Prompts are free text forwarded to an agent with shell access, so
//! plainly dangerous instructions are rejected before a process is ever
//! spawned. Rules are categorized by type of risk.

use regex::Regex;

/// Category of a rejected prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleCategory {
    /// Instructions that destroy data (rm -rf, mkfs, dd to devices).
    Destructive,
    /// Privilege escalation (sudo, su).
    Privilege,
    /// Piping remote content into a shell.
    NetworkExfil,
    /// Attempts to smuggle CLI flags through the prompt.
    FlagInjection,
}

/// Error type for guard construction.
#[derive(thiserror::Error, Debug)]
pub enum GuardError {
    /// Invalid regex pattern.
    #[error("Invalid regex pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// A single forbidden-pattern rule.
#[derive(Debug, Clone)]
pub struct PromptRule {
    category: RuleCategory,
    pattern: Regex,
    description: String,
}

impl PromptRule {
    /// Create a new rule.
    ///
    /// # Errors
    ///
    /// Returns `GuardError::InvalidPattern` if the regex is invalid.
    pub fn new(
        category: RuleCategory,
        pattern: &str,
        description: impl Into<String>,
    ) -> Result<Self, GuardError> {
        Ok(Self {
            category,
            pattern: Regex::new(pattern)?,
            description: description.into(),
        })
    }

    /// Check if the prompt matches this rule.
    #[must_use]
    pub fn matches(&self, prompt: &str) -> bool {
        self.pattern.is_match(prompt)
    }

    /// Get the rule category.
    #[must_use]
    pub fn category(&self) -> RuleCategory {
        self.category
    }

    /// User-facing description of why the prompt was rejected.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

/// A collection of forbidden-pattern rules applied to inbound prompts.
#[derive(Debug, Clone, Default)]
pub struct PromptGuard {
    rules: Vec<PromptRule>,
}

impl PromptGuard {
    /// Create an empty guard (accepts everything).
    #[must_use]
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Create a guard with the default security rules.
    #[must_use]
    pub fn with_default_rules() -> Self {
        let rules = Self::default_rules()
            .into_iter()
            .filter_map(|result| match result {
                Ok(rule) => Some(rule),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to compile default guard rule");
                    None
                }
            })
            .collect();
        Self { rules }
    }

    /// Add a rule to the guard.
    pub fn add_rule(&mut self, rule: PromptRule) {
        self.rules.push(rule);
    }

    /// Check a prompt against all rules, returning the first match.
    #[must_use]
    pub fn first_match(&self, prompt: &str) -> Option<&PromptRule> {
        self.rules.iter().find(|rule| rule.matches(prompt))
    }

    fn default_rules() -> Vec<Result<PromptRule, GuardError>> {
        vec![
            PromptRule::new(
                RuleCategory::Destructive,
                r"rm\s+(-[a-zA-Z]*[rf][a-zA-Z]*\s+)+(/|~|\$HOME)",
                "recursive deletion of a root or home path",
            ),
            PromptRule::new(
                RuleCategory::Destructive,
                r"(?i)\bmkfs\b|\bdd\s+[^|]*of=/dev/",
                "filesystem or raw device overwrite",
            ),
            PromptRule::new(
                RuleCategory::Privilege,
                r"(?i)\bsudo\b|\bsu\s+-\b",
                "privilege escalation",
            ),
            PromptRule::new(
                RuleCategory::NetworkExfil,
                r"(?i)\b(curl|wget)\b[^|]*\|\s*(ba)?sh\b",
                "piping downloaded content into a shell",
            ),
            PromptRule::new(
                RuleCategory::FlagInjection,
                r"--dangerously-skip-permissions",
                "attempt to pass unsafe CLI flags",
            ),
        ]
    }
}
