//! Intent labels, tool families and per-intent policies.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Closed set of task intents the classifier can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentLabel {
    Normal,
    Research,
    BrowserAccess,
    Destructive,
    Exfiltration,
}

impl IntentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentLabel::Normal => "normal",
            IntentLabel::Research => "research",
            IntentLabel::BrowserAccess => "browser_access",
            IntentLabel::Destructive => "destructive",
            IntentLabel::Exfiltration => "exfiltration",
        }
    }

    /// Tie-break rank when two labels score the same; higher wins.
    pub(crate) fn severity(&self) -> u8 {
        match self {
            IntentLabel::Normal => 0,
            IntentLabel::Research => 1,
            IntentLabel::BrowserAccess => 2,
            IntentLabel::Destructive => 3,
            IntentLabel::Exfiltration => 4,
        }
    }
}

impl std::fmt::Display for IntentLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability class of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFamily {
    Read,
    Write,
    Shell,
    Web,
    Browser,
    Git,
    Memory,
    Todo,
    Other,
}

impl ToolFamily {
    pub const COUNT: usize = 9;

    pub const ALL: [ToolFamily; Self::COUNT] = [
        ToolFamily::Read,
        ToolFamily::Write,
        ToolFamily::Shell,
        ToolFamily::Web,
        ToolFamily::Browser,
        ToolFamily::Git,
        ToolFamily::Memory,
        ToolFamily::Todo,
        ToolFamily::Other,
    ];

    pub(crate) fn index(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolFamily::Read => "read",
            ToolFamily::Write => "write",
            ToolFamily::Shell => "shell",
            ToolFamily::Web => "web",
            ToolFamily::Browser => "browser",
            ToolFamily::Git => "git",
            ToolFamily::Memory => "memory",
            ToolFamily::Todo => "todo",
            ToolFamily::Other => "other",
        }
    }

    /// Infer a family from a tool name.
    ///
    /// Checked most specific first, so `git_diff` is Git and not Read, and
    /// `browser_search` is Browser and not Web.
    pub fn infer(tool_name: &str) -> ToolFamily {
        let name = tool_name.to_ascii_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| name.contains(n));

        if has(&["browser", "page_", "screenshot", "click", "navigate"]) {
            ToolFamily::Browser
        } else if name.starts_with("git") {
            ToolFamily::Git
        } else if has(&["todo"]) {
            ToolFamily::Todo
        } else if has(&["memory", "fact", "remember", "recall"]) {
            ToolFamily::Memory
        } else if has(&["web", "fetch", "http", "url"]) {
            ToolFamily::Web
        } else if has(&["command", "shell", "exec", "terminal", "bash"]) {
            ToolFamily::Shell
        } else if has(&["write", "edit", "delete", "create", "move", "rename", "patch"]) {
            ToolFamily::Write
        } else if has(&["read", "list", "grep", "search", "find", "glob", "view"]) {
            ToolFamily::Read
        } else {
            ToolFamily::Other
        }
    }
}

impl std::fmt::Display for ToolFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tool-name to family mapping for one registry.
#[derive(Debug, Clone, Default)]
pub struct ToolFamilies {
    by_name: HashMap<String, ToolFamily>,
}

impl ToolFamilies {
    /// Resolve families for exactly the given tool names.
    pub fn resolve<I, S>(tool_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let by_name = tool_names
            .into_iter()
            .map(|n| {
                let name = n.as_ref().to_string();
                let family = ToolFamily::infer(&name);
                (name, family)
            })
            .collect();
        Self { by_name }
    }

    /// Pin a tool to a family, replacing the inferred one.
    pub fn with_override(mut self, tool_name: impl Into<String>, family: ToolFamily) -> Self {
        self.by_name.insert(tool_name.into(), family);
        self
    }

    /// Family of a tool; unknown names are inferred on the fly.
    pub fn family_of(&self, tool_name: &str) -> ToolFamily {
        self.by_name
            .get(tool_name)
            .copied()
            .unwrap_or_else(|| ToolFamily::infer(tool_name))
    }

    /// Whether any registered tool belongs to `family`.
    pub fn is_available(&self, family: ToolFamily) -> bool {
        self.by_name.values().any(|f| *f == family)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// What an intent is allowed to do with tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IntentPolicy {
    /// Families always permitted.
    pub allowed_families: Vec<ToolFamily>,
    /// Families permitted up to `soft_block_after` calls each.
    pub soft_allowed_families: Vec<ToolFamily>,
    pub soft_block_after: u32,
    /// Each listed family needs at least one successful call before completion.
    pub required_success_families: Vec<ToolFamily>,
    /// Refuse the task up front when a required family has no registered tool.
    pub no_fallback: bool,
    /// Turn an unmet required family into a stop instead of a warning.
    pub fail_task_if_unmet: bool,
    /// Refuse the task at preflight when classified with enough confidence.
    pub block_on_preflight: bool,
}

impl Default for IntentPolicy {
    fn default() -> Self {
        Self::permissive()
    }
}

impl IntentPolicy {
    /// Everything allowed, nothing required.
    pub fn permissive() -> Self {
        Self {
            allowed_families: ToolFamily::ALL.to_vec(),
            soft_allowed_families: Vec::new(),
            soft_block_after: 0,
            required_success_families: Vec::new(),
            no_fallback: false,
            fail_task_if_unmet: false,
            block_on_preflight: false,
        }
    }

    pub fn allows(&self, family: ToolFamily) -> bool {
        self.allowed_families.contains(&family)
    }

    pub fn soft_allows(&self, family: ToolFamily) -> bool {
        self.soft_allowed_families.contains(&family)
    }
}

/// Intent guard configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IntentGuardConfig {
    pub enabled: bool,
    /// Minimum classifier confidence for a `block_on_preflight` policy to refuse.
    pub block_confidence: f64,
    pub policies: BTreeMap<IntentLabel, IntentPolicy>,
}

impl Default for IntentGuardConfig {
    fn default() -> Self {
        use ToolFamily::*;

        let mut policies = BTreeMap::new();
        policies.insert(IntentLabel::Normal, IntentPolicy::permissive());
        policies.insert(
            IntentLabel::Research,
            IntentPolicy {
                allowed_families: vec![Read, Web, Browser, Memory, Todo, Other],
                soft_allowed_families: vec![Shell, Git],
                soft_block_after: 3,
                required_success_families: vec![Web],
                ..IntentPolicy::permissive()
            },
        );
        policies.insert(
            IntentLabel::BrowserAccess,
            IntentPolicy {
                allowed_families: vec![Read, Browser, Web, Memory, Todo, Other],
                soft_allowed_families: vec![Shell],
                soft_block_after: 2,
                required_success_families: vec![Browser],
                no_fallback: true,
                fail_task_if_unmet: true,
                ..IntentPolicy::permissive()
            },
        );
        policies.insert(
            IntentLabel::Destructive,
            IntentPolicy {
                allowed_families: vec![Read, Memory, Todo],
                soft_allowed_families: vec![Write, Shell, Git],
                soft_block_after: 2,
                block_on_preflight: true,
                ..IntentPolicy::permissive()
            },
        );
        policies.insert(
            IntentLabel::Exfiltration,
            IntentPolicy {
                allowed_families: vec![Read, Memory, Todo],
                soft_allowed_families: Vec::new(),
                block_on_preflight: true,
                ..IntentPolicy::permissive()
            },
        );

        Self {
            enabled: true,
            block_confidence: 0.8,
            policies,
        }
    }
}

impl IntentGuardConfig {
    /// A guard that allows everything.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Policy for `label`; labels without an entry are permissive.
    pub fn policy_for(&self, label: IntentLabel) -> IntentPolicy {
        self.policies
            .get(&label)
            .cloned()
            .unwrap_or_else(IntentPolicy::permissive)
    }
}
