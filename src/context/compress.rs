//! Heuristic prompt compression and memory-tier trimming.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::session::ContextSnapshot;

/// Line-retention limits for [`compress_prompt`].
#[derive(Debug, Clone, Copy)]
pub struct CompressionLimits {
    pub head_lines: usize,
    pub tail_lines: usize,
    pub max_signal_lines: usize,
}

fn signal_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r#"(?ix)
            https?://\S+
            | \b(error|exception|panic(ked)?|fatal|failed|failure|traceback)\b
            | ^\s*at\s+\S+
            | ^\s*File\s+"[^"]+",\s+line\s+\d+
            | \S+\.(rs|py|ts|tsx|js|go|java|rb|c|cpp|h):\d+
            "#,
        )
        .expect("signal pattern is valid")
    })
}

/// Whether a line carries diagnostic signal worth keeping from the middle of a prompt.
pub fn is_signal_line(line: &str) -> bool {
    signal_pattern().is_match(line)
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Compress `text` to at most `char_budget` characters.
///
/// Keeps the head and tail lines plus middle lines matching diagnostic signals
/// (URLs, error markers, stack frames), deduplicated in first-seen order, with an
/// omission marker. The result is never longer than the input.
pub fn compress_prompt(text: &str, char_budget: usize, limits: CompressionLimits) -> String {
    let original_chars = text.chars().count();
    if original_chars <= char_budget {
        return text.to_string();
    }

    let lines: Vec<&str> = text.lines().collect();
    let head_end = limits.head_lines.min(lines.len());
    let tail_start = lines.len().saturating_sub(limits.tail_lines).max(head_end);
    let middle = &lines[head_end..tail_start];

    let mut seen: HashSet<String> = HashSet::new();
    let mut kept: Vec<String> = Vec::new();
    let mut keep = |line: &str, kept: &mut Vec<String>| {
        let key = line.trim();
        if key.is_empty() || seen.insert(key.to_string()) {
            kept.push(line.to_string());
        }
    };

    for line in &lines[..head_end] {
        keep(line, &mut kept);
    }

    let signals: Vec<&str> = middle
        .iter()
        .copied()
        .filter(|line| is_signal_line(line))
        .take(limits.max_signal_lines)
        .collect();
    let omitted = middle.len() - signals.len();
    if omitted > 0 {
        kept.push(format!("[... {} lines omitted ...]", omitted));
    }
    for line in signals {
        keep(line, &mut kept);
    }
    for line in &lines[tail_start..] {
        keep(line, &mut kept);
    }

    let compressed = kept.join("\n");
    let limit = char_budget.min(original_chars);
    if compressed.chars().count() > limit {
        truncate_chars(&compressed, limit)
    } else {
        compressed
    }
}

/// Drop disposable memory items and keep the newest `per_tier` items of each tier.
///
/// Tiers left empty are removed. The result never serializes longer than the input.
pub fn trim_memory(snapshot: &ContextSnapshot, per_tier: usize) -> ContextSnapshot {
    let mut trimmed = snapshot.clone();
    trimmed.memory = snapshot
        .memory
        .iter()
        .filter_map(|(tier, items)| {
            let durable: Vec<_> = items.iter().filter(|i| !i.is_disposable()).cloned().collect();
            let skip = durable.len().saturating_sub(per_tier);
            let kept: Vec<_> = durable.into_iter().skip(skip).collect();
            (!kept.is_empty()).then(|| (tier.clone(), kept))
        })
        .collect();
    trimmed
}
