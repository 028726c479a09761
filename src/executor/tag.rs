//! Streaming extraction of an embedded tag block (e.g. `<think>...</think>`).
//!
//! Deltas arrive in arbitrary chunks, so a marker may straddle two chunks.
//! The extractor holds back only the longest buffer suffix that could still
//! start a marker; everything before it is released immediately.

/// State machine separating visible text from tagged content.
#[derive(Debug, Clone)]
pub struct TagExtractor {
    open: String,
    close: String,
    inside: bool,
    pending: String,
    extracted: String,
}

/// Length of the longest suffix of `text` that is a proper prefix of `marker`.
fn partial_marker_len(text: &str, marker: &str) -> usize {
    let max = marker.len().saturating_sub(1).min(text.len());
    (1..=max)
        .rev()
        .find(|&k| text.is_char_boundary(text.len() - k) && text.ends_with(&marker[..k]))
        .unwrap_or(0)
}

impl TagExtractor {
    /// Extract `<tag>...</tag>` blocks.
    pub fn new(tag: &str) -> Self {
        Self {
            open: format!("<{}>", tag),
            close: format!("</{}>", tag),
            inside: false,
            pending: String::new(),
            extracted: String::new(),
        }
    }

    /// Feed one delta; returns the visible text that can be released now.
    pub fn push(&mut self, delta: &str) -> String {
        self.pending.push_str(delta);
        let mut visible = String::new();

        loop {
            let marker = if self.inside { &self.close } else { &self.open };
            match self.pending.find(marker.as_str()) {
                Some(idx) => {
                    let rest = self.pending.split_off(idx);
                    let before = std::mem::replace(&mut self.pending, rest[marker.len()..].to_string());
                    if self.inside {
                        self.extracted.push_str(&before);
                    } else {
                        visible.push_str(&before);
                    }
                    self.inside = !self.inside;
                }
                None => {
                    let keep = partial_marker_len(&self.pending, marker);
                    let tail = self.pending.split_off(self.pending.len() - keep);
                    let released = std::mem::replace(&mut self.pending, tail);
                    if self.inside {
                        self.extracted.push_str(&released);
                    } else {
                        visible.push_str(&released);
                    }
                    break;
                }
            }
        }

        visible
    }

    /// Flush the held-back buffer at stream end. An unterminated block counts
    /// as extracted content.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        if self.inside {
            self.extracted.push_str(&rest);
            String::new()
        } else {
            rest
        }
    }

    /// Content collected from inside tag blocks so far.
    pub fn extracted(&self) -> &str {
        &self.extracted
    }

    pub fn take_extracted(&mut self) -> String {
        std::mem::take(&mut self.extracted)
    }
}

/// One-shot extraction over a complete text: `(visible, extracted)`.
pub fn extract_tag(text: &str, tag: &str) -> (String, String) {
    let mut extractor = TagExtractor::new(tag);
    let mut visible = extractor.push(text);
    visible.push_str(&extractor.finish());
    (visible, extractor.take_extracted())
}
