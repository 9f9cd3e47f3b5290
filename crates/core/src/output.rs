//! Console output filtering for the executable's stdout.
//!
//! The executable redraws progress bars in place with terminal control
//! sequences. [`OutputFilter`] turns that byte stream into discrete,
//! readable lines: one line per newline, and for every line that was redrawn
//! only its final state.

use std::sync::LazyLock;

use regex::bytes::Regex as BytesRegex;
use regex::Regex;

/// CSI control sequences (erase line, cursor movement) and bare carriage
/// returns, i.e. everything that redraws the current line.
static REDRAW: LazyLock<BytesRegex> =
    LazyLock::new(|| BytesRegex::new(r"\x1b\[[0-9;?]*[A-Za-z]|\r").expect("valid regex"));

/// `stable-diffusion.cpp:123  - ` style source location prefixes.
static SOURCE_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\w.\-/\\]+\.(?:c|cc|cpp|cxx|h|hpp):\d+\s*-\s*").expect("valid regex")
});

/// Incremental stdout line splitter.
///
/// Bytes are pushed in whatever chunks the pipe delivers; a trailing partial
/// line is carried over to the next push. Multi-byte characters split across
/// reads are therefore decoded intact.
#[derive(Debug, Default)]
pub struct OutputFilter {
    pending: Vec<u8>,
    redact_roots: Vec<String>,
}

impl OutputFilter {
    /// `redact_roots` are absolute directory prefixes removed from every
    /// emitted line.
    pub fn new(redact_roots: Vec<String>) -> Self {
        let redact_roots = redact_roots
            .into_iter()
            .map(|r| r.trim_end_matches('/').to_string())
            .filter(|r| !r.is_empty())
            .collect();
        Self {
            pending: Vec::new(),
            redact_roots,
        }
    }

    /// Feed one chunk and return the lines it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();

        if let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') {
            let rest = self.pending.split_off(last_newline + 1);
            let complete = std::mem::replace(&mut self.pending, rest);
            for raw in complete[..last_newline].split(|&b| b == b'\n') {
                if let Some(line) = self.final_state(raw) {
                    lines.push(line);
                }
            }
        }

        // A line still being redrawn: emit its newest completed state now so
        // progress flows live, and keep only the fragment after the last
        // redraw sequence.
        if let Some(last) = REDRAW.find_iter(&self.pending).last() {
            let tail = self.pending.split_off(last.end());
            let drawn = std::mem::replace(&mut self.pending, tail);
            if let Some(line) = self.final_state(&drawn) {
                lines.push(line);
            }
        }

        lines
    }

    /// Flush whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.pending);
        self.final_state(&rest).into_iter().collect()
    }

    /// Last non-empty redraw fragment of a raw line, cleaned.
    fn final_state(&self, raw: &[u8]) -> Option<String> {
        REDRAW
            .split(raw)
            .filter_map(|fragment| self.clean(fragment))
            .last()
    }

    fn clean(&self, fragment: &[u8]) -> Option<String> {
        let text = String::from_utf8_lossy(fragment);
        let text = text.trim();
        if text.chars().count() <= 1 {
            return None;
        }

        let mut line = SOURCE_LOCATION.replace_all(text, "").into_owned();
        for root in &self.redact_roots {
            line = line.replace(&format!("{root}/"), "").replace(root.as_str(), ".");
        }

        let line = line.trim();
        if line.chars().count() <= 1 {
            return None;
        }
        Some(line.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
