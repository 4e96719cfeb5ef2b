//! Incremental sentence segmentation of a generation stream.
//!
//! The segmenter turns token deltas into speakable units. The first unit
//! goes out as soon as the first sentence closes so audio starts early;
//! later units are merged up to a growing target length so each synthesis
//! call carries more text once latency no longer matters.
//!
//! Concatenating every unit in emission order reproduces the fed text,
//! trimmed at both ends. Fragments that contain no letters (stray
//! punctuation, blank lines) are never emitted on their own; they ride
//! along as the prefix of the next unit.

/// Default minimum length (in characters) of the second and third units.
pub const DEFAULT_MIN_LENGTH: usize = 15;

/// Per-turn segmentation state. Not shared: one generation loop owns it.
#[derive(Debug)]
pub struct SentenceSegmenter {
    min_length: usize,
    /// Raw text not yet matched to a boundary.
    buffer: String,
    scan: BoundaryScan,
    /// Validated fragments waiting to reach the target length.
    pending: String,
    output_count: usize,
}

impl Default for SentenceSegmenter {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_LENGTH)
    }
}

impl SentenceSegmenter {
    pub fn new(min_length: usize) -> Self {
        Self {
            min_length,
            buffer: String::new(),
            scan: BoundaryScan::default(),
            pending: String::new(),
            output_count: 0,
        }
    }

    /// Number of units emitted so far.
    pub fn output_count(&self) -> usize {
        self.output_count
    }

    /// Target length of the `n`-th unit (1-based).
    pub fn target(&self, n: usize) -> usize {
        match n {
            0 | 1 => 0,
            2 | 3 => self.min_length,
            _ => self.min_length * (n - 3) * 3,
        }
    }

    /// Consumes one text increment and returns the units it completed.
    pub fn feed(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);
        let mut out = Vec::new();
        while let Some(end) = self.scan.next_boundary(&self.buffer) {
            let fragment: String = self.buffer.drain(..end).collect();
            self.scan.rewind();
            self.accept(fragment, &mut out);
        }
        out
    }

    /// Flushes everything still held at end of stream.
    pub fn finalize(&mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.buffer);
        self.scan = BoundaryScan::default();
        self.pending.push_str(&rest);
        let mut out = Vec::new();
        if has_alpha(&self.pending) {
            let unit = std::mem::take(&mut self.pending);
            self.push_unit(unit.trim_end().to_string(), &mut out);
        }
        self.pending.clear();
        out
    }

    fn accept(&mut self, fragment: String, out: &mut Vec<String>) {
        self.pending.push_str(&fragment);
        if !has_alpha(&fragment) {
            return;
        }

        let n = self.output_count + 1;
        if n == 1 {
            let unit = std::mem::take(&mut self.pending);
            self.push_unit(unit, out);
            return;
        }

        if char_len(&fragment) > 2 * self.target(n) {
            self.split_oversized(out);
        }

        if has_alpha(&self.pending) && char_len(&self.pending) >= self.target(self.output_count + 1)
        {
            let unit = std::mem::take(&mut self.pending);
            self.push_unit(unit, out);
        }
    }

    /// Cuts `pending` at word boundaries until what is left is no longer
    /// oversized for the next unit.
    fn split_oversized(&mut self, out: &mut Vec<String>) {
        loop {
            let target = self.target(self.output_count + 1);
            let Some(idx) = split_point(&self.pending, target) else {
                break;
            };
            let tail = self.pending.split_off(idx);
            let head = std::mem::replace(&mut self.pending, tail);
            self.push_unit(head, out);
            if char_len(&self.pending) <= 2 * self.target(self.output_count + 1) {
                break;
            }
        }
    }

    fn push_unit(&mut self, unit: String, out: &mut Vec<String>) {
        let unit = if self.output_count == 0 {
            unit.trim_start().to_string()
        } else {
            unit
        };
        if unit.is_empty() {
            return;
        }
        self.output_count += 1;
        out.push(unit);
    }
}

fn has_alpha(text: &str) -> bool {
    text.chars().any(char::is_alphabetic)
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Punctuation that ends a sentence and may repeat (`?!`, `...`, `。。`).
fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '?' | '!' | '。' | '？' | '！' | '…')
}

fn is_marker(c: char) -> bool {
    is_terminal(c) || matches!(c, '，' | '；' | '：' | '\n')
}

fn is_opening(c: char) -> bool {
    matches!(
        c,
        '(' | '[' | '{' | '"' | '“' | '‘' | '「' | '『' | '（' | '【' | '《' | '〈'
    )
}

fn is_closing(c: char) -> bool {
    matches!(
        c,
        ')' | ']' | '}' | '"' | '”' | '’' | '」' | '』' | '）' | '】' | '》' | '〉'
    )
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '\''
}

fn closes(open: char, close: char) -> bool {
    matches!(
        (open, close),
        ('(', ')')
            | ('[', ']')
            | ('{', '}')
            | ('“', '”')
            | ('‘', '’')
            | ('「', '」')
            | ('『', '』')
            | ('（', '）')
            | ('【', '】')
            | ('《', '》')
            | ('〈', '〉')
    )
}

/// Incremental boundary search over the segmenter's buffer.
///
/// A boundary is a marker (or a run of terminal punctuation) that is not
/// directly preceded by an opening bracket/quote and not directly followed
/// by a closing one. A marker at the end of the buffer is a boundary unless
/// a bracket or quote is still open, in which case the next character
/// decides. A quote closing right after a marker is therefore seen the
/// same way whether the text arrives whole or a character at a time.
#[derive(Debug, Default)]
struct BoundaryScan {
    /// Byte offset in the buffer where the next search resumes.
    pos: usize,
    /// Brackets and quotes opened and not yet closed, innermost last.
    /// Spans fragments: a quote may open before one boundary and close
    /// after the next.
    open: Vec<char>,
}

impl BoundaryScan {
    /// The buffer was drained up to the last boundary.
    fn rewind(&mut self) {
        self.pos = 0;
    }

    fn track(&mut self, c: char) {
        if c == '"' {
            if self.open.last() == Some(&'"') {
                self.open.pop();
            } else {
                self.open.push(c);
            }
        } else if is_opening(c) {
            self.open.push(c);
        } else if self.open.last().is_some_and(|&o| closes(o, c)) {
            self.open.pop();
        }
    }

    /// Byte offset just past the earliest boundary in `text` at or after
    /// the resume point, if any.
    fn next_boundary(&mut self, text: &str) -> Option<usize> {
        while let Some(c) = text[self.pos..].chars().next() {
            let at = self.pos;
            if !is_marker(c) {
                self.track(c);
                self.pos += c.len_utf8();
                continue;
            }

            let mut end = at + c.len_utf8();
            if is_terminal(c) {
                while let Some(t) = text[end..].chars().next().filter(|&t| is_terminal(t)) {
                    end += t.len_utf8();
                }
            }
            if c == '\n' {
                return Some(end);
            }

            let prev = text[..at].chars().next_back();
            let next = text[end..].chars().next();

            let single_dot_after_digit =
                c == '.' && end == at + 1 && prev.is_some_and(|p| p.is_ascii_digit());
            if single_dot_after_digit {
                match next {
                    // Could be a decimal point; wait for the next character.
                    None => return None,
                    Some(n) if n.is_ascii_digit() => {
                        self.pos = end;
                        continue;
                    }
                    Some(_) => {}
                }
            }

            if next.is_none() && !self.open.is_empty() {
                // A closing quote may be next.
                return None;
            }

            let bracketed = prev.is_some_and(is_opening) || next.is_some_and(is_closing);
            if !bracketed {
                return Some(end);
            }
            self.pos = end;
        }
        None
    }
}

/// Byte offset of the first word boundary at or after `target` characters
/// that leaves letters on both sides of the cut.
fn split_point(text: &str, target: usize) -> Option<usize> {
    let last_alpha = text
        .char_indices()
        .filter(|(_, c)| c.is_alphabetic())
        .map(|(idx, _)| idx)
        .last()?;
    let min_chars = target.max(1);
    let mut prev: Option<char> = None;
    let mut seen_alpha = false;
    for (count, (idx, c)) in text.char_indices().enumerate() {
        if idx > last_alpha {
            break;
        }
        if count >= min_chars && seen_alpha {
            let inside_word = prev.is_some_and(is_word_char) && is_word_char(c);
            if !inside_word {
                return Some(idx);
            }
        }
        seen_alpha |= c.is_alphabetic();
        prev = Some(c);
    }
    None
}
