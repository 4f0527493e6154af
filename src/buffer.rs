/// Most characters kept in the output buffer.
pub const OUTPUT_BUFFER_CAP: usize = 10_000;

/// Accumulated CLI output since the last reset, trimmed from the front.
#[derive(Debug, Default, Clone)]
pub struct OutputBuffer {
    text: String,
    /// Char count of `text`, tracked to avoid rescanning on every push
    chars: usize,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn char_len(&self) -> usize {
        self.chars
    }

    pub fn push(&mut self, delta: &str) {
        self.text.push_str(delta);
        self.chars += delta.chars().count();
        if self.chars > OUTPUT_BUFFER_CAP {
            let excess = self.chars - OUTPUT_BUFFER_CAP;
            let cut = self
                .text
                .char_indices()
                .nth(excess)
                .map(|(i, _)| i)
                .unwrap_or(self.text.len());
            self.text.drain(..cut);
            self.chars = OUTPUT_BUFFER_CAP;
        }
    }

    pub fn replace(&mut self, text: &str) {
        self.clear();
        self.push(text);
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.chars = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncates_from_front_on_char_boundary() {
        let mut buffer = OutputBuffer::new();
        buffer.push(&"a".repeat(OUTPUT_BUFFER_CAP - 1));
        buffer.push("╭─x");
        assert_eq!(buffer.char_len(), OUTPUT_BUFFER_CAP);
        assert_eq!(buffer.as_str().chars().count(), OUTPUT_BUFFER_CAP);
        assert!(buffer.as_str().ends_with("╭─x"));
    }

    #[test]
    fn test_replace_and_clear() {
        let mut buffer = OutputBuffer::new();
        buffer.push("old");
        buffer.replace("new");
        assert_eq!(buffer.as_str(), "new");
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.char_len(), 0);
    }
}
