use std::fmt;

#[derive(Clone, Debug)]
struct Line {
    depth: usize,
    text: String,
}

/// Line-based text writer with scoped indentation.
///
/// Printers write lines at the current depth and open nested scopes with
/// [`TextBuffer::indented`], so every indent is matched by its dedent.
/// Helper functions are usually collected in a separate buffer and spliced
/// into the main one with [`TextBuffer::insert_lines_at`] once known.
#[derive(Clone, Debug)]
pub struct TextBuffer {
    lines: Vec<Line>,
    depth: usize,
    width: usize,
}

impl Default for TextBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl TextBuffer {
    /// Creates an empty buffer indenting by two spaces per level.
    pub fn new() -> Self {
        Self::with_indent_width(2)
    }

    /// Creates an empty buffer indenting by `width` spaces per level.
    pub fn with_indent_width(width: usize) -> Self {
        Self {
            lines: Vec::new(),
            depth: 0,
            width,
        }
    }

    /// Appends a line at the current depth.
    pub fn line(&mut self, text: impl Into<String>) {
        self.lines.push(Line {
            depth: self.depth,
            text: text.into(),
        });
    }

    /// Appends an empty line.
    pub fn blank(&mut self) {
        self.lines.push(Line {
            depth: 0,
            text: String::new(),
        });
    }

    /// Runs `f` one level deeper.
    pub fn indented<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.depth += 1;
        let out = f(self);
        self.depth -= 1;
        out
    }

    /// Number of lines written so far.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Returns `true` if nothing was written.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Inserts the lines of `other` before line `index`, keeping their
    /// relative depth.
    pub fn insert_lines_at(&mut self, index: usize, other: &TextBuffer) {
        let at = index.min(self.lines.len());
        self.lines.splice(at..at, other.lines.iter().cloned());
    }

    /// Appends the lines of `other` at the current depth.
    pub fn push_block(&mut self, other: &TextBuffer) {
        let depth = self.depth;
        self.lines.extend(other.lines.iter().map(|l| Line {
            depth: l.depth + depth,
            text: l.text.clone(),
        }));
    }

    /// Renders the buffer with a trailing newline after every line.
    pub fn finish(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TextBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            if !line.text.is_empty() {
                write!(f, "{:1$}", "", line.depth * self.width)?;
                f.write_str(&line.text)?;
            }
            f.write_str("\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indentation_is_scoped() {
        let mut buf = TextBuffer::new();
        buf.line("void main() {");
        buf.indented(|buf| {
            buf.line("if (x) {");
            buf.indented(|buf| buf.line("return;"));
            buf.line("}");
        });
        buf.line("}");
        assert_eq!(
            buf.finish(),
            "void main() {\n  if (x) {\n    return;\n  }\n}\n"
        );
    }

    #[test]
    fn blank_lines_carry_no_indent() {
        let mut buf = TextBuffer::with_indent_width(4);
        buf.indented(|buf| {
            buf.line("a");
            buf.blank();
            buf.line("b");
        });
        assert_eq!(buf.finish(), "    a\n\n    b\n");
    }

    #[test]
    fn splicing_keeps_relative_depth() {
        let mut helper = TextBuffer::new();
        helper.line("int f() {");
        helper.indented(|b| b.line("return 1;"));
        helper.line("}");

        let mut main = TextBuffer::new();
        main.line("#version 310 es");
        main.line("void main() {");
        main.line("}");
        main.insert_lines_at(1, &helper);
        assert_eq!(main.len(), 6);
        assert_eq!(
            main.finish(),
            "#version 310 es\nint f() {\n  return 1;\n}\nvoid main() {\n}\n"
        );

        let mut nested = TextBuffer::new();
        nested.indented(|b| b.push_block(&helper));
        assert_eq!(nested.finish(), "  int f() {\n    return 1;\n  }\n");
    }
}
