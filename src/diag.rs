//! Diagnostics: accumulation and ANSI rendering.
//!
//! Semantic errors do not abort the parse; they are collected here and the
//! error flag suppresses artifact output at the end. Rendering follows the
//! `line:col:` + red label + source excerpt with the offending span
//! underlined in yellow.

use colored::Colorize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub label: &'static str,
    pub message: String,
    pub line: usize,
    pub col: usize,
    /// Length of the underlined span in the excerpt, 0 for no excerpt.
    pub span_len: usize,
}

pub struct Diagnostics {
    list: Vec<Diagnostic>,
    /// Source split into lines, for excerpts.
    lines: Vec<String>,
    color: bool,
    error_flag: bool,
}

impl Diagnostics {
    pub fn new(source: &str, color: bool) -> Self {
        Diagnostics {
            list: Vec::new(),
            lines: source.lines().map(|l| l.to_string()).collect(),
            color,
            error_flag: false,
        }
    }

    pub fn has_errors(&self) -> bool {
        self.error_flag
    }

    pub fn error_count(&self) -> usize {
        self.list
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.list
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count()
    }

    /// Treat accumulated warnings as fatal (the `deny_warnings` switch).
    pub fn promote_warnings(&mut self) {
        if self.warning_count() > 0 {
            self.error_flag = true;
        }
    }

    pub fn error(&mut self, line: usize, col: usize, message: impl Into<String>) {
        self.push(Diagnostic {
            severity: Severity::Error,
            label: "Error",
            message: message.into(),
            line,
            col,
            span_len: 0,
        });
    }

    pub fn warning(&mut self, line: usize, col: usize, message: impl Into<String>) {
        self.push(Diagnostic {
            severity: Severity::Warning,
            label: "Warning",
            message: message.into(),
            line,
            col,
            span_len: 0,
        });
    }

    /// A syntax error with a source excerpt underlining `span_len` columns.
    pub fn syntax_error(&mut self, line: usize, col: usize, span_len: usize, message: impl Into<String>) {
        self.push(Diagnostic {
            severity: Severity::Error,
            label: "SyntaxError",
            message: message.into(),
            line,
            col,
            span_len: span_len.max(1),
        });
    }

    fn push(&mut self, d: Diagnostic) {
        if d.severity == Severity::Error {
            self.error_flag = true;
        }
        self.list.push(d);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.list.iter()
    }

    /// Render every diagnostic to a string (one per line, excerpts inline).
    pub fn render(&self) -> String {
        let mut out = String::new();
        for d in &self.list {
            out.push_str(&self.render_one(d));
            out.push('\n');
        }
        out
    }

    fn render_one(&self, d: &Diagnostic) -> String {
        let pos = format!("{}:{}:", d.line, d.col);
        let label = format!(" {}: ", d.label);
        let mut line = if self.color {
            let colored_label = match d.severity {
                Severity::Error => label.red().to_string(),
                Severity::Warning => label.yellow().to_string(),
            };
            format!("{}{}{}", pos.bold(), colored_label, d.message)
        } else {
            format!("{}{}{}", pos, label, d.message)
        };

        if d.span_len > 0 {
            if let Some(src) = self.lines.get(d.line.saturating_sub(1)) {
                let floor = |mut i: usize| {
                    i = i.min(src.len());
                    while i > 0 && !src.is_char_boundary(i) {
                        i -= 1;
                    }
                    i
                };
                let col0 = floor(d.col.saturating_sub(1));
                let end = floor(col0 + d.span_len);
                let before = &src[..col0];
                let span = &src[col0..end];
                let after = &src[end..];
                let span_txt = if self.color {
                    span.yellow().underline().to_string()
                } else {
                    span.to_string()
                };
                line.push_str(&format!("\n     {} |{}{}{}", d.line, before, span_txt, after));
            }
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_sets_flag() {
        let mut diags = Diagnostics::new("int a;", false);
        assert!(!diags.has_errors());
        diags.error(1, 1, "boom");
        assert!(diags.has_errors());
        assert_eq!(diags.error_count(), 1);
    }

    #[test]
    fn warnings_do_not_set_flag_until_promoted() {
        let mut diags = Diagnostics::new("", false);
        diags.warning(1, 1, "shadow");
        assert!(!diags.has_errors());
        diags.promote_warnings();
        assert!(diags.has_errors());
    }

    #[test]
    fn syntax_error_renders_excerpt() {
        let mut diags = Diagnostics::new("int a = $;", false);
        diags.syntax_error(1, 9, 1, "Unexpected token $");
        let out = diags.render();
        assert!(out.contains("1:9: SyntaxError: Unexpected token $"));
        assert!(out.contains("1 |int a = $;"));
    }

    #[test]
    fn excerpt_clamps_out_of_range_spans() {
        let mut diags = Diagnostics::new("x", false);
        diags.syntax_error(1, 40, 5, "past the end");
        // must not panic, excerpt still rendered
        assert!(diags.render().contains("past the end"));
    }
}
