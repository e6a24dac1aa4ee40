//! Stage one: raw source text → ordered single-statement sublines.
//!
//! The normalizer drops comment lines, hoists quoted string literals into
//! synthetic root-context variables (so later operator scanning never looks
//! inside a string), splits on the statement terminator, and finally splits
//! construct headers off any text that follows them on the same statement.

use std::cell::{Cell, RefCell};

use crate::error::Error;
use crate::runtime::context::Context;
use crate::runtime::value::{Value, decode_escapes};
use crate::syntax::descriptor::{Anchor, Syntax, find_token};

/// One logical statement tagged with the physical line it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Subline {
    pub line: usize,
    pub text: String,
}

/// Allocates a fresh synthetic variable name. `__s` bindings carry hoisted
/// strings, `__v` bindings carry deferred sub-expressions.
pub(crate) fn fresh_name(seq: &Cell<u32>, prefix: &str) -> String {
    let n = seq.get();
    seq.set(n + 1);
    format!("{prefix}{n}")
}

pub struct Normalizer<'a> {
    syntax: &'a Syntax,
    root: &'a RefCell<Context>,
    seq: &'a Cell<u32>,
}

impl<'a> Normalizer<'a> {
    pub fn new(syntax: &'a Syntax, root: &'a RefCell<Context>, seq: &'a Cell<u32>) -> Self {
        Self { syntax, root, seq }
    }

    pub fn run(&self, source: &str) -> Result<Vec<Subline>, Error> {
        let text = source.replace("\r\n", "\n").replace('\r', "\n");
        let mut out = Vec::new();
        for (idx, raw) in text.split('\n').enumerate() {
            let number = idx + 1;
            let line = raw.trim();
            if line.is_empty() || self.is_comment(line) {
                continue;
            }
            let hoisted = self.hoist_strings(number, line)?;
            for piece in hoisted.split(self.syntax.separator) {
                let piece = piece.trim();
                if piece.is_empty() {
                    continue;
                }
                for stmt in self.split_headers(piece) {
                    out.push(Subline { line: number, text: stmt });
                }
            }
        }
        Ok(out)
    }

    fn is_comment(&self, line: &str) -> bool {
        self.syntax.comment.iter().any(|m| line.starts_with(m.as_str()))
    }

    /// Replace every quoted literal with a fresh `__sN` variable bound in the
    /// root context. A quote of the other kind is plain data inside a string;
    /// a backslash keeps the following character from closing it.
    fn hoist_strings(&self, number: usize, line: &str) -> Result<String, Error> {
        let mut out = String::with_capacity(line.len());
        let mut literal = String::new();
        let mut open: Option<char> = None;
        let mut chars = line.chars();
        while let Some(ch) = chars.next() {
            match open {
                None => {
                    if ch == '\'' || ch == '"' {
                        open = Some(ch);
                        literal.clear();
                    } else {
                        out.push(ch);
                    }
                }
                Some(q) => {
                    if ch == '\\' {
                        literal.push('\\');
                        if let Some(next) = chars.next() {
                            literal.push(next);
                        }
                    } else if ch == q {
                        let name = fresh_name(self.seq, "__s");
                        self.root
                            .borrow_mut()
                            .set_var(name.clone(), Value::Str(decode_escapes(&literal)));
                        out.push_str(&name);
                        open = None;
                    } else {
                        literal.push(ch);
                    }
                }
            }
        }
        if open.is_some() {
            return Err(Error::syntax(number, line, "unterminated string literal"));
        }
        Ok(out)
    }

    /// Split construct headers off trailing text so the parser always sees a
    /// header, an end marker, or a plain statement — never a mix.
    fn split_headers(&self, stmt: &str) -> Vec<String> {
        let stmt = stmt.trim();
        if stmt.is_empty() {
            return Vec::new();
        }
        let markers = self.syntax.construct_markers();

        // a whole-statement marker splits nothing
        if markers.iter().any(|m| m.matches_exact(stmt)) {
            return vec![stmt.to_string()];
        }

        // open … close header pairs split after the close token
        for m in &markers {
            if let Anchor::Around(close) = &m.anchor {
                if let Some(rest) = stmt.strip_prefix(m.text.as_str()) {
                    if let Some(i) = find_token(rest, close) {
                        let cut = m.text.len() + i + close.len();
                        let mut parts = vec![stmt[..cut].trim().to_string()];
                        parts.extend(self.split_headers(&stmt[cut..]));
                        return parts;
                    }
                }
            }
        }

        // earliest suffix/exact marker occurrence; longer token wins a tie
        let mut best: Option<(usize, &crate::syntax::descriptor::Marker)> = None;
        for m in &markers {
            if !matches!(m.anchor, Anchor::End | Anchor::Exact) {
                continue;
            }
            if let Some(i) = find_token(stmt, &m.text) {
                let better = match best {
                    None => true,
                    Some((bi, bm)) => i < bi || (i == bi && m.text.len() > bm.text.len()),
                };
                if better {
                    best = Some((i, m));
                }
            }
        }
        let Some((i, m)) = best else {
            return vec![stmt.to_string()];
        };
        let end = i + m.text.len();
        if end == stmt.len() && matches!(m.anchor, Anchor::End) {
            // a complete header: condition + begin marker
            return vec![stmt.to_string()];
        }
        match m.anchor {
            Anchor::End => {
                // begin marker: text before it is the header content
                let mut parts = vec![stmt[..end].trim().to_string()];
                parts.extend(self.split_headers(&stmt[end..]));
                parts
            }
            Anchor::Exact => {
                // stand-alone marker with surrounding text
                let mut parts = Vec::new();
                if !stmt[..i].trim().is_empty() {
                    parts.extend(self.split_headers(&stmt[..i]));
                }
                parts.push(m.text.clone());
                parts.extend(self.split_headers(&stmt[end..]));
                parts
            }
            _ => vec![stmt.to_string()],
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn normalize(src: &str) -> Vec<(usize, String)> {
        let syntax = Syntax::compact();
        let root = RefCell::new(Context::new());
        let seq = Cell::new(0);
        Normalizer::new(&syntax, &root, &seq)
            .run(src)
            .unwrap()
            .into_iter()
            .map(|s| (s.line, s.text))
            .collect()
    }

    fn normalize_with_context(src: &str) -> (Vec<String>, Context) {
        let syntax = Syntax::compact();
        let root = RefCell::new(Context::new());
        let seq = Cell::new(0);
        let stmts = Normalizer::new(&syntax, &root, &seq)
            .run(src)
            .unwrap()
            .into_iter()
            .map(|s| s.text)
            .collect();
        (stmts, root.into_inner())
    }

    #[test]
    fn lines_become_statements_with_numbers() {
        let out = normalize("x = 1\n\ny = 2");
        assert_eq!(out, vec![(1, "x = 1".into()), (3, "y = 2".into())]);
    }

    #[test]
    fn separator_splits_within_a_line() {
        let out = normalize("x = 1; y = 2");
        assert_eq!(out, vec![(1, "x = 1".into()), (1, "y = 2".into())]);
    }

    #[test]
    fn comment_lines_are_dropped() {
        let out = normalize("// top\nx = 1\n-- note\ny = 2");
        assert_eq!(out, vec![(2, "x = 1".into()), (4, "y = 2".into())]);
    }

    #[test]
    fn crlf_normalizes() {
        let out = normalize("x = 1\r\ny = 2\rz = 3");
        assert_eq!(out.len(), 3);
        assert_eq!(out[2], (3, "z = 3".into()));
    }

    #[test]
    fn string_literals_are_hoisted() {
        let (stmts, ctx) = normalize_with_context("x = \"a & b\"");
        assert_eq!(stmts, vec!["x = __s0".to_string()]);
        assert_eq!(ctx.var("__s0"), Some(&Value::Str("a & b".into())));
    }

    #[test]
    fn other_quote_kind_is_data() {
        let (_, ctx) = normalize_with_context(r#"x = "it's fine""#);
        assert_eq!(ctx.var("__s0"), Some(&Value::Str("it's fine".into())));
    }

    #[test]
    fn escaped_quote_does_not_close() {
        let (_, ctx) = normalize_with_context(r#"x = "say \"hi\"""#);
        assert_eq!(ctx.var("__s0"), Some(&Value::Str("say \"hi\"".into())));
    }

    #[test]
    fn escapes_decode_in_order() {
        let (_, ctx) = normalize_with_context(r#"x = "a\tb\nc""#);
        assert_eq!(ctx.var("__s0"), Some(&Value::Str("a\tb\nc".into())));
    }

    #[test]
    fn unterminated_string_is_fatal() {
        let syntax = Syntax::compact();
        let root = RefCell::new(Context::new());
        let seq = Cell::new(0);
        let err = Normalizer::new(&syntax, &root, &seq)
            .run("x = 1\ny = \"oops")
            .unwrap_err();
        match err {
            Error::Syntax { line, .. } => assert_eq!(line, 2),
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    // ── header splitting ─────────────────────────────────────────────────────

    #[test]
    fn header_splits_off_same_line_body() {
        let out = normalize("x < 10 ? y = 1");
        assert_eq!(
            out,
            vec![(1, "x < 10 ?".into()), (1, "y = 1".into())]
        );
    }

    #[test]
    fn complete_header_is_untouched() {
        let out = normalize("x < 10 ?");
        assert_eq!(out, vec![(1, "x < 10 ?".into())]);
    }

    #[test]
    fn else_arm_splits_before_and_after() {
        let out = normalize("?? y = 3");
        assert_eq!(out, vec![(1, "??".into()), (1, "y = 3".into())]);
    }

    #[test]
    fn elseif_header_keeps_its_close_token() {
        let out = normalize("? x > 5 ? y = 2");
        assert_eq!(out, vec![(1, "? x > 5 ?".into()), (1, "y = 2".into())]);
    }

    #[test]
    fn catch_marker_detaches_from_surrounding_text() {
        let out = normalize("risky() ^^ handled = 1");
        assert_eq!(
            out,
            vec![(1, "risky()".into()), (1, "^^".into()), (1, "handled = 1".into())]
        );
    }

    #[test]
    fn loop_one_liner() {
        let out = normalize("outer: x < 3 @ x = x + 1; @");
        assert_eq!(
            out,
            vec![
                (1, "outer: x < 3 @".into()),
                (1, "x = x + 1".into()),
                (1, "@".into()),
            ]
        );
    }

    #[test]
    fn keyword_syntax_leaves_plain_statements_alone() {
        let syntax = Syntax::keyword();
        let root = RefCell::new(Context::new());
        let seq = Cell::new(0);
        let out = Normalizer::new(&syntax, &root, &seq)
            .run("if x < 10\nresult = else_val\nend if")
            .unwrap();
        let texts: Vec<&str> = out.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["if x < 10", "result = else_val", "end if"]);
    }
}
