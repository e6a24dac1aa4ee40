//! Stage two: normalized statements → the statement tree.
//!
//! Dispatch per statement runs in a fixed priority order against the active
//! syntax descriptor: return, if-group, loop, function, try, assignment,
//! import, continue/break, bare expression. Block constructs collect their
//! bodies with a per-construct depth counter so same-kind nesting never
//! closes an outer block early.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::Error;
use crate::runtime::context::Context;
use crate::syntax::ast::{Element, Function, IfArm, LineDetail, Script};
use crate::syntax::descriptor::Syntax;
use crate::syntax::expr::ExprParser;
use crate::syntax::normalizer::{Normalizer, Subline};

pub struct Parser<'a> {
    syntax: &'a Syntax,
    root: &'a RefCell<Context>,
    seq: Cell<u32>,
}

impl<'a> Parser<'a> {
    pub fn new(syntax: &'a Syntax, root: &'a RefCell<Context>) -> Self {
        Self { syntax, root, seq: Cell::new(0) }
    }

    pub fn parse(&self, source: &str) -> Result<Script, Error> {
        let stmts = Normalizer::new(self.syntax, self.root, &self.seq).run(source)?;
        let body = self.parse_block(&stmts)?;
        Ok(Script { body })
    }

    fn parse_block(&self, stmts: &[Subline]) -> Result<Element, Error> {
        let mut children = Vec::new();
        let mut i = 0;
        while i < stmts.len() {
            let (el, next) = self.parse_statement(stmts, i)?;
            children.push(el);
            i = next;
        }
        Ok(Element::Block { children })
    }

    /// Dispatch one statement; returns the node and the index after it.
    fn parse_statement(&self, stmts: &[Subline], i: usize) -> Result<(Element, usize), Error> {
        let stmt = &stmts[i];
        let text = stmt.text.as_str();
        let line = LineDetail::new(stmt.line, text);
        let syn = self.syntax;

        if let Some(rest) = syn.return_marker.apply(text) {
            let value = if rest.is_empty() {
                None
            } else {
                Some(Box::new(self.expr(&line, rest)?))
            };
            return Ok((Element::Return { line, value }, i + 1));
        }

        if let Some(cond) = syn.if_begin.apply(text) {
            if !cond.is_empty() && !self.is_closing(text) {
                return self.parse_if(stmts, i, cond);
            }
        }

        let (label, unlabeled) = self.split_label(text);
        if let Some(cond) = syn.loop_begin.apply(unlabeled) {
            if !cond.is_empty() && !self.is_closing(unlabeled) {
                return self.parse_loop(stmts, i, label, cond);
            }
        }

        if let Some(header) = syn.function_begin.apply(text) {
            if !header.is_empty() && !self.is_closing(text) {
                return self.parse_function(stmts, i, header);
            }
        }

        if let Some(err_var) = syn.try_begin.apply(text) {
            if !err_var.is_empty() && !self.is_closing(text) {
                return self.parse_try(stmts, i, err_var);
            }
        }

        if let Some(node) = self.parse_assignment(&line, text)? {
            return Ok((node, i + 1));
        }

        if let Some(path) = syn.import_marker.apply(text) {
            if self.is_import_path(path) {
                return Ok((Element::Import { line, path: path.to_string() }, i + 1));
            }
        }

        // continue first: its marker extends the break marker in the compact grammar
        if let Some(rest) = syn.continue_marker.apply(text) {
            let label = self.optional_label(&line, rest)?;
            return Ok((Element::Continue { line, label }, i + 1));
        }
        if let Some(rest) = syn.break_marker.apply(text) {
            let label = self.optional_label(&line, rest)?;
            return Ok((Element::Break { line, label }, i + 1));
        }

        if self.is_closing(text) || syn.try_end.matches_exact(text) || syn.if_end.matches_exact(text)
        {
            return Err(Error::syntax(
                line.number,
                text,
                format!("`{text}` without an open block"),
            ));
        }

        Ok((self.expr(&line, text)?, i + 1))
    }

    /// Markers that can only continue or close an already-open construct.
    fn is_closing(&self, text: &str) -> bool {
        self.syntax
            .closing_markers()
            .iter()
            .any(|m| m.matches_exact(text))
            || self.syntax.if_else_if.apply(text).is_some()
    }

    // ─── If group ────────────────────────────────────────────────────────────

    fn parse_if(
        &self,
        stmts: &[Subline],
        i: usize,
        first_cond: &str,
    ) -> Result<(Element, usize), Error> {
        let open = &stmts[i];
        let mut arms: Vec<(LineDetail, Option<String>, Vec<Subline>)> = vec![(
            LineDetail::new(open.line, open.text.as_str()),
            Some(first_cond.to_string()),
            Vec::new(),
        )];
        let mut depth = 0usize;
        let mut j = i + 1;
        loop {
            let Some(s) = stmts.get(j) else {
                return Err(Error::syntax(open.line, &open.text, "unterminated if block"));
            };
            let t = s.text.as_str();
            match self.classify_if(t) {
                IfKind::End if depth == 0 => {
                    j += 1;
                    break;
                }
                IfKind::End => {
                    depth -= 1;
                    arms.last_mut().unwrap().2.push(s.clone());
                }
                IfKind::Else if depth == 0 => {
                    arms.push((LineDetail::new(s.line, t), None, Vec::new()));
                }
                IfKind::ElseIf(cond) if depth == 0 => {
                    arms.push((LineDetail::new(s.line, t), Some(cond), Vec::new()));
                }
                IfKind::Begin => {
                    depth += 1;
                    arms.last_mut().unwrap().2.push(s.clone());
                }
                _ => arms.last_mut().unwrap().2.push(s.clone()),
            }
            j += 1;
        }
        let mut built = Vec::new();
        for (line, cond, body) in arms {
            let condition = match &cond {
                Some(c) => Some(self.expr(&line, c)?),
                None => None,
            };
            built.push(IfArm { line, condition, body: self.parse_block(&body)? });
        }
        Ok((Element::IfGroup { arms: built }, j))
    }

    fn classify_if(&self, t: &str) -> IfKind {
        let syn = self.syntax;
        if syn.if_end.matches_exact(t) {
            return IfKind::End;
        }
        if syn.if_else.matches_exact(t) {
            return IfKind::Else;
        }
        if let Some(c) = syn.if_else_if.apply(t) {
            if !c.is_empty() {
                return IfKind::ElseIf(c.to_string());
            }
        }
        if let Some(c) = syn.if_begin.apply(t) {
            if !c.is_empty() {
                return IfKind::Begin;
            }
        }
        IfKind::Other
    }

    // ─── Loop ────────────────────────────────────────────────────────────────

    fn parse_loop(
        &self,
        stmts: &[Subline],
        i: usize,
        label: Option<String>,
        cond: &str,
    ) -> Result<(Element, usize), Error> {
        let open = &stmts[i];
        let line = LineDetail::new(open.line, open.text.as_str());
        let (body, j) = self.collect_simple(
            stmts,
            i,
            "unterminated loop block",
            |t| {
                let (_, unlabeled) = self.split_label(t);
                self.syntax
                    .loop_begin
                    .apply(unlabeled)
                    .is_some_and(|c| !c.is_empty() && !self.is_closing(unlabeled))
            },
            |t| self.syntax.loop_end.matches_exact(t),
        )?;
        let condition = Box::new(self.expr(&line, cond)?);
        let body = Box::new(self.parse_block(&body)?);
        Ok((Element::Loop { line, label, condition, body }, j))
    }

    // ─── Function ────────────────────────────────────────────────────────────

    fn parse_function(
        &self,
        stmts: &[Subline],
        i: usize,
        header: &str,
    ) -> Result<(Element, usize), Error> {
        let open = &stmts[i];
        let line = LineDetail::new(open.line, open.text.as_str());
        let (name, params) = self.parse_function_header(&line, header)?;
        let (body, j) = self.collect_simple(
            stmts,
            i,
            "unterminated function block",
            |t| {
                self.syntax
                    .function_begin
                    .apply(t)
                    .is_some_and(|h| !h.is_empty() && !self.is_closing(t))
            },
            |t| self.syntax.function_end.matches_exact(t),
        )?;
        let body = self.parse_block(&body)?;
        let function = Rc::new(Function { name, params, body, line: line.clone() });
        // functions hoist to the script, not to their lexical position
        self.root.borrow_mut().set_func(function.clone());
        Ok((Element::FunctionDef { line, function }, j))
    }

    /// `name(a, b)`, `name a b`, `name(a b)` — comma- or space-separated
    /// parameters, parentheses optional.
    fn parse_function_header(
        &self,
        line: &LineDetail,
        header: &str,
    ) -> Result<(String, Vec<String>), Error> {
        let header = header.trim();
        let split = header
            .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .unwrap_or(header.len());
        let name = &header[..split];
        if !self.syntax.is_identifier(name) {
            return Err(Error::syntax(line.number, &line.text, "invalid function name"));
        }
        let mut rest = header[split..].trim();
        if let Some(stripped) = rest.strip_prefix(self.syntax.call_open) {
            rest = stripped
                .strip_suffix(self.syntax.call_close)
                .ok_or_else(|| {
                    Error::syntax(line.number, &line.text, "unterminated parameter list")
                })?
                .trim();
        }
        let params: Vec<String> = if rest.is_empty() {
            Vec::new()
        } else if rest.contains(self.syntax.call_separator) {
            rest.split(self.syntax.call_separator)
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect()
        } else {
            rest.split_whitespace().map(str::to_string).collect()
        };
        for p in &params {
            if !self.syntax.is_identifier(p) {
                return Err(Error::syntax(
                    line.number,
                    &line.text,
                    format!("invalid parameter name `{p}`"),
                ));
            }
        }
        Ok((name.to_string(), params))
    }

    // ─── Try / catch / finally ───────────────────────────────────────────────

    fn parse_try(
        &self,
        stmts: &[Subline],
        i: usize,
        err_var: &str,
    ) -> Result<(Element, usize), Error> {
        let open = &stmts[i];
        let line = LineDetail::new(open.line, open.text.as_str());
        if !self.syntax.is_identifier(err_var) {
            return Err(Error::syntax(line.number, &line.text, "invalid error variable name"));
        }
        let syn = self.syntax;
        let mut sections: [Vec<Subline>; 3] = [Vec::new(), Vec::new(), Vec::new()];
        let mut section = 0usize;
        let mut depth = 0usize;
        let mut j = i + 1;
        loop {
            let Some(s) = stmts.get(j) else {
                return Err(Error::syntax(open.line, &open.text, "unterminated try block"));
            };
            let t = s.text.as_str();
            if syn.try_end.matches_exact(t) {
                if depth == 0 {
                    j += 1;
                    break;
                }
                depth -= 1;
                sections[section].push(s.clone());
            } else if depth == 0 && syn.try_catch.matches_exact(t) {
                section = 1;
            } else if depth == 0 && syn.try_finally.matches_exact(t) {
                section = 2;
            } else if syn
                .try_begin
                .apply(t)
                .is_some_and(|v| !v.is_empty() && !self.is_closing(t))
            {
                depth += 1;
                sections[section].push(s.clone());
            } else {
                sections[section].push(s.clone());
            }
            j += 1;
        }
        let [try_body, catch_body, finally_body] = sections;
        Ok((
            Element::TryCatch {
                line,
                error_var: err_var.to_string(),
                body: Box::new(self.parse_block(&try_body)?),
                catch: Box::new(self.parse_block(&catch_body)?),
                finally: Box::new(self.parse_block(&finally_body)?),
            },
            j,
        ))
    }

    // ─── Assignment ──────────────────────────────────────────────────────────

    /// A statement with a top-level assignment marker. Compound forms
    /// (`x += 1`) rewrite to `x = x + (rhs)`; multi-target forms
    /// (`a, b = e`) compile to `a = e` followed by `b = a` so the
    /// expression evaluates once. A left side that does not validate as
    /// targets falls through to expression parsing.
    fn parse_assignment(
        &self,
        line: &LineDetail,
        text: &str,
    ) -> Result<Option<Element>, Error> {
        let eq = self.syntax.operators.eq.as_str();
        let Some(pos) = self.find_assignment_marker(text) else {
            return Ok(None);
        };
        let lhs = text[..pos].trim();
        let rhs = text[pos + eq.len()..].trim();

        // compound assignment: the key ends in an arithmetic operator
        for tok in self.syntax.operators.arithmetic() {
            if let Some(base) = lhs.strip_suffix(tok) {
                let base = base.trim();
                if !self.is_target(base) {
                    return Ok(None);
                }
                let rewritten = format!(
                    "{base} {tok} {}{rhs}{}",
                    self.syntax.call_open, self.syntax.call_close
                );
                let value = Box::new(self.expr(line, &rewritten)?);
                return Ok(Some(Element::Variable {
                    line: line.clone(),
                    key: base.to_string(),
                    value,
                }));
            }
        }

        let targets: Vec<&str> = text[..pos]
            .split(self.syntax.call_separator)
            .map(str::trim)
            .collect();
        if targets.is_empty() || !targets.iter().all(|t| self.is_target(t)) {
            return Ok(None);
        }
        let first = targets[0];
        let value = Box::new(self.expr(line, rhs)?);
        if targets.len() == 1 {
            return Ok(Some(Element::Variable {
                line: line.clone(),
                key: first.to_string(),
                value,
            }));
        }
        let mut children = vec![Element::Variable {
            line: line.clone(),
            key: first.to_string(),
            value,
        }];
        for t in &targets[1..] {
            children.push(Element::Variable {
                line: line.clone(),
                key: (*t).to_string(),
                value: Box::new(Element::Command {
                    line: line.clone(),
                    text: first.to_string(),
                    literal: None,
                }),
            });
        }
        Ok(Some(Element::Block { children }))
    }

    /// First assignment marker not embedded in a compound relational token.
    fn find_assignment_marker(&self, text: &str) -> Option<usize> {
        let eq = self.syntax.operators.eq.as_str();
        let mut from = 0;
        while let Some(off) = text[from..].find(eq) {
            let i = from + off;
            let masked = text[..i]
                .chars()
                .last()
                .is_some_and(|c| c == '!' || c == '<' || c == '>');
            if !masked {
                return Some(i);
            }
            from = i + eq.len();
        }
        None
    }

    /// An assignment target: an identifier, optionally root-prefixed.
    fn is_target(&self, t: &str) -> bool {
        let t = t.strip_prefix(self.syntax.root_prefix.as_str()).unwrap_or(t);
        self.syntax.is_identifier(t)
    }

    // ─── Small helpers ───────────────────────────────────────────────────────

    /// Depth-tracked collection for single-body constructs (loop, function).
    fn collect_simple(
        &self,
        stmts: &[Subline],
        i: usize,
        unterminated: &str,
        is_begin: impl Fn(&str) -> bool,
        is_end: impl Fn(&str) -> bool,
    ) -> Result<(Vec<Subline>, usize), Error> {
        let open = &stmts[i];
        let mut body = Vec::new();
        let mut depth = 0usize;
        let mut j = i + 1;
        loop {
            let Some(s) = stmts.get(j) else {
                return Err(Error::syntax(open.line, &open.text, unterminated));
            };
            let t = s.text.as_str();
            if is_end(t) {
                if depth == 0 {
                    return Ok((body, j + 1));
                }
                depth -= 1;
                body.push(s.clone());
            } else {
                if is_begin(t) {
                    depth += 1;
                }
                body.push(s.clone());
            }
            j += 1;
        }
    }

    /// `label:` prefix on a loop header.
    fn split_label<'t>(&self, text: &'t str) -> (Option<String>, &'t str) {
        if let Some(i) = text.find(self.syntax.label_suffix) {
            let head = text[..i].trim();
            if self.syntax.is_identifier(head) {
                return (Some(head.to_string()), text[i + 1..].trim_start());
            }
        }
        (None, text)
    }

    fn optional_label(&self, line: &LineDetail, rest: &str) -> Result<Option<String>, Error> {
        let rest = rest.trim();
        if rest.is_empty() {
            return Ok(None);
        }
        if !self.syntax.is_identifier(rest) {
            return Err(Error::syntax(line.number, &line.text, format!("invalid label `{rest}`")));
        }
        Ok(Some(rest.to_string()))
    }

    fn is_import_path(&self, path: &str) -> bool {
        !path.is_empty()
            && path
                .split('.')
                .all(|seg| self.syntax.is_identifier(seg))
    }

    fn expr(&self, line: &LineDetail, text: &str) -> Result<Element, Error> {
        ExprParser::new(self.syntax, self.root, &self.seq, line).parse(text)
    }
}

enum IfKind {
    End,
    Else,
    ElseIf(String),
    Begin,
    Other,
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(src: &str) -> (Script, Context) {
        let syntax = Syntax::compact();
        let root = RefCell::new(Context::new());
        let script = Parser::new(&syntax, &root)
            .parse(src)
            .unwrap_or_else(|e| panic!("parse failed: {e}"));
        (script, root.into_inner())
    }

    fn parse_err(src: &str) -> Error {
        let syntax = Syntax::compact();
        let root = RefCell::new(Context::new());
        match Parser::new(&syntax, &root).parse(src) {
            Ok(_) => panic!("expected parse error"),
            Err(e) => e,
        }
    }

    fn children(script: &Script) -> &[Element] {
        match &script.body {
            Element::Block { children } => children,
            other => panic!("expected Block, got {other:?}"),
        }
    }

    #[test]
    fn assignment_builds_variable_node() {
        let (s, _) = parse("x = 1 + 2");
        match &children(&s)[0] {
            Element::Variable { key, .. } => assert_eq!(key, "x"),
            other => panic!("expected Variable, got {other:?}"),
        }
    }

    #[test]
    fn root_prefixed_key_is_kept_verbatim() {
        let (s, _) = parse(".x = 1");
        match &children(&s)[0] {
            Element::Variable { key, .. } => assert_eq!(key, ".x"),
            other => panic!("expected Variable, got {other:?}"),
        }
    }

    #[test]
    fn multi_target_assignment_expands() {
        let (s, _) = parse("a, b = 5");
        match &children(&s)[0] {
            Element::Block { children } => {
                assert_eq!(children.len(), 2);
                match (&children[0], &children[1]) {
                    (
                        Element::Variable { key: k0, .. },
                        Element::Variable { key: k1, value, .. },
                    ) => {
                        assert_eq!(k0, "a");
                        assert_eq!(k1, "b");
                        // second target reads the first, not the expression
                        match value.as_ref() {
                            Element::Command { text, .. } => assert_eq!(text, "a"),
                            other => panic!("expected Command, got {other:?}"),
                        }
                    }
                    other => panic!("expected two Variables, got {other:?}"),
                }
            }
            other => panic!("expected Block, got {other:?}"),
        }
    }

    #[test]
    fn if_group_collects_arms_in_order() {
        let (s, _) = parse("x = 1\nx = 1 ?\n y = 1\n? x = 2 ?\n y = 2\n??\n y = 3\n?");
        match &children(&s)[1] {
            Element::IfGroup { arms } => {
                assert_eq!(arms.len(), 3);
                assert!(arms[0].condition.is_some());
                assert!(arms[1].condition.is_some());
                assert!(arms[2].condition.is_none());
            }
            other => panic!("expected IfGroup, got {other:?}"),
        }
    }

    #[test]
    fn nested_if_does_not_close_outer() {
        let (s, _) = parse("x = 1 ?\n y = 2 ?\n  z = 1\n ?\n w = 1\n?");
        match &children(&s)[0] {
            Element::IfGroup { arms } => {
                assert_eq!(arms.len(), 1);
                match &arms[0].body {
                    Element::Block { children } => assert_eq!(children.len(), 2),
                    other => panic!("expected Block body, got {other:?}"),
                }
            }
            other => panic!("expected IfGroup, got {other:?}"),
        }
    }

    #[test]
    fn loop_captures_label() {
        let (s, _) = parse("outer: x < 3 @\n x = x + 1\n@");
        match &children(&s)[0] {
            Element::Loop { label, .. } => assert_eq!(label.as_deref(), Some("outer")),
            other => panic!("expected Loop, got {other:?}"),
        }
    }

    #[test]
    fn function_hoists_into_root_table() {
        let (s, ctx) = parse("add(a, b) #\n ~ a + b\n#");
        assert!(matches!(children(&s)[0], Element::FunctionDef { .. }));
        let f = ctx.func("add").expect("function registered");
        assert_eq!(f.params, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn function_header_space_separated_params() {
        let (_, ctx) = parse("add a b #\n ~ a + b\n#");
        assert_eq!(ctx.func("add").unwrap().params.len(), 2);
    }

    #[test]
    fn function_header_parens_space_separated() {
        let (_, ctx) = parse("add(a b) #\n ~ a + b\n#");
        assert_eq!(ctx.func("add").unwrap().params.len(), 2);
    }

    #[test]
    fn try_sections_split() {
        let (s, _) = parse("e ^\n x = 1\n^^\n y = 2\n^^^\n z = 3\n^");
        match &children(&s)[0] {
            Element::TryCatch { error_var, body, catch, finally, .. } => {
                assert_eq!(error_var, "e");
                for (b, n) in [(body, 1), (catch, 1), (finally, 1)] {
                    match b.as_ref() {
                        Element::Block { children } => assert_eq!(children.len(), n),
                        other => panic!("expected Block, got {other:?}"),
                    }
                }
            }
            other => panic!("expected TryCatch, got {other:?}"),
        }
    }

    #[test]
    fn import_statement() {
        let (s, _) = parse("$host.math");
        match &children(&s)[0] {
            Element::Import { path, .. } => assert_eq!(path, "host.math"),
            other => panic!("expected Import, got {other:?}"),
        }
    }

    #[test]
    fn break_and_continue_with_labels() {
        let (s, _) = parse("x < 1 @\n !! outer\n !!!\n@");
        match &children(&s)[0] {
            Element::Loop { body, .. } => match body.as_ref() {
                Element::Block { children } => {
                    assert!(
                        matches!(&children[0], Element::Break { label: Some(l), .. } if l == "outer")
                    );
                    assert!(matches!(&children[1], Element::Continue { label: None, .. }));
                }
                other => panic!("expected Block, got {other:?}"),
            },
            other => panic!("expected Loop, got {other:?}"),
        }
    }

    #[test]
    fn bare_return() {
        let (s, _) = parse("~");
        assert!(matches!(&children(&s)[0], Element::Return { value: None, .. }));
    }

    #[test]
    fn unterminated_loop_is_fatal() {
        let err = parse_err("x < 3 @\n x = 1");
        match err {
            Error::Syntax { line, message, .. } => {
                assert_eq!(line, 1);
                assert!(message.contains("unterminated"));
            }
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn stray_end_marker_is_fatal() {
        assert!(matches!(parse_err("?"), Error::Syntax { .. }));
        assert!(matches!(parse_err("??"), Error::Syntax { .. }));
    }

    #[test]
    fn keyword_grammar_parses_the_same_shapes() {
        let syntax = Syntax::keyword();
        let root = RefCell::new(Context::new());
        let script = Parser::new(&syntax, &root)
            .parse("if x < 10\n y = 1\nelseif x < 20\n y = 2\nelse\n y = 3\nend if")
            .unwrap_or_else(|e| panic!("parse failed: {e}"));
        match &script.body {
            Element::Block { children } => match &children[0] {
                Element::IfGroup { arms } => assert_eq!(arms.len(), 3),
                other => panic!("expected IfGroup, got {other:?}"),
            },
            other => panic!("expected Block, got {other:?}"),
        }
    }

    #[test]
    fn expression_statement_with_masked_equality() {
        // `!=` must not be read as an assignment to an invalid target
        let (s, _) = parse("f(a != b)");
        assert!(matches!(&children(&s)[0], Element::Command { .. }));
    }
}
