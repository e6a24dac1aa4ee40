//! Expression sub-parser: one expression string → an operation tree.
//!
//! Resolution happens in three layers. Parenthesized groups and call
//! argument lists are rewritten innermost-first into synthetic `__vN`
//! variables; the flattened string then splits on logical, relational and
//! finally arithmetic operators. The arithmetic layer is a two-tier splitter
//! (the high-priority operator binds only its neighboring segments), not a
//! conventional precedence climber; its splitting order is part of the
//! language's observable behavior and is locked by the tests below.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::Error;
use crate::runtime::context::Context;
use crate::runtime::value::Value;
use crate::syntax::ast::{Element, LineDetail, Op};
use crate::syntax::descriptor::{Syntax, find_token};
use crate::syntax::normalizer::fresh_name;

pub struct ExprParser<'a> {
    syntax: &'a Syntax,
    root: &'a RefCell<Context>,
    seq: &'a Cell<u32>,
    line: &'a LineDetail,
}

impl<'a> ExprParser<'a> {
    pub fn new(
        syntax: &'a Syntax,
        root: &'a RefCell<Context>,
        seq: &'a Cell<u32>,
        line: &'a LineDetail,
    ) -> Self {
        Self { syntax, root, seq, line }
    }

    /// Full entry point: resolve groups and calls, then operators.
    pub fn parse(&self, text: &str) -> Result<Element, Error> {
        let flat = self.resolve_groups(text.trim())?;
        self.condition(&flat)
    }

    // ─── Groups and calls ────────────────────────────────────────────────────

    /// Rewrite every parenthesized group and call innermost-first into a
    /// synthetic variable. Call arguments each get their own synthetic so
    /// they evaluate exactly once, left to right, at call time.
    fn resolve_groups(&self, text: &str) -> Result<String, Error> {
        let mut text = text.to_string();
        loop {
            let Some(close) = text.find(self.syntax.call_close) else {
                break;
            };
            let Some(open) = text[..close].rfind(self.syntax.call_open) else {
                return Err(self.err("unbalanced parentheses"));
            };
            let inner = text[open + 1..close].to_string();
            let name_start = callee_start(&text, open);
            let callee = text[name_start..open].to_string();
            if callee.is_empty() {
                let el = self.condition(inner.trim())?;
                let name = self.bind(el);
                text.replace_range(open..=close, &name);
            } else {
                let mut args = Vec::new();
                for arg in inner.split(self.syntax.call_separator) {
                    let arg = arg.trim();
                    if arg.is_empty() {
                        continue;
                    }
                    let el = self.condition(arg)?;
                    args.push(self.bind(el));
                }
                let call = format!(
                    "{callee}{}{}{}",
                    self.syntax.call_open,
                    args.join(&self.syntax.call_separator.to_string()),
                    self.syntax.call_close
                );
                let cmd = Element::Command {
                    line: self.line.clone(),
                    text: call,
                    literal: None,
                };
                let name = self.bind(cmd);
                text.replace_range(name_start..=close, &name);
            }
        }
        if text.contains(self.syntax.call_open) {
            return Err(self.err("unbalanced parentheses"));
        }
        Ok(text)
    }

    /// Bind a parsed sub-expression to a fresh synthetic root variable and
    /// return its name.
    fn bind(&self, el: Element) -> String {
        let name = fresh_name(self.seq, "__v");
        self.root
            .borrow_mut()
            .set_var(name.clone(), Value::Lazy(Rc::new(el)));
        name
    }

    // ─── Logical and relational layer ────────────────────────────────────────

    /// Leftmost logical operator becomes the root (AND and OR have no
    /// precedence between them); otherwise the single top-level relational
    /// operator splits; otherwise the arithmetic builder takes over.
    pub fn condition(&self, text: &str) -> Result<Element, Error> {
        let text = text.trim();
        let ops = &self.syntax.operators;

        let mut first: Option<(usize, usize, Op)> = None;
        for (tok, op) in [(ops.and.as_str(), Op::And), (ops.or.as_str(), Op::Or)] {
            if let Some(i) = find_token(text, tok) {
                if first.is_none_or(|(fi, _, _)| i < fi) {
                    first = Some((i, tok.len(), op));
                }
            }
        }
        if let Some((i, len, op)) = first {
            let left = self.condition(&text[..i])?;
            let right = self.condition(&text[i + len..])?;
            return Ok(self.operation(left, op, right));
        }

        if let Some((i, len, op)) = self.find_relational(text) {
            let left = self.value_single(&text[..i])?;
            let right = self.value_single(&text[i + len..])?;
            return Ok(self.operation(left, op, right));
        }

        self.value_single(text)
    }

    /// First relational token, longest candidate first at each position so
    /// `<=`, `>=`, `!=` mask the bare markers they contain.
    fn find_relational(&self, text: &str) -> Option<(usize, usize, Op)> {
        let ops = &self.syntax.operators;
        let cands = [
            (ops.le.as_str(), Op::Le),
            (ops.ge.as_str(), Op::Ge),
            (ops.ne.as_str(), Op::Ne),
            (ops.eq.as_str(), Op::Eq),
            (ops.lt.as_str(), Op::Lt),
            (ops.gt.as_str(), Op::Gt),
        ];
        for (i, _) in text.char_indices() {
            for (tok, op) in cands {
                if text[i..].starts_with(tok) {
                    return Some((i, tok.len(), op));
                }
            }
        }
        None
    }

    // ─── Arithmetic layer ────────────────────────────────────────────────────

    /// Two-tier arithmetic splitting. The first high-priority operator binds
    /// the segments bordering it, bounded by the nearest low-priority
    /// operators; everything else splits at the first operator and recurses
    /// on the remainder (so same-tier chains lean right: `10-2-3` is
    /// `10-(2-3)`).
    pub fn value_single(&self, text: &str) -> Result<Element, Error> {
        let text = text.trim();
        let Some((p1, len1, op1)) = self.find_arith(text, 0) else {
            return Ok(self.leaf(text));
        };
        let after1 = p1 + len1;
        if is_high(op1) {
            match self.find_low(text, after1) {
                None => {
                    let left = self.operand(&text[..p1])?;
                    let right = self.value_single(&text[after1..])?;
                    Ok(self.operation(left, op1, right))
                }
                Some((p3, len3, op3)) => {
                    let left = self.operand(&text[..p1])?;
                    let mid = self.value_single(&text[after1..p3])?;
                    let core = self.operation(left, op1, mid);
                    let rest = self.value_single(&text[p3 + len3..])?;
                    Ok(self.operation(core, op3, rest))
                }
            }
        } else {
            match self.find_high_adjacent(text, after1) {
                Some((p2, len2, op2)) => {
                    let seg = self.value_single(&text[after1..p2])?;
                    let core = match self.find_low(text, p2 + len2) {
                        None => {
                            let right = self.value_single(&text[p2 + len2..])?;
                            self.operation(seg, op2, right)
                        }
                        Some((p3, len3, op3)) => {
                            let mid = self.value_single(&text[p2 + len2..p3])?;
                            let high = self.operation(seg, op2, mid);
                            let rest = self.value_single(&text[p3 + len3..])?;
                            self.operation(high, op3, rest)
                        }
                    };
                    let left = self.operand(&text[..p1])?;
                    Ok(self.operation(left, op1, core))
                }
                None => {
                    let left = self.operand(&text[..p1])?;
                    let right = self.value_single(&text[after1..])?;
                    Ok(self.operation(left, op1, right))
                }
            }
        }
    }

    /// First arithmetic operator at or after `from`, skipping unary signs
    /// (a `+`/`-` at the start of an operand or right after another
    /// operator).
    fn find_arith(&self, text: &str, from: usize) -> Option<(usize, usize, Op)> {
        let ops = &self.syntax.operators;
        let cands = [
            (ops.add.as_str(), Op::Add),
            (ops.sub.as_str(), Op::Sub),
            (ops.mul.as_str(), Op::Mul),
            (ops.div.as_str(), Op::Div),
            (ops.rem.as_str(), Op::Rem),
        ];
        for (i, _) in text.char_indices() {
            if i < from {
                continue;
            }
            for (tok, op) in cands {
                if !text[i..].starts_with(tok) {
                    continue;
                }
                let sign = matches!(op, Op::Add | Op::Sub) && self.is_sign_position(text, i);
                if !sign {
                    return Some((i, tok.len(), op));
                }
            }
        }
        None
    }

    /// First low-priority operator at or after `from`, skipping over
    /// high-priority ones and unary signs.
    fn find_low(&self, text: &str, from: usize) -> Option<(usize, usize, Op)> {
        let mut at = from;
        while let Some((p, len, op)) = self.find_arith(text, at) {
            if !is_high(op) {
                return Some((p, len, op));
            }
            at = p + len;
        }
        None
    }

    /// First high-priority operator after `from`, but only if no
    /// low-priority operator crosses the span before it.
    fn find_high_adjacent(&self, text: &str, from: usize) -> Option<(usize, usize, Op)> {
        let (p, len, op) = self.find_arith(text, from)?;
        is_high(op).then_some((p, len, op))
    }

    fn is_sign_position(&self, text: &str, i: usize) -> bool {
        let prev = text[..i].chars().rev().find(|c| !c.is_whitespace());
        match prev {
            None => true,
            Some(c) => {
                let s = c.to_string();
                self.syntax.operators.arithmetic().contains(&s.as_str())
            }
        }
    }

    // ─── Leaves ──────────────────────────────────────────────────────────────

    fn leaf(&self, text: &str) -> Element {
        let t = text.trim();
        Element::Command {
            line: self.line.clone(),
            text: t.to_string(),
            literal: Value::literal(t, self.syntax),
        }
    }

    fn operand(&self, text: &str) -> Result<Element, Error> {
        if text.trim().is_empty() {
            return Err(self.err("missing operand"));
        }
        Ok(self.leaf(text))
    }

    fn operation(&self, left: Element, op: Op, right: Element) -> Element {
        Element::Operation {
            line: self.line.clone(),
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    fn err(&self, message: impl Into<String>) -> Error {
        Error::syntax(self.line.number, &self.line.text, message)
    }
}

fn is_high(op: Op) -> bool {
    matches!(op, Op::Mul | Op::Div | Op::Rem)
}

/// Scan back from a call opener over name characters (identifier, dots, the
/// root prefix) to find where the callee starts.
fn callee_start(text: &str, open: usize) -> usize {
    let bytes = text.as_bytes();
    let mut start = open;
    while start > 0 {
        let c = bytes[start - 1] as char;
        if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
            start -= 1;
        } else {
            break;
        }
    }
    start
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interop::NoBridge;
    use crate::runtime::interpreter::Scope;
    use crate::runtime::value::Num;
    use pretty_assertions::assert_eq;

    fn eval_expr(text: &str) -> Value {
        let syntax = Syntax::compact();
        let root = RefCell::new(Context::new());
        let seq = Cell::new(0);
        let line = LineDetail::new(1, text);
        let el = ExprParser::new(&syntax, &root, &seq, &line)
            .parse(text)
            .unwrap_or_else(|e| panic!("parse failed: {e}"));
        let scope = Scope {
            syntax: &syntax,
            current: &root,
            root: &root,
            bridge: &NoBridge,
        };
        el.eval(&scope).unwrap_or_else(|e| panic!("eval failed: {e}"))
    }

    fn int(v: &Value) -> i64 {
        match v {
            Value::Num(Num::Int(i)) => *i as i64,
            other => panic!("expected Int, got {other:?}"),
        }
    }

    // ── two-tier arithmetic: exact splits ────────────────────────────────────

    #[test]
    fn high_after_low_binds_tighter() {
        assert_eq!(int(&eval_expr("2 + 3 * 4")), 14);
    }

    #[test]
    fn high_first_binds_neighbors_only() {
        assert_eq!(int(&eval_expr("2 * 3 + 4")), 10);
    }

    #[test]
    fn high_chain_between_lows() {
        assert_eq!(int(&eval_expr("2 + 3 * 4 + 5")), 19);
        // the high chain leans right too: 1 + (2 * (3 / 6)) + 4, integer division
        assert_eq!(int(&eval_expr("1 + 2 * 3 / 6 + 4")), 5);
    }

    #[test]
    fn same_tier_chains_lean_right() {
        // legacy splitting order: 10 - (2 - 3)
        assert_eq!(int(&eval_expr("10 - 2 - 3")), 11);
        // 8 / (2 / 2)
        assert_eq!(int(&eval_expr("8 / 2 / 2")), 8);
    }

    #[test]
    fn mixed_high_chains() {
        assert_eq!(int(&eval_expr("2 * 3 - 4 * 5")), -14);
    }

    #[test]
    fn modulo_is_high_priority() {
        assert_eq!(int(&eval_expr("1 + 7 % 3")), 2);
    }

    #[test]
    fn unary_signs_are_not_split_points() {
        assert_eq!(int(&eval_expr("-5 + 3")), -2);
        assert_eq!(int(&eval_expr("2 * -3")), -6);
        assert_eq!(int(&eval_expr("1 - -2")), 3);
    }

    // ── groups and calls ─────────────────────────────────────────────────────

    #[test]
    fn groups_override_splitting() {
        assert_eq!(int(&eval_expr("(2 + 3) * 4")), 20);
        assert_eq!(int(&eval_expr("2 * (3 + 4)")), 14);
        assert_eq!(int(&eval_expr("((1 + 1))")), 2);
    }

    #[test]
    fn unbalanced_parens_error() {
        let syntax = Syntax::compact();
        let root = RefCell::new(Context::new());
        let seq = Cell::new(0);
        let line = LineDetail::new(1, "(1 + 2");
        assert!(ExprParser::new(&syntax, &root, &seq, &line).parse("(1 + 2").is_err());
        let line = LineDetail::new(1, "1 + 2)");
        assert!(ExprParser::new(&syntax, &root, &seq, &line).parse("1 + 2)").is_err());
    }

    // ── relational and logical ───────────────────────────────────────────────

    #[test]
    fn relational_boolean_results_are_numeric() {
        assert_eq!(int(&eval_expr("1 < 2")), 1);
        assert_eq!(int(&eval_expr("2 < 1")), 0);
        assert_eq!(int(&eval_expr("2 = 2")), 1);
        assert_eq!(int(&eval_expr("2 != 2")), 0);
        assert_eq!(int(&eval_expr("3 >= 3")), 1);
        assert_eq!(int(&eval_expr("3 <= 2")), 0);
    }

    #[test]
    fn compound_markers_mask_bare_ones() {
        // `>=` must not read as `>` followed by `= 3`
        assert_eq!(int(&eval_expr("4 >= 3")), 1);
        assert_eq!(int(&eval_expr("4 != 3")), 1);
    }

    #[test]
    fn leftmost_logical_wins() {
        assert_eq!(int(&eval_expr("1 < 2 & 3 < 4")), 1);
        assert_eq!(int(&eval_expr("1 > 2 | 3 < 4")), 1);
        assert_eq!(int(&eval_expr("1 > 2 & 3 < 4 | 5 < 6")), 0);
    }

    #[test]
    fn relational_sides_take_arithmetic() {
        assert_eq!(int(&eval_expr("2 + 2 = 4")), 1);
        assert_eq!(int(&eval_expr("2 * 3 > 5")), 1);
    }

    #[test]
    fn missing_operand_is_an_error() {
        let syntax = Syntax::compact();
        let root = RefCell::new(Context::new());
        let seq = Cell::new(0);
        let line = LineDetail::new(1, "* 3");
        assert!(ExprParser::new(&syntax, &root, &seq, &line).parse("* 3").is_err());
    }
}
