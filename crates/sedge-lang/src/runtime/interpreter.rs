//! Tree-walking evaluation of the statement tree.
//!
//! Statements execute for a `Signal`; expressions evaluate to a `Value`.
//! Command, Operation and Variable nodes produce intermediate values that a
//! block discards — only return/break/continue signals travel upward.

use std::cell::RefCell;

use tracing::trace;

use crate::error::Error;
use crate::interop::HostBridge;
use crate::runtime::context::Context;
use crate::runtime::value::Value;
use crate::syntax::ast::{Element, Function, LineDetail, Op};
use crate::syntax::descriptor::Syntax;

/// Control-flow signal threaded through execution instead of being smuggled
/// inside values.
#[derive(Debug)]
pub enum Signal {
    None,
    /// A value returning out of the enclosing function or script.
    Value(Value),
    Break(Option<String>),
    Continue(Option<String>),
}

/// Everything execution needs: the active grammar, the current and root
/// contexts, and the host bridge.
pub struct Scope<'a> {
    pub syntax: &'a Syntax,
    pub current: &'a RefCell<Context>,
    pub root: &'a RefCell<Context>,
    pub bridge: &'a dyn HostBridge,
}

impl Element {
    /// Statement-level execution.
    pub fn execute(&self, scope: &Scope) -> Result<Signal, Error> {
        match self {
            Element::Block { children } => {
                for child in children {
                    match child.execute(scope)? {
                        Signal::None => {}
                        other => return Ok(other),
                    }
                }
                Ok(Signal::None)
            }

            // expression statements: evaluate for effect, discard the value
            Element::Command { .. } | Element::Operation { .. } | Element::Variable { .. } => {
                self.eval(scope)?;
                Ok(Signal::None)
            }

            // hoisted at parse time
            Element::FunctionDef { .. } => Ok(Signal::None),

            Element::Import { path, .. } => {
                scope.current.borrow_mut().add_import(path);
                Ok(Signal::None)
            }

            Element::Return { value, .. } => {
                let v = match value {
                    Some(e) => e.eval(scope)?,
                    None => Value::Empty,
                };
                Ok(Signal::Value(v))
            }

            Element::Break { label, .. } => Ok(Signal::Break(label.clone())),
            Element::Continue { label, .. } => Ok(Signal::Continue(label.clone())),

            Element::IfGroup { arms } => {
                for arm in arms {
                    let take = match &arm.condition {
                        None => true,
                        Some(c) => c.eval(scope)?.truthy(),
                    };
                    if take {
                        return arm.body.execute(scope);
                    }
                }
                Ok(Signal::None)
            }

            Element::Loop { label, condition, body, .. } => {
                while condition.eval(scope)?.truthy() {
                    match body.execute(scope)? {
                        Signal::None => {}
                        Signal::Break(None) => break,
                        Signal::Break(Some(l)) if label.as_deref() == Some(l.as_str()) => break,
                        Signal::Continue(None) => {}
                        Signal::Continue(Some(l)) if label.as_deref() == Some(l.as_str()) => {}
                        // a foreign label or a returning value escapes this loop
                        other => return Ok(other),
                    }
                }
                Ok(Signal::None)
            }

            Element::TryCatch { error_var, body, catch, finally, .. } => {
                let primary = match body.execute(scope) {
                    Ok(signal) => Ok(signal),
                    Err(err) => {
                        scope
                            .current
                            .borrow_mut()
                            .set_var(error_var.clone(), Value::Str(err.to_string()));
                        catch.execute(scope)
                    }
                };
                // finally runs regardless; its own error or signal wins
                let after = finally.execute(scope)?;
                match primary {
                    Err(e) => Err(e),
                    Ok(signal) => {
                        Ok(if matches!(after, Signal::None) { signal } else { after })
                    }
                }
            }
        }
    }

    /// Expression-level evaluation producing a concrete value.
    pub fn eval(&self, scope: &Scope) -> Result<Value, Error> {
        match self {
            Element::Command { line, text, literal } => {
                if let Some(v) = literal {
                    return Ok(v.clone());
                }
                resolve_command(line, text, scope)
            }

            Element::Operation { line, left, op, right } => {
                // both operands evaluate eagerly; there is no short-circuit
                let l = left.eval(scope)?;
                let r = right.eval(scope)?;
                apply_operator(line, *op, l, r)
            }

            Element::Variable { key, value, .. } => {
                let v = value.eval(scope)?;
                assign(scope, key, v.clone());
                Ok(v)
            }

            // a statement node in expression position surfaces its value
            other => match other.execute(scope)? {
                Signal::Value(v) => Ok(v),
                _ => Ok(Value::Empty),
            },
        }
    }
}

/// Write a value under `key`, honoring the root-context prefix.
fn assign(scope: &Scope, key: &str, value: Value) {
    match key.strip_prefix(scope.syntax.root_prefix.as_str()) {
        Some(k) => scope.root.borrow_mut().set_var(k, value),
        None => scope.current.borrow_mut().set_var(key, value),
    }
}

// ─── Command resolution ──────────────────────────────────────────────────────

/// Resolve a deferred command against the context chain: literal, call form
/// (script function or bridge), variable (current then root; root only when
/// prefixed), dotted host path.
fn resolve_command(line: &LineDetail, text: &str, scope: &Scope) -> Result<Value, Error> {
    let text = text.trim();
    if let Some(v) = Value::literal(text, scope.syntax) {
        return Ok(v);
    }

    // a unary sign the expression splitter skipped
    if let Some(rest) = text.strip_prefix(scope.syntax.operators.sub.as_str()) {
        let v = resolve_command(line, rest.trim_start(), scope)?;
        return match v {
            Value::Num(n) => Ok(Value::Num(n.negated())),
            other => Err(Error::runtime(
                line.number,
                &line.text,
                format!("cannot negate {}", other.type_name()),
            )),
        };
    }
    if let Some(rest) = text.strip_prefix(scope.syntax.operators.add.as_str()) {
        return resolve_command(line, rest.trim_start(), scope);
    }

    // call form: name(arg, arg) over already-bound synthetic names
    if text.ends_with(scope.syntax.call_close) {
        if let Some(open) = text.find(scope.syntax.call_open) {
            let name = text[..open].trim();
            let inner = &text[open + 1..text.len() - 1];
            let mut args = Vec::new();
            for a in inner.split(scope.syntax.call_separator) {
                let a = a.trim();
                if a.is_empty() {
                    continue;
                }
                args.push(resolve_command(line, a, scope)?);
            }
            let func = scope
                .current
                .borrow()
                .func(name)
                .or_else(|| scope.root.borrow().func(name));
            if let Some(f) = func {
                return invoke(&f, &args, scope, line);
            }
            return bridge_resolve(line, name, &args, scope);
        }
    }

    // root-prefixed variable: the root context only
    if let Some(key) = text.strip_prefix(scope.syntax.root_prefix.as_str()) {
        if scope.syntax.is_identifier(key) {
            let found = scope.root.borrow().var(key).cloned();
            return match found {
                Some(v) => force(v, scope),
                None => Err(undefined(line, text)),
            };
        }
    }

    // plain variable: current context, then root
    if scope.syntax.is_identifier(text) {
        let found = scope
            .current
            .borrow()
            .var(text)
            .cloned()
            .or_else(|| scope.root.borrow().var(text).cloned());
        return match found {
            Some(v) => force(v, scope),
            None => Err(undefined(line, text)),
        };
    }

    // dotted path: the host's business
    if text.contains('.') {
        return bridge_resolve(line, text, &[], scope);
    }

    Err(Error::syntax(
        line.number,
        &line.text,
        format!("cannot resolve `{text}`"),
    ))
}

/// A deferred binding re-evaluates in the reading scope; anything else is
/// already concrete.
fn force(v: Value, scope: &Scope) -> Result<Value, Error> {
    match v {
        Value::Lazy(el) => el.eval(scope),
        other => Ok(other),
    }
}

fn undefined(line: &LineDetail, name: &str) -> Error {
    Error::syntax(
        line.number,
        &line.text,
        format!("undefined variable `{name}`"),
    )
}

fn bridge_resolve(
    line: &LineDetail,
    path: &str,
    args: &[Value],
    scope: &Scope,
) -> Result<Value, Error> {
    let mut imports = scope.current.borrow().imports().to_vec();
    if !std::ptr::eq(scope.current, scope.root) {
        for p in scope.root.borrow().imports() {
            if !imports.contains(p) {
                imports.push(p.clone());
            }
        }
    }
    scope
        .bridge
        .resolve(path, args, &imports)
        .map_err(|source| Error::Interop {
            line: line.number,
            text: line.text.clone(),
            source,
        })
}

/// Invoke a scripted function: arguments bind by position into a fresh
/// context that falls back to the root, never to the caller.
pub fn invoke(
    func: &Function,
    args: &[Value],
    scope: &Scope,
    line: &LineDetail,
) -> Result<Value, Error> {
    if args.len() != func.params.len() {
        return Err(Error::runtime(
            line.number,
            &line.text,
            format!(
                "`{}` expects {} arguments, got {}",
                func.name,
                func.params.len(),
                args.len()
            ),
        ));
    }
    trace!(name = %func.name, args = args.len(), "invoke");
    let local = RefCell::new(Context::new());
    for (p, v) in func.params.iter().zip(args) {
        local.borrow_mut().set_var(p.clone(), v.clone());
    }
    let inner = Scope {
        syntax: scope.syntax,
        current: &local,
        root: scope.root,
        bridge: scope.bridge,
    };
    match func.body.execute(&inner)? {
        Signal::Value(v) => Ok(v),
        _ => Ok(Value::Empty),
    }
}

// ─── Operators ───────────────────────────────────────────────────────────────

fn apply_operator(line: &LineDetail, op: Op, l: Value, r: Value) -> Result<Value, Error> {
    match op {
        Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Rem => arithmetic(line, op, l, r),
        Op::And => Ok(Value::bool(l.truthy() && r.truthy())),
        Op::Or => Ok(Value::bool(l.truthy() || r.truthy())),
        Op::Eq => Ok(Value::bool(values_equal(&l, &r))),
        Op::Ne => Ok(Value::bool(!values_equal(&l, &r))),
        Op::Lt | Op::Gt | Op::Le | Op::Ge => Ok(ordering(op, &l, &r)),
    }
}

fn arithmetic(line: &LineDetail, op: Op, l: Value, r: Value) -> Result<Value, Error> {
    if let (Value::Num(a), Value::Num(b)) = (&l, &r) {
        return a
            .apply(op, *b)
            .map(Value::Num)
            .map_err(|msg| Error::runtime(line.number, &line.text, msg));
    }
    if op == Op::Add {
        let stringish = |v: &Value| matches!(v, Value::Str(_) | Value::Num(_));
        if matches!(l, Value::Str(_)) || matches!(r, Value::Str(_)) {
            if stringish(&l) && stringish(&r) {
                return Ok(Value::Str(format!("{l}{r}")));
            }
        }
    }
    // inapplicable operand types yield no result
    Ok(Value::Empty)
}

fn values_equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Num(a), Value::Num(b)) => a.as_f64() == b.as_f64(),
        (Value::Str(_), Value::Str(_) | Value::Num(_)) | (Value::Num(_), Value::Str(_)) => {
            l.to_string() == r.to_string()
        }
        (Value::Null, Value::Null) | (Value::Empty, Value::Empty) => true,
        (Value::Object(a), Value::Object(b)) => a.same(b),
        _ => false,
    }
}

fn ordering(op: Op, l: &Value, r: &Value) -> Value {
    use std::cmp::Ordering;
    let cmp = match (l, r) {
        (Value::Num(a), Value::Num(b)) => {
            a.as_f64().partial_cmp(&b.as_f64()).unwrap_or(Ordering::Equal)
        }
        (Value::Str(_), Value::Str(_) | Value::Num(_)) | (Value::Num(_), Value::Str(_)) => {
            l.to_string().cmp(&r.to_string())
        }
        // objects have no ordering
        _ => return Value::Empty,
    };
    Value::bool(match op {
        Op::Lt => cmp == Ordering::Less,
        Op::Gt => cmp == Ordering::Greater,
        Op::Le => cmp != Ordering::Greater,
        Op::Ge => cmp != Ordering::Less,
        _ => unreachable!("non-ordering operator"),
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interop::NoBridge;
    use crate::runtime::value::Num;
    use pretty_assertions::assert_eq;

    fn line() -> LineDetail {
        LineDetail::new(1, "test")
    }

    #[test]
    fn string_number_concatenation() {
        let l = line();
        let v = apply_operator(
            &l,
            Op::Add,
            Value::Str("n = ".into()),
            Value::Num(Num::Int(3)),
        )
        .unwrap();
        assert_eq!(v, Value::Str("n = 3".into()));
    }

    #[test]
    fn inapplicable_operator_is_silent() {
        let l = line();
        let v = apply_operator(&l, Op::Sub, Value::Str("a".into()), Value::Num(Num::Int(1)))
            .unwrap();
        assert!(v.is_empty());
        let v = apply_operator(&l, Op::Lt, Value::Null, Value::Num(Num::Int(1))).unwrap();
        assert!(v.is_empty());
    }

    #[test]
    fn equality_mixes_strings_and_numbers() {
        let l = line();
        let v = apply_operator(&l, Op::Eq, Value::Str("3".into()), Value::Num(Num::Int(3)))
            .unwrap();
        assert_eq!(v, Value::bool(true));
    }

    #[test]
    fn logical_operators_coerce() {
        let l = line();
        let v = apply_operator(
            &l,
            Op::And,
            Value::Num(Num::Int(2)),
            Value::Str("true".into()),
        )
        .unwrap();
        assert_eq!(v, Value::bool(true));
    }

    #[test]
    fn lexicographic_ordering_for_strings() {
        let v = ordering(Op::Lt, &Value::Str("abc".into()), &Value::Str("abd".into()));
        assert_eq!(v, Value::bool(true));
    }

    #[test]
    fn undefined_variable_reports_line() {
        let syntax = Syntax::compact();
        let root = RefCell::new(Context::new());
        let scope = Scope {
            syntax: &syntax,
            current: &root,
            root: &root,
            bridge: &NoBridge,
        };
        let l = LineDetail::new(7, "y = missing");
        let err = resolve_command(&l, "missing", &scope).unwrap_err();
        match err {
            Error::Syntax { line, .. } => assert_eq!(line, 7),
            other => panic!("expected syntax error, got {other:?}"),
        }
    }
}
