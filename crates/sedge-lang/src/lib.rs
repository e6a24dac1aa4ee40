//! Sedge: a small embeddable scripting language with a swappable surface
//! grammar. Source text is normalized into statements, parsed into a
//! statement tree, and executed by a tree-walking evaluator over a dynamic
//! value system. The grammar tokens live in a syntax descriptor, so the
//! same pipeline serves any registered surface syntax.

pub mod error;
pub mod interop;
pub mod runtime;
pub mod syntax;

pub use error::{Error, InteropError};
pub use interop::{HostBridge, NoBridge};
pub use runtime::context::Context;
pub use runtime::interpreter::{Scope, Signal};
pub use runtime::value::{HostObject, Num, Value};
pub use syntax::descriptor::{Syntax, SyntaxRegistry};

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use tracing::debug;

use syntax::ast::Script;
use syntax::parser::Parser;

// ─── Engine ──────────────────────────────────────────────────────────────────

/// A script instance: one root context plus the syntax registry, host
/// bridge and parse cache that drive it. Not thread-safe; one engine per
/// logical thread.
pub struct Engine {
    syntaxes: SyntaxRegistry,
    default_syntax: String,
    bridge: Box<dyn HostBridge>,
    root: RefCell<Context>,
    cache: HashMap<String, CacheEntry>,
    cache_hits: u64,
}

/// A cached parse, reusable only for byte-identical source.
struct CacheEntry {
    source: String,
    script: Rc<Script>,
    bindings: Context,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            syntaxes: SyntaxRegistry::with_builtins(),
            default_syntax: "sedge".to_string(),
            bridge: Box::new(NoBridge),
            root: RefCell::new(Context::new()),
            cache: HashMap::new(),
            cache_hits: 0,
        }
    }

    pub fn set_bridge(&mut self, bridge: Box<dyn HostBridge>) {
        self.bridge = bridge;
    }

    pub fn register_syntax(&mut self, syntax: Syntax) {
        self.syntaxes.register(syntax);
    }

    pub fn set_default_syntax(&mut self, name: &str) -> Result<(), Error> {
        if self.syntaxes.get(name).is_none() {
            return Err(Error::UnknownSyntax(name.to_string()));
        }
        self.default_syntax = name.to_string();
        Ok(())
    }

    /// Read a root-context variable, e.g. to inspect script results.
    pub fn var(&self, key: &str) -> Option<Value> {
        self.root.borrow().var(key).cloned()
    }

    /// Seed a root-context variable before evaluation.
    pub fn set_var(&mut self, key: impl Into<String>, value: Value) {
        self.root.borrow_mut().set_var(key, value);
    }

    /// How many evaluations reused a cached parse.
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits
    }

    /// Evaluate source text with the default syntax (or whatever the
    /// leading directives select).
    pub fn eval(&mut self, source: &str) -> Result<Value, Error> {
        let name = self.default_syntax.clone();
        self.eval_inner(&name, source)
    }

    /// Evaluate with a named registered syntax.
    pub fn eval_with_syntax(&mut self, name: &str, source: &str) -> Result<Value, Error> {
        self.eval_inner(name, source)
    }

    pub fn eval_file(&mut self, path: impl AsRef<Path>) -> Result<Value, Error> {
        let text = std::fs::read_to_string(path)?;
        self.eval(&text)
    }

    fn eval_inner(&mut self, syntax_name: &str, source: &str) -> Result<Value, Error> {
        let (directives, body) = split_directives(source);
        let syntax_name = directives.syntax.as_deref().unwrap_or(syntax_name);
        let syntax = self
            .syntaxes
            .get(syntax_name)
            .ok_or_else(|| Error::UnknownSyntax(syntax_name.to_string()))?;
        debug!(syntax = syntax_name, bytes = body.len(), "evaluate");

        let script = match &directives.cache {
            Some(id) => self.cached_script(id, &body, syntax.as_ref())?,
            None => Rc::new(Parser::new(syntax.as_ref(), &self.root).parse(&body)?),
        };

        let scope = Scope {
            syntax: syntax.as_ref(),
            current: &self.root,
            root: &self.root,
            bridge: self.bridge.as_ref(),
        };
        match script.body.execute(&scope)? {
            Signal::Value(v) => Ok(v),
            _ => Ok(Value::Empty),
        }
    }

    fn cached_script(
        &mut self,
        id: &str,
        source: &str,
        syntax: &Syntax,
    ) -> Result<Rc<Script>, Error> {
        if let Some(entry) = self.cache.get(id) {
            if entry.source == source {
                self.cache_hits += 1;
                debug!(id, "parse cache hit");
                self.root.borrow_mut().merge_bindings(&entry.bindings);
                return Ok(entry.script.clone());
            }
        }
        debug!(id, "parse cache rebuild");
        let script = Rc::new(Parser::new(syntax, &self.root).parse(source)?);
        let bindings = self.parse_bindings();
        self.cache.insert(
            id.to_string(),
            CacheEntry { source: source.to_string(), script: script.clone(), bindings },
        );
        Ok(script)
    }

    /// Root bindings produced by parsing — synthetic variables and hoisted
    /// functions — snapshotted so a cache hit can restore them without
    /// clobbering user state mutated since parse time.
    fn parse_bindings(&self) -> Context {
        let root = self.root.borrow();
        let mut ctx = Context::new();
        for (k, v) in root.vars() {
            if k.starts_with("__s") || k.starts_with("__v") {
                ctx.set_var(k.clone(), v.clone());
            }
        }
        for f in root.funcs().values() {
            ctx.set_func(f.clone());
        }
        ctx
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Directives ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct Directives {
    syntax: Option<String>,
    cache: Option<String>,
}

/// Consume leading `%%syntax <name>` / `%%cache <id>` lines. Consumed lines
/// are blanked, not removed, so statement line numbers stay stable.
fn split_directives(source: &str) -> (Directives, String) {
    let mut directives = Directives::default();
    let mut out = String::with_capacity(source.len());
    let mut in_header = true;
    for line in source.lines() {
        let t = line.trim();
        if in_header && !t.is_empty() {
            if let Some(rest) = t.strip_prefix("%%syntax") {
                directives.syntax = Some(rest.trim().to_string());
                out.push('\n');
                continue;
            }
            if let Some(rest) = t.strip_prefix("%%cache") {
                directives.cache = Some(rest.trim().to_string());
                out.push('\n');
                continue;
            }
            in_header = false;
        }
        out.push_str(line);
        out.push('\n');
    }
    (directives, out)
}

// ─── Entry points ────────────────────────────────────────────────────────────

/// Evaluate source with a throwaway engine and the default grammar.
pub fn evaluate(source: &str) -> Result<Value, Error> {
    Engine::new().eval(source)
}

/// Evaluate source with a throwaway engine and a named registered syntax.
pub fn evaluate_with_syntax(name: &str, source: &str) -> Result<Value, Error> {
    Engine::new().eval_with_syntax(name, source)
}

/// Read a script file and evaluate it with a throwaway engine.
pub fn evaluate_file(path: impl AsRef<Path>) -> Result<Value, Error> {
    Engine::new().eval_file(path)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn directives_are_consumed_and_blanked() {
        let (d, body) = split_directives("%%syntax basic\n%%cache k1\nx = 1\n");
        assert_eq!(d.syntax.as_deref(), Some("basic"));
        assert_eq!(d.cache.as_deref(), Some("k1"));
        // line numbers stay stable: the statement is still on line 3
        assert_eq!(body, "\n\nx = 1\n");
    }

    #[test]
    fn directives_only_lead() {
        let (d, body) = split_directives("x = 1\n%%cache k1\n");
        assert!(d.cache.is_none());
        assert!(body.contains("%%cache"));
    }

    #[test]
    fn unknown_syntax_is_an_error() {
        let mut engine = Engine::new();
        assert!(matches!(
            engine.eval_with_syntax("nope", "x = 1"),
            Err(Error::UnknownSyntax(_))
        ));
        assert!(engine.set_default_syntax("nope").is_err());
        assert!(engine.set_default_syntax("basic").is_ok());
    }

    #[test]
    fn seeded_variables_are_visible() {
        let mut engine = Engine::new();
        engine.set_var("seed", Value::Num(Num::Int(20)));
        engine.eval("x = seed + 1").unwrap();
        assert_eq!(engine.var("x"), Some(Value::Num(Num::Int(21))));
    }
}
