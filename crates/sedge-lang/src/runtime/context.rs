use std::collections::HashMap;
use std::rc::Rc;

use crate::runtime::value::Value;
use crate::syntax::ast::Function;

/// One scope record: a variable table, a function table and an import list.
/// A script instance owns a single root context; every function invocation
/// gets a fresh one that falls back to the root, never to its caller.
#[derive(Debug, Default, Clone)]
pub struct Context {
    vars: HashMap<String, Value>,
    funcs: HashMap<String, Rc<Function>>,
    imports: Vec<String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn var(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    pub fn set_var(&mut self, key: impl Into<String>, value: Value) {
        self.vars.insert(key.into(), value);
    }

    pub fn vars(&self) -> &HashMap<String, Value> {
        &self.vars
    }

    pub fn func(&self, name: &str) -> Option<Rc<Function>> {
        self.funcs.get(name).cloned()
    }

    pub fn set_func(&mut self, function: Rc<Function>) {
        self.funcs.insert(function.name.clone(), function);
    }

    pub fn funcs(&self) -> &HashMap<String, Rc<Function>> {
        &self.funcs
    }

    pub fn add_import(&mut self, path: &str) {
        if !self.imports.iter().any(|p| p == path) {
            self.imports.push(path.to_string());
        }
    }

    pub fn imports(&self) -> &[String] {
        &self.imports
    }

    /// Copy every binding of `other` into this context, overwriting
    /// same-named entries. Used to restore cached parse bindings.
    pub fn merge_bindings(&mut self, other: &Context) {
        for (k, v) in &other.vars {
            self.vars.insert(k.clone(), v.clone());
        }
        for f in other.funcs.values() {
            self.set_func(f.clone());
        }
        for p in &other.imports {
            self.add_import(p);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imports_deduplicate() {
        let mut ctx = Context::new();
        ctx.add_import("host.math");
        ctx.add_import("host.math");
        assert_eq!(ctx.imports(), ["host.math".to_string()]);
    }

    #[test]
    fn merge_overwrites_vars() {
        let mut a = Context::new();
        a.set_var("x", Value::Str("old".into()));
        let mut b = Context::new();
        b.set_var("x", Value::Str("new".into()));
        a.merge_bindings(&b);
        assert_eq!(a.var("x"), Some(&Value::Str("new".into())));
    }
}
