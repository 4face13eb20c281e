// ABOUTME: Dynamic environments, lexical scopes, and name resolution

use crate::builtins::strings;
use crate::cell::{read_lock, write_lock, Cell, Sym};
use crate::conduit::Conduit;
use crate::error::{ShellError, ShellResult};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

// ============================================================================
// References
// ============================================================================

/// A mutable cell holder; what resolution hands back
#[derive(Clone)]
pub struct Reference(Arc<RwLock<Cell>>);

impl Reference {
    pub fn new(v: Cell) -> Self {
        Reference(Arc::new(RwLock::new(v)))
    }

    pub fn get(&self) -> Cell {
        read_lock(&self.0).clone()
    }

    pub fn set(&self, v: Cell) {
        *write_lock(&self.0) = v;
    }
}

// ============================================================================
// Dynamic environment
// ============================================================================

/// A flat, parent-chained map for dynamically scoped bindings. `add`
/// prepends to the innermost level; lookup walks outward.
pub struct Env {
    slots: RwLock<HashMap<Sym, Reference>>,
    parent: Option<Arc<Env>>,
}

impl Env {
    pub fn root() -> Arc<Env> {
        Arc::new(Env {
            slots: RwLock::new(HashMap::new()),
            parent: None,
        })
    }

    pub fn child(parent: &Arc<Env>) -> Arc<Env> {
        Arc::new(Env {
            slots: RwLock::new(HashMap::new()),
            parent: Some(parent.clone()),
        })
    }

    pub fn add(&self, name: Sym, v: Cell) {
        write_lock(&self.slots).insert(name, Reference::new(v));
    }

    pub fn lookup(&self, name: &Sym) -> Option<Reference> {
        if let Some(r) = read_lock(&self.slots).get(name) {
            return Some(r.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    /// Names in this chain starting with `prefix`
    pub fn complete(&self, prefix: &str) -> Vec<String> {
        let mut out: Vec<String> = read_lock(&self.slots)
            .keys()
            .map(|k| k.text().to_string())
            .filter(|k| k.starts_with(prefix))
            .collect();
        if let Some(p) = &self.parent {
            out.extend(p.complete(prefix));
        }
        out.sort();
        out.dedup();
        out
    }
}

// ============================================================================
// Lexical scope
// ============================================================================

/// Two name maps (public and private) plus a parent pointer
pub struct Scope {
    public: RwLock<HashMap<Sym, Reference>>,
    private: RwLock<HashMap<Sym, Reference>>,
    parent: Option<Arc<Scope>>,
}

impl Scope {
    pub fn root() -> Arc<Scope> {
        Arc::new(Scope {
            public: RwLock::new(HashMap::new()),
            private: RwLock::new(HashMap::new()),
            parent: None,
        })
    }

    pub fn child(parent: &Arc<Scope>) -> Arc<Scope> {
        Arc::new(Scope {
            public: RwLock::new(HashMap::new()),
            private: RwLock::new(HashMap::new()),
            parent: Some(parent.clone()),
        })
    }

    /// Copy this scope's own members into a fresh scope with the same
    /// parent. Each member gets its own reference, so writes to the copy
    /// never reach the original.
    pub fn duplicate(&self) -> Arc<Scope> {
        let copy = |members: &HashMap<Sym, Reference>| {
            members
                .iter()
                .map(|(name, reference)| (name.clone(), Reference::new(reference.get())))
                .collect()
        };
        Arc::new(Scope {
            public: RwLock::new(copy(&read_lock(&self.public))),
            private: RwLock::new(copy(&read_lock(&self.private))),
            parent: self.parent.clone(),
        })
    }

    pub fn parent(&self) -> Option<Arc<Scope>> {
        self.parent.clone()
    }

    pub fn define(&self, name: Sym, v: Cell) {
        write_lock(&self.private).insert(name, Reference::new(v));
    }

    pub fn public(&self, name: Sym, v: Cell) {
        write_lock(&self.public).insert(name, Reference::new(v));
    }

    /// Remove a member from either map; true when something was removed
    pub fn remove(&self, name: &Sym) -> bool {
        write_lock(&self.public).remove(name).is_some()
            || write_lock(&self.private).remove(name).is_some()
    }

    fn lookup_here(&self, name: &Sym, public_only: bool) -> Option<Reference> {
        if let Some(r) = read_lock(&self.public).get(name) {
            return Some(r.clone());
        }
        if !public_only {
            if let Some(r) = read_lock(&self.private).get(name) {
                return Some(r.clone());
            }
        }
        None
    }

    /// Walk outward considering both maps (or public only) at each level
    pub fn lookup(&self, name: &Sym, public_only: bool) -> Option<Reference> {
        if let Some(r) = self.lookup_here(name, public_only) {
            return Some(r);
        }
        self.parent
            .as_ref()
            .and_then(|p| p.lookup(name, public_only))
    }

    pub fn complete(&self, prefix: &str) -> Vec<String> {
        let mut out: Vec<String> = read_lock(&self.public)
            .keys()
            .chain(read_lock(&self.private).keys())
            .map(|k| k.text().to_string())
            .filter(|k| k.starts_with(prefix))
            .collect();
        if let Some(p) = &self.parent {
            out.extend(p.complete(prefix));
        }
        out.sort();
        out.dedup();
        out
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Search the dynamic chain first, then the lexical context outward.
/// Objects show only their public face; conduits and strings resolve
/// against their method tables. `Ok(None)` is "not found" — the caller
/// decides whether that is fatal.
pub fn resolve(
    lexical: &Cell,
    dynamic: Option<&Arc<Env>>,
    name: &Sym,
) -> ShellResult<Option<Reference>> {
    if let Some(env) = dynamic {
        if let Some(r) = env.lookup(name) {
            return Ok(Some(r));
        }
    }

    match lexical {
        Cell::Scope(s) => Ok(s.lookup(name, false)),
        Cell::Object(s) => Ok(s.lookup(name, true)),
        Cell::Conduit(c) => {
            forbid_scope_members(name, "conduit")?;
            Ok(c.member(name.text(), lexical).map(Reference::new))
        }
        Cell::Str(_) => {
            forbid_scope_members(name, "conduit")?;
            Ok(strings::member(name.text(), lexical).map(Reference::new))
        }
        Cell::Null => Ok(None),
        other => Err(ShellError::type_error(format!(
            "not a context: {}",
            other
        ))),
    }
}

// Conduits have no private members and cannot be extended; strings share
// the same refusal (and, for now, its wording).
fn forbid_scope_members(name: &Sym, kind: &str) -> ShellResult<()> {
    match name.text() {
        "child" | "clone" | "define" => Err(ShellError::type_error(format!(
            "'{}' not valid for a {}",
            name.text(),
            kind
        ))),
        _ => Ok(()),
    }
}

/// The underlying scope of a scope-backed context
pub fn expose(ctx: &Cell) -> ShellResult<Arc<Scope>> {
    match ctx {
        Cell::Scope(s) | Cell::Object(s) => Ok(s.clone()),
        other => Err(ShellError::type_error(format!(
            "not an object: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::sym;

    #[test]
    fn test_env_add_and_chain() {
        let parent = Env::root();
        parent.add(sym("x"), Cell::int(1));

        let child = Env::child(&parent);
        assert!(child.lookup(&sym("x")).is_some());

        child.add(sym("x"), Cell::int(2));
        let r = child.lookup(&sym("x")).expect("x");
        assert_eq!(format!("{}", r.get()), "2");
        // Parent binding untouched
        let r = parent.lookup(&sym("x")).expect("x");
        assert_eq!(format!("{}", r.get()), "1");
    }

    #[test]
    fn test_scope_private_public_and_remove() {
        let s = Scope::root();
        s.define(sym("hidden"), Cell::int(1));
        s.public(sym("shown"), Cell::int(2));

        assert!(s.lookup(&sym("hidden"), false).is_some());
        assert!(s.lookup(&sym("hidden"), true).is_none());
        assert!(s.lookup(&sym("shown"), true).is_some());

        assert!(s.remove(&sym("hidden")));
        assert!(!s.remove(&sym("hidden")));
    }

    #[test]
    fn test_resolution_dynamic_wins() {
        let scope = Scope::root();
        scope.define(sym("x"), Cell::sym("lexical"));
        let env = Env::root();
        env.add(sym("x"), Cell::sym("dynamic"));

        let lex = Cell::Scope(scope);
        let r = resolve(&lex, Some(&env), &sym("x"))
            .expect("resolves")
            .expect("found");
        assert_eq!(r.get().raw(), "dynamic");

        let r = resolve(&lex, None, &sym("x"))
            .expect("resolves")
            .expect("found");
        assert_eq!(r.get().raw(), "lexical");
    }

    #[test]
    fn test_object_sees_public_only() {
        let parent = Scope::root();
        parent.public(sym("shared"), Cell::int(7));
        let inner = Scope::child(&parent);
        inner.define(sym("secret"), Cell::int(8));
        inner.public(sym("open"), Cell::int(9));

        let obj = Cell::Object(inner);
        assert!(resolve(&obj, None, &sym("open")).expect("ok").is_some());
        assert!(resolve(&obj, None, &sym("shared")).expect("ok").is_some());
        assert!(resolve(&obj, None, &sym("secret")).expect("ok").is_none());
    }

    #[test]
    fn test_complete_walks_outward() {
        let parent = Scope::root();
        parent.define(sym("walrus"), Cell::Null);
        let child = Scope::child(&parent);
        child.define(sym("wand"), Cell::Null);
        child.public(sym("water"), Cell::Null);

        let names = child.complete("wa");
        assert_eq!(names, vec!["walrus", "wand", "water"]);

        let outer = Env::root();
        outer.add(sym("$walrus"), Cell::Null);
        let inner = Env::child(&outer);
        inner.add(sym("$wand"), Cell::Null);
        assert_eq!(inner.complete("$wa"), vec!["$walrus", "$wand"]);
    }
}
