use loupe_core::token::Span;
use loupe_core::util::fast_map::FastHashMap;

use super::doc::Doc;
use super::ty::Ty;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(pub u32);

/// One declaration, assignment or reference of a variable; most recent
/// first in [`Variable::history`].
#[derive(Debug, Clone)]
pub struct VarEvent {
    pub ty: Ty,
    pub span: Span,
    pub scope: ScopeId,
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    /// Never empty; index 0 is the most recent event.
    pub history: Vec<VarEvent>,
    pub doc: Option<Doc>,
}

impl Variable {
    pub fn current(&self) -> &VarEvent {
        &self.history[0]
    }

    pub fn ty(&self) -> Ty {
        self.history[0].ty
    }
}

#[derive(Debug, Clone)]
pub struct ScopeData {
    pub parent: Option<ScopeId>,
    /// Human-readable descriptor for hover/diagnostics ("function line 12").
    pub tag: String,
    vars: FastHashMap<String, VarId>,
    labels: FastHashMap<String, Span>,
}

pub enum Declared {
    Fresh(VarId),
    /// The name is already an own binding of the target scope.
    Collision(VarId),
}

/// Tree of lexical scopes plus the variables bound in them. Lookup walks
/// the explicit parent chain; writes always target one scope's own map.
#[derive(Debug, Clone)]
pub struct ScopeTree {
    scopes: Vec<ScopeData>,
    vars: Vec<Variable>,
}

impl ScopeTree {
    /// Creates the tree with its root global scope (id 0).
    pub fn new() -> Self {
        Self {
            scopes: vec![ScopeData {
                parent: None,
                tag: "globals".to_string(),
                vars: FastHashMap::default(),
                labels: FastHashMap::default(),
            }],
            vars: Vec::new(),
        }
    }

    pub fn global(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn fork(&mut self, parent: ScopeId, tag: impl Into<String>) -> ScopeId {
        self.scopes.push(ScopeData {
            parent: Some(parent),
            tag: tag.into(),
            vars: FastHashMap::default(),
            labels: FastHashMap::default(),
        });
        ScopeId(self.scopes.len() as u32 - 1)
    }

    pub fn scope(&self, id: ScopeId) -> &ScopeData {
        &self.scopes[id.0 as usize]
    }

    pub fn var(&self, id: VarId) -> &Variable {
        &self.vars[id.0 as usize]
    }

    pub fn var_mut(&mut self, id: VarId) -> &mut Variable {
        &mut self.vars[id.0 as usize]
    }

    /// Own binding of `scope`, ignoring ancestors.
    pub fn own(&self, scope: ScopeId, name: &str) -> Option<VarId> {
        self.scopes[scope.0 as usize].vars.get(name).copied()
    }

    /// Resolve a name by walking the parent chain.
    pub fn resolve(&self, scope: ScopeId, name: &str) -> Option<VarId> {
        let mut cursor = Some(scope);
        while let Some(id) = cursor {
            let data = &self.scopes[id.0 as usize];
            if let Some(var) = data.vars.get(name) {
                return Some(*var);
            }
            cursor = data.parent;
        }
        None
    }

    /// Bind `name` in `scope`'s own map. A collision reports the existing
    /// binding instead of failing; the caller decides what to diagnose.
    pub fn declare(&mut self, scope: ScopeId, name: &str, span: Span, ty: Ty, doc: Option<Doc>) -> Declared {
        if let Some(existing) = self.own(scope, name) {
            return Declared::Collision(existing);
        }
        self.vars.push(Variable {
            name: name.to_string(),
            history: vec![VarEvent { ty, span, scope }],
            doc,
        });
        let id = VarId(self.vars.len() as u32 - 1);
        self.scopes[scope.0 as usize].vars.insert(name.to_string(), id);
        Declared::Fresh(id)
    }

    /// Record an assignment: prepend a history entry with the new type.
    pub fn update(&mut self, var: VarId, span: Span, ty: Ty, scope: ScopeId) {
        self.vars[var.0 as usize].history.insert(0, VarEvent { ty, span, scope });
    }

    /// Record a read. The binding is unchanged; the most recent type and
    /// scope are duplicated so the history stays positionally accurate.
    /// A reference at the position of the latest event is dropped, so a
    /// declare/update immediately followed by its own identifier visit
    /// does not double-count.
    pub fn reference(&mut self, var: VarId, span: Span) {
        let variable = &mut self.vars[var.0 as usize];
        let latest = &variable.history[0];
        if latest.span.start == span.start {
            return;
        }
        let event = VarEvent {
            ty: latest.ty,
            span,
            scope: latest.scope,
        };
        variable.history.insert(0, event);
    }

    pub fn declare_label(&mut self, scope: ScopeId, name: &str, span: Span) -> bool {
        let labels = &mut self.scopes[scope.0 as usize].labels;
        if labels.contains_key(name) {
            return false;
        }
        labels.insert(name.to_string(), span);
        true
    }

    pub fn resolve_label(&self, scope: ScopeId, name: &str) -> Option<Span> {
        let mut cursor = Some(scope);
        while let Some(id) = cursor {
            let data = &self.scopes[id.0 as usize];
            if let Some(span) = data.labels.get(name) {
                return Some(*span);
            }
            cursor = data.parent;
        }
        None
    }

    /// Names visible from `scope`, innermost shadowing outermost.
    pub fn visible_names(&self, scope: ScopeId) -> Vec<(String, VarId)> {
        let mut seen: FastHashMap<&str, VarId> = FastHashMap::default();
        let mut order: Vec<&str> = Vec::new();
        let mut cursor = Some(scope);
        while let Some(id) = cursor {
            let data = &self.scopes[id.0 as usize];
            for (name, var) in &data.vars {
                if !seen.contains_key(name.as_str()) {
                    seen.insert(name, *var);
                    order.push(name);
                }
            }
            cursor = data.parent;
        }
        order
            .into_iter()
            .map(|name| (name.to_string(), seen[name]))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loupe_core::token::{Position, Span};

    fn span(line: u32, col: u32) -> Span {
        Span::single(Position::new(line, col, 0))
    }

    #[test]
    fn child_shadowing_leaves_parent_untouched() {
        let mut tree = ScopeTree::new();
        let root = tree.global();
        let parent_var = match tree.declare(root, "x", span(1, 1), Ty::Number, None) {
            Declared::Fresh(id) => id,
            _ => panic!("fresh expected"),
        };
        let child = tree.fork(root, "do line 2");
        let child_var = match tree.declare(child, "x", span(2, 3), Ty::String, None) {
            Declared::Fresh(id) => id,
            _ => panic!("fresh expected"),
        };
        assert_ne!(parent_var, child_var);
        assert_eq!(tree.resolve(child, "x"), Some(child_var));
        assert_eq!(tree.resolve(root, "x"), Some(parent_var));
        assert_eq!(tree.var(parent_var).ty(), Ty::Number);
    }

    #[test]
    fn declare_collision_is_reported_not_applied() {
        let mut tree = ScopeTree::new();
        let root = tree.global();
        let first = match tree.declare(root, "x", span(1, 1), Ty::Number, None) {
            Declared::Fresh(id) => id,
            _ => panic!("fresh expected"),
        };
        match tree.declare(root, "x", span(2, 1), Ty::String, None) {
            Declared::Collision(existing) => assert_eq!(existing, first),
            _ => panic!("collision expected"),
        }
    }

    #[test]
    fn reference_deduplicates_by_position() {
        let mut tree = ScopeTree::new();
        let root = tree.global();
        let var = match tree.declare(root, "x", span(1, 7), Ty::Number, None) {
            Declared::Fresh(id) => id,
            _ => panic!("fresh expected"),
        };
        tree.reference(var, span(1, 7));
        assert_eq!(tree.var(var).history.len(), 1);
        tree.reference(var, span(3, 1));
        assert_eq!(tree.var(var).history.len(), 2);
        assert_eq!(tree.var(var).ty(), Ty::Number);
    }

    #[test]
    fn labels_resolve_through_parent_chain() {
        let mut tree = ScopeTree::new();
        let root = tree.global();
        assert!(tree.declare_label(root, "top", span(1, 1)));
        assert!(!tree.declare_label(root, "top", span(5, 1)));
        let child = tree.fork(root, "while line 2");
        assert!(tree.resolve_label(child, "top").is_some());
        assert!(tree.resolve_label(child, "missing").is_none());
    }
}
