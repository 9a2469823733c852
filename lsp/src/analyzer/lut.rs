use loupe_core::token::Span;
use loupe_core::util::fast_map::FastHashMap;

use super::doc::Doc;
use super::scope::{ScopeId, VarId};
use super::ty::Ty;

/// Key for position-indexed lookup tables: `"line:column"`, 1-based.
pub fn pos_key(line: u32, column: u32) -> String {
    format!("{}:{}", line, column)
}

/// Everything hover needs about one identifier occurrence, keyed by the
/// identifier's start position.
#[derive(Debug, Clone)]
pub struct IdentInfo {
    pub name: String,
    pub span: Span,
    pub ty: Ty,
    pub var: Option<VarId>,
    pub scope: ScopeId,
    pub doc: Option<Doc>,
}

/// A function-typed expression, keyed one past its last character so a
/// following `(` maps straight to it.
#[derive(Debug, Clone, Copy)]
pub struct FnInfo {
    pub ty: Ty,
    pub span: Span,
}

/// A table-typed expression, keyed one past its last character so a
/// following `.` maps straight to it.
#[derive(Debug, Clone, Copy)]
pub struct TableInfo {
    pub ty: Ty,
    pub span: Span,
}

/// Side tables built during the walk, consumed by the query layer.
#[derive(Debug, Default)]
pub struct Luts {
    pub idents: FastHashMap<String, IdentInfo>,
    /// Scope extents in walk order; later entries are nested deeper.
    pub scopes: Vec<(Span, ScopeId)>,
    pub fn_ends: FastHashMap<String, FnInfo>,
    pub table_ends: FastHashMap<String, TableInfo>,
}

impl Luts {
    pub fn record_ident(&mut self, info: IdentInfo) {
        let key = pos_key(info.span.start.line, info.span.start.column);
        self.idents.insert(key, info);
    }

    pub fn ident_at(&self, line: u32, column: u32) -> Option<&IdentInfo> {
        self.idents.get(&pos_key(line, column))
    }

    pub fn record_scope(&mut self, span: Span, scope: ScopeId) {
        self.scopes.push((span, scope));
    }

    pub fn record_fn_end(&mut self, span: Span, ty: Ty) {
        let key = pos_key(span.end.line, span.end.column);
        self.fn_ends.insert(key, FnInfo { ty, span });
    }

    pub fn record_table_end(&mut self, span: Span, ty: Ty) {
        let key = pos_key(span.end.line, span.end.column);
        self.table_ends.insert(key, TableInfo { ty, span });
    }

    pub fn fn_ending_at(&self, line: u32, column: u32) -> Option<&FnInfo> {
        self.fn_ends.get(&pos_key(line, column))
    }

    pub fn table_ending_at(&self, line: u32, column: u32) -> Option<&TableInfo> {
        self.table_ends.get(&pos_key(line, column))
    }

    /// Innermost scope containing `offset`. Entries are pushed in source
    /// order, so scanning from the back finds the deepest match first.
    pub fn scope_at(&self, offset: usize, global: ScopeId) -> ScopeId {
        self.scopes
            .iter()
            .rev()
            .find(|(span, _)| span.contains_offset(offset))
            .map(|(_, scope)| *scope)
            .unwrap_or(global)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loupe_core::token::Position;

    fn span(sl: u32, sc: u32, so: usize, el: u32, ec: u32, eo: usize) -> Span {
        Span::new(Position::new(sl, sc, so), Position::new(el, ec, eo))
    }

    #[test]
    fn scope_at_prefers_innermost() {
        let mut luts = Luts::default();
        let global = ScopeId(0);
        luts.record_scope(span(1, 1, 0, 10, 1, 100), ScopeId(1));
        luts.record_scope(span(3, 1, 20, 6, 1, 60), ScopeId(2));
        assert_eq!(luts.scope_at(30, global), ScopeId(2));
        assert_eq!(luts.scope_at(80, global), ScopeId(1));
        assert_eq!(luts.scope_at(200, global), global);
    }

    #[test]
    fn end_keys_point_one_past_the_expression() {
        let mut luts = Luts::default();
        // "foo" occupying columns 1..=3; end column 4 is the next char.
        let s = span(1, 1, 0, 1, 4, 3);
        luts.record_fn_end(s, Ty::Any);
        assert!(luts.fn_ending_at(1, 4).is_some());
        assert!(luts.fn_ending_at(1, 3).is_none());
    }
}
