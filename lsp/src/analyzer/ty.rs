use std::collections::BTreeMap;
use std::fmt;

use loupe_core::util::fast_map::FastHashSet;

/// Depth bound shared by render, simplify and equivalence so that
/// self-referential tables (`t.t = t`) terminate.
pub const MAX_TYPE_DEPTH: usize = 5;

/// Placeholder emitted when rendering runs out of depth.
const ELIDED: &str = "…";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FnId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TupleId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnionId(pub u32);

/// A structural type. Compound shapes live in a [`TyPool`] so the handle
/// stays `Copy` and circular tables are representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ty {
    Nil,
    Number,
    Boolean,
    String,
    /// Unknown escape hatch; checks involving it are suppressed.
    Any,
    Table(TableId),
    Function(FnId),
    Tuple(TupleId),
    Union(UnionId),
}

/// Structural table shape: known string keys, known integer keys (array
/// part), boolean-keyed branches, and per-primitive typed-key fallbacks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableTy {
    pub entries: BTreeMap<String, Ty>,
    pub sequence: BTreeMap<i64, Ty>,
    pub true_branch: Option<Ty>,
    pub false_branch: Option<Ty>,
    pub string_key: Option<Ty>,
    pub number_key: Option<Ty>,
    pub boolean_key: Option<Ty>,
}

impl TableTy {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
            && self.sequence.is_empty()
            && self.true_branch.is_none()
            && self.false_branch.is_none()
            && self.string_key.is_none()
            && self.number_key.is_none()
            && self.boolean_key.is_none()
    }

    /// Resolve a string key against entries, falling back to the typed key.
    pub fn lookup_str(&self, key: &str) -> Option<Ty> {
        self.entries.get(key).copied().or(self.string_key)
    }

    pub fn lookup_int(&self, key: i64) -> Option<Ty> {
        self.sequence.get(&key).copied().or(self.number_key)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FnTy {
    pub params: Vec<(String, Ty)>,
    pub vararg: Option<Ty>,
    pub ret: Ty,
}

/// Arena for compound types. All allocation goes through here; handles are
/// only meaningful against the pool they came from.
#[derive(Debug, Clone, Default)]
pub struct TyPool {
    tables: Vec<TableTy>,
    fns: Vec<FnTy>,
    tuples: Vec<Vec<Ty>>,
    unions: Vec<(Ty, Ty)>,
}

impl TyPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_table(&mut self) -> TableId {
        self.tables.push(TableTy::default());
        TableId(self.tables.len() as u32 - 1)
    }

    pub fn alloc_table(&mut self, table: TableTy) -> TableId {
        self.tables.push(table);
        TableId(self.tables.len() as u32 - 1)
    }

    pub fn table(&self, id: TableId) -> &TableTy {
        &self.tables[id.0 as usize]
    }

    pub fn table_mut(&mut self, id: TableId) -> &mut TableTy {
        &mut self.tables[id.0 as usize]
    }

    pub fn alloc_fn(&mut self, f: FnTy) -> FnId {
        self.fns.push(f);
        FnId(self.fns.len() as u32 - 1)
    }

    pub fn function(&self, id: FnId) -> &FnTy {
        &self.fns[id.0 as usize]
    }

    pub fn function_mut(&mut self, id: FnId) -> &mut FnTy {
        &mut self.fns[id.0 as usize]
    }

    pub fn tuple(&mut self, elems: Vec<Ty>) -> Ty {
        self.tuples.push(elems);
        Ty::Tuple(TupleId(self.tuples.len() as u32 - 1))
    }

    pub fn tuple_elems(&self, id: TupleId) -> &[Ty] {
        &self.tuples[id.0 as usize]
    }

    /// Left-associated binary union; `a | a` collapses immediately.
    pub fn union(&mut self, a: Ty, b: Ty) -> Ty {
        if a == b {
            return a;
        }
        self.unions.push((a, b));
        Ty::Union(UnionId(self.unions.len() as u32 - 1))
    }

    pub fn union_parts(&self, id: UnionId) -> (Ty, Ty) {
        self.unions[id.0 as usize]
    }

    /// Flatten a left-associated union chain into its member list.
    pub fn union_members(&self, ty: Ty) -> Vec<Ty> {
        let mut members = Vec::new();
        let mut stack = vec![ty];
        while let Some(t) = stack.pop() {
            match t {
                Ty::Union(id) => {
                    let (l, r) = self.union_parts(id);
                    stack.push(r);
                    stack.push(l);
                }
                other => members.push(other),
            }
        }
        members
    }

    /// Rebuild a left-associated union from a member list.
    pub fn union_of(&mut self, members: &[Ty]) -> Ty {
        match members {
            [] => Ty::Nil,
            [only] => *only,
            [first, rest @ ..] => {
                let mut acc = *first;
                for m in rest {
                    acc = self.union(acc, *m);
                }
                acc
            }
        }
    }

    /// First value of a possibly-multi-valued type.
    pub fn first_value(&self, ty: Ty) -> Ty {
        match ty {
            Ty::Tuple(id) => self.tuple_elems(id).first().copied().unwrap_or(Ty::Nil),
            other => other,
        }
    }

    /// Expand a type into the value list it would produce in a
    /// multi-value position.
    pub fn flatten_values(&self, ty: Ty) -> Vec<Ty> {
        match ty {
            Ty::Tuple(id) => self.tuple_elems(id).to_vec(),
            other => vec![other],
        }
    }
}

fn is_ident_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Render a type to its canonical textual form. `parse` accepts exactly the
/// strings this produces, up to the depth bound.
pub fn render(pool: &TyPool, ty: Ty, max_depth: usize) -> String {
    match ty {
        Ty::Nil => "nil".to_string(),
        Ty::Number => "number".to_string(),
        Ty::Boolean => "boolean".to_string(),
        Ty::String => "string".to_string(),
        Ty::Any => "*".to_string(),
        Ty::Tuple(id) => {
            if max_depth == 0 {
                return ELIDED.to_string();
            }
            let elems: Vec<String> = pool
                .tuple_elems(id)
                .iter()
                .map(|t| render(pool, *t, max_depth - 1))
                .collect();
            format!("[{}]", elems.join(", "))
        }
        Ty::Function(id) => {
            if max_depth == 0 {
                return ELIDED.to_string();
            }
            let f = pool.function(id);
            let mut parts: Vec<String> = f
                .params
                .iter()
                .map(|(name, t)| format!("{}: {}", name, render(pool, *t, max_depth - 1)))
                .collect();
            if let Some(v) = f.vararg {
                parts.push(format!("...: {}", render(pool, v, max_depth - 1)));
            }
            let ret = if matches!(f.ret, Ty::Union(_)) {
                format!("({})", render(pool, f.ret, max_depth - 1))
            } else {
                render(pool, f.ret, max_depth - 1)
            };
            format!("({}) -> {}", parts.join(", "), ret)
        }
        Ty::Table(id) => {
            if max_depth == 0 {
                return ELIDED.to_string();
            }
            let t = pool.table(id);
            if t.is_empty() {
                return "{}".to_string();
            }
            let mut parts = Vec::new();
            if let Some(v) = t.string_key {
                parts.push(format!("[:string]: {}", render(pool, v, max_depth - 1)));
            }
            if let Some(v) = t.number_key {
                parts.push(format!("[:number]: {}", render(pool, v, max_depth - 1)));
            }
            if let Some(v) = t.boolean_key {
                parts.push(format!("[:boolean]: {}", render(pool, v, max_depth - 1)));
            }
            if let Some(v) = t.true_branch {
                parts.push(format!("[true]: {}", render(pool, v, max_depth - 1)));
            }
            if let Some(v) = t.false_branch {
                parts.push(format!("[false]: {}", render(pool, v, max_depth - 1)));
            }
            for (key, v) in &t.entries {
                if is_ident_key(key) {
                    parts.push(format!("{}: {}", key, render(pool, *v, max_depth - 1)));
                } else {
                    parts.push(format!("[\"{}\"]: {}", key, render(pool, *v, max_depth - 1)));
                }
            }
            for (key, v) in &t.sequence {
                parts.push(format!("[{}]: {}", key, render(pool, *v, max_depth - 1)));
            }
            format!("{{ {} }}", parts.join(", "))
        }
        Ty::Union(_) => {
            let members: Vec<String> = pool
                .union_members(ty)
                .iter()
                .map(|m| render(pool, *m, max_depth))
                .collect();
            members.join(" | ")
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Failure modes of the type grammar: unbalanced delimiters on one side,
/// an unrecognized leaf token on the other.
#[derive(Debug, Clone, PartialEq)]
pub enum TyParseError {
    Unbalanced(String),
    UnknownToken(String),
}

impl fmt::Display for TyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TyParseError::Unbalanced(what) => write!(f, "unbalanced type expression: {}", what),
            TyParseError::UnknownToken(tok) => write!(f, "unrecognized type token '{}'", tok),
        }
    }
}

impl std::error::Error for TyParseError {}

#[derive(Debug, Clone, PartialEq)]
enum TyToken {
    Ident(String),
    Int(i64),
    Quoted(String),
    Star,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Colon,
    Comma,
    Pipe,
    Arrow,
    Ellipsis,
    True,
    False,
}

fn lex_ty(text: &str) -> Result<Vec<TyToken>, TyParseError> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '*' => {
                out.push(TyToken::Star);
                i += 1;
            }
            '[' => {
                out.push(TyToken::LBracket);
                i += 1;
            }
            ']' => {
                out.push(TyToken::RBracket);
                i += 1;
            }
            '{' => {
                out.push(TyToken::LBrace);
                i += 1;
            }
            '}' => {
                out.push(TyToken::RBrace);
                i += 1;
            }
            '(' => {
                out.push(TyToken::LParen);
                i += 1;
            }
            ')' => {
                out.push(TyToken::RParen);
                i += 1;
            }
            ':' => {
                out.push(TyToken::Colon);
                i += 1;
            }
            ',' => {
                out.push(TyToken::Comma);
                i += 1;
            }
            '|' => {
                out.push(TyToken::Pipe);
                i += 1;
            }
            '-' if chars.get(i + 1) == Some(&'>') => {
                out.push(TyToken::Arrow);
                i += 2;
            }
            '.' if chars.get(i + 1) == Some(&'.') && chars.get(i + 2) == Some(&'.') => {
                out.push(TyToken::Ellipsis);
                i += 3;
            }
            '"' => {
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(TyParseError::Unbalanced("unterminated string key".to_string())),
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some(c) => {
                            s.push(*c);
                            i += 1;
                        }
                    }
                }
                out.push(TyToken::Quoted(s));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).map(|c| c.is_ascii_digit()).unwrap_or(false)) => {
                let start = i;
                i += 1;
                while chars.get(i).map(|c| c.is_ascii_digit()).unwrap_or(false) {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<i64>()
                    .map_err(|_| TyParseError::UnknownToken(text.clone()))?;
                out.push(TyToken::Int(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while chars
                    .get(i)
                    .map(|c| c.is_ascii_alphanumeric() || *c == '_')
                    .unwrap_or(false)
                {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                match ident.as_str() {
                    "true" => out.push(TyToken::True),
                    "false" => out.push(TyToken::False),
                    _ => out.push(TyToken::Ident(ident)),
                }
            }
            other => return Err(TyParseError::UnknownToken(other.to_string())),
        }
    }
    Ok(out)
}

/// Parse the canonical textual type form back into the pool. Left inverse
/// of [`render`] by construction.
pub fn parse(pool: &mut TyPool, text: &str) -> Result<Ty, TyParseError> {
    let tokens = lex_ty(text)?;
    let mut parser = TyParser { tokens, pos: 0, pool };
    let ty = parser.parse_union()?;
    if parser.pos != parser.tokens.len() {
        return Err(TyParseError::Unbalanced(format!(
            "trailing tokens after type ({} left)",
            parser.tokens.len() - parser.pos
        )));
    }
    Ok(ty)
}

struct TyParser<'p> {
    tokens: Vec<TyToken>,
    pos: usize,
    pool: &'p mut TyPool,
}

impl<'p> TyParser<'p> {
    fn peek(&self) -> Option<&TyToken> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, tok: &TyToken) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: TyToken, what: &str) -> Result<(), TyParseError> {
        if self.eat(&tok) {
            Ok(())
        } else {
            Err(TyParseError::Unbalanced(what.to_string()))
        }
    }

    fn parse_union(&mut self) -> Result<Ty, TyParseError> {
        let mut ty = self.parse_item()?;
        while self.eat(&TyToken::Pipe) {
            let rhs = self.parse_item()?;
            ty = self.pool.union(ty, rhs);
        }
        Ok(ty)
    }

    fn parse_item(&mut self) -> Result<Ty, TyParseError> {
        match self.peek().cloned() {
            Some(TyToken::Star) => {
                self.pos += 1;
                Ok(Ty::Any)
            }
            Some(TyToken::Ident(name)) => {
                self.pos += 1;
                match name.as_str() {
                    "nil" => Ok(Ty::Nil),
                    "number" => Ok(Ty::Number),
                    "boolean" => Ok(Ty::Boolean),
                    "string" => Ok(Ty::String),
                    other => Err(TyParseError::UnknownToken(other.to_string())),
                }
            }
            Some(TyToken::LBracket) => self.parse_tuple(),
            Some(TyToken::LBrace) => self.parse_table(),
            Some(TyToken::LParen) => self.parse_fn_or_group(),
            Some(other) => Err(TyParseError::UnknownToken(format!("{:?}", other))),
            None => Err(TyParseError::Unbalanced("empty type expression".to_string())),
        }
    }

    fn parse_tuple(&mut self) -> Result<Ty, TyParseError> {
        self.expect(TyToken::LBracket, "expected '['")?;
        let mut elems = Vec::new();
        if !self.eat(&TyToken::RBracket) {
            loop {
                elems.push(self.parse_union()?);
                if !self.eat(&TyToken::Comma) {
                    break;
                }
            }
            self.expect(TyToken::RBracket, "missing ']'")?;
        }
        Ok(self.pool.tuple(elems))
    }

    /// `(` opens either a function signature or, in return position, a
    /// parenthesized union. Params are recognized by `name ':'`.
    fn parse_fn_or_group(&mut self) -> Result<Ty, TyParseError> {
        self.expect(TyToken::LParen, "expected '('")?;
        let is_params = match (self.peek(), self.tokens.get(self.pos + 1)) {
            (Some(TyToken::RParen), _) => true,
            (Some(TyToken::Ellipsis), _) => true,
            (Some(TyToken::Ident(_)), Some(TyToken::Colon)) => true,
            _ => false,
        };
        if !is_params {
            let inner = self.parse_union()?;
            self.expect(TyToken::RParen, "missing ')'")?;
            return Ok(inner);
        }

        let mut params = Vec::new();
        let mut vararg = None;
        if !self.eat(&TyToken::RParen) {
            loop {
                if self.eat(&TyToken::Ellipsis) {
                    self.expect(TyToken::Colon, "expected ':' after '...'")?;
                    vararg = Some(self.parse_union()?);
                    break;
                }
                let name = match self.peek().cloned() {
                    Some(TyToken::Ident(n)) => {
                        self.pos += 1;
                        n
                    }
                    other => return Err(TyParseError::UnknownToken(format!("{:?}", other))),
                };
                self.expect(TyToken::Colon, "expected ':' after parameter name")?;
                let ty = self.parse_union()?;
                params.push((name, ty));
                if !self.eat(&TyToken::Comma) {
                    break;
                }
            }
            self.expect(TyToken::RParen, "missing ')'")?;
        }
        self.expect(TyToken::Arrow, "expected '->' after parameter list")?;
        let ret = self.parse_item_or_group()?;
        Ok(Ty::Function(self.pool.alloc_fn(FnTy { params, vararg, ret })))
    }

    /// Return position: a parenthesized union or a single item.
    fn parse_item_or_group(&mut self) -> Result<Ty, TyParseError> {
        if let Some(TyToken::LParen) = self.peek() {
            return self.parse_fn_or_group();
        }
        self.parse_item()
    }

    fn parse_table(&mut self) -> Result<Ty, TyParseError> {
        self.expect(TyToken::LBrace, "expected '{'")?;
        let mut table = TableTy::default();
        if !self.eat(&TyToken::RBrace) {
            loop {
                self.parse_table_field(&mut table)?;
                if !self.eat(&TyToken::Comma) {
                    break;
                }
            }
            self.expect(TyToken::RBrace, "missing '}'")?;
        }
        Ok(Ty::Table(self.pool.alloc_table(table)))
    }

    fn parse_table_field(&mut self, table: &mut TableTy) -> Result<(), TyParseError> {
        match self.peek().cloned() {
            Some(TyToken::LBracket) => {
                self.pos += 1;
                match self.peek().cloned() {
                    Some(TyToken::Colon) => {
                        self.pos += 1;
                        let kind = match self.peek().cloned() {
                            Some(TyToken::Ident(n)) => {
                                self.pos += 1;
                                n
                            }
                            other => return Err(TyParseError::UnknownToken(format!("{:?}", other))),
                        };
                        self.expect(TyToken::RBracket, "missing ']'")?;
                        self.expect(TyToken::Colon, "expected ':' after table key")?;
                        let value = self.parse_union()?;
                        match kind.as_str() {
                            "string" => table.string_key = Some(value),
                            "number" => table.number_key = Some(value),
                            "boolean" => table.boolean_key = Some(value),
                            other => return Err(TyParseError::UnknownToken(other.to_string())),
                        }
                    }
                    Some(TyToken::True) => {
                        self.pos += 1;
                        self.expect(TyToken::RBracket, "missing ']'")?;
                        self.expect(TyToken::Colon, "expected ':' after table key")?;
                        table.true_branch = Some(self.parse_union()?);
                    }
                    Some(TyToken::False) => {
                        self.pos += 1;
                        self.expect(TyToken::RBracket, "missing ']'")?;
                        self.expect(TyToken::Colon, "expected ':' after table key")?;
                        table.false_branch = Some(self.parse_union()?);
                    }
                    Some(TyToken::Int(n)) => {
                        self.pos += 1;
                        self.expect(TyToken::RBracket, "missing ']'")?;
                        self.expect(TyToken::Colon, "expected ':' after table key")?;
                        let value = self.parse_union()?;
                        table.sequence.insert(n, value);
                    }
                    Some(TyToken::Quoted(key)) => {
                        self.pos += 1;
                        self.expect(TyToken::RBracket, "missing ']'")?;
                        self.expect(TyToken::Colon, "expected ':' after table key")?;
                        let value = self.parse_union()?;
                        table.entries.insert(key, value);
                    }
                    other => return Err(TyParseError::UnknownToken(format!("{:?}", other))),
                }
            }
            Some(TyToken::Ident(key)) => {
                self.pos += 1;
                self.expect(TyToken::Colon, "expected ':' after table key")?;
                let value = self.parse_union()?;
                table.entries.insert(key, value);
            }
            other => return Err(TyParseError::UnknownToken(format!("{:?}", other))),
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Equivalence
// ---------------------------------------------------------------------------

/// Structural equivalence up to union-member reordering and the
/// sequence/typed-key folding. Cycles compare true once the guard is hit.
pub fn equivalent(pool: &TyPool, a: Ty, b: Ty, max_depth: usize) -> bool {
    let mut in_progress = FastHashSet::default();
    equivalent_inner(pool, a, b, max_depth, &mut in_progress)
}

fn equivalent_inner(pool: &TyPool, a: Ty, b: Ty, depth: usize, in_progress: &mut FastHashSet<(Ty, Ty)>) -> bool {
    if a == b {
        return true;
    }
    if depth == 0 || !in_progress.insert((a, b)) {
        // Recursion guard: assume the in-flight comparison will hold.
        return true;
    }
    let result = match (a, b) {
        (Ty::Union(_), _) | (_, Ty::Union(_)) => {
            let mut left = pool.union_members(a);
            let mut right = pool.union_members(b);
            if left.len() != right.len() {
                false
            } else {
                left.retain(|l| {
                    if let Some(idx) = right
                        .iter()
                        .position(|r| equivalent_inner(pool, *l, *r, depth - 1, in_progress))
                    {
                        right.remove(idx);
                        false
                    } else {
                        true
                    }
                });
                left.is_empty() && right.is_empty()
            }
        }
        (Ty::Table(ia), Ty::Table(ib)) => {
            let ta = fold_view(pool, pool.table(ia));
            let tb = fold_view(pool, pool.table(ib));
            tables_equivalent(pool, &ta, &tb, depth, in_progress)
        }
        (Ty::Function(ia), Ty::Function(ib)) => {
            let fa = pool.function(ia);
            let fb = pool.function(ib);
            fa.params.len() == fb.params.len()
                && fa
                    .params
                    .iter()
                    .zip(&fb.params)
                    .all(|((_, ta), (_, tb))| equivalent_inner(pool, *ta, *tb, depth - 1, in_progress))
                && match (fa.vararg, fb.vararg) {
                    (None, None) => true,
                    (Some(va), Some(vb)) => equivalent_inner(pool, va, vb, depth - 1, in_progress),
                    _ => false,
                }
                && equivalent_inner(pool, fa.ret, fb.ret, depth - 1, in_progress)
        }
        (Ty::Tuple(ia), Ty::Tuple(ib)) => {
            let ea = pool.tuple_elems(ia);
            let eb = pool.tuple_elems(ib);
            ea.len() == eb.len()
                && ea
                    .iter()
                    .zip(eb)
                    .all(|(x, y)| equivalent_inner(pool, *x, *y, depth - 1, in_progress))
        }
        _ => false,
    };
    in_progress.remove(&(a, b));
    result
}

/// View of a table with a uniform `1..n` sequence folded into the typed
/// number key, so `{ [1]: number, [2]: number }` ≡ `{ [:number]: number }`.
fn fold_view(pool: &TyPool, table: &TableTy) -> TableTy {
    let mut view = table.clone();
    if view.number_key.is_none() && !view.sequence.is_empty() {
        let contiguous = view
            .sequence
            .keys()
            .copied()
            .eq(1..=view.sequence.len() as i64);
        let first = *view.sequence.values().next().expect("non-empty");
        let uniform = view
            .sequence
            .values()
            .all(|v| equivalent(pool, *v, first, MAX_TYPE_DEPTH));
        if contiguous && uniform {
            view.number_key = Some(first);
            view.sequence.clear();
        }
    }
    view
}

fn tables_equivalent(
    pool: &TyPool,
    a: &TableTy,
    b: &TableTy,
    depth: usize,
    in_progress: &mut FastHashSet<(Ty, Ty)>,
) -> bool {
    let opt_eq = |x: Option<Ty>, y: Option<Ty>, in_progress: &mut FastHashSet<(Ty, Ty)>| match (x, y) {
        (None, None) => true,
        (Some(x), Some(y)) => equivalent_inner(pool, x, y, depth - 1, in_progress),
        _ => false,
    };
    if a.entries.len() != b.entries.len() || a.sequence.len() != b.sequence.len() {
        return false;
    }
    for (key, va) in &a.entries {
        match b.entries.get(key) {
            Some(vb) if equivalent_inner(pool, *va, *vb, depth - 1, in_progress) => {}
            _ => return false,
        }
    }
    for (key, va) in &a.sequence {
        match b.sequence.get(key) {
            Some(vb) if equivalent_inner(pool, *va, *vb, depth - 1, in_progress) => {}
            _ => return false,
        }
    }
    opt_eq(a.true_branch, b.true_branch, in_progress)
        && opt_eq(a.false_branch, b.false_branch, in_progress)
        && opt_eq(a.string_key, b.string_key, in_progress)
        && opt_eq(a.number_key, b.number_key, in_progress)
        && opt_eq(a.boolean_key, b.boolean_key, in_progress)
}

// ---------------------------------------------------------------------------
// Simplification
// ---------------------------------------------------------------------------

/// De-duplicate union members, merge tuple prefixes, fold uniform
/// sequences. Idempotent.
pub fn simplify(pool: &mut TyPool, ty: Ty) -> Ty {
    let mut visited = FastHashSet::default();
    simplify_inner(pool, ty, &mut visited)
}

fn simplify_inner(pool: &mut TyPool, ty: Ty, visited: &mut FastHashSet<Ty>) -> Ty {
    if !visited.insert(ty) {
        return ty;
    }
    match ty {
        Ty::Union(_) => {
            let members = pool.union_members(ty);
            let mut kept: Vec<Ty> = Vec::new();
            for member in members {
                let member = simplify_inner(pool, member, visited);
                let mut merged = false;
                for existing in kept.iter_mut() {
                    if equivalent(pool, *existing, member, MAX_TYPE_DEPTH) {
                        merged = true;
                        break;
                    }
                    if let Some(longer) = merge_tuple_prefix(pool, *existing, member) {
                        *existing = longer;
                        merged = true;
                        break;
                    }
                }
                if !merged {
                    kept.push(member);
                }
            }
            pool.union_of(&kept)
        }
        Ty::Table(id) => {
            let keys: Vec<String> = pool.table(id).entries.keys().cloned().collect();
            for key in keys {
                let v = pool.table(id).entries[&key];
                let v = simplify_inner(pool, v, visited);
                pool.table_mut(id).entries.insert(key, v);
            }
            let indices: Vec<i64> = pool.table(id).sequence.keys().copied().collect();
            for index in indices {
                let v = pool.table(id).sequence[&index];
                let v = simplify_inner(pool, v, visited);
                pool.table_mut(id).sequence.insert(index, v);
            }
            if let Some(v) = pool.table(id).true_branch {
                let v = simplify_inner(pool, v, visited);
                pool.table_mut(id).true_branch = Some(v);
            }
            if let Some(v) = pool.table(id).false_branch {
                let v = simplify_inner(pool, v, visited);
                pool.table_mut(id).false_branch = Some(v);
            }
            if let Some(v) = pool.table(id).string_key {
                let v = simplify_inner(pool, v, visited);
                pool.table_mut(id).string_key = Some(v);
            }
            if let Some(v) = pool.table(id).number_key {
                let v = simplify_inner(pool, v, visited);
                pool.table_mut(id).number_key = Some(v);
            }
            if let Some(v) = pool.table(id).boolean_key {
                let v = simplify_inner(pool, v, visited);
                pool.table_mut(id).boolean_key = Some(v);
            }
            let folded = fold_view(pool, pool.table(id));
            *pool.table_mut(id) = folded;
            Ty::Table(id)
        }
        Ty::Tuple(id) => {
            let elems: Vec<Ty> = pool.tuple_elems(id).to_vec();
            let elems: Vec<Ty> = elems.into_iter().map(|e| simplify_inner(pool, e, visited)).collect();
            pool.tuples[id.0 as usize] = elems;
            Ty::Tuple(id)
        }
        Ty::Function(id) => {
            let ret = pool.function(id).ret;
            let ret = simplify_inner(pool, ret, visited);
            pool.function_mut(id).ret = ret;
            Ty::Function(id)
        }
        atom => atom,
    }
}

/// If one tuple is an elementwise-equivalent prefix of the other, the
/// union of the two collapses to the longer.
fn merge_tuple_prefix(pool: &TyPool, a: Ty, b: Ty) -> Option<Ty> {
    let (Ty::Tuple(ia), Ty::Tuple(ib)) = (a, b) else {
        return None;
    };
    let ea = pool.tuple_elems(ia);
    let eb = pool.tuple_elems(ib);
    let (short, long, longer) = if ea.len() <= eb.len() {
        (ea, eb, b)
    } else {
        (eb, ea, a)
    };
    if short
        .iter()
        .zip(long)
        .all(|(x, y)| equivalent(pool, *x, *y, MAX_TYPE_DEPTH))
    {
        Some(longer)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(text: &str) -> String {
        let mut pool = TyPool::new();
        let ty = parse(&mut pool, text).expect("parse failure");
        render(&pool, ty, MAX_TYPE_DEPTH)
    }

    #[test]
    fn renders_atoms() {
        let pool = TyPool::new();
        assert_eq!(render(&pool, Ty::Nil, 5), "nil");
        assert_eq!(render(&pool, Ty::Number, 5), "number");
        assert_eq!(render(&pool, Ty::Any, 5), "*");
    }

    #[test]
    fn roundtrips_compound_types() {
        for text in [
            "number",
            "number | string",
            "[number, string]",
            "(x: number, ...: string) -> nil",
            "() -> (number | nil)",
            "{ a: number, [\"not id\"]: string, [1]: boolean }",
            "{ [:number]: string, [true]: nil }",
            "{ f: (a: *) -> { b: number } }",
        ] {
            assert_eq!(roundtrip(text), text, "round trip failed for {}", text);
        }
    }

    #[test]
    fn parse_rejects_unknown_leaf() {
        let mut pool = TyPool::new();
        assert!(matches!(
            parse(&mut pool, "integer"),
            Err(TyParseError::UnknownToken(_))
        ));
    }

    #[test]
    fn parse_rejects_unbalanced() {
        let mut pool = TyPool::new();
        assert!(matches!(
            parse(&mut pool, "[number, string"),
            Err(TyParseError::Unbalanced(_))
        ));
        assert!(matches!(
            parse(&mut pool, "{ a: number"),
            Err(TyParseError::Unbalanced(_))
        ));
    }

    #[test]
    fn union_members_deduplicate() {
        let mut pool = TyPool::new();
        let ty = parse(&mut pool, "number | number | string").unwrap();
        let ty = simplify(&mut pool, ty);
        assert_eq!(render(&pool, ty, MAX_TYPE_DEPTH), "number | string");
    }

    #[test]
    fn simplify_is_idempotent() {
        let mut pool = TyPool::new();
        let ty = parse(&mut pool, "number | string | number | [number] | [number, nil]").unwrap();
        let once = simplify(&mut pool, ty);
        let twice = simplify(&mut pool, once);
        assert_eq!(
            render(&pool, once, MAX_TYPE_DEPTH),
            render(&pool, twice, MAX_TYPE_DEPTH)
        );
    }

    #[test]
    fn simplify_reaches_all_table_value_slots() {
        let mut pool = TyPool::new();
        let seq = parse(&mut pool, "number | string | number").unwrap();
        let num_key = parse(&mut pool, "number | string | number").unwrap();
        let truthy = parse(&mut pool, "number | string | number").unwrap();
        let mut table = TableTy::default();
        table.sequence.insert(1, seq);
        table.number_key = Some(num_key);
        table.true_branch = Some(truthy);
        let id = pool.alloc_table(table);

        let ty = simplify(&mut pool, Ty::Table(id));
        assert_eq!(ty, Ty::Table(id));
        let slots = [
            pool.table(id).sequence[&1],
            pool.table(id).number_key.expect("number key kept"),
            pool.table(id).true_branch.expect("true slot kept"),
        ];
        for slot in slots {
            assert_eq!(render(&pool, slot, MAX_TYPE_DEPTH), "number | string");
        }
    }

    #[test]
    fn uniform_sequence_folds_into_number_key() {
        let mut pool = TyPool::new();
        let ty = parse(&mut pool, "{ [1]: number, [2]: number }").unwrap();
        let ty = simplify(&mut pool, ty);
        assert_eq!(render(&pool, ty, MAX_TYPE_DEPTH), "{ [:number]: number }");
    }

    #[test]
    fn sequence_and_typed_key_are_equivalent() {
        let mut pool = TyPool::new();
        let a = parse(&mut pool, "{ [1]: number, [2]: number }").unwrap();
        let b = parse(&mut pool, "{ [:number]: number }").unwrap();
        assert!(equivalent(&pool, a, b, MAX_TYPE_DEPTH));
    }

    #[test]
    fn union_equivalence_ignores_order() {
        let mut pool = TyPool::new();
        let a = parse(&mut pool, "number | string").unwrap();
        let b = parse(&mut pool, "string | number").unwrap();
        assert!(equivalent(&pool, a, b, MAX_TYPE_DEPTH));
        let c = parse(&mut pool, "string | nil").unwrap();
        assert!(!equivalent(&pool, a, c, MAX_TYPE_DEPTH));
    }

    #[test]
    fn circular_table_render_terminates() {
        let mut pool = TyPool::new();
        let id = pool.new_table();
        pool.table_mut(id).entries.insert("t".to_string(), Ty::Table(id));
        let rendered = render(&pool, Ty::Table(id), MAX_TYPE_DEPTH);
        assert!(rendered.contains('…'));
    }

    #[test]
    fn circular_tables_compare_equivalent() {
        let mut pool = TyPool::new();
        let a = pool.new_table();
        pool.table_mut(a).entries.insert("t".to_string(), Ty::Table(a));
        let b = pool.new_table();
        pool.table_mut(b).entries.insert("t".to_string(), Ty::Table(b));
        assert!(equivalent(&pool, Ty::Table(a), Ty::Table(b), MAX_TYPE_DEPTH));
    }

    #[test]
    fn function_return_union_is_parenthesized() {
        let mut pool = TyPool::new();
        let u = parse(&mut pool, "number | nil").unwrap();
        let f = pool.alloc_fn(FnTy {
            params: vec![("x".to_string(), Ty::Number)],
            vararg: None,
            ret: u,
        });
        assert_eq!(
            render(&pool, Ty::Function(f), MAX_TYPE_DEPTH),
            "(x: number) -> (number | nil)"
        );
    }
}
