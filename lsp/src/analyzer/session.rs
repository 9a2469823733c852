use std::path::{Path, PathBuf};
use std::sync::Arc;

use tower_lsp::lsp_types::{
    Diagnostic, DiagnosticSeverity, DocumentHighlight, DocumentLink, DocumentSymbol,
    ParameterInformation, ParameterLabel, Position as LspPosition, Range, SignatureHelp,
    SignatureInformation, Url,
};

use loupe_core::ast;
use loupe_core::token::{Directive, Position, Span};

use super::builtins::ApiDefs;
use super::doc::Doc;
use super::lut::Luts;
use super::scope::{Declared, ScopeTree};
use super::ty::{self, Ty, TyPool, MAX_TYPE_DEPTH};
use super::walker::{self, span_range};

/// Include targets larger than this get a diagnostic instead of a tooltip
/// describing their content.
const MAX_INCLUDE_BYTES: u64 = 64 * 1024;

/// Marker separating file sections by convention.
const SECTION_MARKER: &str = "-->8";

/// Per-document analyzer configuration, already decoded from the client's
/// settings by the server layer.
#[derive(Debug, Clone, Default)]
pub struct AnalyzerSettings {
    pub pre_defined_globals: Vec<String>,
    pub ignore_p8scii: bool,
}

/// One committed analysis snapshot. Queries are pure reads; a session swaps
/// the whole snapshot atomically on a successful re-walk.
#[derive(Debug)]
pub struct Analysis {
    pub pool: TyPool,
    pub scopes: ScopeTree,
    pub luts: Luts,
    pub diagnostics: Vec<Diagnostic>,
    pub symbols: Vec<DocumentSymbol>,
    pub links: Vec<DocumentLink>,
}

/// Analysis state for one open document. A failed parse never discards the
/// previous snapshot, so hover and completion keep working off stale data
/// while the user is mid-edit.
pub struct DocumentSession {
    defs: Arc<ApiDefs>,
    settings: AnalyzerSettings,
    snapshot: Option<Arc<Analysis>>,
}

impl DocumentSession {
    pub fn new(defs: Arc<ApiDefs>, settings: AnalyzerSettings) -> Self {
        Self {
            defs,
            settings,
            snapshot: None,
        }
    }

    pub fn snapshot(&self) -> Option<Arc<Analysis>> {
        self.snapshot.clone()
    }

    /// Re-analyze the document. Returns the diagnostics to publish. On a
    /// parse failure the old snapshot is kept and a single syntax
    /// diagnostic is returned.
    pub fn update(&mut self, text: &str, base_dir: Option<&Path>) -> Vec<Diagnostic> {
        let chunk = match ast::parse(text) {
            Ok(chunk) => chunk,
            Err(err) => {
                let pos = LspPosition::new(
                    err.line.saturating_sub(1),
                    err.column.saturating_sub(1),
                );
                return vec![Diagnostic::new(
                    Range::new(pos, pos),
                    Some(DiagnosticSeverity::ERROR),
                    None,
                    Some("loupe".to_string()),
                    err.message,
                    None,
                    None,
                )];
            }
        };

        let mut pool = TyPool::new();
        let mut scopes = ScopeTree::new();
        let mut luts = Luts::default();
        self.inject_globals(&mut pool, &mut scopes);
        let mut out = walker::walk(
            &mut pool,
            &mut scopes,
            &mut luts,
            &chunk,
            text,
            self.settings.ignore_p8scii,
        );
        let links = resolve_includes(&chunk.directives, base_dir, &mut out.diagnostics);

        let diagnostics = out.diagnostics.clone();
        self.snapshot = Some(Arc::new(Analysis {
            pool,
            scopes,
            luts,
            diagnostics: out.diagnostics,
            symbols: out.symbols,
            links,
        }));
        diagnostics
    }

    /// Populate the fresh global scope with the builtin API surface and any
    /// user-configured globals, so they resolve without source declarations.
    fn inject_globals(&self, pool: &mut TyPool, scopes: &mut ScopeTree) {
        // Sentinel span; never mapped back to a source range.
        let span = Span::single(Position::new(0, 0, 0));
        let global = scopes.global();
        for def in self.defs.iter() {
            let ty = ty::parse(pool, &def.ty).unwrap_or(Ty::Any);
            let doc = Doc {
                ty: Some(ty),
                text: def.doc.clone(),
            };
            if let Declared::Collision(_) = scopes.declare(global, &def.name, span, ty, Some(doc)) {
                tracing::warn!("duplicate builtin definition: {}", def.name);
            }
        }
        for name in &self.settings.pre_defined_globals {
            // User-declared ambient globals have an unknown shape.
            let _ = scopes.declare(global, name, span, Ty::Any, None);
        }
    }
}

fn is_sentinel(span: Span) -> bool {
    span.start.line == 0
}

impl Analysis {
    /// Markdown hover content for the identifier starting at the given
    /// 1-based position.
    pub fn hover(&self, line: u32, column: u32) -> Option<String> {
        let info = self.luts.ident_at(line, column)?;
        let rendered = ty::render(&self.pool, info.ty, MAX_TYPE_DEPTH);
        let mut text = format!("```\n{}: {}\n```", info.name, rendered);
        if let Some(doc) = &info.doc {
            if !doc.text.is_empty() {
                text.push_str("\n\n");
                text.push_str(&doc.text);
            }
        }
        Some(text)
    }

    /// Names visible at the byte offset, for completion. Each entry carries
    /// the rendered type and the doc text when one exists.
    pub fn visible_completions(&self, offset: usize) -> Vec<(String, Ty, Option<String>)> {
        let scope = self.luts.scope_at(offset, self.scopes.global());
        self.scopes
            .visible_names(scope)
            .into_iter()
            .map(|(name, var)| {
                let variable = self.scopes.var(var);
                let doc = variable.doc.as_ref().map(|d| d.text.clone());
                (name, variable.ty(), doc)
            })
            .collect()
    }

    /// Completion entries for `base.` where `base` is a table-typed
    /// expression ending right before the dot.
    pub fn member_completions(&self, line: u32, column: u32) -> Option<Vec<(String, Ty)>> {
        let info = self.luts.table_ending_at(line, column)?;
        let Ty::Table(id) = info.ty else {
            return None;
        };
        let table = self.pool.table(id);
        Some(table.entries.iter().map(|(k, v)| (k.clone(), *v)).collect())
    }

    /// Signature help for a call whose callee ends right before the opening
    /// paren. The active parameter is never tracked.
    pub fn signature_help(&self, line: u32, column: u32) -> Option<SignatureHelp> {
        let info = self.luts.fn_ending_at(line, column)?;
        let Ty::Function(id) = info.ty else {
            return None;
        };
        let f = self.pool.function(id);
        let label = ty::render(&self.pool, info.ty, MAX_TYPE_DEPTH);
        let parameters: Vec<ParameterInformation> = f
            .params
            .iter()
            .map(|(name, ty)| ParameterInformation {
                label: ParameterLabel::Simple(format!(
                    "{}: {}",
                    name,
                    ty::render(&self.pool, *ty, MAX_TYPE_DEPTH - 1)
                )),
                documentation: None,
            })
            .collect();
        Some(SignatureHelp {
            signatures: vec![SignatureInformation {
                label,
                documentation: None,
                parameters: Some(parameters),
                active_parameter: None,
            }],
            active_signature: None,
            active_parameter: None,
        })
    }

    /// Every occurrence of the variable whose identifier starts at the
    /// given position.
    pub fn highlights(&self, line: u32, column: u32) -> Option<Vec<DocumentHighlight>> {
        let info = self.luts.ident_at(line, column)?;
        let var = info.var?;
        let spans: Vec<DocumentHighlight> = self
            .scopes
            .var(var)
            .history
            .iter()
            .filter(|event| !is_sentinel(event.span))
            .map(|event| DocumentHighlight {
                range: span_range(event.span),
                kind: None,
            })
            .collect();
        if spans.is_empty() {
            None
        } else {
            Some(spans)
        }
    }
}

/// Resolve `#include` directives into document links, diagnosing targets
/// that cannot be read or are too large to preview.
fn resolve_includes(
    directives: &[Directive],
    base_dir: Option<&Path>,
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<DocumentLink> {
    let mut links = Vec::new();
    for directive in directives {
        let resolved: PathBuf = match base_dir {
            Some(dir) => dir.join(&directive.path),
            None => PathBuf::from(&directive.path),
        };
        let range = span_range(directive.span);
        let tooltip = match std::fs::metadata(&resolved) {
            Err(_) => {
                diagnostics.push(include_diag(
                    range,
                    format!("cannot read include target '{}'", directive.path),
                ));
                None
            }
            Ok(meta) if meta.len() > MAX_INCLUDE_BYTES => {
                diagnostics.push(include_diag(
                    range,
                    format!(
                        "include target '{}' is larger than {} KiB",
                        directive.path,
                        MAX_INCLUDE_BYTES / 1024
                    ),
                ));
                None
            }
            Ok(_) => match std::fs::read_to_string(&resolved) {
                Err(_) => {
                    diagnostics.push(include_diag(
                        range,
                        format!("cannot read include target '{}'", directive.path),
                    ));
                    None
                }
                Ok(content) => Some(if content.contains(SECTION_MARKER) {
                    format!(
                        "includes '{}' up to its first '{}' section marker",
                        directive.path, SECTION_MARKER
                    )
                } else {
                    format!("includes the whole of '{}'", directive.path)
                }),
            },
        };
        links.push(DocumentLink {
            range,
            target: Url::from_file_path(&resolved).ok(),
            tooltip,
            data: None,
        });
    }
    links
}

fn include_diag(range: Range, message: String) -> Diagnostic {
    Diagnostic::new(
        range,
        Some(DiagnosticSeverity::WARNING),
        None,
        Some("loupe".to_string()),
        message,
        None,
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> DocumentSession {
        DocumentSession::new(Arc::new(ApiDefs::load("0.2")), AnalyzerSettings::default())
    }

    #[test]
    fn builtins_resolve_without_declaration() {
        let mut s = session();
        let diags = s.update("print(\"hi\", 0, 0, 7)", None);
        assert!(diags.is_empty(), "{:?}", diags);
        let snap = s.snapshot().expect("snapshot");
        let hover = snap.hover(1, 1).expect("hover on print");
        assert!(hover.contains("print"));
        assert!(hover.contains("->"));
    }

    #[test]
    fn parse_failure_keeps_previous_snapshot() {
        let mut s = session();
        let ok = s.update("local answer = 42", None);
        assert!(ok.is_empty());
        let before = s.snapshot().expect("snapshot");
        let hover_before = before.hover(1, 7);
        assert!(hover_before.is_some());

        let diags = s.update("local answer = = 42", None);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, Some(DiagnosticSeverity::ERROR));

        let after = s.snapshot().expect("snapshot survives");
        assert_eq!(after.hover(1, 7), hover_before);
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn predefined_globals_are_injected_as_unknown() {
        let settings = AnalyzerSettings {
            pre_defined_globals: vec!["game_state".to_string()],
            ignore_p8scii: false,
        };
        let mut s = DocumentSession::new(Arc::new(ApiDefs::load("0.2")), settings);
        let diags = s.update("game_state.level = 1", None);
        // Indexing an unknown global is permitted, not diagnosed.
        assert!(diags.is_empty(), "{:?}", diags);
    }

    #[test]
    fn visible_completions_respect_scope() {
        let mut s = session();
        let src = "local top = 1\nfunction f()\n  local inner = 2\nend";
        s.update(src, None);
        let snap = s.snapshot().unwrap();
        let inner_offset = src.find("inner").unwrap();
        let names: Vec<String> = snap
            .visible_completions(inner_offset)
            .into_iter()
            .map(|(n, _, _)| n)
            .collect();
        assert!(names.contains(&"inner".to_string()));
        assert!(names.contains(&"top".to_string()));

        let top_names: Vec<String> = snap
            .visible_completions(0)
            .into_iter()
            .map(|(n, _, _)| n)
            .collect();
        assert!(!top_names.contains(&"inner".to_string()));
    }

    #[test]
    fn member_completions_after_table_expression() {
        let mut s = session();
        let src = "local player = { x = 1, y = 2 }\nlocal p = player";
        s.update(src, None);
        let snap = s.snapshot().unwrap();
        // line 2: "local p = player" -- 'player' spans cols 11..=16, end key 17
        let members = snap.member_completions(2, 17).expect("table under cursor");
        let names: Vec<&str> = members.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["x", "y"]);
    }

    #[test]
    fn signature_help_after_function_name() {
        let mut s = session();
        let src = "--[[\n(x: number) -> number\n]]\nfunction double(x) return x + x end\nd = double";
        s.update(src, None);
        let snap = s.snapshot().unwrap();
        // line 5: "d = double" -- 'double' ends at col 10, end key 11
        let help = snap.signature_help(5, 11).expect("signature");
        assert_eq!(help.signatures.len(), 1);
        assert!(help.signatures[0].label.contains("x: number"));
        assert!(help.active_parameter.is_none());
    }

    #[test]
    fn highlights_cover_all_occurrences() {
        let mut s = session();
        let src = "local hp = 3\nhp = hp - 1";
        s.update(src, None);
        let snap = s.snapshot().unwrap();
        let highlights = snap.highlights(1, 7).expect("highlights");
        assert_eq!(highlights.len(), 3);
    }

    #[test]
    fn missing_include_target_is_diagnosed() {
        let mut s = session();
        let diags = s.update("#include does_not_exist.lua\nx = 1", None);
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.contains("does_not_exist.lua"));
        let snap = s.snapshot().unwrap();
        assert_eq!(snap.links.len(), 1);
        assert!(snap.links[0].tooltip.is_none());
    }
}
