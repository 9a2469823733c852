use std::fs;
use std::sync::Arc;

use loupe_lsp::analyzer::{Analysis, AnalyzerSettings, ApiDefs, DocumentSession};
use tower_lsp::lsp_types::{DocumentSymbol, SymbolKind};

fn snapshot(src: &str) -> Arc<Analysis> {
    let mut session =
        DocumentSession::new(Arc::new(ApiDefs::load("0.2")), AnalyzerSettings::default());
    session.update(src, None);
    session.snapshot().expect("analysis snapshot")
}

fn find<'a>(symbols: &'a [DocumentSymbol], name: &str) -> Option<&'a DocumentSymbol> {
    symbols.iter().find(|s| s.name == name)
}

#[test]
fn functions_nest_their_locals() {
    let src = "function update()\n  local t = 0\nend\nlocal score = 0";
    let snap = snapshot(src);

    let update = find(&snap.symbols, "update").expect("update symbol");
    assert_eq!(update.kind, SymbolKind::FUNCTION);
    let kids = update.children.as_deref().unwrap_or_default();
    let t = find(kids, "t").expect("t under update");
    assert_eq!(t.kind, SymbolKind::VARIABLE);

    let score = find(&snap.symbols, "score").expect("score symbol");
    assert_eq!(score.kind, SymbolKind::VARIABLE);
}

#[test]
fn nested_functions_appear_under_their_parent() {
    let src = "function outer()\n  local function inner()\n    local y = 1\n  end\nend";
    let snap = snapshot(src);

    let outer = find(&snap.symbols, "outer").expect("outer symbol");
    let kids = outer.children.as_deref().unwrap_or_default();
    let inner = find(kids, "inner").expect("inner under outer");
    assert_eq!(inner.kind, SymbolKind::FUNCTION);
    let inner_kids = inner.children.as_deref().unwrap_or_default();
    assert!(find(inner_kids, "y").is_some());
}

#[test]
fn include_links_describe_their_target() {
    let dir = std::env::temp_dir().join(format!("loupe_links_{}", std::process::id()));
    fs::create_dir_all(&dir).expect("temp dir");
    fs::write(dir.join("whole.lua"), "a = 1\n").expect("write whole.lua");
    fs::write(dir.join("sectioned.lua"), "a = 1\n-->8\nb = 2\n").expect("write sectioned.lua");

    let mut session =
        DocumentSession::new(Arc::new(ApiDefs::load("0.2")), AnalyzerSettings::default());
    let diags = session.update("#include whole.lua\n#include sectioned.lua\nx = 1", Some(&dir));
    assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);

    let snap = session.snapshot().expect("snapshot");
    assert_eq!(snap.links.len(), 2);
    assert_eq!(
        snap.links[0].tooltip.as_deref(),
        Some("includes the whole of 'whole.lua'")
    );
    assert_eq!(
        snap.links[1].tooltip.as_deref(),
        Some("includes 'sectioned.lua' up to its first '-->8' section marker")
    );
    assert!(snap.links.iter().all(|l| l.target.is_some()));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn oversized_include_is_diagnosed_without_a_tooltip() {
    let dir = std::env::temp_dir().join(format!("loupe_links_big_{}", std::process::id()));
    fs::create_dir_all(&dir).expect("temp dir");
    fs::write(dir.join("big.lua"), "-- filler\n".repeat(10_000)).expect("write big.lua");

    let mut session =
        DocumentSession::new(Arc::new(ApiDefs::load("0.2")), AnalyzerSettings::default());
    let diags = session.update("#include big.lua", Some(&dir));
    assert_eq!(diags.len(), 1);
    assert!(diags[0].message.contains("larger than"), "got {:?}", diags);

    let snap = session.snapshot().expect("snapshot");
    assert_eq!(snap.links.len(), 1);
    assert!(snap.links[0].tooltip.is_none());

    let _ = fs::remove_dir_all(&dir);
}
