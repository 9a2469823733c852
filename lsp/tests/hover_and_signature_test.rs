use std::sync::Arc;

use loupe_lsp::analyzer::{Analysis, AnalyzerSettings, ApiDefs, DocumentSession};

fn snapshot(src: &str) -> Arc<Analysis> {
    let mut session =
        DocumentSession::new(Arc::new(ApiDefs::load("0.2")), AnalyzerSettings::default());
    let diags = session.update(src, None);
    assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);
    session.snapshot().expect("analysis snapshot")
}

#[test]
fn hover_shows_inferred_type() {
    let snap = snapshot("local hp = 3");
    let hover = snap.hover(1, 7).expect("hover on hp");
    assert!(hover.contains("hp: number"), "got {}", hover);
}

#[test]
fn hover_on_builtin_includes_documentation() {
    let snap = snapshot("print(\"hi\", 0, 0, 7)");
    let hover = snap.hover(1, 1).expect("hover on print");
    assert!(hover.starts_with("```"), "got {}", hover);
    assert!(hover.contains("print: ("), "got {}", hover);
    // The embedded reference text follows the signature block.
    assert!(hover.contains("```\n\n"), "got {}", hover);
}

#[test]
fn hover_uses_documented_signature() {
    let src = "--[[\n(dx: number, dy: number) -> boolean\nmoves the player\n]]\nfunction move(dx, dy) return true end";
    let snap = snapshot(src);
    let hover = snap.hover(5, 10).expect("hover on move");
    assert!(hover.contains("dx: number"), "got {}", hover);
    assert!(hover.contains("moves the player"), "got {}", hover);
}

#[test]
fn signature_help_lists_parameters() {
    let snap = snapshot("print(\"hi\", 0, 0, 7)");
    // 'print' spans columns 1..=5; the call site keys one past it.
    let help = snap.signature_help(1, 6).expect("signature for print");
    assert_eq!(help.signatures.len(), 1);
    let sig = &help.signatures[0];
    assert!(sig.label.contains("->"), "got {}", sig.label);
    assert!(sig.parameters.as_ref().is_some_and(|p| !p.is_empty()));
    assert!(help.active_parameter.is_none());
}

#[test]
fn member_completions_list_table_fields() {
    let src = "local player = { x = 0, y = 0, alive = true }\nlocal p = player";
    let snap = snapshot(src);
    let members = snap.member_completions(2, 17).expect("members of player");
    let names: Vec<&str> = members.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["alive", "x", "y"]);
}

#[test]
fn visible_completions_include_builtins() {
    let snap = snapshot("x = 1");
    let names: Vec<String> = snap
        .visible_completions(0)
        .into_iter()
        .map(|(n, _, _)| n)
        .collect();
    assert!(names.contains(&"flr".to_string()));
    assert!(names.contains(&"print".to_string()));
    assert!(names.contains(&"x".to_string()));
}

#[test]
fn highlights_skip_builtin_declarations() {
    // The builtin declaration of print has no source span, so only the
    // in-source use is highlighted.
    let snap = snapshot("print(\"a\", 0, 0, 7)");
    let highlights = snap.highlights(1, 1).expect("highlights for print");
    assert_eq!(highlights.len(), 1);
    assert_eq!(highlights[0].range.start.line, 0);
    assert_eq!(highlights[0].range.start.character, 0);
}
