use std::sync::Arc;

use loupe_lsp::analyzer::{AnalyzerSettings, ApiDefs, DocumentSession};
use tower_lsp::lsp_types::DiagnosticSeverity;

fn analyze(src: &str) -> Vec<tower_lsp::lsp_types::Diagnostic> {
    let mut session =
        DocumentSession::new(Arc::new(ApiDefs::load("0.2")), AnalyzerSettings::default());
    session.update(src, None)
}

fn messages(src: &str) -> Vec<String> {
    analyze(src).into_iter().map(|d| d.message).collect()
}

#[test]
fn arithmetic_on_string_is_reported() {
    let msgs = messages("x = \"a\" + 1");
    assert!(
        msgs.iter().any(|m| m == "expected a number, got string"),
        "got {:?}",
        msgs
    );
}

#[test]
fn concatenating_boolean_is_reported() {
    let msgs = messages("s = true .. \"a\"");
    assert!(
        msgs.iter().any(|m| m == "cannot concatenate a boolean value"),
        "got {:?}",
        msgs
    );
}

#[test]
fn comparing_mixed_types_is_reported() {
    let msgs = messages("b = 1 == \"a\"");
    assert!(
        msgs.iter()
            .any(|m| m == "comparing values of different types (number and string)"),
        "got {:?}",
        msgs
    );
}

#[test]
fn calling_a_number_is_reported() {
    let msgs = messages("local n = 4\nn()");
    assert!(
        msgs.iter().any(|m| m == "attempt to call a number value"),
        "got {:?}",
        msgs
    );
}

#[test]
fn indexing_a_number_is_reported() {
    let msgs = messages("local n = 5\nn.field = 1");
    assert!(
        msgs.iter().any(|m| m == "cannot index a number value"),
        "got {:?}",
        msgs
    );
}

#[test]
fn break_and_goto_misuse_are_warnings() {
    let diags = analyze("break");
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].severity, Some(DiagnosticSeverity::WARNING));
    assert_eq!(diags[0].message, "break outside of a loop");

    let msgs = messages("goto done");
    assert!(
        msgs.iter()
            .any(|m| m == "label 'done' not defined or not visible"),
        "got {:?}",
        msgs
    );
}

#[test]
fn diagnostics_carry_the_source_name() {
    let diags = analyze("break");
    assert_eq!(diags[0].source.as_deref(), Some("loupe"));
}

#[test]
fn clean_program_has_no_diagnostics() {
    let src = r#"
local score = 0
local lives = 3

function _update()
  for i = 1, 10 do
    score = score + i
    if score > 100 then
      break
    end
  end
end

function _draw()
  cls(0)
  print("score: " .. score, 4, 4, 7)
  for i = 1, lives do
    spr(1, i * 8, 120)
  end
end
"#;
    let diags = analyze(src);
    assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);
}

#[test]
fn parse_error_is_a_single_error_diagnostic() {
    let diags = analyze("local = 3");
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].severity, Some(DiagnosticSeverity::ERROR));
}
