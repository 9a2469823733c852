use once_cell::sync::Lazy;
use regex::Regex;
use ropey::Rope;
use tower_lsp::lsp_types::{Position, TextDocumentContentChangeEvent};

// Convert LSP UTF-16 position to Rope char index, clamped to the end of
// the line.
pub(crate) fn position_to_char_idx(text: &Rope, pos: Position) -> usize {
    let line_idx = pos.line as usize;
    if line_idx >= text.len_lines() {
        return text.len_chars();
    }
    let line_start_char = text.line_to_char(line_idx);
    let line_slice = text.line(line_idx);
    let target_utf16 = pos.character as usize;

    if let Some(s) = line_slice.as_str() {
        if s.is_ascii() {
            return line_start_char + target_utf16.min(s.len());
        }
    }

    let mut seen_utf16 = 0usize;
    let mut chars_in_line = 0usize;
    for ch in line_slice.chars() {
        let u16_len = ch.len_utf16();
        if seen_utf16 + u16_len > target_utf16 {
            break;
        }
        seen_utf16 += u16_len;
        chars_in_line += 1;
        if seen_utf16 == target_utf16 {
            break;
        }
    }
    line_start_char + chars_in_line
}

// Apply one LSP change to a rope buffer. A change without a range is a
// full replacement.
pub(crate) fn apply_content_change(text: &mut Rope, change: &TextDocumentContentChangeEvent) {
    if let Some(range) = &change.range {
        let start_char = position_to_char_idx(text, range.start);
        let end_char = position_to_char_idx(text, range.end);
        let (s, e) = if start_char <= end_char {
            (start_char, end_char)
        } else {
            (end_char, start_char)
        };
        if s != e {
            text.remove(s..e);
        }
        if !change.text.is_empty() {
            text.insert(s, &change.text);
        }
    } else {
        *text = Rope::from_str(&change.text);
    }
}

/// The text of the cursor's line up to the cursor.
pub(crate) fn line_prefix(text: &Rope, pos: Position) -> String {
    let char_idx = position_to_char_idx(text, pos);
    let line_idx = text.try_char_to_line(char_idx).unwrap_or(0);
    let line_start = text.line_to_char(line_idx);
    text.slice(line_start..char_idx).to_string()
}

static MEMBER_ACCESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Za-z_]\w*)\s*[.:]\s*\w*$").expect("member access pattern"));

/// 1-based column of the character following the base of a trailing
/// `base.` or `base:` access, or None when the cursor is not completing
/// a member. For a chained access the last component's end coincides
/// with the whole expression's end.
pub(crate) fn member_base_column(prefix: &str) -> Option<u32> {
    let caps = MEMBER_ACCESS.captures(prefix)?;
    let end = caps.get(1)?.end();
    Some(prefix[..end].chars().count() as u32 + 1)
}

/// 1-based column of the character following the callee of the innermost
/// unclosed call in the line prefix.
pub(crate) fn callee_column(prefix: &str) -> Option<u32> {
    let chars: Vec<char> = prefix.chars().collect();
    let mut depth = 0i32;
    let mut i = chars.len();
    while i > 0 {
        i -= 1;
        match chars[i] {
            ')' => depth += 1,
            '(' => {
                if depth == 0 {
                    let mut j = i;
                    while j > 0 && chars[j - 1].is_whitespace() {
                        j -= 1;
                    }
                    if j == 0 {
                        return None;
                    }
                    return Some(j as u32 + 1);
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    None
}

/// 1-based column of the start of the identifier the cursor touches.
pub(crate) fn ident_start_column(prefix: &str) -> u32 {
    let chars: Vec<char> = prefix.chars().collect();
    let mut i = chars.len();
    while i > 0 && (chars[i - 1].is_alphanumeric() || chars[i - 1] == '_') {
        i -= 1;
    }
    i as u32 + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower_lsp::lsp_types::Range;

    #[test]
    fn utf16_positions_map_to_char_indices() {
        let rope = Rope::from_str("ab\n\u{1F600}cd");
        // The emoji takes two UTF-16 units but one char.
        assert_eq!(position_to_char_idx(&rope, Position::new(1, 0)), 3);
        assert_eq!(position_to_char_idx(&rope, Position::new(1, 2)), 4);
        assert_eq!(position_to_char_idx(&rope, Position::new(1, 3)), 5);
        // Past the last line clamps to the end of the text (6 chars total).
        assert_eq!(position_to_char_idx(&rope, Position::new(9, 0)), 6);
    }

    #[test]
    fn full_replacement_change() {
        let mut rope = Rope::from_str("old text");
        apply_content_change(
            &mut rope,
            &TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text: "new".to_string(),
            },
        );
        assert_eq!(rope.to_string(), "new");
    }

    #[test]
    fn ranged_change_replaces_span() {
        let mut rope = Rope::from_str("x = 1\ny = 2\n");
        apply_content_change(
            &mut rope,
            &TextDocumentContentChangeEvent {
                range: Some(Range::new(Position::new(1, 4), Position::new(1, 5))),
                range_length: None,
                text: "42".to_string(),
            },
        );
        assert_eq!(rope.to_string(), "x = 1\ny = 42\n");
    }

    #[test]
    fn member_base_ends_before_dot() {
        assert_eq!(member_base_column("local p = player."), Some(17));
        assert_eq!(member_base_column("local p = player.x"), Some(17));
        assert_eq!(member_base_column("player . "), Some(7));
        assert_eq!(member_base_column("player:no"), Some(7));
        assert_eq!(member_base_column("local p = player"), None);
        assert_eq!(member_base_column(""), None);
    }

    #[test]
    fn chained_access_uses_last_component_end() {
        // "lib.util" ends at column 8; the key points one past it.
        assert_eq!(member_base_column("lib.util."), Some(9));
    }

    #[test]
    fn callee_ends_before_open_paren() {
        assert_eq!(callee_column("double("), Some(7));
        assert_eq!(callee_column("d = double("), Some(11));
        assert_eq!(callee_column("d = double (1, "), Some(11));
        // A closed call does not trigger help.
        assert_eq!(callee_column("d = double(1)"), None);
        assert_eq!(callee_column("("), None);
        // Nested call resolves to the innermost open callee.
        assert_eq!(callee_column("outer(inner("), Some(12));
    }

    #[test]
    fn ident_start_scans_back_over_word() {
        assert_eq!(ident_start_column("local count"), 7);
        assert_eq!(ident_start_column("local "), 7);
        assert_eq!(ident_start_column(""), 1);
    }
}
