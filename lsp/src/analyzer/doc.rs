use loupe_core::token::Comment;
use loupe_core::util::fast_map::FastHashMap;

use super::ty::{self, Ty, TyPool};

/// Documentation extracted from a long comment that immediately precedes a
/// declaration. An optional leading type expression becomes the override.
#[derive(Debug, Clone)]
pub struct Doc {
    pub ty: Option<Ty>,
    pub text: String,
}

/// Collect documentation blocks, keyed by the line of the declaration they
/// describe (the line right after the comment ends).
///
/// Only long comments count, and only when nothing but whitespace precedes
/// the comment on its first line.
pub fn collect_docs(pool: &mut TyPool, comments: &[Comment], src: &str) -> FastHashMap<u32, Doc> {
    let lines: Vec<&str> = src.lines().collect();
    let mut docs = FastHashMap::default();
    for comment in comments {
        if !comment.is_long() {
            continue;
        }
        let start_line = comment.span.start.line;
        let col = comment.span.start.column as usize;
        let leading_ok = lines
            .get(start_line as usize - 1)
            .map(|line| {
                line.chars()
                    .take(col.saturating_sub(1))
                    .all(|c| c.is_whitespace())
            })
            .unwrap_or(false);
        if !leading_ok {
            continue;
        }
        if let Some(doc) = parse_doc(pool, &comment.raw) {
            docs.insert(comment.span.end.line + 1, doc);
        }
    }
    docs
}

/// Strip `--[[`/`]]` (any `=` level) and split an optional leading type
/// expression from the prose.
fn parse_doc(pool: &mut TyPool, raw: &str) -> Option<Doc> {
    let body = strip_long_delimiters(raw)?;
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut lines = trimmed.lines();
    let first = lines.next().unwrap_or_default().trim();
    if let Ok(parsed) = ty::parse(pool, first) {
        let rest: Vec<&str> = lines.map(str::trim).collect();
        return Some(Doc {
            ty: Some(parsed),
            text: rest.join("\n").trim().to_string(),
        });
    }
    Some(Doc {
        ty: None,
        text: trimmed.to_string(),
    })
}

fn strip_long_delimiters(raw: &str) -> Option<&str> {
    let rest = raw.strip_prefix("--")?;
    let rest = rest.strip_prefix('[')?;
    let level = rest.chars().take_while(|c| *c == '=').count();
    let rest = rest[level..].strip_prefix('[')?;
    let rest = rest.strip_suffix(']')?;
    let rest = rest.strip_suffix(&"=".repeat(level))?;
    rest.strip_suffix(']')
}

#[cfg(test)]
mod tests {
    use super::*;
    use loupe_core::token::Tokenizer;

    fn docs_for(src: &str) -> FastHashMap<u32, Doc> {
        let mut pool = TyPool::new();
        let out = Tokenizer::tokenize(src).unwrap();
        collect_docs(&mut pool, &out.comments, src)
    }

    #[test]
    fn long_comment_documents_next_line() {
        let docs = docs_for("--[[ the answer ]]\nanswer = 42");
        let doc = docs.get(&2).expect("doc on line 2");
        assert!(doc.ty.is_none());
        assert_eq!(doc.text, "the answer");
    }

    #[test]
    fn leading_type_expression_is_split_off() {
        let src = "--[[\n(x: number) -> number\ndoubles x\n]]\nfunction double(x) return x + x end";
        let docs = docs_for(src);
        let doc = docs.get(&5).expect("doc on line 5");
        assert!(doc.ty.is_some());
        assert_eq!(doc.text, "doubles x");
    }

    #[test]
    fn line_comments_are_not_docs() {
        let docs = docs_for("-- just a note\nx = 1");
        assert!(docs.is_empty());
    }

    #[test]
    fn trailing_code_before_comment_disqualifies_it() {
        let docs = docs_for("y = 0 --[[ not a doc ]]\nx = 1");
        assert!(docs.is_empty());
    }
}
