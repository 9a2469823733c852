use serde::Deserialize;

use loupe_core::util::fast_map::FastHashMap;

/// One entry of the embedded API reference.
#[derive(Debug, Clone, Deserialize)]
pub struct BuiltinDef {
    pub name: String,
    /// Type expression in the hover grammar; parsed lazily per session.
    #[serde(rename = "type")]
    pub ty: String,
    pub doc: String,
    /// First API version providing this entry; absent means always there.
    #[serde(default)]
    pub since: Option<String>,
    #[serde(skip)]
    pub category: &'static str,
}

const CATEGORIES: [(&str, &str); 5] = [
    ("core", include_str!("../../defs/core.json")),
    ("math", include_str!("../../defs/math.json")),
    ("string", include_str!("../../defs/string.json")),
    ("graphics", include_str!("../../defs/graphics.json")),
    ("input", include_str!("../../defs/input.json")),
];

/// Builtin globals visible at a given API version.
#[derive(Debug, Default)]
pub struct ApiDefs {
    entries: Vec<BuiltinDef>,
    by_name: FastHashMap<String, usize>,
}

impl ApiDefs {
    /// Parse the embedded definition files and keep the entries available
    /// at `version`. The files ship with the binary; a malformed file is a
    /// build defect, reported loudly and skipped.
    pub fn load(version: &str) -> Self {
        let mut defs = Self::default();
        for (category, raw) in CATEGORIES {
            let parsed: Vec<BuiltinDef> = match serde_json::from_str(raw) {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::error!("bad builtin defs for {category}: {err}");
                    continue;
                }
            };
            for mut entry in parsed {
                if let Some(since) = &entry.since {
                    if version_lt(version, since) {
                        continue;
                    }
                }
                entry.category = category;
                defs.by_name.insert(entry.name.clone(), defs.entries.len());
                defs.entries.push(entry);
            }
        }
        defs
    }

    pub fn find(&self, name: &str) -> Option<&BuiltinDef> {
        self.by_name.get(name).map(|i| &self.entries[*i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &BuiltinDef> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Dotted-version comparison; missing components count as zero, so
/// "0.2" < "0.2.1" and "0.2" == "0.2.0".
fn version_lt(a: &str, b: &str) -> bool {
    let mut lhs = a.split('.').map(|p| p.trim().parse::<u32>().unwrap_or(0));
    let mut rhs = b.split('.').map(|p| p.trim().parse::<u32>().unwrap_or(0));
    loop {
        match (lhs.next(), rhs.next()) {
            (None, None) => return false,
            (l, r) => {
                let l = l.unwrap_or(0);
                let r = r.unwrap_or(0);
                if l != r {
                    return l < r;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_comparison() {
        assert!(version_lt("0.1", "0.2"));
        assert!(!version_lt("0.2", "0.2"));
        assert!(!version_lt("0.2.0", "0.2"));
        assert!(version_lt("0.2", "0.2.1"));
        assert!(!version_lt("1.0", "0.9.9"));
    }

    #[test]
    fn old_version_hides_newer_entries() {
        let old = ApiDefs::load("0.1");
        let new = ApiDefs::load("0.2");
        assert!(old.find("ceil").is_none());
        assert!(new.find("ceil").is_some());
        assert!(old.find("flr").is_some());
        assert!(old.len() < new.len());
    }

    #[test]
    fn entries_carry_category_and_doc() {
        let defs = ApiDefs::load("0.2");
        let spr = defs.find("spr").expect("spr defined");
        assert_eq!(spr.category, "graphics");
        assert!(!spr.doc.is_empty());
        assert!(spr.ty.starts_with('('));
    }
}
