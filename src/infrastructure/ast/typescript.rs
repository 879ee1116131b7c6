//! Structural inspection for TypeScript/JavaScript sources.
//!
//! Regex-backed rather than a full parser: the supervisor only needs to
//! confirm presence of named declarations, and the EXACT grade it feeds is
//! reserved for confirmations, not absence proofs.

use regex::Regex;

use crate::domain::ports::AstInspector;

pub struct TsJsInspector;

const EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs"];

impl TsJsInspector {
    pub fn new() -> Self {
        Self
    }

    fn name_pattern(name: &str) -> String {
        regex::escape(name)
    }

    /// Slice of the source from a class declaration to the next class
    /// declaration (or end of file). Good enough for method lookup without
    /// brace counting.
    fn class_body<'a>(source: &'a str, class_name: &str) -> Option<&'a str> {
        let decl = Regex::new(&format!(
            r"\bclass\s+{}\b",
            Self::name_pattern(class_name)
        ))
        .ok()?;
        let start = decl.find(source)?.end();
        let rest = &source[start..];
        let next_class = Regex::new(r"\bclass\s+[A-Za-z_$]").ok()?;
        match next_class.find(rest) {
            Some(m) => Some(&rest[..m.start()]),
            None => Some(rest),
        }
    }
}

impl Default for TsJsInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl AstInspector for TsJsInspector {
    fn extensions(&self) -> &[&str] {
        EXTENSIONS
    }

    fn has_function(&self, source: &str, name: &str) -> bool {
        let name = Self::name_pattern(name);
        let patterns = [
            format!(r"\bfunction\s+{name}\s*[(<]"),
            format!(r"\b(?:const|let|var)\s+{name}\s*=\s*(?:async\s+)?(?:function\b|\()"),
            format!(r"\b(?:const|let|var)\s+{name}\s*=\s*(?:async\s*)?[\w$,\s()]*=>"),
        ];
        patterns
            .iter()
            .any(|p| Regex::new(p).is_ok_and(|re| re.is_match(source)))
    }

    fn has_class(&self, source: &str, name: &str) -> bool {
        Regex::new(&format!(r"\bclass\s+{}\b", Self::name_pattern(name)))
            .is_ok_and(|re| re.is_match(source))
    }

    fn has_export(&self, source: &str, name: &str) -> bool {
        let name = Self::name_pattern(name);
        let patterns = [
            format!(
                r"\bexport\s+(?:default\s+)?(?:async\s+)?(?:function|class|const|let|var|interface|type|enum)\s+{name}\b"
            ),
            format!(r"\bexport\s*\{{[^}}]*\b{name}\b[^}}]*\}}"),
            format!(r"\bmodule\.exports\.{name}\s*="),
            format!(r"\bexports\.{name}\s*="),
        ];
        patterns
            .iter()
            .any(|p| Regex::new(p).is_ok_and(|re| re.is_match(source)))
    }

    fn has_method(&self, source: &str, class_name: &str, method_name: &str) -> bool {
        let Some(body) = Self::class_body(source, class_name) else {
            return false;
        };
        Regex::new(&format!(
            r"(?m)^\s*(?:public\s+|private\s+|protected\s+|static\s+|async\s+)*{}\s*[(<]",
            Self::name_pattern(method_name)
        ))
        .is_ok_and(|re| re.is_match(body))
    }

    fn has_decorator(&self, source: &str, name: &str) -> bool {
        Regex::new(&format!(r"@{}\b", Self::name_pattern(name)))
            .is_ok_and(|re| re.is_match(source))
    }
}
