//! Structural inspection for Python sources.

use regex::Regex;

use crate::domain::ports::AstInspector;

pub struct PythonInspector;

const EXTENSIONS: &[&str] = &["py"];

impl PythonInspector {
    pub fn new() -> Self {
        Self
    }

    /// Class body: lines after the declaration until the next statement at
    /// or below the declaration's indent level.
    fn class_body<'a>(source: &'a str, class_name: &str) -> Option<String> {
        let decl = Regex::new(&format!(
            r"(?m)^([ \t]*)class\s+{}\b",
            regex::escape(class_name)
        ))
        .ok()?;
        let captures = decl.captures(source)?;
        let indent = captures.get(1)?.as_str().len();
        let start = captures.get(0)?.end();
        let rest = &source[start..];

        let mut body = String::new();
        for line in rest.lines() {
            let trimmed = line.trim_start();
            if !trimmed.is_empty() {
                let line_indent = line.len() - trimmed.len();
                if line_indent <= indent && !trimmed.starts_with(')') {
                    // Declaration line itself ends at the colon; the first
                    // dedented statement closes the block.
                    if !body.is_empty() {
                        break;
                    }
                }
            }
            body.push_str(line);
            body.push('\n');
        }
        Some(body)
    }
}

impl Default for PythonInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl AstInspector for PythonInspector {
    fn extensions(&self) -> &[&str] {
        EXTENSIONS
    }

    fn has_function(&self, source: &str, name: &str) -> bool {
        Regex::new(&format!(
            r"(?m)^[ \t]*(?:async\s+)?def\s+{}\s*\(",
            regex::escape(name)
        ))
        .is_ok_and(|re| re.is_match(source))
    }

    fn has_class(&self, source: &str, name: &str) -> bool {
        Regex::new(&format!(r"(?m)^[ \t]*class\s+{}\b", regex::escape(name)))
            .is_ok_and(|re| re.is_match(source))
    }

    fn has_export(&self, source: &str, name: &str) -> bool {
        // Top-level definition, or membership in __all__.
        let top_level = Regex::new(&format!(
            r"(?m)^(?:(?:async\s+)?def|class)\s+{}\b",
            regex::escape(name)
        ))
        .is_ok_and(|re| re.is_match(source));
        if top_level {
            return true;
        }
        Regex::new(&format!(
            r#"__all__\s*=\s*\[[^\]]*["']{}["']"#,
            regex::escape(name)
        ))
        .is_ok_and(|re| re.is_match(source))
    }

    fn has_method(&self, source: &str, class_name: &str, method_name: &str) -> bool {
        let Some(body) = Self::class_body(source, class_name) else {
            return false;
        };
        Regex::new(&format!(
            r"(?m)^[ \t]+(?:async\s+)?def\s+{}\s*\(",
            regex::escape(method_name)
        ))
        .is_ok_and(|re| re.is_match(&body))
    }

    fn has_decorator(&self, source: &str, name: &str) -> bool {
        Regex::new(&format!(r"(?m)^[ \t]*@{}\b", regex::escape(name)))
            .is_ok_and(|re| re.is_match(source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
from flask import Flask

__all__ = ["create_app", "helper"]

def create_app():
    return Flask(__name__)

async def fetch(url):
    pass

class UserService:
    def find_user(self, user_id):
        return self.repo.get(user_id)

    @staticmethod
    def version():
        return 1

class AdminService:
    def purge(self):
        pass

def helper():
    pass
"#;

    #[test]
    fn functions_detected() {
        let inspector = PythonInspector::new();
        assert!(inspector.has_function(SOURCE, "create_app"));
        assert!(inspector.has_function(SOURCE, "fetch"));
        assert!(inspector.has_function(SOURCE, "find_user"));
        assert!(!inspector.has_function(SOURCE, "missing"));
    }

    #[test]
    fn classes_and_methods_scoped_correctly() {
        let inspector = PythonInspector::new();
        assert!(inspector.has_class(SOURCE, "UserService"));
        assert!(inspector.has_method(SOURCE, "UserService", "find_user"));
        assert!(inspector.has_method(SOURCE, "UserService", "version"));
        assert!(inspector.has_method(SOURCE, "AdminService", "purge"));
        assert!(!inspector.has_method(SOURCE, "UserService", "purge"));
    }

    #[test]
    fn exports_via_top_level_or_all() {
        let inspector = PythonInspector::new();
        assert!(inspector.has_export(SOURCE, "create_app"));
        assert!(inspector.has_export(SOURCE, "helper"));
        assert!(inspector.has_export(SOURCE, "UserService"));
        assert!(!inspector.has_export(SOURCE, "find_user"));
    }

    #[test]
    fn decorators_detected() {
        let inspector = PythonInspector::new();
        assert!(inspector.has_decorator(SOURCE, "staticmethod"));
        assert!(!inspector.has_decorator(SOURCE, "property"));
    }
}
