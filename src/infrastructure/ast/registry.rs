//! Extension-keyed registry of structural inspectors.

use std::sync::Arc;

use crate::domain::ports::AstInspector;

use super::python::PythonInspector;
use super::typescript::TsJsInspector;

pub struct AstRegistry {
    inspectors: Vec<Arc<dyn AstInspector>>,
}

impl AstRegistry {
    /// Registry with the built-in inspectors.
    pub fn with_builtin() -> Self {
        Self {
            inspectors: vec![
                Arc::new(TsJsInspector::new()),
                Arc::new(PythonInspector::new()),
            ],
        }
    }

    /// Inspector for a file extension (without dot), if any supports it.
    pub fn for_extension(&self, ext: &str) -> Option<Arc<dyn AstInspector>> {
        let ext = ext.to_lowercase();
        self.inspectors
            .iter()
            .find(|i| i.extensions().contains(&ext.as_str()))
            .cloned()
    }

    /// Inspector for a path, keyed by its extension.
    pub fn for_path(&self, path: &std::path::Path) -> Option<Arc<dyn AstInspector>> {
        let ext = path.extension()?.to_str()?;
        self.for_extension(ext)
    }
}

impl Default for AstRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
