//! Structural inspectors bound by file extension.

pub mod python;
pub mod registry;
pub mod typescript;

pub use python::PythonInspector;
pub use registry::AstRegistry;
pub use typescript::TsJsInspector;
