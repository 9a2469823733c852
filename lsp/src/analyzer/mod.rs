pub mod builtins;
pub mod doc;
pub mod lut;
pub mod scope;
pub mod session;
pub mod ty;
pub mod walker;

pub use builtins::ApiDefs;
pub use session::{Analysis, AnalyzerSettings, DocumentSession};
