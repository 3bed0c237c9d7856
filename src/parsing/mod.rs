pub mod provider;
pub mod script;

pub use provider::{AstProvider, CursorId, Inclusion, ParseError, TranslationUnit};
pub use script::{CursorSpec, ScriptedAst, UnitScript};
