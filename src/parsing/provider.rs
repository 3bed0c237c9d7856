//! Contract for the AST provider backing indexer jobs.
//!
//! The provider plays the role of a libclang-style frontend: it turns an
//! input path plus argument vector into a translation unit that can be
//! queried cursor by cursor. Parsing is incomplete-tolerant; missing
//! declarations degrade the AST rather than failing it. String results are
//! owned, so the handle-dispose discipline of C bindings collapses into
//! ordinary ownership.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::types::CursorKind;

/// Opaque handle to an AST node within one translation unit.
///
/// Handles are only meaningful against the unit that produced them;
/// equality is handle equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorId(pub u32);

/// One included file together with its include stack, innermost first.
///
/// An empty stack marks the translation unit's own top-level file.
#[derive(Debug, Clone)]
pub struct Inclusion {
    pub file: PathBuf,
    pub stack: Vec<PathBuf>,
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("parser returned no translation unit for {input}")]
    NullUnit { input: PathBuf },

    #[error("parser backend failure for {input}: {cause}")]
    Backend { input: PathBuf, cause: String },
}

/// A parsed translation unit, queryable per cursor.
pub trait TranslationUnit: Send {
    /// The unit's root cursor (kind [`CursorKind::TranslationUnit`]).
    fn root(&self) -> CursorId;

    /// Direct children in source order.
    fn children(&self, cursor: CursorId) -> Vec<CursorId>;

    fn kind(&self, cursor: CursorId) -> CursorKind;

    /// Short name of the entity, without qualification or parameters.
    fn spelling(&self, cursor: CursorId) -> String;

    /// Name including the parameter list for callables.
    fn display_name(&self, cursor: CursorId) -> String;

    /// Spelling location as `(file, byte offset)`; `None` for built-ins.
    fn location(&self, cursor: CursorId) -> Option<(PathBuf, u32)>;

    /// The cursor this one refers to, if any.
    fn referenced(&self, cursor: CursorId) -> Option<CursorId>;

    /// The defining cursor for the entity behind `cursor`, if known.
    fn definition(&self, cursor: CursorId) -> Option<CursorId>;

    fn is_definition(&self, cursor: CursorId) -> bool;

    /// Enclosing semantic scope, `None` above the translation unit.
    fn semantic_parent(&self, cursor: CursorId) -> Option<CursorId>;

    /// Every file pulled in while building this unit.
    fn inclusions(&self) -> Vec<Inclusion>;

    /// Persist the unit's pre-parsed form (PCH) to `path`.
    fn save(&self, path: &Path) -> bool;
}

/// Factory for translation units; the indexer's only parsing entry point.
pub trait AstProvider: Send + Sync {
    fn parse(&self, input: &Path, args: &[String])
        -> Result<Box<dyn TranslationUnit>, ParseError>;
}
