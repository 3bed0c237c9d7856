//! Core data model: source locations, cursor records, and the delta maps
//! that indexer jobs hand to the syncer.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

/// A stable point in source text: canonical absolute path plus byte offset.
///
/// Total order is lexicographic on path, then numeric on offset, matching
/// the byte order of the padded store key produced by [`Location::store_key`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    pub path: PathBuf,
    pub offset: u32,
}

impl Location {
    pub fn new(path: impl Into<PathBuf>, offset: u32) -> Self {
        Self {
            path: path.into(),
            offset,
        }
    }

    /// Key form used in the `Symbol` database: `<path>,<zero-padded offset>`.
    ///
    /// The fixed-width offset keeps byte-ordered keys sorted by location.
    pub fn store_key(&self) -> String {
        format!("{},{:08}", self.path.display(), self.offset)
    }

    /// Split a `Symbol` database key back into its path component.
    ///
    /// Returns `None` for keys without the trailing `,offset` form.
    pub fn path_of_key(key: &str) -> Option<PathBuf> {
        let comma = key.rfind(',')?;
        Some(PathBuf::from(&key[..comma]))
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.path.display(), self.offset)
    }
}

/// Symbol category tag, mirroring the parser's cursor kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CursorKind {
    StructDecl,
    ClassDecl,
    EnumDecl,
    EnumConstantDecl,
    FieldDecl,
    FunctionDecl,
    VarDecl,
    ParmDecl,
    TypedefDecl,
    CxxMethod,
    Namespace,
    Constructor,
    Destructor,
    CxxAccessSpecifier,
    TypeRef,
    TemplateRef,
    NamespaceRef,
    MemberRef,
    OverloadedDeclRef,
    DeclRefExpr,
    MemberRefExpr,
    CallExpr,
    MacroDefinition,
    MacroInstantiation,
    InclusionDirective,
    TranslationUnit,
}

impl CursorKind {
    /// Whether this kind names another declaration rather than introducing one.
    pub fn is_reference(self) -> bool {
        matches!(
            self,
            CursorKind::TypeRef
                | CursorKind::TemplateRef
                | CursorKind::NamespaceRef
                | CursorKind::MemberRef
                | CursorKind::OverloadedDeclRef
                | CursorKind::DeclRefExpr
                | CursorKind::MemberRefExpr
        )
    }

    /// Constructors, destructors and methods share reference sets between
    /// their declaration and definition sites.
    pub fn is_member_function(self) -> bool {
        matches!(
            self,
            CursorKind::Constructor | CursorKind::Destructor | CursorKind::CxxMethod
        )
    }
}

/// Per-location record stored in the `Symbol` database.
///
/// `symbol_length == 0` means the record has not been populated yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorInfo {
    pub symbol_length: u32,
    pub kind: Option<CursorKind>,
    pub target: Option<Location>,
    pub references: BTreeSet<Location>,
}

impl CursorInfo {
    /// A record with no target and no references carries no information.
    pub fn is_empty(&self) -> bool {
        self.target.is_none() && self.references.is_empty()
    }

    /// Merge `other` into `self`. Returns true iff `self` changed.
    ///
    /// Length takes the maximum; kind and target keep the existing value
    /// when both sides are populated; references are unioned.
    pub fn unite(&mut self, other: &CursorInfo) -> bool {
        let mut changed = false;
        if other.symbol_length > self.symbol_length {
            self.symbol_length = other.symbol_length;
            changed = true;
        }
        if self.kind.is_none() && other.kind.is_some() {
            self.kind = other.kind;
            changed = true;
        }
        if self.target.is_none() && other.target.is_some() {
            self.target = other.target.clone();
            changed = true;
        }
        for loc in &other.references {
            if self.references.insert(loc.clone()) {
                changed = true;
            }
        }
        changed
    }

    /// Drop every trace of the given paths. Returns true iff `self` changed.
    ///
    /// References into a dirty path are removed; a target in a dirty path
    /// is nulled out.
    pub fn dirty(&mut self, dirty: &BTreeSet<PathBuf>) -> bool {
        let mut changed = false;
        if let Some(target) = &self.target {
            if dirty.contains(&target.path) {
                self.target = None;
                changed = true;
            }
        }
        let before = self.references.len();
        self.references.retain(|loc| !dirty.contains(&loc.path));
        changed || self.references.len() != before
    }
}

/// Delta of per-location records produced by one indexer job.
pub type SymbolMap = HashMap<Location, CursorInfo>;

/// Inverted index delta: name permutation -> locations.
pub type SymbolNameMap = HashMap<String, BTreeSet<Location>>;

/// Dependency delta: included path -> translation units that include it.
pub type DependencyMap = HashMap<PathBuf, BTreeSet<PathBuf>>;

/// Merge `delta` into `map` with per-key set union.
pub fn unite_dependencies(map: &mut DependencyMap, delta: &DependencyMap) {
    for (key, values) in delta {
        map.entry(key.clone())
            .or_default()
            .extend(values.iter().cloned());
    }
}

/// Merge `delta` into `map` with per-key set union.
pub fn unite_symbol_names(map: &mut SymbolNameMap, delta: &SymbolNameMap) {
    for (key, values) in delta {
        map.entry(key.clone())
            .or_default()
            .extend(values.iter().cloned());
    }
}

/// Merge `delta` into `map` with [`CursorInfo::unite`] per key.
pub fn unite_symbols(map: &mut SymbolMap, delta: &SymbolMap) {
    for (key, value) in delta {
        map.entry(key.clone()).or_default().unite(value);
    }
}
