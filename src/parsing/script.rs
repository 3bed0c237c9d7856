//! Deterministic, arena-backed AST provider.
//!
//! Units are described up front with [`UnitScript`]; parsing replays the
//! script. The provider records every parse invocation (input and the
//! exact argument vector), which lets tests assert on argument rewriting
//! and on cross-job ordering without a real compiler frontend.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::provider::{AstProvider, CursorId, Inclusion, ParseError, TranslationUnit};
use crate::types::CursorKind;

/// Description of one cursor to add to a [`UnitScript`].
#[derive(Debug, Clone)]
pub struct CursorSpec {
    pub kind: CursorKind,
    pub spelling: String,
    pub display_name: String,
    pub location: Option<(PathBuf, u32)>,
    pub referenced: Option<usize>,
    pub definition: Option<usize>,
    pub is_definition: bool,
    pub semantic_parent: Option<usize>,
}

impl CursorSpec {
    pub fn new(kind: CursorKind, spelling: impl Into<String>) -> Self {
        let spelling = spelling.into();
        Self {
            kind,
            display_name: spelling.clone(),
            spelling,
            location: None,
            referenced: None,
            definition: None,
            is_definition: false,
            semantic_parent: None,
        }
    }

    pub fn display(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn at(mut self, path: impl Into<PathBuf>, offset: u32) -> Self {
        self.location = Some((path.into(), offset));
        self
    }

    pub fn refers_to(mut self, node: usize) -> Self {
        self.referenced = Some(node);
        self
    }

    pub fn defined_at(mut self, node: usize) -> Self {
        self.definition = Some(node);
        self
    }

    pub fn definition(mut self) -> Self {
        self.is_definition = true;
        self
    }

    /// Override the semantic parent (defaults to the syntactic parent).
    pub fn scope(mut self, node: usize) -> Self {
        self.semantic_parent = Some(node);
        self
    }
}

#[derive(Debug, Clone)]
struct Node {
    kind: CursorKind,
    spelling: String,
    display_name: String,
    location: Option<(PathBuf, u32)>,
    referenced: Option<usize>,
    definition: Option<usize>,
    is_definition: bool,
    semantic_parent: Option<usize>,
    children: Vec<usize>,
}

/// Script for one translation unit: a cursor arena plus inclusions.
///
/// Node 0 is the implicit translation-unit root.
#[derive(Debug, Clone)]
pub struct UnitScript {
    nodes: Vec<Node>,
    inclusions: Vec<Inclusion>,
    save_ok: bool,
}

impl UnitScript {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                kind: CursorKind::TranslationUnit,
                spelling: String::new(),
                display_name: String::new(),
                location: None,
                referenced: None,
                definition: None,
                is_definition: false,
                semantic_parent: None,
                children: Vec::new(),
            }],
            inclusions: Vec::new(),
            save_ok: true,
        }
    }

    /// The root node index.
    pub fn root(&self) -> usize {
        0
    }

    /// Add a cursor under `parent`, returning its node index.
    pub fn add(&mut self, parent: usize, spec: CursorSpec) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node {
            kind: spec.kind,
            spelling: spec.spelling,
            display_name: spec.display_name,
            location: spec.location,
            referenced: spec.referenced,
            definition: spec.definition,
            is_definition: spec.is_definition,
            semantic_parent: spec.semantic_parent.or(Some(parent)),
            children: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        id
    }

    /// Record a file inclusion with its include stack (innermost first).
    pub fn include(&mut self, file: impl Into<PathBuf>, stack: Vec<PathBuf>) {
        self.inclusions.push(Inclusion {
            file: file.into(),
            stack,
        });
    }

    /// Make [`TranslationUnit::save`] fail for this unit.
    pub fn fail_save(&mut self) {
        self.save_ok = false;
    }
}

impl Default for UnitScript {
    fn default() -> Self {
        Self::new()
    }
}

/// One recorded call to [`AstProvider::parse`].
#[derive(Debug, Clone)]
pub struct ParseCall {
    pub input: PathBuf,
    pub args: Vec<String>,
}

/// Scripted [`AstProvider`]: replays [`UnitScript`]s and records calls.
///
/// Inputs without a script produce [`ParseError::NullUnit`], which is how
/// tests exercise parse-failure paths.
pub struct ScriptedAst {
    units: Mutex<HashMap<PathBuf, UnitScript>>,
    calls: Mutex<Vec<ParseCall>>,
}

impl ScriptedAst {
    pub fn new() -> Self {
        Self {
            units: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Register the script replayed for `input`.
    pub fn script(&self, input: impl Into<PathBuf>, unit: UnitScript) {
        self.units.lock().unwrap().insert(input.into(), unit);
    }

    /// Drop the script for `input`, making future parses fail.
    pub fn unscript(&self, input: &Path) {
        self.units.lock().unwrap().remove(input);
    }

    /// Every parse invocation so far, in call order.
    pub fn calls(&self) -> Vec<ParseCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for ScriptedAst {
    fn default() -> Self {
        Self::new()
    }
}

impl AstProvider for ScriptedAst {
    fn parse(
        &self,
        input: &Path,
        args: &[String],
    ) -> Result<Box<dyn TranslationUnit>, ParseError> {
        self.calls.lock().unwrap().push(ParseCall {
            input: input.to_path_buf(),
            args: args.to_vec(),
        });
        let unit = self.units.lock().unwrap().get(input).cloned();
        match unit {
            Some(script) => Ok(Box::new(ScriptedUnit { script })),
            None => Err(ParseError::NullUnit {
                input: input.to_path_buf(),
            }),
        }
    }
}

struct ScriptedUnit {
    script: UnitScript,
}

impl ScriptedUnit {
    fn node(&self, cursor: CursorId) -> &Node {
        &self.script.nodes[cursor.0 as usize]
    }
}

impl TranslationUnit for ScriptedUnit {
    fn root(&self) -> CursorId {
        CursorId(0)
    }

    fn children(&self, cursor: CursorId) -> Vec<CursorId> {
        self.node(cursor)
            .children
            .iter()
            .map(|&id| CursorId(id as u32))
            .collect()
    }

    fn kind(&self, cursor: CursorId) -> CursorKind {
        self.node(cursor).kind
    }

    fn spelling(&self, cursor: CursorId) -> String {
        self.node(cursor).spelling.clone()
    }

    fn display_name(&self, cursor: CursorId) -> String {
        self.node(cursor).display_name.clone()
    }

    fn location(&self, cursor: CursorId) -> Option<(PathBuf, u32)> {
        self.node(cursor).location.clone()
    }

    fn referenced(&self, cursor: CursorId) -> Option<CursorId> {
        self.node(cursor).referenced.map(|id| CursorId(id as u32))
    }

    fn definition(&self, cursor: CursorId) -> Option<CursorId> {
        self.node(cursor).definition.map(|id| CursorId(id as u32))
    }

    fn is_definition(&self, cursor: CursorId) -> bool {
        self.node(cursor).is_definition
    }

    fn semantic_parent(&self, cursor: CursorId) -> Option<CursorId> {
        self.node(cursor)
            .semantic_parent
            .map(|id| CursorId(id as u32))
    }

    fn inclusions(&self) -> Vec<Inclusion> {
        self.script.inclusions.clone()
    }

    fn save(&self, path: &Path) -> bool {
        if !self.script.save_ok {
            return false;
        }
        std::fs::write(path, b"pch").is_ok()
    }
}
