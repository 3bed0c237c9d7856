//! One unit of work: parse a translation unit, extract deltas, hand off.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::parsing::{CursorId, TranslationUnit};
use crate::types::{CursorKind, DependencyMap, Location, SymbolMap, SymbolNameMap};
use crate::{debug_event, log_event, paths};

use super::coordinator::{JobId, Shared};

/// Scan for `-x c++-header` / `-x c-header`, marking a PCH producer.
pub(crate) fn args_mark_pch(args: &[String]) -> bool {
    let mut next_is_x = false;
    for arg in args {
        if next_is_x {
            return arg == "c++-header" || arg == "c-header";
        } else if arg == "-x" {
            next_is_x = true;
        }
    }
    false
}

/// Every `<path>` following an `-include-pch` flag.
fn extract_pch_files(args: &[String]) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut next_is_pch = false;
    for arg in args {
        if arg.is_empty() {
            continue;
        }
        if next_is_pch {
            next_is_pch = false;
            out.push(PathBuf::from(arg));
        } else if arg == "-include-pch" {
            next_is_pch = true;
        }
    }
    out
}

/// Minimal capability set handed to jobs; everything a job may do to the
/// coordinator goes through here.
pub(crate) struct JobContext {
    pub(crate) shared: Arc<Shared>,
}

impl JobContext {
    fn default_args(&self) -> Vec<String> {
        self.shared.state.lock().unwrap().default_args.clone()
    }

    /// Block until no wanted PCH header is being indexed. Headers known to
    /// have errored get their `-include-pch <path>` pair stripped from
    /// `args` instead of being waited for.
    fn wait_for_pch(&self, args: &mut Vec<String>, pch_headers: &[PathBuf]) {
        let mut state = self.shared.state.lock().unwrap();
        loop {
            let mut wait = false;
            for header in pch_headers {
                if state.pch_header_error.contains(header) {
                    let header_str = header.display().to_string();
                    if let Some(idx) = args.iter().position(|arg| *arg == header_str) {
                        args.remove(idx);
                        if idx > 0 {
                            args.remove(idx - 1);
                        }
                    }
                } else if state.indexing.contains(header) {
                    wait = true;
                    break;
                }
            }
            if !wait {
                break;
            }
            state = self.shared.pch_cond.wait(state).unwrap();
        }
    }

    fn pch_dependencies(&self, header: &Path) -> BTreeSet<PathBuf> {
        self.shared
            .pch_deps
            .read()
            .unwrap()
            .get(header)
            .cloned()
            .unwrap_or_default()
    }

    fn set_pch_dependencies(&self, header: PathBuf, deps: BTreeSet<PathBuf>) {
        let mut pch_deps = self.shared.pch_deps.write().unwrap();
        if deps.is_empty() {
            pch_deps.remove(&header);
        } else {
            pch_deps.insert(header, deps);
        }
    }

    fn set_pch_error(&self, header: &Path, errored: bool) {
        let mut state = self.shared.state.lock().unwrap();
        if errored {
            state.pch_header_error.insert(header.to_path_buf());
        } else {
            state.pch_header_error.remove(header);
        }
    }

    fn post_dependencies(&self, delta: DependencyMap) {
        let _ = self
            .shared
            .events
            .send(super::coordinator::IndexerEvent::Dependencies(delta));
    }

    fn done(&self, id: JobId, input: PathBuf) {
        let _ = self
            .shared
            .events
            .send(super::coordinator::IndexerEvent::JobDone { id, input });
    }
}

/// Indexes one translation unit and produces the four deltas.
pub(crate) struct IndexerJob {
    id: JobId,
    input: PathBuf,
    args: Vec<String>,
    is_pch: bool,
    symbols: SymbolMap,
    symbol_names: SymbolNameMap,
    dependencies: DependencyMap,
    pch_dependencies: BTreeSet<PathBuf>,
    seen_paths: BTreeSet<PathBuf>,
    references: HashMap<Location, (Location, bool)>,
    // Locations that emitted name permutations; they are lookup targets
    // and survive the prune even without a target or references.
    retained: BTreeSet<Location>,
    ctx: JobContext,
}

impl IndexerJob {
    pub(crate) fn new(id: JobId, input: PathBuf, args: Vec<String>, ctx: JobContext) -> Self {
        Self {
            id,
            input,
            args,
            is_pch: false,
            symbols: SymbolMap::new(),
            symbol_names: SymbolNameMap::new(),
            dependencies: DependencyMap::new(),
            pch_dependencies: BTreeSet::new(),
            seen_paths: BTreeSet::new(),
            references: HashMap::new(),
            retained: BTreeSet::new(),
            ctx,
        }
    }

    pub(crate) fn run(mut self) {
        let default_args = self.ctx.default_args();
        let mut args = self.args.clone();
        args.extend(default_args.iter().cloned());

        let pch_headers = extract_pch_files(&args);
        if !pch_headers.is_empty() {
            self.ctx.wait_for_pch(&mut args, &pch_headers);
        }

        let project_root = self.ctx.shared.settings.project_root.clone();
        let mut parse_args = Vec::with_capacity(args.len());
        let mut next_is_pch = false;
        let mut next_is_x = false;
        for arg in &args {
            if arg.is_empty() {
                continue;
            }
            if next_is_pch {
                next_is_pch = false;
                parse_args.push(
                    paths::pch_path(&project_root, Path::new(arg))
                        .display()
                        .to_string(),
                );
                continue;
            }
            if next_is_x {
                next_is_x = false;
                self.is_pch = arg == "c++-header" || arg == "c-header";
            }
            parse_args.push(arg.clone());
            if arg == "-include-pch" {
                next_is_pch = true;
            } else if arg == "-x" {
                next_is_x = true;
            }
        }

        let mut pch_error = false;
        match self.ctx.shared.provider.parse(&self.input, &parse_args) {
            Err(e) => {
                pch_error = self.is_pch;
                log_event!("indexer", "parse failed", "{e}");
            }
            Ok(unit) => {
                self.walk_inclusions(&*unit, &default_args);
                for header in &pch_headers {
                    for dep in self.ctx.pch_dependencies(header) {
                        self.dependencies
                            .entry(dep)
                            .or_default()
                            .insert(self.input.clone());
                    }
                }
                self.ctx.post_dependencies(self.dependencies.clone());

                self.visit(&*unit, unit.root());

                if self.is_pch {
                    let saved = paths::pch_path(&project_root, &self.input);
                    if !unit.save(&saved) {
                        log_event!(
                            "indexer",
                            "could not save pch",
                            "{} -> {}",
                            self.input.display(),
                            saved.display()
                        );
                        pch_error = true;
                    }
                }

                self.resolve_references();
                self.prune();
                self.add_file_sentinels();

                self.ctx.shared.syncer.add_symbols(std::mem::take(&mut self.symbols));
                self.ctx
                    .shared
                    .syncer
                    .add_symbol_names(std::mem::take(&mut self.symbol_names));
                self.ctx
                    .shared
                    .syncer
                    .add_file_information(self.input.clone(), self.args.clone());
                if self.is_pch {
                    self.ctx.set_pch_dependencies(
                        self.input.clone(),
                        std::mem::take(&mut self.pch_dependencies),
                    );
                }
            }
        }

        if self.is_pch {
            self.ctx.set_pch_error(&self.input, pch_error);
        }
        debug_event!("indexer", "visited", "{}", self.input.display());
        self.ctx.done(self.id, self.input);
    }

    /// Record `included -> originating` edges for every reported include.
    fn walk_inclusions(&mut self, unit: &dyn TranslationUnit, default_args: &[String]) {
        let settings = &self.ctx.shared.settings;
        for inclusion in unit.inclusions() {
            let raw = inclusion.file.display().to_string();
            if settings.is_system_header(&raw) {
                continue;
            }
            let path = paths::canonicalize(&inclusion.file);
            let path_str = path.display().to_string();
            // Built-in headers supplied inline in the default arguments
            // index nothing of their own.
            if default_args.iter().any(|arg| arg.contains(&path_str)) {
                continue;
            }
            for origin in &inclusion.stack {
                self.dependencies
                    .entry(path.clone())
                    .or_default()
                    .insert(paths::canonicalize(origin));
            }
            if inclusion.stack.is_empty() {
                self.dependencies
                    .entry(path.clone())
                    .or_default()
                    .insert(path.clone());
            }
            if self.is_pch {
                self.pch_dependencies.insert(path);
            }
        }
    }

    /// Canonicalized location of `cursor`, tracking every path seen.
    fn create_location(
        &mut self,
        unit: &dyn TranslationUnit,
        cursor: CursorId,
    ) -> Option<Location> {
        let (path, offset) = unit.location(cursor)?;
        let path = paths::canonicalize(&path);
        self.seen_paths.insert(path.clone());
        Some(Location::new(path, offset))
    }

    fn visit(&mut self, unit: &dyn TranslationUnit, cursor: CursorId) {
        self.process(unit, cursor);
        for child in unit.children(cursor) {
            self.visit(unit, child);
        }
    }

    fn process(&mut self, unit: &dyn TranslationUnit, cursor: CursorId) {
        let kind = unit.kind(cursor);
        if kind == CursorKind::CxxAccessSpecifier {
            return;
        }

        let Some(loc) = self.create_location(unit, cursor) else {
            return;
        };

        let mut referenced = unit.referenced(cursor);
        if referenced == Some(cursor) && !unit.is_definition(cursor) {
            referenced = unit.definition(cursor);
        }
        let ref_kind = referenced.map(|r| unit.kind(r));

        {
            let info = self.symbols.entry(loc.clone()).or_default();
            if kind == CursorKind::CallExpr && ref_kind == Some(CursorKind::CxxMethod) {
                return;
            } else if info.symbol_length == 0 {
                info.kind = Some(kind);
            } else if info.kind == Some(CursorKind::Constructor) && kind == CursorKind::TypeRef {
                return;
            }
            if info.symbol_length == 0 {
                let name = if kind.is_reference() {
                    referenced
                        .map(|r| unit.spelling(r))
                        .unwrap_or_default()
                } else {
                    unit.spelling(cursor)
                };
                info.symbol_length = name.len() as u32;
            }
        }

        if unit.is_definition(cursor) || kind == CursorKind::FunctionDecl {
            self.add_name_permutations(unit, cursor, &loc);
            self.retained.insert(loc.clone());
        }

        if let Some(referent) = referenced {
            if referent != cursor {
                let Some(ref_loc) = self.create_location(unit, referent) else {
                    return;
                };
                let is_member_function =
                    ref_kind == Some(kind) && kind.is_member_function();
                if let Some(info) = self.symbols.get_mut(&loc) {
                    info.target = Some(ref_loc.clone());
                }
                self.references.insert(loc, (ref_loc, is_member_function));
            }
        }
    }

    /// Emit the qualified name of `cursor` at every enclosing scope, with
    /// and without the leaf parameter list.
    fn add_name_permutations(
        &mut self,
        unit: &dyn TranslationUnit,
        cursor: CursorId,
        location: &Location,
    ) {
        let mut qparam = String::new();
        let mut qnoparam = String::new();
        let mut current = Some(cursor);
        while let Some(cur) = current {
            if unit.kind(cur) == CursorKind::TranslationUnit {
                break;
            }
            let name = unit.display_name(cur);
            if name.is_empty() {
                break;
            }
            if qparam.is_empty() {
                qparam = name.clone();
                qnoparam = match name.find('(') {
                    Some(paren) => name[..paren].to_string(),
                    None => name,
                };
            } else {
                qparam = format!("{name}::{qparam}");
                qnoparam = format!("{name}::{qnoparam}");
            }
            self.symbol_names
                .entry(qparam.clone())
                .or_default()
                .insert(location.clone());
            if qparam != qnoparam {
                self.symbol_names
                    .entry(qnoparam.clone())
                    .or_default()
                    .insert(location.clone());
            }
            current = unit.semantic_parent(cur);
        }
    }

    /// Resolve pending references against this unit's symbols.
    ///
    /// Member functions share referrer sets symmetrically between their
    /// declaration and definition sites; everything else records a plain
    /// back-reference on the referent.
    fn resolve_references(&mut self) {
        let pending = std::mem::take(&mut self.references);
        for (loc, (ref_loc, is_member_function)) in &pending {
            if loc == ref_loc || !self.symbols.contains_key(ref_loc) {
                continue;
            }
            if *is_member_function {
                let own_refs = self
                    .symbols
                    .get(loc)
                    .map(|info| info.references.clone())
                    .unwrap_or_default();
                let merged = {
                    let referent = self.symbols.get_mut(ref_loc).unwrap();
                    referent.references.extend(own_refs);
                    referent.references.clone()
                };
                let target_unset = {
                    let own = self.symbols.entry(loc.clone()).or_default();
                    own.references = merged;
                    own.target.is_none()
                };
                if target_unset {
                    self.symbols.get_mut(ref_loc).unwrap().target = Some(loc.clone());
                }
            } else {
                self.symbols
                    .get_mut(ref_loc)
                    .unwrap()
                    .references
                    .insert(loc.clone());
            }
        }
    }

    /// Drop records that ended up carrying no information, and make sure
    /// no record references its own location. Locations that emitted name
    /// permutations stay: they are what qualified-name lookups land on.
    fn prune(&mut self) {
        let retained = std::mem::take(&mut self.retained);
        self.symbols.retain(|loc, info| {
            info.references.remove(loc);
            !info.is_empty() || retained.contains(loc)
        });
    }

    /// Make every file seen during the walk findable by path and by name.
    fn add_file_sentinels(&mut self) {
        for path in &self.seen_paths {
            let loc = Location::new(path.clone(), 1);
            self.symbol_names
                .entry(path.display().to_string())
                .or_default()
                .insert(loc.clone());
            if let Some(name) = path.file_name() {
                self.symbol_names
                    .entry(name.to_string_lossy().into_owned())
                    .or_default()
                    .insert(loc.clone());
            }
        }
    }
}
