//! Merges the built-in handler tables with extension-contributed ones.
//!
//! Composition runs once at startup. The result is immutable; a key
//! collision between two sources is a startup error.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::errors::ComposeError;
use crate::request::InteractionKind;
use crate::route::{DynInteractionExtension, HandlerSet, Route, RouteTable, TableParts};

/// Source name used for the base tables in diagnostics.
pub const BUILTIN_SOURCE: &str = "builtin";

/// The merged, read-only handler tables.
#[derive(Debug, Clone, Default)]
pub struct ComposedHandlers {
    tables: HandlerSet,
}

impl ComposedHandlers {
    pub fn route(&self, kind: InteractionKind, id: &str) -> Option<&Route> {
        self.tables.table(kind).get(id)
    }

    pub fn skips_placeholder(&self, kind: InteractionKind, id: &str) -> bool {
        self.tables.table(kind).skips_placeholder(id)
    }

    pub fn table(&self, kind: InteractionKind) -> &RouteTable {
        self.tables.table(kind)
    }
}

struct KindMerge {
    routes: BTreeMap<String, Route>,
    owners: BTreeMap<String, String>,
    skips: BTreeSet<String>,
    skip_sources: Vec<(String, String)>,
}

impl KindMerge {
    fn new() -> Self {
        Self {
            routes: BTreeMap::new(),
            owners: BTreeMap::new(),
            skips: BTreeSet::new(),
            skip_sources: Vec::new(),
        }
    }

    fn absorb(
        &mut self,
        kind: InteractionKind,
        source: &str,
        table: RouteTable,
    ) -> Result<(), ComposeError> {
        let TableParts {
            routes,
            skips,
            duplicates,
        } = table.into_parts();
        if let Some(id) = duplicates.into_iter().next() {
            return Err(ComposeError::DuplicateRoute {
                kind,
                id,
                first: source.to_string(),
                second: source.to_string(),
            });
        }
        for (id, route) in routes {
            if let Some(first) = self.owners.get(&id) {
                return Err(ComposeError::DuplicateRoute {
                    kind,
                    id,
                    first: first.clone(),
                    second: source.to_string(),
                });
            }
            self.owners.insert(id.clone(), source.to_string());
            self.routes.insert(id, route);
        }
        for id in skips {
            self.skip_sources.push((id.clone(), source.to_string()));
            self.skips.insert(id);
        }
        Ok(())
    }

    fn finish(self, kind: InteractionKind) -> Result<RouteTable, ComposeError> {
        let KindMerge {
            routes,
            skips,
            skip_sources,
            ..
        } = self;
        if let Some((id, source_name)) = skip_sources
            .into_iter()
            .find(|(id, _)| !routes.contains_key(id))
        {
            return Err(ComposeError::DanglingSkip {
                kind,
                id,
                source_name,
            });
        }
        Ok(RouteTable::from_parts(routes, skips))
    }
}

/// Merge `base` with every extension's tables.
///
/// Fails on the first id registered twice within one kind, or on a
/// skip-placeholder id that names no route.
pub fn compose(
    mut base: HandlerSet,
    extensions: &[DynInteractionExtension],
) -> Result<ComposedHandlers, ComposeError> {
    let mut contributed: Vec<(String, HandlerSet)> = extensions
        .iter()
        .map(|extension| (extension.name().to_string(), extension.handlers()))
        .collect();

    let mut tables = HandlerSet::default();
    for kind in InteractionKind::ALL {
        let mut merge = KindMerge::new();
        merge.absorb(kind, BUILTIN_SOURCE, base.take(kind))?;
        for (source, set) in contributed.iter_mut() {
            merge.absorb(kind, source, set.take(kind))?;
        }
        let table = merge.finish(kind)?;
        debug!(kind = %kind, routes = table.len(), "Composed route table");
        match kind {
            InteractionKind::Command => tables.commands = table,
            InteractionKind::Button => tables.buttons = table,
            InteractionKind::Menu => tables.menus = table,
            InteractionKind::Modal => tables.modals = table,
        }
    }

    info!(extensions = extensions.len(), "Handler tables composed");
    Ok(ComposedHandlers { tables })
}
