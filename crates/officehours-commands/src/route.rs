//! Routes, handler tables and the handler contract.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use officehours_core::{Member, Server};
use tracing::warn;

use crate::errors::CommandError;
use crate::request::{InteractionKind, InteractionRequest, Responder};

/// What a handler sees while it runs.
pub struct HandlerContext<'a> {
    pub server: &'a Arc<Server>,
    pub request: &'a InteractionRequest,
    /// Resolved requester; a principal unknown to the server has no roles
    pub requester: &'a Member,
    pub responder: &'a dyn Responder,
}

/// Executes one routed interaction.
///
/// `Ok(Some(message))` asks the dispatcher to send a success reply.
/// `Ok(None)` means the handler already replied through the responder.
#[async_trait::async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> Result<Option<String>, CommandError>;
}

pub type DynCommandHandler = Arc<dyn CommandHandler>;

/// One routable interaction id with its role requirement.
#[derive(Clone)]
pub struct Route {
    pub id: String,
    /// Requester needs at least one of these; empty means anyone
    pub required_roles: Vec<String>,
    pub handler: DynCommandHandler,
}

impl Route {
    pub fn new(id: impl Into<String>, required_roles: &[&str], handler: DynCommandHandler) -> Self {
        Self {
            id: id.into(),
            required_roles: required_roles.iter().map(|r| r.to_string()).collect(),
            handler,
        }
    }

    pub fn authorizes(&self, requester: &Member) -> bool {
        requester.has_any_role(&self.required_roles)
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("id", &self.id)
            .field("required_roles", &self.required_roles)
            .finish_non_exhaustive()
    }
}

/// Routes for one interaction kind.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: BTreeMap<String, Route>,
    skip_placeholder: BTreeSet<String>,
    /// Ids passed to `with_route` more than once
    duplicates: BTreeSet<String>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route. A second route with the same id is not added; the id is
    /// recorded and composition rejects the table.
    pub fn with_route(mut self, route: Route) -> Self {
        if self.routes.contains_key(&route.id) {
            warn!(id = %route.id, "Route registered twice in one table");
            self.duplicates.insert(route.id);
        } else {
            self.routes.insert(route.id.clone(), route);
        }
        self
    }

    /// Mark `id` as a route that gets no placeholder reply.
    pub fn skipping_placeholder(mut self, id: impl Into<String>) -> Self {
        self.skip_placeholder.insert(id.into());
        self
    }

    pub fn get(&self, id: &str) -> Option<&Route> {
        self.routes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.routes.contains_key(id)
    }

    pub fn skips_placeholder(&self, id: &str) -> bool {
        self.skip_placeholder.contains(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub(crate) fn into_parts(self) -> TableParts {
        TableParts {
            routes: self.routes,
            skips: self.skip_placeholder,
            duplicates: self.duplicates,
        }
    }

    pub(crate) fn from_parts(
        routes: BTreeMap<String, Route>,
        skip_placeholder: BTreeSet<String>,
    ) -> Self {
        Self {
            routes,
            skip_placeholder,
            duplicates: BTreeSet::new(),
        }
    }
}

pub(crate) struct TableParts {
    pub routes: BTreeMap<String, Route>,
    pub skips: BTreeSet<String>,
    pub duplicates: BTreeSet<String>,
}

/// One table per interaction kind.
#[derive(Debug, Clone, Default)]
pub struct HandlerSet {
    pub commands: RouteTable,
    pub buttons: RouteTable,
    pub menus: RouteTable,
    pub modals: RouteTable,
}

impl HandlerSet {
    pub fn table(&self, kind: InteractionKind) -> &RouteTable {
        match kind {
            InteractionKind::Command => &self.commands,
            InteractionKind::Button => &self.buttons,
            InteractionKind::Menu => &self.menus,
            InteractionKind::Modal => &self.modals,
        }
    }

    pub(crate) fn take(&mut self, kind: InteractionKind) -> RouteTable {
        let table = match kind {
            InteractionKind::Command => &mut self.commands,
            InteractionKind::Button => &mut self.buttons,
            InteractionKind::Menu => &mut self.menus,
            InteractionKind::Modal => &mut self.modals,
        };
        std::mem::take(table)
    }
}

/// A named contributor of extra handler tables.
pub trait InteractionExtension: Send + Sync {
    fn name(&self) -> &str;

    fn handlers(&self) -> HandlerSet;
}

pub type DynInteractionExtension = Arc<dyn InteractionExtension>;
