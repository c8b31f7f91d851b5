//! Handler table composition tests.

use std::sync::Arc;

use officehours_commands::{
    BUILTIN_SOURCE, CommandError, CommandHandler, ComposeError, DynInteractionExtension,
    HandlerContext, HandlerSet, InteractionExtension, InteractionKind, Route, RouteTable,
    builtin_handlers, compose,
};

struct Echo;

#[async_trait::async_trait]
impl CommandHandler for Echo {
    async fn handle(&self, ctx: &HandlerContext<'_>) -> Result<Option<String>, CommandError> {
        Ok(Some(ctx.request.name.clone()))
    }
}

struct TableExtension {
    name: &'static str,
    set: HandlerSet,
}

impl InteractionExtension for TableExtension {
    fn name(&self) -> &str {
        self.name
    }

    fn handlers(&self) -> HandlerSet {
        self.set.clone()
    }
}

fn extension(name: &'static str, set: HandlerSet) -> DynInteractionExtension {
    Arc::new(TableExtension { name, set })
}

fn echo(id: &str) -> Route {
    Route::new(id, &[], Arc::new(Echo))
}

#[test]
fn test_compose_builtins_only() {
    let composed = compose(builtin_handlers(), &[]).unwrap();

    assert!(composed.route(InteractionKind::Command, "enqueue").is_some());
    assert!(composed.route(InteractionKind::Button, "removeN").is_some());
    assert!(composed.route(InteractionKind::Modal, "queue_auto_clear_modal").is_some());
    assert!(composed.table(InteractionKind::Menu).is_empty());
    assert!(composed.skips_placeholder(InteractionKind::Command, "set_after_session_msg"));
    assert!(!composed.skips_placeholder(InteractionKind::Button, "set_after_session_msg"));
}

#[test]
fn test_compose_adds_extension_routes() {
    let calendar = extension(
        "calendar",
        HandlerSet {
            commands: RouteTable::new()
                .with_route(echo("set_calendar"))
                .skipping_placeholder("set_calendar"),
            menus: RouteTable::new().with_route(echo("pick_week")),
            ..Default::default()
        },
    );

    let composed = compose(builtin_handlers(), &[calendar]).unwrap();

    assert!(composed.route(InteractionKind::Command, "set_calendar").is_some());
    assert!(composed.route(InteractionKind::Menu, "pick_week").is_some());
    assert!(composed.skips_placeholder(InteractionKind::Command, "set_calendar"));
    assert!(composed.skips_placeholder(InteractionKind::Command, "set_queue_auto_clear"));
}

#[test]
fn test_same_id_in_different_kinds_is_allowed() {
    let composed = compose(builtin_handlers(), &[]).unwrap();

    // "leave" is both a command and a button
    assert!(composed.route(InteractionKind::Command, "leave").is_some());
    assert!(composed.route(InteractionKind::Button, "leave").is_some());
}

#[test]
fn test_collision_with_builtin_fails_fast() {
    let rogue = extension(
        "rogue",
        HandlerSet {
            buttons: RouteTable::new().with_route(echo("join")),
            ..Default::default()
        },
    );

    let err = compose(builtin_handlers(), &[rogue]).unwrap_err();

    assert_eq!(
        err,
        ComposeError::DuplicateRoute {
            kind: InteractionKind::Button,
            id: "join".to_string(),
            first: BUILTIN_SOURCE.to_string(),
            second: "rogue".to_string(),
        }
    );
}

#[test]
fn test_collision_between_extensions_names_both() {
    let first = extension(
        "calendar",
        HandlerSet {
            modals: RouteTable::new().with_route(echo("schedule")),
            ..Default::default()
        },
    );
    let second = extension(
        "attendance",
        HandlerSet {
            modals: RouteTable::new().with_route(echo("schedule")),
            ..Default::default()
        },
    );

    let err = compose(HandlerSet::default(), &[first, second]).unwrap_err();

    let message = err.to_string();
    assert!(message.contains("modal"));
    assert!(message.contains("schedule"));
    assert!(message.contains("calendar"));
    assert!(message.contains("attendance"));
}

#[test]
fn test_skip_for_unknown_route_is_rejected() {
    let sloppy = extension(
        "sloppy",
        HandlerSet {
            commands: RouteTable::new().skipping_placeholder("ghost"),
            ..Default::default()
        },
    );

    let err = compose(builtin_handlers(), &[sloppy]).unwrap_err();

    assert!(matches!(
        err,
        ComposeError::DanglingSkip { kind: InteractionKind::Command, ref id, .. } if id == "ghost"
    ));
}

#[test]
fn test_id_repeated_within_one_table_is_rejected() {
    let careless = extension(
        "careless",
        HandlerSet {
            commands: RouteTable::new()
                .with_route(echo("sync_calendar"))
                .with_route(echo("sync_calendar")),
            ..Default::default()
        },
    );

    let err = compose(builtin_handlers(), &[careless]).unwrap_err();

    assert_eq!(
        err,
        ComposeError::DuplicateRoute {
            kind: InteractionKind::Command,
            id: "sync_calendar".to_string(),
            first: "careless".to_string(),
            second: "careless".to_string(),
        }
    );
}
