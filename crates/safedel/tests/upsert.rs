//! Uniqueness across masked rows, upsert and reinstatement.

mod common;

use std::sync::{Arc, Mutex};

use common::{id, library_schema, text, uuid, TestContext};
use safedel::catalog::{EntityDef, FieldDef, RelationDef, ScalarType, SchemaBundle};
use safedel::{Error, EventKind, Value};

fn author(ctx: &TestContext, name: &str, email: &str) -> safedel::EntityRow {
    ctx.create(
        "Author",
        vec![("name", name.into()), ("email", email.into())],
    )
}

#[test]
fn test_masked_row_keeps_its_unique_values() {
    let ctx = TestContext::new(library_schema());
    let ursula = author(&ctx, "Ursula", "u@l.org");
    ctx.db.delete(&ursula, None).unwrap();

    let result = ctx.db.create(
        "Author",
        [("name", Value::from("Impostor")), ("email", Value::from("u@l.org"))],
    );
    if let Err(Error::UniquenessConflict(conflict)) = result {
        assert_eq!(conflict.entity, "Author");
        assert_eq!(conflict.fields, vec!["email".to_string()]);
        assert_eq!(conflict.existing_id, ursula.id);
        assert!(conflict.masked);
    } else {
        panic!("Expected UniquenessConflict error");
    }
    assert_eq!(ctx.counts("Author"), (0, 1));
}

#[test]
fn test_validate_unique_reports_holder() {
    let ctx = TestContext::new(library_schema());
    let ursula = author(&ctx, "Ursula", "u@l.org");

    let email = || [("email", Value::from("u@l.org"))];
    let conflict = ctx.db.validate_unique("Author", email(), None).unwrap().unwrap();
    assert_eq!(conflict.existing_id, ursula.id);
    assert!(!conflict.masked);

    assert!(ctx
        .db
        .validate_unique("Author", email(), Some(ursula.id))
        .unwrap()
        .is_none());
    assert!(ctx
        .db
        .validate_unique("Author", [("email", Value::Null)], None)
        .unwrap()
        .is_none());
}

#[test]
fn test_upsert_reinstates_masked_match() {
    let ctx = TestContext::new(library_schema());
    let ursula = author(&ctx, "Ursula", "u@l.org");
    ctx.db.delete(&ursula, None).unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    ctx.db
        .signals()
        .connect(move |e| sink.lock().unwrap().push(e.kind));

    let result = ctx
        .db
        .upsert(
            "Author",
            [("email", Value::from("u@l.org"))],
            [("name", Value::from("Ursula K."))],
        )
        .unwrap();

    assert!(!result.created);
    assert_eq!(result.row.id, ursula.id);
    assert!(!result.row.is_masked());
    assert_eq!(result.row.get("name"), Some(&Value::from("Ursula K.")));
    assert_eq!(ctx.counts("Author"), (1, 1));
    assert_eq!(
        *events.lock().unwrap(),
        vec![EventKind::BeforeRestore, EventKind::AfterRestore]
    );
}

#[test]
fn test_reinstatement_counts_as_created_when_configured() {
    let ctx = TestContext::with_config(library_schema(), |c| c.with_undeleted_as_created(true));
    let ursula = author(&ctx, "Ursula", "u@l.org");

    let updated = ctx
        .db
        .upsert("Author", [("email", Value::from("u@l.org"))], [("name", Value::from("U"))])
        .unwrap();
    assert!(!updated.created);

    ctx.db.delete(&ursula, None).unwrap();
    let reinstated = ctx
        .db
        .upsert("Author", [("email", Value::from("u@l.org"))], [("name", Value::from("U"))])
        .unwrap();
    assert!(reinstated.created);
    assert_eq!(reinstated.row.id, ursula.id);
}

#[test]
fn test_upsert_updates_live_and_creates_missing() {
    let ctx = TestContext::new(library_schema());
    let ursula = author(&ctx, "Ursula", "u@l.org");

    let updated = ctx
        .db
        .upsert(
            "Author",
            [("email", Value::from("u@l.org"))],
            [("name", Value::from("Ursula K."))],
        )
        .unwrap();
    assert!(!updated.created);
    assert_eq!(updated.row.id, ursula.id);

    let created = ctx
        .db
        .upsert(
            "Author",
            [("email", Value::from("o@b.org"))],
            [("name", Value::from("Octavia"))],
        )
        .unwrap();
    assert!(created.created);
    assert_ne!(created.row.id, ursula.id);
    assert_eq!(created.row.get("email"), Some(&Value::from("o@b.org")));
    assert_eq!(ctx.counts("Author"), (2, 2));
}

#[test]
fn test_upsert_by_identity_without_unique_fields() {
    let ctx = TestContext::new(library_schema());
    let book = ctx.create("Book", vec![("title", "Dune".into())]);
    ctx.db.delete(&book, None).unwrap();

    let result = ctx
        .db
        .upsert("Book", [("id", uuid(&book))], [("title", Value::from("Dune (2nd ed.)"))])
        .unwrap();
    assert!(!result.created);
    assert_eq!(result.row.id, book.id);
    assert!(!result.row.is_masked());
    assert_eq!(ctx.counts("Book"), (1, 1));

    // Without a pinned identity only live rows match.
    ctx.db.delete(&result.row, None).unwrap();
    let fresh = ctx
        .db
        .upsert("Book", [("title", Value::from("Dune (2nd ed.)"))], [("pages", Value::Int64(600))])
        .unwrap();
    assert!(fresh.created);
    assert_ne!(fresh.row.id, book.id);
    assert_eq!(ctx.counts("Book"), (1, 2));
}

#[test]
fn test_upsert_rejects_ambiguous_lookup() {
    let ctx = TestContext::new(library_schema());
    ctx.create("Book", vec![("title", "Dune".into())]);
    ctx.create("Book", vec![("title", "Dune".into())]);

    let result = ctx
        .db
        .upsert("Book", [("title", Value::from("Dune"))], [("pages", Value::Int64(1))]);
    if let Err(Error::MultipleResults { entity, count }) = result {
        assert_eq!(entity, "Book");
        assert_eq!(count, 2);
    } else {
        panic!("Expected MultipleResults error");
    }
}

#[test]
fn test_conflicting_save_leaves_row_masked() {
    let ctx = TestContext::new(library_schema());
    let ursula = author(&ctx, "Ursula", "u@l.org");
    author(&ctx, "Octavia", "o@b.org");
    ctx.db.delete(&ursula, None).unwrap();

    let events = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&events);
    ctx.db.signals().connect(move |_| *sink.lock().unwrap() += 1);

    let mut stolen = ctx.db.refresh(&ursula).unwrap();
    stolen.set("email", "o@b.org");
    let result = ctx.db.save(&stolen);
    if let Err(Error::UniquenessConflict(conflict)) = result {
        assert!(!conflict.masked);
    } else {
        panic!("Expected UniquenessConflict error");
    }

    assert!(ctx.db.refresh(&ursula).unwrap().is_masked());
    assert_eq!(*events.lock().unwrap(), 0);
}

#[test]
fn test_create_rejects_invalid_fields() {
    let ctx = TestContext::new(library_schema());

    let unknown = ctx.db.create("Author", [("nickname", Value::from("UKL"))]);
    assert!(matches!(unknown, Err(Error::Storage(_))));

    let mistyped = ctx.db.create("Book", [("title", Value::Int64(7))]);
    assert!(matches!(mistyped, Err(Error::Storage(_))));

    let ursula = author(&ctx, "Ursula", "u@l.org");
    let duplicate = ctx.db.create(
        "Author",
        [("id", uuid(&ursula)), ("name", Value::from("Twin"))],
    );
    if let Err(Error::UniquenessConflict(conflict)) = duplicate {
        assert_eq!(conflict.constraint, "author_identity");
        assert_eq!(conflict.existing_id, ursula.id);
    } else {
        panic!("Expected UniquenessConflict error");
    }
}

fn member_schema(unique_handle: bool) -> SchemaBundle {
    let handle = if unique_handle {
        text("handle").unique()
    } else {
        text("handle")
    };
    SchemaBundle::new(1).with_entity(
        EntityDef::new("Member", "id")
            .with_fields([
                id(),
                FieldDef::optional("email", ScalarType::String).unique(),
                handle,
            ])
            .with_soft_delete(),
    )
}

fn member(ctx: &TestContext, email: &str, handle: &str) -> safedel::EntityRow {
    ctx.create("Member", vec![("email", email.into()), ("handle", handle.into())])
}

#[test]
fn test_rejected_schema_keeps_uniqueness() {
    let ctx = TestContext::new(member_schema(false));
    member(&ctx, "a", "h");
    member(&ctx, "b", "h");
    let holder = member(&ctx, "c", "x");

    let result = ctx.db.apply_schema(member_schema(true));
    if let Err(Error::UniquenessConflict(conflict)) = result {
        assert_eq!(conflict.constraint, "member_handle_unique");
    } else {
        panic!("Expected UniquenessConflict error");
    }
    assert_eq!(ctx.db.schema_version(), 1);

    let duplicate = ctx.db.create(
        "Member",
        [("email", Value::from("c")), ("handle", Value::from("y"))],
    );
    if let Err(Error::UniquenessConflict(conflict)) = duplicate {
        assert_eq!(conflict.constraint, "member_email_unique");
        assert_eq!(conflict.existing_id, holder.id);
    } else {
        panic!("Expected UniquenessConflict error");
    }
    assert_eq!(ctx.counts("Member"), (3, 3));
}

#[test]
fn test_dropped_constraint_releases_values() {
    let ctx = TestContext::new(member_schema(false));
    member(&ctx, "a", "h");

    let relaxed = SchemaBundle::new(2).with_entity(
        EntityDef::new("Member", "id")
            .with_fields([id(), FieldDef::optional("email", ScalarType::String), text("handle")])
            .with_soft_delete(),
    );
    assert_eq!(ctx.db.apply_schema(relaxed).unwrap(), 2);

    member(&ctx, "a", "h");
    assert_eq!(ctx.counts("Member"), (2, 2));
}

#[test]
fn test_invalid_schema_is_not_applied() {
    let ctx = TestContext::new(member_schema(false));

    let dangling = member_schema(true).with_relation(RelationDef::one_to_many(
        "team", "Member", "team_id", "Team", "id",
    ));
    let result = ctx.db.apply_schema(dangling);
    assert!(matches!(result, Err(Error::Storage(_))));
    assert_eq!(ctx.db.schema_version(), 1);

    // The rejected bundle's unique handle never took effect.
    member(&ctx, "a", "h");
    member(&ctx, "b", "h");
}
