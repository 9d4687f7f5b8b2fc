//! Shared fixtures for the facade integration tests.

#![allow(dead_code)]

use safedel::catalog::{
    DeleteBehavior, EntityDef, FieldDef, FieldType, RelationDef, ScalarType, SchemaBundle,
};
use safedel::{Database, DatabaseConfig, DeletionPolicy, EntityRow, Value, Visibility};

pub struct TestContext {
    pub db: Database,
    _dir: tempfile::TempDir,
}

impl TestContext {
    pub fn new(schema: SchemaBundle) -> Self {
        Self::with_config(schema, |config| config)
    }

    pub fn with_config(
        schema: SchemaBundle,
        configure: impl FnOnce(DatabaseConfig) -> DatabaseConfig,
    ) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(configure(DatabaseConfig::new(dir.path()))).unwrap();
        db.apply_schema(schema).unwrap();
        Self { db, _dir: dir }
    }

    pub fn create(&self, entity: &str, fields: Vec<(&str, Value)>) -> EntityRow {
        self.db.create(entity, fields).unwrap()
    }

    /// Default-visible and masked-inclusive counts.
    pub fn counts(&self, entity: &str) -> (usize, usize) {
        (
            self.db.objects(entity).count().unwrap(),
            self.db.all_objects(entity).count().unwrap(),
        )
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn id() -> FieldDef {
    FieldDef::new("id", FieldType::scalar(ScalarType::Uuid))
}

pub fn text(name: &str) -> FieldDef {
    FieldDef::new(name, FieldType::scalar(ScalarType::String))
}

pub fn reference(name: &str) -> FieldDef {
    FieldDef::optional(name, ScalarType::Uuid)
}

pub fn number(name: &str) -> FieldDef {
    FieldDef::optional(name, ScalarType::Int64)
}

/// Authors own books, books own reviews, loans point at books.
///
/// - `Author`: soft delete cascade, hidden
/// - `Book`: soft delete, visible by identity
/// - `Review`: soft delete
/// - `Loan`: plain entity, nulled when its book is removed
pub fn library_schema() -> SchemaBundle {
    SchemaBundle::new(1)
        .with_entity(
            EntityDef::new("Author", "id")
                .with_fields([
                    id(),
                    text("name"),
                    FieldDef::optional("email", ScalarType::String).unique(),
                ])
                .with_policy(DeletionPolicy::SoftDeleteCascade),
        )
        .with_entity(
            EntityDef::new("Book", "id")
                .with_fields([id(), text("title"), reference("author_id"), number("pages")])
                .with_policy(DeletionPolicy::SoftDelete)
                .with_visibility(Visibility::VisibleByPk),
        )
        .with_entity(
            EntityDef::new("Review", "id")
                .with_fields([id(), reference("book_id"), text("body")])
                .with_soft_delete(),
        )
        .with_entity(EntityDef::new("Loan", "id").with_fields([id(), reference("book_id")]))
        .with_relation(
            RelationDef::one_to_many("author", "Book", "author_id", "Author", "id")
                .with_on_delete(DeleteBehavior::Cascade)
                .with_related_name("books"),
        )
        .with_relation(
            RelationDef::one_to_many("book", "Review", "book_id", "Book", "id")
                .with_on_delete(DeleteBehavior::Cascade)
                .with_related_name("reviews"),
        )
        .with_relation(
            RelationDef::one_to_many("loan_book", "Loan", "book_id", "Book", "id")
                .with_on_delete(DeleteBehavior::SetNull)
                .with_related_name("loans"),
        )
}

pub fn uuid(row: &EntityRow) -> Value {
    Value::Uuid(row.id)
}
