//! Create, save and upsert.
//!
//! Writes of a single row. Each runs under the database write lock held by
//! the caller and commits through one storage transaction.

use safedel_core::catalog::EntityDef;
use safedel_core::constraint::UniquenessValidator;
use safedel_core::query::{encode_entity, EntityRow, Query, QueryExecutor};
use safedel_core::storage::{Record, StorageEngine};
use safedel_core::UniqueConflict;
use safedel_proto::{FilterExpr, Value};
use tracing::debug;

use crate::database::SchemaState;
use crate::error::Error;
use crate::signals::{EventKind, LifecycleEvent, Signals};

/// Outcome of an upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertResult {
    /// The row as written.
    pub row: EntityRow,
    /// Whether the row counts as newly created.
    pub created: bool,
}

/// Executes single-row writes against one schema snapshot.
pub(crate) struct MutationExecutor<'a> {
    engine: &'a StorageEngine,
    state: &'a SchemaState,
    signals: &'a Signals,
    undeleted_as_created: bool,
}

impl<'a> MutationExecutor<'a> {
    pub(crate) fn new(
        engine: &'a StorageEngine,
        state: &'a SchemaState,
        signals: &'a Signals,
        undeleted_as_created: bool,
    ) -> Self {
        Self {
            engine,
            state,
            signals,
            undeleted_as_created,
        }
    }

    /// Insert a new live row.
    ///
    /// An identity supplied in `fields` is used as is; otherwise one is
    /// generated. Missing fields take their declared defaults.
    pub(crate) fn create(
        &self,
        entity: &str,
        fields: Vec<(String, Value)>,
    ) -> Result<EntityRow, Error> {
        let def = self.entity_def(entity)?;
        let id = match fields.iter().find(|(n, _)| *n == def.identity_field) {
            Some((_, Value::Uuid(id))) => *id,
            Some((_, Value::Null)) | None => StorageEngine::generate_id(),
            Some((_, other)) => {
                return Err(safedel_core::Error::InvalidData(format!(
                    "identity of {} must be a uuid, got {}",
                    entity,
                    other.type_name()
                ))
                .into())
            }
        };

        if let Some(existing) = self.engine.get(&id)? {
            return Err(UniqueConflict {
                entity: entity.to_string(),
                constraint: format!("{}_identity", entity.to_lowercase()),
                fields: vec![def.identity_field.clone()],
                value: hex::encode(id),
                existing_id: id,
                masked: existing.is_masked(),
            }
            .into());
        }

        let fields = Self::complete_fields(def, id, &fields)?;
        self.validator().validate(entity, &fields, None)?;

        let record = Record::new(entity, encode_entity(&fields)?);
        let mut tx = self.engine.transaction();
        tx.insert(id, record.clone());
        tx.commit()?;

        debug!(entity, id = %hex::encode(id), "row created");
        Ok(EntityRow::from_record(id, &record)?)
    }

    /// Write a row's fields back, reinstating it first if it is masked.
    pub(crate) fn save(&self, row: &EntityRow) -> Result<EntityRow, Error> {
        self.write(row, &[])
    }

    /// Update the row matching `lookup`, reinstate a masked match, or create.
    pub(crate) fn upsert(
        &self,
        entity: &str,
        lookup: Vec<(String, Value)>,
        values: Vec<(String, Value)>,
    ) -> Result<UpsertResult, Error> {
        let def = self.entity_def(entity)?;

        let found = if self.state.schema.has_unique_fields(entity) {
            self.match_lookup(entity, &lookup, true)?
        } else {
            match lookup.iter().find(|(n, _)| *n == def.identity_field) {
                Some((_, Value::Uuid(id))) => self
                    .executor()
                    .load(id)?
                    .filter(|row| row.entity == entity),
                _ => self.match_lookup(entity, &lookup, false)?,
            }
        };

        match found {
            Some(row) => {
                let reinstated = row.is_masked();
                let row = self.write(&row, &values)?;
                Ok(UpsertResult {
                    row,
                    created: reinstated && self.undeleted_as_created,
                })
            }
            None => {
                let mut fields = lookup;
                for (name, value) in values {
                    match fields.iter_mut().find(|(n, _)| *n == name) {
                        Some(slot) => slot.1 = value,
                        None => fields.push((name, value)),
                    }
                }
                Ok(UpsertResult {
                    row: self.create(entity, fields)?,
                    created: true,
                })
            }
        }
    }

    /// Live match first, then masked when `include_masked` is set.
    fn match_lookup(
        &self,
        entity: &str,
        lookup: &[(String, Value)],
        include_masked: bool,
    ) -> Result<Option<EntityRow>, Error> {
        let query = lookup.iter().fold(Query::new(entity), |q, (field, value)| {
            q.with_filter(FilterExpr::eq(field.clone(), value.clone()))
        });
        let rows = self.executor().execute(&query)?;

        let live: Vec<_> = rows.iter().filter(|r| !r.is_masked()).collect();
        if live.len() > 1 {
            return Err(Error::MultipleResults {
                entity: entity.to_string(),
                count: live.len(),
            });
        }
        if let Some(row) = live.first() {
            return Ok(Some((*row).clone()));
        }
        if include_masked {
            return Ok(rows.into_iter().find(EntityRow::is_masked));
        }
        Ok(None)
    }

    /// Restore phase then update phase, committed together.
    fn write(&self, row: &EntityRow, changes: &[(String, Value)]) -> Result<EntityRow, Error> {
        let def = self.entity_def(&row.entity)?;
        let Some(mut record) = self
            .engine
            .get(&row.id)?
            .filter(|r| r.entity == row.entity)
        else {
            return Err(Error::not_found(&row.entity, &row.id));
        };

        let mut fields = row.fields.clone();
        for (name, value) in changes {
            match fields.iter_mut().find(|(n, _)| n == name) {
                Some(slot) => slot.1 = value.clone(),
                None => fields.push((name.clone(), value.clone())),
            }
        }
        let fields = Self::complete_fields(def, row.id, &fields)?;
        self.validator().validate(&row.entity, &fields, Some(row.id))?;

        let mut events = Vec::new();
        if record.is_masked() {
            events.push(LifecycleEvent {
                kind: EventKind::BeforeRestore,
                entity: row.entity.clone(),
                id: row.id,
                policy: self.state.registry.policy_for(&row.entity, None),
                batch: record.mask_batch,
            });
            record.restore();
        }
        record.data = encode_entity(&fields)?;

        for event in &events {
            self.signals.emit(event);
        }
        let mut tx = self.engine.transaction();
        tx.update(row.id, record.clone());
        tx.commit()?;
        for event in &events {
            self.signals.emit(&event.completed());
        }

        debug!(
            entity = %row.entity,
            id = %row.id_hex(),
            reinstated = !events.is_empty(),
            "row saved"
        );
        Ok(EntityRow::from_record(row.id, &record)?)
    }

    /// Declared fields in declaration order, identity included.
    fn complete_fields(
        def: &EntityDef,
        id: [u8; 16],
        given: &[(String, Value)],
    ) -> Result<Vec<(String, Value)>, Error> {
        if let Some((name, _)) = given
            .iter()
            .find(|(n, _)| *n != def.identity_field && def.get_field(n).is_none())
        {
            return Err(safedel_core::Error::InvalidData(format!(
                "unknown field {} on {}",
                name, def.name
            ))
            .into());
        }

        let mut fields = Vec::with_capacity(def.fields.len() + 1);
        if def.get_field(&def.identity_field).is_none() {
            fields.push((def.identity_field.clone(), Value::Uuid(id)));
        }
        for field in &def.fields {
            let value = if field.name == def.identity_field {
                Value::Uuid(id)
            } else {
                given
                    .iter()
                    .find(|(n, _)| *n == field.name)
                    .map(|(_, v)| v.clone())
                    .unwrap_or_else(|| field.default_value())
            };
            if !field.field_type.accepts(&value) {
                return Err(safedel_core::Error::InvalidData(format!(
                    "{}.{} does not accept {}",
                    def.name,
                    field.name,
                    value.type_name()
                ))
                .into());
            }
            fields.push((field.name.clone(), value));
        }
        Ok(fields)
    }

    fn entity_def(&self, entity: &str) -> Result<&'a EntityDef, Error> {
        self.state
            .schema
            .get_entity(entity)
            .ok_or_else(|| safedel_core::Error::UnknownEntity(entity.to_string()).into())
    }

    fn validator(&self) -> UniquenessValidator<'a> {
        UniquenessValidator::new(self.engine, &self.state.schema)
    }

    fn executor(&self) -> QueryExecutor<'a> {
        self.state.executor(self.engine)
    }
}
