//! Column-oriented entity/component ledger.
//!
//! A [`Ledger`] stores opaque entities whose state lives in per-component
//! columns: typed columns for bookkeeping and order-lifecycle components, and
//! scalar [`SeriesColumn`]s for bars and derived indicators. Systems are
//! composed into ordered [`Stage`]s and observe incremental work exclusively
//! through [`Ledger::new_entities`].

use std::any::TypeId;
use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::debug;

use abax_core::SeriesSpec;

mod column;
mod entity;
mod stage;

pub use column::{ColumnKey, Component, SeriesColumn, Singleton};
pub use entity::Entity;
pub use stage::{Stage, System};

use column::{AnyColumn, TypedColumn};

/// Convenience alias for ledger results.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Failure modes surfaced by ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A second instance of a singleton component was inserted.
    #[error("ledger '{ledger}': duplicate singleton {component}")]
    DuplicateSingleton {
        ledger: String,
        component: &'static str,
    },
    /// A required singleton component is absent.
    #[error("ledger '{ledger}': missing singleton {component}")]
    MissingSingleton {
        ledger: String,
        component: &'static str,
    },
    /// An operation referenced an entity the ledger never issued or dropped.
    #[error("ledger '{ledger}': unknown entity {entity}")]
    UnknownEntity { ledger: String, entity: Entity },
    /// A system requested a typed column that was never registered.
    #[error("system '{system}' requested unregistered column {column}")]
    UnknownColumn { system: String, column: String },
    /// A system failed outside the scope of a single entity.
    #[error("system '{system}' failed: {message}")]
    System { system: String, message: String },
}

/// A typed, column-oriented entity store with stage-ordered systems.
pub struct Ledger {
    name: String,
    next_entity: u64,
    alive: HashSet<Entity>,
    typed: HashMap<TypeId, Box<dyn AnyColumn>>,
    typed_names: HashMap<TypeId, &'static str>,
    series: HashMap<SeriesSpec, SeriesColumn>,
    stages: Vec<Stage>,
    watermarks: HashMap<(String, ColumnKey), usize>,
}

impl Ledger {
    /// Create an empty ledger with a diagnostic name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            next_entity: 0,
            alive: HashSet::new(),
            typed: HashMap::new(),
            typed_names: HashMap::new(),
            series: HashMap::new(),
            stages: Vec::new(),
            watermarks: HashMap::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    // ---------------------------------------------------------------------
    // Entities
    // ---------------------------------------------------------------------

    /// Create a fresh entity with no components.
    pub fn create(&mut self) -> Entity {
        let entity = Entity::from_raw(self.next_entity);
        self.next_entity += 1;
        self.alive.insert(entity);
        entity
    }

    #[must_use]
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.alive.contains(&entity)
    }

    /// Number of live entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.alive.len()
    }

    /// Drop an entity and every value it carries.
    pub fn despawn(&mut self, entity: Entity) {
        if !self.alive.remove(&entity) {
            return;
        }
        let typed_keys: Vec<(TypeId, &'static str)> = self
            .typed_names
            .iter()
            .map(|(id, name)| (*id, *name))
            .collect();
        for (id, name) in typed_keys {
            let removed = self
                .typed
                .get_mut(&id)
                .and_then(|column| column.remove(entity));
            if let Some(pos) = removed {
                self.shift_watermarks(&ColumnKey::Typed { id, name }, pos);
            }
        }
        let series_keys: Vec<SeriesSpec> = self.series.keys().cloned().collect();
        for spec in series_keys {
            let removed = self
                .series
                .get_mut(&spec)
                .and_then(|column| column.remove(entity));
            if let Some(pos) = removed {
                self.shift_watermarks(&ColumnKey::Series(spec), pos);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Typed components
    // ---------------------------------------------------------------------

    /// Register the column for `C` without attaching any value.
    pub fn register_component<C: Component>(&mut self) {
        let id = TypeId::of::<C>();
        self.typed
            .entry(id)
            .or_insert_with(|| Box::new(TypedColumn::<C>::new()));
        self.typed_names
            .entry(id)
            .or_insert_with(std::any::type_name::<C>);
    }

    /// Attach a component to an existing entity, replacing any previous value.
    pub fn attach<C: Component>(&mut self, entity: Entity, value: C) -> LedgerResult<()> {
        if !self.alive.contains(&entity) {
            return Err(LedgerError::UnknownEntity {
                ledger: self.name.clone(),
                entity,
            });
        }
        self.register_component::<C>();
        self.column_mut::<C>()
            .expect("column registered above")
            .insert(entity, value);
        Ok(())
    }

    /// Create an entity and immediately attach one component.
    pub fn spawn_with<C: Component>(&mut self, value: C) -> Entity {
        let entity = self.create();
        self.attach(entity, value).expect("entity just created");
        entity
    }

    /// Remove `C` from an entity. Answers whether a value was present.
    pub fn detach<C: Component>(&mut self, entity: Entity) -> bool {
        let id = TypeId::of::<C>();
        let removed = self
            .typed
            .get_mut(&id)
            .and_then(|column| column.remove(entity));
        if let Some(pos) = removed {
            self.shift_watermarks(&ColumnKey::typed::<C>(), pos);
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn get<C: Component>(&self, entity: Entity) -> Option<&C> {
        self.column::<C>()?.get(entity)
    }

    #[must_use]
    pub fn get_mut<C: Component>(&mut self, entity: Entity) -> Option<&mut C> {
        self.column_mut::<C>()?.get_mut(entity)
    }

    #[must_use]
    pub fn has<C: Component>(&self, entity: Entity) -> bool {
        self.column::<C>().is_some_and(|column| column.get(entity).is_some())
    }

    /// Iterate every entity bearing `C` in insertion order.
    pub fn iter<C: Component>(&self) -> impl Iterator<Item = (Entity, &C)> {
        self.column::<C>().into_iter().flat_map(|column| column.iter())
    }

    /// Population of the `C` column.
    #[must_use]
    pub fn count<C: Component>(&self) -> usize {
        self.typed
            .get(&TypeId::of::<C>())
            .map_or(0, |column| column.len())
    }

    // ---------------------------------------------------------------------
    // Singletons
    // ---------------------------------------------------------------------

    /// Install a singleton component on a fresh entity.
    pub fn insert_singleton<C: Singleton>(&mut self, value: C) -> LedgerResult<Entity> {
        if self.count::<C>() > 0 {
            return Err(LedgerError::DuplicateSingleton {
                ledger: self.name.clone(),
                component: std::any::type_name::<C>(),
            });
        }
        let entity = self.create();
        self.attach(entity, value)?;
        Ok(entity)
    }

    /// Access the singleton value. Absence is fatal to the caller.
    pub fn singleton<C: Singleton>(&self) -> LedgerResult<&C> {
        self.iter::<C>()
            .next()
            .map(|(_, value)| value)
            .ok_or_else(|| LedgerError::MissingSingleton {
                ledger: self.name.clone(),
                component: std::any::type_name::<C>(),
            })
    }

    /// Mutable access to the singleton value.
    pub fn singleton_mut<C: Singleton>(&mut self) -> LedgerResult<&mut C> {
        let entity = self.singleton_entity::<C>()?;
        Ok(self.get_mut::<C>(entity).expect("singleton entity present"))
    }

    /// Entity carrying the singleton.
    pub fn singleton_entity<C: Singleton>(&self) -> LedgerResult<Entity> {
        self.iter::<C>()
            .next()
            .map(|(entity, _)| entity)
            .ok_or_else(|| LedgerError::MissingSingleton {
                ledger: self.name.clone(),
                component: std::any::type_name::<C>(),
            })
    }

    // ---------------------------------------------------------------------
    // Series columns
    // ---------------------------------------------------------------------

    /// Attach a scalar value to an entity in the series named by `spec`,
    /// creating the column if it does not exist yet.
    pub fn set_series(
        &mut self,
        spec: &SeriesSpec,
        entity: Entity,
        value: rust_decimal::Decimal,
    ) -> LedgerResult<()> {
        if !self.alive.contains(&entity) {
            return Err(LedgerError::UnknownEntity {
                ledger: self.name.clone(),
                entity,
            });
        }
        self.series
            .entry(spec.clone())
            .or_insert_with(SeriesColumn::new)
            .insert(entity, value);
        Ok(())
    }

    /// The series column named by `spec`, if registered.
    #[must_use]
    pub fn series(&self, spec: &SeriesSpec) -> Option<&SeriesColumn> {
        self.series.get(spec)
    }

    /// Register (or fetch) the series column named by `spec`.
    pub fn ensure_series(&mut self, spec: &SeriesSpec) -> &mut SeriesColumn {
        self.series
            .entry(spec.clone())
            .or_insert_with(SeriesColumn::new)
    }

    #[must_use]
    pub fn has_series(&self, spec: &SeriesSpec) -> bool {
        self.series.contains_key(spec)
    }

    /// All registered series specs.
    #[must_use]
    pub fn series_keys(&self) -> Vec<SeriesSpec> {
        self.series.keys().cloned().collect()
    }

    /// Total number of registered columns, typed and series.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.typed.len() + self.series.len()
    }

    // ---------------------------------------------------------------------
    // Joins
    // ---------------------------------------------------------------------

    /// Entities bearing both `A` and `B`, walked over the smaller column.
    #[must_use]
    pub fn join2<A: Component, B: Component>(&self) -> Vec<(Entity, &A, &B)> {
        let (Some(a), Some(b)) = (self.column::<A>(), self.column::<B>()) else {
            return Vec::new();
        };
        if a.population() <= b.population() {
            a.iter()
                .filter_map(|(entity, va)| b.get(entity).map(|vb| (entity, va, vb)))
                .collect()
        } else {
            b.iter()
                .filter_map(|(entity, vb)| a.get(entity).map(|va| (entity, va, vb)))
                .collect()
        }
    }

    /// Entities bearing `A`, `B` and `C`.
    #[must_use]
    pub fn join3<A: Component, B: Component, C: Component>(
        &self,
    ) -> Vec<(Entity, &A, &B, &C)> {
        self.join2::<A, B>()
            .into_iter()
            .filter_map(|(entity, va, vb)| {
                self.get::<C>(entity).map(|vc| (entity, va, vb, vc))
            })
            .collect()
    }

    /// Entities bearing `A` but not `X`, in `A` insertion order.
    #[must_use]
    pub fn iter_without<A: Component, X: Component>(&self) -> Vec<(Entity, &A)> {
        self.iter::<A>()
            .filter(|(entity, _)| !self.has::<X>(*entity))
            .collect()
    }

    /// Entities bearing `A` and `B` but not `X`.
    #[must_use]
    pub fn join2_without<A: Component, B: Component, X: Component>(
        &self,
    ) -> Vec<(Entity, &A, &B)> {
        self.join2::<A, B>()
            .into_iter()
            .filter(|(entity, _, _)| !self.has::<X>(*entity))
            .collect()
    }

    // ---------------------------------------------------------------------
    // Change tracking
    // ---------------------------------------------------------------------

    /// Entities added to the smallest of `requested` since this system's last
    /// visit, in insertion order. Advances the system's high-water mark.
    ///
    /// Requested series columns are registered lazily; a requested typed
    /// column that was never registered is fatal.
    pub fn new_entities(
        &mut self,
        system: &str,
        requested: &[ColumnKey],
    ) -> LedgerResult<Vec<Entity>> {
        let mut smallest: Option<(ColumnKey, usize)> = None;
        for key in requested {
            let len = match key {
                ColumnKey::Typed { id, name } => match self.typed.get(id) {
                    Some(column) => column.len(),
                    None => {
                        return Err(LedgerError::UnknownColumn {
                            system: system.to_string(),
                            column: (*name).to_string(),
                        })
                    }
                },
                ColumnKey::Series(spec) => self.ensure_series(spec).len(),
            };
            let replace = match &smallest {
                Some((_, best)) => len < *best,
                None => true,
            };
            if replace {
                smallest = Some((key.clone(), len));
            }
        }
        let Some((key, len)) = smallest else {
            return Ok(Vec::new());
        };
        let mark = self
            .watermarks
            .get(&(system.to_string(), key.clone()))
            .copied()
            .unwrap_or(0);
        let fresh = match &key {
            ColumnKey::Typed { id, .. } => self
                .typed
                .get(id)
                .map(|column| column.entities_from(mark))
                .unwrap_or_default(),
            ColumnKey::Series(spec) => self
                .series
                .get(spec)
                .map(|column| column.entities_from(mark))
                .unwrap_or_default(),
        };
        self.watermarks.insert((system.to_string(), key), len);
        Ok(fresh)
    }

    /// Advance every mark the system holds on `columns` to the present, so
    /// its next visit observes only entities added afterwards.
    pub fn fast_forward(&mut self, system: &str, columns: &[ColumnKey]) {
        for key in columns {
            let len = match key {
                ColumnKey::Typed { id, .. } => {
                    self.typed.get(id).map_or(0, |column| column.len())
                }
                ColumnKey::Series(spec) => self.series.get(spec).map_or(0, SeriesColumn::len),
            };
            self.watermarks
                .insert((system.to_string(), key.clone()), len);
        }
    }

    /// Advance the system's marks on every registered column to the present.
    pub fn fast_forward_all(&mut self, system: &str) {
        let typed: Vec<(ColumnKey, usize)> = self
            .typed_names
            .iter()
            .map(|(id, name)| {
                let len = self.typed.get(id).map_or(0, |column| column.len());
                (ColumnKey::Typed { id: *id, name: *name }, len)
            })
            .collect();
        for (key, len) in typed {
            self.watermarks.insert((system.to_string(), key), len);
        }
        let series: Vec<(ColumnKey, usize)> = self
            .series
            .iter()
            .map(|(spec, column)| (ColumnKey::Series(spec.clone()), column.len()))
            .collect();
        for (key, len) in series {
            self.watermarks.insert((system.to_string(), key), len);
        }
    }

    fn shift_watermarks(&mut self, key: &ColumnKey, removed_position: usize) {
        for ((_, mark_key), mark) in self.watermarks.iter_mut() {
            if mark_key == key && *mark > removed_position {
                *mark -= 1;
            }
        }
    }

    // ---------------------------------------------------------------------
    // Stages
    // ---------------------------------------------------------------------

    /// Append an empty stage if absent; answers its position in stage order.
    pub fn ensure_stage(&mut self, name: &str) -> usize {
        if let Some(pos) = self.stage_position(name) {
            return pos;
        }
        self.stages.push(Stage::new(name));
        self.stages.len() - 1
    }

    /// Insert an empty stage right after `after`, or append when `after` does
    /// not exist. No-op if the stage is already present.
    pub fn insert_stage_after(&mut self, name: &str, after: &str) -> usize {
        if let Some(pos) = self.stage_position(name) {
            return pos;
        }
        match self.stage_position(after) {
            Some(pos) => {
                self.stages.insert(pos + 1, Stage::new(name));
                pos + 1
            }
            None => {
                self.stages.push(Stage::new(name));
                self.stages.len() - 1
            }
        }
    }

    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    #[must_use]
    pub fn stage_position(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|stage| stage.name == name)
    }

    /// Stage names in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name.as_str()).collect()
    }

    /// Install a system into a stage, creating the stage when missing.
    /// Duplicate system names within the stage are dropped.
    pub fn add_system(&mut self, stage_name: &str, system: Box<dyn System>) -> bool {
        let pos = self.ensure_stage(stage_name);
        let stage = &mut self.stages[pos];
        if stage.systems.iter().any(|s| s.name() == system.name()) {
            return false;
        }
        debug!(
            ledger = %self.name,
            stage = stage_name,
            system = system.name(),
            "system installed"
        );
        stage.systems.push(system);
        true
    }

    #[must_use]
    pub fn has_system(&self, stage_name: &str, system_name: &str) -> bool {
        self.stage(stage_name)
            .is_some_and(|stage| stage.systems.iter().any(|s| s.name() == system_name))
    }

    /// Total number of installed systems across all stages.
    #[must_use]
    pub fn system_count(&self) -> usize {
        self.stages.iter().map(|stage| stage.systems.len()).sum()
    }

    /// Invoke every stage, and every system within each stage, in order.
    pub fn run_stages(&mut self) -> LedgerResult<()> {
        let mut stages = std::mem::take(&mut self.stages);
        let mut result = Ok(());
        for stage in &mut stages {
            result = self.run_systems(stage);
            if result.is_err() {
                break;
            }
        }
        self.stages = stages;
        result
    }

    /// Invoke one stage by name; absent stages are a no-op.
    pub fn run_stage(&mut self, name: &str) -> LedgerResult<()> {
        let mut stages = std::mem::take(&mut self.stages);
        let result = match stages.iter_mut().find(|stage| stage.name == name) {
            Some(stage) => self.run_systems(stage),
            None => Ok(()),
        };
        self.stages = stages;
        result
    }

    fn run_systems(&mut self, stage: &mut Stage) -> LedgerResult<()> {
        for system in &mut stage.systems {
            self.ensure_requested(system.name(), &system.requests())?;
            system.run(self)?;
        }
        Ok(())
    }

    fn ensure_requested(&mut self, system: &str, requested: &[ColumnKey]) -> LedgerResult<()> {
        for key in requested {
            match key {
                ColumnKey::Typed { id, name } => {
                    if !self.typed.contains_key(id) {
                        return Err(LedgerError::UnknownColumn {
                            system: system.to_string(),
                            column: (*name).to_string(),
                        });
                    }
                }
                ColumnKey::Series(spec) => {
                    self.ensure_series(spec);
                }
            }
        }
        Ok(())
    }

    fn column<C: Component>(&self) -> Option<&TypedColumn<C>> {
        self.typed
            .get(&TypeId::of::<C>())
            .and_then(|column| column.as_any().downcast_ref())
    }

    fn column_mut<C: Component>(&mut self) -> Option<&mut TypedColumn<C>> {
        self.typed
            .get_mut(&TypeId::of::<C>())
            .and_then(|column| column.as_any_mut().downcast_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    struct Label(&'static str);
    struct Flag;
    struct Counter(u32);
    impl Singleton for Counter {}

    #[test]
    fn attach_and_lookup_round_trip() {
        let mut ledger = Ledger::new("test");
        let e = ledger.create();
        ledger.attach(e, Label("bar")).unwrap();
        assert_eq!(ledger.get::<Label>(e).unwrap().0, "bar");
        assert!(ledger.has::<Label>(e));
        assert!(ledger.detach::<Label>(e));
        assert!(!ledger.has::<Label>(e));
    }

    #[test]
    fn attach_to_unknown_entity_fails() {
        let mut known = Ledger::new("known");
        let stranger = known.create();
        known.despawn(stranger);
        let err = known.attach(stranger, Flag).unwrap_err();
        assert!(matches!(err, LedgerError::UnknownEntity { .. }));
    }

    #[test]
    fn iteration_follows_insertion_order() {
        let mut ledger = Ledger::new("test");
        let a = ledger.create();
        let b = ledger.create();
        let c = ledger.create();
        ledger.attach(c, Label("c")).unwrap();
        ledger.attach(a, Label("a")).unwrap();
        ledger.attach(b, Label("b")).unwrap();
        let order: Vec<&str> = ledger.iter::<Label>().map(|(_, l)| l.0).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn join_visits_entities_bearing_both() {
        let mut ledger = Ledger::new("test");
        let a = ledger.create();
        let b = ledger.create();
        let c = ledger.create();
        for e in [a, b, c] {
            ledger.attach(e, Label("x")).unwrap();
        }
        ledger.attach(b, Flag).unwrap();
        let joined = ledger.join2::<Label, Flag>();
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].0, b);
        let without = ledger.iter_without::<Label, Flag>();
        assert_eq!(without.len(), 2);
    }

    #[test]
    fn second_singleton_is_rejected() {
        let mut ledger = Ledger::new("test");
        ledger.insert_singleton(Counter(1)).unwrap();
        let err = ledger.insert_singleton(Counter(2)).unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateSingleton { .. }));
        assert_eq!(ledger.singleton::<Counter>().unwrap().0, 1);
        ledger.singleton_mut::<Counter>().unwrap().0 = 7;
        assert_eq!(ledger.singleton::<Counter>().unwrap().0, 7);
    }

    #[test]
    fn missing_singleton_is_fatal() {
        let ledger = Ledger::new("test");
        assert!(matches!(
            ledger.singleton::<Counter>(),
            Err(LedgerError::MissingSingleton { .. })
        ));
    }

    #[test]
    fn new_entities_yields_only_fresh_rows() {
        let mut ledger = Ledger::new("test");
        let close = SeriesSpec::Close;
        let requested = [ColumnKey::series(close.clone())];
        for value in 1..=3 {
            let e = ledger.create();
            ledger.set_series(&close, e, Decimal::from(value)).unwrap();
        }
        let first = ledger.new_entities("probe", &requested).unwrap();
        assert_eq!(first.len(), 3);
        assert!(ledger.new_entities("probe", &requested).unwrap().is_empty());

        let e = ledger.create();
        ledger.set_series(&close, e, Decimal::from(4)).unwrap();
        let second = ledger.new_entities("probe", &requested).unwrap();
        assert_eq!(second, vec![e]);
    }

    #[test]
    fn new_entities_tracks_smallest_requested_column() {
        let mut ledger = Ledger::new("test");
        let close = SeriesSpec::Close;
        let volume = SeriesSpec::Volume;
        for value in 0..4 {
            let e = ledger.create();
            ledger.set_series(&close, e, Decimal::from(value)).unwrap();
            if value % 2 == 0 {
                ledger.set_series(&volume, e, Decimal::from(value)).unwrap();
            }
        }
        let requested = [
            ColumnKey::series(close.clone()),
            ColumnKey::series(volume.clone()),
        ];
        let fresh = ledger.new_entities("probe", &requested).unwrap();
        // volume is the smaller column
        assert_eq!(fresh.len(), 2);
    }

    #[test]
    fn fast_forward_skips_existing_rows() {
        let mut ledger = Ledger::new("test");
        let close = SeriesSpec::Close;
        let requested = [ColumnKey::series(close.clone())];
        for value in 0..3 {
            let e = ledger.create();
            ledger.set_series(&close, e, Decimal::from(value)).unwrap();
        }
        ledger.fast_forward("probe", &requested);
        assert!(ledger.new_entities("probe", &requested).unwrap().is_empty());
    }

    #[test]
    fn despawn_adjusts_watermarks() {
        let mut ledger = Ledger::new("test");
        let close = SeriesSpec::Close;
        let requested = [ColumnKey::series(close.clone())];
        let mut entities = Vec::new();
        for value in 0..3 {
            let e = ledger.create();
            ledger.set_series(&close, e, Decimal::from(value)).unwrap();
            entities.push(e);
        }
        ledger.new_entities("probe", &requested).unwrap();
        ledger.despawn(entities[0]);
        let e = ledger.create();
        ledger.set_series(&close, e, Decimal::from(9)).unwrap();
        assert_eq!(ledger.new_entities("probe", &requested).unwrap(), vec![e]);
    }

    #[test]
    fn requesting_unregistered_typed_column_is_fatal() {
        let mut ledger = Ledger::new("test");
        let err = ledger
            .new_entities("probe", &[ColumnKey::typed::<Flag>()])
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnknownColumn { .. }));
    }

    struct Trace(SeriesSpec, &'static str);

    impl System for Trace {
        fn name(&self) -> &str {
            self.1
        }

        fn requests(&self) -> Vec<ColumnKey> {
            vec![ColumnKey::series(self.0.clone())]
        }

        fn run(&mut self, ledger: &mut Ledger) -> LedgerResult<()> {
            let e = ledger.create();
            let order = Decimal::from(ledger.series(&self.0).map_or(0, SeriesColumn::len));
            ledger.set_series(&self.0, e, order)?;
            Ok(())
        }
    }

    #[test]
    fn stages_run_in_declared_order() {
        let mut ledger = Ledger::new("test");
        let trail = SeriesSpec::custom("trail");
        ledger.ensure_stage("first");
        ledger.ensure_stage("second");
        assert!(ledger.add_system("second", Box::new(Trace(trail.clone(), "b"))));
        assert!(ledger.add_system("first", Box::new(Trace(trail.clone(), "a"))));
        // duplicate system name within a stage is dropped
        assert!(!ledger.add_system("first", Box::new(Trace(trail.clone(), "a"))));
        ledger.run_stages().unwrap();
        assert_eq!(ledger.series(&trail).unwrap().len(), 2);
        assert_eq!(ledger.system_count(), 2);
    }

    #[test]
    fn insert_stage_after_places_between() {
        let mut ledger = Ledger::new("test");
        ledger.ensure_stage("main");
        ledger.ensure_stage("tail");
        ledger.insert_stage_after("indicators", "main");
        assert_eq!(ledger.stage_names(), vec!["main", "indicators", "tail"]);
        // appended when the anchor is absent
        let mut bare = Ledger::new("bare");
        bare.insert_stage_after("indicators", "main");
        assert_eq!(bare.stage_names(), vec!["indicators"]);
    }
}
