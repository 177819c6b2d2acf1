//! Column storage: typed component columns and scalar series columns.
//!
//! Both families keep entries in insertion order (iteration visits entities in
//! the order their value was attached) while an entity index keeps lookup,
//! insertion and deletion amortised constant-time.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use rust_decimal::Decimal;

use abax_core::SeriesSpec;

use crate::entity::Entity;

/// Marker bound satisfied by every type storable in a typed column.
pub trait Component: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Component for T {}

/// Marker for components of which at most one instance exists per ledger.
pub trait Singleton: Component {}

/// Identifier of one column inside a ledger: either a Rust component type or
/// a scalar series named by its [`SeriesSpec`].
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ColumnKey {
    Typed { id: TypeId, name: &'static str },
    Series(SeriesSpec),
}

impl ColumnKey {
    /// Key for the typed column holding `C`.
    #[must_use]
    pub fn typed<C: Component>() -> Self {
        Self::Typed {
            id: TypeId::of::<C>(),
            name: std::any::type_name::<C>(),
        }
    }

    /// Key for the series column named by `spec`.
    #[must_use]
    pub fn series(spec: SeriesSpec) -> Self {
        Self::Series(spec)
    }

    /// Human-readable label used in diagnostics.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Typed { name, .. } => (*name).to_string(),
            Self::Series(spec) => spec.to_string(),
        }
    }
}

/// Insertion-ordered storage for one component type.
pub(crate) struct TypedColumn<C> {
    entries: Vec<(Entity, C)>,
    index: HashMap<Entity, usize>,
}

impl<C: Component> TypedColumn<C> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, entity: Entity, value: C) -> Option<C> {
        if let Some(&pos) = self.index.get(&entity) {
            return Some(std::mem::replace(&mut self.entries[pos].1, value));
        }
        self.index.insert(entity, self.entries.len());
        self.entries.push((entity, value));
        None
    }

    pub(crate) fn get(&self, entity: Entity) -> Option<&C> {
        self.index.get(&entity).map(|&pos| &self.entries[pos].1)
    }

    pub(crate) fn get_mut(&mut self, entity: Entity) -> Option<&mut C> {
        let pos = *self.index.get(&entity)?;
        Some(&mut self.entries[pos].1)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (Entity, &C)> {
        self.entries.iter().map(|(entity, value)| (*entity, value))
    }

    pub(crate) fn population(&self) -> usize {
        self.entries.len()
    }

    fn remove_entry(&mut self, entity: Entity) -> Option<usize> {
        let pos = self.index.remove(&entity)?;
        self.entries.remove(pos);
        for (moved, _) in &self.entries[pos..] {
            if let Some(slot) = self.index.get_mut(moved) {
                *slot -= 1;
            }
        }
        Some(pos)
    }
}

/// Object-safe view of a typed column used by the ledger's erased storage.
pub(crate) trait AnyColumn: Send + Sync {
    fn len(&self) -> usize;
    fn contains(&self, entity: Entity) -> bool;
    /// Remove the entity's value. Returns the removed entry's position.
    fn remove(&mut self, entity: Entity) -> Option<usize>;
    fn entities(&self) -> Vec<Entity>;
    fn entities_from(&self, position: usize) -> Vec<Entity>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<C: Component> AnyColumn for TypedColumn<C> {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn contains(&self, entity: Entity) -> bool {
        self.index.contains_key(&entity)
    }

    fn remove(&mut self, entity: Entity) -> Option<usize> {
        self.remove_entry(entity)
    }

    fn entities(&self) -> Vec<Entity> {
        self.entries.iter().map(|(entity, _)| *entity).collect()
    }

    fn entities_from(&self, position: usize) -> Vec<Entity> {
        self.entries
            .iter()
            .skip(position)
            .map(|(entity, _)| *entity)
            .collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Insertion-ordered storage for one scalar series (bars and indicators).
#[derive(Default)]
pub struct SeriesColumn {
    entries: Vec<(Entity, Decimal)>,
    index: HashMap<Entity, usize>,
}

impl SeriesColumn {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Attach or overwrite the value carried by `entity`.
    pub fn insert(&mut self, entity: Entity, value: Decimal) {
        if let Some(&pos) = self.index.get(&entity) {
            self.entries[pos].1 = value;
            return;
        }
        self.index.insert(entity, self.entries.len());
        self.entries.push((entity, value));
    }

    #[must_use]
    pub fn get(&self, entity: Entity) -> Option<Decimal> {
        self.index.get(&entity).map(|&pos| self.entries[pos].1)
    }

    #[must_use]
    pub fn contains(&self, entity: Entity) -> bool {
        self.index.contains_key(&entity)
    }

    /// Position of the entity in insertion order.
    #[must_use]
    pub fn position(&self, entity: Entity) -> Option<usize> {
        self.index.get(&entity).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at `position` in insertion order.
    #[must_use]
    pub fn at(&self, position: usize) -> Option<(Entity, Decimal)> {
        self.entries.get(position).copied()
    }

    /// Last inserted entry, if any.
    #[must_use]
    pub fn last(&self) -> Option<(Entity, Decimal)> {
        self.entries.last().copied()
    }

    /// The `len` entries ending at `position` (inclusive), oldest first.
    ///
    /// Answers `None` until the column holds enough history.
    #[must_use]
    pub fn window_ending_at(&self, position: usize, len: usize) -> Option<&[(Entity, Decimal)]> {
        if len == 0 || position >= self.entries.len() || position + 1 < len {
            return None;
        }
        Some(&self.entries[position + 1 - len..=position])
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, Decimal)> + '_ {
        self.entries.iter().copied()
    }

    pub(crate) fn remove(&mut self, entity: Entity) -> Option<usize> {
        let pos = self.index.remove(&entity)?;
        self.entries.remove(pos);
        for (moved, _) in &self.entries[pos..] {
            if let Some(slot) = self.index.get_mut(moved) {
                *slot -= 1;
            }
        }
        Some(pos)
    }

    pub(crate) fn entities_from(&self, position: usize) -> Vec<Entity> {
        self.entries
            .iter()
            .skip(position)
            .map(|(entity, _)| *entity)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;

    fn entity(raw: u64) -> Entity {
        Entity::from_raw(raw)
    }

    #[test]
    fn series_column_keeps_insertion_order() {
        let mut column = SeriesColumn::new();
        column.insert(entity(3), Decimal::from(30));
        column.insert(entity(1), Decimal::from(10));
        column.insert(entity(2), Decimal::from(20));
        let order: Vec<u64> = column.iter().map(|(e, _)| e.as_raw()).collect();
        assert_eq!(order, vec![3, 1, 2]);
        assert_eq!(column.position(entity(1)), Some(1));
    }

    #[test]
    fn series_window_requires_enough_history() {
        let mut column = SeriesColumn::new();
        for raw in 0..5 {
            column.insert(entity(raw), Decimal::from(raw));
        }
        assert!(column.window_ending_at(1, 3).is_none());
        let window = column.window_ending_at(4, 3).unwrap();
        let values: Vec<Decimal> = window.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![2.into(), 3.into(), 4.into()]);
    }

    #[test]
    fn removal_reindexes_later_entries() {
        let mut column = SeriesColumn::new();
        for raw in 0..4 {
            column.insert(entity(raw), Decimal::from(raw));
        }
        assert_eq!(column.remove(entity(1)), Some(1));
        assert_eq!(column.position(entity(3)), Some(2));
        assert_eq!(column.get(entity(1)), None);
    }

    #[test]
    fn typed_column_overwrite_keeps_position() {
        let mut column: TypedColumn<&'static str> = TypedColumn::new();
        column.insert(entity(1), "a");
        column.insert(entity(2), "b");
        assert_eq!(column.insert(entity(1), "c"), Some("a"));
        let order: Vec<(u64, &str)> = column.iter().map(|(e, v)| (e.as_raw(), *v)).collect();
        assert_eq!(order, vec![(1, "c"), (2, "b")]);
    }
}
