//! Stage composition: named, ordered lists of systems.

use crate::column::ColumnKey;
use crate::{Ledger, LedgerResult};

/// A unit of computation invoked once per tick on a ledger.
///
/// Systems declare the columns they touch so the ledger can materialise
/// series columns ahead of time and maintain the high-water marks behind
/// [`Ledger::new_entities`].
pub trait System: Send + Sync {
    /// Stable identifier used for deduplication and change tracking.
    fn name(&self) -> &str;

    /// Columns this system reads or writes.
    fn requests(&self) -> Vec<ColumnKey>;

    fn run(&mut self, ledger: &mut Ledger) -> LedgerResult<()>;
}

/// An ordered list of systems invoked together.
pub struct Stage {
    pub(crate) name: String,
    pub(crate) systems: Vec<Box<dyn System>>,
}

impl Stage {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            systems: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of the systems in execution order.
    #[must_use]
    pub fn system_names(&self) -> Vec<&str> {
        self.systems.iter().map(|system| system.name()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.systems.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }
}
