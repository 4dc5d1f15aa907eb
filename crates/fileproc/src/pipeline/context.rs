use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::worker::task::{ErrorMap, Item, WorkResult};

/// The (all, filtered, errors) triple a stage produces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageResult {
    pub all_items: Vec<Item>,
    pub filtered_items: Vec<Item>,
    pub errors: ErrorMap,
}

impl StageResult {
    pub fn new(all_items: Vec<Item>, filtered_items: Vec<Item>, errors: ErrorMap) -> Self {
        Self {
            all_items,
            filtered_items,
            errors,
        }
    }

    /// Records one result: always into `all_items`, into `errors` when it
    /// carries an error, into `filtered_items` when it passed.
    pub fn record(&mut self, result: WorkResult) {
        if let Some(error) = &result.error {
            self.errors.insert(result.path.clone(), error.clone());
        }
        let passed = result.passed;
        let item = result.into_item();
        if passed {
            self.filtered_items.push(item.clone());
        }
        self.all_items.push(item);
    }

    pub fn all_paths(&self) -> Vec<&Path> {
        self.all_items.iter().map(|(p, _)| p.as_path()).collect()
    }

    pub fn filtered_paths(&self) -> Vec<&Path> {
        self.filtered_items.iter().map(|(p, _)| p.as_path()).collect()
    }

    /// True when every filtered path also appears in `all_items`.
    pub fn filtered_is_subset(&self) -> bool {
        let all: HashSet<&PathBuf> = self.all_items.iter().map(|(p, _)| p).collect();
        self.filtered_items.iter().all(|(p, _)| all.contains(p))
    }

    pub fn into_parts(self) -> (Vec<Item>, Vec<Item>, ErrorMap) {
        (self.all_items, self.filtered_items, self.errors)
    }
}

/// What a stage receives. Absent item lists on the first stage mean
/// "derive the items from the configured task source".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageInput {
    pub all_items: Option<Vec<Item>>,
    pub filtered_items: Option<Vec<Item>>,
    pub errors: ErrorMap,
}

impl StageInput {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Input whose accepted items are exactly `items`.
    pub fn from_items(items: Vec<Item>) -> Self {
        Self {
            all_items: Some(items.clone()),
            filtered_items: Some(items),
            errors: ErrorMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.all_items.is_none() && self.filtered_items.is_none()
    }
}

impl From<StageResult> for StageInput {
    fn from(result: StageResult) -> Self {
        Self {
            all_items: Some(result.all_items),
            filtered_items: Some(result.filtered_items),
            errors: result.errors,
        }
    }
}
