//! Test to function/class linking by naming convention
//!
//! `test_add` targets the function `add`; `test_Calculator_add` targets the
//! method `add` of class `Calculator`. Resolution is a pure function over a
//! [`LinkIndex`] snapshot so it can be exercised without a database.

use crate::error::StoreError;
use crate::store::EntityStore;
use serde::Serialize;

/// A function known to the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedFunction {
    pub id: i64,
    pub name: String,
    pub class_id: Option<i64>,
}

/// Snapshot of the class and function names a test may refer to
#[derive(Debug, Clone, Default)]
pub struct LinkIndex {
    classes: Vec<(i64, String)>,
    functions: Vec<IndexedFunction>,
}

impl LinkIndex {
    pub fn new(mut classes: Vec<(i64, String)>, mut functions: Vec<IndexedFunction>) -> Self {
        // Lookups take the first match, which must be the lowest id
        classes.sort_by_key(|(id, _)| *id);
        functions.sort_by_key(|f| f.id);
        Self { classes, functions }
    }

    pub fn from_store(store: &EntityStore) -> Result<Self, StoreError> {
        let classes = store
            .classes()?
            .into_iter()
            .map(|c| (c.id, c.name))
            .collect();
        let functions = store
            .functions()?
            .into_iter()
            .map(|f| IndexedFunction {
                id: f.id,
                name: f.name,
                class_id: f.class_id,
            })
            .collect();
        Ok(Self::new(classes, functions))
    }

    fn class_named(&self, name: &str) -> Option<i64> {
        self.classes
            .iter()
            .find(|(_, n)| n == name)
            .map(|(id, _)| *id)
    }

    /// Longest known class name that prefixes `remaining` on a `_` boundary
    fn class_prefix_of<'a>(&'a self, remaining: &str) -> Option<&'a str> {
        self.classes
            .iter()
            .map(|(_, name)| name.as_str())
            .filter(|name| {
                remaining
                    .strip_prefix(name)
                    .is_some_and(|rest| rest.starts_with('_') && rest.len() > 1)
            })
            .max_by_key(|name| name.len())
    }

    /// Top-level functions win over methods of the same name
    fn function_named(&self, name: &str) -> Option<i64> {
        self.functions
            .iter()
            .find(|f| f.name == name && f.class_id.is_none())
            .or_else(|| self.functions.iter().find(|f| f.name == name))
            .map(|f| f.id)
    }

    fn method_of(&self, class_id: i64, name: &str) -> Option<i64> {
        self.functions
            .iter()
            .find(|f| f.name == name && f.class_id == Some(class_id))
            .map(|f| f.id)
    }
}

/// What the naming convention says a test refers to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkResolution {
    pub class_test: Option<bool>,
    pub class_id: Option<i64>,
    pub function_id: Option<i64>,
}

impl LinkResolution {
    /// At least one reference was found
    pub fn is_resolved(&self) -> bool {
        self.class_id.is_some() || self.function_id.is_some()
    }
}

/// Counts from one linking pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub examined: usize,
    /// Tests that gained at least one reference in this pass
    pub linked: usize,
    pub unresolved: usize,
}

/// Resolve a test name against the index.
///
/// `class_test` is the value already stored for the test, if any; when unset
/// it is decided here from the known class names.
pub fn resolve_link(
    test_name: &str,
    prefix: &str,
    class_test: Option<bool>,
    index: &LinkIndex,
) -> LinkResolution {
    let Some(remaining) = test_name.strip_prefix(prefix) else {
        return LinkResolution {
            class_test,
            ..Default::default()
        };
    };

    let class_prefix = index.class_prefix_of(remaining);
    let is_class_test = class_test.unwrap_or(class_prefix.is_some());

    if !is_class_test {
        return LinkResolution {
            class_test: Some(false),
            class_id: None,
            function_id: index.function_named(remaining),
        };
    }

    let (class_name, function_name) = match class_prefix {
        Some(name) => (name, &remaining[name.len() + 1..]),
        None => match remaining.split_once('_') {
            Some(parts) => parts,
            None => (remaining, ""),
        },
    };

    let class_id = index.class_named(class_name);
    let function_id = class_id.and_then(|id| index.method_of(id, function_name));

    LinkResolution {
        class_test: Some(true),
        class_id,
        function_id,
    }
}

/// Link every test whose function reference is unset.
///
/// Only unset fields are written, and nothing is written for a test that
/// resolved to nothing so a later pass can try again.
pub fn link_tests(store: &EntityStore, prefix: &str) -> Result<LinkStats, StoreError> {
    let index = LinkIndex::from_store(store)?;
    let pending = store.unlinked_tests()?;
    let mut stats = LinkStats::default();

    let tx = store.begin()?;
    for test in pending {
        stats.examined += 1;
        let link = resolve_link(&test.name, prefix, test.class_test, &index);
        if !link.is_resolved() {
            tracing::debug!("No link target for test '{}'", test.identifier());
            stats.unresolved += 1;
            continue;
        }

        if !store.apply_link(test.id, &link)? {
            continue;
        }
        stats.linked += 1;
        tracing::debug!(
            "Linked test '{}' to function {:?} class {:?}",
            test.identifier(),
            link.function_id,
            link.class_id
        );
    }
    tx.commit()?;

    tracing::info!(
        "Linked {} of {} tests ({} unresolved)",
        stats.linked,
        stats.examined,
        stats.unresolved
    );
    Ok(stats)
}
