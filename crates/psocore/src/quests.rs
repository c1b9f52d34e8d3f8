// quests.rs -- Immutable, reloadable quest catalog.
//
// Ground truth: spec.md §3 ("Quest list... immutable, reloadable
// catalog partitioned into categories, each holding ordered quests
// identified by numeric menu/item ids") and the `sylverant_quest_list_t
// qlist` global the original login/ship servers hold. Quest bodies
// themselves stay opaque blobs behind this type (spec.md Non-goals).

use std::path::Path;
use std::sync::Arc;

use crate::error::{ProtoError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quest {
    pub menu_id: u32,
    pub item_id: u32,
    pub name: String,
    pub description: String,
    /// Path to the opaque quest body blob on disk; never interpreted
    /// by this crate.
    pub data_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestCategory {
    pub name: String,
    pub quests: Vec<Quest>,
}

/// An immutable snapshot of the whole catalog. Reloading builds a new
/// `QuestList` and swaps it in under an `Arc` rather than mutating one
/// in place, so a handler mid-lookup never observes a half-loaded
/// catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuestList {
    categories: Vec<QuestCategory>,
}

impl QuestList {
    pub fn new(categories: Vec<QuestCategory>) -> Self {
        Self { categories }
    }

    pub fn categories(&self) -> &[QuestCategory] {
        &self.categories
    }

    pub fn find(&self, menu_id: u32, item_id: u32) -> Option<&Quest> {
        self.categories
            .iter()
            .flat_map(|cat| cat.quests.iter())
            .find(|q| q.menu_id == menu_id && q.item_id == item_id)
    }

    pub fn category(&self, name: &str) -> Option<&QuestCategory> {
        self.categories.iter().find(|c| c.name == name)
    }
}

/// Source of quest catalogs -- a thin adapter over whatever on-disk
/// layout a deployment uses (spec.md names this out of scope; only the
/// catalog shape itself is in scope).
pub trait QuestSource: Send + Sync {
    fn load(&self, root: &Path) -> Result<QuestList>;
}

/// Holds the active catalog behind an `ArcSwap`-free `Arc` cell: the
/// reactor thread is the only writer, so a `parking_lot::RwLock` over
/// an `Arc<QuestList>` gives readers a cheap clone without blocking
/// behind a reload.
pub struct QuestListHandle {
    current: parking_lot::RwLock<Arc<QuestList>>,
}

impl QuestListHandle {
    pub fn new(initial: QuestList) -> Self {
        Self {
            current: parking_lot::RwLock::new(Arc::new(initial)),
        }
    }

    pub fn get(&self) -> Arc<QuestList> {
        self.current.read().clone()
    }

    pub fn reload<S: QuestSource>(&self, source: &S, root: &Path) -> Result<()> {
        let fresh = source.load(root)?;
        *self.current.write() = Arc::new(fresh);
        Ok(())
    }
}

/// Placeholder adapter returning an empty catalog -- real deployments
/// supply their own `QuestSource` that reads the opaque blob layout
/// under `root` (left to the deployment per spec.md Non-goals).
pub struct EmptyQuestSource;

impl QuestSource for EmptyQuestSource {
    fn load(&self, root: &Path) -> Result<QuestList> {
        if !root.exists() {
            return Err(ProtoError::Config(format!(
                "quest root {} does not exist",
                root.display()
            )));
        }
        Ok(QuestList::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> QuestList {
        QuestList::new(vec![QuestCategory {
            name: "Government".to_owned(),
            quests: vec![
                Quest {
                    menu_id: 1,
                    item_id: 10,
                    name: "Black Paper's Dangerous Deal".to_owned(),
                    description: "...".to_owned(),
                    data_path: "quests/gov/1-10.bin".to_owned(),
                },
                Quest {
                    menu_id: 1,
                    item_id: 11,
                    name: "The Military's Pride".to_owned(),
                    description: "...".to_owned(),
                    data_path: "quests/gov/1-11.bin".to_owned(),
                },
            ],
        }])
    }

    #[test]
    fn find_locates_a_quest_by_menu_and_item_id() {
        let list = sample();
        let quest = list.find(1, 11).expect("quest present");
        assert_eq!(quest.name, "The Military's Pride");
    }

    #[test]
    fn find_misses_return_none() {
        let list = sample();
        assert!(list.find(99, 99).is_none());
    }

    #[test]
    fn reload_swaps_the_whole_catalog_atomically() {
        let handle = QuestListHandle::new(QuestList::default());
        assert!(handle.get().find(1, 10).is_none());

        struct FixedSource(QuestList);
        impl QuestSource for FixedSource {
            fn load(&self, _root: &Path) -> Result<QuestList> {
                Ok(self.0.clone())
            }
        }

        handle
            .reload(&FixedSource(sample()), Path::new("."))
            .unwrap();
        assert!(handle.get().find(1, 10).is_some());
    }
}
