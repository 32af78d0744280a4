//! In-memory dataset model: categories, accounts, and the brown bag.
//!
//! Exactly one [`Dataset`] is resident per running manager. It is replaced
//! wholesale on clear/reload, never partially swapped; the manager restores
//! the canonical sort order immediately after every structural mutation.

mod account;
mod account_data;
mod category;

pub use account::Account;
pub use account_data::{AccountData, AccountDataKind};
pub use category::{Category, ALL_CATEGORY_ID, ALL_CATEGORY_NAME};

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The root aggregate of the user's secret store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub categories: Vec<Category>,
    pub accounts: Vec<Account>,
    /// Auxiliary string-keyed store for miscellaneous app state, outside
    /// the category/account model.
    pub brown_bag: BTreeMap<String, String>,
}

impl Dataset {
    /// Fresh dataset with the reserved category and the starter set.
    pub fn seeded() -> Self {
        let mut dataset = Self {
            categories: vec![
                Category::reserved(),
                Category::new("Email", "folder-mail"),
                Category::new("Finance", "folder-bank"),
                Category::new("Shopping", "folder-cart"),
                Category::new("Social", "folder-chat"),
            ],
            accounts: Vec::new(),
            brown_bag: BTreeMap::new(),
        };
        dataset.resort();
        dataset
    }

    /// Whether `id` is taken by any category, account, or nested data entry.
    pub fn contains_id(&self, id: Uuid) -> bool {
        self.categories.iter().any(|c| c.id == id)
            || self
                .accounts
                .iter()
                .any(|a| a.id == id || a.data.iter().any(|d| d.id() == id))
    }

    /// Draw random ids until one misses every existing id. In practice the
    /// first draw wins; the loop only matters for the 2^-122 collision case.
    pub fn generate_unique_id(&self) -> Uuid {
        loop {
            let id = Uuid::new_v4();
            if !self.contains_id(id) {
                return id;
            }
        }
    }

    pub fn category(&self, id: Uuid) -> Option<&Category> {
        self.categories.iter().find(|c| c.id == id)
    }

    pub fn account(&self, id: Uuid) -> Option<&Account> {
        self.accounts.iter().find(|a| a.id == id)
    }

    /// Restore the canonical order of both collections: categories with the
    /// reserved one first then name-ascending, accounts favorites-first then
    /// title-ascending.
    pub fn resort(&mut self) {
        reorder_in_place(&mut self.categories, compare_categories);
        reorder_in_place(&mut self.accounts, compare_accounts);
    }
}

fn compare_categories(a: &Category, b: &Category) -> Ordering {
    b.is_reserved()
        .cmp(&a.is_reserved())
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
}

fn compare_accounts(a: &Account, b: &Account) -> Ordering {
    b.favorite
        .cmp(&a.favorite)
        .then_with(|| a.title.to_lowercase().cmp(&b.title.to_lowercase()))
}

/// Move elements to their sorted positions one at a time instead of
/// rebuilding the collection, so observers tracking the list see position
/// deltas rather than a full reset.
fn reorder_in_place<T>(items: &mut Vec<T>, cmp: impl Fn(&T, &T) -> Ordering) {
    for target in 0..items.len() {
        let mut best = target;
        for i in (target + 1)..items.len() {
            if cmp(&items[i], &items[best]) == Ordering::Less {
                best = i;
            }
        }
        if best != target {
            let item = items.remove(best);
            items.insert(target, item);
        }
    }
}

/// Base64 serde helper for optional binary fields in the JSON bundle.
pub(crate) mod base64_opt {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_some(&STANDARD.encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded = Option::<String>::deserialize(d)?;
        encoded
            .map(|s| STANDARD.decode(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
