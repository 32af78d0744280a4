//! Last-writer-wins reconciliation of a freshly-loaded dataset against the
//! resident one.
//!
//! Applied independently to the category and account collections using
//! id-based identity:
//! - present locally but absent remotely: removed (propagated
//!   delete-by-omission); the reserved category is exempt,
//! - present in both but not deep-equal: the newer modification timestamp
//!   wins whole-entity, ties keep the local version,
//! - present only remotely: added.
//!
//! Reports whether any difference was observed so the caller can re-persist
//! and re-queue synchronization, closing the propagation loop.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{Account, Category, Dataset};

/// Merge `incoming` into `resident`. Returns true when the two datasets
/// differed in any way, including conflicts the local side won.
pub fn merge_into(resident: &mut Dataset, incoming: Dataset) -> bool {
    let categories_changed = merge_collection(&mut resident.categories, incoming.categories, |c| {
        c.is_reserved()
    });
    let accounts_changed = merge_collection(&mut resident.accounts, incoming.accounts, |_| false);

    let changed = categories_changed || accounts_changed;
    if changed {
        resident.resort();
    }
    changed
}

trait MergeEntity {
    fn entity_id(&self) -> Uuid;
    fn modified_at(&self) -> DateTime<Utc>;
}

impl MergeEntity for Category {
    fn entity_id(&self) -> Uuid {
        self.id
    }
    fn modified_at(&self) -> DateTime<Utc> {
        self.last_modified
    }
}

impl MergeEntity for Account {
    fn entity_id(&self) -> Uuid {
        self.id
    }
    fn modified_at(&self) -> DateTime<Utc> {
        self.last_modified
    }
}

fn merge_collection<T: MergeEntity + PartialEq>(
    local: &mut Vec<T>,
    remote: Vec<T>,
    retain_local_only: impl Fn(&T) -> bool,
) -> bool {
    let mut remote_by_id: HashMap<Uuid, T> =
        remote.into_iter().map(|e| (e.entity_id(), e)).collect();

    let mut changed = false;
    let mut merged = Vec::with_capacity(local.len());

    for item in local.drain(..) {
        match remote_by_id.remove(&item.entity_id()) {
            Some(remote_item) => {
                if remote_item == item {
                    merged.push(item);
                } else {
                    changed = true;
                    if remote_item.modified_at() > item.modified_at() {
                        merged.push(remote_item);
                    } else {
                        merged.push(item);
                    }
                }
            }
            None => {
                changed = true;
                if retain_local_only(&item) {
                    merged.push(item);
                }
            }
        }
    }

    if !remote_by_id.is_empty() {
        changed = true;
        merged.extend(remote_by_id.into_values());
    }

    *local = merged;
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ALL_CATEGORY_ID, ALL_CATEGORY_NAME};
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn account(id: Uuid, title: &str, modified: i64) -> Account {
        Account {
            id,
            title: title.to_string(),
            category_id: ALL_CATEGORY_ID,
            favorite: false,
            icon: None,
            last_modified: at(modified),
            data: Vec::new(),
        }
    }

    fn dataset_with_accounts(accounts: Vec<Account>) -> Dataset {
        let mut dataset = Dataset::seeded();
        // Pin category timestamps so the two sides' seed categories compare equal.
        for c in &mut dataset.categories {
            c.last_modified = at(0);
        }
        dataset.accounts = accounts;
        dataset.resort();
        dataset
    }

    #[test]
    fn removes_replaces_and_adds() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        let mut local = dataset_with_accounts(vec![
            account(a, "A-local", 1),
            account(b, "B-local", 2),
        ]);
        let mut remote = local.clone();
        remote.accounts = vec![account(a, "A-remote", 5), account(c, "C-remote", 3)];
        remote.resort();

        assert!(merge_into(&mut local, remote));

        let titles: Vec<&str> = local.accounts.iter().map(|x| x.title.as_str()).collect();
        assert_eq!(local.accounts.len(), 2);
        assert!(titles.contains(&"A-remote"));
        assert!(titles.contains(&"C-remote"));
        assert!(!titles.contains(&"B-local"));
    }

    #[test]
    fn older_remote_loses_but_difference_is_reported() {
        let a = Uuid::new_v4();
        let mut local = dataset_with_accounts(vec![account(a, "A-local", 9)]);
        let mut remote = local.clone();
        remote.accounts = vec![account(a, "A-remote", 2)];

        assert!(merge_into(&mut local, remote));
        assert_eq!(local.accounts[0].title, "A-local");
    }

    #[test]
    fn timestamp_tie_keeps_local() {
        let a = Uuid::new_v4();
        let mut local = dataset_with_accounts(vec![account(a, "A-local", 4)]);
        let mut remote = local.clone();
        remote.accounts = vec![account(a, "A-remote", 4)];

        assert!(merge_into(&mut local, remote));
        assert_eq!(local.accounts[0].title, "A-local");
    }

    #[test]
    fn identical_datasets_report_no_change() {
        let a = Uuid::new_v4();
        let mut local = dataset_with_accounts(vec![account(a, "Same", 4)]);
        let remote = local.clone();

        assert!(!merge_into(&mut local, remote));
        assert_eq!(local.accounts.len(), 1);
    }

    #[test]
    fn reserved_category_survives_remote_omission() {
        let mut local = dataset_with_accounts(Vec::new());
        let mut remote = local.clone();
        remote.categories.retain(|c| !c.is_reserved());

        assert!(merge_into(&mut local, remote));
        assert_eq!(local.categories[0].id, ALL_CATEGORY_ID);
        assert_eq!(local.categories[0].name, ALL_CATEGORY_NAME);
    }

    #[test]
    fn category_delete_by_omission_propagates() {
        let mut local = dataset_with_accounts(Vec::new());
        let doomed = local
            .categories
            .iter()
            .find(|c| c.name == "Shopping")
            .unwrap()
            .id;

        let mut remote = local.clone();
        remote.categories.retain(|c| c.id != doomed);

        assert!(merge_into(&mut local, remote));
        assert!(local.category(doomed).is_none());
        assert_eq!(local.categories.len(), 4);
    }

    #[test]
    fn merged_collections_are_resorted() {
        let mut local = dataset_with_accounts(vec![account(Uuid::new_v4(), "Zulu", 1)]);
        let mut remote = local.clone();
        let mut fav = account(Uuid::new_v4(), "Alpha", 2);
        fav.favorite = true;
        remote.accounts.push(fav);
        remote.resort();

        assert!(merge_into(&mut local, remote));
        assert_eq!(local.accounts[0].title, "Alpha");
        assert_eq!(local.accounts[1].title, "Zulu");
    }

    #[test]
    fn whole_entity_replacement_includes_nested_data() {
        use crate::model::AccountData;

        let id = Uuid::new_v4();
        let mut local_acct = account(id, "Entry", 1);
        local_acct.data.push(AccountData::Other {
            id: Uuid::new_v4(),
            label: "local-only".to_string(),
            fields: Default::default(),
        });
        let remote_acct = account(id, "Entry", 8);

        let mut local = dataset_with_accounts(vec![local_acct]);
        let mut remote = local.clone();
        remote.accounts = vec![remote_acct];

        assert!(merge_into(&mut local, remote));
        // Newer remote replaces the whole account, nested list included.
        assert!(local.accounts[0].data.is_empty());
    }
}
