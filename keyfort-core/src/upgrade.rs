//! Load-time normalization of datasets written by older releases.

use async_trait::async_trait;
use tracing::debug;

use crate::model::Dataset;
use crate::storage::CURRENT_BUNDLE_VERSION;
use crate::Result;

/// Normalizes a freshly-deserialized dataset to the current format before
/// the manager installs it. Hosts with bespoke legacy formats supply their
/// own implementation.
#[async_trait]
pub trait UpgradeService: Send + Sync {
    async fn upgrade(&self, dataset: Dataset, loaded_version: u32) -> Result<Dataset>;
}

/// Default upgrade: runs each account-data normalization hook and logs
/// legacy loads. No structural rewrites.
pub struct StandardUpgrade;

#[async_trait]
impl UpgradeService for StandardUpgrade {
    async fn upgrade(&self, mut dataset: Dataset, loaded_version: u32) -> Result<Dataset> {
        if loaded_version < CURRENT_BUNDLE_VERSION {
            debug!(loaded_version, "normalizing legacy bundle");
        }

        let mut normalized = 0usize;
        for account in &mut dataset.accounts {
            for data in &mut account.data {
                if data.normalize() {
                    normalized += 1;
                }
            }
        }
        if normalized > 0 {
            debug!(normalized, "account data entries normalized");
        }

        Ok(dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecretString;
    use crate::model::{Account, AccountData, ALL_CATEGORY_ID};
    use uuid::Uuid;

    #[tokio::test]
    async fn upgrade_runs_normalization_hooks() {
        let mut dataset = Dataset::seeded();
        let mut account = Account::new("Card", ALL_CATEGORY_ID);
        account.data.push(AccountData::PaymentCard {
            id: Uuid::new_v4(),
            cardholder: "J. Doe".to_string(),
            number: SecretString::new("4111111111111111"),
            expiry_month: 1,
            expiry_year: 31,
            security_code: SecretString::new("999"),
        });
        dataset.accounts.push(account);

        let upgraded = StandardUpgrade.upgrade(dataset, 1).await.unwrap();
        assert!(matches!(
            upgraded.accounts[0].data[0],
            AccountData::PaymentCard {
                expiry_year: 2031,
                ..
            }
        ));
    }
}
