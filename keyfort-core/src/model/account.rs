//! Account records and their nested data entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::account_data::AccountData;
use crate::model::base64_opt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub title: String,
    /// Must reference an existing category; enforced by the data manager.
    pub category_id: Uuid,
    pub favorite: bool,
    /// Raw icon bytes, base64 in the serialized bundle.
    #[serde(with = "base64_opt", default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<Vec<u8>>,
    pub last_modified: DateTime<Utc>,
    pub data: Vec<AccountData>,
}

impl Account {
    pub fn new(title: impl Into<String>, category_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            category_id,
            favorite: false,
            icon: None,
            last_modified: Utc::now(),
            data: Vec::new(),
        }
    }

    /// Whether any text field of the account matches the query
    /// (case-insensitive substring).
    pub fn matches(&self, query: &str) -> bool {
        let needle = query.to_lowercase();
        if self.title.to_lowercase().contains(&needle) {
            return true;
        }
        self.data.iter().any(|d| match d {
            AccountData::Credential { username, url, .. } => {
                username.to_lowercase().contains(&needle)
                    || url
                        .as_deref()
                        .is_some_and(|u| u.to_lowercase().contains(&needle))
            }
            AccountData::WifiCredential { ssid, .. } => ssid.to_lowercase().contains(&needle),
            AccountData::Other { label, .. } => label.to_lowercase().contains(&needle),
            _ => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecretString;

    #[test]
    fn matches_title_and_nested_fields() {
        let mut account = Account::new("GitHub", Uuid::new_v4());
        account.data.push(AccountData::Credential {
            id: Uuid::new_v4(),
            username: "octocat@example.com".to_string(),
            password: SecretString::new("pw"),
            url: Some("https://github.com".to_string()),
            notes: None,
        });

        assert!(account.matches("github"));
        assert!(account.matches("OCTOCAT"));
        assert!(!account.matches("gitlab"));
    }

    #[test]
    fn icon_bytes_serialize_as_base64() {
        let mut account = Account::new("With icon", Uuid::new_v4());
        account.icon = Some(vec![0xDE, 0xAD, 0xBE, 0xEF]);

        let json = serde_json::to_string(&account).unwrap();
        assert!(json.contains("\"icon\":\"3q2+7w==\""));

        let back: Account = serde_json::from_str(&json).unwrap();
        assert_eq!(back.icon, account.icon);
    }
}
