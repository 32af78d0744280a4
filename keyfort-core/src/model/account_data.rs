//! The closed set of payload variants an account can carry.
//!
//! Each variant is an inert, serializable record with a stable identity;
//! the manager never interprets field contents. The serde `kind` tag is the
//! persisted discriminant — renaming a variant tag breaks every stored
//! bundle, so tags are frozen.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::SecretString;

/// Discriminant for [`AccountData`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountDataKind {
    Credential,
    BankAccount,
    PaymentCard,
    LicenseKey,
    FileAttachment,
    WifiCredential,
    Other,
}

impl AccountDataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credential => "credential",
            Self::BankAccount => "bank_account",
            Self::PaymentCard => "payment_card",
            Self::LicenseKey => "license_key",
            Self::FileAttachment => "file_attachment",
            Self::WifiCredential => "wifi_credential",
            Self::Other => "other",
        }
    }
}

/// A single data record inside an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AccountData {
    Credential {
        id: Uuid,
        username: String,
        password: SecretString,
        url: Option<String>,
        notes: Option<String>,
    },
    BankAccount {
        id: Uuid,
        bank_name: String,
        account_number: SecretString,
        routing_number: Option<String>,
        iban: Option<String>,
    },
    PaymentCard {
        id: Uuid,
        cardholder: String,
        number: SecretString,
        expiry_month: u8,
        expiry_year: u16,
        security_code: SecretString,
    },
    LicenseKey {
        id: Uuid,
        product: String,
        key: SecretString,
        licensed_to: Option<String>,
    },
    /// Metadata only; the payload bytes live in a separate attachment file
    /// keyed by `id`.
    FileAttachment {
        id: Uuid,
        file_name: String,
        content_type: Option<String>,
        size: u64,
    },
    WifiCredential {
        id: Uuid,
        ssid: String,
        password: SecretString,
        security: String,
    },
    Other {
        id: Uuid,
        label: String,
        fields: BTreeMap<String, String>,
    },
}

impl AccountData {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Credential { id, .. }
            | Self::BankAccount { id, .. }
            | Self::PaymentCard { id, .. }
            | Self::LicenseKey { id, .. }
            | Self::FileAttachment { id, .. }
            | Self::WifiCredential { id, .. }
            | Self::Other { id, .. } => *id,
        }
    }

    pub fn kind(&self) -> AccountDataKind {
        match self {
            Self::Credential { .. } => AccountDataKind::Credential,
            Self::BankAccount { .. } => AccountDataKind::BankAccount,
            Self::PaymentCard { .. } => AccountDataKind::PaymentCard,
            Self::LicenseKey { .. } => AccountDataKind::LicenseKey,
            Self::FileAttachment { .. } => AccountDataKind::FileAttachment,
            Self::WifiCredential { .. } => AccountDataKind::WifiCredential,
            Self::Other { .. } => AccountDataKind::Other,
        }
    }

    /// Normalize values written by older releases. Returns whether anything
    /// changed so the upgrade service can decide to re-persist.
    pub fn normalize(&mut self) -> bool {
        match self {
            // Older bundles stored two-digit card years.
            Self::PaymentCard { expiry_year, .. } if *expiry_year < 100 => {
                *expiry_year += 2000;
                true
            }
            // The security field was optional before Wi-Fi records were typed.
            Self::WifiCredential { security, .. } if security.is_empty() => {
                *security = "wpa2-psk".to_string();
                true
            }
            _ => false,
        }
    }
}
