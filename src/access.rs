// =============================================================================
// Access List — Accounts allowed to watch the signal feed
// =============================================================================
//
// Loaded from a flat JSON object of account id -> enabled flag:
//
//   { "CR1234567": true, "CR7654321": false }
//
// Only accounts mapped to `true` are members.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct AccessList {
    accounts: HashMap<String, bool>,
}

impl AccessList {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read access list from {}", path.display()))?;
        let list = Self::from_json(&content)
            .with_context(|| format!("failed to parse access list from {}", path.display()))?;
        info!(path = %path.display(), members = list.member_count(), "access list loaded");
        Ok(list)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let raw: HashMap<String, bool> = serde_json::from_str(json)?;
        let accounts = raw
            .into_iter()
            .map(|(account, enabled)| (account.trim().to_string(), enabled))
            .collect();
        Ok(Self { accounts })
    }

    pub fn is_member(&self, account: &str) -> bool {
        self.accounts.get(account.trim()).copied().unwrap_or(false)
    }

    pub fn member_count(&self) -> usize {
        self.accounts.values().filter(|&&enabled| enabled).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_enabled_accounts_are_members() {
        let list = AccessList::from_json(r#"{ "CR1": true, "CR2": false }"#).unwrap();
        assert!(list.is_member("CR1"));
        assert!(list.is_member(" CR1 "));
        assert!(!list.is_member("CR2"));
        assert!(!list.is_member("CR3"));
        assert_eq!(list.member_count(), 1);
    }

    #[test]
    fn padded_keys_in_the_file_still_match() {
        let list = AccessList::from_json(r#"{ " CR1 ": true, "CR2\t": true }"#).unwrap();
        assert!(list.is_member("CR1"));
        assert!(list.is_member("CR2"));
        assert_eq!(list.member_count(), 2);
    }

    #[test]
    fn empty_list_admits_nobody() {
        let list = AccessList::default();
        assert!(!list.is_member("CR1"));
    }

    #[test]
    fn non_boolean_values_are_rejected() {
        assert!(AccessList::from_json(r#"{ "CR1": "yes" }"#).is_err());
    }
}
