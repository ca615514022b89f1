use super::file_config::WhitelistConfig;
use crate::queue::QueueItem;
use std::collections::HashSet;

/// Items that are never struck or removed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Whitelist {
    ids: HashSet<i64>,
    /// Lowercased; clients and services disagree on hash case.
    download_ids: HashSet<String>,
    /// Lowercased title substrings.
    title_contains: Vec<String>,
}

impl Whitelist {
    pub fn from_config(config: &WhitelistConfig) -> Self {
        Self {
            ids: config.ids.iter().copied().collect(),
            download_ids: config
                .download_ids
                .iter()
                .filter(|s| !s.is_empty())
                .map(|s| s.to_lowercase())
                .collect(),
            title_contains: config
                .title_contains
                .iter()
                .filter(|s| !s.is_empty())
                .map(|s| s.to_lowercase())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty() && self.download_ids.is_empty() && self.title_contains.is_empty()
    }

    pub fn matches(&self, item: &QueueItem) -> bool {
        if self.ids.contains(&item.id) {
            return true;
        }
        if let Some(dl) = &item.download_id {
            if self.download_ids.contains(&dl.to_lowercase()) {
                return true;
            }
        }
        let title = item.title.to_lowercase();
        self.title_contains.iter().any(|s| title.contains(s))
    }
}
