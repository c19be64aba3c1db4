use crate::database::prelude::{DbHistoryModel, DbProjectModel};
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct PaginationOptions {
    pub page_number: u64,
    pub page_size: u64,
}

impl PaginationOptions {
    pub fn new(page_number: u64, page_size: u64) -> Self {
        Self {
            page_number,
            page_size,
        }
    }

    pub fn has_more(&self, total: u64) -> bool {
        (1 + self.page_number) * self.page_size < total
    }
}

#[test]
fn validate_has_more() {
    assert_eq!(PaginationOptions::new(0, 50).has_more(100), true);
    assert_eq!(PaginationOptions::new(0, 50).has_more(10), false);
    assert_eq!(PaginationOptions::new(10, 50).has_more(551), true);
    assert_eq!(PaginationOptions::new(10, 50).has_more(400), false);
}

/// A project registration as it leaves the service. The hook secret is
/// deliberately absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataStoreProject {
    pub id: i32,
    pub user: String,
    pub project: String,
    pub activated: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<DbProjectModel> for DataStoreProject {
    fn from(source: DbProjectModel) -> Self {
        (&source).into()
    }
}

impl From<&DbProjectModel> for DataStoreProject {
    fn from(source: &DbProjectModel) -> Self {
        Self {
            id: source.project_id,
            user: source.host_user.clone(),
            project: source.host_project.clone(),
            activated: source.activated,
            created_at: source.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataStoreHistoryEntry {
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub repository: String,
    pub version: String,
    pub package_name: String,
    pub message: String,
    pub publish_okay: bool,
}

impl From<DbHistoryModel> for DataStoreHistoryEntry {
    fn from(source: DbHistoryModel) -> Self {
        (&source).into()
    }
}

impl From<&DbHistoryModel> for DataStoreHistoryEntry {
    fn from(source: &DbHistoryModel) -> Self {
        Self {
            created_at: source.created_at,
            repository: source.repository.clone(),
            version: source.version.clone(),
            package_name: source.package_name.clone(),
            message: source.message.clone(),
            publish_okay: source.publish_okay,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DataStoreHistoryList {
    pub entries: Vec<DataStoreHistoryEntry>,
    pub total_count: u64,
    pub has_more: bool,
}

impl DataStoreHistoryList {
    pub fn from(source: Vec<DbHistoryModel>, total_count: u64, has_more: bool) -> Self {
        let entries: Vec<DataStoreHistoryEntry> = source.iter().map(|it| it.into()).collect();

        Self {
            entries,
            total_count,
            has_more,
        }
    }
}
