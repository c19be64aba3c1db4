use crate::backend::models::PaginationOptions;
use crate::database::{
    entity::{self, prelude::*},
    DatabaseError, DbResult, NotFoundError, StateDatabase,
};
use async_trait::async_trait;
use sea_orm::{entity::*, query::*, InsertResult, PaginatorTrait};
use tracing_attributes::instrument;

pub mod models {
    use crate::database::entity;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct DbHistoryModel {
        pub entry_id: i32,
        pub created_at: chrono::DateTime<chrono::Utc>,
        pub repository: String,
        pub version: String,
        pub package_name: String,
        pub message: String,
        pub publish_okay: bool,
    }

    impl From<entity::publish_history::Model> for DbHistoryModel {
        fn from(source: entity::publish_history::Model) -> Self {
            (&source).into()
        }
    }

    impl From<&entity::publish_history::Model> for DbHistoryModel {
        fn from(source: &entity::publish_history::Model) -> Self {
            Self {
                entry_id: source.id,
                created_at: chrono::DateTime::from_naive_utc_and_offset(
                    source.created_at,
                    chrono::Utc,
                ),
                repository: source.repository.clone(),
                version: source.version.clone(),
                package_name: source.package_name.clone(),
                message: source.message.clone(),
                publish_okay: source.publish_okay,
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct CreateHistoryParam {
        pub repository: String,
        pub version: String,
        pub package_name: String,
        pub message: String,
        pub publish_okay: bool,
    }
}

pub use models::*;

/**
 * HistoryQueries is the append-only audit trail of release attempts. There
 * is intentionally no update or delete here: one insert per attempt, read
 * back newest first.
 */
#[async_trait]
pub trait HistoryQueries {
    async fn record_history(&self, entry: CreateHistoryParam) -> DbResult<DbHistoryModel>;

    async fn get_history_by_id(&self, entry_id: i32) -> DbResult<DbHistoryModel>;

    async fn list_history(&self, pagination: PaginationOptions) -> DbResult<Vec<DbHistoryModel>>;

    async fn list_history_for_repository(
        &self,
        repository: &str,
        pagination: PaginationOptions,
    ) -> DbResult<Vec<DbHistoryModel>>;

    async fn count_history(&self, repository: Option<&str>) -> DbResult<u64>;
}

#[async_trait]
impl HistoryQueries for StateDatabase {
    #[instrument(skip(self))]
    async fn record_history(&self, entry: CreateHistoryParam) -> DbResult<DbHistoryModel> {
        use entity::publish_history;

        let model = publish_history::ActiveModel {
            created_at: Set(self.date_time_provider.now().naive_utc()),
            repository: Set(entry.repository),
            version: Set(entry.version),
            package_name: Set(entry.package_name),
            message: Set(entry.message),
            publish_okay: Set(entry.publish_okay),
            ..Default::default()
        };

        let res: InsertResult<publish_history::ActiveModel> =
            PublishHistory::insert(model).exec(&self.db).await?;
        self.get_history_by_id(res.last_insert_id).await
    }

    #[instrument(skip(self))]
    async fn get_history_by_id(&self, entry_id: i32) -> DbResult<DbHistoryModel> {
        match PublishHistory::find_by_id(entry_id).one(&self.db).await? {
            Some(found) => Ok(found.into()),
            None => Err(DatabaseError::NotFound {
                error: NotFoundError::HistoryById { entry_id },
            }),
        }
    }

    #[instrument(skip(self))]
    async fn list_history(&self, pagination: PaginationOptions) -> DbResult<Vec<DbHistoryModel>> {
        use entity::publish_history::Column;

        let entries = PublishHistory::find()
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .paginate(&self.db, pagination.page_size)
            .fetch_page(pagination.page_number)
            .await?;

        Ok(entries.iter().map(DbHistoryModel::from).collect())
    }

    #[instrument(skip(self))]
    async fn list_history_for_repository(
        &self,
        repository: &str,
        pagination: PaginationOptions,
    ) -> DbResult<Vec<DbHistoryModel>> {
        use entity::publish_history::Column;

        let entries = PublishHistory::find()
            .filter(Column::Repository.eq(repository))
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .paginate(&self.db, pagination.page_size)
            .fetch_page(pagination.page_number)
            .await?;

        Ok(entries.iter().map(DbHistoryModel::from).collect())
    }

    #[instrument(skip(self))]
    async fn count_history(&self, repository: Option<&str>) -> DbResult<u64> {
        use entity::publish_history::Column;

        let query = match repository {
            Some(repository) => PublishHistory::find().filter(Column::Repository.eq(repository)),
            None => PublishHistory::find(),
        };

        Ok(query.count(&self.db).await?)
    }
}

#[cfg(test)]
mod integ_test {
    use super::*;
    use crate::test_utils::*;

    fn entry(repository: &str, version: &str, okay: bool) -> CreateHistoryParam {
        CreateHistoryParam {
            repository: repository.to_owned(),
            version: version.to_owned(),
            package_name: repository.to_owned(),
            message: if okay { "All good!" } else { "Build failed" }.to_owned(),
            publish_okay: okay,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_record_history() {
        let db = make_database().await;

        let recorded = db.record_history(entry("lens", "1.2.0", true)).await.unwrap();
        assert_eq!(recorded.repository, "lens");
        assert_eq!(recorded.version, "1.2.0");
        assert_eq!(recorded.message, "All good!");
        assert!(recorded.publish_okay);

        let found = db.get_history_by_id(recorded.entry_id).await.unwrap();
        assert_eq!(found, recorded);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_list_history_newest_first() {
        let db = make_database().await;

        db.record_history(entry("lens", "1.0.0", false)).await.unwrap();
        db.record_history(entry("lens", "1.0.1", true)).await.unwrap();
        db.record_history(entry("text", "2.0", true)).await.unwrap();

        let all = db.list_history(PaginationOptions::new(0, 50)).await.unwrap();
        let versions: Vec<&str> = all.iter().map(|e| e.version.as_str()).collect();
        assert_eq!(versions, vec!["2.0", "1.0.1", "1.0.0"]);
        assert_eq!(db.count_history(None).await.unwrap(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_list_history_for_repository() {
        let db = make_database().await;

        db.record_history(entry("lens", "1.0.0", false)).await.unwrap();
        db.record_history(entry("text", "2.0", true)).await.unwrap();
        db.record_history(entry("lens", "1.0.1", true)).await.unwrap();

        let lens = db
            .list_history_for_repository("lens", PaginationOptions::new(0, 50))
            .await
            .unwrap();
        let versions: Vec<&str> = lens.iter().map(|e| e.version.as_str()).collect();
        assert_eq!(versions, vec!["1.0.1", "1.0.0"]);
        assert_eq!(db.count_history(Some("lens")).await.unwrap(), 2);
        assert_eq!(db.count_history(Some("missing")).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_history_pagination() {
        let db = make_database().await;

        for patch in 0..5 {
            db.record_history(entry("lens", &format!("1.0.{}", patch), true))
                .await
                .unwrap();
        }

        let page = db.list_history(PaginationOptions::new(1, 2)).await.unwrap();
        let versions: Vec<&str> = page.iter().map(|e| e.version.as_str()).collect();
        assert_eq!(versions, vec!["1.0.2", "1.0.1"]);
    }
}
