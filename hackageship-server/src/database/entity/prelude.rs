pub use super::project::Entity as Project;
pub use super::publish_history::Entity as PublishHistory;
