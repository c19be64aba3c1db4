pub mod prelude;

pub mod project;
pub mod publish_history;
