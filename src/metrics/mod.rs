pub mod operational;
pub mod prometheus;
pub mod query_client;
pub mod volume_queries;
