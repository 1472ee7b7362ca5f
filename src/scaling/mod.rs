pub mod decision;
pub mod expandability_cache;
pub mod quantity;
pub mod resize_executor;
pub mod scaling_config;
pub mod scaling_error;
pub mod target_resolver;
pub mod volume_api;
