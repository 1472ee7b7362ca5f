pub mod metrics_handler;
