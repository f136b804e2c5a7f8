pub mod application_handler;
pub mod cluster_handler;
pub mod deployment_handler;
pub mod health_handler;
pub mod proxy_handler;
pub mod volume_handler;
