pub mod account;
pub mod subscription;
pub mod subscription_status;
