pub mod subscription_source;
