pub mod app;
pub mod cloud;
pub mod cmd;
pub mod config;
pub mod error;
pub mod kube;
pub mod loadbalancer;
pub mod logging;
pub mod model;
pub mod signal;
