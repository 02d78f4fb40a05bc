//! 业务服务层

pub mod connection_service;

pub use connection_service::{ConnectionService, EvictionNotice, EvictionReport};
