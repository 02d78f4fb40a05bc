//! 工具函数模块
//!
//! 提供用户上下文作用域与时间戳等通用工具函数

pub mod context;

pub use context::{current_user_id, with_optional_user_scope, with_user_scope};

use std::any::Any;

use chrono::Utc;

/// 获取当前时间戳（毫秒）
pub fn current_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// 提取 panic 负载中的文本
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
