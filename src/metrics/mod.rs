//! # Prometheus 指标收集模块
//!
//! 连接核心的会话、驱逐与帧修复指标。

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// 全局指标注册表
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// 连接核心指标
pub struct ConnectionMetrics {
    /// 成功登记的会话总数
    pub sessions_registered_total: IntCounter,
    /// 因重复连接被驱逐的会话总数
    pub sessions_evicted_total: IntCounter,
    /// 断开并从注册表移除的会话总数
    pub sessions_disconnected_total: IntCounter,
    /// 驱逐通知或强制关闭失败次数
    pub eviction_notify_failures_total: IntCounter,
    /// 被修复的入站帧总数
    pub frames_repaired_total: IntCounter,
    /// 处理生命周期事件时捕获的 panic 次数
    pub lifecycle_event_panics_total: IntCounter,
    /// 当前活跃会话数
    pub active_sessions: IntGauge,
}

impl ConnectionMetrics {
    pub fn new() -> Self {
        let sessions_registered_total = IntCounter::new(
            "stomp_sessions_registered_total",
            "Total number of STOMP sessions registered",
        )
        .expect("Failed to create stomp_sessions_registered_total metric");

        let sessions_evicted_total = IntCounter::new(
            "stomp_sessions_evicted_total",
            "Total number of STOMP sessions evicted by a newer connection of the same user",
        )
        .expect("Failed to create stomp_sessions_evicted_total metric");

        let sessions_disconnected_total = IntCounter::new(
            "stomp_sessions_disconnected_total",
            "Total number of STOMP sessions removed on disconnect",
        )
        .expect("Failed to create stomp_sessions_disconnected_total metric");

        let eviction_notify_failures_total = IntCounter::new(
            "stomp_eviction_notify_failures_total",
            "Total number of failed eviction notices or forced closes",
        )
        .expect("Failed to create stomp_eviction_notify_failures_total metric");

        let frames_repaired_total = IntCounter::new(
            "stomp_frames_repaired_total",
            "Total number of inbound frames repaired before parsing",
        )
        .expect("Failed to create stomp_frames_repaired_total metric");

        let lifecycle_event_panics_total = IntCounter::new(
            "stomp_lifecycle_event_panics_total",
            "Total number of panics caught while handling lifecycle events",
        )
        .expect("Failed to create stomp_lifecycle_event_panics_total metric");

        let active_sessions = IntGauge::new(
            "stomp_active_sessions",
            "Number of STOMP sessions currently registered",
        )
        .expect("Failed to create stomp_active_sessions metric");

        // 注册指标，忽略重复注册错误（测试中会重复创建）
        let _ = REGISTRY.register(Box::new(sessions_registered_total.clone()));
        let _ = REGISTRY.register(Box::new(sessions_evicted_total.clone()));
        let _ = REGISTRY.register(Box::new(sessions_disconnected_total.clone()));
        let _ = REGISTRY.register(Box::new(eviction_notify_failures_total.clone()));
        let _ = REGISTRY.register(Box::new(frames_repaired_total.clone()));
        let _ = REGISTRY.register(Box::new(lifecycle_event_panics_total.clone()));
        let _ = REGISTRY.register(Box::new(active_sessions.clone()));

        Self {
            sessions_registered_total,
            sessions_evicted_total,
            sessions_disconnected_total,
            eviction_notify_failures_total,
            frames_repaired_total,
            lifecycle_event_panics_total,
            active_sessions,
        }
    }
}

impl Default for ConnectionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// 以 Prometheus 文本格式导出全局注册表
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_are_exported() {
        let metrics = ConnectionMetrics::new();
        metrics.sessions_registered_total.inc();
        metrics.active_sessions.set(1);

        let text = gather_text();
        assert!(text.contains("stomp_sessions_registered_total"));
        assert!(text.contains("stomp_active_sessions"));
    }
}
