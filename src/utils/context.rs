//! 用户上下文
//!
//! 在单个入站帧的处理期间保存"当前用户"，处理链上的任意调用点都可以读取，
//! 无需逐层传参。
//!
//! 作用域绑定在 tokio 任务的 future 上而不是线程上：
//! - 同一工作线程上交替执行的多个帧互不可见
//! - future 完成（包括返回错误、发生 panic 或被取消）时自动清除

use std::future::Future;

use crate::model::UserId;

tokio::task_local! {
    static CURRENT_USER: UserId;
}

/// 在给定用户身份下执行 future
///
/// # 示例
///
/// ```rust
/// use flare_stomp_core::model::UserId;
/// use flare_stomp_core::utils::context::{current_user_id, with_user_scope};
///
/// # tokio_test::block_on(async {
/// let seen = with_user_scope(UserId::from("alice"), async { current_user_id() }).await;
/// assert_eq!(seen, Some(UserId::from("alice")));
/// assert_eq!(current_user_id(), None);
/// # });
/// ```
pub async fn with_user_scope<F>(user_id: UserId, future: F) -> F::Output
where
    F: Future,
{
    CURRENT_USER.scope(user_id, future).await
}

/// 可选身份版本：没有身份时直接执行 future
pub async fn with_optional_user_scope<F>(user_id: Option<UserId>, future: F) -> F::Output
where
    F: Future,
{
    match user_id {
        Some(user_id) => CURRENT_USER.scope(user_id, future).await,
        None => future.await,
    }
}

/// 当前用户ID（作用域外返回 `None`）
pub fn current_user_id() -> Option<UserId> {
    CURRENT_USER.try_with(Clone::clone).ok()
}
