use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use crate::error::ApplicationError;

/// 读操作遇到瞬时存储错误时的退避时间。
pub const READ_RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// 读操作最多重试一次，且仅针对瞬时错误。
///
/// 消息日志的写入不能走这里：追加操作在没有去重令牌时不是幂等的。
pub async fn retry_read_once<F, Fut, T>(mut op: F) -> Result<T, ApplicationError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApplicationError>>,
{
    match op().await {
        Err(err) if err.is_transient() => {
            tracing::debug!(error = %err, "transient read failure, retrying once");
            sleep(READ_RETRY_BACKOFF).await;
            op().await
        }
        other => other,
    }
}
