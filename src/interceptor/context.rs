use std::future::Future;

use async_trait::async_trait;
use tonic::Status;
use tracing::error;

use super::{CLIENT_COMPONENT, Call, Interceptor, Next};
use crate::context::RequestScope;
use crate::error::{RpcError, RpcResult};

const NAME: &str = "context interceptor";

/// 上下文绑定拦截器（客户端最外层）
///
/// 出站调用必须来自仍在处理中的入站请求，否则以 [`RpcError::MissingRequestContext`]
/// 终止，调用不会到达网络。绑定后下游调用随入站请求一起取消、共用其截止时间。
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextRebindInterceptor;

impl ContextRebindInterceptor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<B, R> Interceptor<B, R> for ContextRebindInterceptor
where
    B: Send + 'static,
    R: Send + 'static,
{
    fn name(&self) -> &'static str {
        NAME
    }

    async fn intercept(&self, mut call: Call<B>, next: Next<'_, B, R>) -> RpcResult<R> {
        let Some(scope) = call.context().request_scope() else {
            let err = RpcError::MissingRequestContext;
            error!(
                component = CLIENT_COMPONENT,
                method = %call.method(),
                error = %err,
                "failed to get request context"
            );
            return Err(err);
        };

        call.rebind(&scope);
        let method = call.method().to_owned();

        let result = within_scope(&scope, next.run(call)).await;
        if let Err(err) = &result {
            error!(
                component = CLIENT_COMPONENT,
                method = %method,
                interceptor = NAME,
                error = %err,
                "failed to invoke"
            );
        }

        result
    }
}

/// 在入站请求作用域内执行：作用域取消或截止时间到达时放弃下游调用
async fn within_scope<R, F>(scope: &RequestScope, fut: F) -> RpcResult<R>
where
    F: Future<Output = RpcResult<R>>,
{
    let bounded = async {
        match scope.deadline() {
            Some(deadline) => match tokio::time::timeout_at(deadline, fut).await {
                Ok(result) => result,
                Err(_) => {
                    Err(Status::deadline_exceeded("inbound request deadline exceeded").into())
                }
            },
            None => fut.await,
        }
    };

    tokio::select! {
        biased;
        _ = scope.cancellation().cancelled() => {
            Err(Status::cancelled("inbound request cancelled").into())
        }
        result = bounded => result,
    }
}
