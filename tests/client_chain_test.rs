//! 客户端拦截器链测试

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{Counter, Harness, TRACE_ID_HEX, is_lower_hex_32};
use flare_rpc_telemetry::metadata::TRACE_ID_KEY;
use flare_rpc_telemetry::{
    Call, CallContext, Chain, ClientChainBuilder, RequestScope, RpcError, invoker_fn,
    reconstruct_context,
};
use opentelemetry::trace::Status as SpanStatus;
use tokio_util::sync::CancellationToken;
use tonic::{Code, Status};

fn client_chain(harness: &Harness) -> Chain<String, String> {
    ClientChainBuilder::standard(&harness.telemetry).build()
}

fn inbound_context() -> CallContext {
    CallContext::from_origin(RequestScope::new(CancellationToken::new()))
}

#[tokio::test]
async fn test_call_without_request_context_never_reaches_network() {
    let harness = Harness::new();
    let chain = client_chain(&harness);
    let calls = Counter::default();

    let invoker = {
        let calls = calls.clone();
        invoker_fn(move |_call: Call<String>| {
            let calls = calls.clone();
            async move {
                calls.hit();
                Ok::<_, RpcError>("pong".to_string())
            }
        })
    };

    let call = Call::new("Orders/Get", "ping".to_string()).with_context(CallContext::detached());
    let result = chain.invoke(call, &invoker).await;

    assert!(matches!(result, Err(RpcError::MissingRequestContext)));
    assert_eq!(calls.get(), 0);
    assert!(harness.finished_spans().is_empty());
}

#[tokio::test]
async fn test_attaches_trace_id_of_client_span() {
    let harness = Harness::new();
    let chain = client_chain(&harness);
    let seen = Arc::new(Mutex::new(Vec::<String>::new()));

    let invoker = {
        let seen = seen.clone();
        invoker_fn(move |call: Call<String>| {
            let seen = seen.clone();
            async move {
                let values: Vec<String> = call
                    .metadata()
                    .get_all(TRACE_ID_KEY)
                    .iter()
                    .filter_map(|v| v.to_str().ok().map(str::to_owned))
                    .collect();
                seen.lock().unwrap().extend(values);
                Ok::<_, RpcError>(format!("reply to {}", call.message()))
            }
        })
    };

    let call = Call::new("Orders/Get", "ping".to_string()).with_context(inbound_context());
    let reply = chain.invoke(call, &invoker).await.unwrap();
    assert_eq!(reply, "reply to ping");

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert!(is_lower_hex_32(&seen[0]));

    let spans = harness.finished_spans();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].name, "Orders/Get");
    assert_eq!(spans[0].span_context.trace_id().to_string(), seen[0]);
}

#[tokio::test]
async fn test_outgoing_span_joins_inbound_trace() {
    let harness = Harness::new();
    let chain = client_chain(&harness);
    let seen = Arc::new(Mutex::new(None::<String>));

    let invoker = {
        let seen = seen.clone();
        invoker_fn(move |call: Call<String>| {
            let seen = seen.clone();
            async move {
                *seen.lock().unwrap() = call.read_first(TRACE_ID_KEY).map(str::to_owned);
                Ok::<_, RpcError>(String::new())
            }
        })
    };

    let parent = reconstruct_context(TRACE_ID_HEX).unwrap();
    let context = inbound_context().with_trace_context(parent);
    let call = Call::new("Orders/Get", String::new()).with_context(context);
    chain.invoke(call, &invoker).await.unwrap();

    assert_eq!(seen.lock().unwrap().as_deref(), Some(TRACE_ID_HEX));
}

#[tokio::test]
async fn test_downstream_error_is_returned_unchanged() {
    let harness = Harness::new();
    let chain = client_chain(&harness);

    let invoker = invoker_fn(|_call: Call<String>| async move {
        Err::<String, _>(RpcError::from(Status::unavailable("orders service down")))
    });

    let call = Call::new("Orders/Get", String::new()).with_context(inbound_context());
    let err = chain.invoke(call, &invoker).await.unwrap_err();

    match &err {
        RpcError::Invocation(status) => {
            assert_eq!(status.code(), Code::Unavailable);
            assert_eq!(status.message(), "orders service down");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_retryable());

    let spans = harness.finished_spans();
    assert_eq!(spans.len(), 1);
    assert!(matches!(spans[0].status, SpanStatus::Error { .. }));
}

#[tokio::test]
async fn test_cancelled_inbound_request_cancels_outgoing_call() {
    let harness = Harness::new();
    let chain = client_chain(&harness);
    let token = CancellationToken::new();
    let calls = Counter::default();

    let invoker = {
        let calls = calls.clone();
        invoker_fn(move |_call: Call<String>| {
            let calls = calls.clone();
            async move {
                calls.hit();
                std::future::pending::<()>().await;
                Ok::<_, RpcError>(String::new())
            }
        })
    };

    let context = CallContext::from_origin(RequestScope::new(token.clone()));
    let call = Call::new("Orders/Get", String::new()).with_context(context);

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    let err = chain.invoke(call, &invoker).await.unwrap_err();
    canceller.await.unwrap();

    assert_eq!(err.code(), Code::Cancelled);
    assert_eq!(calls.get(), 1);
    // 外层被取消时 span 仍然结束
    assert_eq!(harness.finished_spans().len(), 1);
}

#[tokio::test]
async fn test_inbound_deadline_bounds_outgoing_call() {
    let harness = Harness::new();
    let chain = client_chain(&harness);
    let deadlines = Arc::new(Mutex::new(Vec::new()));

    let invoker = {
        let deadlines = deadlines.clone();
        invoker_fn(move |call: Call<String>| {
            let deadlines = deadlines.clone();
            async move {
                deadlines.lock().unwrap().push(call.deadline());
                std::future::pending::<()>().await;
                Ok::<_, RpcError>(String::new())
            }
        })
    };

    let scope = RequestScope::new(CancellationToken::new()).with_timeout(Duration::from_millis(30));
    let expected = scope.deadline();
    let call = Call::new("Orders/Get", String::new()).with_context(CallContext::from_origin(scope));

    let err = chain.invoke(call, &invoker).await.unwrap_err();

    assert_eq!(err.code(), Code::DeadlineExceeded);
    assert_eq!(deadlines.lock().unwrap().as_slice(), &[expected]);
}

#[tokio::test]
async fn test_client_chain_order_is_fixed() {
    let harness = Harness::new();
    let chain: Chain<String, String> = ClientChainBuilder::new()
        .with_tracing(&harness.telemetry)
        .with_context_rebind()
        .build();

    assert_eq!(chain.names(), vec!["context interceptor", "log/trace interceptor"]);
}
