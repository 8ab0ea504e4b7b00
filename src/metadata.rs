//! 调用元数据通道
//!
//! trace id 是唯一跨进程传递的状态，固定使用 [`TRACE_ID_KEY`]；其它键原样透传。

use std::time::Duration;

use tonic::metadata::{AsciiMetadataKey, AsciiMetadataValue, MetadataMap};

use crate::error::RpcError;

/// 携带 32 位十六进制 trace id 的元数据键
pub const TRACE_ID_KEY: &str = "x-trace-id";

/// gRPC 超时头
pub const GRPC_TIMEOUT_KEY: &str = "grpc-timeout";

/// 追加一个键值对（保留同名的已有值）
pub fn append(metadata: &mut MetadataMap, key: &str, value: &str) -> Result<(), RpcError> {
    let key = AsciiMetadataKey::from_bytes(key.as_bytes())
        .map_err(|e| RpcError::invalid_metadata(key, e))?;
    let value: AsciiMetadataValue = value
        .parse()
        .map_err(|e| RpcError::invalid_metadata(key.as_str(), e))?;

    metadata.append(key, value);
    Ok(())
}

/// 读取键对应的第一个值；键不存在或值不是可见 ASCII 时返回 `None`
pub fn first<'a>(metadata: &'a MetadataMap, key: &str) -> Option<&'a str> {
    metadata
        .get_all(key)
        .iter()
        .next()
        .and_then(|v| v.to_str().ok())
}

/// 收紧 `grpc-timeout`：只在新超时更短（或尚未设置）时覆盖
pub fn tighten_timeout(metadata: &mut MetadataMap, remaining: Duration) {
    let current = first(metadata, GRPC_TIMEOUT_KEY).and_then(decode_timeout);
    if current.is_some_and(|current| current <= remaining) {
        return;
    }

    if let Ok(value) = encode_timeout(remaining).parse() {
        metadata.insert(GRPC_TIMEOUT_KEY, value);
    }
}

/// 编码为 gRPC 超时格式（最多 8 位数字 + 单位）
pub fn encode_timeout(timeout: Duration) -> String {
    const MAX: u128 = 99_999_999;

    let nanos = timeout.as_nanos();
    if nanos <= MAX {
        return format!("{nanos}n");
    }
    let micros = timeout.as_micros();
    if micros <= MAX {
        return format!("{micros}u");
    }
    let millis = timeout.as_millis();
    if millis <= MAX {
        return format!("{millis}m");
    }
    let secs = u128::from(timeout.as_secs());
    if secs <= MAX {
        return format!("{secs}S");
    }
    let minutes = secs / 60;
    if minutes <= MAX {
        return format!("{minutes}M");
    }
    format!("{}H", (secs / 3600).min(MAX))
}

/// 解析 gRPC 超时格式
pub fn decode_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 || value.len() > 9 {
        return None;
    }

    let (digits, unit) = value.split_at(value.len() - 1);
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;

    match unit {
        "H" => Some(Duration::from_secs(amount * 3600)),
        "M" => Some(Duration::from_secs(amount * 60)),
        "S" => Some(Duration::from_secs(amount)),
        "m" => Some(Duration::from_millis(amount)),
        "u" => Some(Duration::from_micros(amount)),
        "n" => Some(Duration::from_nanos(amount)),
        _ => None,
    }
}
