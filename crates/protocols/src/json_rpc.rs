//! Ledger node over HTTP JSON-RPC.
//!
//! Transactions are submitted with `eth_sendTransaction`, so the node must
//! hold the sending account (Anvil's unlocked dev accounts, or a signing
//! proxy in front of a remote node).

use crate::abi;
use crate::node::{CallOutput, LedgerNode, NodeError, ReadCall, TxHash, TxReceipt, WriteCall};
use async_trait::async_trait;
use cpamm_domain::{Address, to_hex};
use primitive_types::U256;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Default local node endpoint.
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";

/// EIP-1193 code for a request the user declined.
const USER_REJECTED_CODE: i64 = 4001;

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

impl RpcResponse {
    fn into_result(self) -> Result<Value, NodeError> {
        match (self.error, self.result) {
            (Some(error), _) => Err(classify_rpc_error(error)),
            (None, Some(result)) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

fn classify_rpc_error(error: RpcErrorObject) -> NodeError {
    let lowered = error.message.to_lowercase();
    if error.code == USER_REJECTED_CODE
        || lowered.contains("rejected")
        || lowered.contains("denied")
    {
        return NodeError::Rejected(error.message);
    }

    let revert_data = error
        .data
        .as_ref()
        .and_then(Value::as_str)
        .and_then(|s| decode_hex(s).ok())
        .and_then(|bytes| abi::decode_revert(&bytes));
    if let Some(reason) = revert_data {
        return NodeError::Reverted(reason);
    }
    if lowered.contains("revert") {
        let reason = error
            .message
            .split_once("reverted: ")
            .map(|(_, r)| r.to_string())
            .unwrap_or(error.message);
        return NodeError::Reverted(reason);
    }
    NodeError::Unavailable(format!("rpc error {}: {}", error.code, error.message))
}

fn decode_hex(text: &str) -> Result<Vec<u8>, NodeError> {
    let stripped = text.strip_prefix("0x").unwrap_or(text);
    hex::decode(stripped).map_err(|e| NodeError::Decode(format!("invalid hex {text:?}: {e}")))
}

fn encode_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

fn quantity(value: U256) -> String {
    format!("0x{value:x}")
}

fn parse_quantity(value: &Value) -> Result<U256, NodeError> {
    let text = value
        .as_str()
        .ok_or_else(|| NodeError::Decode(format!("expected hex quantity, got {value}")))?;
    let digits = text.strip_prefix("0x").unwrap_or(text);
    if digits.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_str_radix(digits, 16)
        .map_err(|_| NodeError::Decode(format!("invalid quantity {text:?}")))
}

fn parse_u64(value: &Value) -> Result<u64, NodeError> {
    let raw = parse_quantity(value)?;
    if raw > U256::from(u64::MAX) {
        return Err(NodeError::Decode(format!("quantity {raw} exceeds u64")));
    }
    Ok(raw.low_u64())
}

fn parse_hash(value: &Value) -> Result<TxHash, NodeError> {
    let text = value
        .as_str()
        .ok_or_else(|| NodeError::Decode(format!("expected transaction hash, got {value}")))?;
    let bytes = decode_hex(text)?;
    if bytes.len() != 32 {
        return Err(NodeError::Decode(format!("invalid transaction hash {text:?}")));
    }
    Ok(TxHash::from_slice(&bytes))
}

/// Method and params of the JSON-RPC request serving `call`.
fn read_request(call: &ReadCall) -> (&'static str, Value) {
    match abi::encode_read(call) {
        Some((to, data)) => (
            "eth_call",
            json!([{ "to": to_hex(&to), "data": encode_hex(&data) }, "latest"]),
        ),
        None => {
            let owner = match call {
                ReadCall::NativeBalance { owner } => *owner,
                _ => Address::zero(),
            };
            ("eth_getBalance", json!([to_hex(&owner), "latest"]))
        }
    }
}

fn decode_read(call: &ReadCall, result: &Value) -> Result<CallOutput, NodeError> {
    if matches!(call, ReadCall::NativeBalance { .. }) {
        return parse_quantity(result).map(CallOutput::Uint);
    }
    let text = result
        .as_str()
        .ok_or_else(|| NodeError::Decode(format!("expected call data, got {result}")))?;
    abi::decode_output(call.output_kind(), &decode_hex(text)?)
}

/// HTTP JSON-RPC client implementing [`LedgerNode`].
pub struct JsonRpcNode {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcNode {
    pub fn new(url: impl Into<String>) -> Result<Self, NodeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| NodeError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn post(&self, body: &Value) -> Result<Value, NodeError> {
        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| NodeError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(NodeError::Unavailable(format!(
                "http status {}",
                response.status()
            )));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| NodeError::Decode(e.to_string()))
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, NodeError> {
        let id = self.next_id();
        debug!(method, id, "rpc request");
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        let raw = self.post(&body).await?;
        let response: RpcResponse =
            serde_json::from_value(raw).map_err(|e| NodeError::Decode(e.to_string()))?;
        response.into_result()
    }

    /// Sends all requests as one JSON-RPC batch. Responses are matched by id,
    /// so the node may answer in any order.
    async fn batch(&self, requests: Vec<(&'static str, Value)>) -> Vec<Result<Value, NodeError>> {
        if requests.is_empty() {
            return Vec::new();
        }
        let first_id = self.next_id.fetch_add(requests.len() as u64, Ordering::Relaxed);
        let body: Vec<Value> = requests
            .iter()
            .enumerate()
            .map(|(i, (method, params))| {
                json!({
                    "jsonrpc": "2.0",
                    "id": first_id + i as u64,
                    "method": method,
                    "params": params,
                })
            })
            .collect();
        debug!(size = body.len(), "rpc batch");

        let raw = match self.post(&Value::Array(body)).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "rpc batch failed");
                return requests.iter().map(|_| Err(e.clone())).collect();
            }
        };
        let responses: Vec<RpcResponse> = match serde_json::from_value(raw) {
            Ok(r) => r,
            Err(e) => {
                let err = NodeError::Decode(e.to_string());
                return requests.iter().map(|_| Err(err.clone())).collect();
            }
        };

        let mut by_id: HashMap<u64, RpcResponse> = responses
            .into_iter()
            .filter_map(|r| r.id.map(|id| (id, r)))
            .collect();
        (0..requests.len())
            .map(|i| {
                by_id
                    .remove(&(first_id + i as u64))
                    .ok_or_else(|| NodeError::Decode("missing batch response".to_string()))
                    .and_then(RpcResponse::into_result)
            })
            .collect()
    }
}

#[async_trait]
impl LedgerNode for JsonRpcNode {
    async fn call(&self, call: ReadCall) -> Result<CallOutput, NodeError> {
        let (method, params) = read_request(&call);
        let result = self.request(method, params).await?;
        decode_read(&call, &result)
    }

    async fn call_batch(&self, calls: Vec<ReadCall>) -> Vec<Result<CallOutput, NodeError>> {
        let requests = calls.iter().map(read_request).collect();
        self.batch(requests)
            .await
            .into_iter()
            .zip(&calls)
            .map(|(result, call)| result.and_then(|value| decode_read(call, &value)))
            .collect()
    }

    async fn send(&self, tx: WriteCall) -> Result<TxHash, NodeError> {
        let data = abi::encode_write(&tx.call);
        let params = json!([{
            "from": to_hex(&tx.from),
            "to": to_hex(&tx.to),
            "value": quantity(tx.value),
            "data": encode_hex(&data),
        }]);
        debug!(method = tx.call.method_name(), "sending transaction");
        let result = self.request("eth_sendTransaction", params).await?;
        parse_hash(&result)
    }

    async fn receipt(&self, hash: TxHash) -> Result<Option<TxReceipt>, NodeError> {
        let result = self
            .request(
                "eth_getTransactionReceipt",
                json!([encode_hex(hash.as_bytes())]),
            )
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        let block_number = match result.get("blockNumber") {
            Some(v) if !v.is_null() => parse_u64(v)?,
            _ => return Ok(None),
        };
        let success = match result.get("status") {
            Some(v) => !parse_quantity(v)?.is_zero(),
            None => true,
        };
        let revert_reason = result
            .get("revertReason")
            .and_then(Value::as_str)
            .map(|s| {
                decode_hex(s)
                    .ok()
                    .and_then(|bytes| abi::decode_revert(&bytes))
                    .unwrap_or_else(|| s.to_string())
            });
        Ok(Some(TxReceipt {
            hash,
            block_number,
            success,
            revert_reason,
        }))
    }

    async fn chain_id(&self) -> Result<u64, NodeError> {
        parse_u64(&self.request("eth_chainId", json!([])).await?)
    }

    async fn block_number(&self) -> Result<u64, NodeError> {
        parse_u64(&self.request("eth_blockNumber", json!([])).await?)
    }

    async fn has_code(&self, address: Address) -> Result<bool, NodeError> {
        let code = self
            .request("eth_getCode", json!([to_hex(&address), "latest"]))
            .await?;
        let text = code.as_str().unwrap_or("0x");
        Ok(!decode_hex(text)?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitive_types::H160;

    #[test]
    fn test_quantities() {
        assert_eq!(quantity(U256::zero()), "0x0");
        assert_eq!(quantity(U256::from(255u64)), "0xff");
        assert_eq!(parse_quantity(&json!("0x7a69")).unwrap(), U256::from(31337u64));
        assert_eq!(parse_u64(&json!("0x0")).unwrap(), 0);
        assert!(parse_quantity(&json!(12)).is_err());
    }

    #[test]
    fn test_classify_errors() {
        let rejected = classify_rpc_error(RpcErrorObject {
            code: 4001,
            message: "User rejected the request.".to_string(),
            data: None,
        });
        assert!(matches!(rejected, NodeError::Rejected(_)));

        let reverted = classify_rpc_error(RpcErrorObject {
            code: 3,
            message: "execution reverted: UniswapV2Router: EXPIRED".to_string(),
            data: None,
        });
        assert_eq!(
            reverted,
            NodeError::Reverted("UniswapV2Router: EXPIRED".to_string())
        );

        let other = classify_rpc_error(RpcErrorObject {
            code: -32000,
            message: "header not found".to_string(),
            data: None,
        });
        assert!(matches!(other, NodeError::Unavailable(_)));
    }

    #[test]
    fn test_read_request_shapes() {
        let (method, params) = read_request(&ReadCall::NativeBalance {
            owner: H160::repeat_byte(1),
        });
        assert_eq!(method, "eth_getBalance");
        assert_eq!(params[1], "latest");

        let (method, params) = read_request(&ReadCall::PoolCount {
            factory: H160::repeat_byte(2),
        });
        assert_eq!(method, "eth_call");
        assert_eq!(params[0]["data"], "0x574f2ba3");
    }

    #[test]
    fn test_batch_responses_decode_per_member() {
        let call = ReadCall::TotalSupply {
            token: H160::repeat_byte(3),
        };
        let word = format!("0x{:064x}", 42);
        assert_eq!(
            decode_read(&call, &json!(word)).unwrap(),
            CallOutput::Uint(U256::from(42u64))
        );
        assert!(decode_read(&call, &json!("0x")).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_node_is_unavailable() {
        let node = JsonRpcNode::new("http://127.0.0.1:1").unwrap();
        let err = node.chain_id().await.unwrap_err();
        assert!(matches!(err, NodeError::Unavailable(_)));

        let results = node
            .call_batch(vec![
                ReadCall::PoolCount {
                    factory: H160::repeat_byte(2),
                },
                ReadCall::PoolCount {
                    factory: H160::repeat_byte(2),
                },
            ])
            .await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| matches!(r, Err(NodeError::Unavailable(_)))));
    }
}
