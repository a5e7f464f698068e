//! Network JSON-RPC client, the bridge's only gateway to the chain.
//!
//! ## Resilience
//!
//! * Every request carries the transport timeout configured on the shared
//!   [`reqwest::Client`].
//! * Nothing here retries. Receipt reads are retried by the poller; a
//!   submission is never resent, since a second deploy is a second contract.
//! * Timeouts, connection errors, HTTP 429 and 5xx map to
//!   [`ChainError::Network`]; JSON-RPC error objects to
//!   [`ChainError::Rejected`]; unexpected shapes to [`ChainError::Malformed`].

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::errors::ChainError;
use crate::signer::SigningIdentity;
use crate::status::TransactionReceipt;

/// A fully resolved submission, ready to sign.
#[derive(Debug, Clone, PartialEq)]
pub enum CallPayload {
    Deploy {
        code: Vec<u8>,
        args: Vec<Value>,
    },
    Call {
        address: String,
        function: String,
        args: Vec<Value>,
    },
}

impl CallPayload {
    pub fn target(&self) -> Option<&str> {
        match self {
            CallPayload::Deploy { .. } => None,
            CallPayload::Call { address, .. } => Some(address),
        }
    }

    fn data(&self) -> Value {
        match self {
            CallPayload::Deploy { code, args } => json!({
                "code": BASE64.encode(code),
                "args": args,
            }),
            CallPayload::Call { function, args, .. } => json!({
                "function": function,
                "args": args,
            }),
        }
    }
}

/// A read-only view call.
#[derive(Debug, Clone, PartialEq)]
pub struct StateQuery {
    pub function: String,
    pub args: Vec<Value>,
}

impl StateQuery {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            args: Vec::new(),
        }
    }
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Sign and submit; returns the transaction hash.
    async fn submit_call(
        &self,
        payload: &CallPayload,
        signer: &dyn SigningIdentity,
    ) -> Result<String, ChainError>;

    /// One snapshot of a transaction. Never waits for progress.
    async fn get_receipt(&self, hash: &str) -> Result<TransactionReceipt, ChainError>;

    /// Side-effect-free contract read.
    async fn read_state(&self, address: &str, query: &StateQuery) -> Result<Value, ChainError>;
}

// ─────────────────────────────────────────────────────────
// JSON-RPC response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

// ─────────────────────────────────────────────────────────
// HTTP implementation
// ─────────────────────────────────────────────────────────

pub struct JsonRpcChainClient {
    client: Client,
    rpc_url: String,
    next_id: AtomicU64,
}

impl JsonRpcChainClient {
    pub fn new(client: Client, rpc_url: impl Into<String>) -> Self {
        Self {
            client,
            rpc_url: rpc_url.into(),
            next_id: AtomicU64::new(1),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let resp = self
            .client
            .post(&self.rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }))
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(ChainError::Network(format!("{method}: HTTP {status}")));
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ChainError::Rejected {
                code: i64::from(status.as_u16()),
                message,
            });
        }

        let body: RpcResponse = resp.json().await?;
        if let Some(err) = body.error {
            return Err(ChainError::Rejected {
                code: err.code,
                message: err.message,
            });
        }

        debug!(method, id, "rpc call answered");
        Ok(body.result.unwrap_or(Value::Null))
    }

    /// Next nonce for `address`, as the node counts it.
    async fn transaction_count(&self, address: &str) -> Result<u64, ChainError> {
        let result = self.call("eth_getTransactionCount", json!([address])).await?;
        parse_nonce(&result)
    }
}

/// Nodes answer with a JSON number, a `0x` quantity or a decimal string.
fn parse_nonce(value: &Value) -> Result<u64, ChainError> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => match s.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16).ok(),
            None => s.parse().ok(),
        },
        _ => None,
    };
    parsed.ok_or_else(|| ChainError::Malformed(format!("expected transaction count, got {value}")))
}

#[async_trait]
impl ChainClient for JsonRpcChainClient {
    async fn submit_call(
        &self,
        payload: &CallPayload,
        signer: &dyn SigningIdentity,
    ) -> Result<String, ChainError> {
        let nonce = self.transaction_count(signer.address()).await?;
        let raw = encode_signed_transaction(payload, signer, nonce)?;
        let result = self.call("eth_sendRawTransaction", json!([raw])).await?;
        match result {
            Value::String(hash) if !hash.is_empty() => Ok(hash),
            other => Err(ChainError::Malformed(format!(
                "expected transaction hash, got {other}"
            ))),
        }
    }

    async fn get_receipt(&self, hash: &str) -> Result<TransactionReceipt, ChainError> {
        let result = self.call("eth_getTransactionByHash", json!([hash])).await?;
        if result.is_null() {
            return Ok(TransactionReceipt::pending(hash));
        }
        serde_json::from_value(result).map_err(|e| ChainError::Malformed(e.to_string()))
    }

    async fn read_state(&self, address: &str, query: &StateQuery) -> Result<Value, ChainError> {
        self.call(
            "eth_call",
            json!([{
                "to": address,
                "data": {
                    "function": query.function,
                    "args": query.args,
                },
            }]),
        )
        .await
    }
}

/// Build the `0x`-hex raw transaction: a JSON envelope of the transaction
/// and the signer's signature over its canonical JSON bytes. The nonce makes
/// a resubmitted payload a distinct transaction.
fn encode_signed_transaction(
    payload: &CallPayload,
    signer: &dyn SigningIdentity,
    nonce: u64,
) -> Result<String, ChainError> {
    let transaction = json!({
        "from": signer.address(),
        "to": payload.target(),
        "nonce": nonce,
        "value": 0,
        "data": payload.data(),
    });
    let message =
        serde_json::to_vec(&transaction).map_err(|e| ChainError::Signing(e.to_string()))?;
    let signature = signer
        .sign(&message)
        .map_err(|e| ChainError::Signing(e.to_string()))?;

    let envelope = json!({
        "transaction": transaction,
        "signature": format!("0x{}", hex::encode(signature)),
    });
    let bytes = serde_json::to_vec(&envelope).map_err(|e| ChainError::Signing(e.to_string()))?;
    Ok(format!("0x{}", hex::encode(bytes)))
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::LocalKey;
    use crate::status::TransactionStatus;
    use mockito::Matcher;

    const DEV_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn decode_raw(raw: &str) -> Value {
        let bytes = hex::decode(raw.trim_start_matches("0x")).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn deploy_envelope_has_no_target_and_base64_code() {
        let key = LocalKey::from_hex(DEV_KEY).unwrap();
        let payload = CallPayload::Deploy {
            code: b"class Oracle: pass".to_vec(),
            args: vec![json!("0"), json!("Title")],
        };

        let envelope = decode_raw(&encode_signed_transaction(&payload, &key, 0).unwrap());
        let tx = &envelope["transaction"];
        assert!(tx["to"].is_null());
        assert_eq!(tx["from"], key.address());
        assert_eq!(
            BASE64.decode(tx["data"]["code"].as_str().unwrap()).unwrap(),
            b"class Oracle: pass"
        );
        assert_eq!(tx["data"]["args"], json!(["0", "Title"]));

        let sig = envelope["signature"].as_str().unwrap();
        assert_eq!(hex::decode(sig.trim_start_matches("0x")).unwrap().len(), 65);
    }

    #[test]
    fn call_envelope_targets_contract() {
        let key = LocalKey::from_hex(DEV_KEY).unwrap();
        let payload = CallPayload::Call {
            address: "0xregistry".into(),
            function: "register_contract".into(),
            args: vec![json!("0xabc")],
        };

        let envelope = decode_raw(&encode_signed_transaction(&payload, &key, 0).unwrap());
        assert_eq!(envelope["transaction"]["to"], "0xregistry");
        assert_eq!(
            envelope["transaction"]["data"]["function"],
            "register_contract"
        );
    }

    #[test]
    fn nonce_distinguishes_identical_payloads() {
        let key = LocalKey::from_hex(DEV_KEY).unwrap();
        let payload = CallPayload::Deploy {
            code: b"class Factory: pass".to_vec(),
            args: vec![],
        };

        let first = encode_signed_transaction(&payload, &key, 7).unwrap();
        let again = encode_signed_transaction(&payload, &key, 7).unwrap();
        let next = encode_signed_transaction(&payload, &key, 8).unwrap();

        assert_eq!(first, again);
        assert_ne!(first, next);
        assert_eq!(decode_raw(&next)["transaction"]["nonce"], 8);
    }

    #[test]
    fn nonce_accepts_node_quantity_formats() {
        assert_eq!(parse_nonce(&json!(3)).unwrap(), 3);
        assert_eq!(parse_nonce(&json!("0x1f")).unwrap(), 31);
        assert_eq!(parse_nonce(&json!("12")).unwrap(), 12);
        assert!(matches!(
            parse_nonce(&Value::Null),
            Err(ChainError::Malformed(_))
        ));
    }

    async fn mock_nonce(server: &mut mockito::ServerGuard, nonce: &str) -> mockito::Mock {
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({
                "method": "eth_getTransactionCount",
                "params": [LocalKey::from_hex(DEV_KEY).unwrap().address()]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "jsonrpc": "2.0", "id": 1, "result": nonce }).to_string())
            .create_async()
            .await
    }

    #[tokio::test]
    async fn submit_returns_transaction_hash() {
        let mut server = mockito::Server::new_async().await;
        let nonce = mock_nonce(&mut server, "0x2").await;
        let mock = server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(
                json!({ "method": "eth_sendRawTransaction" }),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "jsonrpc": "2.0", "id": 1, "result": "0xfeed" }).to_string())
            .create_async()
            .await;

        let client = JsonRpcChainClient::new(Client::new(), server.url());
        let key = LocalKey::from_hex(DEV_KEY).unwrap();
        let payload = CallPayload::Call {
            address: "0xregistry".into(),
            function: "register_contract".into(),
            args: vec![],
        };

        let hash = client.submit_call(&payload, &key).await.unwrap();
        assert_eq!(hash, "0xfeed");
        nonce.assert_async().await;
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rpc_error_object_is_a_rejection() {
        let mut server = mockito::Server::new_async().await;
        let _nonce = mock_nonce(&mut server, "0x0").await;
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(
                json!({ "method": "eth_sendRawTransaction" }),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "error": { "code": -32602, "message": "invalid calldata" }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = JsonRpcChainClient::new(Client::new(), server.url());
        let key = LocalKey::from_hex(DEV_KEY).unwrap();
        let payload = CallPayload::Deploy {
            code: vec![1, 2, 3],
            args: vec![],
        };

        let err = client.submit_call(&payload, &key).await.unwrap_err();
        assert_eq!(
            err,
            ChainError::Rejected {
                code: -32602,
                message: "invalid calldata".into()
            }
        );
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn unknown_transaction_reads_as_pending() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({
                "method": "eth_getTransactionByHash",
                "params": ["0xabc"]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "jsonrpc": "2.0", "id": 1, "result": null }).to_string())
            .create_async()
            .await;

        let client = JsonRpcChainClient::new(Client::new(), server.url());
        let receipt = client.get_receipt("0xabc").await.unwrap();
        assert_eq!(receipt.status, TransactionStatus::Pending);
        assert_eq!(receipt.transaction_hash, "0xabc");
        assert!(receipt.consensus_data.is_none());
    }

    #[tokio::test]
    async fn receipt_is_decoded() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "result": {
                        "hash": "0xabc",
                        "status": "ACCEPTED",
                        "consensus_data": {
                            "leader_receipt": { "execution_result": "SUCCESS" }
                        },
                        "triggered_transactions": ["0xdef"],
                        "data": { "contract_address": "0x123" }
                    }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = JsonRpcChainClient::new(Client::new(), server.url());
        let receipt = client.get_receipt("0xabc").await.unwrap();
        assert_eq!(receipt.status, TransactionStatus::Accepted);
        assert!(receipt.succeeded());
        assert_eq!(receipt.triggered_transaction_hashes, vec!["0xdef"]);
    }

    #[tokio::test]
    async fn server_errors_are_retryable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(503)
            .create_async()
            .await;

        let client = JsonRpcChainClient::new(Client::new(), server.url());
        let err = client.get_receipt("0xabc").await.unwrap_err();
        assert!(err.is_retryable(), "{err:?}");
    }

    #[tokio::test]
    async fn unexpected_receipt_shape_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({ "jsonrpc": "2.0", "id": 1, "result": { "hash": "0xabc", "status": "EXPLODED" } })
                    .to_string(),
            )
            .create_async()
            .await;

        let client = JsonRpcChainClient::new(Client::new(), server.url());
        let err = client.get_receipt("0xabc").await.unwrap_err();
        assert!(matches!(err, ChainError::Malformed(_)));
    }

    #[tokio::test]
    async fn read_state_passes_query_through() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({
                "method": "eth_call",
                "params": [{
                    "to": "0xregistry",
                    "data": { "function": "get_contract_addresses", "args": [] }
                }]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "jsonrpc": "2.0", "id": 1, "result": ["0x1", "0x2"] }).to_string())
            .create_async()
            .await;

        let client = JsonRpcChainClient::new(Client::new(), server.url());
        let value = client
            .read_state("0xregistry", &StateQuery::new("get_contract_addresses"))
            .await
            .unwrap();
        assert_eq!(value, json!(["0x1", "0x2"]));
    }
}
