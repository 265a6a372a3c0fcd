//! JSON-RPC 2.0 ledger client over HTTP.

use crate::client::{
    EventBatch, LedgerClient, LedgerError, SignedVerdictTransaction, TransactionReceipt,
};
use attest_core::{Address, AttestationId, AttestationStatus, Cursor, TxHash};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::trace;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

/// Build the request envelope for `method`.
pub fn encode_request(id: u64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

/// Decode a response body into the method's result type.
pub fn decode_response<R: DeserializeOwned>(body: &[u8]) -> Result<R, LedgerError> {
    let response: RpcResponse =
        serde_json::from_slice(body).map_err(|e| LedgerError::Decode(e.to_string()))?;

    if let Some(error) = response.error {
        return Err(LedgerError::Rpc {
            code: error.code,
            message: error.message,
        });
    }

    serde_json::from_value(response.result).map_err(|e| LedgerError::Decode(e.to_string()))
}

/// Ledger gateway client.
#[derive(Debug)]
pub struct RpcLedgerClient {
    http: reqwest::Client,
    url: String,
    contract: Address,
    next_id: AtomicU64,
}

impl RpcLedgerClient {
    pub fn new(url: impl Into<String>, contract: Address) -> Result<Self, LedgerError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            url: url.into(),
            contract,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    async fn call<R: DeserializeOwned>(&self, method: &str, params: Value) -> Result<R, LedgerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        trace!(method, id, "JSON-RPC request");

        let response = self
            .http
            .post(&self.url)
            .json(&encode_request(id, method, params))
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(LedgerError::Http {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        decode_response(&body)
    }
}

impl LedgerClient for RpcLedgerClient {
    async fn fetch_events(&self, since: Cursor) -> Result<EventBatch, LedgerError> {
        self.call(
            "attest_getEvents",
            json!([{ "contract": self.contract, "fromBlock": since.block() + 1 }]),
        )
        .await
    }

    async fn is_authorized_verifier(&self, verifier: Address) -> Result<bool, LedgerError> {
        self.call("attest_isAuthorizedVerifier", json!([self.contract, verifier]))
            .await
    }

    async fn attestation_status(
        &self,
        attestation_id: AttestationId,
    ) -> Result<AttestationStatus, LedgerError> {
        self.call(
            "attest_getAttestationStatus",
            json!([self.contract, attestation_id]),
        )
        .await
    }

    async fn transaction_count(&self, account: Address) -> Result<u64, LedgerError> {
        self.call("attest_getTransactionCount", json!([account])).await
    }

    async fn chain_id(&self) -> Result<u64, LedgerError> {
        self.call("attest_chainId", json!([])).await
    }

    async fn send_transaction(
        &self,
        transaction: &SignedVerdictTransaction,
    ) -> Result<TxHash, LedgerError> {
        self.call("attest_sendVerdictTransaction", json!([transaction]))
            .await
    }

    async fn transaction_receipt(
        &self,
        tx_hash: TxHash,
    ) -> Result<Option<TransactionReceipt>, LedgerError> {
        self.call("attest_getTransactionReceipt", json!([tx_hash]))
            .await
    }
}
