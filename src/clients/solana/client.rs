use crate::clients::solana::types::*;
use crate::transaction_log_parser::extract_program_logs;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const BLOCK_NOT_AVAILABLE: i64 = -32004;
const NODE_UNHEALTHY: i64 = -32005;
const SLOT_SKIPPED: i64 = -32007;
const LONG_TERM_STORAGE_SLOT_SKIPPED: i64 = -32009;
const BLOCK_STATUS_NOT_AVAILABLE_YET: i64 = -32014;

#[derive(Debug, Clone, Serialize)]
struct RPCRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
struct RPCError {
    code: i64,
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RPCResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<RPCError>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Slot {0} is not available yet")]
    SlotUnavailable(u64),
    #[error("Slot {0} was skipped")]
    SlotSkipped(u64),
    #[error("Request timed out")]
    Timeout,
    #[error("Rate limited by RPC node")]
    RateLimited,
    #[error("Network error: {0}")]
    Network(String),
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    /// Errors worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Timeout | ClientError::RateLimited | ClientError::Network(_) => true,
            ClientError::Rpc { code, .. } => *code == NODE_UNHEALTHY,
            _ => false,
        }
    }

    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::Timeout
        } else if e.is_decode() {
            ClientError::InvalidResponse(e.to_string())
        } else {
            ClientError::Network(e.to_string())
        }
    }
}

/// Maps slot-specific RPC error codes for a `getBlock` call.
pub fn classify_block_error(slot_number: u64, error: ClientError) -> ClientError {
    match error {
        ClientError::Rpc { code, .. }
            if code == BLOCK_NOT_AVAILABLE || code == BLOCK_STATUS_NOT_AVAILABLE_YET =>
        {
            ClientError::SlotUnavailable(slot_number)
        }
        ClientError::Rpc { code, .. }
            if code == SLOT_SKIPPED || code == LONG_TERM_STORAGE_SLOT_SKIPPED =>
        {
            ClientError::SlotSkipped(slot_number)
        }
        other => other,
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Client: Send + Sync {
    async fn get_latest_slot(&self, commitment: BlockCommitment) -> Result<u64, ClientError>;

    async fn get_block(
        &self,
        slot_number: u64,
        commitment: BlockCommitment,
    ) -> Result<SolanaBlock, ClientError>;
}

#[derive(Debug, Clone)]
pub struct SolanaClientConfig {
    pub base_url: String,
    pub request_timeout: Duration,
}

impl Default for SolanaClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct SolanaClient {
    http_client: reqwest::Client,
    base_url: String,
    next_request_id: AtomicU64,
}

impl SolanaClient {
    pub fn new(config: SolanaClientConfig) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        debug!("Creating new Solana client: {:?}", config);

        Ok(Self {
            http_client,
            base_url: config.base_url,
            next_request_id: AtomicU64::new(1),
        })
    }

    async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ClientError> {
        let request = RPCRequest {
            jsonrpc: "2.0",
            id: self.next_request_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        debug!(method, id = request.id, "Sending RPC request");

        let response = self
            .http_client
            .post(&self.base_url)
            .header("Accept", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(ClientError::from_reqwest)?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ClientError::RateLimited);
        }
        if status.is_server_error() {
            return Err(ClientError::Network(format!(
                "Received HTTP error code: {}",
                status
            )));
        }
        if status != reqwest::StatusCode::OK {
            return Err(ClientError::InvalidResponse(format!(
                "Received HTTP error code: {}",
                status
            )));
        }

        let rpc_response: RPCResponse =
            response.json().await.map_err(ClientError::from_reqwest)?;

        if let Some(error) = rpc_response.error {
            return Err(ClientError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        Ok(rpc_response.result.unwrap_or(serde_json::Value::Null))
    }
}

#[async_trait]
impl Client for SolanaClient {
    async fn get_latest_slot(&self, commitment: BlockCommitment) -> Result<u64, ClientError> {
        let result = self
            .call(
                "getSlot",
                serde_json::json!([{ "commitment": commitment.as_str() }]),
            )
            .await?;

        serde_json::from_value(result)
            .map_err(|e| ClientError::InvalidResponse(format!("Failed to parse slot: {}", e)))
    }

    async fn get_block(
        &self,
        slot_number: u64,
        commitment: BlockCommitment,
    ) -> Result<SolanaBlock, ClientError> {
        let result = self
            .call(
                "getBlock",
                serde_json::json!([
                    slot_number,
                    {
                        "encoding": "json",
                        "transactionDetails": "full",
                        "rewards": false,
                        "maxSupportedTransactionVersion": 0,
                        "commitment": commitment.for_block_query().as_str()
                    }
                ]),
            )
            .await
            .map_err(|e| classify_block_error(slot_number, e))?;

        if result.is_null() {
            return Err(ClientError::SlotUnavailable(slot_number));
        }

        let block: RpcBlock = serde_json::from_value(result).map_err(|e| {
            ClientError::InvalidResponse(format!("Failed to parse block {}: {}", slot_number, e))
        })?;

        block_from_rpc(slot_number, commitment, block)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcBlock {
    blockhash: String,
    previous_blockhash: String,
    parent_slot: u64,
    block_time: Option<i64>,
    #[serde(default)]
    transactions: Vec<RpcTransaction>,
}

#[derive(Debug, Deserialize)]
struct RpcTransaction {
    transaction: RpcTransactionBody,
    meta: Option<RpcTransactionMeta>,
}

#[derive(Debug, Deserialize)]
struct RpcTransactionBody {
    signatures: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTransactionMeta {
    err: Option<serde_json::Value>,
    #[serde(default)]
    log_messages: Option<Vec<String>>,
}

fn validate_blockhash(slot_number: u64, hash: &str) -> Result<(), ClientError> {
    let bytes = bs58::decode(hash).into_vec().map_err(|e| {
        ClientError::InvalidResponse(format!(
            "Slot {} has invalid blockhash {}: {}",
            slot_number, hash, e
        ))
    })?;
    if bytes.len() != 32 {
        return Err(ClientError::InvalidResponse(format!(
            "Slot {} has blockhash {} of {} bytes",
            slot_number,
            hash,
            bytes.len()
        )));
    }
    Ok(())
}

fn block_from_rpc(
    slot_number: u64,
    commitment: BlockCommitment,
    block: RpcBlock,
) -> Result<SolanaBlock, ClientError> {
    validate_blockhash(slot_number, &block.blockhash)?;
    validate_blockhash(slot_number, &block.previous_blockhash)?;

    let mut logs = Vec::new();
    for tx in &block.transactions {
        let Some(meta) = &tx.meta else {
            continue;
        };
        if meta.err.is_some() {
            continue;
        }
        let Some(messages) = &meta.log_messages else {
            continue;
        };
        let signature = tx.transaction.signatures.first().cloned().unwrap_or_default();
        logs.extend(extract_program_logs(
            &signature,
            slot_number,
            block.block_time,
            messages,
        ));
    }

    Ok(SolanaBlock {
        slot: SolanaSlot {
            slot: slot_number,
            parent_slot: block.parent_slot,
            blockhash: block.blockhash,
            parent_blockhash: block.previous_blockhash,
            block_time: block.block_time,
            commitment: commitment.for_block_query(),
        },
        logs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH_A: &str = "4sGjMW1sUnHzSxGspuhpqLDx6wiyjNtZAMdL4VZHirAn";
    const HASH_B: &str = "8yjr5Q5Vx5MXkzUaSh3a8hb4kM6sWmYEx1rJwNxw2Zof";
    const PROGRAM: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

    fn rpc_error(code: i64) -> ClientError {
        ClientError::Rpc {
            code,
            message: "boom".to_string(),
        }
    }

    #[test]
    fn block_errors_are_classified() {
        assert_eq!(
            classify_block_error(7, rpc_error(BLOCK_NOT_AVAILABLE)),
            ClientError::SlotUnavailable(7)
        );
        assert_eq!(
            classify_block_error(7, rpc_error(BLOCK_STATUS_NOT_AVAILABLE_YET)),
            ClientError::SlotUnavailable(7)
        );
        assert_eq!(
            classify_block_error(7, rpc_error(SLOT_SKIPPED)),
            ClientError::SlotSkipped(7)
        );
        assert_eq!(
            classify_block_error(7, rpc_error(LONG_TERM_STORAGE_SLOT_SKIPPED)),
            ClientError::SlotSkipped(7)
        );
        assert_eq!(classify_block_error(7, ClientError::Timeout), ClientError::Timeout);
    }

    #[test]
    fn transient_errors() {
        assert!(ClientError::Timeout.is_transient());
        assert!(ClientError::RateLimited.is_transient());
        assert!(ClientError::Network("reset".into()).is_transient());
        assert!(rpc_error(NODE_UNHEALTHY).is_transient());
        assert!(!rpc_error(-32602).is_transient());
        assert!(!ClientError::SlotUnavailable(1).is_transient());
        assert!(!ClientError::InvalidResponse("bad".into()).is_transient());
    }

    #[test]
    fn block_from_rpc_extracts_logs_of_successful_transactions() {
        let raw = serde_json::json!({
            "blockhash": HASH_B,
            "previousBlockhash": HASH_A,
            "parentSlot": 41,
            "blockTime": 1_700_000_000,
            "blockHeight": 10,
            "transactions": [
                {
                    "transaction": { "signatures": ["sig-ok"], "message": {} },
                    "meta": {
                        "err": null,
                        "logMessages": [
                            format!("Program {PROGRAM} invoke [1]"),
                            "Program log: Instruction: Transfer",
                            format!("Program {PROGRAM} success")
                        ]
                    }
                },
                {
                    "transaction": { "signatures": ["sig-failed"], "message": {} },
                    "meta": {
                        "err": { "InstructionError": [0, "Custom"] },
                        "logMessages": [
                            format!("Program {PROGRAM} invoke [1]"),
                            "Program log: never happened",
                            format!("Program {PROGRAM} failed: custom program error: 0x1")
                        ]
                    }
                }
            ]
        });
        let block: RpcBlock = serde_json::from_value(raw).unwrap();
        let block = block_from_rpc(42, BlockCommitment::Confirmed, block).unwrap();

        assert_eq!(block.slot.slot, 42);
        assert_eq!(block.slot.parent_slot, 41);
        assert_eq!(block.slot.blockhash, HASH_B);
        assert_eq!(block.slot.parent_blockhash, HASH_A);
        assert_eq!(block.slot.block_time, Some(1_700_000_000));
        assert_eq!(block.slot.commitment, BlockCommitment::Confirmed);
        assert_eq!(block.logs.len(), 1);
        assert_eq!(block.logs[0].signature, "sig-ok");
        assert_eq!(block.logs[0].program_id, PROGRAM);
        assert_eq!(block.logs[0].log_message, "Program log: Instruction: Transfer");
    }

    #[test]
    fn block_from_rpc_rejects_malformed_hash() {
        let raw = serde_json::json!({
            "blockhash": "not-base58-0OIl",
            "previousBlockhash": HASH_A,
            "parentSlot": 1,
            "blockTime": null
        });
        let block: RpcBlock = serde_json::from_value(raw).unwrap();
        let err = block_from_rpc(2, BlockCommitment::Finalized, block).unwrap_err();
        assert!(matches!(err, ClientError::InvalidResponse(_)));
    }

    #[test]
    fn processed_slot_records_the_commitment_it_was_read_at() {
        let raw = serde_json::json!({
            "blockhash": HASH_B,
            "previousBlockhash": HASH_A,
            "parentSlot": 6,
            "blockTime": null
        });
        let block: RpcBlock = serde_json::from_value(raw).unwrap();
        let block = block_from_rpc(7, BlockCommitment::Processed, block).unwrap();
        assert_eq!(block.slot.commitment, BlockCommitment::Confirmed);
    }
}
