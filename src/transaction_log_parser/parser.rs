use crate::clients::solana::SolanaProgramLog;
use crate::contract_store::ContractStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const LOG_PREFIX: &str = "Program log: ";
const DATA_PREFIX: &str = "Program data: ";
const RETURN_PREFIX: &str = "Program return: ";

#[derive(Debug, Clone)]
pub struct DecodedLog {
    pub slot: u64,
    pub program_id: String,
    pub signature: String,
    pub log_index: u64,
    pub event_name: String,
    pub schema_name: Option<String>,
    pub schema_version: Option<u32>,
    pub arguments: Vec<Argument>,
    pub output_data: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct Argument {
    pub name: String,
    pub arg_type: String,
    pub value: serde_json::Value,
    pub indexed: bool,
}

#[async_trait]
pub trait LogParser: Send + Sync {
    async fn decode_log(
        &self,
        program_id: &str,
        log: &SolanaProgramLog,
    ) -> anyhow::Result<DecodedLog>;
}

/// Splits a transaction's log messages into per-program logs.
///
/// Follows the runtime's `invoke [n]` / `success` / `failed` call stack and
/// attributes `Program log:`, `Program data:` and `Program return:` lines to
/// the program executing at that point.
pub fn extract_program_logs(
    signature: &str,
    slot: u64,
    block_time: Option<i64>,
    messages: &[String],
) -> Vec<SolanaProgramLog> {
    let mut logs = Vec::new();
    let mut call_stack: Vec<&str> = Vec::new();
    let mut instruction_index: Option<usize> = None;

    for (i, message) in messages.iter().enumerate() {
        let emitted = [LOG_PREFIX, DATA_PREFIX, RETURN_PREFIX]
            .iter()
            .any(|prefix| message.starts_with(prefix));
        if emitted {
            if let Some(program_id) = call_stack.last() {
                logs.push(SolanaProgramLog {
                    program_id: program_id.to_string(),
                    log_index: i as u64,
                    signature: signature.to_string(),
                    slot,
                    block_time,
                    log_message: message.clone(),
                    instruction_index: instruction_index.unwrap_or(0),
                });
            }
            continue;
        }

        let Some(rest) = message.strip_prefix("Program ") else {
            continue;
        };
        let mut parts = rest.split_whitespace();
        let (Some(program_id), Some(action)) = (parts.next(), parts.next()) else {
            continue;
        };

        match action {
            "invoke" => {
                if parts.next() == Some("[1]") {
                    instruction_index = Some(instruction_index.map_or(0, |i| i + 1));
                }
                call_stack.push(program_id);
            }
            "success" | "failed:" => {
                call_stack.pop();
            }
            _ => {}
        }
    }

    logs
}

pub struct TransactionLogParser {
    contract_store: Arc<dyn ContractStore>,
}

impl TransactionLogParser {
    pub fn new(contract_store: Arc<dyn ContractStore>) -> Self {
        Self { contract_store }
    }
}

fn string_argument(name: &str, value: serde_json::Value) -> Argument {
    Argument {
        name: name.to_string(),
        arg_type: "string".to_string(),
        value,
        indexed: false,
    }
}

#[async_trait]
impl LogParser for TransactionLogParser {
    async fn decode_log(
        &self,
        program_id: &str,
        log: &SolanaProgramLog,
    ) -> anyhow::Result<DecodedLog> {
        debug!(
            "Decoding log with signature: '{}' programId: '{}'",
            log.signature, log.program_id
        );

        if program_id != log.program_id {
            anyhow::bail!(
                "Log at index {} belongs to program {}, not {}",
                log.log_index,
                log.program_id,
                program_id
            );
        }

        let schema = self.contract_store.schema_for(program_id, log.slot).await?;

        let mut decoded_log = DecodedLog {
            slot: log.slot,
            program_id: log.program_id.clone(),
            signature: log.signature.clone(),
            log_index: log.log_index,
            event_name: String::new(),
            schema_name: schema.as_ref().map(|s| s.name.clone()),
            schema_version: schema.as_ref().map(|s| s.version),
            arguments: Vec::new(),
            output_data: HashMap::new(),
        };

        let log_msg = &log.log_message;
        let (event_name, arg_name, value) = if let Some(message) = log_msg.strip_prefix(LOG_PREFIX)
        {
            (
                "ProgramLog",
                "message",
                serde_json::Value::String(message.to_string()),
            )
        } else if let Some(data) = log_msg.strip_prefix(DATA_PREFIX) {
            let chunks = data
                .split_whitespace()
                .map(|c| serde_json::Value::String(c.to_string()))
                .collect();
            ("ProgramData", "data", serde_json::Value::Array(chunks))
        } else if let Some(returned) = log_msg.strip_prefix(RETURN_PREFIX) {
            let data = returned.split_whitespace().nth(1).unwrap_or_default();
            (
                "ProgramReturn",
                "data",
                serde_json::Value::String(data.to_string()),
            )
        } else {
            ("Unknown", "raw", serde_json::Value::String(log_msg.clone()))
        };

        decoded_log.event_name = event_name.to_string();
        decoded_log
            .output_data
            .insert(arg_name.to_string(), value.clone());
        let mut argument = string_argument(arg_name, value);
        if event_name == "ProgramData" {
            argument.arg_type = "string[]".to_string();
        }
        decoded_log.arguments.push(argument);

        Ok(decoded_log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract_store::{InMemoryContractStore, ProgramSchema};

    const TOKEN: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
    const MEMO: &str = "MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr";

    fn messages(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|l| l.to_string()).collect()
    }

    fn raw_log(message: &str) -> SolanaProgramLog {
        SolanaProgramLog {
            program_id: TOKEN.to_string(),
            log_index: 1,
            signature: "sig".to_string(),
            slot: 900,
            block_time: None,
            log_message: message.to_string(),
            instruction_index: 0,
        }
    }

    #[test]
    fn logs_are_attributed_to_the_executing_program() {
        let lines = messages(&[
            &format!("Program {TOKEN} invoke [1]"),
            "Program log: outer",
            &format!("Program {MEMO} invoke [2]"),
            "Program log: inner",
            &format!("Program {MEMO} consumed 100 of 200000 compute units"),
            &format!("Program {MEMO} success"),
            "Program data: AQID BAUG",
            &format!("Program {TOKEN} success"),
            &format!("Program {MEMO} invoke [1]"),
            "Program log: second instruction",
            &format!("Program {MEMO} success"),
        ]);

        let logs = extract_program_logs("sig", 7, Some(70), &lines);

        let summary: Vec<(&str, &str, usize, u64)> = logs
            .iter()
            .map(|l| {
                (
                    l.program_id.as_str(),
                    l.log_message.as_str(),
                    l.instruction_index,
                    l.log_index,
                )
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                (TOKEN, "Program log: outer", 0, 1),
                (MEMO, "Program log: inner", 0, 3),
                (TOKEN, "Program data: AQID BAUG", 0, 6),
                (MEMO, "Program log: second instruction", 1, 9),
            ]
        );
        assert!(logs.iter().all(|l| l.slot == 7 && l.block_time == Some(70)));
    }

    #[test]
    fn logs_outside_any_invocation_are_dropped() {
        let lines = messages(&["Program log: orphan"]);
        assert!(extract_program_logs("sig", 1, None, &lines).is_empty());
    }

    #[tokio::test]
    async fn decodes_program_log_with_active_schema() {
        let store = InMemoryContractStore::new(vec![ProgramSchema {
            program_id: TOKEN.to_string(),
            name: "spl_token".to_string(),
            version: 3,
            activation_slot: 0,
            idl: serde_json::json!({}),
        }]);
        let parser = TransactionLogParser::new(Arc::new(store));

        let decoded = parser
            .decode_log(TOKEN, &raw_log("Program log: Instruction: Transfer"))
            .await
            .unwrap();

        assert_eq!(decoded.event_name, "ProgramLog");
        assert_eq!(decoded.slot, 900);
        assert_eq!(decoded.program_id, TOKEN);
        assert_eq!(decoded.schema_name.as_deref(), Some("spl_token"));
        assert_eq!(decoded.schema_version, Some(3));
        assert_eq!(
            decoded.output_data["message"],
            serde_json::json!("Instruction: Transfer")
        );
    }

    #[tokio::test]
    async fn decodes_program_data_and_unknown_lines() {
        let parser = TransactionLogParser::new(Arc::new(InMemoryContractStore::default()));

        let data = parser
            .decode_log(TOKEN, &raw_log("Program data: AQID BAUG"))
            .await
            .unwrap();
        assert_eq!(data.event_name, "ProgramData");
        assert_eq!(data.output_data["data"], serde_json::json!(["AQID", "BAUG"]));
        assert_eq!(data.arguments[0].arg_type, "string[]");
        assert!(data.schema_name.is_none());

        let returned = parser
            .decode_log(TOKEN, &raw_log(&format!("Program return: {TOKEN} AAAA")))
            .await
            .unwrap();
        assert_eq!(returned.event_name, "ProgramReturn");
        assert_eq!(returned.output_data["data"], serde_json::json!("AAAA"));

        let unknown = parser
            .decode_log(TOKEN, &raw_log("something else"))
            .await
            .unwrap();
        assert_eq!(unknown.event_name, "Unknown");
    }

    #[tokio::test]
    async fn rejects_log_of_another_program() {
        let parser = TransactionLogParser::new(Arc::new(InMemoryContractStore::default()));
        let result = parser.decode_log(MEMO, &raw_log("Program log: x")).await;
        assert!(result.is_err());
    }
}
