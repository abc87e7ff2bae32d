use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait ContractStore: Send + Sync {
    /// Returns the schema version of `program_id` active at `slot`.
    async fn schema_for(
        &self,
        program_id: &str,
        slot: u64,
    ) -> anyhow::Result<Option<ProgramSchema>>;

    async fn list_program_ids(&self) -> Vec<String>;
}

/// One version of a program's interface description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramSchema {
    pub program_id: String,
    pub name: String,
    pub version: u32,
    /// First slot at which this version applies.
    pub activation_slot: u64,
    pub idl: serde_json::Value,
}

pub struct InMemoryContractStore {
    schemas: DashMap<String, Vec<ProgramSchema>>,
}

impl InMemoryContractStore {
    pub fn new(schemas: Vec<ProgramSchema>) -> Self {
        let store = Self {
            schemas: DashMap::new(),
        };
        for schema in schemas {
            store.register(schema);
        }
        store
    }

    /// Adds a schema version, replacing any version with the same activation slot.
    pub fn register(&self, schema: ProgramSchema) {
        let mut versions = self.schemas.entry(schema.program_id.clone()).or_default();
        versions.retain(|s| s.activation_slot != schema.activation_slot);
        versions.push(schema);
        versions.sort_by_key(|s| s.activation_slot);
    }
}

impl Default for InMemoryContractStore {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl ContractStore for InMemoryContractStore {
    async fn schema_for(
        &self,
        program_id: &str,
        slot: u64,
    ) -> anyhow::Result<Option<ProgramSchema>> {
        Ok(self.schemas.get(program_id).and_then(|versions| {
            versions
                .iter()
                .rev()
                .find(|s| s.activation_slot <= slot)
                .cloned()
        }))
    }

    async fn list_program_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.schemas.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROGRAM: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

    fn schema(version: u32, activation_slot: u64) -> ProgramSchema {
        ProgramSchema {
            program_id: PROGRAM.to_string(),
            name: "spl_token".to_string(),
            version,
            activation_slot,
            idl: serde_json::json!({ "version": version }),
        }
    }

    #[tokio::test]
    async fn selects_version_active_at_slot() {
        let store = InMemoryContractStore::new(vec![schema(2, 500), schema(1, 0)]);

        let v1 = store.schema_for(PROGRAM, 499).await.unwrap().unwrap();
        let v2 = store.schema_for(PROGRAM, 500).await.unwrap().unwrap();
        assert_eq!(v1.version, 1);
        assert_eq!(v2.version, 2);
    }

    #[tokio::test]
    async fn unknown_program_or_early_slot_has_no_schema() {
        let store = InMemoryContractStore::new(vec![schema(1, 100)]);

        assert!(store.schema_for(PROGRAM, 99).await.unwrap().is_none());
        assert!(store
            .schema_for("11111111111111111111111111111111", 1_000)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn register_replaces_same_activation_slot() {
        let store = InMemoryContractStore::default();
        store.register(schema(1, 0));
        store.register(schema(7, 0));

        let active = store.schema_for(PROGRAM, 10).await.unwrap().unwrap();
        assert_eq!(active.version, 7);
        assert_eq!(store.list_program_ids().await, vec![PROGRAM.to_string()]);
    }
}
