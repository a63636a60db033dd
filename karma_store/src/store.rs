use std::path::PathBuf;

use karma_common::{Agent, HeartbeatRecord};
use karma_escrow::EscrowRecord;
use karma_marketplace::{BrowseFilter, MarketplaceClient};
use log::warn;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::atomic::{write_json, write_text};
use crate::error::StoreError;
use crate::ledger::LedgerEntry;

/// Per-agent sovereign storage rooted at a path supplied by the scheduler.
/// Modeled on `ai_miner::storage::StorageManager`: bootstraps its directory
/// tree on `new`, falls back to a fresh default (logging via `warn!`) when
/// a file exists but fails to parse.
pub struct AgentStore {
    root: PathBuf,
}

impl AgentStore {
    pub async fn new(root: PathBuf) -> Result<Self, StoreError> {
        for sub in ["escrow", "purchases", "logs"] {
            fs::create_dir_all(root.join(sub))
                .await
                .map_err(|e| StoreError::io(root.join(sub).display().to_string(), e))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    fn agent_path(&self) -> PathBuf {
        self.root.join("agent.json")
    }

    fn state_summary_path(&self) -> PathBuf {
        self.root.join("state.md")
    }

    fn escrow_path(&self, task_id: Uuid) -> PathBuf {
        self.root.join("escrow").join(format!("{task_id}.json"))
    }

    fn ledger_path(&self) -> PathBuf {
        self.root.join("ledger.jsonl")
    }

    fn heartbeat_log_path(&self) -> PathBuf {
        self.root.join("heartbeat.log.jsonl")
    }

    fn purchase_path(&self, product: &str, task_id: Uuid) -> PathBuf {
        self.root
            .join("purchases")
            .join(product)
            .join(format!("{task_id}.blob"))
    }

    pub async fn load_agent(&self) -> Result<Option<Agent>, StoreError> {
        let path = self.agent_path();
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)
            .await
            .map_err(|e| StoreError::io(path.display().to_string(), e))?;
        match serde_json::from_slice(&bytes) {
            Ok(agent) => Ok(Some(agent)),
            Err(e) => {
                warn!("agent.json failed to parse, treating as unset: {e}");
                Ok(None)
            }
        }
    }

    pub async fn save_agent(&self, agent: &Agent) -> Result<(), StoreError> {
        write_json(&self.agent_path(), agent).await
    }

    pub async fn write_state_summary(&self, summary: &str) -> Result<(), StoreError> {
        write_text(&self.state_summary_path(), summary).await
    }

    pub async fn load_escrow(&self, task_id: Uuid) -> Result<Option<EscrowRecord>, StoreError> {
        let path = self.escrow_path(task_id);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)
            .await
            .map_err(|e| StoreError::io(path.display().to_string(), e))?;
        match serde_json::from_slice(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!("escrow/{task_id}.json failed to parse: {e}");
                Ok(None)
            }
        }
    }

    pub async fn save_escrow(&self, record: &EscrowRecord) -> Result<(), StoreError> {
        write_json(&self.escrow_path(record.task_id), record).await
    }

    /// Scans every file under `escrow/` and returns the parsed records,
    /// skipping (and logging) any that fail to parse rather than failing
    /// the whole scan.
    pub async fn list_escrow_records(&self) -> Result<Vec<EscrowRecord>, StoreError> {
        let escrow_dir = self.root.join("escrow");
        let mut entries = fs::read_dir(&escrow_dir)
            .await
            .map_err(|e| StoreError::io(escrow_dir.display().to_string(), e))?;
        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(escrow_dir.display().to_string(), e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path)
                .await
                .map_err(|e| StoreError::io(path.display().to_string(), e))?;
            match serde_json::from_slice::<EscrowRecord>(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => warn!("{} failed to parse, skipping: {e}", path.display()),
            }
        }
        Ok(records)
    }

    pub async fn save_purchase_blob(
        &self,
        product: &str,
        task_id: Uuid,
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        let path = self.purchase_path(product, task_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent.display().to_string(), e))?;
        }
        fs::write(&path, bytes)
            .await
            .map_err(|e| StoreError::io(path.display().to_string(), e))
    }

    async fn append_jsonl<T: serde::Serialize>(&self, path: &PathBuf, value: &T) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(value)
            .map_err(|e| StoreError::serde(path.display().to_string(), e))?;
        line.push(b'\n');
        let mut file = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .await
            .map_err(|e| StoreError::io(path.display().to_string(), e))?;
        file.write_all(&line)
            .await
            .map_err(|e| StoreError::io(path.display().to_string(), e))?;
        Ok(())
    }

    async fn read_jsonl<T: for<'de> serde::Deserialize<'de>>(
        &self,
        path: &PathBuf,
    ) -> Result<Vec<T>, StoreError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| StoreError::io(path.display().to_string(), e))?;
        let mut out = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(line) {
                Ok(value) => out.push(value),
                Err(e) => warn!("{} contains an unparseable line, skipping: {e}", path.display()),
            }
        }
        Ok(out)
    }

    pub async fn append_ledger(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        self.append_jsonl(&self.ledger_path(), entry).await
    }

    pub async fn read_ledger(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        self.read_jsonl(&self.ledger_path()).await
    }

    pub async fn append_heartbeat(&self, record: &HeartbeatRecord) -> Result<(), StoreError> {
        self.append_jsonl(&self.heartbeat_log_path(), record).await
    }

    pub async fn read_heartbeats(&self) -> Result<Vec<HeartbeatRecord>, StoreError> {
        self.read_jsonl(&self.heartbeat_log_path()).await
    }

    /// Scans `escrow/` for non-terminal tasks and re-fetches authoritative
    /// state from the marketplace, overwriting local state on disagreement
    /// (remote wins), per spec.md §4.4/§4.7 and Testable Scenario S6.
    pub async fn reconcile(&self, client: &MarketplaceClient) -> Result<usize, StoreError> {
        let local_records = self.list_escrow_records().await?;
        let pending: Vec<_> = local_records
            .into_iter()
            .filter(|r| !r.state.is_terminal())
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let remote_tasks = match client.browse(&BrowseFilter::default()).await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!("reconciliation could not reach the marketplace, leaving local state as-is: {e}");
                return Ok(0);
            }
        };

        let mut reconciled = 0;
        for mut record in pending {
            if let Some(remote) = remote_tasks.iter().find(|t| t.task_id == record.task_id) {
                if remote.state != record.state {
                    record.state = remote.state;
                    record.assignee_address = remote.assignee_address;
                    record.application_id = remote.application_id.clone();
                    record.submission_id = remote.submission_id.clone();
                    self.save_escrow(&record).await?;
                    reconciled += 1;
                }
            }
        }
        Ok(reconciled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use karma_common::{Address, Role};

    fn sample_agent() -> Agent {
        Agent {
            name: "agent-01".into(),
            address: Address::from_bytes([1u8; 20]),
            registry_id: None,
            role: Role::Seller,
            derivation_index: 0,
            offered_products: vec!["raw_logs".into()],
            desired_products: vec![],
        }
    }

    #[tokio::test]
    async fn save_and_load_agent_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = AgentStore::new(dir.path().to_path_buf()).await.unwrap();
        store.save_agent(&sample_agent()).await.unwrap();
        let loaded = store.load_agent().await.unwrap().unwrap();
        assert_eq!(loaded.name, "agent-01");
    }

    #[tokio::test]
    async fn missing_agent_file_is_none_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = AgentStore::new(dir.path().to_path_buf()).await.unwrap();
        assert!(store.load_agent().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn escrow_records_round_trip_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = AgentStore::new(dir.path().to_path_buf()).await.unwrap();
        let record = EscrowRecord::new(Uuid::new_v4(), Address::from_bytes([1u8; 20]));
        store.save_escrow(&record).await.unwrap();

        let loaded = store.load_escrow(record.task_id).await.unwrap().unwrap();
        assert_eq!(loaded.task_id, record.task_id);

        let all = store.list_escrow_records().await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn ledger_appends_are_readable_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = AgentStore::new(dir.path().to_path_buf()).await.unwrap();
        let entry = LedgerEntry {
            issued_at: Utc::now(),
            authorization: karma_common::PaymentAuthorization {
                from: Address::from_bytes([1u8; 20]),
                to: Address::from_bytes([2u8; 20]),
                value: 100,
                valid_after: 0,
                valid_before: 1,
                nonce: [1u8; 32],
                v: 27,
                r: [0u8; 32],
                s: [0u8; 32],
            },
        };
        store.append_ledger(&entry).await.unwrap();
        store.append_ledger(&entry).await.unwrap();
        let all = store.read_ledger().await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
