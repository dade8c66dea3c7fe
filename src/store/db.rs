use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use crate::error::FlowError;
use crate::flow::checkpoint::Checkpoint;
use crate::flow::services::{CheckpointStore, TransactionStore};
use crate::models::agreement::AgreementRecord;
use crate::models::api::StateAndRef;
use crate::models::party::{NodeInfo, PartyIdentity, PartyKey};
use crate::models::transaction::{SignedTransaction, StateRef, TransactionId};
use crate::notary::UniquenessProvider;

type DbResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// A known node, as last seen on the network
#[derive(Debug, Clone, PartialEq)]
pub struct PeerRecord {
    pub info: NodeInfo,
    pub peer_id: Option<String>,
    pub address: Option<String>,
    pub last_seen: i64,
}

/// Thread-safe SQLite database wrapper
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open(data_dir: &Path) -> DbResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("iou.db");
        let conn = Connection::open(&db_path)?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.initialize_tables()?;
        Ok(db)
    }

    pub fn open_in_memory() -> DbResult<Self> {
        let db = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        db.initialize_tables()?;
        Ok(db)
    }

    /// Create tables if they don't exist
    fn initialize_tables(&self) -> DbResult<()> {
        let conn = self.conn.lock().map_err(|e| format!("Lock error: {}", e))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                recorded_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS states (
                txhash TEXT NOT NULL,
                output_index INTEGER NOT NULL,
                linear_id TEXT NOT NULL,
                amount INTEGER NOT NULL,
                proposer_name TEXT NOT NULL,
                counterparty_name TEXT NOT NULL,
                payload TEXT NOT NULL,
                consumed INTEGER DEFAULT 0,
                PRIMARY KEY (txhash, output_index)
            );

            CREATE TABLE IF NOT EXISTS peers (
                public_key TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                peer_id TEXT,
                address TEXT,
                network TEXT NOT NULL,
                notary INTEGER DEFAULT 0,
                last_seen INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS checkpoints (
                flow_id TEXT PRIMARY KEY,
                role TEXT NOT NULL,
                state TEXT NOT NULL,
                payload TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS notary_commits (
                txhash TEXT NOT NULL,
                output_index INTEGER NOT NULL,
                consuming_tx TEXT NOT NULL,
                PRIMARY KEY (txhash, output_index)
            );

            CREATE INDEX IF NOT EXISTS idx_states_consumed ON states(consumed);
            CREATE INDEX IF NOT EXISTS idx_peers_name ON peers(name);",
        )?;

        Ok(())
    }

    // ── Transactions ──

    /// Record a fully signed transaction: consume its inputs, store its outputs.
    /// Returns false if it was already recorded.
    pub fn record_transaction(&self, stx: &SignedTransaction) -> DbResult<bool> {
        let mut conn = self.conn.lock().map_err(|e| format!("Lock error: {}", e))?;
        let id = stx.id().to_hex();
        let payload = serde_json::to_string(stx)?;

        let db_tx = conn.transaction()?;
        let inserted = db_tx.execute(
            "INSERT OR IGNORE INTO transactions (id, payload, recorded_at) VALUES (?1, ?2, ?3)",
            params![id, payload, chrono::Utc::now().timestamp_millis()],
        )?;
        if inserted == 0 {
            return Ok(false);
        }

        for input in &stx.tx.inputs {
            db_tx.execute(
                "UPDATE states SET consumed = 1 WHERE txhash = ?1 AND output_index = ?2",
                params![input.txhash.to_hex(), input.index],
            )?;
        }
        for (index, record) in stx.tx.outputs.iter().enumerate() {
            db_tx.execute(
                "INSERT OR IGNORE INTO states (txhash, output_index, linear_id, amount, proposer_name, counterparty_name, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id,
                    index as u32,
                    record.linear_id.to_string(),
                    record.amount,
                    record.proposer.name,
                    record.counterparty.name,
                    serde_json::to_string(record)?,
                ],
            )?;
        }
        db_tx.commit()?;
        Ok(true)
    }

    /// Get a recorded transaction by id
    pub fn get_transaction(&self, id: &TransactionId) -> DbResult<Option<SignedTransaction>> {
        let conn = self.conn.lock().map_err(|e| format!("Lock error: {}", e))?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM transactions WHERE id = ?1",
                params![id.to_hex()],
                |row| row.get(0),
            )
            .optional()?;
        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
            None => Ok(None),
        }
    }

    /// Get all recorded transactions, oldest first
    pub fn get_transactions(&self) -> DbResult<Vec<SignedTransaction>> {
        let conn = self.conn.lock().map_err(|e| format!("Lock error: {}", e))?;
        let mut stmt = conn.prepare("SELECT payload FROM transactions ORDER BY recorded_at, rowid")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut transactions = Vec::new();
        for row in rows {
            transactions.push(serde_json::from_str(&row?)?);
        }
        Ok(transactions)
    }

    // ── States ──

    /// IOUs not yet consumed by a later transaction
    pub fn get_unconsumed_records(&self) -> DbResult<Vec<StateAndRef>> {
        let conn = self.conn.lock().map_err(|e| format!("Lock error: {}", e))?;
        let mut stmt = conn.prepare(
            "SELECT txhash, output_index, payload FROM states WHERE consumed = 0 ORDER BY rowid",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (txhash, index, payload) = row?;
            records.push(StateAndRef {
                state: serde_json::from_str(&payload)?,
                r#ref: StateRef {
                    txhash: txhash.parse()?,
                    index,
                },
            });
        }
        Ok(records)
    }

    /// Look up one output, consumed or not
    pub fn get_state(&self, state_ref: &StateRef) -> DbResult<Option<AgreementRecord>> {
        let conn = self.conn.lock().map_err(|e| format!("Lock error: {}", e))?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM states WHERE txhash = ?1 AND output_index = ?2",
                params![state_ref.txhash.to_hex(), state_ref.index],
                |row| row.get(0),
            )
            .optional()?;
        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
            None => Ok(None),
        }
    }

    // ── Peers ──

    /// Insert or refresh a node. A missing peer id or address keeps the stored one.
    /// A name stays bound to the first key that claimed it.
    pub fn upsert_peer(&self, info: &NodeInfo, peer_id: Option<&str>, address: Option<&str>) -> DbResult<()> {
        let conn = self.conn.lock().map_err(|e| format!("Lock error: {}", e))?;
        let public_key = info.party.owning_key.to_base58();
        let holder: Option<String> = conn
            .query_row(
                "SELECT public_key FROM peers WHERE name = ?1 AND public_key != ?2",
                params![info.party.name, public_key],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(holder) = holder {
            return Err(format!("Name '{}' is already bound to key {}", info.party.name, holder).into());
        }

        conn.execute(
            "INSERT INTO peers (public_key, name, peer_id, address, network, notary, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(public_key) DO UPDATE SET
                name = excluded.name,
                peer_id = COALESCE(excluded.peer_id, peers.peer_id),
                address = COALESCE(excluded.address, peers.address),
                network = excluded.network,
                notary = excluded.notary,
                last_seen = excluded.last_seen",
            params![
                public_key,
                info.party.name,
                peer_id,
                address,
                info.network,
                info.notary as i32,
                chrono::Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }

    /// Get all known nodes, ordered by name
    pub fn get_peers(&self) -> DbResult<Vec<PeerRecord>> {
        self.query_peers("SELECT public_key, name, peer_id, address, network, notary, last_seen FROM peers ORDER BY name", "")
    }

    pub fn find_peer_by_name(&self, name: &str) -> DbResult<Option<PeerRecord>> {
        Ok(self
            .query_peers(
                "SELECT public_key, name, peer_id, address, network, notary, last_seen FROM peers WHERE name = ?1",
                name,
            )?
            .into_iter()
            .next())
    }

    pub fn find_peer_by_key(&self, key: &PartyKey) -> DbResult<Option<PeerRecord>> {
        Ok(self
            .query_peers(
                "SELECT public_key, name, peer_id, address, network, notary, last_seen FROM peers WHERE public_key = ?1",
                &key.to_base58(),
            )?
            .into_iter()
            .next())
    }

    pub fn find_peer_by_peer_id(&self, peer_id: &str) -> DbResult<Option<PeerRecord>> {
        Ok(self
            .query_peers(
                "SELECT public_key, name, peer_id, address, network, notary, last_seen FROM peers WHERE peer_id = ?1",
                peer_id,
            )?
            .into_iter()
            .next())
    }

    fn query_peers(&self, query: &str, param: &str) -> DbResult<Vec<PeerRecord>> {
        let conn = self.conn.lock().map_err(|e| format!("Lock error: {}", e))?;
        let mut stmt = conn.prepare(query)?;
        let rows = if query.contains("?1") {
            stmt.query_map(params![param], Self::row_to_peer)?
                .collect::<SqlResult<Vec<_>>>()?
        } else {
            stmt.query_map([], Self::row_to_peer)?
                .collect::<SqlResult<Vec<_>>>()?
        };

        let mut peers = Vec::new();
        for (public_key, name, peer_id, address, network, notary, last_seen) in rows {
            peers.push(PeerRecord {
                info: NodeInfo {
                    party: PartyIdentity::new(name, PartyKey::from_base58(&public_key)?),
                    network,
                    notary: notary != 0,
                },
                peer_id,
                address,
                last_seen,
            });
        }
        Ok(peers)
    }

    #[allow(clippy::type_complexity)]
    fn row_to_peer(
        row: &rusqlite::Row<'_>,
    ) -> SqlResult<(String, String, Option<String>, Option<String>, String, i32, i64)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
        ))
    }

    // ── Checkpoints ──

    pub fn save_checkpoint(&self, checkpoint: &Checkpoint) -> DbResult<()> {
        let conn = self.conn.lock().map_err(|e| format!("Lock error: {}", e))?;
        conn.execute(
            "INSERT OR REPLACE INTO checkpoints (flow_id, role, state, payload, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                checkpoint.flow_id().to_string(),
                checkpoint.role(),
                checkpoint.state_tag(),
                serde_json::to_string(checkpoint)?,
                chrono::Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn load_checkpoint(&self, flow_id: &Uuid) -> DbResult<Option<Checkpoint>> {
        let conn = self.conn.lock().map_err(|e| format!("Lock error: {}", e))?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM checkpoints WHERE flow_id = ?1",
                params![flow_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
            None => Ok(None),
        }
    }

    pub fn remove_checkpoint(&self, flow_id: &Uuid) -> DbResult<bool> {
        let conn = self.conn.lock().map_err(|e| format!("Lock error: {}", e))?;
        let affected = conn.execute(
            "DELETE FROM checkpoints WHERE flow_id = ?1",
            params![flow_id.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Drop acceptor checkpoints last written before `cutoff` (Unix millis)
    pub fn remove_acceptor_checkpoints_before(&self, cutoff: i64) -> DbResult<usize> {
        let conn = self.conn.lock().map_err(|e| format!("Lock error: {}", e))?;
        let removed = conn.execute(
            "DELETE FROM checkpoints WHERE role = 'acceptor' AND updated_at < ?1",
            params![cutoff],
        )?;
        Ok(removed)
    }

    /// All pending checkpoints, oldest first
    pub fn load_checkpoints(&self) -> DbResult<Vec<Checkpoint>> {
        let conn = self.conn.lock().map_err(|e| format!("Lock error: {}", e))?;
        let mut stmt = conn.prepare("SELECT payload FROM checkpoints ORDER BY updated_at")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut checkpoints = Vec::new();
        for row in rows {
            checkpoints.push(serde_json::from_str(&row?)?);
        }
        Ok(checkpoints)
    }

    // ── Notary ──

    /// Mark `inputs` as consumed by `consuming_tx`, all or nothing.
    /// Returns the inputs already taken by a different transaction.
    pub fn commit_inputs(&self, inputs: &[StateRef], consuming_tx: &TransactionId) -> DbResult<Vec<StateRef>> {
        let mut conn = self.conn.lock().map_err(|e| format!("Lock error: {}", e))?;
        let consuming = consuming_tx.to_hex();
        let db_tx = conn.transaction()?;

        let mut conflicts = Vec::new();
        for input in inputs {
            let existing: Option<String> = db_tx
                .query_row(
                    "SELECT consuming_tx FROM notary_commits WHERE txhash = ?1 AND output_index = ?2",
                    params![input.txhash.to_hex(), input.index],
                    |row| row.get(0),
                )
                .optional()?;
            if matches!(existing, Some(ref other) if *other != consuming) {
                conflicts.push(*input);
            }
        }
        if !conflicts.is_empty() {
            return Ok(conflicts);
        }

        for input in inputs {
            db_tx.execute(
                "INSERT OR IGNORE INTO notary_commits (txhash, output_index, consuming_tx) VALUES (?1, ?2, ?3)",
                params![input.txhash.to_hex(), input.index, consuming],
            )?;
        }
        db_tx.commit()?;
        Ok(conflicts)
    }
}

#[async_trait]
impl TransactionStore for Database {
    async fn record(&self, transaction: &SignedTransaction) -> Result<bool, FlowError> {
        self.record_transaction(transaction).map_err(FlowError::storage)
    }

    async fn lookup(&self, id: &TransactionId) -> Result<Option<SignedTransaction>, FlowError> {
        self.get_transaction(id).map_err(FlowError::storage)
    }

    async fn resolve_state(&self, state_ref: &StateRef) -> Result<Option<AgreementRecord>, FlowError> {
        self.get_state(state_ref).map_err(FlowError::storage)
    }
}

#[async_trait]
impl CheckpointStore for Database {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), FlowError> {
        self.save_checkpoint(checkpoint).map_err(FlowError::storage)
    }

    async fn load(&self, flow_id: &Uuid) -> Result<Option<Checkpoint>, FlowError> {
        self.load_checkpoint(flow_id).map_err(FlowError::storage)
    }

    async fn remove(&self, flow_id: &Uuid) -> Result<(), FlowError> {
        self.remove_checkpoint(flow_id).map(|_| ()).map_err(FlowError::storage)
    }

    async fn load_all(&self) -> Result<Vec<Checkpoint>, FlowError> {
        self.load_checkpoints().map_err(FlowError::storage)
    }

    async fn expire_acceptors(&self, max_age: Duration) -> Result<usize, FlowError> {
        let max_age = chrono::Duration::from_std(max_age).map_err(FlowError::storage)?;
        let cutoff = (chrono::Utc::now() - max_age).timestamp_millis();
        self.remove_acceptor_checkpoints_before(cutoff)
            .map_err(FlowError::storage)
    }
}

#[async_trait]
impl UniquenessProvider for Database {
    async fn commit(&self, inputs: &[StateRef], consuming_tx: &TransactionId) -> Result<Vec<StateRef>, FlowError> {
        self.commit_inputs(inputs, consuming_tx).map_err(FlowError::storage)
    }
}
