//! SQLite-backed review store.

use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use super::{ItemMutation, Page, ReviewCommit, ReviewStore};
use crate::error::{RecallError, RecallResult};
use crate::ledger;
use crate::types::{
    CardState, Concept, Interaction, InteractionSnapshot, ItemKind, ItemState, MemoryItem, Phrasing,
    StatsDelta, StatsLedger,
};

const ITEM_COLUMNS: &str = "i.id, i.owner_id, i.kind, i.state_json, i.created_at, i.archived_at, \
     i.deleted_at, i.card_state, i.reps, i.next_review_at";

/// Number of columns in [`ITEM_COLUMNS`]; joined columns start here.
const ITEM_COLUMN_COUNT: usize = 10;

const PHRASING_COLUMNS: &str = "id, concept_id, owner_id, text, attempt_count, correct_count, \
     last_attempted_at, created_at, creation_order, archived_at, deleted_at";

const INTERACTION_COLUMNS: &str =
    "id, owner_id, subject_id, phrasing_id, answer, is_correct, answered_at, snapshot_json";

const LEDGER_COLUMNS: &str = "owner_id, total_cards, new_count, learning_count, mature_count, \
     due_now_count, next_review_time, last_calculated";

/// Fixed-width UTC timestamps so text comparison matches time order.
fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(raw: &str) -> RecallResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RecallError::database(format!("Invalid timestamp '{}': {}", raw, e)))
}

fn parse_opt_ts(raw: Option<String>) -> RecallResult<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

fn count(raw: i64) -> u64 {
    raw.max(0) as u64
}

/// SQLite-backed [`ReviewStore`].
///
/// Keeps a running count of document rows read so callers can check the
/// cost of scans.
pub struct SqliteReviewStore {
    conn: Mutex<Connection>,
    reads: AtomicU64,
}

impl SqliteReviewStore {
    /// Create a new store at the given path
    pub fn new(path: impl AsRef<Path>) -> RecallResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
            reads: AtomicU64::new(0),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> RecallResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            reads: AtomicU64::new(0),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Document rows read since creation.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    fn count_reads(&self, rows: usize) {
        self.reads.fetch_add(rows as u64, Ordering::Relaxed);
    }

    fn conn(&self) -> RecallResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| RecallError::connection("Review store connection lock poisoned"))
    }

    fn init_schema(&self) -> RecallResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                state_json TEXT NOT NULL,
                card_state TEXT NOT NULL,
                reps INTEGER NOT NULL DEFAULT 0,
                next_review_at TEXT,
                created_at TEXT NOT NULL,
                archived_at TEXT,
                deleted_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_items_owner_due ON items(owner_id, reps, next_review_at);
            CREATE INDEX IF NOT EXISTS idx_items_owner_created ON items(owner_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_items_owner_id ON items(owner_id, id);

            CREATE TABLE IF NOT EXISTS concepts (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                phrasing_count INTEGER NOT NULL DEFAULT 0,
                canonical_phrasing_id TEXT,
                thin_score REAL NOT NULL DEFAULT 0,
                conflict_score REAL NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS phrasings (
                id TEXT PRIMARY KEY,
                concept_id TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                text TEXT NOT NULL,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                correct_count INTEGER NOT NULL DEFAULT 0,
                last_attempted_at TEXT,
                created_at TEXT NOT NULL,
                creation_order INTEGER NOT NULL,
                archived_at TEXT,
                deleted_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_phrasings_concept ON phrasings(concept_id, creation_order);

            CREATE TABLE IF NOT EXISTS interactions (
                id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                subject_id TEXT NOT NULL,
                phrasing_id TEXT,
                answer TEXT NOT NULL,
                is_correct INTEGER NOT NULL,
                answered_at TEXT NOT NULL,
                snapshot_json TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_interactions_subject ON interactions(subject_id, answered_at);

            CREATE TABLE IF NOT EXISTS stats_ledgers (
                owner_id TEXT PRIMARY KEY,
                total_cards INTEGER NOT NULL DEFAULT 0,
                new_count INTEGER NOT NULL DEFAULT 0,
                learning_count INTEGER NOT NULL DEFAULT 0,
                mature_count INTEGER NOT NULL DEFAULT 0,
                due_now_count INTEGER NOT NULL DEFAULT 0,
                next_review_time TEXT,
                last_calculated TEXT NOT NULL,
                sample_key REAL NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_ledgers_sample ON stats_ledgers(sample_key);
        "#,
        )?;
        Ok(())
    }

    fn row_to_item(row: &rusqlite::Row<'_>) -> RecallResult<MemoryItem> {
        let id: String = row.get(0)?;
        let owner_id: String = row.get(1)?;
        let kind: String = row.get(2)?;
        let state_json: String = row.get(3)?;
        let created_at = parse_ts(&row.get::<_, String>(4)?)?;
        let archived_at = parse_opt_ts(row.get(5)?)?;
        let deleted_at = parse_opt_ts(row.get(6)?)?;

        let state = match ItemState::parse_stored(&state_json) {
            Some(state) => state,
            None => {
                // Keep the indexed columns the ledger and the reps guard were
                // written from; the model resets the rest when next scheduled.
                let card_state: String = row.get(7)?;
                let recovered = ItemState {
                    state: CardState::from_str(&card_state).unwrap_or_default(),
                    reps: row.get(8)?,
                    next_review_at: parse_opt_ts(row.get(9)?)?,
                    ..ItemState::new_at(created_at)
                };
                warn!(
                    item_id = %id,
                    state = %recovered.state,
                    reps = recovered.reps,
                    "Unreadable memory state, keeping stored bookkeeping"
                );
                recovered
            }
        };

        Ok(MemoryItem {
            id,
            owner_id,
            kind: ItemKind::from_str(&kind).unwrap_or_default(),
            state,
            created_at,
            archived_at,
            deleted_at,
        })
    }

    fn row_to_phrasing(row: &rusqlite::Row<'_>) -> RecallResult<Phrasing> {
        Ok(Phrasing {
            id: row.get(0)?,
            concept_id: row.get(1)?,
            owner_id: row.get(2)?,
            text: row.get(3)?,
            attempt_count: row.get(4)?,
            correct_count: row.get(5)?,
            last_attempted_at: parse_opt_ts(row.get(6)?)?,
            created_at: parse_ts(&row.get::<_, String>(7)?)?,
            creation_order: row.get(8)?,
            archived_at: parse_opt_ts(row.get(9)?)?,
            deleted_at: parse_opt_ts(row.get(10)?)?,
        })
    }

    fn row_to_interaction(row: &rusqlite::Row<'_>) -> RecallResult<Interaction> {
        let snapshot: Option<String> = row.get(7)?;
        let is_correct: i32 = row.get(5)?;
        Ok(Interaction {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            subject_id: row.get(2)?,
            phrasing_id: row.get(3)?,
            answer: row.get(4)?,
            is_correct: is_correct != 0,
            answered_at: parse_ts(&row.get::<_, String>(6)?)?,
            snapshot: snapshot
                .map(|s| serde_json::from_str::<InteractionSnapshot>(&s))
                .transpose()?,
        })
    }

    fn row_to_ledger(row: &rusqlite::Row<'_>) -> RecallResult<StatsLedger> {
        Ok(StatsLedger {
            owner_id: row.get(0)?,
            total_cards: count(row.get(1)?),
            new_count: count(row.get(2)?),
            learning_count: count(row.get(3)?),
            mature_count: count(row.get(4)?),
            due_now_count: count(row.get(5)?),
            next_review_time: parse_opt_ts(row.get(6)?)?,
            last_calculated: parse_ts(&row.get::<_, String>(7)?)?,
        })
    }

    fn query_items(
        &self,
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> RecallResult<Vec<MemoryItem>> {
        let mut stmt = conn.prepare(sql)?;
        let items = stmt
            .query_map(params, |row| Ok(Self::row_to_item(row)))?
            .map(|r| r.map_err(RecallError::from).and_then(|inner| inner))
            .collect::<RecallResult<Vec<_>>>()?;
        self.count_reads(items.len());
        Ok(items)
    }

    fn write_item(conn: &Connection, item: &MemoryItem) -> RecallResult<()> {
        conn.execute(
            r#"INSERT INTO items
               (id, owner_id, kind, state_json, card_state, reps, next_review_at,
                created_at, archived_at, deleted_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
            params![
                item.id,
                item.owner_id,
                item.kind.to_string(),
                serde_json::to_string(&item.state)?,
                item.state.state.to_string(),
                item.state.reps,
                item.state.next_review_at.as_ref().map(ts),
                ts(&item.created_at),
                item.archived_at.as_ref().map(ts),
                item.deleted_at.as_ref().map(ts),
            ],
        )?;
        Ok(())
    }

    fn write_phrasing(conn: &Connection, phrasing: &Phrasing) -> RecallResult<()> {
        conn.execute(
            &format!(
                "INSERT INTO phrasings ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                PHRASING_COLUMNS
            ),
            params![
                phrasing.id,
                phrasing.concept_id,
                phrasing.owner_id,
                phrasing.text,
                phrasing.attempt_count,
                phrasing.correct_count,
                phrasing.last_attempted_at.as_ref().map(ts),
                ts(&phrasing.created_at),
                phrasing.creation_order,
                phrasing.archived_at.as_ref().map(ts),
                phrasing.deleted_at.as_ref().map(ts),
            ],
        )?;
        Ok(())
    }

    fn write_interaction(conn: &Connection, interaction: &Interaction) -> RecallResult<()> {
        let snapshot = interaction
            .snapshot
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        conn.execute(
            &format!(
                "INSERT INTO interactions ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                INTERACTION_COLUMNS
            ),
            params![
                interaction.id,
                interaction.owner_id,
                interaction.subject_id,
                interaction.phrasing_id,
                interaction.answer,
                interaction.is_correct as i32,
                ts(&interaction.answered_at),
                snapshot,
            ],
        )?;
        Ok(())
    }

    fn read_ledger(&self, conn: &Connection, owner_id: &str) -> RecallResult<Option<StatsLedger>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM stats_ledgers WHERE owner_id = ?1",
            LEDGER_COLUMNS
        ))?;
        let ledger = stmt
            .query_row(params![owner_id], |row| Ok(Self::row_to_ledger(row)))
            .optional()?
            .transpose()?;
        if ledger.is_some() {
            self.count_reads(1);
        }
        Ok(ledger)
    }

    /// Insert or replace counters; a new row gets a random sample key.
    fn write_ledger(conn: &Connection, ledger: &StatsLedger) -> RecallResult<()> {
        conn.execute(
            r#"INSERT INTO stats_ledgers
               (owner_id, total_cards, new_count, learning_count, mature_count, due_now_count,
                next_review_time, last_calculated, sample_key)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
               ON CONFLICT(owner_id) DO UPDATE SET
                total_cards = excluded.total_cards,
                new_count = excluded.new_count,
                learning_count = excluded.learning_count,
                mature_count = excluded.mature_count,
                due_now_count = excluded.due_now_count,
                next_review_time = excluded.next_review_time,
                last_calculated = excluded.last_calculated"#,
            params![
                ledger.owner_id,
                ledger.total_cards as i64,
                ledger.new_count as i64,
                ledger.learning_count as i64,
                ledger.mature_count as i64,
                ledger.due_now_count as i64,
                ledger.next_review_time.as_ref().map(ts),
                ts(&ledger.last_calculated),
                rand::random::<f64>(),
            ],
        )?;
        Ok(())
    }

    fn apply_delta_in(
        &self,
        conn: &Connection,
        owner_id: &str,
        delta: &StatsDelta,
        now: DateTime<Utc>,
    ) -> RecallResult<StatsLedger> {
        let current = self.read_ledger(conn, owner_id)?;
        let next = ledger::apply_delta(current.as_ref(), owner_id, delta, now);
        Self::write_ledger(conn, &next)?;
        Ok(next)
    }
}

impl ReviewStore for SqliteReviewStore {
    fn insert_item(&self, item: &MemoryItem, delta: &StatsDelta, now: DateTime<Utc>) -> RecallResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        Self::write_item(&tx, item)?;
        if !delta.is_empty() {
            self.apply_delta_in(&tx, &item.owner_id, delta, now)?;
        }
        tx.commit()?;
        debug!(item_id = %item.id, owner_id = %item.owner_id, "Inserted item");
        Ok(())
    }

    fn insert_concept(
        &self,
        concept: &Concept,
        phrasings: &[Phrasing],
        delta: &StatsDelta,
        now: DateTime<Utc>,
    ) -> RecallResult<()> {
        let active = phrasings.iter().filter(|p| p.is_active()).count() as u32;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        Self::write_item(&tx, &concept.item)?;
        tx.execute(
            r#"INSERT INTO concepts
               (id, title, phrasing_count, canonical_phrasing_id, thin_score, conflict_score)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                concept.id(),
                concept.title,
                active,
                concept.canonical_phrasing_id,
                concept.thin_score,
                concept.conflict_score,
            ],
        )?;
        for phrasing in phrasings {
            Self::write_phrasing(&tx, phrasing)?;
        }
        if !delta.is_empty() {
            self.apply_delta_in(&tx, &concept.item.owner_id, delta, now)?;
        }
        tx.commit()?;
        debug!(concept_id = %concept.id(), phrasings = phrasings.len(), "Inserted concept");
        Ok(())
    }

    fn insert_phrasing(&self, phrasing: &Phrasing) -> RecallResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let bump = if phrasing.is_active() { 1 } else { 0 };
        let updated = tx.execute(
            "UPDATE concepts SET phrasing_count = phrasing_count + ?2 WHERE id = ?1",
            params![phrasing.concept_id, bump],
        )?;
        if updated == 0 {
            return Err(RecallError::not_found(&phrasing.concept_id));
        }
        Self::write_phrasing(&tx, phrasing)?;
        tx.commit()?;
        Ok(())
    }

    fn get_item(&self, id: &str) -> RecallResult<Option<MemoryItem>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM items i WHERE i.id = ?1", ITEM_COLUMNS);
        Ok(self.query_items(&conn, &sql, params![id])?.into_iter().next())
    }

    fn get_items(&self, ids: &[String]) -> RecallResult<Vec<MemoryItem>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM items i WHERE i.id = ?1", ITEM_COLUMNS);
        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            items.extend(self.query_items(&conn, &sql, params![id])?);
        }
        Ok(items)
    }

    fn get_concept(&self, id: &str) -> RecallResult<Option<Concept>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"SELECT {}, c.title, c.phrasing_count, c.canonical_phrasing_id,
                      c.thin_score, c.conflict_score
               FROM items i JOIN concepts c ON c.id = i.id
               WHERE i.id = ?1"#,
            ITEM_COLUMNS
        ))?;

        let concept = stmt
            .query_row(params![id], |row| {
                Ok(Self::row_to_item(row).and_then(|item| {
                    Ok(Concept {
                        item,
                        title: row.get(ITEM_COLUMN_COUNT)?,
                        phrasing_count: row.get(ITEM_COLUMN_COUNT + 1)?,
                        canonical_phrasing_id: row.get(ITEM_COLUMN_COUNT + 2)?,
                        thin_score: row.get(ITEM_COLUMN_COUNT + 3)?,
                        conflict_score: row.get(ITEM_COLUMN_COUNT + 4)?,
                    })
                }))
            })
            .optional()?
            .transpose()?;

        if concept.is_some() {
            self.count_reads(1);
        }
        Ok(concept)
    }

    fn phrasings_for(&self, concept_id: &str) -> RecallResult<Vec<Phrasing>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM phrasings WHERE concept_id = ?1 ORDER BY creation_order",
            PHRASING_COLUMNS
        ))?;
        let phrasings = stmt
            .query_map(params![concept_id], |row| Ok(Self::row_to_phrasing(row)))?
            .map(|r| r.map_err(RecallError::from).and_then(|inner| inner))
            .collect::<RecallResult<Vec<_>>>()?;
        self.count_reads(phrasings.len());
        Ok(phrasings)
    }

    fn commit_review(&self, commit: &ReviewCommit) -> RecallResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let exists: Option<u32> = tx
            .query_row(
                "SELECT reps FROM items WHERE id = ?1 AND owner_id = ?2",
                params![commit.item_id, commit.owner_id],
                |row| row.get(0),
            )
            .optional()?;
        match exists {
            None => return Err(RecallError::not_found(&commit.item_id)),
            Some(reps) if reps != commit.expected_reps => {
                return Err(RecallError::conflict(&commit.item_id))
            }
            Some(_) => {}
        }

        tx.execute(
            r#"UPDATE items SET state_json = ?3, card_state = ?4, reps = ?5, next_review_at = ?6
               WHERE id = ?1 AND owner_id = ?2"#,
            params![
                commit.item_id,
                commit.owner_id,
                serde_json::to_string(&commit.state)?,
                commit.state.state.to_string(),
                commit.state.reps,
                commit.state.next_review_at.as_ref().map(ts),
            ],
        )?;

        Self::write_interaction(&tx, &commit.interaction)?;

        if let Some(phrasing) = &commit.phrasing {
            tx.execute(
                r#"UPDATE phrasings SET attempt_count = ?2, correct_count = ?3, last_attempted_at = ?4
                   WHERE id = ?1"#,
                params![
                    phrasing.id,
                    phrasing.attempt_count,
                    phrasing.correct_count,
                    phrasing.last_attempted_at.as_ref().map(ts),
                ],
            )?;
        }

        if !commit.delta.is_empty() {
            self.apply_delta_in(&tx, &commit.owner_id, &commit.delta, commit.now)?;
        }

        tx.commit()?;
        Ok(())
    }

    fn most_overdue(&self, owner_id: &str, now: DateTime<Utc>, limit: usize) -> RecallResult<Vec<MemoryItem>> {
        let conn = self.conn()?;
        let sql = format!(
            r#"SELECT {} FROM items i LEFT JOIN concepts c ON c.id = i.id
               WHERE i.owner_id = ?1 AND i.archived_at IS NULL AND i.deleted_at IS NULL
                 AND i.reps > 0 AND (i.next_review_at IS NULL OR i.next_review_at <= ?2)
                 AND (c.id IS NULL OR c.phrasing_count > 0)
               ORDER BY i.next_review_at ASC, i.id ASC
               LIMIT ?3"#,
            ITEM_COLUMNS
        );
        self.query_items(&conn, &sql, params![owner_id, ts(&now), limit as i64])
    }

    fn newest_unpracticed(&self, owner_id: &str, limit: usize) -> RecallResult<Vec<MemoryItem>> {
        let conn = self.conn()?;
        let sql = format!(
            r#"SELECT {} FROM items i LEFT JOIN concepts c ON c.id = i.id
               WHERE i.owner_id = ?1 AND i.archived_at IS NULL AND i.deleted_at IS NULL
                 AND i.reps = 0
                 AND (c.id IS NULL OR c.phrasing_count > 0)
               ORDER BY i.created_at DESC, i.id ASC
               LIMIT ?2"#,
            ITEM_COLUMNS
        );
        self.query_items(&conn, &sql, params![owner_id, limit as i64])
    }

    fn count_due(&self, owner_id: &str, now: DateTime<Utc>) -> RecallResult<u64> {
        let conn = self.conn()?;
        let due: i64 = conn.query_row(
            r#"SELECT COUNT(*) FROM items i LEFT JOIN concepts c ON c.id = i.id
               WHERE i.owner_id = ?1 AND i.archived_at IS NULL AND i.deleted_at IS NULL
                 AND (i.reps = 0 OR i.next_review_at IS NULL OR i.next_review_at <= ?2)
                 AND (c.id IS NULL OR c.phrasing_count > 0)"#,
            params![owner_id, ts(&now)],
            |row| row.get(0),
        )?;
        Ok(count(due))
    }

    fn paginate_items(&self, owner_id: &str, cursor: Option<String>, limit: usize) -> RecallResult<Page> {
        let limit = limit.max(1);
        let conn = self.conn()?;
        let sql = format!(
            r#"SELECT {} FROM items i
               WHERE i.owner_id = ?1 AND i.deleted_at IS NULL AND i.id > ?2
               ORDER BY i.id
               LIMIT ?3"#,
            ITEM_COLUMNS
        );
        let after = cursor.clone().unwrap_or_default();
        let items = self.query_items(&conn, &sql, params![owner_id, after, limit as i64])?;

        let is_done = items.len() < limit;
        let cursor = items.last().map(|i| i.id.clone()).or(cursor);
        Ok(Page {
            items,
            cursor,
            is_done,
        })
    }

    fn interactions_for(&self, subject_id: &str, limit: Option<usize>) -> RecallResult<Vec<Interaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"SELECT {} FROM interactions
               WHERE subject_id = ?1
               ORDER BY answered_at DESC, rowid DESC
               LIMIT ?2"#,
            INTERACTION_COLUMNS
        ))?;
        let limit = limit.map(|l| l as i64).unwrap_or(-1);

        let mut interactions = stmt
            .query_map(params![subject_id, limit], |row| {
                Ok(Self::row_to_interaction(row))
            })?
            .map(|r| r.map_err(RecallError::from).and_then(|inner| inner))
            .collect::<RecallResult<Vec<_>>>()?;
        self.count_reads(interactions.len());

        interactions.reverse();
        Ok(interactions)
    }

    fn get_ledger(&self, owner_id: &str) -> RecallResult<Option<StatsLedger>> {
        let conn = self.conn()?;
        self.read_ledger(&conn, owner_id)
    }

    fn apply_stats_delta(&self, owner_id: &str, delta: &StatsDelta, now: DateTime<Utc>) -> RecallResult<StatsLedger> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let ledger = self.apply_delta_in(&tx, owner_id, delta, now)?;
        tx.commit()?;
        Ok(ledger)
    }

    fn overwrite_ledger(&self, ledger: &StatsLedger) -> RecallResult<()> {
        let conn = self.conn()?;
        Self::write_ledger(&conn, ledger)
    }

    fn commit_bulk(
        &self,
        owner_id: &str,
        mutations: &[ItemMutation],
        delta: &StatsDelta,
        now: DateTime<Utc>,
    ) -> RecallResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        for mutation in mutations {
            let changed = match mutation {
                ItemMutation::SetArchived { item_id, at } => tx.execute(
                    "UPDATE items SET archived_at = ?3 WHERE id = ?1 AND owner_id = ?2",
                    params![item_id, owner_id, at.as_ref().map(ts)],
                )?,
                ItemMutation::SetDeleted { item_id, at } => tx.execute(
                    "UPDATE items SET deleted_at = ?3 WHERE id = ?1 AND owner_id = ?2",
                    params![item_id, owner_id, at.as_ref().map(ts)],
                )?,
                ItemMutation::Purge { item_id } => {
                    let removed = tx.execute(
                        "DELETE FROM items WHERE id = ?1 AND owner_id = ?2",
                        params![item_id, owner_id],
                    )?;
                    if removed > 0 {
                        tx.execute("DELETE FROM concepts WHERE id = ?1", params![item_id])?;
                        tx.execute("DELETE FROM phrasings WHERE concept_id = ?1", params![item_id])?;
                        tx.execute("DELETE FROM interactions WHERE subject_id = ?1", params![item_id])?;
                    }
                    removed
                }
            };

            // Dropping the transaction rolls back everything applied so far.
            if changed == 0 {
                return Err(RecallError::ownership(mutation.item_id(), owner_id));
            }
        }

        if !delta.is_empty() {
            self.apply_delta_in(&tx, owner_id, delta, now)?;
        }

        tx.commit()?;
        debug!(owner_id, mutations = mutations.len(), "Committed bulk update");
        Ok(())
    }

    fn sample_owners(&self, pivot: f64, limit: usize) -> RecallResult<Vec<String>> {
        let conn = self.conn()?;
        let pivot = if pivot.is_finite() { pivot.clamp(0.0, 1.0) } else { 0.0 };

        let mut owners: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT owner_id FROM stats_ledgers WHERE sample_key >= ?1 ORDER BY sample_key LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![pivot, limit as i64], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<_, _>>()?
        };

        let remaining = limit.saturating_sub(owners.len());
        if remaining > 0 {
            let mut stmt = conn.prepare(
                "SELECT owner_id FROM stats_ledgers WHERE sample_key < ?1 ORDER BY sample_key LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![pivot, remaining as i64], |row| row.get::<_, String>(0))?;
            for owner in rows {
                owners.push(owner?);
            }
        }

        self.count_reads(owners.len());
        Ok(owners)
    }
}
