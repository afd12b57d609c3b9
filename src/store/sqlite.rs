//! SQLite-backed store.
//!
//! Vector search is a full scan scored in Rust. Edge lookups push a coarse
//! prefilter into SQL (`json_tree` over the metadata column) and verify every
//! candidate with [`Edge::matches`], so SQL never decides membership alone.

use async_trait::async_trait;
use rusqlite::{params, params_from_iter, Connection, Row};

use super::{rank_and_truncate, StoreAdapter};
use crate::db::Db;
use crate::edges::{Edge, EdgeValue};
use crate::error::Result;
use crate::math::{cosine_similarity, encode_embedding, parse_embedding, rank_order};
use crate::node::{passes, Content, Metadata, MetadataFilter};

const SELECT_COLUMNS: &str = "SELECT node_id, content, metadata_json, embedding FROM nodes";

/// Store over the `nodes` table of a migrated database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Db,
}

type RawRow = (String, String, String, Option<Vec<u8>>);

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_content((id, content, metadata_json, blob): RawRow) -> Result<Content> {
    let metadata: Metadata = serde_json::from_str(&metadata_json)?;
    let embedding = match blob {
        Some(bytes) => {
            let parsed = parse_embedding(&bytes);
            if parsed.is_none() {
                log::warn!("Ignoring malformed embedding for node {}", id);
            }
            parsed
        }
        None => None,
    };
    Ok(Content {
        id,
        content,
        metadata,
        embedding,
        score: None,
    })
}

fn query_contents(conn: &Connection, sql: &str, args: Vec<rusqlite::types::Value>) -> Result<Vec<Content>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params_from_iter(args), read_row)?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    rows.into_iter().map(into_content).collect()
}

/// SQL candidate query for an edge: exact for ids, a superset for metadata.
fn edge_query(edge: &Edge) -> (String, Vec<rusqlite::types::Value>) {
    use rusqlite::types::Value as Sql;

    match edge {
        Edge::Id(id) => (format!("{} WHERE node_id = ?1", SELECT_COLUMNS), vec![Sql::Text(id.clone())]),
        // Dotted fields may name a literal key or a nested path; quotes would
        // need JSON path escaping. Both fall back to scanning.
        Edge::Metadata { field, .. } if field.contains('.') || field.contains('"') => {
            (SELECT_COLUMNS.to_string(), Vec::new())
        }
        Edge::Metadata { field, value } => {
            let atom = match value {
                EdgeValue::Bool(b) => Sql::Integer(i64::from(*b)),
                EdgeValue::Number(n) => match n.parse::<i64>() {
                    Ok(i) => Sql::Integer(i),
                    Err(_) => match n.parse::<f64>() {
                        Ok(f) => Sql::Real(f),
                        Err(_) => return (SELECT_COLUMNS.to_string(), Vec::new()),
                    },
                },
                EdgeValue::Text(s) => Sql::Text(s.clone()),
            };
            let sql = format!(
                "{} WHERE EXISTS (SELECT 1 FROM json_tree(nodes.metadata_json, ?1) t WHERE t.atom = ?2)",
                SELECT_COLUMNS
            );
            (sql, vec![Sql::Text(format!("$.\"{}\"", field)), atom])
        }
    }
}

impl SqliteStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Open (creating if needed) and migrate the database at `path`.
    pub async fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let db = Db::new(path);
        db.migrate().await?;
        Ok(Self::new(db))
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Insert or replace contents by id in a single transaction.
    pub async fn add_contents(&self, contents: Vec<Content>) -> Result<usize> {
        self.db
            .with_connection(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT OR REPLACE INTO nodes (node_id, content, metadata_json, embedding, updated_at)
                         VALUES (?1, ?2, ?3, ?4, CURRENT_TIMESTAMP)",
                    )?;
                    for content in &contents {
                        let metadata_json = serde_json::to_string(&content.metadata)?;
                        let blob = content.embedding.as_deref().map(encode_embedding);
                        stmt.execute(params![content.id, content.content, metadata_json, blob])?;
                    }
                }
                tx.commit()?;
                Ok(contents.len())
            })
            .await
    }

    pub async fn count(&self) -> Result<usize> {
        self.db
            .with_connection(|conn| {
                let n: i64 = conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?;
                Ok(n as usize)
            })
            .await
    }
}

#[async_trait]
impl StoreAdapter for SqliteStore {
    async fn search_similar(
        &self,
        query_embedding: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Content>> {
        let start = std::time::Instant::now();
        let candidates = self
            .db
            .with_connection(|conn| {
                query_contents(
                    conn,
                    &format!("{} WHERE embedding IS NOT NULL", SELECT_COLUMNS),
                    Vec::new(),
                )
            })
            .await?;
        let scanned = candidates.len();

        let mut scored: Vec<Content> = candidates
            .into_iter()
            .filter(|c| passes(filter, &c.metadata))
            .filter_map(|mut c| {
                let score = cosine_similarity(query_embedding, c.embedding.as_deref()?);
                c.score = Some(score);
                Some(c)
            })
            .collect();
        scored.sort_by(|a, b| {
            rank_order(
                a.score.unwrap_or(0.0),
                &a.id,
                b.score.unwrap_or(0.0),
                &b.id,
            )
        });
        scored.truncate(k);

        log::debug!("Vector scan over {} rows took {:?}", scanned, start.elapsed());
        Ok(scored)
    }

    async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<Content>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let args: Vec<rusqlite::types::Value> =
            ids.iter().cloned().map(rusqlite::types::Value::Text).collect();
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("{} WHERE node_id IN ({})", SELECT_COLUMNS, placeholders);

        let mut found = self
            .db
            .with_connection(move |conn| query_contents(conn, &sql, args))
            .await?;

        let mut ordered = Vec::with_capacity(found.len());
        for id in ids {
            if let Some(pos) = found.iter().position(|c| &c.id == id) {
                ordered.push(found.swap_remove(pos));
            }
        }
        Ok(ordered)
    }

    async fn search_edge(
        &self,
        edge: &Edge,
        query_embedding: Option<&[f32]>,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Content>> {
        let (sql, args) = edge_query(edge);
        let candidates = self
            .db
            .with_connection(move |conn| query_contents(conn, &sql, args))
            .await?;

        let matches: Vec<Content> = candidates
            .into_iter()
            .filter(|c| edge.matches(c) && passes(filter, &c.metadata))
            .collect();
        Ok(rank_and_truncate(matches, query_embedding, k))
    }
}
