//! SQLite graph store

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use super::traits::{GraphStore, Scope, StoreError, StoreResult};
use super::{content_fingerprint, validate_edge};
use crate::graph::{Edge, EdgeKind, Node, NodeId, StandardKey};

/// SQLite-backed graph store.
///
/// Single database file, thread-safe via an internal mutex on the
/// connection. WAL mode keeps reads open during writes when several
/// processes share the file.
///
/// The graph fingerprint is memoized against a local write counter plus
/// `PRAGMA data_version`, which moves when another connection commits.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    revision: AtomicU64,
    graph_fingerprint: Mutex<Option<(u64, i64, u64)>>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            revision: AtomicU64::new(0),
            graph_fingerprint: Mutex::new(None),
        })
    }

    /// Create an in-memory store (useful for testing)
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            revision: AtomicU64::new(0),
            graph_fingerprint: Mutex::new(None),
        })
    }

    fn init_schema(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            r#"
            -- Nodes table. Kind is a JSON-encoded NodeKind; a section's
            -- standard lives in the two nullable columns.
            CREATE TABLE IF NOT EXISTS nodes (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                text TEXT,
                hyperlinks_json TEXT NOT NULL,
                standard_name TEXT,
                standard_version TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_nodes_standard
                ON nodes(standard_name, standard_version);

            -- Edges table. Identity is the (source, target, kind) triple.
            CREATE TABLE IF NOT EXISTS edges (
                source_id TEXT NOT NULL,
                target_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                confidence REAL NOT NULL,
                PRIMARY KEY (source_id, target_id, kind)
            );

            CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_id);
            CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id);

            -- WAL mode for concurrent reads during writes
            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    fn bump(&self) {
        self.revision.fetch_add(1, Ordering::SeqCst);
    }

    /// Serialize a node to database columns
    fn node_to_row(
        node: &Node,
    ) -> StoreResult<(
        String,
        String,
        String,
        Option<String>,
        String,
        Option<String>,
        Option<String>,
    )> {
        Ok((
            node.id.as_str().to_string(),
            serde_json::to_string(&node.kind)?,
            node.name.clone(),
            node.text.clone(),
            serde_json::to_string(&node.hyperlinks)?,
            node.standard.as_ref().map(|k| k.name.clone()),
            node.standard.as_ref().and_then(|k| k.version.clone()),
        ))
    }

    /// Deserialize a node from database columns
    fn row_to_node(
        id: String,
        kind_json: String,
        name: String,
        text: Option<String>,
        hyperlinks_json: String,
        standard_name: Option<String>,
        standard_version: Option<String>,
    ) -> StoreResult<Node> {
        Ok(Node {
            id: NodeId::from_string(id),
            kind: serde_json::from_str(&kind_json)?,
            name,
            text,
            hyperlinks: serde_json::from_str(&hyperlinks_json)?,
            standard: standard_name.map(|name| StandardKey {
                name,
                version: standard_version,
            }),
        })
    }

    fn row_to_edge(
        source_id: String,
        target_id: String,
        kind_json: String,
        confidence: f64,
    ) -> StoreResult<Edge> {
        Ok(Edge {
            source: NodeId::from_string(source_id),
            target: NodeId::from_string(target_id),
            kind: serde_json::from_str(&kind_json)?,
            confidence: confidence as f32,
        })
    }

    fn load_node(conn: &Connection, id: &str) -> StoreResult<Option<Node>> {
        let row: Option<(
            String,
            String,
            String,
            Option<String>,
            String,
            Option<String>,
            Option<String>,
        )> = conn
            .query_row(
                "SELECT id, kind, name, text, hyperlinks_json, standard_name, standard_version
                 FROM nodes WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((id, kind, name, text, hyperlinks, std_name, std_version)) => Ok(Some(
                Self::row_to_node(id, kind, name, text, hyperlinks, std_name, std_version)?,
            )),
            None => Ok(None),
        }
    }

    fn load_all_nodes(conn: &Connection) -> StoreResult<Vec<Node>> {
        let mut stmt = conn.prepare(
            "SELECT id, kind, name, text, hyperlinks_json, standard_name, standard_version
             FROM nodes ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut nodes = Vec::new();
        for row in rows {
            let (id, kind, name, text, hyperlinks, std_name, std_version) = row?;
            nodes.push(Self::row_to_node(
                id,
                kind,
                name,
                text,
                hyperlinks,
                std_name,
                std_version,
            )?);
        }
        Ok(nodes)
    }

    fn load_all_edges(conn: &Connection) -> StoreResult<Vec<Edge>> {
        let mut stmt = conn.prepare(
            "SELECT source_id, target_id, kind, confidence
             FROM edges ORDER BY source_id, kind, target_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
            ))
        })?;

        let mut edges = Vec::new();
        for row in rows {
            let (source, target, kind, confidence) = row?;
            edges.push(Self::row_to_edge(source, target, kind, confidence)?);
        }
        Ok(edges)
    }

    fn edges_incident_to(conn: &Connection, id: &str) -> StoreResult<Vec<Edge>> {
        let mut stmt = conn.prepare(
            "SELECT source_id, target_id, kind, confidence
             FROM edges WHERE source_id = ?1 OR target_id = ?1
             ORDER BY source_id, kind, target_id",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
            ))
        })?;

        let mut edges = Vec::new();
        for row in rows {
            let (source, target, kind, confidence) = row?;
            edges.push(Self::row_to_edge(source, target, kind, confidence)?);
        }
        Ok(edges)
    }

    fn sections_of(conn: &Connection, key: &StandardKey) -> StoreResult<Vec<Node>> {
        let mut stmt = conn.prepare(
            "SELECT id, kind, name, text, hyperlinks_json, standard_name, standard_version
             FROM nodes WHERE standard_name = ?1 AND standard_version IS ?2
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![key.name, key.version], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut nodes = Vec::new();
        for row in rows {
            let (id, kind, name, text, hyperlinks, std_name, std_version) = row?;
            nodes.push(Self::row_to_node(
                id,
                kind,
                name,
                text,
                hyperlinks,
                std_name,
                std_version,
            )?);
        }
        Ok(nodes)
    }
}

#[async_trait]
impl GraphStore for SqliteStore {
    async fn get_node(&self, id: &NodeId) -> StoreResult<Option<Node>> {
        let conn = self.conn.lock().unwrap();
        Self::load_node(&conn, id.as_str())
    }

    async fn get_edges(&self, id: &NodeId, kinds: Option<&[EdgeKind]>) -> StoreResult<Vec<Edge>> {
        let conn = self.conn.lock().unwrap();
        let edges = Self::edges_incident_to(&conn, id.as_str())?;
        Ok(match kinds {
            Some(kinds) => edges
                .into_iter()
                .filter(|e| kinds.contains(&e.kind))
                .collect(),
            None => edges,
        })
    }

    async fn get_standard_sections(&self, key: &StandardKey) -> StoreResult<Vec<Node>> {
        let conn = self.conn.lock().unwrap();
        Self::sections_of(&conn, key)
    }

    async fn list_standards(&self) -> StoreResult<Vec<StandardKey>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT standard_name, standard_version FROM nodes
             WHERE standard_name IS NOT NULL
             ORDER BY standard_name, standard_version",
        )?;
        let keys = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
            })?
            .map(|r| {
                r.map(|(name, version)| StandardKey { name, version })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    async fn all_nodes(&self) -> StoreResult<Vec<Node>> {
        let conn = self.conn.lock().unwrap();
        Self::load_all_nodes(&conn)
    }

    async fn all_edges(&self) -> StoreResult<Vec<Edge>> {
        let conn = self.conn.lock().unwrap();
        Self::load_all_edges(&conn)
    }

    async fn fingerprint(&self, scope: &Scope) -> StoreResult<u64> {
        let conn = self.conn.lock().unwrap();
        match scope {
            Scope::Graph => {
                let revision = self.revision.load(Ordering::SeqCst);
                let data_version: i64 =
                    conn.query_row("PRAGMA data_version", [], |row| row.get(0))?;
                {
                    let memo = self.graph_fingerprint.lock().unwrap();
                    if let Some((rev, dv, fp)) = *memo {
                        if rev == revision && dv == data_version {
                            return Ok(fp);
                        }
                    }
                }
                let nodes = Self::load_all_nodes(&conn)?;
                let edges = Self::load_all_edges(&conn)?;
                let fp = content_fingerprint(&nodes, &edges);
                *self.graph_fingerprint.lock().unwrap() = Some((revision, data_version, fp));
                Ok(fp)
            }
            Scope::Standard(key) => {
                let sections = Self::sections_of(&conn, key)?;
                let mut edges = Vec::new();
                let mut seen = HashSet::new();
                for section in &sections {
                    for edge in Self::edges_incident_to(&conn, section.id.as_str())? {
                        if seen.insert(edge.resource_id()) {
                            edges.push(edge);
                        }
                    }
                }
                Ok(content_fingerprint(&sections, &edges))
            }
            Scope::Node(id) => {
                let nodes: Vec<Node> = Self::load_node(&conn, id.as_str())?.into_iter().collect();
                let edges = Self::edges_incident_to(&conn, id.as_str())?;
                Ok(content_fingerprint(&nodes, &edges))
            }
        }
    }

    async fn upsert_node(&self, node: Node) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let (id, kind, name, text, hyperlinks, std_name, std_version) = Self::node_to_row(&node)?;
        conn.execute(
            r#"
            INSERT INTO nodes (id, kind, name, text, hyperlinks_json, standard_name, standard_version)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                name = excluded.name,
                text = excluded.text,
                hyperlinks_json = excluded.hyperlinks_json,
                standard_name = excluded.standard_name,
                standard_version = excluded.standard_version
            "#,
            params![id, kind, name, text, hyperlinks, std_name, std_version],
        )?;
        self.bump();
        Ok(())
    }

    async fn upsert_edge(&self, edge: Edge) -> StoreResult<()> {
        validate_edge(&edge)?;
        let conn = self.conn.lock().unwrap();

        for endpoint in [&edge.source, &edge.target] {
            let exists: bool = conn.query_row(
                "SELECT COUNT(*) > 0 FROM nodes WHERE id = ?1",
                params![endpoint.as_str()],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(StoreError::NodeNotFound(endpoint.to_string()));
            }
        }

        conn.execute(
            r#"
            INSERT INTO edges (source_id, target_id, kind, confidence)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(source_id, target_id, kind) DO UPDATE SET
                confidence = excluded.confidence
            "#,
            params![
                edge.source.as_str(),
                edge.target.as_str(),
                serde_json::to_string(&edge.kind)?,
                edge.confidence as f64,
            ],
        )?;
        self.bump();
        Ok(())
    }

    async fn delete_edge(
        &self,
        source: &NodeId,
        target: &NodeId,
        kind: EdgeKind,
    ) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "DELETE FROM edges WHERE source_id = ?1 AND target_id = ?2 AND kind = ?3",
            params![
                source.as_str(),
                target.as_str(),
                serde_json::to_string(&kind)?
            ],
        )?;
        if rows > 0 {
            self.bump();
        }
        Ok(rows > 0)
    }

    async fn delete_node(&self, id: &NodeId) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM edges WHERE source_id = ?1 OR target_id = ?1",
            params![id.as_str()],
        )?;
        let rows = conn.execute("DELETE FROM nodes WHERE id = ?1", params![id.as_str()])?;
        if rows > 0 {
            self.bump();
        }
        Ok(rows > 0)
    }

    async fn delete_standard(&self, key: &StandardKey) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();
        let sections = Self::sections_of(&conn, key)?;
        if sections.is_empty() {
            return Err(StoreError::StandardNotFound(key.to_string()));
        }
        for section in &sections {
            conn.execute(
                "DELETE FROM edges WHERE source_id = ?1 OR target_id = ?1",
                params![section.id.as_str()],
            )?;
            conn.execute(
                "DELETE FROM nodes WHERE id = ?1",
                params![section.id.as_str()],
            )?;
        }
        self.bump();
        Ok(sections.len())
    }
}
