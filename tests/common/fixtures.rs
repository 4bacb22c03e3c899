//! Catalog fixtures for integration tests
//!
//! Builds small but realistic standards graphs: a handful of CREs
//! linking sections of ASVS, CWE and NIST 800-53 the way curated
//! OpenCRE-style data does.

use std::sync::Arc;

use crosswalk::{
    CrosswalkEngine, Edge, EdgeKind, EngineConfig, GraphStore, MemoryStore, Node, StandardKey,
};

pub fn asvs() -> StandardKey {
    StandardKey::new("ASVS").with_version("4.0")
}

pub fn cwe() -> StandardKey {
    StandardKey::new("CWE")
}

pub fn nist() -> StandardKey {
    StandardKey::new("NIST-800-53").with_version("r5")
}

/// An in-memory catalog under construction
pub struct CatalogFixture {
    pub store: Arc<MemoryStore>,
}

impl CatalogFixture {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
        }
    }

    pub async fn add_cre(&self, id: &str, name: &str) -> &Self {
        self.store.upsert_node(Node::cre(id, name)).await.unwrap();
        self
    }

    pub async fn add_section(&self, id: &str, name: &str, standard: StandardKey) -> &Self {
        self.store
            .upsert_node(Node::section(id, name, standard))
            .await
            .unwrap();
        self
    }

    pub async fn link(&self, cre: &str, section: &str, confidence: f32) -> &Self {
        self.store
            .upsert_edge(Edge::new(cre, section, EdgeKind::LinksTo).with_confidence(confidence))
            .await
            .unwrap();
        self
    }

    pub async fn relate(&self, a: &str, b: &str, kind: EdgeKind, confidence: f32) -> &Self {
        self.store
            .upsert_edge(Edge::new(a, b, kind).with_confidence(confidence))
            .await
            .unwrap();
        self
    }

    pub fn engine(&self) -> CrosswalkEngine {
        CrosswalkEngine::new(self.store.clone())
    }

    pub fn engine_with(&self, config: EngineConfig) -> CrosswalkEngine {
        CrosswalkEngine::with_config(self.store.clone(), config)
    }

    /// Three standards crosslinked through four CREs:
    ///
    /// - authentication: ASVS V2.1.1 and CWE 521 share CRE 170-772,
    ///   which NIST IA-5 also links to
    /// - session management: ASVS V3.3.1 and CWE 613 share CRE 064-306
    /// - logging: CRE 552-026 contains CRE 064-306 and links NIST AU-2;
    ///   ASVS V7.1.1 hangs off CRE 552-026
    /// - CWE 778 is only reachable over a low-confidence edge
    pub async fn canned() -> Self {
        let fixture = Self::new();
        fixture
            .add_cre("CRE:170-772", "Password strength requirements")
            .await
            .add_cre("CRE:064-306", "Session termination")
            .await
            .add_cre("CRE:552-026", "Security logging")
            .await
            .add_cre("CRE:486-813", "Audit trail completeness")
            .await;

        fixture
            .add_section("ASVS@4.0:V2.1.1", "V2.1.1", asvs())
            .await
            .add_section("ASVS@4.0:V3.3.1", "V3.3.1", asvs())
            .await
            .add_section("ASVS@4.0:V7.1.1", "V7.1.1", asvs())
            .await
            .add_section("CWE:521", "CWE-521", cwe())
            .await
            .add_section("CWE:613", "CWE-613", cwe())
            .await
            .add_section("CWE:778", "CWE-778", cwe())
            .await
            .add_section("NIST-800-53@r5:IA-5", "IA-5", nist())
            .await
            .add_section("NIST-800-53@r5:AU-2", "AU-2", nist())
            .await;

        fixture
            .link("CRE:170-772", "ASVS@4.0:V2.1.1", 1.0)
            .await
            .link("CRE:170-772", "CWE:521", 0.9)
            .await
            .link("CRE:170-772", "NIST-800-53@r5:IA-5", 0.85)
            .await
            .link("CRE:064-306", "ASVS@4.0:V3.3.1", 1.0)
            .await
            .link("CRE:064-306", "CWE:613", 1.0)
            .await
            .link("CRE:552-026", "ASVS@4.0:V7.1.1", 1.0)
            .await
            .link("CRE:552-026", "NIST-800-53@r5:AU-2", 0.95)
            .await
            .relate("CRE:552-026", "CRE:064-306", EdgeKind::Contains, 1.0)
            .await
            .relate("CRE:486-813", "CRE:552-026", EdgeKind::Related, 0.9)
            .await
            // Below the default traversal floor of 0.5
            .link("CRE:486-813", "CWE:778", 0.3)
            .await;

        fixture
    }
}

impl Default for CatalogFixture {
    fn default() -> Self {
        Self::new()
    }
}
