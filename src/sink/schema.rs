//! SQLite schema for the database sink, as ordered migrations.

/// One forward-only schema step.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

/// Every migration, oldest first. Applied steps must never be edited; add a
/// new version instead.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_leads",
        sql: r#"
CREATE TABLE IF NOT EXISTS leads (
    id TEXT PRIMARY KEY,
    identifier TEXT NOT NULL,
    address TEXT NOT NULL,
    category TEXT NOT NULL,
    source_id TEXT NOT NULL,
    acquired_at TEXT NOT NULL,
    confidence REAL NOT NULL,
    predictive_score REAL,
    priority TEXT,
    enrichment TEXT NOT NULL,
    fields TEXT NOT NULL,
    verdict_id TEXT NOT NULL,
    record_id TEXT NOT NULL,
    stored_at TEXT NOT NULL
)
"#,
    },
    Migration {
        version: 2,
        name: "create_quarantine",
        sql: r#"
CREATE TABLE IF NOT EXISTS quarantine (
    verdict_id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL,
    record_id TEXT NOT NULL,
    retryable INTEGER NOT NULL,
    entry TEXT NOT NULL,
    quarantined_at TEXT NOT NULL
)
"#,
    },
    Migration {
        version: 3,
        name: "index_leads_identifier",
        sql: "CREATE UNIQUE INDEX IF NOT EXISTS idx_leads_identifier ON leads(identifier)",
    },
    Migration {
        version: 4,
        name: "index_leads_category",
        sql: "CREATE INDEX IF NOT EXISTS idx_leads_category ON leads(category)",
    },
    Migration {
        version: 5,
        name: "index_quarantine_run",
        sql: "CREATE INDEX IF NOT EXISTS idx_quarantine_run_id ON quarantine(run_id)",
    },
];
