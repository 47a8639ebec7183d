//! Database schema definitions.

/// SQLite schema for the broker.
///
/// History tables are append-only; rows are only removed by a
/// full-entity delete.
pub const SQLITE_SCHEMA: &str = r"
-- Task metadata, one row per task
CREATE TABLE IF NOT EXISTS task_metadata (
    task_id TEXT PRIMARY KEY,
    status TEXT NOT NULL DEFAULT 'pending',
    progress INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT,
    failed_at TEXT,
    canceled_at TEXT,
    metadata TEXT NOT NULL DEFAULT '{}'
);

-- Task history, append-only, ordered by rowid
CREATE TABLE IF NOT EXISTS task_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    message TEXT NOT NULL,
    progress INTEGER,
    timestamp TEXT NOT NULL,
    metadata TEXT
);
CREATE INDEX IF NOT EXISTS idx_task_history_task ON task_history(task_id, id);

-- Workflow metadata, one row per workflow
CREATE TABLE IF NOT EXISTS workflow_metadata (
    workflow_id TEXT PRIMARY KEY,
    status TEXT NOT NULL DEFAULT 'pending',
    overall_progress INTEGER NOT NULL DEFAULT 0,
    expected_phase_count INTEGER NOT NULL DEFAULT 0,
    completed_phase_count INTEGER NOT NULL DEFAULT 0,
    active_phase_key TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT,
    failed_at TEXT,
    canceled_at TEXT,
    metadata TEXT NOT NULL DEFAULT '{}'
);

-- Workflow phases, unique per (workflow, key), insertion order preserved
CREATE TABLE IF NOT EXISTS workflow_phase (
    workflow_id TEXT NOT NULL,
    phase_key TEXT NOT NULL,
    label TEXT NOT NULL,
    weight REAL NOT NULL DEFAULT 1.0,
    status TEXT NOT NULL DEFAULT 'pending',
    progress INTEGER NOT NULL DEFAULT 0,
    started_at TEXT,
    updated_at TEXT,
    completed_at TEXT,
    phase_order INTEGER NOT NULL,
    PRIMARY KEY (workflow_id, phase_key)
);
CREATE INDEX IF NOT EXISTS idx_workflow_phase_order ON workflow_phase(workflow_id, phase_order);

-- Workflow history, append-only
CREATE TABLE IF NOT EXISTS workflow_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    workflow_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    message TEXT NOT NULL,
    phase_key TEXT,
    progress INTEGER,
    timestamp TEXT NOT NULL,
    metadata TEXT
);
CREATE INDEX IF NOT EXISTS idx_workflow_history_workflow ON workflow_history(workflow_id, id);

-- Idempotency rows, shared across all write endpoints
CREATE TABLE IF NOT EXISTS idempotency_keys (
    key TEXT PRIMARY KEY,
    endpoint TEXT NOT NULL,
    request_hash TEXT,
    response TEXT NOT NULL,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_idempotency_expires ON idempotency_keys(expires_at);

-- Registries, one table per entity kind
CREATE TABLE IF NOT EXISTS task_registry (
    id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    created_by TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS workflow_registry (
    id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    created_by TEXT NOT NULL
);
";
