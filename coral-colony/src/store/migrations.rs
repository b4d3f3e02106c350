//! Schema setup for the analytical store.
//!
//! Statements are idempotent (`IF NOT EXISTS`) and run in order at every
//! open. Telemetry tables share the bucketed primary-key shape
//! `(bucket_time, agent_id, service_name, dimensions...)` that makes batch
//! upserts idempotent within a one-minute window.

use sqlx::SqlitePool;

const STATEMENTS: &[&str] = &[
    // === identity & admission ===
    "CREATE TABLE IF NOT EXISTS psks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        value_enc BLOB NOT NULL,
        status TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        grace_expires_at INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS certificates (
        serial TEXT PRIMARY KEY,
        agent_id TEXT NOT NULL,
        spiffe_id TEXT NOT NULL,
        issued_at INTEGER NOT NULL,
        not_before INTEGER NOT NULL,
        not_after INTEGER NOT NULL,
        status TEXT NOT NULL,
        revoked_at INTEGER,
        revocation_reason TEXT,
        revoked_by TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_certificates_agent
        ON certificates (agent_id, status)",
    "CREATE TABLE IF NOT EXISTS agents (
        agent_id TEXT PRIMARY KEY,
        component_name TEXT NOT NULL,
        mesh_ipv4 TEXT NOT NULL,
        mesh_ipv6 TEXT NOT NULL DEFAULT '',
        public_key TEXT NOT NULL,
        last_seen INTEGER NOT NULL,
        runtime_context TEXT NOT NULL DEFAULT '',
        labels TEXT NOT NULL DEFAULT '{}'
    )",
    "CREATE TABLE IF NOT EXISTS services (
        id TEXT NOT NULL,
        name TEXT NOT NULL,
        app_id TEXT NOT NULL DEFAULT '',
        version TEXT NOT NULL DEFAULT '',
        agent_id TEXT NOT NULL,
        registered_at INTEGER NOT NULL,
        status TEXT NOT NULL,
        last_seen_heartbeat INTEGER,
        PRIMARY KEY (name, agent_id)
    )",
    "CREATE TABLE IF NOT EXISTS ip_allocations (
        mesh_ipv4 TEXT PRIMARY KEY,
        agent_id TEXT NOT NULL UNIQUE,
        allocated_at INTEGER NOT NULL
    )",
    // === telemetry ===
    "CREATE TABLE IF NOT EXISTS http_metrics (
        bucket_time INTEGER NOT NULL,
        agent_id TEXT NOT NULL,
        service_name TEXT NOT NULL,
        method TEXT NOT NULL,
        path TEXT NOT NULL,
        status_code INTEGER NOT NULL,
        count INTEGER NOT NULL,
        duration_sum_ns REAL NOT NULL,
        histogram TEXT NOT NULL,
        PRIMARY KEY (bucket_time, agent_id, service_name, method, path, status_code)
    )",
    "CREATE INDEX IF NOT EXISTS idx_http_metrics_service_time
        ON http_metrics (service_name, bucket_time)",
    "CREATE TABLE IF NOT EXISTS grpc_metrics (
        bucket_time INTEGER NOT NULL,
        agent_id TEXT NOT NULL,
        service_name TEXT NOT NULL,
        rpc_method TEXT NOT NULL,
        status_code INTEGER NOT NULL,
        count INTEGER NOT NULL,
        duration_sum_ns REAL NOT NULL,
        histogram TEXT NOT NULL,
        PRIMARY KEY (bucket_time, agent_id, service_name, rpc_method, status_code)
    )",
    "CREATE INDEX IF NOT EXISTS idx_grpc_metrics_service_time
        ON grpc_metrics (service_name, bucket_time)",
    "CREATE TABLE IF NOT EXISTS sql_metrics (
        bucket_time INTEGER NOT NULL,
        agent_id TEXT NOT NULL,
        service_name TEXT NOT NULL,
        operation TEXT NOT NULL,
        table_name TEXT NOT NULL,
        count INTEGER NOT NULL,
        duration_sum_ns REAL NOT NULL,
        histogram TEXT NOT NULL,
        PRIMARY KEY (bucket_time, agent_id, service_name, operation, table_name)
    )",
    "CREATE INDEX IF NOT EXISTS idx_sql_metrics_service_time
        ON sql_metrics (service_name, bucket_time)",
    "CREATE TABLE IF NOT EXISTS trace_spans (
        bucket_time INTEGER NOT NULL,
        agent_id TEXT NOT NULL,
        service_name TEXT NOT NULL,
        trace_id TEXT NOT NULL,
        span_id TEXT NOT NULL,
        parent_span_id TEXT NOT NULL DEFAULT '',
        name TEXT NOT NULL,
        kind TEXT NOT NULL,
        timestamp_us INTEGER NOT NULL,
        duration_ns INTEGER NOT NULL,
        status TEXT NOT NULL,
        attributes TEXT NOT NULL DEFAULT '{}',
        PRIMARY KEY (bucket_time, agent_id, service_name, trace_id, span_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_trace_spans_service_time
        ON trace_spans (service_name, bucket_time)",
    "CREATE TABLE IF NOT EXISTS cpu_profiles (
        bucket_time INTEGER NOT NULL,
        agent_id TEXT NOT NULL,
        service_name TEXT NOT NULL,
        function_name TEXT NOT NULL,
        module_path TEXT NOT NULL DEFAULT '',
        self_samples INTEGER NOT NULL,
        total_samples INTEGER NOT NULL,
        PRIMARY KEY (bucket_time, agent_id, service_name, function_name)
    )",
    "CREATE TABLE IF NOT EXISTS system_metrics (
        bucket_time INTEGER NOT NULL,
        agent_id TEXT NOT NULL,
        metric_name TEXT NOT NULL,
        value REAL NOT NULL,
        unit TEXT NOT NULL DEFAULT '',
        PRIMARY KEY (bucket_time, agent_id, metric_name)
    )",
    "CREATE TABLE IF NOT EXISTS function_registry (
        agent_id TEXT NOT NULL,
        service_name TEXT NOT NULL,
        function_name TEXT NOT NULL,
        module_path TEXT NOT NULL DEFAULT '',
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (agent_id, service_name, function_name)
    )",
];

pub(super) async fn run(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
