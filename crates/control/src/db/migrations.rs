//! Baseline schema. Per spec §1, schema migration *machinery* is out of
//! scope — this is the data model from spec §3 expressed as `CREATE
//! TABLE IF NOT EXISTS`, applied once at startup rather than through a
//! migration framework.

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS tenants (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL,
    agent_quota INTEGER NOT NULL,
    workflow_quota INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS installation_keys (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL REFERENCES tenants(id),
    key_hash TEXT NOT NULL UNIQUE,
    usage_limit INTEGER NOT NULL,
    usage_count INTEGER NOT NULL,
    expires_at TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS agents (
    id TEXT NOT NULL,
    tenant_id TEXT NOT NULL REFERENCES tenants(id),
    hostname TEXT NOT NULL,
    os TEXT NOT NULL,
    arch TEXT NOT NULL,
    version TEXT NOT NULL,
    tags TEXT NOT NULL,
    last_seen_at TEXT NOT NULL,
    registered_at TEXT NOT NULL,
    PRIMARY KEY (id, tenant_id)
);

CREATE TABLE IF NOT EXISTS agent_tokens (
    id TEXT PRIMARY KEY,
    agent_id TEXT NOT NULL,
    tenant_id TEXT NOT NULL REFERENCES tenants(id),
    token_hash TEXT NOT NULL UNIQUE,
    expires_at TEXT NOT NULL,
    revoked_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_agent_tokens_agent ON agent_tokens(agent_id);

CREATE TABLE IF NOT EXISTS workflows (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL REFERENCES tenants(id),
    name TEXT NOT NULL,
    definition TEXT NOT NULL,
    version INTEGER NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS campaigns (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL REFERENCES tenants(id),
    workflow_id TEXT NOT NULL REFERENCES workflows(id),
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    target_selector TEXT NOT NULL,
    created_at TEXT NOT NULL,
    started_at TEXT,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS campaign_phases (
    id TEXT PRIMARY KEY,
    campaign_id TEXT NOT NULL REFERENCES campaigns(id),
    phase_order INTEGER NOT NULL,
    definition TEXT NOT NULL,
    target_count INTEGER NOT NULL,
    success_count INTEGER NOT NULL,
    failure_count INTEGER NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    UNIQUE (campaign_id, phase_order)
);

CREATE TABLE IF NOT EXISTS workflow_executions (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL REFERENCES tenants(id),
    workflow_id TEXT NOT NULL REFERENCES workflows(id),
    agent_id TEXT NOT NULL,
    campaign_id TEXT REFERENCES campaigns(id),
    phase_id TEXT REFERENCES campaign_phases(id),
    status TEXT NOT NULL,
    result TEXT,
    attempt_count INTEGER NOT NULL,
    started_at TEXT,
    completed_at TEXT
);

-- Invariant 2 (spec §8): at most one non-terminal execution per
-- (agent, workflow). Partial index, not an application-level claim
-- record, so the guarantee survives crash-restart.
CREATE UNIQUE INDEX IF NOT EXISTS idx_one_pending_execution_per_agent_workflow
    ON workflow_executions(agent_id, workflow_id)
    WHERE status IN ('pending', 'running');

-- Invariant 1 (spec §8): at most one execution row per (campaign, agent).
CREATE UNIQUE INDEX IF NOT EXISTS idx_one_execution_per_campaign_agent
    ON workflow_executions(campaign_id, agent_id)
    WHERE campaign_id IS NOT NULL;

CREATE INDEX IF NOT EXISTS idx_executions_campaign ON workflow_executions(campaign_id);

CREATE TABLE IF NOT EXISTS audit_events (
    id TEXT PRIMARY KEY,
    timestamp TEXT NOT NULL,
    tenant_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    action TEXT NOT NULL,
    outcome TEXT NOT NULL,
    actor TEXT NOT NULL,
    resource TEXT NOT NULL,
    metadata TEXT NOT NULL
);
"#;
