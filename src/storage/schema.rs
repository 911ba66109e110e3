//! Database schema constants.
//!
//! SQL schema definitions for the PostgreSQL asset store. The waiting and
//! active tables are indexes over `generated_assets`: a row in
//! `waiting_generated_assets` makes an asset claimable, a row in
//! `active_generated_assets` marks it as scheduled or processing.

/// SQL schema for creating the source_assets table.
pub const CREATE_SOURCE_ASSETS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS source_assets (
    id VARCHAR(255) NOT NULL,
    id_type VARCHAR(64) NOT NULL,
    attributes JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (id, id_type)
)
"#;

/// SQL schema for creating the generated_assets table.
pub const CREATE_GENERATED_ASSETS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS generated_assets (
    id VARCHAR(64) PRIMARY KEY,
    source_id VARCHAR(255) NOT NULL,
    source_type VARCHAR(64) NOT NULL,
    template_id VARCHAR(64) NOT NULL,
    location TEXT NOT NULL,
    status VARCHAR(128) NOT NULL,
    attributes JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// SQL schema for creating the waiting_generated_assets table.
pub const CREATE_WAITING_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS waiting_generated_assets (
    id VARCHAR(64) PRIMARY KEY REFERENCES generated_assets(id) ON DELETE CASCADE,
    source_id VARCHAR(255) NOT NULL,
    dispatch_group VARCHAR(64) NOT NULL,
    enqueued_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// SQL schema for creating the active_generated_assets table.
pub const CREATE_ACTIVE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS active_generated_assets (
    id VARCHAR(64) PRIMARY KEY REFERENCES generated_assets(id) ON DELETE CASCADE,
    activated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// Index statements, one per migration step.
pub const CREATE_INDEXES: [&str; 3] = [
    "CREATE INDEX IF NOT EXISTS idx_generated_assets_source_id ON generated_assets(source_id)",
    "CREATE INDEX IF NOT EXISTS idx_generated_assets_status ON generated_assets(status)",
    "CREATE INDEX IF NOT EXISTS idx_waiting_group_enqueued ON waiting_generated_assets(dispatch_group, enqueued_at)",
];

/// Returns all schema creation statements in the correct order.
pub fn all_schema_statements() -> Vec<&'static str> {
    let mut statements = vec![
        CREATE_SOURCE_ASSETS_TABLE,
        CREATE_GENERATED_ASSETS_TABLE,
        CREATE_WAITING_TABLE,
        CREATE_ACTIVE_TABLE,
    ];
    statements.extend(CREATE_INDEXES);
    statements
}
