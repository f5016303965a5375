//! Neo4j schema initialization for document nodes.

use docgraph_core::SyncSettings;
use tracing::info;

use crate::client::GraphSession;
use crate::error::GraphResult;
use crate::statement::{Statement, quoted};

/// Uniqueness constraint on the document key. Every sync statement merges on it.
pub fn schema_statements(settings: &SyncSettings) -> Vec<Statement> {
    let constraint = format!(
        "docgraph_{}_{}",
        settings.node_label.to_lowercase(),
        settings.key_property.to_lowercase()
    );
    vec![Statement::new(
        "schema",
        format!(
            "CREATE CONSTRAINT {} IF NOT EXISTS FOR (n:{}) REQUIRE n.{} IS UNIQUE",
            quoted(&constraint),
            quoted(&settings.node_label),
            quoted(&settings.key_property)
        ),
    )]
}

/// Initialize the schema. Safe to run multiple times.
pub async fn initialize_schema(session: &dyn GraphSession, settings: &SyncSettings) -> GraphResult<()> {
    let statements = schema_statements(settings);
    let count = statements.len();
    for statement in statements {
        session.run(statement).await?;
    }
    info!(label = %settings.node_label, key = %settings.key_property, "Neo4j schema initialized ({} statements)", count);
    Ok(())
}
