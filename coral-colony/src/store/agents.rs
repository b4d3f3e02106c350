//! Persisted agent rows backing the in-memory registry.
//!
//! The registry is the source of truth while the colony runs; these rows
//! exist so a restart reloads known agents instead of waiting for
//! re-enrollment.

use super::ColonyDb;
use crate::error::Result;
use coral_common::timestamp::Timestamp;
use sqlx::Row;
use std::collections::HashMap;

/// One persisted agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRow {
    pub agent_id: String,
    pub component_name: String,
    pub mesh_ipv4: String,
    pub mesh_ipv6: String,
    pub public_key: String,
    pub last_seen: Timestamp,
    pub runtime_context: String,
    pub labels: HashMap<String, String>,
}

fn row_to_agent(row: &sqlx::sqlite::SqliteRow) -> Result<AgentRow> {
    let labels: String = row.try_get("labels")?;
    Ok(AgentRow {
        agent_id: row.try_get("agent_id")?,
        component_name: row.try_get("component_name")?,
        mesh_ipv4: row.try_get("mesh_ipv4")?,
        mesh_ipv6: row.try_get("mesh_ipv6")?,
        public_key: row.try_get("public_key")?,
        last_seen: Timestamp::from_micros(row.try_get::<i64, _>("last_seen")? as u64),
        runtime_context: row.try_get("runtime_context")?,
        labels: serde_json::from_str(&labels).unwrap_or_default(),
    })
}

impl ColonyDb {
    /// Upsert one agent row.
    pub async fn upsert_agent(&self, agent: &AgentRow) -> Result<()> {
        let labels = serde_json::to_string(&agent.labels)
            .unwrap_or_else(|_| "{}".to_string());

        sqlx::query(
            "INSERT INTO agents
               (agent_id, component_name, mesh_ipv4, mesh_ipv6, public_key,
                last_seen, runtime_context, labels)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (agent_id) DO UPDATE SET
               component_name = excluded.component_name,
               mesh_ipv4 = excluded.mesh_ipv4,
               mesh_ipv6 = excluded.mesh_ipv6,
               public_key = excluded.public_key,
               last_seen = excluded.last_seen,
               runtime_context = excluded.runtime_context,
               labels = excluded.labels",
        )
        .bind(&agent.agent_id)
        .bind(&agent.component_name)
        .bind(&agent.mesh_ipv4)
        .bind(&agent.mesh_ipv6)
        .bind(&agent.public_key)
        .bind(agent.last_seen.as_u64() as i64)
        .bind(&agent.runtime_context)
        .bind(labels)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Load every persisted agent.
    pub async fn load_agents(&self) -> Result<Vec<AgentRow>> {
        let rows = sqlx::query(
            "SELECT agent_id, component_name, mesh_ipv4, mesh_ipv6, public_key,
                    last_seen, runtime_context, labels
             FROM agents",
        )
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(row_to_agent).collect()
    }

    /// Persist a heartbeat-updated `last_seen` for one agent.
    pub async fn persist_agent_last_seen(
        &self,
        agent_id: &str,
        last_seen: Timestamp,
    ) -> Result<()> {
        sqlx::query("UPDATE agents SET last_seen = ?2 WHERE agent_id = ?1")
            .bind(agent_id)
            .bind(last_seen.as_u64() as i64)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Remove one agent and its registered services.
    pub async fn delete_agent(&self, agent_id: &str) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM services WHERE agent_id = ?1")
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM agents WHERE agent_id = ?1")
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn sample_agent(agent_id: &str) -> AgentRow {
    AgentRow {
        agent_id: agent_id.to_string(),
        component_name: "checkout".to_string(),
        mesh_ipv4: "10.82.0.2".to_string(),
        mesh_ipv6: String::new(),
        public_key: "pk-base64".to_string(),
        last_seen: Timestamp::now(),
        runtime_context: "docker".to_string(),
        labels: HashMap::from([("env".to_string(), "prod".to_string())]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_and_reload_roundtrip() {
        let db = ColonyDb::test().await;
        let agent = sample_agent("agent-1");

        db.upsert_agent(&agent).await.unwrap();
        let loaded = db.load_agents().await.unwrap();
        assert_eq!(loaded, vec![agent.clone()]);

        // Upserting again with a new key replaces, not duplicates.
        let mut rekeyed = agent;
        rekeyed.public_key = "pk-new".to_string();
        db.upsert_agent(&rekeyed).await.unwrap();

        let loaded = db.load_agents().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].public_key, "pk-new");
    }

    #[tokio::test]
    async fn delete_removes_agent_and_services() {
        let db = ColonyDb::test().await;
        db.upsert_agent(&sample_agent("agent-1")).await.unwrap();
        db.replace_agent_services(
            "agent-1",
            &[crate::store::services::sample_service("checkout", "agent-1")],
        )
        .await
        .unwrap();

        db.delete_agent("agent-1").await.unwrap();
        assert!(db.load_agents().await.unwrap().is_empty());
        assert!(db.registered_services().await.unwrap().is_empty());
    }
}
