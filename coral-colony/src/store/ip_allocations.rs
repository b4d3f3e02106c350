//! Mesh IPv4 allocations, keyed by IP and unique per agent.
//!
//! The WireGuard collaborator reads these to re-create interfaces with
//! stable addresses after a restart.

use super::ColonyDb;
use crate::error::{Error, ErrorKind, Result};
use coral_common::timestamp::Timestamp;
use sqlx::Row;

/// One allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct IpAllocation {
    pub mesh_ipv4: String,
    pub agent_id: String,
    pub allocated_at: Timestamp,
}

fn row_to_allocation(row: &sqlx::sqlite::SqliteRow) -> Result<IpAllocation> {
    Ok(IpAllocation {
        mesh_ipv4: row.try_get("mesh_ipv4")?,
        agent_id: row.try_get("agent_id")?,
        allocated_at: Timestamp::from_micros(row.try_get::<i64, _>("allocated_at")? as u64),
    })
}

impl ColonyDb {
    /// Record an allocation. The same agent re-allocating its existing IP is
    /// a no-op; claiming a different agent's IP is a `Conflict`.
    pub async fn allocate_ip(&self, mesh_ipv4: &str, agent_id: &str) -> Result<()> {
        if let Some(existing) = self.ip_for_agent(agent_id).await? {
            if existing.mesh_ipv4 == mesh_ipv4 {
                return Ok(());
            }
        }

        let result = sqlx::query(
            "INSERT INTO ip_allocations (mesh_ipv4, agent_id, allocated_at)
             VALUES (?1, ?2, ?3)",
        )
        .bind(mesh_ipv4)
        .bind(agent_id)
        .bind(Timestamp::now().as_u64() as i64)
        .execute(self.pool())
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(Error::with_cause(
                ErrorKind::Conflict,
                format!("ip or agent already allocated: {mesh_ipv4} / {agent_id}"),
            )),
            Err(other) => Err(other.into()),
        }
    }

    /// The allocation held by one agent.
    pub async fn ip_for_agent(&self, agent_id: &str) -> Result<Option<IpAllocation>> {
        let row = sqlx::query(
            "SELECT mesh_ipv4, agent_id, allocated_at FROM ip_allocations WHERE agent_id = ?1",
        )
        .bind(agent_id)
        .fetch_optional(self.pool())
        .await?;

        row.as_ref().map(row_to_allocation).transpose()
    }

    /// Release one agent's allocation. Unknown agent is a no-op.
    pub async fn release_ip(&self, agent_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM ip_allocations WHERE agent_id = ?1")
            .bind(agent_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// All allocations, for interface reconstruction.
    pub async fn list_ip_allocations(&self) -> Result<Vec<IpAllocation>> {
        let rows =
            sqlx::query("SELECT mesh_ipv4, agent_id, allocated_at FROM ip_allocations")
                .fetch_all(self.pool())
                .await?;

        rows.iter().map(row_to_allocation).collect()
    }
}
