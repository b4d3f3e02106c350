//! Registered services, keyed by `(name, agent_id)`.

use super::ColonyDb;
use crate::error::Result;
use coral_common::timestamp::Timestamp;
use sqlx::Row;

/// Registered-service health as reported through heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Active,
    Unhealthy,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Active => "active",
            ServiceStatus::Unhealthy => "unhealthy",
        }
    }
}

/// One explicitly registered service instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRow {
    pub id: String,
    pub name: String,
    pub app_id: String,
    pub version: String,
    pub agent_id: String,
    pub registered_at: Timestamp,
    pub status: ServiceStatus,
    pub last_seen_heartbeat: Option<Timestamp>,
}

fn row_to_service(row: &sqlx::sqlite::SqliteRow) -> Result<ServiceRow> {
    let status: String = row.try_get("status")?;
    Ok(ServiceRow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        app_id: row.try_get("app_id")?,
        version: row.try_get("version")?,
        agent_id: row.try_get("agent_id")?,
        registered_at: Timestamp::from_micros(row.try_get::<i64, _>("registered_at")? as u64),
        status: if status == "unhealthy" {
            ServiceStatus::Unhealthy
        } else {
            ServiceStatus::Active
        },
        last_seen_heartbeat: row
            .try_get::<Option<i64>, _>("last_seen_heartbeat")?
            .map(|v| Timestamp::from_micros(v as u64)),
    })
}

impl ColonyDb {
    /// Replace the full service set of one agent atomically.
    pub async fn replace_agent_services(
        &self,
        agent_id: &str,
        services: &[ServiceRow],
    ) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM services WHERE agent_id = ?1")
            .bind(agent_id)
            .execute(&mut *tx)
            .await?;

        for service in services {
            sqlx::query(
                "INSERT INTO services
                   (id, name, app_id, version, agent_id, registered_at, status,
                    last_seen_heartbeat)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )
            .bind(&service.id)
            .bind(&service.name)
            .bind(&service.app_id)
            .bind(&service.version)
            .bind(agent_id)
            .bind(service.registered_at.as_u64() as i64)
            .bind(service.status.as_str())
            .bind(service.last_seen_heartbeat.map(|v| v.as_u64() as i64))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Every registered service across all agents.
    pub async fn registered_services(&self) -> Result<Vec<ServiceRow>> {
        let rows = sqlx::query(
            "SELECT id, name, app_id, version, agent_id, registered_at, status,
                    last_seen_heartbeat
             FROM services",
        )
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(row_to_service).collect()
    }

    /// Registered services of one agent.
    pub async fn services_for_agent(&self, agent_id: &str) -> Result<Vec<ServiceRow>> {
        let rows = sqlx::query(
            "SELECT id, name, app_id, version, agent_id, registered_at, status,
                    last_seen_heartbeat
             FROM services WHERE agent_id = ?1",
        )
        .bind(agent_id)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(row_to_service).collect()
    }

    /// Stamp a heartbeat on every service of one agent.
    pub async fn touch_service_heartbeats(
        &self,
        agent_id: &str,
        at: Timestamp,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE services SET last_seen_heartbeat = ?2, status = 'active'
             WHERE agent_id = ?1",
        )
        .bind(agent_id)
        .bind(at.as_u64() as i64)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn sample_service(name: &str, agent_id: &str) -> ServiceRow {
    ServiceRow {
        id: format!("svc-{name}"),
        name: name.to_string(),
        app_id: "shop".to_string(),
        version: "1.2.3".to_string(),
        agent_id: agent_id.to_string(),
        registered_at: Timestamp::now(),
        status: ServiceStatus::Active,
        last_seen_heartbeat: None,
    }
}
