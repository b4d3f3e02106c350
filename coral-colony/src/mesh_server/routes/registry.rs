//! Registry write RPCs and the agent listing.

use crate::mesh_server::app_state::MeshState;
use crate::mesh_server::tls::PeerIdentity;
use crate::registry::{enrich_services, ServiceSpec};
use crate::shared::{HttpError, HttpResult};
use crate::wire::{
    v1::{Ack, AgentInfo, AgentList, AgentListRequest, HeartbeatRequest, ServiceListUpload,
        ServiceRecord},
    Proto,
};
use axum::{extract::State, http::StatusCode, Extension};
use coral_common::timestamp::Timestamp;
use tokio_util::sync::CancellationToken;

/// Heartbeat: refresh `last_seen` for the calling agent.
pub async fn heartbeat(
    State(state): State<MeshState>,
    identity: Option<Extension<PeerIdentity>>,
    Proto(request): Proto<HeartbeatRequest>,
) -> HttpResult<Proto<Ack>> {
    let agent_id = state.authenticate_agent(identity.as_deref()).await?;

    // An agent only heartbeats itself.
    if agent_id != request.agent_id {
        return Err(HttpError::new(
            StatusCode::UNAUTHORIZED,
            Some("heartbeat agent_id does not match client certificate"),
        ));
    }

    state.context.registry.heartbeat(&agent_id).await?;
    Ok(Proto(Ack {}))
}

/// Replace the calling agent's service catalog.
pub async fn upload_services(
    State(state): State<MeshState>,
    identity: Option<Extension<PeerIdentity>>,
    Proto(request): Proto<ServiceListUpload>,
) -> HttpResult<Proto<Ack>> {
    let agent_id = state.authenticate_agent(identity.as_deref()).await?;

    if agent_id != request.agent_id {
        return Err(HttpError::new(
            StatusCode::UNAUTHORIZED,
            Some("service upload agent_id does not match client certificate"),
        ));
    }

    let services = request
        .services
        .into_iter()
        .map(|record| ServiceSpec {
            id: record.id,
            name: record.name,
            app_id: record.app_id,
            version: record.version,
        })
        .collect();

    state
        .context
        .registry
        .upload_services(&agent_id, services)
        .await?;
    Ok(Proto(Ack {}))
}

/// Snapshot of every agent with derived health. With `enrich`, live
/// service catalogs are fetched under the per-agent budget first.
pub async fn list_agents(
    State(state): State<MeshState>,
    identity: Option<Extension<PeerIdentity>>,
    Proto(request): Proto<AgentListRequest>,
) -> HttpResult<Proto<AgentList>> {
    state.authenticate_agent(identity.as_deref()).await?;

    if request.enrich {
        let agents = state.context.registry.list_all();
        enrich_services(
            &state.context.registry,
            state.context.agent_client.clone(),
            agents,
            &CancellationToken::new(),
        )
        .await;
    }

    let now = Timestamp::now();
    let agents = state
        .context
        .registry
        .list_all()
        .into_iter()
        .map(|agent| {
            let health = match agent.health(now) {
                crate::registry::AgentHealth::Active => "active",
                crate::registry::AgentHealth::Degraded => "degraded",
                crate::registry::AgentHealth::Unhealthy => "unhealthy",
            };
            AgentInfo {
                agent_id: agent.agent_id,
                component_name: agent.component_name,
                mesh_ipv4: agent.mesh_ipv4,
                health: health.to_string(),
                last_seen_us: agent.last_seen.as_u64(),
                services: agent
                    .services
                    .into_iter()
                    .map(|service| ServiceRecord {
                        id: service.id,
                        name: service.name,
                        app_id: service.app_id,
                        version: service.version,
                    })
                    .collect(),
            }
        })
        .collect();

    Ok(Proto(AgentList { agents }))
}
