//! Tool invocation RPC.

use crate::mesh_server::app_state::MeshState;
use crate::mesh_server::tls::PeerIdentity;
use crate::query::{with_deadline, DEFAULT_QUERY_DEADLINE};
use crate::shared::HttpResult;
use crate::wire::{
    v1::{ToolRequest, ToolResponse},
    Proto,
};
use axum::{extract::State, Extension};

pub async fn invoke_tool(
    State(state): State<MeshState>,
    identity: Option<Extension<PeerIdentity>>,
    Proto(request): Proto<ToolRequest>,
) -> HttpResult<Proto<ToolResponse>> {
    state.authenticate_agent(identity.as_deref()).await?;

    let text = with_deadline(
        DEFAULT_QUERY_DEADLINE,
        state.context.tools.invoke(&request.name, &request.args_json),
    )
    .await?;

    Ok(Proto(ToolResponse { text }))
}
