//! Action dispatch shared by the control and debug channels.

use std::path::Path;

use botpod_protocol::{
    actions, ActionRequest, ActionResponse, EmitEventParams, InstallPluginParams,
    ReloadPluginParams, UninstallPluginParams,
};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{Error, Result};

use super::{ChannelContext, ChannelMode};

pub(crate) async fn handle_request(
    ctx: &ChannelContext,
    mode: ChannelMode,
    request: ActionRequest,
) -> ActionResponse {
    let seq_id = request.seq_id;
    debug!(
        target: "botpod::control",
        seq_id,
        action = %request.action,
        "handling request"
    );
    match dispatch_action(ctx, mode, &request.action, request.data).await {
        Ok(data) => ActionResponse::success(seq_id, data),
        Err(e) => ActionResponse::error(seq_id, e.to_string()),
    }
}

async fn dispatch_action(
    ctx: &ChannelContext,
    mode: ChannelMode,
    action: &str,
    data: Value,
) -> Result<Value> {
    match action {
        actions::PING => Ok(json!({"message": "pong"})),

        actions::LIST_PLUGINS => {
            let plugins = ctx.registry.briefs().await;
            Ok(json!({"plugins": plugins}))
        }

        actions::EMIT_EVENT => {
            let params: EmitEventParams = parse_params(data)?;
            let result = ctx.dispatcher.emit_event(params).await;
            Ok(serde_json::to_value(result)?)
        }

        actions::INSTALL_PLUGIN => {
            let params: InstallPluginParams = parse_params(data)?;
            let record = ctx
                .registry
                .install(&ctx.deps, Path::new(&params.path))
                .await?;
            Ok(json!({"plugin": record.brief()}))
        }

        actions::UNINSTALL_PLUGIN => {
            let params: UninstallPluginParams = parse_params(data)?;
            ctx.supervisor.stop(&params.id).await?;
            ctx.registry.remove_and_delete(&params.id).await?;
            Ok(json!({"removed": params.id}))
        }

        actions::RELOAD_PLUGIN if mode == ChannelMode::Debug => {
            let params: ReloadPluginParams = parse_params(data)?;
            ctx.supervisor.reload(&params.id).await?;
            Ok(json!({"reloaded": params.id}))
        }

        _ => Err(Error::unsupported(format!("unknown action `{action}`"))),
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(data: Value) -> Result<T> {
    serde_json::from_value(data)
        .map_err(|e| Error::invalid_input(format!("malformed request data: {e}")))
}
