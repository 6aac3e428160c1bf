//! One live channel session: request/response frames plus, on the debug
//! channel, server-pushed log frames for an active subscription.

use botpod_protocol::{
    actions, write_frame, ActionRequest, ActionResponse, FrameReader, LogPush, PUSH_SEQ_ID,
};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::Result;
use crate::logbus::LogLine;

use super::handlers::handle_request;
use super::{ChannelContext, ChannelMode};

/// Serves one session until the peer disconnects. Malformed requests get a
/// structured error response and the session stays open.
pub async fn serve_session<R, W>(
    ctx: &ChannelContext,
    mode: ChannelMode,
    reader: R,
    mut writer: W,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    // Frame reads race against log pushes below; the reader must keep a
    // partially received frame across a cancelled branch.
    let mut frames = FrameReader::new(BufReader::new(reader));
    let mut log_rx: Option<broadcast::Receiver<LogLine>> = None;

    loop {
        tokio::select! {
            frame = frames.next_line() => {
                let Some(line) = frame? else {
                    return Ok(());
                };
                if line.is_empty() {
                    continue;
                }
                let response = match serde_json::from_str::<ActionRequest>(&line) {
                    Ok(request) => {
                        if mode == ChannelMode::Debug && request.action == actions::SUBSCRIBE_LOGS {
                            log_rx = Some(ctx.logbus.subscribe());
                            ActionResponse::success(request.seq_id, json!({"subscribed": true}))
                        } else {
                            handle_request(ctx, mode, request).await
                        }
                    }
                    Err(e) => {
                        let seq_id = salvage_seq_id(&line);
                        ActionResponse::error(seq_id, format!("malformed request: {e}"))
                    }
                };
                write_frame(&mut writer, &response).await?;
            }
            log_line = next_log(&mut log_rx), if log_rx.is_some() => {
                match log_line {
                    Some(log_line) => {
                        let push = ActionRequest::new(
                            PUSH_SEQ_ID,
                            actions::LOG,
                            serde_json::to_value(LogPush {
                                plugin_id: log_line.plugin_id,
                                line: log_line.line,
                            })?,
                        );
                        write_frame(&mut writer, &push).await?;
                    }
                    None => {
                        debug!(target: "botpod::control", "log bus closed; ending subscription");
                        log_rx = None;
                    }
                }
            }
        }
    }
}

/// Waits for the next log line, skipping over lagged gaps. Pends forever
/// when no subscription is active (the select guard keeps this branch
/// disabled in that case).
async fn next_log(log_rx: &mut Option<broadcast::Receiver<LogLine>>) -> Option<LogLine> {
    match log_rx {
        Some(rx) => loop {
            match rx.recv().await {
                Ok(line) => return Some(line),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        },
        None => std::future::pending().await,
    }
}

/// Pulls `seq_id` out of an otherwise-unusable request so the error
/// response still correlates, mirroring the wire default of `-1`.
fn salvage_seq_id(line: &str) -> i64 {
    serde_json::from_str::<Value>(line)
        .ok()
        .and_then(|value| value.get("seq_id").and_then(Value::as_i64))
        .unwrap_or(PUSH_SEQ_ID)
}

#[cfg(test)]
#[path = "../tests/session_tests.rs"]
mod tests;
