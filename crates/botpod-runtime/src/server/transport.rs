//! Transport bindings for channel sessions: the parent-process stdio pipe
//! and the TCP listener used by the control and debug channels.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use botpod_protocol::{write_frame, ActionResponse, PUSH_SEQ_ID};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::error::{Error, Result};

use super::session::serve_session;
use super::{ChannelContext, ChannelMode};

/// Serves a single control session over this process's stdin/stdout.
/// Returns once the peer closes the stream.
pub async fn serve_stdio_control(ctx: &ChannelContext) -> Result<()> {
    info!(target: "botpod::control", "serving control channel on stdio");
    serve_session(ctx, ChannelMode::Control, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Accept loop for a TCP channel. Only one session is served at a time;
/// extra connections are refused with an error frame and closed.
pub async fn serve_tcp(ctx: ChannelContext, mode: ChannelMode, bind: &str) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|e| Error::operation("bind", format!("{bind}: {e}")))?;
    let local = listener
        .local_addr()
        .map_err(|e| Error::operation("bind", format!("resolve local address: {e}")))?;
    info!(target: "botpod::control", addr = %local, ?mode, "listening");

    let busy = Arc::new(AtomicBool::new(false));
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(target: "botpod::control", error = %e, "accept failed");
                continue;
            }
        };

        if busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(target: "botpod::control", peer = %peer, "refusing connection: session already active");
            let (_, mut writer) = stream.into_split();
            let refusal =
                ActionResponse::error(PUSH_SEQ_ID, "another control session is active".to_string());
            if let Err(e) = write_frame(&mut writer, &refusal).await {
                warn!(target: "botpod::control", peer = %peer, error = %e, "failed to send refusal");
            }
            continue;
        }

        info!(target: "botpod::control", peer = %peer, ?mode, "session opened");
        let ctx = ctx.clone();
        let busy = Arc::clone(&busy);
        tokio::spawn(async move {
            let (reader, writer) = stream.into_split();
            match serve_session(&ctx, mode, reader, writer).await {
                Ok(()) => info!(target: "botpod::control", peer = %peer, "session closed"),
                Err(e) => {
                    warn!(target: "botpod::control", peer = %peer, error = %e, "session ended with error")
                }
            }
            busy.store(false, Ordering::Release);
        });
    }
}
