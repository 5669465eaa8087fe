//! RPC Server - Unix socket server for CMS clients

use anyhow::{Context, Result};
use maint_common::rpc::{codes, RpcRequest, RpcResponse};
use std::future::Future;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use crate::rpc_handler::handle_request;
use crate::state::SharedState;

/// Bind the listening socket, replacing a stale one
pub async fn bind(socket_path: &Path) -> Result<UnixListener> {
    if let Some(socket_dir) = socket_path.parent() {
        tokio::fs::create_dir_all(socket_dir)
            .await
            .context("Failed to create socket directory")?;
    }

    let _ = tokio::fs::remove_file(socket_path).await;

    let listener = UnixListener::bind(socket_path).context("Failed to bind Unix socket")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o660))?;
    }

    info!("RPC server listening on {}", socket_path.display());
    Ok(listener)
}

/// Accept connections until `shutdown` resolves
pub async fn serve<F>(listener: UnixListener, state: SharedState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("RPC server shutting down");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let state = state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, state).await {
                            error!("Connection handler error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

/// Handle a single client connection
async fn handle_connection(stream: UnixStream, state: SharedState) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .context("Failed to read from socket")?;

        if bytes_read == 0 {
            // Connection closed
            break;
        }

        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => {
                debug!("Request {} {:?}", request.id, request.method);
                handle_request(state.clone(), request).await
            }
            Err(e) => {
                warn!("Invalid request JSON: {}", e);
                malformed_response(&line, e)
            }
        };

        let response_json = serde_json::to_string(&response)? + "\n";
        writer
            .write_all(response_json.as_bytes())
            .await
            .context("Failed to write response")?;
    }

    Ok(())
}

/// Answer a request we could not decode, echoing its id when possible
fn malformed_response(line: &str, err: serde_json::Error) -> RpcResponse {
    match serde_json::from_str::<serde_json::Value>(line) {
        Ok(value) => {
            let id = value
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            RpcResponse::error(
                id,
                codes::METHOD_NOT_FOUND,
                format!("Unsupported request: {}", err),
            )
        }
        Err(_) => RpcResponse::error(String::new(), codes::PARSE_ERROR, err.to_string()),
    }
}
