//! The accept loop and the per-connection frame loop.
//!
//! One task per connection, same as the reference server's per-client
//! session; here the task is a plain `tokio::spawn`'d future instead of an
//! SSH `Handler` impl, since the transport is a bare TCP socket. The accept
//! call is wrapped in a timeout so the loop periodically comes up for air to
//! reap finished tasks and enforce `max_threads`.

use std::sync::Arc;
use std::time::Instant;

use colored::Colorize;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::codec::{self, Envelope};
use crate::config::Config;
use crate::error::CodecError;
use crate::federation;
use crate::handlers;
use crate::protocol::ServerOperation;
use crate::store::Store;

/// Binds the listener and runs the accept loop until the process is killed.
pub async fn run(listener: TcpListener, store: Arc<Store>, config: Arc<Config>) -> anyhow::Result<()> {
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    loop {
        match tokio::time::timeout(config.socket_timeout, listener.accept()).await {
            Ok(Ok((stream, addr))) => {
                tracing::info!(%addr, "accepted connection");
                let store = Arc::clone(&store);
                let config = Arc::clone(&config);
                tasks.push(tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, store, config).await {
                        tracing::warn!(%addr, %err, "connection ended with an error");
                    }
                }));
            }
            Ok(Err(err)) => tracing::warn!(%err, "accept failed"),
            Err(_elapsed) => {} // nothing accepted this tick; fall through to reaping
        }

        tasks.retain(|task| !task.is_finished());
        if tasks.len() >= config.max_threads {
            tracing::warn!(live = tasks.len(), cap = config.max_threads, "at connection cap, still accepting");
        }
    }
}

/// Drives one connection end to end: base-key handshake, frame loop with a
/// key swap on login, session cleanup and a snapshot on the way out.
async fn handle_connection(stream: TcpStream, store: Arc<Store>, config: Arc<Config>) -> Result<(), CodecError> {
    stream.set_nodelay(true).ok();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut envelope = Envelope::new(&config.base_key).expect("base key was validated in Config::from_cli");
    let mut session_token: Option<String> = None;

    let result = loop {
        let frame = match codec::read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break Ok(()),
            Err(err) => break Err(err),
        };

        let plaintext = match envelope.decrypt(&frame) {
            Ok(bytes) => bytes,
            Err(err) => break Err(err),
        };

        if Config::verbose_frame_logging() {
            tracing::debug!("{} {}", "<-".blue(), String::from_utf8_lossy(&plaintext));
        }

        let started = Instant::now();
        let request: serde_json::Value = match serde_json::from_slice(&plaintext) {
            Ok(value) => value,
            Err(err) => break Err(CodecError::from(err)),
        };

        let reply = if request.get("server_operation").is_some() {
            match serde_json::from_value::<ServerOperation>(request) {
                Ok(op) => federation::handle_inbound(&store, op),
                Err(_) => crate::protocol::failure("Invalid request", Default::default()),
            }
        } else {
            handlers::dispatch(&store, &config, request, &mut session_token).await
        };
        store.update_latency(started.elapsed().as_secs_f64());

        // a fresh login hands the client a brand new per-session key; every
        // frame after this reply must be encrypted under it, not the base key.
        if let Some(key) = reply.get("encryption_key").and_then(|v| v.as_str()) {
            if let Some(fresh) = Envelope::new(key) {
                envelope = fresh;
            }
        }

        if Config::verbose_frame_logging() {
            tracing::debug!("{} {}", "->".green(), reply);
        }

        let ciphertext = envelope.encrypt(reply.to_string().as_bytes());
        if let Err(err) = codec::write_frame(&mut write_half, &ciphertext).await {
            break Err(err);
        }

        if let Err(err) = store.backup(std::path::Path::new(&config.state_file)).await {
            tracing::warn!(%err, "failed to persist snapshot after handling request");
        }
    };

    if let Some(token) = session_token {
        store.close_session(&token);
    }
    write_half.shutdown().await.ok();

    result
}
