//! Service runtime.
//!
//! Binds the loopback TCP endpoint, serves one request per accepted socket,
//! sweeps idle depot connections on a period polled from the settings, and
//! shuts everything down through one broadcast channel on ctrl-c. Sync work
//! runs on `spawn_blocking`; its progress lines stream back to the caller as
//! `Log` frames ahead of the terminal reply.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};

use hollow_core::depot::DepotFactory;
use hollow_core::types::{DepotSyncResult, SyncAction};
use hollow_proto::message::{self, LogFrame};
use hollow_proto::ServiceMessage;
use hollow_sync::ProgressSink;

use crate::error::{io_err, task_err, ServiceError};
use crate::host::ServiceHost;

/// Start the service and block the current thread until it exits.
pub fn start_blocking(
    home: &Path,
    factory: Arc<dyn DepotFactory>,
    port: Option<u16>,
) -> Result<(), ServiceError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), factory, port, None))
}

/// Run the service runtime.
///
/// `port` overrides the `ServicePort` setting; `0` binds an ephemeral port.
/// The actually bound port is reported through `bound` once listening.
pub async fn run(
    home: PathBuf,
    factory: Arc<dyn DepotFactory>,
    port: Option<u16>,
    bound: Option<oneshot::Sender<u16>>,
) -> Result<(), ServiceError> {
    let host = Arc::new(ServiceHost::new(&home, factory)?);
    let port = port.unwrap_or_else(|| host.port());

    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
        .await
        .map_err(|e| io_err(format!("127.0.0.1:{port}"), e))?;
    let local = listener.local_addr().map_err(|e| io_err("listener", e))?;
    tracing::info!(addr = %local, "service listening");
    if let Some(tx) = bound {
        let _ = tx.send(local.port());
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let accept_handle = {
        let shutdown = shutdown_tx.clone();
        let host = host.clone();
        tokio::spawn(async move {
            let result = accept_task(listener, host, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let gc_handle = {
        let shutdown = shutdown_tx.clone();
        let host = host.clone();
        tokio::spawn(async move {
            let result = gc_task(host, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down service");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(task_err("ctrl-c handler", err)),
                    }
                }
            }
        })
    };

    let (accept_result, gc_result, signal_result) =
        tokio::join!(accept_handle, gc_handle, signal_handle);
    handle_join("accept", accept_result)?;
    handle_join("gc", gc_result)?;
    handle_join("signal", signal_result)?;
    Ok(())
}

async fn accept_task(
    listener: TcpListener,
    host: Arc<ServiceHost>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ServiceError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, peer) = accepted.map_err(|e| io_err("accept", e))?;
                let host = host.clone();
                tokio::spawn(async move {
                    // One bad connection never takes the accept loop down.
                    if let Err(err) = handle_socket_client(stream, host).await {
                        tracing::error!(peer = %peer, error = %err, "socket client error");
                    }
                });
            }
        }
    }
    Ok(())
}

/// Idle-connection sweep. The period and idle timeout are re-read from the
/// settings on every tick so `SetSetting` takes effect without a restart.
async fn gc_task(
    host: Arc<ServiceHost>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ServiceError> {
    loop {
        let period = host.gc_period();
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = tokio::time::sleep(period) => {
                let closed = host.garbage_collect(host.idle_timeout());
                if closed > 0 {
                    tracing::info!(closed, "closed idle depot connections");
                }
            }
        }
    }
    Ok(())
}

/// Serve one request on one socket: read frames until the first known
/// request (unknown types logged and skipped), dispatch, reply, close.
async fn handle_socket_client(
    mut stream: TcpStream,
    host: Arc<ServiceHost>,
) -> Result<(), ServiceError> {
    loop {
        let Some(envelope) = message::read_envelope_async(&mut stream).await? else {
            return Ok(());
        };
        let Some(request) = ServiceMessage::decode(&envelope)? else {
            tracing::warn!(kind = %envelope.kind, "ignoring unknown message type");
            continue;
        };
        if request.expected_reply().is_none() {
            tracing::warn!(kind = request.kind(), "ignoring non-request frame");
            continue;
        }
        dispatch(&mut stream, &host, request).await?;
        return Ok(());
    }
}

async fn dispatch(
    stream: &mut TcpStream,
    host: &Arc<ServiceHost>,
    request: ServiceMessage,
) -> Result<(), ServiceError> {
    host.touch_request();
    let reply = match request {
        ServiceMessage::SyncRequest(options) => {
            return handle_sync(stream, host, options).await;
        }
        ServiceMessage::StatusRequest => ServiceMessage::StatusReply(host.status()),
        ServiceMessage::GetSettingRequest { name } => ServiceMessage::GetSettingReply {
            value: host.get_setting(&name),
        },
        ServiceMessage::SetSettingRequest { name, value } => ServiceMessage::SetSettingReply {
            accepted: host.set_setting(&name, value)?,
        },
        ServiceMessage::GetAllSettingsRequest => ServiceMessage::GetAllSettingsReply {
            settings: host.all_settings(),
        },
        ServiceMessage::GarbageCollectRequest { idle_seconds } => {
            let closed = host.garbage_collect(std::time::Duration::from_secs(idle_seconds));
            tracing::info!(closed, idle_seconds, "explicit idle connection sweep");
            ServiceMessage::GarbageCollectReply { closed }
        }
        ServiceMessage::EchoRequest { payload } => ServiceMessage::EchoReply { payload },
        other => {
            // Non-request kinds are filtered out before dispatch.
            tracing::error!(kind = other.kind(), "dispatch reached a non-request");
            return Ok(());
        }
    };
    message::write_message_async(stream, &reply).await?;
    Ok(())
}

async fn handle_sync(
    stream: &mut TcpStream,
    host: &Arc<ServiceHost>,
    mut options: hollow_core::types::DepotSyncOptions,
) -> Result<(), ServiceError> {
    host.apply_setting_defaults(&mut options);
    let remote_logging = host.remote_logging();
    let orchestrator = host.orchestrator();

    let (log_tx, mut log_rx) = mpsc::unbounded_channel::<LogFrame>();
    let handle = tokio::task::spawn_blocking(move || {
        let progress = ChannelProgress { sender: log_tx };
        orchestrator.sync(&options, &progress)
    });

    // The sender drops when the blocking sync returns, ending this stream.
    while let Some(frame) = log_rx.recv().await {
        if remote_logging {
            message::write_message_async(stream, &ServiceMessage::Log(frame)).await?;
        }
    }

    let outcome = handle.await.map_err(|e| task_err("sync", e))?;
    let result = match outcome {
        Ok(result) => {
            host.touch_modified();
            result
        }
        Err(error) => {
            tracing::error!(error = %error, "sync request failed");
            DepotSyncResult::single_error(SyncAction::GenericError, "sync", error.to_string())
        }
    };
    message::write_message_async(stream, &ServiceMessage::SyncReply(result)).await?;
    Ok(())
}

/// Forwards orchestrator progress lines to the connection task and mirrors
/// them into the local log.
struct ChannelProgress {
    sender: mpsc::UnboundedSender<LogFrame>,
}

impl ProgressSink for ChannelProgress {
    fn log(&self, level: &str, line: &str) {
        match level {
            "error" => tracing::error!("{line}"),
            "warn" => tracing::warn!("{line}"),
            "debug" => tracing::debug!("{line}"),
            _ => tracing::info!("{line}"),
        }
        let _ = self.sender.send(LogFrame {
            level: level.to_string(),
            line: line.to_string(),
        });
    }
}

fn handle_join(
    task: &'static str,
    result: Result<Result<(), ServiceError>, tokio::task::JoinError>,
) -> Result<(), ServiceError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(task_err(task, format!("join failure: {err}"))),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
