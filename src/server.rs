//! Unix socket server
//!
//! JSON-lines query/command endpoint for the hat. Each connection sends one
//! [`RequestEnvelope`] per line and receives one [`ResponseEnvelope`] per
//! line. A `Subscribe` request turns the connection into an event stream.
//!
//! # Limits
//! - **Connection cap**: excess connections are dropped on accept
//! - **Message size**: lines longer than the limit are rejected before buffering
//! - **Timeouts**: idle reads and stalled writes close the connection

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::constants::server::{
    MAX_CONNECTIONS, MAX_MESSAGE_SIZE, READ_TIMEOUT, SOCKET_MODE, WRITE_TIMEOUT,
};
use crate::error::{PiPowerError, Result};
use crate::poller::HatService;
use crate::protocol::{Request, RequestEnvelope, Response, ResponseData, ResponseEnvelope};

/// Read one `\n`-terminated request into `line`, refusing to buffer more
/// than `limit` bytes. Returns the line length, or 0 once the peer has
/// closed with nothing pending.
async fn read_request_line<R>(reader: &mut R, line: &mut Vec<u8>, limit: usize) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    loop {
        let chunk = reader.fill_buf().await?;
        if chunk.is_empty() {
            return Ok(line.len());
        }
        let (take, complete) = match chunk.iter().position(|&b| b == b'\n') {
            Some(newline) => (newline + 1, true),
            None => (chunk.len(), false),
        };
        if line.len() + take > limit {
            reader.consume(take);
            return Err(io::Error::new(io::ErrorKind::InvalidData, "request line too long"));
        }
        line.extend_from_slice(&chunk[..take]);
        reader.consume(take);
        if complete {
            return Ok(line.len());
        }
    }
}

/// Bind the socket, replacing a stale one but never following a symlink
fn bind(socket_path: &Path) -> Result<UnixListener> {
    if let Ok(metadata) = socket_path.symlink_metadata() {
        if metadata.file_type().is_symlink() {
            return Err(PiPowerError::config(format!(
                "socket path {} is a symlink, refusing to replace it",
                socket_path.display()
            )));
        }
        std::fs::remove_file(socket_path)?;
        debug!("Removed existing socket file");
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let listener = UnixListener::bind(socket_path)?;
    std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(SOCKET_MODE))?;
    Ok(listener)
}

/// Serve until `shutdown` flips; the socket file is removed on exit
pub async fn run_server(
    socket_path: &Path,
    service: Arc<HatService>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = bind(socket_path)?;
    info!("Listening on {} (mode {:o})", socket_path.display(), SOCKET_MODE);
    debug!("Limits: max_conn={}, max_msg={}", MAX_CONNECTIONS, MAX_MESSAGE_SIZE);

    let active = Arc::new(AtomicUsize::new(0));

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let current = active.load(Ordering::SeqCst);
                        if current >= MAX_CONNECTIONS {
                            warn!(
                                "Connection limit reached ({}), rejecting new connection",
                                current
                            );
                            drop(stream);
                            continue;
                        }

                        active.fetch_add(1, Ordering::SeqCst);
                        let active = Arc::clone(&active);
                        let service = Arc::clone(&service);
                        tokio::spawn(async move {
                            handle_client(stream, service).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("Server shutting down");
                break;
            }
        }
    }

    let _ = std::fs::remove_file(socket_path);
    info!("Server stopped");
    Ok(())
}

async fn handle_client(stream: UnixStream, service: Arc<HatService>) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line: Vec<u8> = Vec::with_capacity(MAX_MESSAGE_SIZE);
    let mut request_count: u64 = 0;

    loop {
        let read = read_request_line(&mut reader, &mut line, MAX_MESSAGE_SIZE);
        let read_result = timeout(READ_TIMEOUT, read).await;

        match read_result {
            Ok(Ok(0)) => {
                debug!("Client disconnected after {} requests", request_count);
                break;
            }
            Ok(Ok(n)) => {
                request_count += 1;
                trace!("Request #{}: {} bytes", request_count, n);

                let line_str = match std::str::from_utf8(&line) {
                    Ok(s) => s,
                    Err(e) => {
                        debug!("Non-UTF8 request: {}", e);
                        let response =
                            ResponseEnvelope::new(0, Response::error("Invalid request encoding"));
                        let _ = send_response(&mut writer, &response).await;
                        break;
                    }
                };

                let (response, subscription) = process_request(line_str, &service).await;
                if send_response(&mut writer, &response).await.is_err() {
                    break;
                }
                if let Some((id, events)) = subscription {
                    stream_events(&mut writer, id, events).await;
                    break;
                }
            }
            Ok(Err(e)) => {
                if e.kind() == io::ErrorKind::InvalidData {
                    warn!("Message too large (>{} bytes)", MAX_MESSAGE_SIZE);
                    let response = ResponseEnvelope::new(0, Response::error("Message too large"));
                    let _ = send_response(&mut writer, &response).await;
                } else {
                    error!("Read error: {}", e);
                }
                break;
            }
            Err(_) => {
                debug!("Read timeout");
                let response = ResponseEnvelope::new(0, Response::error("Read timeout"));
                let _ = send_response(&mut writer, &response).await;
                break;
            }
        }
    }
}

/// Forward published events until the client goes away
async fn stream_events(
    writer: &mut OwnedWriteHalf,
    id: u64,
    mut events: broadcast::Receiver<Arc<crate::events::Event>>,
) {
    debug!("Client subscribed to events");
    loop {
        match events.recv().await {
            Ok(event) => {
                let data = ResponseData::event((*event).clone());
                let response = ResponseEnvelope::new(id, Response::ok(data));
                if send_response(writer, &response).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Subscriber lagging, dropped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("Subscriber disconnected");
}

async fn send_response(
    writer: &mut OwnedWriteHalf,
    response: &ResponseEnvelope,
) -> std::result::Result<(), ()> {
    let response_json = serde_json::to_string(response).unwrap_or_else(|_| {
        r#"{"id":0,"status":"error","data":{"message":"Serialization error"}}"#.to_string()
    });

    let write_result = timeout(WRITE_TIMEOUT, async {
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        Ok::<_, io::Error>(())
    })
    .await;

    match write_result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!("Write error: {}", e);
            Err(())
        }
        Err(_) => {
            warn!("Write timeout");
            Err(())
        }
    }
}

/// Run a hat operation on the blocking pool
async fn blocking<T, F>(service: &Arc<HatService>, op: F) -> std::result::Result<T, String>
where
    T: Send + 'static,
    F: FnOnce(&HatService) -> Result<T> + Send + 'static,
{
    let svc = Arc::clone(service);
    match tokio::task::spawn_blocking(move || op(&svc)).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(format!("Internal error: {}", e)),
    }
}

type Subscription = Option<(u64, broadcast::Receiver<Arc<crate::events::Event>>)>;

/// Parse, validate and dispatch one request line
pub(crate) async fn process_request(
    line: &str,
    service: &Arc<HatService>,
) -> (ResponseEnvelope, Subscription) {
    let envelope: RequestEnvelope = match serde_json::from_str(line.trim()) {
        Ok(env) => env,
        Err(e) => {
            debug!("Invalid request: {}", e);
            let message = format!("Invalid request: {}", e);
            return (ResponseEnvelope::new(0, Response::error(message)), None);
        }
    };
    let id = envelope.id;
    let request = envelope.request;

    if let Err(e) = request.validate() {
        debug!(request = request.type_name(), "Rejected request: {}", e);
        return (ResponseEnvelope::new(id, Response::error(e)), None);
    }
    trace!(id, request = request.type_name(), "Dispatching request");

    let result = match &request {
        Request::Ping => Ok(ResponseData::string("pong")),
        Request::Version => Ok(ResponseData::string(format!(
            "{} {} ({})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            service.hat().backend()
        ))),
        Request::GetSnapshot => {
            blocking(service, |s| s.snapshot()).await.map(ResponseData::snapshot)
        }
        Request::ListTemperatureSensors => blocking(service, |s| Ok(s.discover_sensors()))
            .await
            .map(ResponseData::sensors),
        Request::ReloadConfig => blocking(service, |s| s.reload_settings())
            .await
            .map(|()| ResponseData::string("reloaded")),
        Request::Subscribe => {
            let events = service.subscribe();
            let response = ResponseEnvelope::new(id, Response::ok(ResponseData::none()));
            return (response, Some((id, events)));
        }
        Request::SetGpio { .. }
        | Request::SetFanState { .. }
        | Request::SetFanSpeed { .. }
        | Request::SetFan { .. } => match request.command() {
            Some(command) => blocking(service, move |s| s.execute(&command))
                .await
                .map(ResponseData::snapshot),
            None => Err("Unsupported command".to_string()),
        },
    };

    let response = match result {
        Ok(data) => Response::ok(data),
        Err(message) => Response::error(message),
    };
    (ResponseEnvelope::new(id, response), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GpioLineConfig, GpioMode, Settings};
    use crate::hat::PowerHat;
    use crate::mock::SimulatedBoard;
    use std::time::Duration;

    fn service() -> Arc<HatService> {
        let settings = Settings {
            gpio_options: vec![GpioLineConfig::new(16, "Relay", GpioMode::Output)],
            ..Settings::default()
        };
        let hat = PowerHat::new(SimulatedBoard::new(4).build()).with_kick_delay(Duration::ZERO);
        hat.initialize(&settings).unwrap();
        Arc::new(HatService::new(Arc::new(hat), settings))
    }

    fn ok_data(env: &ResponseEnvelope) -> &ResponseData {
        match &env.response {
            Response::Ok(data) => data,
            Response::Error { message } => panic!("unexpected error: {}", message),
        }
    }

    #[tokio::test]
    async fn answers_ping_and_version() {
        let svc = service();
        let (resp, sub) = process_request(r#"{"id":1,"cmd":"Ping"}"#, &svc).await;
        assert_eq!(resp.id, 1);
        assert_eq!(ok_data(&resp).value.as_deref(), Some("pong"));
        assert!(sub.is_none());

        let (resp, _) = process_request(r#"{"id":2,"cmd":"Version"}"#, &svc).await;
        assert!(ok_data(&resp).value.as_deref().unwrap().contains("simulated"));
    }

    #[tokio::test]
    async fn rejects_garbage_and_out_of_range() {
        let svc = service();
        let (resp, _) = process_request("not json", &svc).await;
        assert!(matches!(resp.response, Response::Error { .. }));
        assert_eq!(resp.id, 0);

        let line = r#"{"id":5,"cmd":"SetFanSpeed","data":{"fan_id":0,"speed":300}}"#;
        let (resp, _) = process_request(line, &svc).await;
        assert_eq!(resp.id, 5);
        assert!(matches!(resp.response, Response::Error { .. }));
    }

    #[tokio::test]
    async fn command_returns_fresh_snapshot() {
        let svc = service();
        let line = r#"{"id":9,"cmd":"SetFan","data":{"fan_id":1,"state":true,"speed":75}}"#;
        let (resp, _) = process_request(line, &svc).await;
        let snap = ok_data(&resp).snapshot.clone().unwrap();
        assert_eq!(snap.fans[1].speed, 75);
        assert_eq!(snap.fans.len(), 3);
    }

    #[tokio::test]
    async fn hat_errors_become_error_responses() {
        let svc = service();
        let line = r#"{"id":3,"cmd":"SetGpio","data":{"pin":26,"value":true}}"#;
        let (resp, _) = process_request(line, &svc).await;
        match resp.response {
            Response::Error { message } => assert!(message.contains("26")),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn subscribe_hands_back_receiver() {
        let svc = service();
        let (resp, sub) = process_request(r#"{"id":8,"cmd":"Subscribe"}"#, &svc).await;
        assert!(matches!(resp.response, Response::Ok(_)));
        let (id, mut rx) = sub.unwrap();
        assert_eq!(id, 8);
        svc.publish().unwrap();
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn oversized_request_line_is_refused() {
        let data = vec![b'x'; 64];
        let mut reader = BufReader::new(&data[..]);
        let mut line = Vec::new();
        let err = read_request_line(&mut reader, &mut line, 16).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn request_lines_are_read_one_at_a_time() {
        let mut reader = BufReader::new(&b"{\"id\":1}\n{\"id\":2}"[..]);
        let mut line = Vec::new();
        assert_eq!(read_request_line(&mut reader, &mut line, 16).await.unwrap(), 9);
        assert_eq!(line, b"{\"id\":1}\n");
        assert_eq!(read_request_line(&mut reader, &mut line, 16).await.unwrap(), 8);
        assert_eq!(line, b"{\"id\":2}");
        assert_eq!(read_request_line(&mut reader, &mut line, 16).await.unwrap(), 0);
    }
}
