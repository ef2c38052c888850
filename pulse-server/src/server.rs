use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use pulse_core::ipc::{PulseRequest, PulseResponse};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use crate::router;
use crate::state::AppState;

/// 4-byte little-endian length prefix followed by a MessagePack payload.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder().little_endian().new_codec()
}

pub async fn run_unix_server(
    socket_path: &str,
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    if Path::new(socket_path).exists() {
        std::fs::remove_file(socket_path)?;
    }

    let listener = UnixListener::bind(socket_path)?;
    tracing::info!("IPC Server listening on {}", socket_path);

    loop {
        tokio::select! {
            res = listener.accept() => {
                let (stream, _) = res?;
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    serve_connection(stream, state).await;
                });
            }
            _ = shutdown.recv() => {
                tracing::info!("Shutting down IPC server...");
                break;
            }
        }
    }

    if Path::new(socket_path).exists() {
        std::fs::remove_file(socket_path)?;
    }

    Ok(())
}

async fn serve_connection(stream: UnixStream, state: Arc<AppState>) {
    let (read, write) = stream.into_split();
    let mut framed_read = FramedRead::new(read, frame_codec());
    let mut framed_write = FramedWrite::new(write, frame_codec());

    while let Some(frame) = framed_read.next().await {
        let bytes_mut = match frame {
            Ok(b) => b,
            Err(e) => {
                tracing::error!("Frame error: {}", e);
                break;
            }
        };

        let response = match rmp_serde::from_slice::<PulseRequest>(&bytes_mut) {
            Ok(request) => router::handle_request(request, &state).await,
            Err(e) => PulseResponse::err(format!("Deserialization error: {}", e)),
        };

        match rmp_serde::to_vec_named(&response) {
            Ok(resp_bytes) => {
                if let Err(e) = framed_write.send(Bytes::from(resp_bytes)).await {
                    tracing::error!("Failed to send response: {}", e);
                    break;
                }
            }
            Err(e) => {
                tracing::error!("Failed to serialize response: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::PulseConfig;

    async fn roundtrip(
        write: &mut FramedWrite<tokio::net::unix::OwnedWriteHalf, LengthDelimitedCodec>,
        read: &mut FramedRead<tokio::net::unix::OwnedReadHalf, LengthDelimitedCodec>,
        payload: Vec<u8>,
    ) -> PulseResponse {
        write.send(Bytes::from(payload)).await.unwrap();
        let frame = read.next().await.unwrap().unwrap();
        rmp_serde::from_slice(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_unix_server_load_and_render() {
        let socket = std::env::temp_dir().join(format!("pulse-test-{}.sock", std::process::id()));
        let socket_path = socket.to_str().unwrap().to_string();
        let state = Arc::new(AppState::new(PulseConfig::default()));
        let (tx, _) = broadcast::channel(1);

        let server_path = socket_path.clone();
        let server_shutdown = tx.subscribe();
        let server = tokio::spawn(async move {
            run_unix_server(&server_path, state, server_shutdown).await
        });

        let mut stream = None;
        for _ in 0..50 {
            if let Ok(s) = UnixStream::connect(&socket_path).await {
                stream = Some(s);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        let (read, write) = stream.expect("server did not start").into_split();
        let mut read = FramedRead::new(read, frame_codec());
        let mut write = FramedWrite::new(write, frame_codec());

        let ping = rmp_serde::to_vec_named(&PulseRequest::Ping).unwrap();
        assert!(roundtrip(&mut write, &mut read, ping).await.is_ok());

        let load = rmp_serde::to_vec_named(&PulseRequest::Load {
            path: None,
            csv: Some("fecha_interaccion,id_sesion,canal\n2024-03-01 09:00:00,s1,web\n".to_string()),
        })
        .unwrap();
        let loaded = roundtrip(&mut write, &mut read, load).await;
        assert!(loaded.is_ok(), "{:?}", loaded.error);
        let key = loaded.data.unwrap()["dataset"].as_str().unwrap().to_string();

        let render = rmp_serde::to_vec_named(&PulseRequest::Render {
            dataset: key,
            filters: Default::default(),
        })
        .unwrap();
        let rendered = roundtrip(&mut write, &mut read, render).await;
        assert!(rendered.is_ok(), "{:?}", rendered.error);
        assert_eq!(rendered.data.unwrap()["kpis"]["sessions"], 1);

        // garbage frame gets an error response, connection stays open
        let bad = roundtrip(&mut write, &mut read, vec![0xc1]).await;
        assert!(!bad.is_ok());
        let ping = rmp_serde::to_vec_named(&PulseRequest::Ping).unwrap();
        assert!(roundtrip(&mut write, &mut read, ping).await.is_ok());

        tx.send(()).unwrap();
        server.await.unwrap().unwrap();
        assert!(!socket.exists());
    }
}
