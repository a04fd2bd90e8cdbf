//! HTTP/1 listener feeding requests into the [`Pipeline`].

use crate::dispatch::ResponseBuilder;
use crate::pipeline::Pipeline;
use crate::request::HttpRequest;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Accept connections until `shutdown` completes.
pub async fn serve<F>(listener: TcpListener, pipeline: Arc<Pipeline>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()>,
{
    let local_addr = listener.local_addr()?;
    info!("Mirage listening on {}", local_addr);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let pipeline = Arc::clone(&pipeline);
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let pipeline = Arc::clone(&pipeline);
                                async move { handle_request(req, pipeline, addr).await }
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                debug!("Connection error from {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Accept error on {}: {}", local_addr, e);
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Listener on {} shutting down", local_addr);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_request(
    req: Request<Incoming>,
    pipeline: Arc<Pipeline>,
    addr: SocketAddr,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            debug!("Failed to read request body from {}: {}", addr, e);
            return Ok(ResponseBuilder::json_error(
                StatusCode::BAD_REQUEST,
                "Failed to read request body",
            )
            .build_full());
        }
    };

    let request = HttpRequest::from_parts(parts.method, parts.uri, parts.headers, body);
    debug!("{} from {}", request, addr);
    Ok(pipeline.respond(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigGroup, LoadedConfig, ResourceDefinition, ResponseConfig};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    fn pipeline() -> Arc<Pipeline> {
        let group = ConfigGroup {
            resources: vec![ResourceDefinition::new("POST", "/echo").with_response(
                ResponseConfig::default()
                    .with_status_code(201)
                    .with_static_data(r#"{"created":true}"#),
            )],
            ..Default::default()
        };
        let config = LoadedConfig::from_groups(vec![group]).unwrap();
        Arc::new(Pipeline::builder(config).build().unwrap())
    }

    async fn raw_request(addr: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8_lossy(&response).into_owned()
    }

    #[tokio::test]
    async fn test_serves_requests_until_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, pipeline(), async {
            let _ = shutdown_rx.await;
        }));

        let response = raw_request(
            addr,
            "POST /echo HTTP/1.1\r\nHost: localhost\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{}",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 201"), "{response}");
        assert!(response.contains(r#"{"created":true}"#));

        let response = raw_request(
            addr,
            "GET /missing HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 404"), "{response}");

        shutdown_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
