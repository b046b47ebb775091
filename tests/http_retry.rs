//! Exercises the HTTP retry chain (scenario 6): a server that returns
//! `[500, 523, 504, 500, 204]` across five successive requests, where the
//! client must retry through the transient failures and resend the exact
//! same bytes each time.

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use linesender::config::ProtocolVersionSetting;
use linesender::{Options, Protocol, ProtocolVersion, Sender};

async fn spawn_sequenced_server(
    statuses: Vec<u16>,
) -> (std::net::SocketAddr, Arc<AtomicUsize>, Arc<Mutex<Vec<Vec<u8>>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    let bodies: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));

    let counter_clone = counter.clone();
    let bodies_clone = bodies.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let io = TokioIo::new(stream);
            let statuses = statuses.clone();
            let counter = counter_clone.clone();
            let bodies = bodies_clone.clone();
            tokio::spawn(async move {
                let service = hyper::service::service_fn(move |req: Request<Incoming>| {
                    let statuses = statuses.clone();
                    let counter = counter.clone();
                    let bodies = bodies.clone();
                    async move {
                        let body = req.into_body().collect().await.unwrap().to_bytes();
                        bodies.lock().unwrap().push(body.to_vec());
                        let idx = counter.fetch_add(1, Ordering::SeqCst);
                        let status = statuses[idx.min(statuses.len() - 1)];
                        let response = Response::builder()
                            .status(status)
                            .body(Full::new(Bytes::new()))
                            .unwrap();
                        Ok::<_, Infallible>(response)
                    }
                });
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(io, service)
                    .await;
            });
        }
    });

    (addr, counter, bodies)
}

#[tokio::test]
async fn http_retry_chain_reaches_success() -> Result<(), linesender::Error> {
    let (addr, counter, bodies) =
        spawn_sequenced_server(vec![500, 523, 504, 500, 204]).await;

    let options = Options::new(Protocol::Http, "127.0.0.1")
        .port(addr.port())
        .protocol_version(ProtocolVersionSetting::Fixed(ProtocolVersion::V1))
        .retry_timeout(Duration::from_millis(30_000))
        .auto_flush(false);

    let mut sender = Sender::connect(options).await?;
    sender.table("t")?.int_column("n", 1)?.at_now().await?;
    let sent = sender.flush().await?;
    assert!(sent);

    assert_eq!(counter.load(Ordering::SeqCst), 5);
    let bodies = bodies.lock().unwrap();
    assert_eq!(bodies.len(), 5);
    for body in bodies.iter() {
        assert_eq!(std::str::from_utf8(body).unwrap(), "t n=1i\n");
    }

    sender.close().await?;
    Ok(())
}

#[tokio::test]
async fn http_non_retryable_status_fails_immediately() -> Result<(), linesender::Error> {
    let (addr, counter, _bodies) = spawn_sequenced_server(vec![401]).await;

    let options = Options::new(Protocol::Http, "127.0.0.1")
        .port(addr.port())
        .protocol_version(ProtocolVersionSetting::Fixed(ProtocolVersion::V1))
        .retry_timeout(Duration::from_millis(30_000))
        .auto_flush(false);

    let mut sender = Sender::connect(options).await?;
    sender.table("t")?.int_column("n", 1)?.at_now().await?;
    let err = sender.flush().await.unwrap_err();
    assert!(matches!(err, linesender::Error::Http { status: 401, .. }));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    Ok(())
}
