// src/crawl/testing.rs
// =============================================================================
// Loopback HTTP server for tests that drive real reqwest clients.
//
// One response per connection, routes matched on the exact request path.
// Unknown paths get a 404. Every request path is recorded in arrival order.
// =============================================================================

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Route {
    status: u16,
    content_type: &'static str,
    body: &'static str,
    location: Option<&'static str>,
    delay: Duration,
}

impl Route {
    pub(crate) fn new(status: u16, content_type: &'static str, body: &'static str) -> Self {
        Self {
            status,
            content_type,
            body,
            location: None,
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn html(body: &'static str) -> Self {
        Self::new(200, "text/html; charset=utf-8", body)
    }

    /// 301 to `location`
    pub(crate) fn redirect(location: &'static str) -> Self {
        Self {
            location: Some(location),
            ..Self::new(301, "text/plain", "")
        }
    }

    /// Answers only after `delay`
    pub(crate) fn delayed(self, delay: Duration) -> Self {
        Self { delay, ..self }
    }
}

pub(crate) type Routes = HashMap<&'static str, Route>;

pub(crate) struct TestServer {
    pub(crate) addr: SocketAddr,
    hits: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    pub(crate) async fn start(routes: Routes) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes = Arc::new(routes);
        let hits = Arc::new(Mutex::new(Vec::new()));

        {
            let hits = Arc::clone(&hits);
            tokio::spawn(async move {
                loop {
                    let Ok((mut socket, _)) = listener.accept().await else {
                        return;
                    };
                    let routes = Arc::clone(&routes);
                    let hits = Arc::clone(&hits);

                    tokio::spawn(async move {
                        // read until the end of the request head
                        let mut request = Vec::new();
                        let mut buf = [0u8; 1024];
                        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                            match socket.read(&mut buf).await {
                                Ok(0) | Err(_) => return,
                                Ok(n) => request.extend_from_slice(&buf[..n]),
                            }
                        }

                        let request = String::from_utf8_lossy(&request);
                        let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                        hits.lock().unwrap().push(path.clone());

                        let route = routes
                            .get(path.as_str())
                            .copied()
                            .unwrap_or_else(|| Route::new(404, "text/plain", "missing"));
                        if !route.delay.is_zero() {
                            sleep(route.delay).await;
                        }

                        let location = route
                            .location
                            .map(|l| format!("Location: {l}\r\n"))
                            .unwrap_or_default();
                        let response = format!(
                            "HTTP/1.1 {} X\r\nContent-Type: {}\r\n{location}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                            route.status,
                            route.content_type,
                            route.body.len(),
                            route.body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
            });
        }

        Self { addr, hits }
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Request paths seen so far, in arrival order
    pub(crate) fn hits(&self) -> Vec<String> {
        self.hits.lock().unwrap().clone()
    }
}
