//! Local HTTP callback server for the OAuth redirect.
//!
//! Binds a TCP listener on `127.0.0.1:<port>` and serves `GET /callback` on a
//! background task until the first authorization outcome arrives or the
//! server is shut down. Any other path gets a 404 and the listener stays up,
//! so a stray `favicon.ico` request does not end the login.

use std::{collections::HashMap, time::Duration};
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tomclient_types::{Result, TomError};

/// Path the identity provider redirects the browser to.
pub const CALLBACK_PATH: &str = "/callback";

const READ_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_REQUEST_BYTES: usize = 8192;

/// What the provider sent back on a successful authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: String,
    /// Empty when the provider omitted it; the caller's CSRF check rejects that.
    pub state: String,
}

type Outcome = Result<CallbackParams>;

/// A bound callback listener with its accept loop running.
///
/// The listener is released by [`wait`](Self::wait) on every path. Dropping
/// the server without waiting (e.g. the login future is dropped) aborts the
/// accept loop as well.
pub struct CallbackServer {
    port: u16,
    result: Option<oneshot::Receiver<Outcome>>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl CallbackServer {
    /// Bind `127.0.0.1:port` and start serving. Port `0` picks a free port.
    ///
    /// The caller should bind **before** opening the browser so the redirect
    /// cannot race the bind.
    ///
    /// # Errors
    ///
    /// Returns [`TomError::CallbackBind`] if the port cannot be bound.
    pub async fn bind(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|source| TomError::CallbackBind { port, source })?;
        let port = listener
            .local_addr()
            .map_err(|source| TomError::CallbackBind { port, source })?
            .port();

        let (tx, rx) = oneshot::channel();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(serve(listener, tx, shutdown.clone()));
        tracing::debug!(port, "callback listener bound");

        Ok(Self {
            port,
            result: Some(rx),
            shutdown,
            task: Some(task),
        })
    }

    /// The port actually bound.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `http://localhost:{port}/callback`.
    #[must_use]
    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}{CALLBACK_PATH}", self.port)
    }

    /// Wait for the callback, `cancel`, or `timeout`, whichever comes first.
    ///
    /// The listener is shut down and its port released before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`TomError::Authorization`] if the provider reported an error
    /// or sent no code, [`TomError::Cancelled`] or [`TomError::Timeout`].
    pub async fn wait(mut self, timeout: Duration, cancel: &CancellationToken) -> Outcome {
        let outcome = match self.result.take() {
            Some(result) => tokio::select! {
                received = result => received.unwrap_or_else(|_| {
                    Err(TomError::Authorization("callback listener stopped unexpectedly".into()))
                }),
                () = cancel.cancelled() => Err(TomError::Cancelled),
                () = tokio::time::sleep(timeout) => Err(TomError::Timeout(timeout)),
            },
            None => Err(TomError::Authorization("callback already consumed".into())),
        };
        self.shutdown().await;
        outcome
    }

    async fn shutdown(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::debug!(error = %e, "callback listener task ended abnormally");
        }
        tracing::debug!(port = self.port, "callback listener closed");
    }
}

impl Drop for CallbackServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn serve(listener: TcpListener, tx: oneshot::Sender<Outcome>, shutdown: CancellationToken) {
    let mut tx = Some(tx);
    // One task per connection; dropping the set aborts handlers still reading.
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    connections.spawn(handle_connection(stream));
                }
                Err(e) => tracing::warn!(error = %e, "failed to accept callback connection"),
            },
            Some(joined) = connections.join_next() => match joined {
                Ok(Ok(Some(outcome))) => {
                    if let Some(tx) = tx.take() {
                        let _ = tx.send(outcome);
                    } else {
                        tracing::debug!("ignoring repeated callback");
                    }
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "callback connection failed"),
                Err(e) => tracing::debug!(error = %e, "callback handler ended abnormally"),
            },
        }
    }
}

/// Serve one HTTP request. `Ok(None)` means the request was not a callback.
async fn handle_connection(mut stream: TcpStream) -> std::io::Result<Option<Outcome>> {
    let request = tokio::time::timeout(READ_TIMEOUT, read_request_line(&mut stream))
        .await
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::TimedOut))??;

    let Some(query) = callback_query(&request) else {
        write_response(&mut stream, "404 Not Found", "<h1>Not found</h1>").await?;
        return Ok(None);
    };

    let outcome = parse_callback(query);
    let body = match &outcome {
        Ok(_) => "<h1>Login successful!</h1><p>You may close this tab and return to the terminal.</p>"
            .to_string(),
        Err(e) => format!(
            "<h1>Login failed</h1><p>{}</p><p>Return to the terminal for details.</p>",
            html_escape(&e.to_string())
        ),
    };
    let status = if outcome.is_ok() {
        "200 OK"
    } else {
        "400 Bad Request"
    };
    write_response(&mut stream, status, &body).await?;
    Ok(Some(outcome))
}

/// Read until the request line is complete, the peer stops sending, or
/// [`MAX_REQUEST_BYTES`] is reached.
async fn read_request_line(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    while !buf.windows(2).any(|w| w == b"\r\n") && buf.len() < MAX_REQUEST_BYTES {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    buf.truncate(MAX_REQUEST_BYTES);
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

async fn write_response(stream: &mut TcpStream, status: &str, body: &str) -> std::io::Result<()> {
    let page = format!("<html><body>{body}</body></html>");
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{page}",
        page.len()
    );
    stream.write_all(response.as_bytes()).await?;
    let _ = stream.shutdown().await;
    Ok(())
}

/// The raw query of a `GET /callback` request line, `None` for anything else.
fn callback_query(request: &str) -> Option<&str> {
    // First line format: "GET /callback?code=...&state=... HTTP/1.1"
    let first_line = request.lines().next().unwrap_or("");
    let mut parts = first_line.split_ascii_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;
    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    (method == "GET" && path == CALLBACK_PATH).then_some(query)
}

fn parse_callback(query: &str) -> Outcome {
    let params: HashMap<String, String> = serde_urlencoded::from_str(query)
        .map_err(|e| TomError::Authorization(format!("invalid callback query params: {e}")))?;

    if let Some(error) = params.get("error").filter(|e| !e.is_empty()) {
        let message = match params.get("error_description").filter(|d| !d.is_empty()) {
            Some(description) => format!("{error}: {description}"),
            None => error.clone(),
        };
        return Err(TomError::Authorization(message));
    }

    let code = params
        .get("code")
        .filter(|c| !c.is_empty())
        .ok_or_else(|| TomError::Authorization("missing code parameter in callback".into()))?;

    Ok(CallbackParams {
        code: code.clone(),
        state: params.get("state").cloned().unwrap_or_default(),
    })
}

fn html_escape(s: &str) -> String {
    s.chars().fold(String::with_capacity(s.len()), |mut out, c| {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
        out
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

    const LONG: Duration = Duration::from_secs(10);

    #[test]
    fn test_callback_query_standard() {
        let req = "GET /callback?code=abc123&state=xyz HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let query = callback_query(req).unwrap();
        let params = parse_callback(query).unwrap();
        assert_eq!(params.code, "abc123");
        assert_eq!(params.state, "xyz");
    }

    #[test]
    fn test_callback_query_other_paths() {
        assert!(callback_query("GET /favicon.ico HTTP/1.1\r\n\r\n").is_none());
        assert!(callback_query("GET /?code=x HTTP/1.1\r\n\r\n").is_none());
        assert!(callback_query("POST /callback?code=x HTTP/1.1\r\n\r\n").is_none());
        assert!(callback_query("").is_none());
    }

    #[test]
    fn test_parse_callback_encoded() {
        let params = parse_callback("code=a%2Bb&state=st").unwrap();
        assert_eq!(params.code, "a+b");
    }

    #[test]
    fn test_parse_callback_provider_error() {
        let err = parse_callback("error=access_denied&error_description=User+cancelled").unwrap_err();
        assert!(matches!(err, TomError::Authorization(ref m) if m == "access_denied: User cancelled"));
    }

    #[test]
    fn test_parse_callback_missing_code() {
        let err = parse_callback("state=st").unwrap_err();
        assert!(err.to_string().contains("missing code"));
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("<b>&\"x\""), "&lt;b&gt;&amp;&quot;x&quot;");
    }

    #[tokio::test]
    async fn test_serves_404_then_callback() {
        let server = CallbackServer::bind(0).await.unwrap();
        let base = format!("http://127.0.0.1:{}", server.port());
        assert!(server.redirect_uri().ends_with("/callback"));

        let waiter = tokio::spawn(async move { server.wait(LONG, &CancellationToken::new()).await });

        let resp = reqwest::get(format!("{base}/favicon.ico")).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

        let resp = reqwest::get(format!("{base}/callback?code=abc&state=s1"))
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert!(resp.text().await.unwrap().contains("Login successful"));

        let params = waiter.await.unwrap().unwrap();
        assert_eq!(params.code, "abc");
        assert_eq!(params.state, "s1");
    }

    #[tokio::test]
    async fn test_provider_error_renders_failure_page() {
        let server = CallbackServer::bind(0).await.unwrap();
        let url = format!(
            "http://127.0.0.1:{}/callback?error=access_denied&error_description=%3Cdenied%3E",
            server.port()
        );
        let waiter = tokio::spawn(async move { server.wait(LONG, &CancellationToken::new()).await });

        let resp = reqwest::get(url).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
        let page = resp.text().await.unwrap();
        assert!(page.contains("Login failed"));
        assert!(page.contains("&lt;denied&gt;"));

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, TomError::Authorization(_)));
    }

    #[tokio::test]
    async fn test_idle_connection_does_not_block_callback() {
        let server = CallbackServer::bind(0).await.unwrap();
        let port = server.port();

        // Browsers open speculative sockets that never send a request.
        let _idle = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let waiter = tokio::spawn(async move {
            server.wait(Duration::from_secs(2), &CancellationToken::new()).await
        });

        let resp = reqwest::get(format!("http://127.0.0.1:{port}/callback?code=abc&state=s1"))
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);

        let params = waiter.await.unwrap().unwrap();
        assert_eq!(params.code, "abc");
    }

    #[tokio::test]
    async fn test_request_line_split_across_writes() {
        let server = CallbackServer::bind(0).await.unwrap();
        let port = server.port();
        let waiter = tokio::spawn(async move { server.wait(LONG, &CancellationToken::new()).await });

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream.write_all(b"GET /callb").await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        stream
            .write_all(b"ack?code=split&state=s2 HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");

        let params = waiter.await.unwrap().unwrap();
        assert_eq!(params.code, "split");
        assert_eq!(params.state, "s2");
    }

    #[tokio::test]
    async fn test_timeout_releases_port() {
        let server = CallbackServer::bind(0).await.unwrap();
        let port = server.port();
        let err = server
            .wait(Duration::from_millis(100), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TomError::Timeout(_)));

        let again = CallbackServer::bind(port).await.unwrap();
        assert_eq!(again.port(), port);
    }

    #[tokio::test]
    async fn test_cancel_releases_port() {
        let server = CallbackServer::bind(0).await.unwrap();
        let port = server.port();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = server.wait(LONG, &cancel).await.unwrap_err();
        assert!(matches!(err, TomError::Cancelled));
        assert!(CallbackServer::bind(port).await.is_ok());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_callback_bind_error() {
        let first = CallbackServer::bind(0).await.unwrap();
        let err = CallbackServer::bind(first.port()).await.err().unwrap();
        assert!(matches!(err, TomError::CallbackBind { port, .. } if port == first.port()));
    }
}
