// Lease requests over a real socket
//
// A one-shot loopback HTTP server captures the bytes the reqwest transport
// writes and answers with a canned response.

use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use pitv_viewer::config::EndpointConfig;
use pitv_viewer::lease::{
    LeaseClient, LeaseError, LeaseGrant, RequestQueue, ReqwestTransport,
};

/// Serve one request, returning the raw request text
async fn serve_once(status_line: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/lease", listener.local_addr().unwrap());

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;

        let response = format!(
            "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            status_line,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
        request
    });

    (url, server)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut data = Vec::new();
    let mut chunk = [0u8; 1024];

    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed before sending a full request");
        data.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&data).to_string();
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text[..header_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())?
                })
                .unwrap_or(0);
            if data.len() >= header_end + 4 + content_length {
                return text;
            }
        }
    }
}

fn client() -> LeaseClient {
    LeaseClient::new(RequestQueue::new(Arc::new(ReqwestTransport::default())))
}

#[tokio::test]
async fn test_lease_request_on_the_wire() {
    let (url, server) = serve_once("200 OK", r#"{"guid":"abc123"}"#).await;
    let config = EndpointConfig::new(url, "u", "p", "10.0.0.5:5000");

    let grant = client().request_lease(&config, "").await.unwrap();
    assert_eq!(grant, LeaseGrant { guid: "abc123".to_string() });

    let request = server.await.unwrap();
    let (head, body) = request.split_once("\r\n\r\n").unwrap();
    let head = head.to_ascii_lowercase();

    assert!(head.starts_with("post /lease http/1.1"));
    assert!(head.contains("authorization: basic dtpw"));
    assert!(head.contains("content-type: application/json"));
    assert!(request.contains("Basic dTpw"));
    assert_eq!(
        body,
        r#"{"lease_guid":"","udp_address":"10.0.0.5","udp_port":5000,"lease_time":10000}"#
    );
}

#[tokio::test]
async fn test_error_status_is_reported() {
    let (url, server) = serve_once("403 Forbidden", "denied").await;
    let config = EndpointConfig::new(url, "u", "wrong", "10.0.0.5:5000");

    let err = client().request_lease(&config, "abc123").await.unwrap_err();
    assert_eq!(
        err,
        LeaseError::Status {
            status: 403,
            body: "denied".to_string(),
        }
    );
    assert!(!err.is_fatal());

    let request = server.await.unwrap();
    assert!(request.contains(r#""lease_guid":"abc123""#));
}

#[tokio::test]
async fn test_unreachable_server_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = EndpointConfig::new(format!("http://{}/lease", addr), "u", "p", "10.0.0.5:5000");
    let err = client().request_lease(&config, "").await.unwrap_err();
    assert!(matches!(err, LeaseError::Transport(_)));
    assert!(!err.is_fatal());
}
