use crate::config::GithubConfig;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;
use uuid::Uuid;

pub fn github_config(api_base_url: &str) -> GithubConfig {
    GithubConfig {
        owner: "acme".into(),
        repo: "csv-pipeline".into(),
        token: "test-token".into(),
        api_base_url: Some(Url::parse(api_base_url).unwrap()),
        ..Default::default()
    }
}

/// Asserts `key` looks like `csv-<digits>-<uuid v4>.csv`.
pub fn assert_key_format(key: &str) {
    let rest = key
        .strip_prefix("csv-")
        .and_then(|k| k.strip_suffix(".csv"))
        .unwrap_or_else(|| panic!("unexpected key: {key}"));
    let (millis, uuid) = rest.split_once('-').unwrap();
    assert!(!millis.is_empty() && millis.chars().all(|c| c.is_ascii_digit()));
    assert_eq!(Uuid::parse_str(uuid).unwrap().get_version_num(), 4);
}

/// A base URL nothing listens on.
pub async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}")
}

/// Serves one connection: reads the request, then answers `200 OK` with a
/// body shorter than its declared Content-Length and closes the socket.
pub async fn truncated_body_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();

        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
            if request_complete(&request) {
                break;
            }
        }

        stream
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 100\r\n\r\nshort")
            .await
            .unwrap();
        stream.shutdown().await.unwrap();
    });

    format!("http://127.0.0.1:{port}")
}

fn request_complete(request: &[u8]) -> bool {
    let Some(header_end) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
        return false;
    };
    let headers = String::from_utf8_lossy(&request[..header_end]).to_ascii_lowercase();
    let content_length = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    request.len() >= header_end + 4 + content_length
}
