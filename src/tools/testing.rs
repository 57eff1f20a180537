//! Scripted adapters used by tests that need a live handshake without a real server.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use super::{ConnectOptions, ToolRegistry, ToolSpec, FILESYSTEM};

/// Answers initialize (id 1), tools/list (id 2), and one tools/call (id 3), then idles.
pub(crate) const SCRIPTED_SERVER: &str = r##"
read -r _init
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"scripted","version":"0.0.1"}}}'
read -r _initialized
read -r _list
printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"read_file","description":"Read a file"}]}}'
read -r _call
printf '%s\n' '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"a,b\n1,2"}]}}'
cat > /dev/null
"##;

/// Registry holding the scripted server under the `filesystem` name.
pub(crate) async fn scripted_registry() -> ToolRegistry {
    let mut configs = BTreeMap::new();
    configs.insert(
        FILESYSTEM.to_string(),
        ToolSpec::stdio("sh", ["-c", SCRIPTED_SERVER]),
    );

    let options = ConnectOptions {
        handshake: true,
        timeout: Duration::from_secs(5),
    };
    ToolRegistry::initialize(&configs, &options).await
}

/// Serve a JSON-RPC endpoint on localhost that answers the handshake and one
/// `read_table` tool. Returns the endpoint URL.
pub(crate) async fn serve_json_rpc() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(answer_json_rpc(socket));
        }
    });

    format!("http://{addr}/mcp")
}

async fn answer_json_rpc(mut socket: TcpStream) {
    let body = match read_http_body(&mut socket).await {
        Some(body) => body,
        None => return,
    };

    let (status, payload) = if body.is_empty() {
        ("200 OK", "{}".to_string())
    } else {
        let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let result = match request["method"].as_str() {
            Some("initialize") => json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "scripted-http", "version": "0.0.1"}
            }),
            Some("tools/list") => json!({
                "tools": [{"name": "read_table", "description": "Read a table"}]
            }),
            Some("tools/call") => json!({
                "content": [{"type": "text", "text": "region,sales\nnorth,10"}]
            }),
            _ => Value::Null,
        };

        if id.is_null() {
            ("202 Accepted", String::new())
        } else {
            let reply = json!({"jsonrpc": "2.0", "id": id, "result": result});
            ("200 OK", reply.to_string())
        }
    };

    let response = format!(
        "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{payload}",
        payload.len()
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

/// Read one request and return its body (empty for a GET).
async fn read_http_body(socket: &mut TcpStream) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let read = socket.read(&mut chunk).await.ok()?;
        if read == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..read]);
    };

    let headers = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
    let length = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + length {
        let read = socket.read(&mut chunk).await.ok()?;
        if read == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..read]);
    }

    Some(buf[header_end..header_end + length].to_vec())
}
