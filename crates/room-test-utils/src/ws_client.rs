//! Bare-bones WebSocket client for exercising the upgrade routes.
//!
//! Speaks just enough RFC 6455 for tests: the opening handshake, masked
//! text frames out, and unmasked text frames in (control frames are
//! skipped). Payloads are expected to be small.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const OPCODE_TEXT: u8 = 0x1;
const OPCODE_CLOSE: u8 = 0x8;
const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

/// Client end of a real WebSocket connection.
pub struct WsTestClient {
    stream: BufReader<TcpStream>,
}

impl WsTestClient {
    /// Connect to `path` on `addr` and complete the opening handshake.
    ///
    /// Returns the HTTP status line when the server does not switch
    /// protocols.
    pub async fn connect(addr: SocketAddr, path: &str) -> Result<Self, anyhow::Error> {
        let mut stream = BufReader::new(TcpStream::connect(addr).await?);
        let request = format!(
            "GET {path} HTTP/1.1\r\n\
             Host: {addr}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
             Sec-WebSocket-Version: 13\r\n\r\n"
        );
        stream.get_mut().write_all(request.as_bytes()).await?;

        let mut status = String::new();
        stream.read_line(&mut status).await?;
        if !status.starts_with("HTTP/1.1 101") {
            anyhow::bail!("upgrade refused: {}", status.trim_end());
        }
        loop {
            let mut header = String::new();
            if stream.read_line(&mut header).await? == 0 {
                anyhow::bail!("connection closed during handshake");
            }
            if header == "\r\n" {
                break;
            }
        }
        Ok(Self { stream })
    }

    /// Send one masked text frame.
    pub async fn send_text(&mut self, text: &str) -> Result<(), anyhow::Error> {
        let payload = text.as_bytes();
        let mut frame = vec![0x80 | OPCODE_TEXT];
        match payload.len() {
            len if len < 126 => frame.push(0x80 | len as u8),
            len if len <= usize::from(u16::MAX) => {
                frame.push(0x80 | 126);
                frame.extend_from_slice(&(len as u16).to_be_bytes());
            }
            len => {
                frame.push(0x80 | 127);
                frame.extend_from_slice(&(len as u64).to_be_bytes());
            }
        }
        frame.extend_from_slice(&MASK);
        frame.extend(payload.iter().enumerate().map(|(i, b)| b ^ MASK[i % 4]));
        self.stream.get_mut().write_all(&frame).await?;
        Ok(())
    }

    /// Send a JSON value as a text frame.
    pub async fn send_json(&mut self, value: &serde_json::Value) -> Result<(), anyhow::Error> {
        self.send_text(&value.to_string()).await
    }

    /// Next text frame parsed as JSON, or `None` on timeout, close, or EOF.
    pub async fn next_json(&mut self, timeout: Duration) -> Option<serde_json::Value> {
        let text = tokio::time::timeout(timeout, self.next_text()).await.ok()??;
        serde_json::from_str(&text).ok()
    }

    async fn next_text(&mut self) -> Option<String> {
        loop {
            let mut head = [0u8; 2];
            self.stream.read_exact(&mut head).await.ok()?;
            let opcode = head[0] & 0x0f;
            let masked = head[1] & 0x80 != 0;
            let len = match head[1] & 0x7f {
                126 => u64::from(self.stream.read_u16().await.ok()?),
                127 => self.stream.read_u64().await.ok()?,
                len => u64::from(len),
            };
            let mut mask = [0u8; 4];
            if masked {
                self.stream.read_exact(&mut mask).await.ok()?;
            }
            let mut payload = vec![0u8; usize::try_from(len).ok()?];
            self.stream.read_exact(&mut payload).await.ok()?;
            if masked {
                for (i, byte) in payload.iter_mut().enumerate() {
                    *byte ^= mask[i % 4];
                }
            }

            match opcode {
                OPCODE_TEXT => return String::from_utf8(payload).ok(),
                OPCODE_CLOSE => return None,
                _ => continue,
            }
        }
    }
}
