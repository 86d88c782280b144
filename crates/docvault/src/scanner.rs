//! Safety scanning of stored uploads.
//!
//! [`ClamdScanner`] speaks clamd's `INSTREAM` command over TCP:
//!
//! ```text
//! → zINSTREAM\0
//! → <u32 BE length><bytes> …   (one frame per chunk)
//! → 0u32                       (end of stream)
//! ← stream: OK\0 | stream: <signature> FOUND\0 | … ERROR\0
//! ```
//!
//! [`DisabledScanner`] reports `Skipped`, which the pipeline treats as
//! clean after logging a warning.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::warn;

use crate::config::ScanConfig;
use crate::traits::{ScanVerdict, Scanner};

/// Upper bound on a clamd reply; real replies are one short line.
const MAX_REPLY_BYTES: u64 = 4096;

/// What to do when the scanner cannot produce a verdict.
///
/// An infected verdict is fatal under either policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPolicy {
    /// Log the scan error and continue as if clean.
    #[default]
    FailOpen,
    /// Fail the run on a scan error.
    FailClosed,
}

pub struct ClamdScanner {
    address: String,
    chunk_bytes: usize,
}

impl ClamdScanner {
    pub fn new(address: &str, chunk_bytes: usize) -> Self {
        Self {
            address: address.to_string(),
            chunk_bytes: chunk_bytes.max(1),
        }
    }

    async fn instream(&self, path: &Path) -> std::io::Result<String> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut stream = TcpStream::connect(&self.address).await?;
        stream.write_all(b"zINSTREAM\0").await?;

        let mut buf = vec![0u8; self.chunk_bytes];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            stream.write_all(&(n as u32).to_be_bytes()).await?;
            stream.write_all(&buf[..n]).await?;
        }
        stream.write_all(&0u32.to_be_bytes()).await?;
        stream.flush().await?;

        let mut reply = Vec::new();
        (&mut stream).take(MAX_REPLY_BYTES).read_to_end(&mut reply).await?;
        Ok(String::from_utf8_lossy(&reply)
            .trim_end_matches(['\0', '\n'])
            .to_string())
    }
}

/// Map a clamd reply line to a verdict.
pub fn parse_clamd_reply(reply: &str) -> ScanVerdict {
    let body = reply.split_once(": ").map_or(reply, |(_, rest)| rest).trim();
    if body == "OK" {
        ScanVerdict::Clean
    } else if let Some(signature) = body.strip_suffix(" FOUND") {
        ScanVerdict::Infected(signature.to_string())
    } else if body.is_empty() {
        ScanVerdict::Error("empty reply from clamd".to_string())
    } else {
        ScanVerdict::Error(body.to_string())
    }
}

#[async_trait]
impl Scanner for ClamdScanner {
    fn name(&self) -> &str {
        "clamd"
    }

    async fn scan(&self, path: &Path) -> ScanVerdict {
        match self.instream(path).await {
            Ok(reply) => parse_clamd_reply(&reply),
            Err(e) => ScanVerdict::Error(format!("clamd at {}: {}", self.address, e)),
        }
    }
}

pub struct DisabledScanner;

#[async_trait]
impl Scanner for DisabledScanner {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn scan(&self, path: &Path) -> ScanVerdict {
        warn!(path = %path.display(), "virus scanning disabled, skipping");
        ScanVerdict::Skipped
    }
}

pub fn create_scanner(config: &ScanConfig) -> Arc<dyn Scanner> {
    match config.mode.as_str() {
        "clamd" => Arc::new(ClamdScanner::new(&config.address, config.chunk_bytes)),
        _ => Arc::new(DisabledScanner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn parses_clamd_replies() {
        assert_eq!(parse_clamd_reply("stream: OK"), ScanVerdict::Clean);
        assert_eq!(
            parse_clamd_reply("stream: Eicar-Test-Signature FOUND"),
            ScanVerdict::Infected("Eicar-Test-Signature".into())
        );
        assert!(matches!(
            parse_clamd_reply("INSTREAM size limit exceeded. ERROR"),
            ScanVerdict::Error(_)
        ));
        assert!(matches!(parse_clamd_reply(""), ScanVerdict::Error(_)));
    }

    /// Accept one connection, check the framing, reply with `reply`.
    async fn fake_clamd(reply: &'static str) -> (String, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut cmd = [0u8; 10];
            sock.read_exact(&mut cmd).await.unwrap();
            assert_eq!(&cmd, b"zINSTREAM\0");
            let mut payload = Vec::new();
            loop {
                let len = sock.read_u32().await.unwrap() as usize;
                if len == 0 {
                    break;
                }
                let mut chunk = vec![0u8; len];
                sock.read_exact(&mut chunk).await.unwrap();
                payload.extend(chunk);
            }
            sock.write_all(reply.as_bytes()).await.unwrap();
            sock.shutdown().await.unwrap();
            payload
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn clamd_streams_file_in_chunks() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"0123456789abcdef").unwrap();

        let (addr, server) = fake_clamd("stream: OK\0").await;
        let verdict = ClamdScanner::new(&addr, 5).scan(&path).await;
        assert_eq!(verdict, ScanVerdict::Clean);
        assert_eq!(server.await.unwrap(), b"0123456789abcdef");
    }

    #[tokio::test]
    async fn clamd_reports_infection() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("eicar.txt");
        std::fs::write(&path, b"X5O!P%@AP").unwrap();

        let (addr, _server) = fake_clamd("stream: Eicar-Test-Signature FOUND\0").await;
        let verdict = ClamdScanner::new(&addr, 1024).scan(&path).await;
        assert_eq!(verdict, ScanVerdict::Infected("Eicar-Test-Signature".into()));
    }

    #[tokio::test]
    async fn unreachable_clamd_is_a_scan_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"hi").unwrap();

        // Bind then drop to get a port nobody listens on.
        let addr = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().to_string()
        };
        let verdict = ClamdScanner::new(&addr, 1024).scan(&path).await;
        assert!(matches!(verdict, ScanVerdict::Error(_)), "{:?}", verdict);
    }

    #[tokio::test]
    async fn disabled_scanner_skips() {
        let verdict = DisabledScanner.scan(Path::new("/nonexistent")).await;
        assert_eq!(verdict, ScanVerdict::Skipped);
    }
}
