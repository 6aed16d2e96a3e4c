use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

use crate::domain::{Endpoint, ProbeOutcome};
use crate::ports::ProbeClient;

use super::codec::{self, ProbeError, ProbeResult};

/// Server List Ping client
#[derive(Debug, Clone)]
pub struct SlpClient {
    timeout: Duration,
}

impl SlpClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Query `endpoint` once, bounded by the client timeout
    pub async fn status(&self, endpoint: &Endpoint) -> ProbeResult<ProbeOutcome> {
        tokio::time::timeout(self.timeout, Self::exchange(endpoint))
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))?
    }

    async fn exchange(endpoint: &Endpoint) -> ProbeResult<ProbeOutcome> {
        let (host, port) = endpoint.host_port();

        let mut stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        stream.write_all(&codec::handshake(host, port)).await?;

        let started = Instant::now();
        stream.write_all(&codec::status_request()).await?;
        let (packet_id, payload) = codec::read_frame(&mut stream).await?;
        let latency = started.elapsed();

        if packet_id != codec::STATUS_ID {
            return Err(ProbeError::Protocol(format!(
                "unexpected packet id {:#04x}",
                packet_id
            )));
        }

        let status = codec::parse_status(&payload)?;

        Ok(ProbeOutcome {
            player_count: status.players.map(|p| p.online),
            latency_ms: Some(round_millis(latency)),
            logo: status.favicon,
        })
    }
}

/// Round a duration to the nearest whole millisecond
fn round_millis(duration: Duration) -> u32 {
    let millis = (duration.as_secs_f64() * 1000.0).round();
    millis.min(f64::from(u32::MAX)) as u32
}

#[async_trait]
impl ProbeClient for SlpClient {
    async fn probe(&self, endpoint: &Endpoint) -> ProbeOutcome {
        match self.status(endpoint).await {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(%endpoint, error = %e, "probe failed");
                ProbeOutcome::failed()
            }
        }
    }
}
