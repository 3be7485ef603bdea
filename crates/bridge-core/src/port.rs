//! Cycling UDP port-pair allocator.
//!
//! Hands out adjacent RTP/RTCP port pairs from the configured range. The
//! cursor advances by two on every attempt, wrapping back to the range start,
//! so a port left busy by another process is simply skipped on the next
//! call. After a small fixed number of consecutive bind failures the
//! allocation fails for that call instead of scanning forever.

use std::net::IpAddr;

use tracing::{debug, warn};

use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::leg::Endpoint;

/// Consecutive bind attempts before giving up on a pair.
const MAX_BIND_ATTEMPTS: u32 = 4;

/// Allocator state: the configured range and the cycling cursor.
#[derive(Debug)]
pub struct PortPool {
    start: u16,
    end: u16,
    cursor: u16,
}

impl PortPool {
    /// Pool over the validated port range of `config`.
    pub fn new(config: &BridgeConfig) -> PortPool {
        PortPool {
            start: config.rtp_start_port,
            end: config.rtp_end_port,
            cursor: config.rtp_start_port,
        }
    }

    /// The next port the pool will try.
    pub fn cursor(&self) -> u16 {
        self.cursor
    }

    /// Bind the next available RTP/RTCP pair on `ip`.
    ///
    /// Both sockets of a failed pair are closed before moving on. Fails with
    /// [`Error::PortPoolExhausted`] after the retry budget is spent.
    pub async fn allocate_pair(&mut self, ip: IpAddr) -> Result<(Endpoint, Endpoint)> {
        for _ in 0..MAX_BIND_ATTEMPTS {
            let port = if self.cursor < self.start || u32::from(self.cursor) + 1 > u32::from(self.end)
            {
                self.start
            } else {
                self.cursor
            };
            self.cursor = u32::from(port).saturating_add(2).min(u32::from(u16::MAX)) as u16;

            let rtp = match Endpoint::bind(ip, port).await {
                Ok(ep) => ep,
                Err(e) => {
                    debug!(port, error = %e, "rtp bind failed, trying next pair");
                    continue;
                }
            };
            match Endpoint::bind(ip, port + 1).await {
                Ok(rtcp) => return Ok((rtp, rtcp)),
                Err(e) => {
                    // Drop the RTP socket too; pairs are all or nothing.
                    drop(rtp);
                    debug!(port = port + 1, error = %e, "rtcp bind failed, trying next pair");
                    continue;
                }
            }
        }
        warn!(
            start = self.start,
            end = self.end,
            "no bindable port pair after {} attempts",
            MAX_BIND_ATTEMPTS
        );
        Err(Error::PortPoolExhausted { attempts: MAX_BIND_ATTEMPTS })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn pool(start: u16, end: u16) -> PortPool {
        PortPool::new(&BridgeConfig {
            rtp_start_port: start,
            rtp_end_port: end,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn pairs_are_adjacent_across_the_range() {
        let mut pool = pool(25000, 25100);
        for _ in 0..4 {
            let (rtp, rtcp) = pool.allocate_pair(LOCALHOST).await.unwrap();
            assert_eq!(rtcp.local().port(), rtp.local().port() + 1);
            assert_eq!(rtp.local().port() % 2, 0);
        }
    }

    #[tokio::test]
    async fn cursor_advances_by_two_and_wraps() {
        let mut pool = pool(25200, 25209);
        assert_eq!(pool.cursor(), 25200);
        // Keep the endpoints alive so each allocation takes a fresh pair.
        let a = pool.allocate_pair(LOCALHOST).await.unwrap();
        assert_eq!(pool.cursor(), 25202);
        let b = pool.allocate_pair(LOCALHOST).await.unwrap();
        let c = pool.allocate_pair(LOCALHOST).await.unwrap();
        let d = pool.allocate_pair(LOCALHOST).await.unwrap();
        // 25208-25209 is the last pair in range; afterwards the cursor wraps.
        let e = pool.allocate_pair(LOCALHOST).await.unwrap();
        assert_eq!(e.0.local().port(), 25208);
        assert_eq!(pool.cursor(), 25210);
        drop((a, b, c, d));
        let wrapped = pool.allocate_pair(LOCALHOST).await.unwrap();
        assert_eq!(wrapped.0.local().port(), 25200);
    }

    #[tokio::test]
    async fn busy_ports_are_skipped() {
        // Occupy the first pair of the range.
        let _rtp = Endpoint::bind(LOCALHOST, 25300).await.unwrap();
        let _rtcp = Endpoint::bind(LOCALHOST, 25301).await.unwrap();
        let mut pool = pool(25300, 25400);
        let (rtp, _) = pool.allocate_pair(LOCALHOST).await.unwrap();
        assert_eq!(rtp.local().port(), 25302);
    }

    #[tokio::test]
    async fn exhausted_range_fails_after_retry_budget() {
        // Occupy every even port the pool can try within its budget.
        let mut held = Vec::new();
        for port in (25500..=25508).step_by(2) {
            held.push(Endpoint::bind(LOCALHOST, port).await.unwrap());
        }
        let mut pool = pool(25500, 25508);
        let err = pool.allocate_pair(LOCALHOST).await.unwrap_err();
        assert!(matches!(err, Error::PortPoolExhausted { attempts: 4 }));
    }
}
