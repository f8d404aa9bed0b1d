//! Address probing (component C8): given a set of candidate addresses the
//! interchange might be reachable at, find the one this worker should
//! actually connect to.
//!
//! Grounded on `parsl/addresses.py`'s `get_all_addresses` (interface
//! enumeration + hostname + route lookup) and
//! `parsl/executors/high_throughput/probe.py`'s `probe_addresses` (connect to
//! every candidate and keep whichever completes first). There is no
//! `zmq_monitor`-style connect event in `tokio`, so the race is expressed as
//! parallel `TcpStream::connect` attempts instead.

use std::time::Duration;

use futures_util::stream::FuturesUnordered;
use futures_util::StreamExt;
use tokio::net::TcpStream;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Builds the candidate address list: any addresses the caller already knows
/// about (e.g. the host the worker was launched with), plus loopback and the
/// local hostname as a last resort. Deduplicated but not ordered by
/// preference — `probe_addresses` races all of them.
pub fn default_candidates(explicit: &[String]) -> Vec<String> {
    let mut candidates: Vec<String> = explicit.to_vec();
    candidates.push("127.0.0.1".to_string());
    if let Ok(hostname) = gethostname::gethostname().into_string() {
        candidates.push(hostname);
    }
    candidates.sort();
    candidates.dedup();
    candidates
}

/// Races a TCP connect to `port` against every candidate address and returns
/// the first one that succeeds within `timeout`, or `None` if none did.
pub async fn probe_addresses(candidates: &[String], port: u16, timeout: Duration) -> Option<String> {
    let mut attempts = FuturesUnordered::new();
    for addr in candidates {
        let addr = addr.clone();
        attempts.push(async move {
            let target = format!("{addr}:{port}");
            match tokio::time::timeout(timeout, TcpStream::connect(&target)).await {
                Ok(Ok(_stream)) => Some(addr),
                _ => None,
            }
        });
    }

    while let Some(result) = attempts.next().await {
        if result.is_some() {
            return result;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn probe_finds_the_reachable_candidate() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                if listener.accept().await.is_err() {
                    break;
                }
            }
        });

        let candidates = vec!["192.0.2.1".to_string(), "127.0.0.1".to_string()];
        let found = probe_addresses(&candidates, port, Duration::from_secs(1)).await;
        assert_eq!(found, Some("127.0.0.1".to_string()));
    }

    #[tokio::test]
    async fn probe_returns_none_when_nothing_listens() {
        let candidates = vec!["127.0.0.1".to_string()];
        let found = probe_addresses(&candidates, 1, Duration::from_millis(200)).await;
        assert_eq!(found, None);
    }
}
