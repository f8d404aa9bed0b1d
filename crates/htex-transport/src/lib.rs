//! Message-oriented transport (component C2): identity-preserving
//! DEALER/ROUTER-style sockets over TCP, reusing the protocol's own
//! `<len>\n<bytes>` frame shape at the transport level.

mod dealer;
mod error;
mod frame;
mod router;

pub use dealer::DealerSocket;
pub use error::TransportError;
pub use frame::LineFramedCodec;
pub use router::RouterSocket;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping(u32);

    #[tokio::test]
    async fn dealer_and_router_exchange_identity_tagged_messages() {
        let mut router = RouterSocket::bind("127.0.0.1", (0, 0)).await.unwrap();
        let port = router.port();

        let mut dealer = DealerSocket::connect(("127.0.0.1", port), "worker-1".to_string())
            .await
            .unwrap();

        dealer.send(&Ping(7)).await.unwrap();
        let (identity, msg): (String, Ping) = router.recv(Duration::from_secs(2)).await.unwrap();
        assert_eq!(identity, "worker-1");
        assert_eq!(msg, Ping(7));

        router.send(&identity, &Ping(8)).unwrap();
        let reply: Ping = dealer.recv(Duration::from_secs(2)).await.unwrap();
        assert_eq!(reply, Ping(8));
    }

    #[tokio::test]
    async fn router_recv_times_out_when_idle() {
        let mut router = RouterSocket::bind("127.0.0.1", (0, 0)).await.unwrap();
        let err = router.recv::<Ping>(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout));
    }
}
