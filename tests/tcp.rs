//! End to end tests over loopback TCP sockets.

use courier::{
    frame::{self, Frame},
    Delivery, Destination, DetachOutcome, NotSentReason, SenderConfig, SenderRegistry,
};
use tokio::{
    net::TcpListener,
    time::{timeout, Duration},
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn listener() -> (TcpListener, Destination) {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let destination = Destination::from(listener.local_addr().unwrap());
    (listener, destination)
}

#[tokio::test]
async fn frames_arrive_in_order() {
    let (listener, destination) = listener().await;
    let registry = SenderRegistry::new(SenderConfig::default());
    let sender = registry.sender(destination).await;

    let large = vec![0xAB; 100_000];
    let receipts = vec![
        sender.send_bytes(1, &b"hello"[..]),
        sender.send_bytes(2, large.clone()),
        sender.send_bytes(3, Vec::new()),
    ];

    let (mut socket, _) = listener.accept().await.unwrap();
    let frames = [
        frame::read_frame(&mut socket).await.unwrap().unwrap(),
        frame::read_frame(&mut socket).await.unwrap().unwrap(),
        frame::read_frame(&mut socket).await.unwrap().unwrap(),
    ];
    for receipt in receipts {
        assert_eq!(receipt.await, Delivery::Sent);
    }

    assert_eq!(
        frames[0],
        Frame {
            tag: 1,
            payload: b"hello"[..].into()
        }
    );
    assert_eq!(frames[1].tag, 2);
    assert_eq!(frames[1].payload.as_ref(), large.as_slice());
    assert_eq!(frames[2].tag, 3);
    assert!(frames[2].payload.is_empty());

    assert_eq!(sender.stop().await, DetachOutcome::Stopped);
    // The socket is shut down once the last handle detaches.
    assert!(frame::read_frame(&mut socket).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reconnects_lazily_once_the_peer_is_up() {
    let (listener, destination) = listener().await;
    drop(listener);

    let registry = SenderRegistry::new(SenderConfig::default().with_write_timeout(Duration::from_secs(5)));
    let sender = registry.sender(destination).await;

    assert_eq!(
        sender.send_bytes(1, &b"nobody home"[..]).await,
        Delivery::NotSent(NotSentReason::Io)
    );
    let connection = registry.connection(&destination).await.unwrap();
    assert_eq!(connection.stats().failed(), 1);

    let listener = TcpListener::bind(destination.socket_addr()).await.unwrap();
    let receipt = sender.send_bytes(2, &b"back online"[..]);
    let (mut socket, _) = listener.accept().await.unwrap();
    let frame = timeout(Duration::from_secs(5), frame::read_frame(&mut socket))
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(receipt.await, Delivery::Sent);
    assert_eq!(frame.tag, 2);
    assert_eq!(frame.payload.as_ref(), b"back online");

    sender.stop().await;
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn batching_delivers_everything_queued() {
    let (listener, destination) = listener().await;
    let registry = SenderRegistry::new(SenderConfig::default().with_batching(true));
    let sender = registry.sender(destination).await;

    let receipts: Vec<_> = (0..100u8).map(|i| sender.send_bytes(i, vec![i; i as usize])).collect();
    let (mut socket, _) = listener.accept().await.unwrap();
    for i in 0..100u8 {
        let frame = timeout(Duration::from_secs(5), frame::read_frame(&mut socket))
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(frame.tag, i);
        assert_eq!(frame.payload.len(), i as usize);
    }
    for receipt in receipts {
        assert_eq!(receipt.await, Delivery::Sent);
    }

    sender.stop().await;
}
