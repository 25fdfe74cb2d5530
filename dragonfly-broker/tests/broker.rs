use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

use dragonfly_broker::broker::{Broker, BrokerHandle, State};
use dragonfly_broker::config::BrokerConfig;

async fn start(config_text: &str) -> (BrokerHandle, SocketAddr) {
    let mut config = BrokerConfig::parse(config_text).expect("Could not parse test config");
    config.set_addr("127.0.0.1", 0);

    let broker = Broker::bind(config).await.expect("Could not bind test broker");
    let addr = broker.local_addr().unwrap();
    let handle = broker.handle();

    tokio::spawn(broker.run());

    return (handle, addr);
}

async fn recv_exact(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];

    timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .expect("Timed out waiting for a frame")
        .expect("Read failed");

    return buf;
}

async fn expect_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 1];
    let n = timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("Timed out waiting for the close")
        .expect("Read failed");

    assert_eq!(n, 0, "Expected the broker to close the connection");
}

async fn connect_anonymous(addr: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream.write_all(b"\x00\x00\x80\x00\x00\x00\x00").await.unwrap();
    assert_eq!(
        recv_exact(&mut stream, 8).await,
        b"\x00\x00\x10\x00\x00\x00\x01\x00"
    );

    return stream;
}

#[tokio::test]
async fn connect_without_credentials() {
    let (_handle, addr) = start("").await;

    connect_anonymous(addr).await;
}

#[tokio::test]
async fn connect_with_matching_user() {
    let (_handle, addr) = start(
        "# General\nrequire_auth true\n\n# User\nusername User\npassword Pwd\n",
    )
    .await;

    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(b"\x00\x00\x83\x00\x00\x00\x0b\x00\x04User\x00\x03Pwd")
        .await
        .unwrap();

    assert_eq!(
        recv_exact(&mut stream, 8).await,
        b"\x00\x00\x10\x00\x00\x00\x01\x00"
    );
}

#[tokio::test]
async fn connect_with_unknown_user_is_refused() {
    let (_handle, addr) = start(
        "# General\nrequire_auth true\n\n# User\nusername User\npassword Pwd\n",
    )
    .await;

    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(b"\x00\x00\x83\x00\x00\x00\x0b\x00\x04Nope\x00\x03Pwd")
        .await
        .unwrap();

    assert_eq!(
        recv_exact(&mut stream, 8).await,
        b"\x00\x00\x10\x00\x00\x00\x01\x81"
    );

    expect_closed(&mut stream).await;
}

#[tokio::test]
async fn subscribe_then_publish_fans_out() {
    let (_handle, addr) = start("").await;

    let mut a = connect_anonymous(addr).await;
    let mut b = connect_anonymous(addr).await;

    // A subscribes to the pattern `.`
    a.write_all(b"\x00\x00\xc0\x00\x00\x00\x03\x00\x01.")
        .await
        .unwrap();
    assert_eq!(
        recv_exact(&mut a, 8).await,
        b"\x00\x00\x50\x00\x00\x00\x01\x00"
    );

    // B publishes Body on topic `.`
    b.write_all(b"\x00\x00\xa0\x00\x00\x00\x09\x00\x01.\x00\x04Body")
        .await
        .unwrap();

    // A receives the copy with the origin bit rewritten to server
    assert_eq!(
        recv_exact(&mut a, 16).await,
        b"\x00\x00\x20\x00\x00\x00\x09\x00\x01.\x00\x04Body"
    );

    // B receives the PUBLISHED ack
    assert_eq!(
        recv_exact(&mut b, 8).await,
        b"\x00\x00\x30\x00\x00\x00\x01\x00"
    );
}

#[tokio::test]
async fn publisher_subscribed_to_itself_receives_a_copy() {
    let (_handle, addr) = start("").await;

    let mut a = connect_anonymous(addr).await;

    a.write_all(b"\x00\x00\xc0\x00\x00\x00\x03\x00\x01.")
        .await
        .unwrap();
    assert_eq!(
        recv_exact(&mut a, 8).await,
        b"\x00\x00\x50\x00\x00\x00\x01\x00"
    );

    a.write_all(b"\x00\x00\xa0\x00\x00\x00\x09\x00\x01x\x00\x04Self")
        .await
        .unwrap();

    // delivery is queued before the ack, on the same send path
    assert_eq!(
        recv_exact(&mut a, 16).await,
        b"\x00\x00\x20\x00\x00\x00\x09\x00\x01x\x00\x04Self"
    );
    assert_eq!(
        recv_exact(&mut a, 8).await,
        b"\x00\x00\x30\x00\x00\x00\x01\x00"
    );
}

#[tokio::test]
async fn duplicate_subscribe_is_a_no_op() {
    let (_handle, addr) = start("").await;

    let mut a = connect_anonymous(addr).await;

    a.write_all(b"\x00\x00\xc0\x00\x00\x00\x03\x00\x01.")
        .await
        .unwrap();
    assert_eq!(
        recv_exact(&mut a, 8).await,
        b"\x00\x00\x50\x00\x00\x00\x01\x00"
    );

    a.write_all(b"\x00\x00\xc0\x00\x00\x00\x03\x00\x01.")
        .await
        .unwrap();
    assert_eq!(
        recv_exact(&mut a, 8).await,
        b"\x00\x00\x50\x00\x00\x00\x01\x01"
    );
}

#[tokio::test]
async fn unsubscribe_then_again_is_a_no_op() {
    let (_handle, addr) = start("").await;

    let mut a = connect_anonymous(addr).await;

    a.write_all(b"\x00\x00\xc0\x00\x00\x00\x03\x00\x01.")
        .await
        .unwrap();
    assert_eq!(
        recv_exact(&mut a, 8).await,
        b"\x00\x00\x50\x00\x00\x00\x01\x00"
    );

    a.write_all(b"\x00\x00\xe0\x00\x00\x00\x03\x00\x01.")
        .await
        .unwrap();
    assert_eq!(
        recv_exact(&mut a, 8).await,
        b"\x00\x00\x70\x00\x00\x00\x01\x00"
    );

    a.write_all(b"\x00\x00\xe0\x00\x00\x00\x03\x00\x01.")
        .await
        .unwrap();
    assert_eq!(
        recv_exact(&mut a, 8).await,
        b"\x00\x00\x70\x00\x00\x00\x01\x01"
    );
}

#[tokio::test]
async fn graceful_disconnect_clears_subscriptions() {
    let (_handle, addr) = start("").await;

    let mut a = connect_anonymous(addr).await;

    a.write_all(b"\x00\x00\xc0\x00\x00\x00\x03\x00\x01.")
        .await
        .unwrap();
    assert_eq!(
        recv_exact(&mut a, 8).await,
        b"\x00\x00\x50\x00\x00\x00\x01\x00"
    );

    // CONNECT with the disconnect flag
    a.write_all(b"\x00\x00\x84\x00\x00\x00\x00").await.unwrap();
    assert_eq!(
        recv_exact(&mut a, 8).await,
        b"\x00\x00\x14\x00\x00\x00\x01\x00"
    );
    expect_closed(&mut a).await;

    // the broker keeps serving: a publish on the vacated pattern acks
    // without a stale delivery
    let mut b = connect_anonymous(addr).await;
    b.write_all(b"\x00\x00\xa0\x00\x00\x00\x09\x00\x01.\x00\x04Body")
        .await
        .unwrap();
    assert_eq!(
        recv_exact(&mut b, 8).await,
        b"\x00\x00\x30\x00\x00\x00\x01\x00"
    );
}

#[tokio::test]
async fn malformed_frame_is_dropped_and_the_session_survives() {
    let (_handle, addr) = start("").await;

    let mut a = connect_anonymous(addr).await;

    // subscribe with a non-UTF-8 pattern byte: decode fails, frame dropped
    a.write_all(b"\x00\x00\xc0\x00\x00\x00\x03\x00\x01\xff")
        .await
        .unwrap();

    // the session is still open and frame aligned
    a.write_all(b"\x00\x00\xc0\x00\x00\x00\x03\x00\x01.")
        .await
        .unwrap();
    assert_eq!(
        recv_exact(&mut a, 8).await,
        b"\x00\x00\x50\x00\x00\x00\x01\x00"
    );
}

#[tokio::test]
async fn unparseable_pattern_is_refused_with_a_failure_code() {
    let (_handle, addr) = start("").await;

    let mut a = connect_anonymous(addr).await;

    // subscribe to `(`
    a.write_all(b"\x00\x00\xc0\x00\x00\x00\x03\x00\x01(")
        .await
        .unwrap();
    assert_eq!(
        recv_exact(&mut a, 8).await,
        b"\x00\x00\x50\x00\x00\x00\x01\x82"
    );
}

#[tokio::test]
async fn publish_before_connect_is_refused() {
    let (_handle, addr) = start("").await;

    let mut a = TcpStream::connect(addr).await.unwrap();

    a.write_all(b"\x00\x00\xa0\x00\x00\x00\x09\x00\x01.\x00\x04Body")
        .await
        .unwrap();
    assert_eq!(
        recv_exact(&mut a, 8).await,
        b"\x00\x00\x30\x00\x00\x00\x01\x81"
    );
}

#[tokio::test]
async fn rights_rules_gate_publish_and_subscribe() {
    let (_handle, addr) = start("# General\ntopic secret !pub|!sub\n").await;

    let mut a = connect_anonymous(addr).await;

    // publish on the denied topic: refused
    a.write_all(b"\x00\x00\xa0\x00\x00\x00\x0c\x00\x06secret\x00\x02hi")
        .await
        .unwrap();
    assert_eq!(
        recv_exact(&mut a, 8).await,
        b"\x00\x00\x30\x00\x00\x00\x01\x81"
    );

    // subscribe to the denied topic: refused
    a.write_all(b"\x00\x00\xc0\x00\x00\x00\x08\x00\x06secret")
        .await
        .unwrap();
    assert_eq!(
        recv_exact(&mut a, 8).await,
        b"\x00\x00\x50\x00\x00\x00\x01\x81"
    );

    // an unrelated topic stays allowed
    a.write_all(b"\x00\x00\xa0\x00\x00\x00\x0a\x00\x04open\x00\x02hi")
        .await
        .unwrap();
    assert_eq!(
        recv_exact(&mut a, 8).await,
        b"\x00\x00\x30\x00\x00\x00\x01\x00"
    );
}

#[tokio::test]
async fn stop_drains_to_stopped() {
    let (handle, addr) = start("").await;

    // the broker reaches RUNNING once the accept loop is live
    connect_anonymous(addr).await;
    assert_eq!(handle.state(), State::Running);

    handle.stop();

    for _ in 0..50 {
        if handle.state() == State::Stopped {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(handle.state(), State::Stopped);
}
