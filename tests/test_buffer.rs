//! Tests for the fixed-region I/O buffer

use conduit::proxy::buffer::{IoBuffer, IoStatus};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

#[test]
fn test_append_and_window() {
    let mut buf = IoBuffer::new(64);
    assert!(buf.is_empty());
    assert_eq!(buf.capacity(), 64);
    assert_eq!(buf.free_size(), 64);

    assert!(buf.append(b"abc"));
    assert!(buf.append_str("def"));
    assert_eq!(buf.as_slice(), b"abcdef");
    assert_eq!(buf.len(), 6);
    assert_eq!(buf.free_size(), 58);
}

#[test]
fn test_append_uint_formats_decimal() {
    let mut buf = IoBuffer::new(64);
    assert!(buf.append_uint(0));
    assert!(buf.append(b" "));
    assert!(buf.append_uint(12345));
    assert!(buf.append(b" "));
    assert!(buf.append_uint(u64::MAX));
    assert_eq!(buf.as_slice(), b"0 12345 18446744073709551615");
}

#[test]
fn test_append_refuses_overflow() {
    let mut buf = IoBuffer::new(4);
    assert!(buf.append(b"abcd"));
    assert!(!buf.append(b"e"));
    assert_eq!(buf.as_slice(), b"abcd");
    assert_eq!(buf.free_size(), 0);
}

#[test]
fn test_shrink_front_and_reset() {
    let mut buf = IoBuffer::new(16);
    assert!(buf.append(b"headbody"));
    buf.shrink_front(4);
    assert_eq!(buf.as_slice(), b"body");

    // the region behind the window is not reclaimed until reset
    assert_eq!(buf.free_size(), 8);
    buf.reset();
    assert!(buf.is_empty());
    assert_eq!(buf.free_size(), 16);
}

#[test]
fn test_swap_exchanges_regions_without_copying() {
    let mut a = IoBuffer::new(8);
    let mut b = IoBuffer::new(8);
    assert!(a.append(b"aaa"));
    assert!(b.append(b"bb"));
    let a_region = a.as_slice().as_ptr();
    let b_region = b.as_slice().as_ptr();

    a.swap(&mut b);

    assert_eq!(a.as_slice(), b"bb");
    assert_eq!(b.as_slice(), b"aaa");
    assert_eq!(b.as_slice().as_ptr(), a_region);
    assert_eq!(a.as_slice().as_ptr(), b_region);
}

async fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).await.unwrap();
    let (server, _) = listener.accept().await.unwrap();
    (client, server)
}

async fn recv_ready(buf: &mut IoBuffer, stream: &TcpStream) -> IoStatus {
    loop {
        stream.readable().await.unwrap();
        match buf.recv(stream) {
            IoStatus::WouldBlock => continue,
            status => return status,
        }
    }
}

#[tokio::test]
async fn test_recv_reads_available_bytes() {
    let (stream, mut peer) = socket_pair().await;
    peer.write_all(b"hello").await.unwrap();

    let mut buf = IoBuffer::new(64);
    match recv_ready(&mut buf, &stream).await {
        IoStatus::Ok(n) => assert!(n > 0),
        status => panic!("unexpected status: {:?}", status),
    }
    assert_eq!(buf.as_slice(), b"hello");
}

#[tokio::test]
async fn test_recv_without_data_would_block() {
    let (stream, _peer) = socket_pair().await;
    let mut buf = IoBuffer::new(64);
    assert!(matches!(buf.recv(&stream), IoStatus::WouldBlock));
    assert!(buf.is_empty());
}

#[tokio::test]
async fn test_recv_reports_peer_shutdown() {
    let (stream, peer) = socket_pair().await;
    drop(peer);

    let mut buf = IoBuffer::new(64);
    match recv_ready(&mut buf, &stream).await {
        IoStatus::Shutdown => {}
        status => panic!("unexpected status: {:?}", status),
    }
}

#[tokio::test]
async fn test_recv_reports_full_without_reading() {
    let (stream, mut peer) = socket_pair().await;
    peer.write_all(b"hello world").await.unwrap();

    let mut buf = IoBuffer::new(4);
    loop {
        match recv_ready(&mut buf, &stream).await {
            IoStatus::Ok(_) => continue,
            IoStatus::Full => break,
            status => panic!("unexpected status: {:?}", status),
        }
    }
    assert_eq!(buf.as_slice(), b"hell");
    assert_eq!(buf.free_size(), 0);
    // still full on the next attempt, without touching the socket
    assert!(matches!(buf.recv(&stream), IoStatus::Full));
}

#[tokio::test]
async fn test_send_drains_the_window() {
    let (stream, mut peer) = socket_pair().await;
    let mut buf = IoBuffer::new(64);
    assert!(buf.append(b"response"));

    loop {
        stream.writable().await.unwrap();
        match buf.send(&stream) {
            IoStatus::Ok(_) if buf.is_empty() => break,
            IoStatus::Ok(_) | IoStatus::WouldBlock => continue,
            status => panic!("unexpected status: {:?}", status),
        }
    }

    let mut received = [0u8; 8];
    tokio::io::AsyncReadExt::read_exact(&mut peer, &mut received)
        .await
        .unwrap();
    assert_eq!(&received, b"response");
}
