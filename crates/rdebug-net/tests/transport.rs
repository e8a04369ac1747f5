use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};

use rdebug_net::{Endpoint, SocketClient, SocketServer, Transport};

fn pump_until<T, F>(transport: &mut T, mut done: F) -> bool
where
    T: Transport,
    F: FnMut(&T) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        transport.update(10);
        if done(transport) {
            return true;
        }
    }
    false
}

fn connected_pair() -> (SocketServer, TcpStream)
{
    let mut server = SocketServer::listen(&Endpoint::loopback(0)).unwrap();
    let port = server.port();
    assert_ne!(port, 0);

    let client = TcpStream::connect(("127.0.0.1", port)).unwrap();
    assert!(pump_until(&mut server, |s| !s.is_closed()));
    (server, client)
}

#[test]
fn test_server_receives_bytes()
{
    let (mut server, mut client) = connected_pair();
    client.write_all(b"hello world").unwrap();

    assert!(pump_until(&mut server, |s| s.raw_peek() == 11));

    let mut too_big = [0u8; 32];
    assert!(!server.raw_recv(&mut too_big));
    assert_eq!(server.raw_peek(), 11);

    let mut hello = [0u8; 5];
    assert!(server.raw_recv(&mut hello));
    assert_eq!(&hello, b"hello");
    assert_eq!(server.raw_peek(), 6);
}

#[test]
fn test_server_sends_bytes()
{
    let (mut server, mut client) = connected_pair();
    assert!(server.raw_send(b"pong"));
    server.update(10);

    client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut buf = [0u8; 4];
    client.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"pong");
}

#[test]
fn test_peer_close_detected_without_io()
{
    let (mut server, client) = connected_pair();
    drop(client);
    assert!(pump_until(&mut server, |s| s.is_closed()));
    assert!(!server.raw_send(b"late"));
}

#[test]
fn test_second_client_is_rejected()
{
    let (mut server, _first) = connected_pair();
    let mut second = TcpStream::connect(("127.0.0.1", server.port())).unwrap();
    second.set_read_timeout(Some(Duration::from_millis(50))).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut rejected = false;
    while Instant::now() < deadline && !rejected {
        server.update(10);
        let mut buf = [0u8; 1];
        rejected = match second.read(&mut buf) {
            Ok(0) => true,
            Ok(_) => panic!("rejected client received data"),
            Err(e) => e.kind() == std::io::ErrorKind::ConnectionReset,
        };
    }
    assert!(rejected);
    assert!(!server.is_closed());
}

#[test]
fn test_close_is_idempotent()
{
    let (mut server, _client) = connected_pair();
    server.close();
    assert!(server.is_closed());
    assert_eq!(server.port(), 0);
    server.close();
    assert!(server.is_closed());
}

#[test]
fn test_reconnect_after_disconnect()
{
    let (mut server, client) = connected_pair();
    let port = server.port();
    drop(client);
    assert!(pump_until(&mut server, |s| s.is_closed()));

    let _again = TcpStream::connect(("127.0.0.1", port)).unwrap();
    assert!(pump_until(&mut server, |s| !s.is_closed()));
}

#[test]
fn test_client_connects_and_exchanges()
{
    let frontend = TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = Endpoint::new(frontend.local_addr().unwrap());

    let mut client = SocketClient::connect(&endpoint).unwrap();
    let (mut accepted, _) = frontend.accept().unwrap();
    assert!(pump_until(&mut client, |c| !c.is_closed()));

    assert!(client.raw_send(b"ping"));
    client.update(10);
    accepted.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut buf = [0u8; 4];
    accepted.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"ping");

    accepted.write_all(b"ack").unwrap();
    assert!(pump_until(&mut client, |c| c.raw_peek() == 3));

    client.close();
    assert!(client.is_closed());
}
