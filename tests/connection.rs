//! Test resocket connections against real listeners.

use std::io::{self, Read as _, Write as _};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use resocket::policy::{Failure, Stage};
use resocket::{AddressRing, Connection, Endpoint, Error, Received, ReconnectPolicy, State};

const DEADLINE: Duration = Duration::from_secs(5);
const TICK: Duration = Duration::from_millis(10);

/// Records every absorbed failure.
#[derive(Debug, Default)]
struct Recorder {
    failures: Mutex<Vec<(Stage, io::ErrorKind)>>,
}

impl Recorder {
    fn count(&self, stage: Stage) -> usize {
        self.failures
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| *s == stage)
            .count()
    }
}

impl ReconnectPolicy for Recorder {
    fn on_failure(&self, failure: &Failure<'_>) {
        self.failures
            .lock()
            .unwrap()
            .push((failure.stage(), failure.error().kind()));
    }
}

fn listen() -> (TcpListener, u16) {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    listener.set_nonblocking(true).unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn accept(listener: &TcpListener) -> TcpStream {
    let start = Instant::now();
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false).unwrap();
                stream.set_read_timeout(Some(DEADLINE)).unwrap();
                return stream;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock && start.elapsed() < DEADLINE => {
                thread::sleep(TICK)
            }
            Err(e) => panic!("accept failed: {e}"),
        }
    }
}

fn connect(port: u16, recorder: &Arc<Recorder>) -> Connection {
    Connection::builder()
        .with_policy(recorder.clone())
        .connect("127.0.0.1", port)
        .unwrap()
}

/// Send until the connection notices the peer has gone away.
fn send_until_broken(conn: &mut Connection, recorder: &Recorder) {
    let start = Instant::now();
    let before = recorder.count(Stage::Send);
    while recorder.count(Stage::Send) == before {
        assert!(start.elapsed() < DEADLINE, "send never failed");
        conn.send(b"test").unwrap();
        thread::sleep(TICK);
    }
}

/// Receive until something other than "would block" happens.
fn receive_until_ready(conn: &mut Connection, buf: &mut [u8]) -> Received {
    let start = Instant::now();
    loop {
        match conn.receive(buf).unwrap() {
            Received::WouldBlock if start.elapsed() < DEADLINE => thread::sleep(TICK),
            received => return received,
        }
    }
}

fn read_payload(client: &mut TcpStream) -> Vec<u8> {
    let mut buf = [0u8; 5];
    let n = client.read(&mut buf).unwrap();
    buf[..n].to_vec()
}

#[test]
fn resolution_failure() {
    let _ = tracing_subscriber::fmt::try_init();

    let err = Connection::connect("resocket.invalid", 4321).unwrap_err();
    match err {
        Error::Resolution(err) => assert_eq!(err.host(), "resocket.invalid"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn sane() {
    let _ = tracing_subscriber::fmt::try_init();

    let (listener, port) = listen();
    let conn = Connection::connect("127.0.0.1", port).unwrap();
    let _client = accept(&listener);

    assert_eq!(conn.state(), State::HandleInstalled);
    assert_eq!(conn.endpoint().unwrap().as_socket().unwrap().port(), port);
    assert_eq!(conn.peer_addr().unwrap().port(), port);
}

#[test]
fn send() {
    let _ = tracing_subscriber::fmt::try_init();

    let (listener, port) = listen();
    let mut conn = Connection::connect("127.0.0.1", port).unwrap();
    let mut client = accept(&listener);

    conn.send(b"test").unwrap();
    assert_eq!(read_payload(&mut client), b"test");
}

#[test]
fn send_reconnect() {
    let _ = tracing_subscriber::fmt::try_init();

    let recorder = Arc::new(Recorder::default());
    let (listener, port) = listen();
    let mut conn = connect(port, &recorder);

    let client = accept(&listener);
    drop(client);

    send_until_broken(&mut conn, &recorder);
    assert_eq!(conn.state(), State::HandleInstalled);

    let mut client = accept(&listener);
    conn.send(b"test").unwrap();
    assert_eq!(read_payload(&mut client), b"test");
}

#[test]
fn receive() {
    let _ = tracing_subscriber::fmt::try_init();

    let (listener, port) = listen();
    let mut conn = Connection::connect("127.0.0.1", port).unwrap();
    let mut client = accept(&listener);

    let mut buf = [0u8; 4];
    assert_eq!(conn.receive(&mut buf).unwrap(), Received::WouldBlock);
    assert_eq!(conn.state(), State::HandleInstalled);

    client.write_all(b"test").unwrap();
    assert_eq!(receive_until_ready(&mut conn, &mut buf), Received::Data(4));
    assert_eq!(&buf, b"test");
}

#[test]
fn receive_reconnect() {
    let _ = tracing_subscriber::fmt::try_init();

    let recorder = Arc::new(Recorder::default());
    let (listener, port) = listen();
    let mut conn = connect(port, &recorder);

    let client = accept(&listener);
    drop(client);

    let mut buf = [0u8; 4];
    assert_eq!(
        receive_until_ready(&mut conn, &mut buf),
        Received::Reconnected
    );
    assert_eq!(recorder.count(Stage::Receive), 1);

    let mut client = accept(&listener);
    client.write_all(b"test").unwrap();

    assert_eq!(receive_until_ready(&mut conn, &mut buf), Received::Data(4));
    assert_eq!(&buf, b"test");
}

#[cfg(unix)]
#[test]
fn multiple_reconnect() {
    let _ = tracing_subscriber::fmt::try_init();

    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(Recorder::default());
    let (listener, port) = listen();

    let valid = Endpoint::tcp((Ipv4Addr::LOCALHOST, port).into());
    let invalid = Endpoint::unix(dir.path().join("missing.sock")).unwrap();
    let ring = AddressRing::new(vec![valid, invalid]).unwrap();

    let mut conn = Connection::builder()
        .with_policy(recorder.clone())
        .from_ring(ring);

    let client = accept(&listener);
    drop(client);

    // The break is noticed and the ring moves on to the unreachable entry,
    // which fails straight away.
    send_until_broken(&mut conn, &recorder);
    assert_eq!(conn.state(), State::NoHandle);
    assert_eq!(conn.ring().unwrap().position(), 1);
    assert_eq!(recorder.count(Stage::Connect), 1);

    thread::sleep(Duration::from_millis(50));
    assert_eq!(
        listener.accept().unwrap_err().kind(),
        io::ErrorKind::WouldBlock
    );

    // With no socket installed the next send wraps back to the first entry
    // and only opens a new connection.
    conn.send(b"test").unwrap();
    assert_eq!(conn.state(), State::HandleInstalled);
    assert_eq!(conn.ring().unwrap().position(), 0);
    let mut client = accept(&listener);

    conn.send(b"test").unwrap();
    assert_eq!(read_payload(&mut client), b"test");
}

#[cfg(unix)]
#[test]
fn unix_endpoint() {
    use std::os::unix::net::UnixListener;

    let _ = tracing_subscriber::fmt::try_init();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("resocket.sock");
    let listener = UnixListener::bind(&path).unwrap();

    let ring = AddressRing::new(vec![Endpoint::unix(&path).unwrap()]).unwrap();
    let mut conn = Connection::from_ring(ring);
    let (mut client, _) = listener.accept().unwrap();

    conn.send(b"test").unwrap();
    let mut buf = [0u8; 4];
    client.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"test");
}

#[test]
fn refused_endpoint_is_detected_on_next_operation() {
    let _ = tracing_subscriber::fmt::try_init();

    let recorder = Arc::new(Recorder::default());
    let port = {
        let (listener, port) = listen();
        drop(listener);
        port
    };

    let ring = AddressRing::new(vec![Endpoint::tcp((Ipv4Addr::LOCALHOST, port).into())]).unwrap();
    let mut conn = Connection::builder()
        .with_policy(recorder.clone())
        .from_ring(ring);

    // The refusal surfaces either synchronously or on the first read, and is
    // only ever seen by the policy.
    let mut buf = [0u8; 4];
    let start = Instant::now();
    while recorder.failures.lock().unwrap().is_empty() {
        assert!(start.elapsed() < DEADLINE, "refusal never observed");
        assert_ne!(conn.receive(&mut buf).unwrap().len(), Some(0));
        thread::sleep(TICK);
    }
}

#[test]
fn closed_connection() {
    let _ = tracing_subscriber::fmt::try_init();

    let (listener, port) = listen();
    let mut conn = Connection::connect("127.0.0.1", port).unwrap();
    let mut client = accept(&listener);

    conn.close();
    conn.close();
    assert_eq!(conn.state(), State::Closed);
    assert!(matches!(conn.send(b"test"), Err(Error::Closed)));

    let mut buf = [0u8; 4];
    assert_eq!(client.read(&mut buf).unwrap(), 0);
}

#[test]
fn socket_options() {
    let _ = tracing_subscriber::fmt::try_init();

    let (listener, port) = listen();
    let mut config = resocket::ConnectionConfig::default();
    config.nodelay = true;
    config.local_address_ipv4 = Some(Ipv4Addr::LOCALHOST);

    let mut conn = Connection::builder()
        .with_config(config)
        .connect("127.0.0.1", port)
        .unwrap();
    let mut client = accept(&listener);

    assert!(conn.config().nodelay);
    assert_eq!(
        conn.local_addr().unwrap().ip(),
        std::net::IpAddr::from(Ipv4Addr::LOCALHOST)
    );

    conn.send(b"test").unwrap();
    assert_eq!(read_payload(&mut client), b"test");
}
