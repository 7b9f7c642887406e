//! End-to-end tests over real TCP connections for both runtimes.

use hash_server::config::{Config, RuntimeType};
use hash_server::runtime::mio as mio_runtime;
use hash_server::runtime::pool::Server;
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const LF_RECORDS: &[u8] = b"1\n22\n333\n4444\n";
const CRLF_RECORDS: &[u8] = b"1\r\n22\r\n333\r\n4444\r\n";

/// Digests of `CRLF_RECORDS`, as produced by `telnet`-style input.
const CRLF_DIGESTS: &[u8] = b"F1B2F662800122BED0FF255693DF89C4487FBDCF453D3524A42D4EC20C3D9C04\n\
12D3A4EFA6646B3ECE4782F70033B9785BF0D167B553C43E22579B031CEA5C4D\n\
F407DF8F8E7A374565BBFF2C11FCF2B37FBBC6F070CA9E1317240FC9A90C6675\n\
4A325BE077D8A33AD25ED3462CD232AE8367AF77F8070E8E4090670BE7ECBA5A\n";

const COPIES: usize = 4 * 1024;

fn test_config(buffer_size: usize, runtime: RuntimeType) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        buffer_size,
        runtime,
        ..Config::default()
    }
}

async fn start_pool(buffer_size: usize) -> SocketAddr {
    start_pool_with(test_config(buffer_size, RuntimeType::Pool)).await
}

async fn start_pool_with(config: Config) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::new(config);
    tokio::spawn(async move {
        server
            .serve(listener, std::future::pending::<()>())
            .await
            .unwrap();
    });
    addr
}

fn start_mio(buffer_size: usize) -> SocketAddr {
    start_mio_with(test_config(buffer_size, RuntimeType::Mio))
}

fn start_mio_with(config: Config) -> SocketAddr {
    let listener = mio_runtime::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || mio_runtime::serve(0, listener, &config));
    addr
}

/// Send `input`, close the sending side and collect everything sent back.
///
/// Writing and reading run concurrently so large replies cannot stall the
/// server on a full socket buffer.
async fn exchange(addr: SocketAddr, input: Vec<u8>) -> Vec<u8> {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (mut reader, mut writer) = stream.into_split();

    let send = tokio::spawn(async move {
        writer.write_all(&input).await.unwrap();
        writer.shutdown().await.unwrap();
    });

    let mut reply = Vec::new();
    reader.read_to_end(&mut reply).await.unwrap();
    send.await.unwrap();
    reply
}

fn expected_lines(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for record in input.split_inclusive(|&b| b == b'\n') {
        out.extend_from_slice(hex::encode_upper(Sha256::digest(record)).as_bytes());
        out.push(b'\n');
    }
    out
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn crlf_records_match_published_digests() {
    for buffer_size in [1, 2, 3, 2048] {
        let addr = start_pool(buffer_size).await;
        let reply = exchange(addr, CRLF_RECORDS.repeat(COPIES)).await;

        assert_eq!(reply.len(), CRLF_DIGESTS.len() * COPIES, "buffer {buffer_size}");
        assert!(
            reply.chunks(CRLF_DIGESTS.len()).all(|c| c == CRLF_DIGESTS),
            "buffer {buffer_size}"
        );
        // The reply is never an echo of the input.
        assert_ne!(reply, CRLF_RECORDS.repeat(COPIES));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_byte_buffer_matches_large_buffer() {
    let input = LF_RECORDS.repeat(COPIES);

    let small = exchange(start_pool(1).await, input.clone()).await;
    let large = exchange(start_pool(2048).await, input.clone()).await;

    assert_eq!(small, large);
    assert_eq!(small, expected_lines(&input));
    assert_eq!(small.split(|&b| b == b'\n').count() - 1, 4 * COPIES);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unterminated_record_flushed_on_disconnect() {
    let addr = start_pool(2048).await;
    let reply = exchange(addr, b"abc".to_vec()).await;
    assert_eq!(
        reply,
        b"BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD\n"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn empty_connection_gets_no_reply() {
    let addr = start_pool(2048).await;
    assert!(exchange(addr, Vec::new()).await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_connections_are_isolated() {
    let addr = start_pool(7).await;

    let inputs: Vec<Vec<u8>> = (0..16)
        .map(|i| {
            (0..500)
                .map(|n| format!("connection {i} record {n}\n"))
                .collect::<String>()
                .into_bytes()
        })
        .collect();

    let tasks: Vec<_> = inputs
        .iter()
        .cloned()
        .map(|input| tokio::spawn(exchange(addr, input)))
        .collect();

    for (input, task) in inputs.iter().zip(tasks) {
        assert_eq!(task.await.unwrap(), expected_lines(input));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mio_runtime_matches_pool_runtime() {
    let input = LF_RECORDS.repeat(COPIES);

    let mio_reply = exchange(start_mio(3), input.clone()).await;
    let pool_reply = exchange(start_pool(2048).await, input.clone()).await;

    assert_eq!(mio_reply, pool_reply);
    assert_eq!(mio_reply, expected_lines(&input));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mio_runtime_serves_concurrent_connections() {
    let addr = start_mio(1);

    let first = b"alpha\nbeta\ngamma".to_vec();
    let second = b"one\r\ntwo\r\n".repeat(100);

    let (a, b) = tokio::join!(exchange(addr, first.clone()), exchange(addr, second.clone()));

    assert_eq!(a, expected_lines(&first));
    assert_eq!(b, expected_lines(&second));
}

/// With a single slot, a second client waits in the backlog until the first
/// one leaves, then gets its full reply.
async fn second_client_waits_for_free_slot(addr: SocketAddr) {
    let mut first = TcpStream::connect(addr).await.unwrap();
    first.write_all(b"a\n").await.unwrap();
    let mut line = [0u8; 65];
    first.read_exact(&mut line).await.unwrap();
    assert_eq!(&line[..], &expected_lines(b"a\n")[..]);

    let mut second = tokio::spawn(exchange(addr, b"x\n".to_vec()));
    assert!(
        tokio::time::timeout(Duration::from_millis(200), &mut second)
            .await
            .is_err(),
        "second client served while the only slot was taken"
    );

    drop(first);
    assert_eq!(second.await.unwrap(), expected_lines(b"x\n"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pool_runtime_queues_connections_over_limit() {
    let config = Config {
        max_connections: 1,
        ..test_config(2048, RuntimeType::Pool)
    };
    second_client_waits_for_free_slot(start_pool_with(config).await).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mio_runtime_queues_connections_over_limit() {
    let config = Config {
        max_connections: 1,
        ..test_config(2048, RuntimeType::Mio)
    };
    second_client_waits_for_free_slot(start_mio_with(config)).await;
}
