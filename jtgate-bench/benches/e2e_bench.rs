//! End-to-end benchmarks over a loopback terminal connection.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use jtgate_core::SessionRegistry;
use jtgate_protocol::{msg_id, BodyRegistry, Decoder, EmptyBody, Encoder, Header, Message, StreamDecoder};
use jtgate_server::{Dispatcher, PipelineConfig, Server, ServerConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::Mutex;

const TERMINAL: &str = "13800138000";

struct Terminal {
    stream: TcpStream,
    framer: StreamDecoder,
    encoder: Encoder,
    decoder: Decoder,
    serial: u16,
}

impl Terminal {
    async fn request(&mut self, message_id: u16) -> Message {
        self.serial = self.serial.wrapping_add(1);
        let message = Message::new(Header::new(message_id, TERMINAL, self.serial), EmptyBody);
        let bytes = self.encoder.encode(&message).unwrap();
        self.stream.write_all(&bytes).await.unwrap();

        let mut buf = [0u8; 512];
        loop {
            if let Some(raw) = self.framer.next_frame().unwrap() {
                return self.decoder.decode(&raw).unwrap();
            }
            let n = self.stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "gateway closed the connection");
            self.framer.extend(&buf[..n]);
        }
    }
}

struct TestSetup {
    _server: Arc<Server>,
    terminal: Mutex<Terminal>,
}

fn setup_gateway_and_terminal(rt: &Runtime) -> TestSetup {
    rt.block_on(async {
        let registry = Arc::new(BodyRegistry::with_defaults());
        let sessions = Arc::new(SessionRegistry::new(Duration::from_secs(1800)));
        let dispatcher = Arc::new(Dispatcher::new(&PipelineConfig::default(), sessions).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = Arc::new(Server::new(
            ServerConfig::new(addr),
            dispatcher,
            registry.clone(),
        ));
        let s = server.clone();
        tokio::spawn(async move { s.run_with_listener(listener).await });

        let mut terminal = Terminal {
            stream: TcpStream::connect(addr).await.unwrap(),
            framer: StreamDecoder::new(),
            encoder: Encoder::new(registry.clone()),
            decoder: Decoder::new(registry),
            serial: 0,
        };
        for id in [msg_id::REGISTRATION, msg_id::AUTHENTICATION, msg_id::HEARTBEAT] {
            terminal.request(id).await;
        }

        TestSetup {
            _server: server,
            terminal: Mutex::new(terminal),
        }
    })
}

fn bench_heartbeat_roundtrip(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let setup = setup_gateway_and_terminal(&rt);

    c.bench_function("e2e_heartbeat", |b| {
        b.to_async(&rt).iter(|| async {
            let mut terminal = setup.terminal.lock().await;
            black_box(terminal.request(msg_id::HEARTBEAT).await)
        });
    });
}

fn bench_location_roundtrip(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let setup = setup_gateway_and_terminal(&rt);

    c.bench_function("e2e_location_report", |b| {
        b.to_async(&rt).iter(|| async {
            let mut terminal = setup.terminal.lock().await;
            black_box(terminal.request(msg_id::LOCATION_REPORT).await)
        });
    });
}

criterion_group!(benches, bench_heartbeat_roundtrip, bench_location_roundtrip);
criterion_main!(benches);
