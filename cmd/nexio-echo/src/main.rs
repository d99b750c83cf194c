//! Echo server demo
//!
//! A blocking acceptor thread feeds sockets into the I/O system; every
//! worker runs the same echo initializer.
//!
//! Usage:
//!     cargo run --release -p nexio-echo [port]
//!
//! Test with:
//!     echo "hello" | nc localhost 9000

use std::io;
use std::net::TcpListener;
use std::time::Duration;

use tracing::{error, info, warn};

use nexio::{
    ConnectionCtx, ConnectionHandler, Context, DisconnectCause, Initializer, IoConfig, IoSystem,
    WorkerItem, WorkerNotification,
};

struct EchoHandler {
    context: Context,
}

impl WorkerItem for EchoHandler {
    fn context(&self) -> &Context {
        &self.context
    }
}

impl ConnectionHandler for EchoHandler {
    fn on_connected(&mut self, conn: &mut ConnectionCtx<'_>) {
        info!(id = %conn.id(), peer = ?conn.peer_addr(), "client connected");
    }

    fn on_bytes(&mut self, conn: &mut ConnectionCtx<'_>, data: &[u8]) -> io::Result<()> {
        conn.write(data);
        Ok(())
    }

    fn on_disconnected(&mut self, cause: DisconnectCause) {
        info!(id = %self.context.id(), %cause, "client disconnected");
    }
}

struct EchoInitializer;

impl Initializer for EchoInitializer {
    fn on_connect(&mut self, ctx: Context) -> io::Result<Box<dyn ConnectionHandler>> {
        Ok(Box::new(EchoHandler { context: ctx }))
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let port: u16 = std::env::args()
        .nth(1)
        .and_then(|p| p.parse().ok())
        .unwrap_or(9000);

    let config = IoConfig::default().max_idle_time(Some(Duration::from_secs(60)));
    let system = IoSystem::start(config).expect("failed to start I/O system");

    let (server, notifications) = system.new_server("echo");
    system
        .register_server(&server, || {
            Ok(Box::new(EchoInitializer) as Box<dyn Initializer>)
        })
        .expect("failed to register echo server");

    // Drain server notifications in the background
    std::thread::spawn(move || {
        for note in notifications {
            match note {
                WorkerNotification::ServerRegistered(id) => {
                    info!(server = %id, "registered on a worker");
                }
                WorkerNotification::ConnectionRefused { attempt, .. } => {
                    warn!(attempt, "connection refused");
                }
                other => info!(notification = ?other, "server notification"),
            }
        }
    });

    let listener = TcpListener::bind(("0.0.0.0", port)).expect("failed to bind listener");
    info!(port, "echo server listening");

    loop {
        match listener.accept() {
            Ok((socket, peer)) => {
                info!(%peer, "accepted");
                if let Err(e) = system.accept(&server, socket, 1) {
                    error!(error = %e, "failed to hand socket to a worker");
                    break;
                }
            }
            Err(e) => {
                error!(error = %e, "accept failed");
                break;
            }
        }
    }

    system.shutdown();
}
