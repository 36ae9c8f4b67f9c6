//! Echo server example
//!
//! Listens on 0.0.0.0:20000 and writes every received byte back. Stop with
//! Ctrl+C.

use async_trait::async_trait;
use rust_tcp_session::{
    AcceptHandler, Listener, Session, SessionConfig, SessionHandler, ShutdownSignal,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;

/// Prints what arrives and sends it straight back
struct EchoHandler;

impl SessionHandler for EchoHandler {
    fn on_receive(&self, session: &Session, data: &[u8]) -> rust_tcp_session::Result<usize> {
        println!("[Recv] {}", String::from_utf8_lossy(data));
        session.write(data)?;
        Ok(data.len())
    }

    fn on_disconnect(&self, session: &Session, remote: &str) {
        println!(
            "[Disconnect] {} (ID: {}, uptime: {:?})",
            remote,
            session.id(),
            session.uptime()
        );
    }
}

struct EchoAcceptor {
    handler: Arc<EchoHandler>,
}

#[async_trait]
impl AcceptHandler for EchoAcceptor {
    async fn on_accept(&self, stream: TcpStream, peer: SocketAddr) -> rust_tcp_session::Result<()> {
        let session = Session::new(self.handler.clone(), SessionConfig::default())?;
        session.initialize(stream)?;
        println!("[Accept] {}", peer);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let listener = Listener::new("0.0.0.0:20000");
    listener.initialize()?;

    let cancel = ShutdownSignal::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("\nShutting down...");
                cancel.trigger();
            }
        });
    }

    println!("Echo server listening on 0.0.0.0:20000 (Ctrl+C to stop)");

    let acceptor = Arc::new(EchoAcceptor {
        handler: Arc::new(EchoHandler),
    });
    listener.run(acceptor, &cancel).await?;
    listener.stop();

    Ok(())
}
