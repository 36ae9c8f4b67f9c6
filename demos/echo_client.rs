//! Echo client example
//!
//! Connects to the echo server on 127.0.0.1:20000, sends five greetings one
//! second apart, and prints the echoes.

use rust_tcp_session::{CallbackHandler, Connector, Session, SessionConfig, ShutdownSignal};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let stream = Connector::connect_str("127.0.0.1:20000", &ShutdownSignal::new()).await?;

    let handler = CallbackHandler::new(|_, data| {
        println!("[Recv] {}", String::from_utf8_lossy(data));
        Ok(data.len())
    });
    let session = Session::new(Arc::new(handler), SessionConfig::default())?;
    session.initialize(stream)?;
    println!("Connected to {}", session.remote());

    for i in 0..5 {
        let message = format!("Hello, world! {}", i);
        session.write(message.as_bytes())?;
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    println!(
        "Sent {} bytes, received {} bytes",
        session.bytes_sent(),
        session.bytes_received()
    );
    session.disconnect();

    Ok(())
}
