//! In-process relay walkthrough with the passthrough engine
//!
//! Run with: cargo run --example passthrough
//!
//! Plays the whole flow without any network transport: a publisher pushes
//! chunk payloads, a live subscriber drains a channel sink, and a snapshot
//! requester grabs the most recent frame, all against the identity
//! "remux" engine.

use std::sync::Arc;

use bytes::Bytes;
use streamhub::{BufferSink, ChannelSink, ContextTable, PassthroughEngine, Sink, StreamHub};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("streamhub=debug".parse()?),
        )
        .init();

    let contexts = Arc::new(ContextTable::new());
    let engine = Arc::new(PassthroughEngine::new(contexts.clone()));
    let hub = Arc::new(StreamHub::new(engine, contexts));

    // Publisher attaches and its read loop starts driving the engine.
    let (publisher, sender) = hub.publish("cam", "h264")?;
    let running = publisher.spawn();

    // Live subscriber: frames arrive on a channel drained by this task.
    let (feed, mut feed_rx) = ChannelSink::channel();
    let feed: Arc<dyn Sink> = Arc::new(feed);
    {
        let hub = hub.clone();
        let feed = feed.clone();
        tokio::task::spawn_blocking(move || hub.subscribe("cam", "flv", feed)).await??;
    }
    let printer = tokio::spawn(async move {
        while let Some(frame) = feed_rx.recv().await {
            println!("live feed: {} bytes", frame.len());
        }
        println!("live feed ended");
    });

    // Publisher pushes a few chunks.
    for i in 0u8..5 {
        let payload = vec![i; 1024 + usize::from(i)];
        sender.send(Bytes::from(payload)).await?;
    }

    // Snapshot request, HTTP-style: one frame into a buffer. Retries while
    // the engine has not decoded anything yet.
    let snapshot = Arc::new(BufferSink::new());
    loop {
        let hub = hub.clone();
        let sink = snapshot.clone();
        match tokio::task::spawn_blocking(move || hub.snapshot("cam", "mjpeg", sink)).await? {
            Ok(()) => break,
            Err(e) => {
                println!("snapshot not ready ({}), retrying", e);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
        }
    }
    println!("snapshot: {} bytes", snapshot.take().len());

    // Consumer walks away, publisher closes.
    hub.unsubscribe("cam", &feed);
    drop(feed); // last sink clone gone, the printer's channel ends
    drop(sender);
    running.await??;
    printer.await?;

    println!("streams left: {}", hub.stream_count());
    Ok(())
}
