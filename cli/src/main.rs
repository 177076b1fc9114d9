use std::time::Duration;

use constellation::mesh::{
    bus::MemoryBus,
    error::Error,
    session::{Frame, Geometry, RenderSink, Session, SessionConfig},
    wire::{Extent, Point, Viewport},
    DEFAULT_TOPIC,
};
use tokio::sync::mpsc;
use tracing::info;

/// A synthetic window drifting across a virtual screen, standing in for
/// the real environment's geometry query.
struct DriftingWindow {
    viewport: Viewport,
    velocity: Point,
}

impl DriftingWindow {
    fn new() -> Self {
        Self {
            viewport: Viewport {
                screen_offset: Point {
                    x: rand::random::<f64>() * 2000.0,
                    y: rand::random::<f64>() * 1000.0,
                },
                size: Extent { w: 800.0, h: 600.0 },
            },
            velocity: Point {
                x: rand::random::<f64>() * 10.0 - 5.0,
                y: rand::random::<f64>() * 10.0 - 5.0,
            },
        }
    }
}

impl Geometry for DriftingWindow {
    fn viewport(&mut self) -> Result<Viewport, Error> {
        self.viewport.screen_offset.x += self.velocity.x;
        self.viewport.screen_offset.y += self.velocity.y;
        Ok(self.viewport)
    }
}

/// Logs every 20th frame instead of drawing it.
struct LogSink {
    label: usize,
    frames: usize,
}

impl RenderSink for LogSink {
    fn render(&mut self, frame: &Frame) {
        self.frames += 1;
        if self.frames % 20 == 1 {
            info!(
                window = self.label,
                peers = frame.peers.len(),
                edges = frame.edges.len(),
                "frame"
            );
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let bus = MemoryBus::new();
    let mut running = Vec::new();
    for label in 0..3 {
        let session = Session::start(
            SessionConfig::builder().build(),
            bus.join(DEFAULT_TOPIC),
            DriftingWindow::new(),
            LogSink { label, frames: 0 },
        )
        .unwrap();
        info!(window = label, peer = %session.id(), "window opened");
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        running.push((shutdown_tx, tokio::spawn(session.run(shutdown_rx))));
    }

    tokio::time::sleep(Duration::from_secs(2)).await;

    for (shutdown_tx, _) in &running {
        let _ = shutdown_tx.send(());
    }
    for (_, task) in running {
        let _ = task.await;
    }
    info!("all windows closed");
}
