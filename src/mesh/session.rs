use std::time::Duration;

use tokio::{select, sync::mpsc, time};
use tracing::{debug, debug_span, trace, warn, Instrument};
use typed_builder::TypedBuilder;

use super::{
    bus::Transport,
    error::Error,
    registry::PeerRegistry,
    wire::{random_color, Payload, PeerId, Point, PositionRecord, Viewport},
    DEFAULT_TICK,
};

/// Injected position source. The session asks it for the current window
/// geometry once per tick; it never computes geometry itself.
pub trait Geometry {
    fn viewport(&mut self) -> Result<Viewport, Error>;

    /// A tracked point distinct from the window geometry, for sessions that
    /// follow a cursor or marker. Most don't.
    fn focus_point(&mut self) -> Option<Point> {
        None
    }
}

/// Outbound boundary to the render layer. A pure consumer: it receives a
/// frame every tick and nothing flows back into the session.
pub trait RenderSink {
    /// Called once before the first announce. An error here means the
    /// required render surface is absent, which is a fatal configuration
    /// problem: the session never starts.
    fn open(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn render(&mut self, frame: &Frame);
}

/// What the render layer gets each tick: the full snapshot plus every
/// ordered peer pair to connect.
#[derive(Debug)]
pub struct Frame {
    pub peers: Vec<PositionRecord>,
    pub edges: Vec<(PeerId, PeerId)>,
}

#[derive(TypedBuilder)]
pub struct SessionConfig {
    #[builder(default = DEFAULT_TICK)]
    pub tick_period: Duration,
    /// Render color carried in every announce.
    #[builder(default = Some(random_color()), setter(strip_option, into))]
    pub color: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    Starting,
    Running,
    /// Terminal; no transition leaves it.
    Stopped,
}

/// One window's heartbeat loop.
///
/// Owns the registry outright: transport receipt, ticks and shutdown run
/// as non-overlapping turns of one select! loop, so no locking is needed
/// and a snapshot taken within a turn can never be invalidated mid-pass.
/// [`tick`](Session::tick) and [`handle_raw`](Session::handle_raw) are the
/// whole of the loop body and are public, so tests drive turns directly
/// instead of depending on wall-clock timers.
pub struct Session<T, G, R> {
    state: SessionState,
    id: PeerId,
    color: Option<String>,
    tick_period: Duration,
    registry: PeerRegistry,
    transport: T,
    incoming: Option<mpsc::UnboundedReceiver<String>>,
    geometry: G,
    render: R,
}

impl<T, G, R> Session<T, G, R>
where
    T: Transport,
    G: Geometry,
    R: RenderSink,
{
    /// Brings a session from `Starting` to `Running`: opens the render
    /// sink, computes the initial position, registers self locally and
    /// publishes the first announce.
    pub fn start(
        config: SessionConfig,
        mut transport: T,
        mut geometry: G,
        mut render: R,
    ) -> Result<Self, Error> {
        render.open()?;
        let incoming =
            transport.take_incoming().ok_or(Error::TransportClosed)?;

        let mut session = Self {
            state: SessionState::Starting,
            id: PeerId::generate(),
            color: config.color,
            tick_period: config.tick_period,
            registry: PeerRegistry::new(),
            transport,
            incoming: Some(incoming),
            geometry,
            render,
        };
        let viewport = session.geometry.viewport()?;
        let record = session.own_record(viewport);
        session.registry.upsert(record.clone());
        session.transport.publish(&Payload::Announce(record))?;
        session.state = SessionState::Running;
        debug!(peer = %session.id, "session joined the mesh");
        Ok(session)
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Takes the receiving half of the transport, for callers that pump
    /// messages into [`handle_raw`](Session::handle_raw) themselves rather
    /// than through [`run`](Session::run).
    pub fn take_incoming(
        &mut self,
    ) -> Option<mpsc::UnboundedReceiver<String>> {
        self.incoming.take()
    }

    /// One heartbeat turn: recompute own position, upsert it, announce it,
    /// hand the current frame to the render layer. A geometry or publish
    /// failure aborts this turn only; entries for other peers are
    /// untouched and the next tick proceeds normally.
    pub fn tick(&mut self) {
        if self.state != SessionState::Running {
            return;
        }
        let viewport = match self.geometry.viewport() {
            Ok(viewport) => viewport,
            Err(e) => {
                warn!(peer = %self.id, "skipping tick, geometry unavailable: {e}");
                return;
            }
        };
        let record = self.own_record(viewport);
        self.registry.upsert(record.clone());
        if let Err(e) = self.transport.publish(&Payload::Announce(record)) {
            warn!(peer = %self.id, "skipping tick, announce failed: {e}");
            return;
        }
        let frame = Frame {
            peers: self.registry.snapshot(),
            edges: self.registry.pairs(),
        };
        self.render.render(&frame);
    }

    /// Applies one raw message off the transport. Malformed input is
    /// dropped without touching the registry; echoes of our own id are
    /// ignored defensively even though the bus should not loop them back.
    pub fn handle_raw(&mut self, raw: &str) {
        let payload = match Payload::decode(raw) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(peer = %self.id, "dropping undecodable message: {e}");
                return;
            }
        };
        match payload {
            Payload::Announce(record) => {
                if record.id == self.id {
                    return;
                }
                trace!(peer = %self.id, from = %record.id, "announce");
                self.registry.upsert(record);
            }
            Payload::Depart { id } => {
                if id == self.id {
                    return;
                }
                debug!(peer = %self.id, from = %id, "peer departed");
                self.registry.remove(id);
            }
        }
    }

    /// `Running -> Stopped`: publish our departure and release the
    /// transport. Idempotent; a second call is a no-op.
    pub fn shutdown(&mut self) {
        if self.state == SessionState::Stopped {
            return;
        }
        self.state = SessionState::Stopped;
        if let Err(e) =
            self.transport.publish(&Payload::Depart { id: self.id })
        {
            // best effort: peers that miss this keep a stale entry
            debug!(peer = %self.id, "departure announce failed: {e}");
        }
        self.transport.close();
        debug!(peer = %self.id, "session stopped");
    }

    /// Drives the session on wall-clock ticks until something arrives on
    /// `shutdown_rx`. A tick already in flight when shutdown arrives
    /// completes first; none fire after.
    pub async fn run(mut self, mut shutdown_rx: mpsc::UnboundedReceiver<()>) {
        let span = debug_span!("session", peer = %self.id);
        async move {
            let mut incoming = match self.incoming.take() {
                Some(incoming) => incoming,
                None => {
                    warn!("incoming half already taken, not running");
                    return;
                }
            };
            let mut ticks = time::interval(self.tick_period);
            ticks.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                select! {
                    _ = ticks.tick() => self.tick(),
                    Some(raw) = incoming.recv() => self.handle_raw(&raw),
                    _ = shutdown_rx.recv() => {
                        self.shutdown();
                        break;
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    fn own_record(&mut self, viewport: Viewport) -> PositionRecord {
        PositionRecord {
            id: self.id,
            screen_offset: viewport.screen_offset,
            size: viewport.size,
            color: self.color.clone(),
            focus_point: self.geometry.focus_point(),
        }
    }
}
