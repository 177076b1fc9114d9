use std::fmt;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::Error;

/// Stable identifier for one live session. Generated once at startup and
/// carried inside every message, so receivers can key their registries
/// without caring which connection a message arrived on.
#[derive(
    Serialize,
    Deserialize,
    Clone,
    Copy,
    Debug,
    Hash,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
)]
pub struct PeerId(Uuid);

impl PeerId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct Extent {
    pub w: f64,
    pub h: f64,
}

/// Window geometry as reported by the environment on each tick: the window
/// origin in the shared virtual-screen coordinate space plus the current
/// viewport dimensions.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Viewport {
    pub screen_offset: Point,
    pub size: Extent,
}

/// A session's self-reported state at its last announce. Everything in here
/// besides `id` is best effort: the only copy that is ever authoritative is
/// the one the owning session recomputes locally every tick.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PositionRecord {
    pub id: PeerId,
    pub screen_offset: Point,
    pub size: Extent,
    /// Render color, chosen once per session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// A tracked point distinct from the window geometry, for collaborators
    /// that follow a cursor or marker rather than the window itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus_point: Option<Point>,
}

impl PositionRecord {
    pub fn from_viewport(id: PeerId, viewport: Viewport) -> Self {
        Self {
            id,
            screen_offset: viewport.screen_offset,
            size: viewport.size,
            color: None,
            focus_point: None,
        }
    }

    /// The window's center point, which is where renderers draw this peer
    /// and anchor its edges.
    pub fn center(&self) -> Point {
        Point {
            x: self.screen_offset.x + self.size.w / 2.0,
            y: self.screen_offset.y + self.size.h / 2.0,
        }
    }
}

/// Everything that crosses the bus. There is no version field; an older
/// peer either rejects an unknown tag at decode time or fills absent
/// optional fields with `None`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum Payload {
    /// "I am here (or still here) at this position." Sent once at join and
    /// once per heartbeat tick thereafter.
    Announce(PositionRecord),
    /// "I am leaving." Sent exactly once, at controlled shutdown.
    Depart { id: PeerId },
}

impl Payload {
    pub fn encode(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Palette a session picks its render color from.
pub const COLORS: [&str; 7] =
    ["red", "green", "yellow", "blue", "black", "magenta", "cyan"];

pub fn random_color() -> String {
    COLORS
        .choose(&mut rand::thread_rng())
        .expect("palette is non-empty")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(color: Option<&str>) -> PositionRecord {
        PositionRecord {
            id: PeerId::generate(),
            screen_offset: Point { x: 120.0, y: 48.0 },
            size: Extent { w: 800.0, h: 600.0 },
            color: color.map(str::to_string),
            focus_point: Some(Point { x: 520.0, y: 348.0 }),
        }
    }

    #[test]
    fn announce_round_trips() {
        let original = Payload::Announce(record(Some("magenta")));
        let raw = original.encode().unwrap();
        let parsed = Payload::decode(&raw).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn depart_is_tagged() {
        let id = PeerId::generate();
        let raw = Payload::Depart { id }.encode().unwrap();
        assert!(raw.contains("\"type\":\"Depart\""));
        assert_eq!(Payload::decode(&raw).unwrap(), Payload::Depart { id });
    }

    #[test]
    fn missing_tag_is_rejected() {
        assert!(Payload::decode(r#"{"data":{"id":"x"}}"#).is_err());
        assert!(Payload::decode("not json at all").is_err());
        assert!(
            Payload::decode(r#"{"type":"Teleport","data":{}}"#).is_err()
        );
    }

    #[test]
    fn optional_fields_default_to_none() {
        let raw = format!(
            r#"{{"type":"Announce","data":{{"id":"{}","screen_offset":{{"x":0.0,"y":0.0}},"size":{{"w":800.0,"h":600.0}}}}}}"#,
            PeerId::generate()
        );
        match Payload::decode(&raw).unwrap() {
            Payload::Announce(rec) => {
                assert!(rec.color.is_none());
                assert!(rec.focus_point.is_none());
            }
            other => panic!("expected announce, got {other:?}"),
        }
    }

    #[test]
    fn center_is_offset_plus_half_size() {
        let rec = record(None);
        assert_eq!(rec.center(), Point { x: 520.0, y: 348.0 });
    }
}
