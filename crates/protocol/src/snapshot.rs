//! Server -> Client state payload.
//!
//! Every broadcast tick carries a JSON array of player snapshots in
//! registry order. The field names are what the browser client reads.

use crate::ProtocolError;
use serde::{Deserialize, Serialize};

/// Value copy of one player's public state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    #[serde(rename = "UserID")]
    pub id: u64,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "PositionX")]
    pub x: i32,
    #[serde(rename = "PositionY")]
    pub y: i32,
    #[serde(rename = "BombRadius")]
    pub bomb_radius: u32,
    #[serde(rename = "Alive")]
    pub alive: bool,
}

/// Serialize a full tick payload.
pub fn encode_snapshot(players: &[PlayerSnapshot]) -> Result<String, ProtocolError> {
    serde_json::to_string(players).map_err(ProtocolError::Encode)
}

/// Parse a tick payload (used by clients and tests).
pub fn decode_snapshot(payload: &str) -> Result<Vec<PlayerSnapshot>, ProtocolError> {
    serde_json::from_str(payload).map_err(ProtocolError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bomber(id: u64, x: i32, y: i32) -> PlayerSnapshot {
        PlayerSnapshot {
            id,
            name: format!("p{id}"),
            x,
            y,
            bomb_radius: 3,
            alive: true,
        }
    }

    #[test]
    fn test_wire_field_names() {
        let payload = encode_snapshot(&[bomber(7, 50, 100)]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        let entry = &value[0];
        assert_eq!(entry["UserID"], 7);
        assert_eq!(entry["Name"], "p7");
        assert_eq!(entry["PositionX"], 50);
        assert_eq!(entry["PositionY"], 100);
        assert_eq!(entry["BombRadius"], 3);
        assert_eq!(entry["Alive"], true);
    }

    #[test]
    fn test_order_is_preserved() {
        let players = vec![bomber(1, 0, 0), bomber(2, 10, 0), bomber(9, 20, 0)];
        let decoded = decode_snapshot(&encode_snapshot(&players).unwrap()).unwrap();
        let ids: Vec<u64> = decoded.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2, 9]);
    }

    #[test]
    fn test_empty_tick() {
        assert_eq!(encode_snapshot(&[]).unwrap(), "[]");
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(decode_snapshot("{not json"), Err(ProtocolError::Decode(_))));
    }
}
