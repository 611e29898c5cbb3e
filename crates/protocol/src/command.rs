//! Client -> Server control commands.

use crate::Position;

/// One of the four axis-aligned movement directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Left,
    Down,
    Right,
}

impl Direction {
    /// Unit vector for this direction. Screen coordinates: up is negative Y.
    #[inline]
    pub fn unit(self) -> Position {
        match self {
            Direction::Up => Position::new(0, -1),
            Direction::Left => Position::new(-1, 0),
            Direction::Down => Position::new(0, 1),
            Direction::Right => Position::new(1, 0),
        }
    }

    /// Displacement of one step of `step` units.
    #[inline]
    pub fn delta(self, step: i32) -> Position {
        self.unit() * step
    }
}

/// Parsed control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `w` / `a` / `s` / `d`.
    Move(Direction),
    /// `space`.
    PlaceBomb,
    /// Anything else. Ignored by the server.
    Unknown,
}

impl Command {
    /// Parse a command from the payload of a text frame.
    ///
    /// Surrounding whitespace is trimmed, except that a frame consisting of
    /// a single literal space is also accepted as bomb placement.
    pub fn parse(text: &str) -> Self {
        if text == " " {
            return Command::PlaceBomb;
        }
        match text.trim() {
            "w" => Command::Move(Direction::Up),
            "a" => Command::Move(Direction::Left),
            "s" => Command::Move(Direction::Down),
            "d" => Command::Move(Direction::Right),
            "space" => Command::PlaceBomb,
            _ => Command::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_movement_keys() {
        assert_eq!(Command::parse("w"), Command::Move(Direction::Up));
        assert_eq!(Command::parse("a"), Command::Move(Direction::Left));
        assert_eq!(Command::parse("s"), Command::Move(Direction::Down));
        assert_eq!(Command::parse("d"), Command::Move(Direction::Right));
        assert_eq!(Command::parse(" d\n"), Command::Move(Direction::Right));
    }

    #[test]
    fn test_parse_bomb() {
        assert_eq!(Command::parse("space"), Command::PlaceBomb);
        assert_eq!(Command::parse(" "), Command::PlaceBomb);
    }

    #[test]
    fn test_parse_unknown() {
        assert_eq!(Command::parse(""), Command::Unknown);
        assert_eq!(Command::parse("W"), Command::Unknown);
        assert_eq!(Command::parse("wasd"), Command::Unknown);
        assert_eq!(Command::parse("jump"), Command::Unknown);
    }

    #[test]
    fn test_direction_delta() {
        assert_eq!(Direction::Up.delta(10), Position::new(0, -10));
        assert_eq!(Direction::Left.delta(10), Position::new(-10, 0));
        assert_eq!(Direction::Down.delta(10), Position::new(0, 10));
        assert_eq!(Direction::Right.delta(10), Position::new(10, 0));

        let sum = [Direction::Up, Direction::Left, Direction::Down, Direction::Right]
            .iter()
            .fold(Position::ZERO, |acc, d| acc + d.delta(7));
        assert_eq!(sum, Position::ZERO);
    }
}
