//! The shared spatial grid.
//!
//! A fixed-size 2D array of cells. Each cell carries two terrain slots and
//! the set of players standing in it. Cells are locked individually, so
//! input loops of players in different cells never contend.

use crate::config::WorldConfig;
use crate::error::GridError;
use crate::player::PlayerId;
use parking_lot::{Mutex, RwLock};
use protocol::Position;
use rand::Rng;
use std::fmt;

/// Number of terrain slots per cell.
const SLOTS: usize = 2;

/// The two terrain slots of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Walls and blocks.
    Terrain,
    /// Bombs.
    Bomb,
}

impl Slot {
    #[inline]
    const fn index(self) -> usize {
        match self {
            Slot::Terrain => 0,
            Slot::Bomb => 1,
        }
    }
}

/// Column/row coordinates of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellIndex {
    pub x: i32,
    pub y: i32,
}

impl CellIndex {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for CellIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// What a terrain slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tile {
    #[default]
    Empty,
    /// Indestructible wall.
    Wall,
    /// Destructible block.
    Block,
    /// A bomb with a burning fuse.
    Bomb,
}

impl Tile {
    #[inline]
    pub fn is_accessible(self) -> bool {
        matches!(self, Tile::Empty)
    }
}

/// One grid unit: terrain slots plus occupants.
#[derive(Debug, Default)]
pub struct Cell {
    slots: RwLock<[Tile; SLOTS]>,
    occupants: Mutex<Vec<PlayerId>>,
}

impl Cell {
    /// A cell is enterable only if both slots are accessible.
    pub fn is_accessible(&self) -> bool {
        self.slots.read().iter().all(|tile| tile.is_accessible())
    }

    pub fn occupants(&self) -> Vec<PlayerId> {
        self.occupants.lock().clone()
    }
}

/// Fixed-size grid shared by every session.
pub struct SpatialGrid {
    cell_size: i32,
    columns: usize,
    rows: usize,
    /// Row-major: index = y * columns + x.
    cells: Vec<Cell>,
}

impl SpatialGrid {
    /// Create an empty grid where every cell is accessible.
    pub fn new(cell_size: i32, columns: usize, rows: usize) -> Self {
        let mut cells = Vec::with_capacity(columns * rows);
        cells.resize_with(columns * rows, Cell::default);
        Self {
            cell_size,
            columns,
            rows,
            cells,
        }
    }

    /// Build the grid described by the world configuration.
    pub fn from_config(config: &WorldConfig, rng: &mut impl Rng) -> Self {
        let grid = Self::new(config.cell_size, config.columns, config.rows);
        let last_x = config.columns as i32 - 1;
        let last_y = config.rows as i32 - 1;
        let corners = [
            CellIndex::new(0, 0),
            CellIndex::new(last_x, 0),
            CellIndex::new(0, last_y),
            CellIndex::new(last_x, last_y),
        ];

        for index in grid.indices() {
            let tile = if config.pillars && index.x % 2 == 1 && index.y % 2 == 1 {
                Tile::Wall
            } else if config.block_density > 0.0
                && !corners.contains(&index)
                && rng.random_bool(config.block_density)
            {
                Tile::Block
            } else {
                continue;
            };
            if let Some(cell) = grid.cell(index) {
                cell.slots.write()[Slot::Terrain.index()] = tile;
            }
        }
        grid
    }

    #[inline]
    pub fn cell_size(&self) -> i32 {
        self.cell_size
    }

    #[inline]
    pub fn columns(&self) -> usize {
        self.columns
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Cell containing a world position. Negative coordinates map to
    /// negative (out-of-grid) indices.
    #[inline]
    pub fn cell_of(&self, pos: Position) -> CellIndex {
        CellIndex::new(pos.x.div_euclid(self.cell_size), pos.y.div_euclid(self.cell_size))
    }

    /// Top-left world position of a cell.
    #[inline]
    pub fn origin_of(&self, index: CellIndex) -> Position {
        Position::new(index.x * self.cell_size, index.y * self.cell_size)
    }

    #[inline]
    pub fn contains(&self, index: CellIndex) -> bool {
        index.x >= 0 && index.y >= 0 && (index.x as usize) < self.columns && (index.y as usize) < self.rows
    }

    pub fn cell(&self, index: CellIndex) -> Option<&Cell> {
        if !self.contains(index) {
            return None;
        }
        self.cells.get(index.y as usize * self.columns + index.x as usize)
    }

    fn cell_or_err(&self, index: CellIndex) -> Result<&Cell, GridError> {
        self.cell(index).ok_or(GridError::OutOfBounds(index))
    }

    /// All cell indices in row-major order.
    pub fn indices(&self) -> impl Iterator<Item = CellIndex> + '_ {
        (0..self.rows as i32).flat_map(move |y| (0..self.columns as i32).map(move |x| CellIndex::new(x, y)))
    }

    /// Whether a player may stand at `pos`.
    pub fn can_enter(&self, pos: Position) -> bool {
        self.cell(self.cell_of(pos)).is_some_and(Cell::is_accessible)
    }

    pub fn accessible_cells(&self) -> Vec<CellIndex> {
        self.indices()
            .filter(|&index| self.cell(index).is_some_and(Cell::is_accessible))
            .collect()
    }

    pub fn tile(&self, index: CellIndex, slot: Slot) -> Result<Tile, GridError> {
        Ok(self.cell_or_err(index)?.slots.read()[slot.index()])
    }

    /// Overwrite a slot, returning what it held before.
    pub fn set_tile(&self, index: CellIndex, slot: Slot, tile: Tile) -> Result<Tile, GridError> {
        let cell = self.cell_or_err(index)?;
        let mut slots = cell.slots.write();
        Ok(std::mem::replace(&mut slots[slot.index()], tile))
    }

    /// Set a slot only if it currently holds `expected`.
    pub fn replace_tile(
        &self,
        index: CellIndex,
        slot: Slot,
        expected: Tile,
        tile: Tile,
    ) -> Result<bool, GridError> {
        let cell = self.cell_or_err(index)?;
        let mut slots = cell.slots.write();
        if slots[slot.index()] != expected {
            return Ok(false);
        }
        slots[slot.index()] = tile;
        Ok(true)
    }

    /// Like [`replace_tile`](Self::replace_tile), but only while nobody
    /// stands in the cell. The occupant set stays locked across the check
    /// and the write.
    pub fn replace_tile_if_vacant(
        &self,
        index: CellIndex,
        slot: Slot,
        expected: Tile,
        tile: Tile,
    ) -> Result<bool, GridError> {
        let cell = self.cell_or_err(index)?;
        let occupants = cell.occupants.lock();
        if !occupants.is_empty() {
            return Ok(false);
        }
        let mut slots = cell.slots.write();
        if slots[slot.index()] != expected {
            return Ok(false);
        }
        slots[slot.index()] = tile;
        Ok(true)
    }

    pub fn occupants(&self, index: CellIndex) -> Vec<PlayerId> {
        self.cell(index).map(Cell::occupants).unwrap_or_default()
    }

    /// Every cell whose occupant set lists `player`.
    pub fn locate(&self, player: PlayerId) -> Vec<CellIndex> {
        self.indices()
            .filter(|&index| self.occupants(index).contains(&player))
            .collect()
    }

    pub fn add_occupant(&self, player: PlayerId, index: CellIndex) -> Result<(), GridError> {
        let mut occupants = self.cell_or_err(index)?.occupants.lock();
        if !occupants.contains(&player) {
            occupants.push(player);
        }
        Ok(())
    }

    pub fn remove_occupant(&self, player: PlayerId, index: CellIndex) -> Result<(), GridError> {
        let mut occupants = self.cell_or_err(index)?.occupants.lock();
        take(&mut occupants, player).ok_or(GridError::MissingOccupant { player, cell: index })
    }

    /// Migrate a player from one cell's occupant set to another's.
    ///
    /// Both cells are locked (lower index first) for the whole migration, so
    /// no observer ever sees the player in zero or two cells. If the player
    /// is missing from `from`, it is still added to `to` and the
    /// inconsistency is reported.
    pub fn move_occupant(&self, player: PlayerId, from: CellIndex, to: CellIndex) -> Result<(), GridError> {
        let source = self.cell_or_err(from)?;
        let target = self.cell_or_err(to)?;
        if from == to {
            return Ok(());
        }

        let (mut source_set, mut target_set) = if (from.y, from.x) < (to.y, to.x) {
            let s = source.occupants.lock();
            let t = target.occupants.lock();
            (s, t)
        } else {
            let t = target.occupants.lock();
            let s = source.occupants.lock();
            (s, t)
        };

        let found = take(&mut source_set, player);
        if !target_set.contains(&player) {
            target_set.push(player);
        }
        found.ok_or(GridError::MissingOccupant { player, cell: from })
    }
}

impl fmt::Debug for SpatialGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpatialGrid")
            .field("cell_size", &self.cell_size)
            .field("columns", &self.columns)
            .field("rows", &self.rows)
            .finish()
    }
}

fn take(occupants: &mut Vec<PlayerId>, player: PlayerId) -> Option<()> {
    let pos = occupants.iter().position(|&id| id == player)?;
    occupants.remove(pos);
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::sync::Arc;

    #[test]
    fn test_cell_of() {
        let grid = SpatialGrid::new(10, 50, 50);
        assert_eq!(grid.cell_of(Position::new(0, 0)), CellIndex::new(0, 0));
        assert_eq!(grid.cell_of(Position::new(19, 9)), CellIndex::new(1, 0));
        assert_eq!(grid.cell_of(Position::new(499, 499)), CellIndex::new(49, 49));
        assert_eq!(grid.cell_of(Position::new(-1, 0)), CellIndex::new(-1, 0));
    }

    #[test]
    fn test_can_enter_bounds() {
        let grid = SpatialGrid::new(10, 50, 50);
        assert!(grid.can_enter(Position::new(0, 0)));
        assert!(grid.can_enter(Position::new(499, 499)));
        assert!(!grid.can_enter(Position::new(500, 0)));
        assert!(!grid.can_enter(Position::new(0, 500)));
        assert!(!grid.can_enter(Position::new(-10, 0)));
        assert!(!grid.can_enter(Position::new(0, -1)));
    }

    #[test]
    fn test_can_enter_requires_both_slots() {
        let grid = SpatialGrid::new(10, 5, 5);
        let index = CellIndex::new(2, 0);
        let pos = grid.origin_of(index);
        assert!(grid.can_enter(pos));

        grid.set_tile(index, Slot::Bomb, Tile::Bomb).unwrap();
        assert!(!grid.can_enter(pos));
        grid.set_tile(index, Slot::Bomb, Tile::Empty).unwrap();
        assert!(grid.can_enter(pos));

        grid.set_tile(index, Slot::Terrain, Tile::Block).unwrap();
        assert!(!grid.can_enter(pos));
    }

    #[test]
    fn test_replace_tile() {
        let grid = SpatialGrid::new(10, 5, 5);
        let index = CellIndex::new(1, 1);
        assert!(grid.replace_tile(index, Slot::Bomb, Tile::Empty, Tile::Bomb).unwrap());
        assert!(!grid.replace_tile(index, Slot::Bomb, Tile::Empty, Tile::Bomb).unwrap());
        assert_eq!(grid.tile(index, Slot::Bomb).unwrap(), Tile::Bomb);
        assert_eq!(
            grid.tile(CellIndex::new(9, 9), Slot::Bomb),
            Err(GridError::OutOfBounds(CellIndex::new(9, 9)))
        );
    }

    #[test]
    fn test_slots_are_independent() {
        let grid = SpatialGrid::new(10, 5, 5);
        let index = CellIndex::new(3, 3);
        assert_eq!(grid.set_tile(index, Slot::Bomb, Tile::Bomb).unwrap(), Tile::Empty);
        assert_eq!(grid.tile(index, Slot::Terrain).unwrap(), Tile::Empty);
        assert_eq!(grid.set_tile(index, Slot::Terrain, Tile::Wall).unwrap(), Tile::Empty);
        assert_eq!(grid.tile(index, Slot::Bomb).unwrap(), Tile::Bomb);
    }

    #[test]
    fn test_replace_tile_if_vacant() {
        let grid = SpatialGrid::new(10, 5, 5);
        let index = CellIndex::new(1, 0);
        grid.add_occupant(4, index).unwrap();
        assert!(!grid.replace_tile_if_vacant(index, Slot::Bomb, Tile::Empty, Tile::Bomb).unwrap());
        assert_eq!(grid.tile(index, Slot::Bomb).unwrap(), Tile::Empty);

        grid.remove_occupant(4, index).unwrap();
        assert!(grid.replace_tile_if_vacant(index, Slot::Bomb, Tile::Empty, Tile::Bomb).unwrap());
        assert!(!grid.replace_tile_if_vacant(index, Slot::Bomb, Tile::Empty, Tile::Bomb).unwrap());
    }

    #[test]
    fn test_move_occupant() {
        let grid = SpatialGrid::new(10, 5, 5);
        let from = CellIndex::new(2, 2);
        let to = CellIndex::new(2, 1);
        grid.add_occupant(1, from).unwrap();

        grid.move_occupant(1, from, to).unwrap();
        assert!(grid.occupants(from).is_empty());
        assert_eq!(grid.occupants(to), vec![1]);
        assert_eq!(grid.locate(1), vec![to]);
    }

    #[test]
    fn test_move_occupant_missing_is_reported_and_healed() {
        let grid = SpatialGrid::new(10, 5, 5);
        let from = CellIndex::new(0, 0);
        let to = CellIndex::new(1, 0);

        let err = grid.move_occupant(7, from, to).unwrap_err();
        assert_eq!(err, GridError::MissingOccupant { player: 7, cell: from });
        assert_eq!(grid.occupants(to), vec![7]);
    }

    #[test]
    fn test_move_occupant_out_of_bounds_leaves_state() {
        let grid = SpatialGrid::new(10, 5, 5);
        let from = CellIndex::new(0, 0);
        grid.add_occupant(3, from).unwrap();

        let err = grid.move_occupant(3, from, CellIndex::new(-1, 0)).unwrap_err();
        assert_eq!(err, GridError::OutOfBounds(CellIndex::new(-1, 0)));
        assert_eq!(grid.locate(3), vec![from]);
    }

    #[test]
    fn test_shared_cell_holds_both_players() {
        let grid = SpatialGrid::new(10, 5, 5);
        grid.add_occupant(1, CellIndex::new(0, 0)).unwrap();
        grid.add_occupant(2, CellIndex::new(2, 0)).unwrap();

        grid.move_occupant(1, CellIndex::new(0, 0), CellIndex::new(1, 0)).unwrap();
        grid.move_occupant(2, CellIndex::new(2, 0), CellIndex::new(1, 0)).unwrap();

        let mut occupants = grid.occupants(CellIndex::new(1, 0));
        occupants.sort();
        assert_eq!(occupants, vec![1, 2]);
    }

    #[test]
    fn test_concurrent_migrations_keep_membership() {
        let grid = Arc::new(SpatialGrid::new(10, 4, 1));
        let a = CellIndex::new(0, 0);
        let b = CellIndex::new(1, 0);
        for id in 0..8u64 {
            grid.add_occupant(id, if id % 2 == 0 { a } else { b }).unwrap();
        }

        let handles: Vec<_> = (0..8u64)
            .map(|id| {
                let grid = Arc::clone(&grid);
                std::thread::spawn(move || {
                    let (mut here, mut there) = if id % 2 == 0 { (a, b) } else { (b, a) };
                    for _ in 0..1000 {
                        grid.move_occupant(id, here, there).unwrap();
                        std::mem::swap(&mut here, &mut there);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for id in 0..8u64 {
            assert_eq!(grid.locate(id).len(), 1, "player {id} must be in exactly one cell");
        }
        assert_eq!(grid.occupants(a).len() + grid.occupants(b).len(), 8);
    }

    #[test]
    fn test_layout_from_config() {
        let config = WorldConfig {
            cell_size: 10,
            columns: 5,
            rows: 5,
            pillars: true,
            block_density: 1.0,
        };
        let grid = SpatialGrid::from_config(&config, &mut StdRng::seed_from_u64(1));

        assert_eq!(grid.tile(CellIndex::new(1, 1), Slot::Terrain).unwrap(), Tile::Wall);
        assert_eq!(grid.tile(CellIndex::new(2, 1), Slot::Terrain).unwrap(), Tile::Block);
        assert_eq!(
            grid.accessible_cells(),
            vec![
                CellIndex::new(0, 0),
                CellIndex::new(4, 0),
                CellIndex::new(0, 4),
                CellIndex::new(4, 4)
            ]
        );
    }
}
