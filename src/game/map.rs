//! Tile Map
//!
//! The static level geometry: a row-major grid of cells parsed from a
//! plain-text description. Two text forms exist: the on-disk authoring
//! format (no header, dimensions inferred from the lines) and the wire
//! format (a `"<width>,<height>"` header line, used for MapData payloads).
//!
//! All collision queries are in pixel space; the grid itself never errors
//! on out-of-bounds access - everything outside the map reads as Empty.

use std::fs;
use std::path::Path;

use crate::game::state::Vec2;
use crate::MAX_PLAYERS;

/// Edge length of one tile, in pixels.
pub const TILE_SIZE: f32 = 32.0;

/// Upper bound on grid size accepted from the wire (cells).
const MAX_CELLS: usize = 1 << 20;

/// One cell of the grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CellKind {
    /// Traversable air.
    #[default]
    Empty,
    /// Collectible coin; consumed on first pickup.
    Coin,
    /// Electric hazard; lethal outside the grace window.
    Electric,
}

impl CellKind {
    /// Map a text character to a cell. Anything unrecognized is Empty.
    pub fn from_char(c: char) -> Self {
        match c {
            'c' => CellKind::Coin,
            'e' => CellKind::Electric,
            _ => CellKind::Empty,
        }
    }

    /// Text character for this cell.
    pub fn to_char(self) -> char {
        match self {
            CellKind::Empty => '_',
            CellKind::Coin => 'c',
            CellKind::Electric => 'e',
        }
    }
}

/// Map construction errors. All are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    /// Failed to read the map file.
    #[error("failed to read map file: {0}")]
    Io(#[from] std::io::Error),

    /// The map text contained no lines at all.
    #[error("map is empty")]
    Empty,

    /// The wire format's dimension header is missing or unparseable.
    #[error("malformed map header: {0:?}")]
    BadHeader(String),

    /// Declared dimensions exceed the accepted grid size.
    #[error("map too large: {0}x{1}")]
    TooLarge(usize, usize),
}

/// The tile grid plus derived spawn points.
///
/// Cells are stored row-major; `cells.len() == width * height` always holds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileMap {
    width: usize,
    height: usize,
    cells: Vec<CellKind>,
}

impl TileMap {
    fn with_dimensions(width: usize, height: usize) -> Result<Self, MapError> {
        let cell_count = width
            .checked_mul(height)
            .ok_or(MapError::TooLarge(width, height))?;
        if cell_count > MAX_CELLS {
            return Err(MapError::TooLarge(width, height));
        }
        Ok(Self {
            width,
            height,
            cells: vec![CellKind::Empty; cell_count],
        })
    }

    /// Fill rows from text lines, clamping to the declared bounds: long
    /// lines are cut at `width`, short lines and missing rows stay Empty.
    fn fill_rows<'a>(&mut self, rows: impl Iterator<Item = &'a str>) {
        for (y, line) in rows.take(self.height).enumerate() {
            for (x, c) in line.chars().take(self.width).enumerate() {
                self.cells[y * self.width + x] = CellKind::from_char(c);
            }
        }
    }

    /// Parse the wire format: a `"<width>,<height>"` header line followed
    /// by `height` rows of cell characters.
    pub fn parse(text: &str) -> Result<Self, MapError> {
        let mut lines = text.lines();
        let header = lines.next().ok_or(MapError::Empty)?;

        let (w, h) = header
            .split_once(',')
            .ok_or_else(|| MapError::BadHeader(header.to_string()))?;
        let width: usize = w
            .trim()
            .parse()
            .map_err(|_| MapError::BadHeader(header.to_string()))?;
        let height: usize = h
            .trim()
            .parse()
            .map_err(|_| MapError::BadHeader(header.to_string()))?;
        if width == 0 || height == 0 {
            return Err(MapError::BadHeader(header.to_string()));
        }

        let mut map = Self::with_dimensions(width, height)?;
        map.fill_rows(lines);
        Ok(map)
    }

    /// Parse the on-disk authoring format, which carries no header:
    /// height is the line count and width the length of the first line.
    pub fn from_layout(text: &str) -> Result<Self, MapError> {
        let lines: Vec<&str> = text.lines().collect();
        let first = lines.first().ok_or(MapError::Empty)?;
        let width = first.chars().count();
        if width == 0 {
            return Err(MapError::Empty);
        }

        let mut map = Self::with_dimensions(width, lines.len())?;
        map.fill_rows(lines.into_iter());
        Ok(map)
    }

    /// Load a map file in the authoring format.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MapError> {
        let text = fs::read_to_string(path)?;
        Self::from_layout(&text)
    }

    /// Serialize to the wire format. Inverse of [`TileMap::parse`].
    pub fn serialize(&self) -> String {
        let mut out = String::with_capacity((self.width + 1) * (self.height + 1) + 8);
        out.push_str(&format!("{},{}\n", self.width, self.height));
        for y in 0..self.height {
            for x in 0..self.width {
                out.push(self.cells[y * self.width + x].to_char());
            }
            out.push('\n');
        }
        out
    }

    /// Grid width in tiles.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Grid height in tiles.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Map width in pixels.
    pub fn width_px(&self) -> f32 {
        self.width as f32 * TILE_SIZE
    }

    /// Map height in pixels.
    pub fn height_px(&self) -> f32 {
        self.height as f32 * TILE_SIZE
    }

    /// Cell at tile coordinates. Out-of-bounds coordinates (including
    /// negative ones) read as Empty.
    pub fn cell_at(&self, x: i32, y: i32) -> CellKind {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return CellKind::Empty;
        }
        self.cells[y as usize * self.width + x as usize]
    }

    /// Overwrite a cell. No-op out of bounds.
    pub fn set_cell(&mut self, x: i32, y: i32, kind: CellKind) {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return;
        }
        self.cells[y as usize * self.width + x as usize] = kind;
    }

    /// Number of cells of the given kind currently on the grid.
    pub fn count(&self, kind: CellKind) -> usize {
        self.cells.iter().filter(|c| **c == kind).count()
    }

    /// Inclusive tile index range `(x0, y0, x1, y1)` covered by a
    /// pixel-space axis-aligned box.
    pub fn tile_span(x: f32, y: f32, w: f32, h: f32) -> (i32, i32, i32, i32) {
        (
            (x / TILE_SIZE).floor() as i32,
            (y / TILE_SIZE).floor() as i32,
            ((x + w) / TILE_SIZE).floor() as i32,
            ((y + h) / TILE_SIZE).floor() as i32,
        )
    }

    /// Whether any tile touched by the pixel-space box holds `kind`.
    pub fn rect_overlaps(&self, x: f32, y: f32, w: f32, h: f32, kind: CellKind) -> bool {
        let (x0, y0, x1, y1) = Self::tile_span(x, y, w, h);
        for ty in y0..=y1 {
            for tx in x0..=x1 {
                if self.cell_at(tx, ty) == kind {
                    return true;
                }
            }
        }
        false
    }

    /// Spawn point for every roster slot: the same fixed tile,
    /// `(2, height - 3)` clamped into bounds, in pixel coordinates.
    /// The spawn tile is not scanned for hazards; the grace window at
    /// match start absorbs a hazardous spawn.
    pub fn start_positions(&self) -> [Vec2; MAX_PLAYERS] {
        let tx = 2.min(self.width - 1);
        let ty = self.height.saturating_sub(3);
        let spawn = Vec2::new(tx as f32 * TILE_SIZE, ty as f32 * TILE_SIZE);
        [spawn; MAX_PLAYERS]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::collection::vec;
    use proptest::prelude::*;

    const SAMPLE: &str = "4,2\n_c__\n_e__\n";

    #[test]
    fn test_parse_sample() {
        let map = TileMap::parse(SAMPLE).unwrap();
        assert_eq!(map.width(), 4);
        assert_eq!(map.height(), 2);
        assert_eq!(map.cell_at(1, 0), CellKind::Coin);
        assert_eq!(map.cell_at(1, 1), CellKind::Electric);
        assert_eq!(map.cell_at(0, 0), CellKind::Empty);
    }

    #[test]
    fn test_parse_rejects_bad_header() {
        assert!(matches!(TileMap::parse(""), Err(MapError::Empty)));
        assert!(matches!(
            TileMap::parse("4x2\n____\n____\n"),
            Err(MapError::BadHeader(_))
        ));
        assert!(matches!(
            TileMap::parse("four,2\n____\n____\n"),
            Err(MapError::BadHeader(_))
        ));
        assert!(matches!(
            TileMap::parse("0,2\n"),
            Err(MapError::BadHeader(_))
        ));
    }

    #[test]
    fn test_parse_clamps_ragged_lines() {
        // Short first row, overlong second row, missing third row.
        let map = TileMap::parse("4,3\nc\n__eee\n").unwrap();
        assert_eq!(map.cell_at(0, 0), CellKind::Coin);
        assert_eq!(map.cell_at(1, 0), CellKind::Empty);
        assert_eq!(map.cell_at(2, 1), CellKind::Electric);
        assert_eq!(map.cell_at(3, 1), CellKind::Electric);
        // Character 5 of row 1 fell outside the declared width.
        assert_eq!(map.cell_at(0, 2), CellKind::Empty);
        assert_eq!(map.count(CellKind::Electric), 2);
    }

    #[test]
    fn test_serialize_round_trips_sample() {
        let map = TileMap::parse(SAMPLE).unwrap();
        assert_eq!(map.serialize(), SAMPLE);
        assert_eq!(TileMap::parse(&map.serialize()).unwrap(), map);
    }

    #[test]
    fn test_layout_format_infers_dimensions() {
        let map = TileMap::from_layout("____\n_c_e\n____\n").unwrap();
        assert_eq!(map.width(), 4);
        assert_eq!(map.height(), 3);
        assert_eq!(map.cell_at(1, 1), CellKind::Coin);
        assert_eq!(map.cell_at(3, 1), CellKind::Electric);
        assert!(matches!(TileMap::from_layout(""), Err(MapError::Empty)));
    }

    #[test]
    fn test_cell_at_out_of_bounds_is_empty() {
        let map = TileMap::parse(SAMPLE).unwrap();
        assert_eq!(map.cell_at(-1, 0), CellKind::Empty);
        assert_eq!(map.cell_at(0, -1), CellKind::Empty);
        assert_eq!(map.cell_at(4, 0), CellKind::Empty);
        assert_eq!(map.cell_at(0, 2), CellKind::Empty);
        assert_eq!(map.cell_at(i32::MIN, i32::MAX), CellKind::Empty);
    }

    #[test]
    fn test_set_cell_out_of_bounds_is_noop() {
        let mut map = TileMap::parse(SAMPLE).unwrap();
        let before = map.clone();
        map.set_cell(-1, 0, CellKind::Electric);
        map.set_cell(99, 99, CellKind::Coin);
        assert_eq!(map, before);

        map.set_cell(1, 0, CellKind::Empty);
        assert_eq!(map.cell_at(1, 0), CellKind::Empty);
    }

    #[test]
    fn test_rect_overlaps() {
        let map = TileMap::parse(SAMPLE).unwrap();
        // A player-sized box sitting on the coin tile.
        assert!(map.rect_overlaps(TILE_SIZE, 0.0, 32.0, 32.0, CellKind::Coin));
        // Partial coverage still counts.
        assert!(map.rect_overlaps(TILE_SIZE - 8.0, 4.0, 8.0, 8.0, CellKind::Coin));
        // A box entirely over empty tiles.
        assert!(!map.rect_overlaps(0.0, 0.0, 8.0, 8.0, CellKind::Electric));
        // Boxes fully outside the grid never overlap anything.
        assert!(!map.rect_overlaps(-200.0, -200.0, 32.0, 32.0, CellKind::Coin));
    }

    #[test]
    fn test_start_positions_fixed_policy() {
        let map = TileMap::parse("10,6\n").unwrap();
        let starts = map.start_positions();
        assert_eq!(starts.len(), MAX_PLAYERS);
        for p in starts {
            assert_eq!(p.x, 2.0 * TILE_SIZE);
            assert_eq!(p.y, 3.0 * TILE_SIZE);
        }

        // Tiny maps clamp the spawn tile into bounds.
        let tiny = TileMap::parse("2,2\n").unwrap();
        let starts = tiny.start_positions();
        assert_eq!(starts[0].x, TILE_SIZE);
        assert_eq!(starts[0].y, 0.0);
    }

    fn arb_cell() -> impl Strategy<Value = CellKind> {
        prop_oneof![
            Just(CellKind::Empty),
            Just(CellKind::Coin),
            Just(CellKind::Electric),
        ]
    }

    fn arb_map() -> impl Strategy<Value = TileMap> {
        (1usize..24, 1usize..12).prop_flat_map(|(width, height)| {
            vec(arb_cell(), width * height).prop_map(move |cells| TileMap {
                width,
                height,
                cells,
            })
        })
    }

    proptest! {
        #[test]
        fn prop_serialize_parse_round_trips(map in arb_map()) {
            let parsed = TileMap::parse(&map.serialize()).unwrap();
            prop_assert_eq!(parsed, map);
        }

        #[test]
        fn prop_cell_at_never_panics(map in arb_map(), x in any::<i32>(), y in any::<i32>()) {
            let _ = map.cell_at(x, y);
        }
    }
}
