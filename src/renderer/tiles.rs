//! Film tiling.

/// Rectangle of film pixels rendered in one estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tile {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Tile {
    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && x - self.x < self.width && y - self.y < self.height
    }
}

/// Row-major tiles covering a `width` x `height` film. Edge tiles are
/// clipped to the film.
#[derive(Debug, Clone)]
pub struct Tiles {
    width: u32,
    height: u32,
    tile_width: u32,
    tile_height: u32,
    x: u32,
    y: u32,
}

pub fn tiles(width: u32, height: u32, tile_width: u32, tile_height: u32) -> Tiles {
    Tiles {
        width,
        height,
        tile_width: tile_width.max(1),
        tile_height: tile_height.max(1),
        x: 0,
        y: 0,
    }
}

impl Iterator for Tiles {
    type Item = Tile;

    fn next(&mut self) -> Option<Tile> {
        if self.width == 0 || self.y >= self.height {
            return None;
        }
        let tile = Tile {
            x: self.x,
            y: self.y,
            width: self.tile_width.min(self.width - self.x),
            height: self.tile_height.min(self.height - self.y),
        };
        self.x += self.tile_width;
        if self.x >= self.width {
            self.x = 0;
            self.y += self.tile_height;
        }
        Some(tile)
    }
}

impl Tiles {
    /// Number of tiles, including clipped edge tiles.
    pub fn count_total(&self) -> usize {
        let across = self.width.div_ceil(self.tile_width) as usize;
        let down = self.height.div_ceil(self.tile_height) as usize;
        across * down
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_tiles_are_clipped() {
        let all: Vec<Tile> = tiles(5, 3, 2, 2).collect();
        assert_eq!(all.len(), 6);
        assert_eq!(tiles(5, 3, 2, 2).count_total(), 6);
        assert_eq!(
            all[2],
            Tile {
                x: 4,
                y: 0,
                width: 1,
                height: 2
            }
        );
        assert_eq!(all[5].height, 1);
        assert_eq!(all.iter().map(Tile::pixel_count).sum::<usize>(), 15);
    }

    #[test]
    fn test_tile_larger_than_film() {
        let all: Vec<Tile> = tiles(4, 4, 1920, 1080).collect();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].pixel_count(), 16);
        assert!(all[0].contains(3, 3));
        assert!(!all[0].contains(4, 0));
    }

    #[test]
    fn test_empty_film() {
        assert_eq!(tiles(0, 4, 2, 2).count(), 0);
    }
}
