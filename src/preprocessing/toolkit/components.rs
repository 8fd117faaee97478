use crate::preprocessing::types::Rect;

use super::BinaryMask;

/// A 4-connected region of set pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Component {
    pub area: usize,
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl Component {
    pub fn bbox(&self) -> Rect {
        Rect::new(
            self.min_x,
            self.min_y,
            self.max_x - self.min_x + 1,
            self.max_y - self.min_y + 1,
        )
    }
}

/// Label 4-connected components with an explicit-stack flood fill.
/// Components come out in row-major order of their first pixel.
pub fn label_components(mask: &BinaryMask) -> Vec<Component> {
    let (w, h) = (mask.width(), mask.height());
    let mut visited = vec![false; w as usize * h as usize];
    let mut components = Vec::new();
    let mut stack: Vec<(u32, u32)> = Vec::new();

    for y in 0..h {
        for x in 0..w {
            let idx = y as usize * w as usize + x as usize;
            if visited[idx] || !mask.get(x, y) {
                continue;
            }

            visited[idx] = true;
            stack.push((x, y));
            let mut comp = Component {
                area: 0,
                min_x: x,
                min_y: y,
                max_x: x,
                max_y: y,
            };

            while let Some((cx, cy)) = stack.pop() {
                comp.area += 1;
                comp.min_x = comp.min_x.min(cx);
                comp.min_y = comp.min_y.min(cy);
                comp.max_x = comp.max_x.max(cx);
                comp.max_y = comp.max_y.max(cy);

                let neighbours = [
                    (cx.wrapping_sub(1), cy),
                    (cx + 1, cy),
                    (cx, cy.wrapping_sub(1)),
                    (cx, cy + 1),
                ];
                for (nx, ny) in neighbours {
                    if nx >= w || ny >= h {
                        continue;
                    }
                    let nidx = ny as usize * w as usize + nx as usize;
                    if !visited[nidx] && mask.get(nx, ny) {
                        visited[nidx] = true;
                        stack.push((nx, ny));
                    }
                }
            }

            components.push(comp);
        }
    }

    components
}

/// Speckle count (components up to `max_speckle_area`) and the pixel total
/// of everything larger.
pub fn speckle_stats(mask: &BinaryMask, max_speckle_area: usize) -> (usize, usize) {
    label_components(mask)
        .iter()
        .fold((0, 0), |(speckles, content), c| {
            if c.area <= max_speckle_area {
                (speckles + 1, content)
            } else {
                (speckles, content + c.area)
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagonal_pixels_are_separate_components() {
        let mut mask = BinaryMask::new(4, 4);
        mask.set(0, 0, true);
        mask.set(1, 1, true);
        assert_eq!(label_components(&mask).len(), 2);
    }

    #[test]
    fn test_component_bounding_box() {
        let mut mask = BinaryMask::new(10, 10);
        for x in 2..6 {
            mask.set(x, 3, true);
        }
        mask.set(5, 4, true);
        mask.set(5, 5, true);
        let comps = label_components(&mask);
        assert_eq!(comps.len(), 1);
        assert_eq!(comps[0].area, 6);
        assert_eq!(comps[0].bbox(), Rect::new(2, 3, 4, 3));
    }

    #[test]
    fn test_speckle_stats_split_by_area() {
        let mut mask = BinaryMask::new(20, 20);
        mask.set(1, 1, true);
        mask.set(10, 10, true);
        for y in 12..18 {
            for x in 12..18 {
                mask.set(x, y, true);
            }
        }
        assert_eq!(speckle_stats(&mask, 25), (2, 36));
    }
}
