//! Fractal tree growth and the amortized tree lifecycle.

use crate::grid::{CellBuffer, CellPos};
use crate::material::Material;
use crate::{Tick, World};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Transient cursor driving branch-capable upward tree expansion.
///
/// One node advances one step per tick; children are queued with reduced
/// length and thickness. A node dies once its age exhausts its length, it
/// leaves the grid, or glass blocks its path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TreeGrowthNode {
    pub x: i32,
    pub y: i32,
    /// Heading lean: -1 left, 0 straight up, 1 right.
    pub direction: i32,
    pub length: u32,
    pub thickness: i32,
    pub generation: u8,
    pub age: u32,
}

impl TreeGrowthNode {
    /// Seed a trunk node at a water/dirt contact point.
    pub(crate) fn seed(x: i32, y: i32, rng: &mut SmallRng) -> Self {
        Self {
            x,
            y,
            direction: 0,
            length: rng.gen_range(12..20),
            thickness: 3,
            generation: 0,
            age: 0,
        }
    }

    /// Advance one growth step on the working grid. Returns `false` once the
    /// node is exhausted or blocked and should leave the queue.
    fn advance(
        &mut self,
        scratch: &mut CellBuffer,
        rng: &mut SmallRng,
        children: &mut Vec<TreeGrowthNode>,
    ) -> bool {
        if self.age >= self.length || !scratch.in_bounds(self.x, self.y) {
            return false;
        }
        if scratch.get(self.x, self.y) == Material::Glass {
            return false;
        }

        let mut lean = self.direction as f32;
        if rng.gen_bool(0.3) {
            lean += (rng.gen::<f32>() - 0.5) * 0.8;
        }
        let next_x = (self.x as f32 + lean).floor() as i32;
        let next_y = self.y - 1;
        if !scratch.in_bounds(next_x, next_y) || scratch.get(next_x, next_y) == Material::Glass {
            return false;
        }

        // Stamp `thickness` jittered pixels at the current height, refusing
        // any placement whose straight path from the trunk crosses glass.
        for _ in 0..self.thickness {
            let grow_x =
                (self.x as f32 + (rng.gen::<f32>() - 0.5) * self.thickness as f32).floor() as i32;
            let grow_y = self.y;
            if !scratch.in_bounds(grow_x, grow_y) || scratch.get(grow_x, grow_y) != Material::Empty
            {
                continue;
            }
            let steps = (grow_x - self.x).abs();
            let step_dir = (grow_x - self.x).signum();
            let mut blocked = false;
            for step in 0..=steps {
                let check_x = self.x + step_dir * step;
                if scratch.in_bounds(check_x, grow_y)
                    && scratch.get(check_x, grow_y) == Material::Glass
                {
                    blocked = true;
                    break;
                }
            }
            if !blocked {
                scratch.set(grow_x, grow_y, Material::Tree);
            }
        }

        self.x = next_x;
        self.y = next_y;
        self.age += 1;

        // Thicker trunks branch more readily.
        let branch_probability = (0.2 + f64::from(self.thickness) * 0.1).min(1.0);
        if self.generation < 3
            && self.age > 3
            && self.age % 4 == 0
            && rng.gen_bool(branch_probability)
        {
            for direction in [-1, 1] {
                if rng.gen_bool(0.5) {
                    children.push(TreeGrowthNode {
                        x: self.x,
                        y: self.y,
                        direction,
                        length: (self.length as f32 * 0.7) as u32,
                        thickness: (self.thickness - 1).max(1),
                        generation: self.generation + 1,
                        age: 0,
                    });
                }
            }
        }

        true
    }
}

/// Nearest water cell within a square search box, with its Euclidean distance.
pub(crate) fn find_nearest_water(
    buffer: &CellBuffer,
    x: i32,
    y: i32,
    max_distance: i32,
) -> Option<(i32, i32, f32)> {
    let mut nearest = None;
    let mut min_dist_sq = i64::MAX;
    for check_y in (y - max_distance).max(0)..(y + max_distance + 1).min(buffer.height()) {
        for check_x in (x - max_distance).max(0)..(x + max_distance + 1).min(buffer.width()) {
            if buffer.get(check_x, check_y) != Material::Water {
                continue;
            }
            let dx = i64::from(check_x - x);
            let dy = i64::from(check_y - y);
            let dist_sq = dx * dx + dy * dy;
            if dist_sq < min_dist_sq {
                min_dist_sq = dist_sq;
                nearest = Some((check_x, check_y, (dist_sq as f32).sqrt()));
            }
        }
    }
    nearest
}

/// Trees within `radius` of `(x, y)`, excluding the center cell.
pub(crate) fn count_nearby_trees(buffer: &CellBuffer, x: i32, y: i32, radius: i32) -> u32 {
    let mut count = 0;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx == 0 && dy == 0 {
                continue;
            }
            if buffer.get(x + dx, y + dy) == Material::Tree {
                count += 1;
            }
        }
    }
    count
}

impl World {
    /// Advance every queued growth node one step and merge new tree pixels.
    ///
    /// Nodes grow on a working copy so a branch sees its siblings' pixels
    /// this tick; only cells still empty in the live grid take the result.
    pub(crate) fn stage_fractal_growth(&mut self) {
        if self.growth_queue.is_empty() {
            return;
        }
        let World {
            grid,
            rng,
            growth_queue,
            ..
        } = self;
        let cur = grid.current_mut();
        let mut scratch = cur.clone();
        let mut children = Vec::new();
        growth_queue.retain_mut(|node| node.advance(&mut scratch, rng, &mut children));
        growth_queue.append(&mut children);
        for y in 0..cur.height() {
            for x in 0..cur.width() {
                if scratch.get(x, y) == Material::Tree && cur.get(x, y) == Material::Empty {
                    cur.set(x, y, Material::Tree);
                }
            }
        }
    }

    /// Periodic tree death and opportunistic growth, amortized across ticks.
    ///
    /// The work-list is rebuilt and shuffled every `tree_rescan_interval`
    /// ticks; a bounded batch is evaluated per tick round-robin so large
    /// forests never stall a frame.
    pub(crate) fn stage_tree_behavior(&mut self, next_tick: Tick) {
        let World {
            grid,
            rng,
            trees_to_process,
            tree_cursor,
            config,
            ..
        } = self;
        let cur = grid.current_mut();

        if next_tick.0 % u64::from(config.tree_rescan_interval) == 0 {
            trees_to_process.clear();
            for y in 0..cur.height() {
                for x in 0..cur.width() {
                    if cur.get(x, y) == Material::Tree {
                        trees_to_process.push(CellPos::new(x, y));
                    }
                }
            }
            trees_to_process.shuffle(rng);
            *tree_cursor = 0;
        }
        if trees_to_process.is_empty() {
            return;
        }

        let batch = config.trees_per_tick.min(trees_to_process.len());
        let end = (*tree_cursor + batch).min(trees_to_process.len());
        let mut idx = *tree_cursor;
        while idx < end {
            let tree = trees_to_process[idx];
            idx += 1;
            // The list is stale by up to a rescan interval; skip anything
            // resized away or no longer a tree.
            if !cur.in_bounds(tree.x, tree.y) || cur.get(tree.x, tree.y) != Material::Tree {
                continue;
            }

            let water = find_nearest_water(cur, tree.x, tree.y, 15);
            let nearby = count_nearby_trees(cur, tree.x, tree.y, 3);

            let mut adjacent = Vec::new();
            for dy in -1..=1 {
                for dx in -1..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    if cur.get(tree.x + dx, tree.y + dy) == Material::Tree {
                        adjacent.push(CellPos::new(tree.x + dx, tree.y + dy));
                    }
                }
            }

            // Isolated trees and branch tips die without water in reach of
            // themselves or their one neighbor.
            if adjacent.len() <= 1 {
                let mut network_has_water = matches!(water, Some((_, _, d)) if d <= 15.0);
                if !network_has_water {
                    if let Some(neighbor) = adjacent.first() {
                        if let Some((_, _, d)) =
                            find_nearest_water(cur, neighbor.x, neighbor.y, 15)
                        {
                            network_has_water = d <= 15.0;
                        }
                    }
                }
                let death_chance = if adjacent.is_empty() { 0.08 } else { 0.03 };
                if !network_has_water && rng.gen_bool(death_chance) {
                    cur.set(tree.x, tree.y, Material::DeadTree);
                    continue;
                }
            }

            let clustered = nearby >= 3;
            let growth_chance = if clustered { 0.35 } else { 0.25 };
            let Some((water_x, water_y, water_dist)) = water else {
                continue;
            };
            if water_dist > 8.0 || !rng.gen_bool(growth_chance) {
                continue;
            }

            let dir_x = (water_x - tree.x).signum();
            let dir_y = (water_y - tree.y).signum();
            let mut candidates: Vec<CellPos> = Vec::new();
            if clustered {
                if dir_x != 0 {
                    candidates.push(CellPos::new(tree.x, tree.y - 1));
                    candidates.push(CellPos::new(tree.x, tree.y + 1));
                }
                if dir_y != 0 {
                    candidates.push(CellPos::new(tree.x - 1, tree.y));
                    candidates.push(CellPos::new(tree.x + 1, tree.y));
                }
                candidates.push(CellPos::new(tree.x + dir_x, tree.y - 1));
                candidates.push(CellPos::new(tree.x + dir_x, tree.y + 1));
                candidates.push(CellPos::new(tree.x - dir_x, tree.y - 1));
                candidates.push(CellPos::new(tree.x - dir_x, tree.y + 1));
                if dir_x != 0 {
                    candidates.push(CellPos::new(tree.x + dir_x, tree.y));
                }
                if dir_y != 0 {
                    candidates.push(CellPos::new(tree.x, tree.y + dir_y));
                }
            } else {
                if dir_x != 0 {
                    candidates.push(CellPos::new(tree.x + dir_x, tree.y));
                }
                if dir_y != 0 {
                    candidates.push(CellPos::new(tree.x, tree.y + dir_y));
                }
                for dy in -1..=1 {
                    for dx in -1..=1 {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        candidates.push(CellPos::new(tree.x + dx, tree.y + dy));
                    }
                }
            }
            candidates.shuffle(rng);

            let max_growth = if clustered {
                if rng.gen_bool(0.5) {
                    3
                } else {
                    2
                }
            } else {
                2
            };
            let mut grown = 0;
            for candidate in candidates {
                if grown >= max_growth {
                    break;
                }
                if !cur.in_bounds(candidate.x, candidate.y) {
                    continue;
                }
                let target = cur.get(candidate.x, candidate.y);
                if !matches!(target, Material::Empty | Material::Dirt | Material::Water) {
                    continue;
                }
                if count_nearby_trees(cur, candidate.x, candidate.y, 2) >= 8 {
                    continue;
                }
                let mut glass_adjacent = false;
                'glass: for dy in -1..=1 {
                    for dx in -1..=1 {
                        if cur.get(candidate.x + dx, candidate.y + dy) == Material::Glass {
                            glass_adjacent = true;
                            break 'glass;
                        }
                    }
                }
                if glass_adjacent {
                    continue;
                }
                cur.set(candidate.x, candidate.y, Material::Tree);
                grown += 1;
                trees_to_process.push(candidate);
            }
        }

        *tree_cursor = if end >= trees_to_process.len() { 0 } else { end };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{World, WorldConfig};
    use rand::SeedableRng;

    fn world(width: i32, height: i32, seed: u64) -> World {
        World::new(WorldConfig {
            width,
            height,
            rng_seed: Some(seed),
            ..WorldConfig::default()
        })
        .expect("world")
    }

    fn count_material(world: &World, material: Material) -> usize {
        world
            .cells()
            .cells()
            .iter()
            .filter(|cell| cell.material == material)
            .count()
    }

    #[test]
    fn seeded_nodes_start_as_thick_trunks() {
        let mut rng = SmallRng::seed_from_u64(42);
        for _ in 0..32 {
            let node = TreeGrowthNode::seed(5, 5, &mut rng);
            assert!((12..20).contains(&node.length));
            assert_eq!(node.thickness, 3);
            assert_eq!(node.generation, 0);
            assert_eq!(node.direction, 0);
        }
    }

    #[test]
    fn growth_nodes_produce_trees_above_their_seed() {
        let mut w = world(24, 24, 9);
        let node = {
            let rng = w.rng();
            TreeGrowthNode::seed(12, 20, rng)
        };
        w.growth_queue.push(node);
        for _ in 0..25 {
            w.advance(16.0);
        }
        let above_seed = (0..20)
            .flat_map(|y| (0..24).map(move |x| (x, y)))
            .filter(|&(x, y)| w.cells().get(x, y) == Material::Tree)
            .count();
        assert!(above_seed > 0, "the trunk should have climbed above its seed");
    }

    #[test]
    fn growth_refuses_to_cross_glass() {
        let mut w = world(16, 16, 10);
        for x in 0..16 {
            w.cells_mut().set(x, 8, Material::Glass);
        }
        let node = {
            let rng = w.rng();
            TreeGrowthNode::seed(8, 12, rng)
        };
        w.growth_queue.push(node);
        for _ in 0..30 {
            w.advance(16.0);
        }
        let above_glass = (0..8)
            .flat_map(|y| (0..16).map(move |x| (x, y)))
            .filter(|&(x, y)| w.cells().get(x, y) == Material::Tree)
            .count();
        assert_eq!(above_glass, 0, "no tree pixel may appear past the glass pane");
    }

    #[test]
    fn a_dry_isolated_tree_dies_and_decomposes_to_dirt() {
        let mut w = world(12, 12, 11);
        w.cells_mut().set(6, 11, Material::Tree);
        let mut saw_dead_tree = false;
        for _ in 0..2000 {
            w.advance(16.0);
            if count_material(&w, Material::DeadTree) > 0 {
                saw_dead_tree = true;
            }
            if count_material(&w, Material::Dirt) > 0 {
                break;
            }
        }
        assert!(saw_dead_tree, "the waterless tree should have died");
        assert!(
            count_material(&w, Material::Dirt) > 0,
            "the dead tree should have decomposed to dirt"
        );
    }

    #[test]
    fn watered_trees_spread() {
        let mut w = world(24, 12, 12);
        for x in 0..24 {
            w.cells_mut().set(x, 11, Material::Sand);
        }
        for x in 8..11 {
            w.cells_mut().set(x, 10, Material::Tree);
            w.cells_mut().set(x, 9, Material::Tree);
        }
        for x in 14..17 {
            w.cells_mut().set(x, 10, Material::Water);
        }
        let before = count_material(&w, Material::Tree);
        for _ in 0..200 {
            w.advance(16.0);
        }
        assert!(
            count_material(&w, Material::Tree) > before,
            "trees with water in reach should have grown"
        );
    }

    #[test]
    fn nearest_water_search_respects_its_box() {
        let mut w = world(40, 8, 13);
        w.cells_mut().set(30, 4, Material::Water);
        assert!(find_nearest_water(w.cells(), 4, 4, 15).is_none());
        let found = find_nearest_water(w.cells(), 20, 4, 15);
        assert_eq!(found.map(|(x, y, _)| (x, y)), Some((30, 4)));
    }
}
