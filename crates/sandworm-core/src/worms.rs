//! The worm agent subsystem: sensing, memory-weighted movement, lifecycle,
//! and breeding with genetic color inheritance.

use crate::grid::{Cell, CellBuffer, CellPos};
use crate::material::Material;
use crate::sim::{has_support, has_surface_contact};
use crate::{World, WormEventKind};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::Rng;
use sandworm_index::{DenseOwnerIndex, OwnerIndex};
use serde::{Deserialize, Serialize};
use slotmap::{new_key_type, SlotMap};
use std::collections::VecDeque;

new_key_type! {
    /// Stable handle for worms backed by a generational slot map.
    pub struct WormId;
}

/// Starting (and nominal maximum) life of a worm, in update cycles.
pub const WORM_BASE_LIFE: i32 = 300;
/// Hard cap reached by feeding: 120% of the base life.
pub const WORM_MAX_LIFE: i32 = WORM_BASE_LIFE + WORM_BASE_LIFE / 5;

const MEMORY_CAP: usize = 32;
const INHERITED_MEMORY_CAP: usize = 16;
const MATURITY_AGE: i32 = 25;
const BREEDING_LIFE_COST: i32 = 15;

/// Outcome class a memory entry was learned from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MemoryKind {
    Food,
    Breed,
    Neutral,
}

/// Environmental-context fingerprint plus the move taken in it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryKey {
    /// Solid cells below minus above within 3 cells: -3 valley to +3 peak.
    pub elevation: i8,
    /// Trees in the surrounding 5x5 block, 0-25.
    pub tree_density: u8,
    /// Chemical favorability of the 3x3 block, clamped to [-4, 4].
    pub pixel_class: i8,
    pub dx: i8,
    pub dy: i8,
}

/// Learned association between a context fingerprint and a move.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryEntry {
    pub key: MemoryKey,
    /// Signed reinforcement weight, clamped to [-5, 5].
    pub weight: i8,
    pub kind: MemoryKind,
}

/// Current movement intention.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Goal {
    pub dx: i32,
    pub dy: i32,
    /// Set when the goal tracks the densest nearby tree cluster.
    pub cluster_seeking: bool,
    pub cluster_density: f32,
}

/// Four RGB variants for one segment role.
pub type ColorVariants = [[u8; 3]; 4];

/// Per-segment-role color variants inherited and mutated at breeding time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColorGenome {
    pub head: ColorVariants,
    pub body: ColorVariants,
    pub tail: ColorVariants,
}

impl ColorGenome {
    /// Baseline pinks carried by worms spawned outside of breeding.
    #[must_use]
    pub const fn founder() -> Self {
        Self {
            head: [
                [199, 21, 133],
                [219, 112, 147],
                [208, 32, 144],
                [186, 85, 211],
            ],
            body: [
                [255, 20, 147],
                [255, 105, 180],
                [255, 182, 193],
                [255, 160, 122],
            ],
            tail: [
                [255, 182, 193],
                [255, 105, 180],
                [255, 20, 147],
                [255, 192, 203],
            ],
        }
    }
}

/// A three-segment autonomous agent living on the grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worm {
    pub head: CellPos,
    pub body: CellPos,
    pub tail: CellPos,
    /// Remaining update cycles; hazards subtract, eating adds.
    pub life: i32,
    /// Persistent burning flag, cleared by water contact.
    pub on_fire: bool,
    /// Bounded associative memory, oldest evicted first.
    pub memory: VecDeque<MemoryEntry>,
    pub goal: Option<Goal>,
    pub genome: ColorGenome,
    /// Cell the head is currently covering, restored when it moves off.
    pub under_head: Cell,
    pub last_head_pos: Option<CellPos>,
}

impl Worm {
    fn new(head: CellPos, body: CellPos, tail: CellPos) -> Self {
        Self {
            head,
            body,
            tail,
            life: WORM_BASE_LIFE,
            on_fire: false,
            memory: VecDeque::new(),
            goal: None,
            genome: ColorGenome::founder(),
            under_head: Cell::EMPTY,
            last_head_pos: None,
        }
    }

    /// Update cycles lived so far.
    #[must_use]
    pub fn age(&self) -> i32 {
        (WORM_BASE_LIFE - self.life).max(0)
    }

    /// The three segment coordinates, head first.
    pub fn segments(&self) -> std::array::IntoIter<CellPos, 3> {
        [self.head, self.body, self.tail].into_iter()
    }

    /// Gain life from a consumed tree pixel, capped at 120% of base.
    pub fn eat_tree(&mut self) {
        self.life = (self.life + 1).min(WORM_MAX_LIFE);
    }

    fn reinforce_recent(&mut self, count: usize, delta: i8) {
        let skip = self.memory.len().saturating_sub(count);
        for entry in self.memory.iter_mut().skip(skip) {
            entry.weight = (entry.weight + delta).clamp(-5, 5);
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct MoveOption {
    to: CellPos,
    dx: i32,
    dy: i32,
    eats_tree: bool,
    enters_water: bool,
    falling: bool,
}

#[derive(Debug, Clone, Copy)]
struct Genetics {
    influence_a: f32,
    influence_b: f32,
    mutation_chance: f64,
}

/// Solid cells below minus above within 3 cells of `(x, y)`.
fn relative_elevation(buffer: &CellBuffer, x: i32, y: i32) -> i8 {
    let mut below = 0i8;
    let mut above = 0i8;
    for dy in 1..=3 {
        if buffer.get(x, y + dy).is_solid_ground() {
            below += 1;
        }
        if buffer.get(x, y - dy).is_solid_ground() {
            above += 1;
        }
    }
    below - above
}

/// Trees in the 5x5 block centered on `(x, y)`, center included.
fn local_tree_density(buffer: &CellBuffer, x: i32, y: i32) -> u8 {
    let mut count = 0;
    for dy in -2..=2 {
        for dx in -2..=2 {
            if buffer.get(x + dx, y + dy) == Material::Tree {
                count += 1;
            }
        }
    }
    count
}

/// Chemical favorability of the 3x3 block: vegetation and dirt reward,
/// water mildly rewards, hazards punish hard.
fn pixel_class(buffer: &CellBuffer, x: i32, y: i32) -> i8 {
    let mut score: i32 = 0;
    for dy in -1..=1 {
        for dx in -1..=1 {
            match buffer.get(x + dx, y + dy) {
                Material::Tree | Material::Dirt | Material::DeadTree => score += 2,
                Material::Water => score += 1,
                Material::Acid | Material::Fire | Material::Lava => score -= 4,
                _ => {}
            }
        }
    }
    score.clamp(-4, 4) as i8
}

/// Contact quality at `(x, y)`: below/side contacts rated above overhead ones.
fn surface_quality(buffer: &CellBuffer, x: i32, y: i32) -> f32 {
    let mut quality = 0.0f32;
    let mut contacts = 0u32;
    for dy in -1..=1 {
        for dx in -1..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            if buffer.get(x + dx, y + dy).is_solid_surface() {
                contacts += 1;
                quality += if dy >= 0 { 1.0 } else { 0.5 };
            }
        }
    }
    if contacts == 0 {
        0.0
    } else {
        quality / contacts as f32
    }
}

/// Five or more water neighbors makes a cell unfit for spawning.
fn waterlogged(buffer: &CellBuffer, pos: CellPos) -> bool {
    let mut water = 0;
    for dy in -1..=1 {
        for dx in -1..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            if buffer.get(pos.x + dx, pos.y + dy) == Material::Water {
                water += 1;
            }
        }
    }
    water >= 5
}

/// Direction and density of the densest tree cluster within radius 7.
fn find_tree_cluster(buffer: &CellBuffer, head: CellPos) -> Option<(i32, i32, f32)> {
    let mut best = None;
    let mut max_density = 0.0f32;
    for dy in -7..=7 {
        for dx in -7i32..=7 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let center_x = head.x + dx;
            let center_y = head.y + dy;
            if !buffer.in_bounds(center_x, center_y) {
                continue;
            }
            let mut trees = 0;
            for cy in -1..=1 {
                for cx in -1..=1 {
                    if buffer.get(center_x + cx, center_y + cy) == Material::Tree {
                        trees += 1;
                    }
                }
            }
            if trees < 2 {
                continue;
            }
            let distance = (dx.abs() + dy.abs()).max(1);
            let density = trees as f32 / distance as f32;
            if density > max_density {
                max_density = density;
                best = Some((dx.signum(), dy.signum(), density));
            }
        }
    }
    best
}

/// Direction toward the nearest single tree within the search radius.
fn find_nearest_tree_dir(buffer: &CellBuffer, head: CellPos, radius: i32) -> Option<(i32, i32)> {
    let mut nearest = None;
    let mut min_distance = i32::MAX;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx == 0 && dy == 0 {
                continue;
            }
            if buffer.get(head.x + dx, head.y + dy) != Material::Tree {
                continue;
            }
            let distance = dx.abs() + dy.abs();
            if distance < min_distance {
                min_distance = distance;
                nearest = Some((dx.signum(), dy.signum()));
            }
        }
    }
    nearest
}

fn mutate_entry(mut entry: MemoryEntry, rng: &mut SmallRng) -> MemoryEntry {
    if rng.gen_bool(0.2) {
        let nudge: i8 = if rng.gen_bool(0.5) { -1 } else { 1 };
        entry.weight = (entry.weight + nudge).clamp(-5, 5);
    }
    entry
}

/// Each parent's last ten entries, strongest first, top eight kept.
fn strongest_recent(worm: &Worm) -> Vec<MemoryEntry> {
    let skip = worm.memory.len().saturating_sub(10);
    let mut recent: Vec<MemoryEntry> = worm.memory.iter().skip(skip).copied().collect();
    recent.sort_by_key(|entry| std::cmp::Reverse(entry.weight.abs()));
    recent.truncate(8);
    recent
}

fn inherit_memory(a: &Worm, b: &Worm, rng: &mut SmallRng) -> VecDeque<MemoryEntry> {
    let from_a = strongest_recent(a);
    let from_b = strongest_recent(b);
    let mut inherited = VecDeque::new();
    for i in 0..from_a.len().max(from_b.len()) {
        if inherited.len() >= INHERITED_MEMORY_CAP {
            break;
        }
        if i < from_a.len() {
            inherited.push_back(mutate_entry(from_a[i], rng));
        }
        if i < from_b.len() && inherited.len() < INHERITED_MEMORY_CAP {
            inherited.push_back(mutate_entry(from_b[i], rng));
        }
    }
    inherited
}

fn memory_weight_sum(worm: &Worm) -> i32 {
    worm.memory.iter().map(|entry| i32::from(entry.weight)).sum()
}

fn memory_diversity(worm: &Worm) -> i32 {
    if worm.memory.is_empty() {
        return 0;
    }
    let max = worm.memory.iter().map(|e| i32::from(e.weight)).max().unwrap_or(0);
    let min = worm.memory.iter().map(|e| i32::from(e.weight)).min().unwrap_or(0);
    (max - min).abs()
}

/// Parent influence ratios and mutation odds derived from memory strength
/// and the divergence of the parents' experience diversity.
fn color_genetics(a: &Worm, b: &Worm) -> Genetics {
    let sum_a = memory_weight_sum(a);
    let sum_b = memory_weight_sum(b);
    let total = (sum_a.abs() + sum_b.abs() + 1) as f32;
    let diversity_gap = (memory_diversity(a) - memory_diversity(b)).abs();
    Genetics {
        influence_a: sum_a.abs() as f32 / total,
        influence_b: sum_b.abs() as f32 / total,
        mutation_chance: (f64::from(diversity_gap) * 0.05).min(0.3),
    }
}

fn blend_role(
    a: &ColorVariants,
    b: &ColorVariants,
    genetics: Genetics,
    base_tint: [f32; 3],
    brightness: f32,
    rng: &mut SmallRng,
) -> ColorVariants {
    let mut out = [[0u8; 3]; 4];
    for (variant, slot) in out.iter_mut().enumerate() {
        let mut color = [0.0f32; 3];
        for channel in 0..3 {
            color[channel] = f32::from(a[variant][channel]) * genetics.influence_a
                + f32::from(b[variant][channel]) * genetics.influence_b;
            color[channel] = color[channel] * 0.7 + base_tint[channel] * 0.3;
            color[channel] = if brightness >= 0.0 {
                color[channel] + (255.0 - color[channel]) * brightness
            } else {
                color[channel] * (1.0 + brightness)
            };
            color[channel] = color[channel].clamp(0.0, 255.0);
        }
        if rng.gen_bool(genetics.mutation_chance) {
            for channel in &mut color {
                *channel = (*channel + (rng.gen::<f32>() - 0.5) * 40.0).clamp(0.0, 255.0);
            }
        }
        for channel in 0..3 {
            slot[channel] = color[channel].round() as u8;
        }
    }
    out
}

/// Offspring colors: parents blended by memory influence, tinted warm for
/// food-dominated inheritance and cool for breeding-dominated, brightened
/// or darkened by the average inherited weight.
fn offspring_genome(
    a: &Worm,
    b: &Worm,
    genetics: Genetics,
    inherited: &VecDeque<MemoryEntry>,
    rng: &mut SmallRng,
) -> ColorGenome {
    let inherited_sum: i32 = inherited.iter().map(|e| i32::from(e.weight)).sum();
    let avg_weight = if inherited.is_empty() {
        let total_entries = a.memory.len() + b.memory.len();
        if total_entries == 0 {
            0.0
        } else {
            (memory_weight_sum(a) + memory_weight_sum(b)) as f32 / total_entries as f32
        }
    } else {
        inherited_sum as f32 / inherited.len() as f32
    };

    let food_pos: f32 = inherited
        .iter()
        .filter(|e| e.kind == MemoryKind::Food && e.weight > 0)
        .map(|e| f32::from(e.weight))
        .sum();
    let breed_pos: f32 = inherited
        .iter()
        .filter(|e| e.kind == MemoryKind::Breed && e.weight > 0)
        .map(|e| f32::from(e.weight))
        .sum();
    let hue_bias = (food_pos - breed_pos) / (food_pos + breed_pos + 1e-6);

    let mut brightness = avg_weight * 0.4;
    if brightness.abs() < 0.15 {
        let sign = if brightness > 0.0 {
            1.0
        } else if brightness < 0.0 {
            -1.0
        } else if rng.gen_bool(0.5) {
            1.0
        } else {
            -1.0
        };
        brightness = 0.15 * sign;
    }
    brightness = brightness.clamp(-0.6, 0.6);

    const FOOD_TINT: [f32; 3] = [255.0, 195.0, 145.0];
    const BREED_TINT: [f32; 3] = [200.0, 120.0, 255.0];
    let bias = hue_bias.abs();
    let mut base_tint = [0.0f32; 3];
    for channel in 0..3 {
        base_tint[channel] = if hue_bias >= 0.0 {
            FOOD_TINT[channel] * bias + BREED_TINT[channel] * (1.0 - bias)
        } else {
            BREED_TINT[channel] * bias + FOOD_TINT[channel] * (1.0 - bias)
        };
    }

    ColorGenome {
        head: blend_role(&a.genome.head, &b.genome.head, genetics, base_tint, brightness, rng),
        body: blend_role(&a.genome.body, &b.genome.body, genetics, base_tint, brightness, rng),
        tail: blend_role(&a.genome.tail, &b.genome.tail, genetics, base_tint, brightness, rng),
    }
}

/// Build a worm out of three chained candidate cells and stamp it.
///
/// Candidates are shuffled, then a head/body/tail adjacency chain is
/// searched; the first complete chain wins. Returns `None` when no chain of
/// three mutually adjacent cells exists.
pub(crate) fn spawn_worm_from_candidates(
    worms: &mut SlotMap<WormId, Worm>,
    index: &mut DenseOwnerIndex<WormId>,
    rng: &mut SmallRng,
    buffer: &mut CellBuffer,
    candidates: &[CellPos],
    inherited: Option<(VecDeque<MemoryEntry>, ColorGenome)>,
) -> Option<WormId> {
    let adjacent =
        |a: CellPos, b: CellPos| (a.x - b.x).abs() <= 1 && (a.y - b.y).abs() <= 1 && a != b;

    let mut shuffled = candidates.to_vec();
    shuffled.shuffle(rng);

    for i in 0..shuffled.len().saturating_sub(2) {
        let head = shuffled[i];
        let Some(body) = shuffled.iter().copied().find(|&p| adjacent(p, head)) else {
            continue;
        };
        let Some(tail) = shuffled
            .iter()
            .copied()
            .find(|&p| adjacent(p, body) && p != head && p != body)
        else {
            continue;
        };

        let mut worm = Worm::new(head, body, tail);
        if let Some((memory, genome)) = inherited {
            worm.memory = memory;
            worm.genome = genome;
        }
        let life = worm.life.max(0) as u16;
        let id = worms.insert(worm);
        for (pos, marker) in [
            (head, Material::WormHead),
            (body, Material::WormBody),
            (tail, Material::WormTail),
        ] {
            buffer.set_cell(
                pos.x,
                pos.y,
                Cell {
                    material: marker,
                    life,
                    tint: 0,
                },
            );
            index.claim(pos.x, pos.y, id);
        }
        tracing::debug!(?id, ?head, "worm spawned");
        return Some(id);
    }
    None
}

impl World {
    /// Spawn a worm near a host-chosen point, given enough empty
    /// surface-contacted cells in the surrounding 5x5 block.
    pub fn spawn_worm_near(&mut self, x: i32, y: i32) -> Option<WormId> {
        let World {
            grid,
            rng,
            worms,
            worm_index,
            ..
        } = self;
        let cur = grid.current_mut();
        let mut candidates = Vec::new();
        for dy in -2..=2 {
            for dx in -2..=2 {
                let nx = x + dx;
                let ny = y + dy;
                if cur.in_bounds(nx, ny)
                    && cur.get(nx, ny) == Material::Empty
                    && has_surface_contact(cur, nx, ny)
                {
                    candidates.push(CellPos::new(nx, ny));
                }
            }
        }
        if candidates.len() < 3 {
            return None;
        }
        spawn_worm_from_candidates(worms, worm_index, rng, cur, &candidates, None)
    }

    /// Run the accumulated worm update cycles for this tick.
    ///
    /// Worm cycles tick at a fixed wall-time rate independent of the host
    /// frame rate; breeding checks run on their own slower accumulator.
    pub(crate) fn stage_worms(&mut self, elapsed_ms: f32) -> u32 {
        if self.worms.is_empty() {
            return 0;
        }

        self.breeding_clock += elapsed_ms;
        if self.breeding_clock >= self.config.breeding_interval_ms {
            self.check_breeding();
            self.breeding_clock = 0.0;
        }

        self.worm_clock += elapsed_ms;
        let interval = self.config.worm_update_interval_ms;
        let cycles = (self.worm_clock / interval).floor() as u32;
        self.worm_clock -= cycles as f32 * interval;

        for _ in 0..cycles {
            let ids: Vec<WormId> = self.worms.keys().collect();
            for id in ids {
                if self.worms.contains_key(id) {
                    self.worm_cycle(id);
                }
            }
        }
        cycles
    }

    /// Stamp fire over burning worms that are not touching water.
    ///
    /// The overwritten markers fail the integrity check on the worm's next
    /// cycle, which is what finally retires a burning worm.
    pub(crate) fn stage_burning_worms(&mut self) {
        let World { grid, worms, .. } = self;
        let cur = grid.current_mut();
        for (_, worm) in worms.iter() {
            if !worm.on_fire {
                continue;
            }
            let touching_water = worm.segments().any(|part| {
                for dy in -1..=1 {
                    for dx in -1..=1 {
                        if cur.get(part.x + dx, part.y + dy) == Material::Water {
                            return true;
                        }
                    }
                }
                false
            });
            if touching_water {
                continue;
            }
            for part in worm.segments() {
                if cur.get(part.x, part.y).is_worm_segment() {
                    cur.set(part.x, part.y, Material::Fire);
                }
            }
        }
    }

    fn worm_cycle(&mut self, id: WormId) {
        if let Some(worm) = self.worms.get_mut(id) {
            worm.life -= 1;
        }
        self.apply_environmental_damage(id);

        let dead = match self.worms.get(id) {
            Some(worm) => worm.life <= 0 || !self.markers_intact(worm),
            None => return,
        };
        if dead {
            self.kill_worm(id);
            return;
        }
        self.move_worm(id);
    }

    fn markers_intact(&self, worm: &Worm) -> bool {
        let cur = self.grid.current();
        cur.get(worm.head.x, worm.head.y) == Material::WormHead
            && cur.get(worm.body.x, worm.body.y) == Material::WormBody
            && cur.get(worm.tail.x, worm.tail.y) == Material::WormTail
    }

    fn apply_environmental_damage(&mut self, id: WormId) {
        let segments = match self.worms.get(id) {
            Some(worm) => [worm.head, worm.body, worm.tail],
            None => return,
        };
        let cur = self.grid.current();
        let mut fire = false;
        let mut lava = false;
        let mut acid = false;
        let mut water = false;
        for part in segments {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    match cur.get(part.x + dx, part.y + dy) {
                        Material::Fire => fire = true,
                        Material::Lava => lava = true,
                        Material::Acid => acid = true,
                        Material::Water => water = true,
                        _ => {}
                    }
                }
            }
        }

        let Some(worm) = self.worms.get_mut(id) else {
            return;
        };
        if fire || lava {
            worm.on_fire = true;
        }
        if water && worm.on_fire {
            worm.on_fire = false;
        }
        if acid {
            worm.life -= 3;
        }
        if fire {
            worm.life -= 5;
        }
        if lava {
            worm.life -= 10;
        }
        if worm.on_fire {
            worm.life -= 2;
        }
    }

    /// Remove a worm, converting its still-intact marker cells to acid.
    fn kill_worm(&mut self, id: WormId) {
        let Some(worm) = self.worms.remove(id) else {
            return;
        };
        {
            let World {
                grid, worm_index, ..
            } = self;
            let cur = grid.current_mut();
            for (pos, marker) in [
                (worm.head, Material::WormHead),
                (worm.body, Material::WormBody),
                (worm.tail, Material::WormTail),
            ] {
                if cur.get(pos.x, pos.y) == marker {
                    cur.set(pos.x, pos.y, Material::Acid);
                }
                if worm_index.owner_at(pos.x, pos.y) == Some(id) {
                    worm_index.release(pos.x, pos.y);
                }
            }
        }
        tracing::debug!(?id, "worm died");
        self.emit_worm(id, WormEventKind::Dying);
    }

    fn generate_goal(&mut self, id: WormId) -> Goal {
        let (cluster, nearest, recent_avg) = {
            let worm = &self.worms[id];
            let cur = self.grid.current();
            let cluster = find_tree_cluster(cur, worm.head);
            let nearest = if cluster.is_none() {
                find_nearest_tree_dir(cur, worm.head, 8)
            } else {
                None
            };
            let recent_avg = if worm.memory.len() > 3 {
                let skip = worm.memory.len() - 3;
                let mut sum_dx = 0i32;
                let mut sum_dy = 0i32;
                for entry in worm.memory.iter().skip(skip) {
                    sum_dx += i32::from(entry.key.dx);
                    sum_dy += i32::from(entry.key.dy);
                }
                Some((sum_dx, sum_dy))
            } else {
                None
            };
            (cluster, nearest, recent_avg)
        };

        if let Some((dx, dy, density)) = cluster {
            return Goal {
                dx,
                dy,
                cluster_seeking: true,
                cluster_density: density,
            };
        }
        if let Some((dx, dy)) = nearest {
            return Goal {
                dx,
                dy,
                cluster_seeking: false,
                cluster_density: 0.0,
            };
        }
        if let Some((sum_dx, sum_dy)) = recent_avg {
            let dx = match sum_dx.signum() {
                0 => {
                    if self.rng.gen_bool(0.5) {
                        -1
                    } else {
                        1
                    }
                }
                sign => sign,
            };
            let dy = match sum_dy.signum() {
                0 => {
                    if self.rng.gen_bool(0.5) {
                        -1
                    } else {
                        1
                    }
                }
                sign => sign,
            };
            return Goal {
                dx,
                dy,
                cluster_seeking: false,
                cluster_density: 0.0,
            };
        }
        Goal {
            dx: if self.rng.gen_bool(0.5) { -1 } else { 1 },
            dy: if self.rng.gen_bool(0.5) { -1 } else { 1 },
            cluster_seeking: false,
            cluster_density: 0.0,
        }
    }

    /// Other worms with a segment within `radius` Manhattan cells of `origin`.
    fn nearby_worms(
        &self,
        exclude: WormId,
        origin: CellPos,
        radius: i32,
    ) -> Vec<(WormId, i32, CellPos)> {
        let mut found = Vec::new();
        for (other_id, other) in self.worms.iter() {
            if other_id == exclude {
                continue;
            }
            for part in other.segments() {
                let distance = part.manhattan(origin);
                if distance <= radius {
                    found.push((other_id, distance, part));
                    break;
                }
            }
        }
        found
    }

    fn move_worm(&mut self, id: WormId) {
        let needs_goal = match self.worms.get(id) {
            Some(worm) => worm.goal.is_none(),
            None => return,
        };
        // Re-derive the goal when absent, and occasionally even when present
        // so a worm cannot orbit a stale intention forever.
        let refresh = needs_goal
            || (!self.worms[id].memory.is_empty() && self.rng.gen_bool(0.05));
        if refresh {
            let goal = self.generate_goal(id);
            if let Some(worm) = self.worms.get_mut(id) {
                worm.goal = Some(goal);
            }
        }

        let worm = self.worms[id].clone();
        let mut moves: Vec<MoveOption> = Vec::new();
        let was_stuck;
        {
            let cur = self.grid.current();
            let height = cur.height();

            let mut supported = false;
            'support: for dy in -1..=1 {
                for dx in -1..=1 {
                    let check_x = worm.head.x + dx;
                    let check_y = worm.head.y + dy;
                    if check_y >= worm.head.y && cur.get(check_x, check_y).is_solid_surface() {
                        supported = true;
                        break 'support;
                    }
                }
            }

            if !supported {
                for (dx, dy) in [(0, 1), (-1, 1), (1, 1)] {
                    let to = CellPos::new(worm.head.x + dx, worm.head.y + dy);
                    if !cur.in_bounds(to.x, to.y) || to == worm.body || to == worm.tail {
                        continue;
                    }
                    let target = cur.get(to.x, to.y);
                    if matches!(target, Material::Empty | Material::Tree | Material::Water) {
                        moves.push(MoveOption {
                            to,
                            dx,
                            dy,
                            eats_tree: target == Material::Tree,
                            enters_water: target == Material::Water,
                            falling: true,
                        });
                    }
                }
            }

            for dy in -1..=1 {
                for dx in -1..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let to = CellPos::new(worm.head.x + dx, worm.head.y + dy);
                    if !cur.in_bounds(to.x, to.y) || to == worm.body || to == worm.tail {
                        continue;
                    }
                    let target = cur.get(to.x, to.y);
                    // Dirt and sand admit only strictly upward moves: burrowing.
                    let admissible = matches!(
                        target,
                        Material::Empty | Material::Tree | Material::Water
                    ) || (matches!(target, Material::Dirt | Material::Sand)
                        && to.y < worm.head.y);
                    if !admissible {
                        continue;
                    }
                    // The bottom edge acts as an implicit floor.
                    let bottom_floor = worm.head.y == height - 1 && to.y == height - 1;
                    if !(bottom_floor || has_surface_contact(cur, to.x, to.y)) {
                        continue;
                    }
                    if to.y != height - 1 && !has_support(cur, to.x, to.y) {
                        continue;
                    }
                    moves.push(MoveOption {
                        to,
                        dx,
                        dy,
                        eats_tree: target == Material::Tree,
                        enters_water: target == Material::Water,
                        falling: false,
                    });
                }
            }
            was_stuck = worm.last_head_pos == Some(worm.head);
        }

        if moves.is_empty() {
            self.handle_stuck(id, was_stuck);
            return;
        }
        let chosen = self.select_move(id, &worm, &moves);
        self.execute_move(id, chosen);
    }

    /// Tiered filtering before scoring: eating beats socializing beats
    /// cluster-chasing beats any surface move beats falling.
    fn select_move(&mut self, id: WormId, worm: &Worm, moves: &[MoveOption]) -> MoveOption {
        let food: Vec<MoveOption> = moves.iter().copied().filter(|m| m.eats_tree).collect();
        if !food.is_empty() {
            return self.weighted_draw(id, worm, &food);
        }

        let nearby = self.nearby_worms(id, worm.head, 8);
        if !nearby.is_empty() {
            let attraction: Vec<MoveOption> = moves
                .iter()
                .copied()
                .filter(|m| {
                    nearby.iter().any(|(_, _, part)| {
                        m.to.manhattan(*part) < worm.head.manhattan(*part)
                    })
                })
                .collect();
            if !attraction.is_empty() {
                return self.weighted_draw(id, worm, &attraction);
            }
        }

        let non_falling: Vec<MoveOption> = moves.iter().copied().filter(|m| !m.falling).collect();
        if let Some(goal) = worm.goal {
            if goal.cluster_seeking && !non_falling.is_empty() {
                let cluster: Vec<MoveOption> = non_falling
                    .iter()
                    .copied()
                    .filter(|m| {
                        m.dx.signum() == goal.dx.signum() || m.dy.signum() == goal.dy.signum()
                    })
                    .collect();
                if !cluster.is_empty() {
                    return self.weighted_draw(id, worm, &cluster);
                }
            }
        }

        if !non_falling.is_empty() {
            return self.weighted_draw(id, worm, &non_falling);
        }
        let falling: Vec<MoveOption> = moves.iter().copied().filter(|m| m.falling).collect();
        if !falling.is_empty() {
            return self.weighted_draw(id, worm, &falling);
        }
        self.weighted_draw(id, worm, moves)
    }

    /// Score a move set and pick one by cumulative-weight random draw.
    fn weighted_draw(&mut self, id: WormId, worm: &Worm, moves: &[MoveOption]) -> MoveOption {
        if moves.len() == 1 {
            return moves[0];
        }

        let mut scored: Vec<(MoveOption, f32)> = Vec::with_capacity(moves.len());
        {
            let cur = self.grid.current();
            let height = cur.height();
            let elevation = relative_elevation(cur, worm.head.x, worm.head.y);
            let density = local_tree_density(cur, worm.head.x, worm.head.y);
            let class_here = pixel_class(cur, worm.head.x, worm.head.y);
            let at_bottom = worm.head.y == height - 1;

            for &m in moves {
                let mut score = 1.0f32;

                // Escaping the bottom edge dominates everything else.
                if at_bottom && m.dy < 0 {
                    score += 5.0;
                }

                match pixel_class(cur, m.to.x, m.to.y) {
                    2 => score += 0.6,
                    1 => score += 0.3,
                    -2 => score -= 0.9,
                    _ => {}
                }

                if !m.falling {
                    score += surface_quality(cur, m.to.x, m.to.y) * 0.3;
                }

                for (_, distance, _) in self.nearby_worms(id, m.to, 6) {
                    let strength = (1.0 - distance as f32 / 6.0).max(0.0);
                    score += strength * 0.2;
                }

                if !worm.memory.is_empty() {
                    let key = MemoryKey {
                        elevation,
                        tree_density: density,
                        pixel_class: class_here,
                        dx: m.dx as i8,
                        dy: m.dy as i8,
                    };
                    if let Some(entry) = worm.memory.iter().find(|e| e.key == key) {
                        score += f32::from(entry.weight);
                    }
                    let mut similar_sum = 0i32;
                    let mut similar_count = 0i32;
                    for entry in &worm.memory {
                        if (entry.key.elevation - elevation).abs() <= 1
                            && (i16::from(entry.key.tree_density) - i16::from(density)).abs() <= 2
                            && (entry.key.pixel_class - class_here).abs() <= 1
                            && entry.key.dx == m.dx as i8
                            && entry.key.dy == m.dy as i8
                        {
                            similar_sum += i32::from(entry.weight);
                            similar_count += 1;
                        }
                    }
                    if similar_count > 0 {
                        score += similar_sum as f32 / similar_count as f32 * 0.3;
                    }
                }

                if let Some(goal) = worm.goal {
                    if m.dx == goal.dx && m.dy == goal.dy {
                        score += if goal.cluster_seeking { 1.0 } else { 0.5 };
                    } else if m.dx.signum() == goal.dx.signum()
                        || m.dy.signum() == goal.dy.signum()
                    {
                        score += if goal.cluster_seeking { 0.5 } else { 0.2 };
                    }
                    if goal.cluster_seeking && !m.falling {
                        score += if goal.cluster_density > 0.0 {
                            goal.cluster_density
                        } else {
                            0.3
                        };
                    }
                }

                scored.push((m, score));
            }
        }

        let min_score = scored
            .iter()
            .map(|(_, s)| *s)
            .fold(f32::INFINITY, f32::min);
        if min_score <= 0.0 {
            let shift = min_score.abs() + 0.1;
            for (_, score) in &mut scored {
                *score += shift;
            }
        }

        let total: f32 = scored.iter().map(|(_, s)| *s).sum();
        let mut roll = self.rng.gen::<f32>() * total;
        for (m, score) in &scored {
            roll -= score;
            if roll <= 0.0 {
                return *m;
            }
        }
        moves[self.rng.gen_range(0..moves.len())]
    }

    fn record_memory(&mut self, id: WormId, m: MoveOption, kind: MemoryKind) {
        let (elevation, density, class_here) = {
            let worm = &self.worms[id];
            let cur = self.grid.current();
            (
                relative_elevation(cur, worm.head.x, worm.head.y),
                local_tree_density(cur, worm.head.x, worm.head.y),
                pixel_class(cur, worm.head.x, worm.head.y),
            )
        };
        let weight: i8 = match kind {
            MemoryKind::Food => 1,
            MemoryKind::Breed => 2,
            MemoryKind::Neutral => 0,
        };
        let key = MemoryKey {
            elevation,
            tree_density: density,
            pixel_class: class_here,
            dx: m.dx as i8,
            dy: m.dy as i8,
        };
        let Some(worm) = self.worms.get_mut(id) else {
            return;
        };
        if let Some(entry) = worm.memory.iter_mut().find(|e| e.key == key) {
            entry.weight = (entry.weight + weight).clamp(-5, 5);
        } else {
            worm.memory.push_back(MemoryEntry { key, weight, kind });
            if worm.memory.len() > MEMORY_CAP {
                worm.memory.pop_front();
            }
        }
    }

    /// Shift segments into the chosen cell, maintaining grid markers, the
    /// ownership index, displaced water, and pushed dirt/sand.
    fn execute_move(&mut self, id: WormId, m: MoveOption) {
        self.emit_worm(id, WormEventKind::Moved);
        let kind = if m.eats_tree {
            MemoryKind::Food
        } else {
            MemoryKind::Neutral
        };
        self.record_memory(id, m, kind);

        let mut ate = false;
        let mut contact: Option<Material> = None;
        {
            let World {
                grid,
                worms,
                worm_index,
                ..
            } = self;
            let cur = grid.current_mut();
            let Some(worm) = worms.get_mut(id) else {
                return;
            };

            let next_substrate = cur.cell_at(m.to.x, m.to.y);
            let displaces_water = m.enters_water;

            let old_head = worm.head;
            let old_body = worm.body;
            let old_tail = worm.tail;

            cur.set_cell(old_head.x, old_head.y, worm.under_head);
            cur.set_cell(old_body.x, old_body.y, Cell::EMPTY);
            cur.set_cell(old_tail.x, old_tail.y, Cell::EMPTY);
            for pos in [old_head, old_body, old_tail] {
                if worm_index.owner_at(pos.x, pos.y) == Some(id) {
                    worm_index.release(pos.x, pos.y);
                }
            }

            worm.tail = old_body;
            worm.body = old_head;
            worm.head = m.to;

            // Burrowing pushes the displaced dirt or sand into the cell the
            // head just vacated.
            let target_now = cur.get(m.to.x, m.to.y);
            if target_now == Material::Dirt {
                cur.set(old_head.x, old_head.y, Material::Dirt);
                cur.set_cell(m.to.x, m.to.y, Cell::EMPTY);
            } else if target_now == Material::Sand {
                cur.set(old_head.x, old_head.y, Material::Sand);
                cur.set_cell(m.to.x, m.to.y, Cell::EMPTY);
            }

            let life = worm.life.max(0) as u16;
            for (pos, marker) in [
                (worm.tail, Material::WormTail),
                (worm.body, Material::WormBody),
                (worm.head, Material::WormHead),
            ] {
                cur.set_cell(
                    pos.x,
                    pos.y,
                    Cell {
                        material: marker,
                        life,
                        tint: 0,
                    },
                );
                worm_index.claim(pos.x, pos.y, id);
            }

            if displaces_water {
                let mut water_pos = old_tail;
                if cur.get(water_pos.x, water_pos.y) != Material::Empty {
                    for (dx, dy) in [(0, 1), (0, -1), (1, 0), (-1, 0)] {
                        let probe = CellPos::new(old_tail.x + dx, old_tail.y + dy);
                        if cur.in_bounds(probe.x, probe.y)
                            && cur.get(probe.x, probe.y) == Material::Empty
                        {
                            water_pos = probe;
                            break;
                        }
                    }
                }
                if cur.get(water_pos.x, water_pos.y) == Material::Empty {
                    cur.set_cell(
                        water_pos.x,
                        water_pos.y,
                        Cell {
                            material: Material::Water,
                            life: 0,
                            tint: 0,
                        },
                    );
                }
            }

            if m.eats_tree {
                worm.eat_tree();
                ate = true;
            }

            let previous = worm.under_head.material;
            worm.under_head = next_substrate;
            worm.last_head_pos = Some(worm.head);
            if next_substrate.material.has_contact_tone() && next_substrate.material != previous {
                contact = Some(next_substrate.material);
            }
        }

        if ate {
            self.emit_worm(id, WormEventKind::Eating);
        }
        if let Some(material) = contact {
            self.emit_worm(id, WormEventKind::MaterialContact(material));
        }
    }

    /// Emergency maneuvers for a worm with no admissible moves: reverse on
    /// the first stuck cycle, rotate all three segments on repeats.
    fn handle_stuck(&mut self, id: WormId, was_stuck: bool) {
        let World {
            grid, worms, ..
        } = self;
        let Some(worm) = worms.get_mut(id) else {
            return;
        };
        let cur = grid.current_mut();
        let life = worm.life.max(0) as u16;

        if !was_stuck {
            std::mem::swap(&mut worm.head, &mut worm.tail);
            cur.set_cell(
                worm.head.x,
                worm.head.y,
                Cell {
                    material: Material::WormHead,
                    life,
                    tint: 0,
                },
            );
            cur.set_cell(
                worm.tail.x,
                worm.tail.y,
                Cell {
                    material: Material::WormTail,
                    life,
                    tint: 0,
                },
            );
        } else {
            let old_head = worm.head;
            let old_body = worm.body;
            let old_tail = worm.tail;
            worm.head = old_body;
            worm.body = old_tail;
            worm.tail = old_head;
            for (pos, marker) in [
                (worm.head, Material::WormHead),
                (worm.body, Material::WormBody),
                (worm.tail, Material::WormTail),
            ] {
                cur.set_cell(
                    pos.x,
                    pos.y,
                    Cell {
                        material: marker,
                        life,
                        tint: 0,
                    },
                );
            }
        }
        worm.last_head_pos = Some(worm.head);
    }

    /// Pairwise breeding scan, run on the slow accumulator.
    fn check_breeding(&mut self) {
        let ids: Vec<WormId> = self.worms.keys().collect();
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let a = ids[i];
                let b = ids[j];
                let close_and_mature = match (self.worms.get(a), self.worms.get(b)) {
                    (Some(wa), Some(wb)) => {
                        worms_close(wa, wb)
                            && wa.age() >= MATURITY_AGE
                            && wb.age() >= MATURITY_AGE
                    }
                    _ => false,
                };
                if !close_and_mature {
                    continue;
                }
                if self.is_submerged(a) || self.is_submerged(b) {
                    continue;
                }
                if self.rng.gen_bool(0.08) {
                    self.attempt_breeding(a, b);
                }
            }
        }
    }

    /// Many water contacts and almost no air across all segments.
    fn is_submerged(&self, id: WormId) -> bool {
        let Some(worm) = self.worms.get(id) else {
            return false;
        };
        let cur = self.grid.current();
        let mut water_contacts = 0;
        let mut air_contacts = 0;
        for part in worm.segments() {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nx = part.x + dx;
                    let ny = part.y + dy;
                    if !cur.in_bounds(nx, ny) {
                        continue;
                    }
                    match cur.get(nx, ny) {
                        Material::Water => water_contacts += 1,
                        Material::Empty | Material::Steam => air_contacts += 1,
                        _ => {}
                    }
                }
            }
        }
        water_contacts >= 6 && air_contacts < 3
    }

    /// Try to spawn an offspring near two parents.
    ///
    /// With at least three deduplicated empty, surface-contacted,
    /// non-waterlogged cells around the parents, the offspring inherits
    /// interleaved memory and a blended genome; both parents pay the life
    /// cost and get their recent memories reinforced. Without the space,
    /// both parents' recent memories are penalized instead.
    fn attempt_breeding(&mut self, a: WormId, b: WormId) {
        let mut candidates: Vec<CellPos> = Vec::new();
        {
            let cur = self.grid.current();
            for id in [a, b] {
                let Some(worm) = self.worms.get(id) else {
                    return;
                };
                for part in worm.segments() {
                    for dy in -1..=1 {
                        for dx in -1..=1 {
                            let pos = CellPos::new(part.x + dx, part.y + dy);
                            if cur.in_bounds(pos.x, pos.y)
                                && cur.get(pos.x, pos.y) == Material::Empty
                                && has_surface_contact(cur, pos.x, pos.y)
                                && !waterlogged(cur, pos)
                                && !candidates.contains(&pos)
                            {
                                candidates.push(pos);
                            }
                        }
                    }
                }
            }
        }

        if candidates.len() < 3 {
            for id in [a, b] {
                if let Some(worm) = self.worms.get_mut(id) {
                    worm.reinforce_recent(2, -1);
                }
            }
            return;
        }

        let (memory, genome) = {
            let inherited = {
                let wa = &self.worms[a];
                let wb = &self.worms[b];
                inherit_memory(wa, wb, &mut self.rng)
            };
            let wa = &self.worms[a];
            let wb = &self.worms[b];
            let genetics = color_genetics(wa, wb);
            let genome = offspring_genome(wa, wb, genetics, &inherited, &mut self.rng);
            (inherited, genome)
        };

        {
            let World {
                grid,
                worms,
                worm_index,
                rng,
                ..
            } = self;
            spawn_worm_from_candidates(
                worms,
                worm_index,
                rng,
                grid.current_mut(),
                &candidates,
                Some((memory, genome)),
            );
        }

        for id in [a, b] {
            if let Some(worm) = self.worms.get_mut(id) {
                worm.life -= BREEDING_LIFE_COST;
                worm.reinforce_recent(3, 2);
            }
            self.emit_worm(id, WormEventKind::Mating);
        }
        tracing::debug!(parent_a = ?a, parent_b = ?b, "worms bred");
    }
}

/// Any segment pair of the two worms within 2 Manhattan cells.
fn worms_close(a: &Worm, b: &Worm) -> bool {
    for pa in a.segments() {
        for pb in b.segments() {
            if pa.manhattan(pb) <= 2 {
                return true;
            }
        }
    }
    false
}
