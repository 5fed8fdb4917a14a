//! Core simulation for the sandworm particle world.
//!
//! A double-buffered cellular grid of discrete materials (sand, water, fire,
//! acid, lava, trees) advanced by per-tick movement and interaction passes,
//! with an agent subsystem of three-segment worms that sense, remember,
//! breed, and die on the same grid. Rendering, audio, and input live outside
//! this crate; hosts drive [`World::advance`] and consume [`WorldSnapshot`]
//! and [`SimEvent`]s.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use sandworm_index::{DenseOwnerIndex, OwnerIndex};
use serde::{Deserialize, Serialize};
use slotmap::{Key, SlotMap};
use thiserror::Error;

mod grid;
mod material;
mod sim;
mod trees;
mod worms;

pub use grid::{Cell, CellBuffer, CellPos, GridState};
pub use material::{Material, MaterialProps, DEAD_TREE_DECAY_TICKS};
pub use trees::TreeGrowthNode;
pub use worms::{
    ColorGenome, ColorVariants, Goal, MemoryEntry, MemoryKey, MemoryKind, Worm, WormId,
    WORM_BASE_LIFE, WORM_MAX_LIFE,
};

/// High level simulation clock (ticks processed since boot).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Errors raised while constructing or reconfiguring a world.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorldError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Named audio cue attached to a splash event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SplashCue {
    WaterDrop,
    SteamHiss,
    AcidFizz,
    LavaBloop,
}

/// Worm lifecycle signals surfaced to the host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum WormEventKind {
    Moved,
    Eating,
    Mating,
    Dying,
    MaterialContact(Material),
}

/// Typed event emitted by the interaction pass and the agent subsystem.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum SimEvent {
    /// Water-class chemical reaction; rate-limited to one per tick.
    Splash { cue: SplashCue, intensity: f32 },
    /// Worm lifecycle transition or signal.
    Worm { id: WormId, kind: WormEventKind },
}

/// Event sink invoked synchronously as events fire; must not block.
pub trait EventSink: Send {
    fn on_event(&mut self, event: &SimEvent);
}

/// No-op event sink.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn on_event(&mut self, _event: &SimEvent) {}
}

/// Static configuration for a sandworm world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Grid width in cells.
    pub width: i32,
    /// Grid height in cells.
    pub height: i32,
    /// Optional RNG seed for reproducible runs.
    pub rng_seed: Option<u64>,
    /// Per-cell fill probability for brush placement.
    pub brush_fill_chance: f64,
    /// Ticks between generator emissions; 0 disables generators.
    pub generator_interval: u32,
    /// Milliseconds of wall time per worm update cycle.
    pub worm_update_interval_ms: f32,
    /// Milliseconds of wall time between breeding checks.
    pub breeding_interval_ms: f32,
    /// Ticks between rebuilds of the amortized tree work-list.
    pub tree_rescan_interval: u32,
    /// Trees evaluated for death/growth per tick.
    pub trees_per_tick: usize,
    /// Visit cap for the bounded connected-region count.
    pub flood_fill_cap: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            rng_seed: None,
            brush_fill_chance: 0.2,
            generator_interval: 3,
            worm_update_interval_ms: 100.0,
            breeding_interval_ms: 500.0,
            tree_rescan_interval: 10,
            trees_per_tick: 50,
            flood_fill_cap: 50,
        }
    }
}

impl WorldConfig {
    fn validate(&self) -> Result<(), WorldError> {
        if self.width <= 0 || self.height <= 0 {
            return Err(WorldError::InvalidConfig(
                "grid dimensions must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&self.brush_fill_chance) {
            return Err(WorldError::InvalidConfig(
                "brush_fill_chance must be within [0, 1]",
            ));
        }
        if self.worm_update_interval_ms <= 0.0 || self.breeding_interval_ms <= 0.0 {
            return Err(WorldError::InvalidConfig(
                "worm update and breeding intervals must be positive",
            ));
        }
        if self.tree_rescan_interval == 0 {
            return Err(WorldError::InvalidConfig(
                "tree_rescan_interval must be non-zero",
            ));
        }
        if self.trees_per_tick == 0 || self.flood_fill_cap == 0 {
            return Err(WorldError::InvalidConfig(
                "tree batch size and flood fill cap must be non-zero",
            ));
        }
        Ok(())
    }

    /// Returns the configured RNG, seeding from entropy if no seed is set.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

/// Persistent material emitter placed by the host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Generator {
    pub x: i32,
    pub y: i32,
    pub material: Material,
    pub radius: i32,
}

/// Per-tick summary returned by [`World::advance`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TickEvents {
    /// Tick that just completed.
    pub tick: Tick,
    /// Worm update cycles that ran inside this tick.
    pub worm_cycles: u32,
    /// Water cells that fell this tick, for host-side ambience.
    pub falling_water: u32,
}

/// Aggregate simulation state: grid buffers, queues, agents, RNG, and sink.
///
/// All operations go through this context; there is no module-level state,
/// so independent worlds can coexist and tests can seed their own RNG.
pub struct World {
    config: WorldConfig,
    tick: Tick,
    rng: SmallRng,
    grid: GridState,
    growth_queue: Vec<TreeGrowthNode>,
    trees_to_process: Vec<CellPos>,
    tree_cursor: usize,
    worms: SlotMap<WormId, Worm>,
    worm_index: DenseOwnerIndex<WormId>,
    generators: Vec<Generator>,
    worm_clock: f32,
    breeding_clock: f32,
    sink: Box<dyn EventSink>,
    splash_emitted: bool,
    falling_water: u32,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("config", &self.config)
            .field("tick", &self.tick)
            .field("worm_count", &self.worms.len())
            .field("pending_growth", &self.growth_queue.len())
            .finish()
    }
}

impl World {
    /// Instantiate a new world using the supplied configuration.
    pub fn new(config: WorldConfig) -> Result<Self, WorldError> {
        Self::with_sink(config, Box::new(NullSink))
    }

    /// Instantiate a new world with an event sink already attached.
    pub fn with_sink(config: WorldConfig, sink: Box<dyn EventSink>) -> Result<Self, WorldError> {
        config.validate()?;
        let rng = config.seeded_rng();
        let grid = GridState::new(config.width, config.height);
        let worm_index = DenseOwnerIndex::new(config.width, config.height)
            .map_err(|_| WorldError::InvalidConfig("grid dimensions must be positive"))?;
        tracing::debug!(width = config.width, height = config.height, "world created");
        Ok(Self {
            config,
            tick: Tick::zero(),
            rng,
            grid,
            growth_queue: Vec::new(),
            trees_to_process: Vec::new(),
            tree_cursor: 0,
            worms: SlotMap::with_key(),
            worm_index,
            generators: Vec::new(),
            worm_clock: 0.0,
            breeding_clock: 0.0,
            sink,
            splash_emitted: false,
            falling_water: 0,
        })
    }

    /// Execute one full simulation tick for `elapsed_ms` of wall time.
    ///
    /// Pipeline: generator emission, tree behavior, worm cycles (on their own
    /// fixed cadence), burning-worm overlay, dead-tree decomposition, the
    /// movement pass into the back buffer, the interaction pass, commit, tint
    /// diffusion, and the fractal growth queue.
    pub fn advance(&mut self, elapsed_ms: f32) -> TickEvents {
        let next_tick = self.tick.next();
        self.splash_emitted = false;
        self.falling_water = 0;

        self.stage_generators(next_tick);
        self.stage_tree_behavior(next_tick);
        let worm_cycles = self.stage_worms(elapsed_ms);
        self.stage_burning_worms();
        self.stage_decomposition();
        self.stage_movement();
        self.stage_interactions();
        self.grid.commit();
        self.stage_tint_diffusion();
        self.stage_fractal_growth();

        self.tick = next_tick;
        TickEvents {
            tick: self.tick,
            worm_cycles,
            falling_water: self.falling_water,
        }
    }

    /// Stochastically fill a disc of cells with `material`.
    ///
    /// Only empty cells are painted (20% per cell by default); the eraser
    /// clears any cell and its counters instead, and worm materials route to
    /// worm spawning.
    pub fn place_material(&mut self, x: i32, y: i32, material: Material, radius: i32) {
        if material.is_worm_segment() {
            self.spawn_worm_near(x, y);
            return;
        }
        let radius = radius.max(0);
        let radius_sq = radius * radius;
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx * dx + dy * dy > radius_sq {
                    continue;
                }
                let nx = x + dx;
                let ny = y + dy;
                if !self.grid.in_bounds(nx, ny) {
                    continue;
                }
                let existing = self.grid.current().get(nx, ny);
                if existing != Material::Empty && material != Material::Eraser {
                    continue;
                }
                if !self.rng.gen_bool(self.config.brush_fill_chance) {
                    continue;
                }
                if material == Material::Eraser {
                    self.grid.current_mut().set_cell(nx, ny, Cell::EMPTY);
                } else {
                    self.grid.current_mut().set(nx, ny, material);
                }
            }
        }
    }

    /// Bulk-write a row-major block of materials at the given offset.
    ///
    /// Out-of-bounds cells are skipped; eraser entries clear their cells.
    pub fn import_material_map(
        &mut self,
        width: i32,
        materials: &[Material],
        offset_x: i32,
        offset_y: i32,
    ) {
        if width <= 0 {
            return;
        }
        for (i, &material) in materials.iter().enumerate() {
            let x = offset_x + (i as i32 % width);
            let y = offset_y + (i as i32 / width);
            if !self.grid.in_bounds(x, y) {
                continue;
            }
            if material == Material::Eraser {
                self.grid.current_mut().set_cell(x, y, Cell::EMPTY);
            } else {
                self.grid.current_mut().set(x, y, material);
            }
        }
    }

    /// Register a persistent emitter that repeats `place_material` on an interval.
    pub fn add_generator(&mut self, x: i32, y: i32, material: Material, radius: i32) {
        self.generators.push(Generator {
            x,
            y,
            material,
            radius,
        });
    }

    /// Remove generators within a small halo of `(x, y)`.
    pub fn clear_generators_near(&mut self, x: i32, y: i32) {
        self.generators
            .retain(|g| (g.x - x).abs() > 2 || (g.y - y).abs() > 2);
    }

    /// Currently registered generators.
    #[must_use]
    pub fn generators(&self) -> &[Generator] {
        &self.generators
    }

    fn stage_generators(&mut self, next_tick: Tick) {
        let interval = self.config.generator_interval;
        if interval == 0 || self.generators.is_empty() {
            return;
        }
        if next_tick.0 % u64::from(interval) != 0 {
            return;
        }
        let emitters = self.generators.clone();
        for g in emitters {
            self.place_material(g.x, g.y, g.material, g.radius);
        }
    }

    /// Reallocate the grid, best-effort copying the overlapping region.
    ///
    /// Worms and queued growth nodes left outside the new bounds retire
    /// through their normal lifecycle checks.
    pub fn resize(&mut self, width: i32, height: i32) -> Result<(), WorldError> {
        if width <= 0 || height <= 0 {
            return Err(WorldError::InvalidConfig(
                "grid dimensions must be positive",
            ));
        }
        if width == self.config.width && height == self.config.height {
            return Ok(());
        }
        self.grid.resize(width, height);
        self.config.width = width;
        self.config.height = height;
        self.worm_index
            .resize(width, height)
            .map_err(|_| WorldError::InvalidConfig("grid dimensions must be positive"))?;
        let claims: Vec<(CellPos, WormId)> = self
            .worms
            .iter()
            .flat_map(|(id, worm)| worm.segments().map(move |pos| (pos, id)))
            .filter(|(pos, _)| self.grid.in_bounds(pos.x, pos.y))
            .collect();
        for (pos, id) in claims {
            self.worm_index.claim(pos.x, pos.y, id);
        }
        self.trees_to_process.clear();
        self.tree_cursor = 0;
        tracing::debug!(width, height, "grid resized");
        Ok(())
    }

    /// Replace the event sink.
    pub fn set_event_sink(&mut self, sink: Box<dyn EventSink>) {
        self.sink = sink;
    }

    /// Read-only view of the grid and worm colors for a renderer.
    #[must_use]
    pub fn snapshot(&self) -> WorldSnapshot<'_> {
        WorldSnapshot { world: self }
    }

    /// Returns an immutable reference to configuration.
    #[must_use]
    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    /// Current simulation tick.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Borrow the world RNG mutably for deterministic sampling.
    #[must_use]
    pub fn rng(&mut self) -> &mut SmallRng {
        &mut self.rng
    }

    /// Committed cell buffer.
    #[must_use]
    pub fn cells(&self) -> &CellBuffer {
        self.grid.current()
    }

    /// Mutable access to the committed cell buffer (for host-driven edits).
    pub fn cells_mut(&mut self) -> &mut CellBuffer {
        self.grid.current_mut()
    }

    /// Number of live worms.
    #[must_use]
    pub fn worm_count(&self) -> usize {
        self.worms.len()
    }

    /// Iterate live worms with their handles.
    pub fn worms(&self) -> impl Iterator<Item = (WormId, &Worm)> {
        self.worms.iter()
    }

    /// Borrow a worm by handle.
    #[must_use]
    pub fn worm(&self, id: WormId) -> Option<&Worm> {
        self.worms.get(id)
    }

    /// Mutably borrow a worm by handle.
    pub fn worm_mut(&mut self, id: WormId) -> Option<&mut Worm> {
        self.worms.get_mut(id)
    }

    /// Queued fractal growth nodes awaiting their next step.
    #[must_use]
    pub fn pending_growth(&self) -> usize {
        self.growth_queue.len()
    }

    pub(crate) fn emit(&mut self, event: SimEvent) {
        self.sink.on_event(&event);
    }

    pub(crate) fn emit_worm(&mut self, id: WormId, kind: WormEventKind) {
        self.emit(SimEvent::Worm { id, kind });
    }
}

/// Read-only accessor over a world's committed state.
pub struct WorldSnapshot<'a> {
    world: &'a World,
}

impl WorldSnapshot<'_> {
    /// Grid width in cells.
    #[must_use]
    pub fn width(&self) -> i32 {
        self.world.grid.width()
    }

    /// Grid height in cells.
    #[must_use]
    pub fn height(&self) -> i32 {
        self.world.grid.height()
    }

    /// Material at `(x, y)`; `Empty` outside bounds.
    #[must_use]
    pub fn material(&self, x: i32, y: i32) -> Material {
        self.world.grid.current().get(x, y)
    }

    /// Full cell value at `(x, y)`.
    #[must_use]
    pub fn cell(&self, x: i32, y: i32) -> Cell {
        self.world.grid.current().cell_at(x, y)
    }

    /// Contamination tint of the water at `(x, y)`, 0 when clean or not water.
    #[must_use]
    pub fn tint(&self, x: i32, y: i32) -> u8 {
        self.world.grid.current().cell_at(x, y).tint
    }

    /// Genetic color of the worm segment at `(x, y)`, if one is there.
    ///
    /// Resolved through the ownership index; the variant picked is stable per
    /// worm so segments shimmer consistently across frames.
    #[must_use]
    pub fn worm_color(&self, x: i32, y: i32) -> Option<[u8; 3]> {
        let material = self.material(x, y);
        if !material.is_worm_segment() {
            return None;
        }
        let id = self.world.worm_index.owner_at(x, y)?;
        let worm = self.world.worms.get(id)?;
        let variants = match material {
            Material::WormHead => &worm.genome.head,
            Material::WormBody => &worm.genome.body,
            _ => &worm.genome.tail,
        };
        let variant = (id.data().as_ffi() & 3) as usize;
        Some(variants[variant])
    }

    /// Number of live worms.
    #[must_use]
    pub fn worm_count(&self) -> usize {
        self.world.worms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(width: i32, height: i32, seed: u64) -> World {
        World::new(WorldConfig {
            width,
            height,
            rng_seed: Some(seed),
            ..WorldConfig::default()
        })
        .expect("world")
    }

    #[test]
    fn config_validation_rejects_bad_values() {
        let bad_dims = WorldConfig {
            width: 0,
            ..WorldConfig::default()
        };
        assert!(World::new(bad_dims).is_err());

        let bad_chance = WorldConfig {
            brush_fill_chance: 1.5,
            ..WorldConfig::default()
        };
        assert!(World::new(bad_chance).is_err());

        let bad_interval = WorldConfig {
            worm_update_interval_ms: 0.0,
            ..WorldConfig::default()
        };
        assert!(World::new(bad_interval).is_err());
    }

    #[test]
    fn brush_placement_only_fills_empty_cells() {
        let mut world = seeded(32, 32, 7);
        world.cells_mut().set(16, 16, Material::Glass);
        for _ in 0..64 {
            world.place_material(16, 16, Material::Sand, 3);
        }
        assert_eq!(world.cells().get(16, 16), Material::Glass);
        let sand = world
            .cells()
            .cells()
            .iter()
            .filter(|cell| cell.material == Material::Sand)
            .count();
        assert!(sand > 0, "repeated brushing should have placed sand");
    }

    #[test]
    fn eraser_clears_cells_and_counters() {
        let mut world = seeded(16, 16, 3);
        world.cells_mut().set(8, 8, Material::Fire);
        for _ in 0..64 {
            world.place_material(8, 8, Material::Eraser, 1);
        }
        assert_eq!(world.cells().cell_at(8, 8), Cell::EMPTY);
    }

    #[test]
    fn import_skips_out_of_bounds_cells() {
        let mut world = seeded(8, 8, 1);
        let block = vec![Material::Glass; 16];
        world.import_material_map(4, &block, 6, 6);
        assert_eq!(world.cells().get(6, 6), Material::Glass);
        assert_eq!(world.cells().get(7, 7), Material::Glass);
        // Nothing outside the grid, nothing wrapped.
        assert_eq!(world.cells().get(0, 0), Material::Empty);
        let placed = world
            .cells()
            .cells()
            .iter()
            .filter(|cell| cell.material == Material::Glass)
            .count();
        assert_eq!(placed, 4);
    }

    #[test]
    fn generators_emit_on_their_interval() {
        let mut world = seeded(32, 32, 11);
        world.add_generator(16, 4, Material::Sand, 2);
        for _ in 0..30 {
            world.advance(16.0);
        }
        let sand = world
            .cells()
            .cells()
            .iter()
            .filter(|cell| cell.material == Material::Sand)
            .count();
        assert!(sand > 0, "generator should have emitted sand");
        world.clear_generators_near(16, 4);
        assert!(world.generators().is_empty());
    }

    #[test]
    fn resize_same_dimensions_is_a_noop_for_contents() {
        let mut world = seeded(24, 24, 5);
        world.cells_mut().set(10, 10, Material::Lava);
        let before: Vec<Cell> = world.cells().cells().to_vec();
        world.resize(24, 24).expect("resize");
        assert_eq!(world.cells().cells(), &before[..]);
    }

    #[test]
    fn empty_cells_never_carry_counters_after_ticks() {
        let mut world = seeded(48, 48, 13);
        world.place_material(24, 8, Material::Water, 4);
        world.place_material(24, 30, Material::Fire, 3);
        world.place_material(10, 20, Material::Sand, 4);
        for _ in 0..120 {
            world.advance(16.0);
        }
        for cell in world.cells().cells() {
            if cell.material == Material::Empty {
                assert_eq!(cell.life, 0);
                assert_eq!(cell.tint, 0);
            }
        }
    }
}
