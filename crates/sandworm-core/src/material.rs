//! Material identities and their static physical properties.

use serde::{Deserialize, Serialize};

/// Decomposition timer assigned to a freshly dead tree, in ticks.
pub const DEAD_TREE_DECAY_TICKS: u16 = 180;

/// Closed set of cell contents.
///
/// The three worm markers are grid-resident footprints of worm agents; they
/// are stamped and moved by the agent subsystem, never transported by the
/// movement pass.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub enum Material {
    #[default]
    Empty,
    Sand,
    Water,
    Fire,
    Dirt,
    Tree,
    Glass,
    Steam,
    Acid,
    Eraser,
    DeadTree,
    Lava,
    WormHead,
    WormBody,
    WormTail,
}

/// Static physical properties of a material.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MaterialProps {
    /// Falling priority / displacement eligibility class. Higher sinks through lower.
    pub density: u8,
    /// Whether fire and lava can convert this material to fire.
    pub flammable: bool,
    /// Finite lifetime in ticks for transient materials, `None` for stable ones.
    pub life: Option<u16>,
}

impl Material {
    /// Static property lookup; immutable after compile.
    #[must_use]
    pub const fn props(self) -> MaterialProps {
        match self {
            Self::Empty => MaterialProps {
                density: 0,
                flammable: false,
                life: None,
            },
            Self::Sand => MaterialProps {
                density: 3,
                flammable: false,
                life: None,
            },
            Self::Water => MaterialProps {
                density: 2,
                flammable: false,
                life: None,
            },
            Self::Fire => MaterialProps {
                density: 1,
                flammable: false,
                life: Some(60),
            },
            Self::Dirt => MaterialProps {
                density: 4,
                flammable: false,
                life: None,
            },
            Self::Tree => MaterialProps {
                density: 5,
                flammable: true,
                life: None,
            },
            Self::Glass => MaterialProps {
                density: 8,
                flammable: false,
                life: None,
            },
            Self::Steam => MaterialProps {
                density: 0,
                flammable: false,
                life: Some(120),
            },
            Self::Acid => MaterialProps {
                density: 2,
                flammable: false,
                life: Some(90),
            },
            Self::Eraser => MaterialProps {
                density: 1,
                flammable: false,
                life: None,
            },
            Self::DeadTree => MaterialProps {
                density: 5,
                flammable: true,
                life: None,
            },
            Self::Lava => MaterialProps {
                density: 4,
                flammable: false,
                life: None,
            },
            // Worm segments carry the agent's base life; ignition goes
            // through the agent's on-fire flag, not the flammability rules.
            Self::WormHead | Self::WormBody | Self::WormTail => MaterialProps {
                density: 1,
                flammable: true,
                life: Some(300),
            },
        }
    }

    /// Lifetime counter seeded into a freshly placed cell of this material.
    #[must_use]
    pub const fn initial_life(self) -> u16 {
        match self {
            Self::DeadTree => DEAD_TREE_DECAY_TICKS,
            other => match other.props().life {
                Some(life) => life,
                None => 0,
            },
        }
    }

    /// Whether fire or lava may ignite this material.
    #[must_use]
    pub const fn flammable(self) -> bool {
        self.props().flammable
    }

    /// One of the three grid footprints of a worm agent.
    #[must_use]
    pub const fn is_worm_segment(self) -> bool {
        matches!(self, Self::WormHead | Self::WormBody | Self::WormTail)
    }

    /// Surfaces worms crawl on and trees anchor to. Water counts: worms
    /// float on it and it bears weight for surface-contact purposes.
    #[must_use]
    pub const fn is_solid_surface(self) -> bool {
        matches!(
            self,
            Self::Sand | Self::Dirt | Self::Glass | Self::Tree | Self::DeadTree | Self::Water
        )
    }

    /// Strictly solid ground, used for elevation profiling (water excluded).
    #[must_use]
    pub const fn is_solid_ground(self) -> bool {
        matches!(
            self,
            Self::Sand | Self::Dirt | Self::Glass | Self::Tree | Self::DeadTree
        )
    }

    /// Materials that produce a contact tone when a worm slides onto them.
    #[must_use]
    pub const fn has_contact_tone(self) -> bool {
        matches!(
            self,
            Self::Sand
                | Self::Water
                | Self::Fire
                | Self::Dirt
                | Self::Tree
                | Self::Glass
                | Self::Steam
                | Self::Acid
                | Self::Lava
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_materials_expose_lifetimes() {
        assert_eq!(Material::Fire.props().life, Some(60));
        assert_eq!(Material::Steam.props().life, Some(120));
        assert_eq!(Material::Acid.props().life, Some(90));
        assert_eq!(Material::WormHead.props().life, Some(300));
        assert_eq!(Material::Sand.props().life, None);
    }

    #[test]
    fn dead_trees_seed_a_decomposition_timer() {
        assert_eq!(Material::DeadTree.initial_life(), DEAD_TREE_DECAY_TICKS);
        assert_eq!(Material::Dirt.initial_life(), 0);
        assert_eq!(Material::Fire.initial_life(), 60);
    }

    #[test]
    fn only_vegetation_and_worms_are_flammable() {
        let flammable: Vec<Material> = [
            Material::Tree,
            Material::DeadTree,
            Material::WormHead,
            Material::WormBody,
            Material::WormTail,
        ]
        .into_iter()
        .collect();
        for material in [
            Material::Empty,
            Material::Sand,
            Material::Water,
            Material::Fire,
            Material::Dirt,
            Material::Glass,
            Material::Steam,
            Material::Acid,
            Material::Lava,
        ] {
            assert!(!material.flammable(), "{material:?} should not ignite");
        }
        for material in flammable {
            assert!(material.flammable(), "{material:?} should ignite");
        }
    }
}
