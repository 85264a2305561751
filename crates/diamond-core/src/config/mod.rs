//! Configuration: facet definitions, project settings and path resolution.

pub mod facets;
pub mod project;
pub mod resolver;

pub use facets::{FacetConfig, FacetVersion, FacetsConfig, VersionSpec};
pub use project::{DiamondSettings, NetworkConfig, PathOverrides, ProjectConfig};
pub use resolver::{ConfigResolver, ConfigSource, DiamondPaths, ResolvedDiamond};
