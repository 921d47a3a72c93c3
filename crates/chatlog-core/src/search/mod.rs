pub mod controller;
pub mod facets;
pub mod index;

pub use controller::{SearchController, SearchSnapshot};
pub use facets::{FacetCache, FacetKey};
pub use index::{IndexLifecycle, IndexTransition};
