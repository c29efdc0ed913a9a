pub mod descriptors;
pub mod events;
pub mod models;
pub mod results;
pub mod runs;
pub mod selection;
pub mod settings;

pub use descriptors::ObjectDescriptor;
pub use results::{GeneratedImageReference, ResultCollection};
pub use selection::SelectionSet;
pub use settings::{ImageSize, Quality};
