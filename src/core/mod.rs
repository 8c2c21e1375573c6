// Core algorithm exports
pub mod diff;
pub mod filters;
pub mod matcher;

pub use diff::compute_diff;
pub use filters::is_compatible;
pub use matcher::Matcher;
