//! File locator.
//!
//! Expands the per-stage filename templates of a pipeline against a pass and
//! discovers the files that actually arrived. Raw packet names carry
//! unpredictable sub-fields, so input templates are glob patterns; when several
//! files match, the most recently modified one is used.

mod config;
#[allow(clippy::module_inception)]
mod locator;
mod template;

pub use config::LocatorConfig;
pub use locator::{FileLocator, LocatorError, ResolvedPaths};
pub(crate) use locator::matches_with_mtime;
pub use template::{Template, TemplateContext, TemplateError};
