//! Review markup processing: question container extraction, type-specific
//! transforms and shared markup helpers.

pub mod dispatcher;
pub mod fragment;
pub mod markup;
pub mod plugins;

pub use self::dispatcher::{
    DispatchOutcome, FragmentDispatcher, FragmentTransform, TransformContext, TransformRegistry,
};
pub use self::fragment::{extract_fragments, DocumentFragment};
