//! Routes each question container to the transform registered for its type.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::fragment::{extract_fragments, DocumentFragment};
use super::plugins;
use crate::blob::BlobStore;
use crate::error::Result;
use crate::overlay::OverlayRenderer;
use crate::source::{AttemptSource, SlotRecord, SubjectRecord};

/// Everything a transform may consult while rewriting one fragment.
#[derive(Clone, Copy)]
pub struct TransformContext<'a> {
    pub subject: &'a SubjectRecord,
    /// Attempt data of the fragment's slot, when the subject has it.
    pub slot: Option<&'a SlotRecord>,
    pub blobs: &'a dyn BlobStore,
    pub source: &'a dyn AttemptSource,
    pub overlay: &'a OverlayRenderer,
    pub stack_plot_dir: &'a Path,
}

impl<'a> TransformContext<'a> {
    pub fn new(
        subject: &'a SubjectRecord,
        blobs: &'a dyn BlobStore,
        source: &'a dyn AttemptSource,
        overlay: &'a OverlayRenderer,
        stack_plot_dir: &'a Path,
    ) -> Self {
        Self {
            subject,
            slot: None,
            blobs,
            source,
            overlay,
            stack_plot_dir,
        }
    }

    /// Same context, scoped to one question slot.
    pub fn with_slot(&self, slot_index: u32) -> Self {
        Self {
            slot: self.subject.slot(slot_index),
            ..*self
        }
    }
}

/// Type-specific rewrite of one question container.
///
/// Transforms hold no per-document state and may run any number of times,
/// in any order, within one document.
#[async_trait]
pub trait FragmentTransform: Send + Sync {
    /// Question type this transform handles, e.g. `ddwtos`.
    fn type_tag(&self) -> &'static str;

    /// Returns the replacement markup for `fragment`.
    async fn transform(
        &self,
        fragment: &DocumentFragment,
        ctx: &TransformContext<'_>,
    ) -> Result<String>;

    /// Stylesheet added to the page once when this transform ran.
    fn css(&self) -> &'static str {
        ""
    }
}

#[derive(Clone, Default)]
pub struct TransformRegistry {
    transforms: HashMap<&'static str, Arc<dyn FragmentTransform>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in transform.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(plugins::ddimageortext::DdImageOrTextTransform));
        registry.register(Arc::new(plugins::ddmarker::DdMarkerTransform));
        registry.register(Arc::new(plugins::ddwtos::DdwtosTransform));
        registry.register(Arc::new(plugins::essay::EssayTransform));
        registry.register(Arc::new(plugins::multichoice::MultichoiceTransform));
        registry.register(Arc::new(plugins::stack::StackTransform));
        registry
    }

    /// Adds `transform`, replacing any transform for the same type.
    pub fn register(&mut self, transform: Arc<dyn FragmentTransform>) {
        self.transforms.insert(transform.type_tag(), transform);
    }

    pub fn get(&self, type_tag: &str) -> Option<&Arc<dyn FragmentTransform>> {
        self.transforms.get(type_tag)
    }

    pub fn type_tags(&self) -> Vec<&'static str> {
        let mut tags: Vec<&'static str> = self.transforms.keys().copied().collect();
        tags.sort_unstable();
        tags
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub html: String,
    /// Concatenated stylesheets of the transforms that ran.
    pub css: String,
    pub transformed: usize,
}

pub struct FragmentDispatcher {
    registry: TransformRegistry,
}

impl FragmentDispatcher {
    pub fn new(registry: TransformRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &TransformRegistry {
        &self.registry
    }

    /// Rewrites every question container of `html` that has a registered
    /// transform; everything else is copied through unchanged.
    pub async fn dispatch(
        &self,
        html: &str,
        ctx: &TransformContext<'_>,
    ) -> Result<DispatchOutcome> {
        let fragments = extract_fragments(html);
        let mut replacements = Vec::new();
        let mut css_from: Vec<&'static str> = Vec::new();
        let mut css = String::new();

        for fragment in &fragments {
            let Some(transform) = self.registry.get(&fragment.type_tag) else {
                debug!(type_tag = %fragment.type_tag, slot = fragment.slot_index, "No transform registered");
                continue;
            };
            let slot_ctx = ctx.with_slot(fragment.slot_index);
            let replacement = transform.transform(fragment, &slot_ctx).await?;
            debug!(
                type_tag = %fragment.type_tag,
                slot = fragment.slot_index,
                "Transformed question fragment"
            );
            replacements.push((fragment.span.clone(), replacement));

            if !css_from.contains(&transform.type_tag()) {
                css_from.push(transform.type_tag());
                let sheet = transform.css();
                if !sheet.is_empty() {
                    css.push_str(sheet);
                    css.push('\n');
                }
            }
        }

        let transformed = replacements.len();
        let mut output = html.to_string();
        for (span, replacement) in replacements.into_iter().rev() {
            output.replace_range(span, &replacement);
        }

        Ok(DispatchOutcome {
            html: output,
            css,
            transformed,
        })
    }
}
