//! Post-parse transformation pipeline.
//!
//! Transforms run in registration order over the parsed content; a
//! failure anywhere surfaces as a `Content` error and is never
//! retried.

use std::sync::Arc;

use fetchkit_core::{FetchError, ParsedContent};

/// One step of the pipeline.
pub trait ContentTransform: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, content: ParsedContent) -> Result<ParsedContent, FetchError>;
}

/// Ordered transform chain.
#[derive(Default, Clone)]
pub struct TransformPipeline {
    transforms: Vec<Arc<dyn ContentTransform>>,
}

impl TransformPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, transform: Arc<dyn ContentTransform>) {
        self.transforms.push(transform);
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    /// Applies every transform in order.
    pub fn apply(&self, mut content: ParsedContent) -> Result<ParsedContent, FetchError> {
        for transform in &self.transforms {
            content = transform.apply(content).map_err(|e| match e {
                FetchError::Content { message } => FetchError::Content {
                    message: format!("transform '{}': {message}", transform.name()),
                },
                other => other,
            })?;
        }
        Ok(content)
    }
}

/// Extracts a pointer path (`/a/b/0`) out of JSON content, leaving
/// other content untouched.
pub struct JsonPointerTransform {
    pointer: String,
}

impl JsonPointerTransform {
    pub fn new(pointer: impl Into<String>) -> Self {
        Self {
            pointer: pointer.into(),
        }
    }
}

impl ContentTransform for JsonPointerTransform {
    fn name(&self) -> &str {
        "json_pointer"
    }

    fn apply(&self, content: ParsedContent) -> Result<ParsedContent, FetchError> {
        match content {
            ParsedContent::Json(value) => match value.pointer(&self.pointer) {
                Some(found) => Ok(ParsedContent::Json(found.clone())),
                None => Err(FetchError::Content {
                    message: format!("pointer '{}' matched nothing", self.pointer),
                }),
            },
            other => Ok(other),
        }
    }
}

/// Trims surrounding whitespace from text content.
pub struct TrimTransform;

impl ContentTransform for TrimTransform {
    fn name(&self) -> &str {
        "trim"
    }

    fn apply(&self, content: ParsedContent) -> Result<ParsedContent, FetchError> {
        match content {
            ParsedContent::Text(text) => Ok(ParsedContent::Text(text.trim().to_string())),
            other => Ok(other),
        }
    }
}
