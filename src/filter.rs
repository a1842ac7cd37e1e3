//! # Filters
//!
//! Pure predicates evaluated per message at read and notify time. They never
//! alter stored data and are never persisted.
//!
//! ```text
//! AllStreamFilter
//! ├── prefixes: {"order-", "invoice-"}   (empty ⇒ every stream)
//! └── message types (optional)
//!     ├── Matching  {"Created"}   type ∈ set
//!     └── Excluding {"Created"}   type ∉ set
//!
//! matches = prefix_ok && type_ok
//! ```
//!
//! Filters are immutable values: build one with [`AllStreamFilter::builder`]
//! and share it freely, including with a live subscription.

use std::collections::HashSet;

use crate::types::StreamMessage;

// =============================================================================
// Message Type Filter
// =============================================================================

/// How a [`MessageTypeFilter`] treats its set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFilterMode {
    /// Only the listed types pass.
    Matching,
    /// Everything except the listed types passes.
    Excluding,
}

/// A predicate over the message type. Comparison is ordinal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTypeFilter {
    mode: TypeFilterMode,
    types: HashSet<String>,
}

impl MessageTypeFilter {
    /// Accepts only messages whose type is in `types`.
    pub fn matching<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mode: TypeFilterMode::Matching,
            types: types.into_iter().map(Into::into).collect(),
        }
    }

    /// Accepts only messages whose type is NOT in `types`.
    pub fn excluding<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mode: TypeFilterMode::Excluding,
            types: types.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the filter mode.
    pub fn mode(&self) -> TypeFilterMode {
        self.mode
    }

    /// Returns the configured set of types.
    pub fn types(&self) -> &HashSet<String> {
        &self.types
    }

    /// Evaluates the predicate for a message type.
    pub fn matches(&self, message_type: &str) -> bool {
        let listed = self.types.contains(message_type);
        match self.mode {
            TypeFilterMode::Matching => listed,
            TypeFilterMode::Excluding => !listed,
        }
    }
}

// =============================================================================
// All Stream Filter
// =============================================================================

/// Stream-prefix filter with an optional message type filter.
///
/// # Example
///
/// ```rust
/// use streamstore::filter::{AllStreamFilter, MessageTypeFilter};
///
/// let filter = AllStreamFilter::builder()
///     .prefix("order-")
///     .message_types(MessageTypeFilter::matching(["Created"]))
///     .build();
///
/// assert!(filter.matches("order-123", "Created"));
/// assert!(!filter.matches("order-123", "Shipped"));
/// assert!(!filter.matches("invoice-5", "Created"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllStreamFilter {
    prefixes: Vec<String>,
    message_types: Option<MessageTypeFilter>,
}

impl AllStreamFilter {
    /// Starts building a filter.
    pub fn builder() -> AllStreamFilterBuilder {
        AllStreamFilterBuilder::default()
    }

    /// A filter that lets every message through.
    pub fn all() -> Self {
        Self::default()
    }

    /// Shorthand for a prefix-only filter.
    pub fn with_prefixes<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::builder().prefixes(prefixes).build()
    }

    /// Returns the configured stream id prefixes.
    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// Returns the attached message type filter, if any.
    pub fn message_type_filter(&self) -> Option<&MessageTypeFilter> {
        self.message_types.as_ref()
    }

    /// Returns true when the stream id passes the prefix check.
    ///
    /// An empty prefix set accepts every stream.
    pub fn matches_stream(&self, stream_id: &str) -> bool {
        self.prefixes.is_empty() || self.prefixes.iter().any(|p| stream_id.starts_with(p.as_str()))
    }

    /// Evaluates the whole filter for one `(stream id, message type)` pair.
    pub fn matches(&self, stream_id: &str, message_type: &str) -> bool {
        self.matches_stream(stream_id)
            && self
                .message_types
                .as_ref()
                .map_or(true, |types| types.matches(message_type))
    }

    /// Evaluates the filter against a committed message.
    pub fn satisfied_by(&self, message: &StreamMessage) -> bool {
        self.matches(message.stream_id.as_str(), &message.message_type)
    }
}

/// Absent filter ⇒ every message passes.
pub fn satisfies(filter: Option<&AllStreamFilter>, message: &StreamMessage) -> bool {
    filter.map_or(true, |f| f.satisfied_by(message))
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`AllStreamFilter`].
///
/// # Rust Pattern: Consuming Builder
///
/// Each method takes `self` by value and returns it, so the filter can only be
/// mutated while it is being built. `build()` hands out the finished value.
#[derive(Debug, Default)]
pub struct AllStreamFilterBuilder {
    prefixes: Vec<String>,
    message_types: Option<MessageTypeFilter>,
}

impl AllStreamFilterBuilder {
    /// Adds one stream id prefix.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefixes.push(prefix.into());
        self
    }

    /// Adds several stream id prefixes.
    pub fn prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prefixes.extend(prefixes.into_iter().map(Into::into));
        self
    }

    /// Attaches a message type filter, combined with the prefixes by AND.
    pub fn message_types(mut self, filter: MessageTypeFilter) -> Self {
        self.message_types = Some(filter);
        self
    }

    /// Finishes the filter.
    pub fn build(self) -> AllStreamFilter {
        AllStreamFilter {
            prefixes: self.prefixes,
            message_types: self.message_types,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
