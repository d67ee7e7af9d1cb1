//! The layer stack: push/pop history of active layers; top is effective.

/// Ordered stack of active layer names. Depth is >= 1 at all times: the
/// base layer can never be popped.
#[derive(Debug, Clone)]
pub struct LayerStack {
    base: String,
    extra: Vec<String>,
}

impl LayerStack {
    /// A stack containing only the base layer.
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            extra: Vec::new(),
        }
    }

    /// The active (topmost) layer name.
    pub fn current(&self) -> &str {
        self.extra.last().unwrap_or(&self.base)
    }

    /// Number of entries on the stack, including the base.
    pub fn depth(&self) -> usize {
        1 + self.extra.len()
    }

    /// Push a layer on top of the stack.
    pub fn push(&mut self, layer: impl Into<String>) {
        self.extra.push(layer.into());
    }

    /// Pop the top layer. Returns false (and leaves the stack untouched)
    /// at depth 1.
    pub fn pop(&mut self) -> bool {
        self.extra.pop().is_some()
    }

    /// Replace the whole stack with a single entry.
    pub fn set(&mut self, layer: impl Into<String>) {
        self.base = layer.into();
        self.extra.clear();
    }

    /// Reset to the given base layer (used when a new profile is swapped in).
    pub fn rebase(&mut self, base: impl Into<String>) {
        self.set(base);
    }
}
