// src/dag/hints.rs

//! Typed annotations attached to graph nodes.
//!
//! A hint set holds at most one hint per [`HintType`]. Adding or overwriting
//! replaces a same-typed hint in place, so later passes can refine a node's
//! hints without duplicate bookkeeping.

use crate::dag::operation::Operation;
use crate::types::{DeviceId, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HintType {
    BindToDevice,
    ExplicitRequire,
    ExpanderAnnotation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionHint {
    /// Run the node on this device.
    BindToDevice(DeviceId),
    /// Depend on this node regardless of data dependencies.
    ExplicitRequire(NodeId),
    /// Outcome of the expander pass for this node.
    ExpanderAnnotation(Expansion),
}

impl ExecutionHint {
    pub fn hint_type(&self) -> HintType {
        match self {
            ExecutionHint::BindToDevice(_) => HintType::BindToDevice,
            ExecutionHint::ExplicitRequire(_) => HintType::ExplicitRequire,
            ExecutionHint::ExpanderAnnotation(_) => HintType::ExpanderAnnotation,
        }
    }
}

/// What the expander decided for a node. The variants are mutually
/// exclusive; the setters switch the whole value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Expansion {
    /// Submit the node's own operation.
    #[default]
    Kept,
    /// Nothing to submit; the effect is already in place.
    OptimizedAway,
    /// Submit this operation instead of the node's own.
    Replaced(Operation),
    /// Use the result of another node instead of submitting anything.
    Forwarded(NodeId),
}

impl Expansion {
    pub fn set_optimized_away(&mut self) {
        *self = Expansion::OptimizedAway;
    }

    pub fn set_replacement_operation(&mut self, op: Operation) {
        *self = Expansion::Replaced(op);
    }

    pub fn set_forward_to_node(&mut self, target: NodeId) {
        *self = Expansion::Forwarded(target);
    }

    pub fn is_optimized_away(&self) -> bool {
        matches!(self, Expansion::OptimizedAway)
    }

    pub fn is_operation_replaced(&self) -> bool {
        matches!(self, Expansion::Replaced(_))
    }

    pub fn is_node_forwarded(&self) -> bool {
        matches!(self, Expansion::Forwarded(_))
    }

    pub fn replacement_operation(&self) -> Option<&Operation> {
        match self {
            Expansion::Replaced(op) => Some(op),
            _ => None,
        }
    }

    pub fn forwarding_target(&self) -> Option<NodeId> {
        match self {
            Expansion::Forwarded(id) => Some(*id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionHints {
    hints: Vec<ExecutionHint>,
}

impl ExecutionHints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_to_device(device: DeviceId) -> Self {
        let mut hints = Self::new();
        hints.add_hint(ExecutionHint::BindToDevice(device));
        hints
    }

    /// Builder-style [`add_hint`](Self::add_hint).
    pub fn with(mut self, hint: ExecutionHint) -> Self {
        self.add_hint(hint);
        self
    }

    /// Insert a hint, replacing any hint of the same type.
    pub fn add_hint(&mut self, hint: ExecutionHint) {
        let ty = hint.hint_type();
        match self.hints.iter_mut().find(|h| h.hint_type() == ty) {
            Some(existing) => *existing = hint,
            None => self.hints.push(hint),
        }
    }

    /// Apply every hint of `other` on top of this set.
    pub fn overwrite_with(&mut self, other: &ExecutionHints) {
        for hint in &other.hints {
            self.add_hint(hint.clone());
        }
    }

    pub fn has_hint(&self, ty: HintType) -> bool {
        self.get_hint(ty).is_some()
    }

    pub fn get_hint(&self, ty: HintType) -> Option<&ExecutionHint> {
        self.hints.iter().find(|h| h.hint_type() == ty)
    }

    pub fn bound_device(&self) -> Option<DeviceId> {
        match self.get_hint(HintType::BindToDevice) {
            Some(ExecutionHint::BindToDevice(d)) => Some(*d),
            _ => None,
        }
    }

    pub fn explicit_requirement(&self) -> Option<NodeId> {
        match self.get_hint(HintType::ExplicitRequire) {
            Some(ExecutionHint::ExplicitRequire(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn expansion(&self) -> Option<&Expansion> {
        match self.get_hint(HintType::ExpanderAnnotation) {
            Some(ExecutionHint::ExpanderAnnotation(e)) => Some(e),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.hints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExecutionHint> {
        self.hints.iter()
    }
}
