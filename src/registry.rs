//! # Effect Registry
//!
//! The static table of effect kinds and their operations.
//!
//! Effects are declared once at program start, before any evaluation
//! runs, and are immutable afterwards. An operation has no intrinsic
//! implementation: it is pure interface, given meaning by whichever
//! handler frame is nearest at the perform site.
//!
//! An effect may be declared *tail-resumptive-only*, which makes any
//! non-tail use of a continuation by its handlers a checked error
//! rather than a missed optimization.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::fault::RegistryError;
use crate::value::ValueShape;

/// Identity of a declared effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EffectId(pub u32);

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of an operation within its effect's declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OpIndex(pub u32);

impl fmt::Display for OpIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Signature of a single operation: name, parameter shapes, result shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSig {
    /// Operation name, unique within its effect.
    pub name: String,
    /// Declared parameter shapes, in order.
    pub params: Vec<ValueShape>,
    /// Declared result shape.
    pub result: ValueShape,
}

/// A declared effect: an ordered set of operation signatures.
///
/// Immutable once declared; lives for the lifetime of the registry.
#[derive(Debug, Clone)]
pub struct EffectKind {
    id: EffectId,
    name: String,
    operations: Vec<OperationSig>,
    tail_resumptive_only: bool,
}

impl EffectKind {
    /// The effect's id.
    pub fn id(&self) -> EffectId {
        self.id
    }

    /// The effect's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared operations, in declaration order.
    pub fn operations(&self) -> &[OperationSig] {
        &self.operations
    }

    /// Look up an operation by index.
    pub fn operation(&self, op: OpIndex) -> Option<&OperationSig> {
        self.operations.get(op.0 as usize)
    }

    /// Look up an operation by name.
    pub fn operation_named(&self, name: &str) -> Option<(OpIndex, &OperationSig)> {
        self.operations
            .iter()
            .enumerate()
            .find(|(_, sig)| sig.name == name)
            .map(|(i, sig)| (OpIndex(i as u32), sig))
    }

    /// Whether every handler for this effect must use its continuation
    /// tail-resumptively.
    pub fn tail_resumptive_only(&self) -> bool {
        self.tail_resumptive_only
    }
}

/// Builder for an effect declaration.
///
/// ```
/// use ichor_runtime::{EffectDecl, EffectRegistry, ValueShape};
///
/// let mut registry = EffectRegistry::new();
/// let state = registry
///     .declare_effect(
///         EffectDecl::new("State")
///             .operation("get", vec![], ValueShape::Any)
///             .operation("put", vec![ValueShape::Any], ValueShape::Unit)
///             .tail_resumptive_only(),
///     )
///     .unwrap();
/// assert_eq!(registry.effect(state).unwrap().operations().len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct EffectDecl {
    name: String,
    operations: Vec<OperationSig>,
    tail_resumptive_only: bool,
}

impl EffectDecl {
    /// Start a declaration for an effect with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operations: Vec::new(),
            tail_resumptive_only: false,
        }
    }

    /// Add an operation signature.
    pub fn operation(
        mut self,
        name: impl Into<String>,
        params: Vec<ValueShape>,
        result: ValueShape,
    ) -> Self {
        self.operations.push(OperationSig {
            name: name.into(),
            params,
            result,
        });
        self
    }

    /// Require every handler of this effect to be tail-resumptive.
    pub fn tail_resumptive_only(mut self) -> Self {
        self.tail_resumptive_only = true;
        self
    }
}

/// The registry of declared effects. Read-only after program start.
#[derive(Debug, Default)]
pub struct EffectRegistry {
    effects: Vec<Arc<EffectKind>>,
    by_name: HashMap<String, EffectId>,
}

impl EffectRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an effect kind.
    ///
    /// Fails with [`RegistryError::DuplicateEffect`] if the name collides
    /// with an effect already declared in this registry.
    pub fn declare_effect(&mut self, decl: EffectDecl) -> Result<EffectId, RegistryError> {
        if self.by_name.contains_key(&decl.name) {
            return Err(RegistryError::DuplicateEffect { name: decl.name });
        }
        let id = EffectId(self.effects.len() as u32);
        self.by_name.insert(decl.name.clone(), id);
        self.effects.push(Arc::new(EffectKind {
            id,
            name: decl.name,
            operations: decl.operations,
            tail_resumptive_only: decl.tail_resumptive_only,
        }));
        Ok(id)
    }

    /// Look up an effect by id.
    pub fn effect(&self, id: EffectId) -> Result<&Arc<EffectKind>, RegistryError> {
        self.effects
            .get(id.0 as usize)
            .ok_or(RegistryError::UnknownEffect { id })
    }

    /// Look up an effect by name.
    pub fn effect_named(&self, name: &str) -> Option<&Arc<EffectKind>> {
        self.by_name.get(name).map(|id| &self.effects[id.0 as usize])
    }

    /// Look up an operation signature by effect id and operation name.
    ///
    /// Fails with [`RegistryError::UnknownOperation`] if the effect has no
    /// operation with that name.
    pub fn lookup_operation(
        &self,
        effect: EffectId,
        name: &str,
    ) -> Result<(OpIndex, &OperationSig), RegistryError> {
        let kind = self.effect(effect)?;
        kind.operation_named(name)
            .ok_or_else(|| RegistryError::UnknownOperation {
                effect: kind.name().to_string(),
                operation: name.to_string(),
            })
    }

    /// Number of declared effects.
    pub fn len(&self) -> usize {
        self.effects.len()
    }

    /// Whether no effects are declared.
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Iterate over declared effects in declaration order.
    pub fn effects(&self) -> impl Iterator<Item = &Arc<EffectKind>> {
        self.effects.iter()
    }
}
