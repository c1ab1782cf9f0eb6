//! Capability binder.
//!
//! Decides whether a candidate structurally satisfies a contract and, if so,
//! produces a [`BoundAdapter`]: one resolved handle per contract member.
//!
//! Binding happens at two levels:
//!
//! - **Type level**: the candidate's [`TypeShape`] is matched member by
//!   member. The outcome depends only on the pair of shapes, so it is
//!   memoized per `(contract, type name)`.
//! - **Object level**: required members that resolved to a property must
//!   currently hold a callable on this particular instance.
//!
//! A mismatch is not an error. It is logged once per `(contract, type)` pair
//! and the caller simply gets `None`.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};

use tracing::{debug, trace};

use crate::candidate::{Candidate, MemberKind, TypeShape};
use crate::contract::Contract;
use crate::error::{CallError, CallResult};
use crate::value::Dynamic;

/// How one contract member is backed on the candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Method(String),
    Property(String),
}

/// Type-level resolution of a contract against a shape.
#[derive(Debug)]
struct Resolution {
    slots: Vec<Option<Slot>>,
}

type CacheKey = (&'static str, String);

/// Structural matcher with a per-process memo of type-level results.
#[derive(Default)]
pub struct CapabilityBinder {
    cache: RwLock<HashMap<CacheKey, Option<Arc<Resolution>>>>,
}

impl CapabilityBinder {
    /// Create a binder with an empty memo.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a type with this shape can satisfy the contract.
    #[must_use]
    pub fn is_compatible(&self, contract: &'static Contract, shape: &TypeShape) -> bool {
        self.resolve(contract, shape).is_some()
    }

    /// Bind a candidate object to a contract.
    ///
    /// Returns `None` if the candidate does not implement the role.
    #[must_use]
    pub fn bind(
        &self,
        contract: &'static Contract,
        candidate: Arc<dyn Candidate>,
    ) -> Option<BoundAdapter> {
        let resolution = self.resolve(contract, candidate.shape())?;

        for (spec, slot) in contract.members.iter().zip(&resolution.slots) {
            if let (true, Some(Slot::Property(prop))) = (spec.required, slot)
                && candidate.property(prop).is_none()
            {
                debug!(
                    contract = contract.name,
                    type_name = candidate.shape().type_name(),
                    member = spec.name,
                    "Required member is backed by an empty property; not binding"
                );
                return None;
            }
        }

        Some(BoundAdapter {
            contract,
            candidate,
            resolution,
        })
    }

    /// Number of memoized `(contract, type)` pairs.
    #[must_use]
    pub fn cached_pairs(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }

    fn resolve(&self, contract: &'static Contract, shape: &TypeShape) -> Option<Arc<Resolution>> {
        let key = (contract.name, shape.type_name().to_owned());
        if let Ok(cache) = self.cache.read()
            && let Some(hit) = cache.get(&key)
        {
            trace!(contract = contract.name, type_name = %key.1, "Binding memo hit");
            return hit.clone();
        }

        let resolved = match resolve_uncached(contract, shape) {
            Ok(resolution) => Some(Arc::new(resolution)),
            Err(missing) => {
                debug!(
                    contract = contract.name,
                    type_name = shape.type_name(),
                    missing = ?missing,
                    "Candidate type does not satisfy contract"
                );
                None
            },
        };

        if let Ok(mut cache) = self.cache.write() {
            // A concurrent binder may have raced us; either result is identical.
            cache.entry(key).or_insert_with(|| resolved.clone());
        }
        resolved
    }
}

impl fmt::Debug for CapabilityBinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityBinder")
            .field("cached_pairs", &self.cached_pairs())
            .finish()
    }
}

/// Match every contract member against the shape. On failure returns the
/// names of the unmatched required members.
fn resolve_uncached(
    contract: &Contract,
    shape: &TypeShape,
) -> Result<Resolution, Vec<&'static str>> {
    let mut slots = Vec::with_capacity(contract.members.len());
    let mut missing = Vec::new();

    for spec in contract.members {
        let matches: Vec<_> = shape
            .members_named(spec.name)
            .filter(|m| spec.accepts(&m.signature))
            .collect();
        // Methods win over properties of the same name.
        let found = matches
            .iter()
            .find(|m| m.kind == MemberKind::Method)
            .or_else(|| matches.first());

        let slot = found.map(|m| match m.kind {
            MemberKind::Method => Slot::Method(m.name.clone()),
            MemberKind::Property => Slot::Property(m.name.clone()),
        });
        if slot.is_none() && spec.required {
            missing.push(spec.name);
        }
        slots.push(slot);
    }

    if missing.is_empty() {
        Ok(Resolution { slots })
    } else {
        Err(missing)
    }
}

/// A candidate bound to a contract. Immutable once built; cheap to clone.
#[derive(Clone)]
pub struct BoundAdapter {
    contract: &'static Contract,
    candidate: Arc<dyn Candidate>,
    resolution: Arc<Resolution>,
}

impl BoundAdapter {
    /// The contract this adapter satisfies.
    #[must_use]
    pub fn contract(&self) -> &'static Contract {
        self.contract
    }

    /// The bound candidate's type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        self.candidate.shape().type_name()
    }

    /// Whether the member in `slot` is currently callable.
    #[must_use]
    pub fn supports(&self, slot: usize) -> bool {
        match self.resolution.slots.get(slot) {
            Some(Some(Slot::Method(_))) => true,
            Some(Some(Slot::Property(name))) => self.candidate.property(name).is_some(),
            _ => false,
        }
    }

    /// Invoke the member in `slot`.
    ///
    /// Panics in the candidate are caught and reported as
    /// [`CallError::Panicked`].
    ///
    /// # Errors
    ///
    /// [`CallError::Unsupported`] if the member is unresolved (or its
    /// property is empty), otherwise whatever the candidate reports.
    pub fn call(&self, slot: usize, args: Vec<Dynamic>) -> CallResult<Dynamic> {
        let spec = self
            .contract
            .members
            .get(slot)
            .ok_or_else(|| CallError::Unsupported(format!("slot {slot}")))?;

        if args.len() != spec.params.len() {
            return Err(CallError::BadArguments {
                member: spec.name.to_owned(),
                message: format!("expected {} arguments, got {}", spec.params.len(), args.len()),
            });
        }

        match self.resolution.slots.get(slot).cloned().flatten() {
            None => Err(CallError::Unsupported(spec.name.to_owned())),
            Some(Slot::Method(name)) => {
                guarded(spec.name, || self.candidate.invoke(&name, args))
            },
            Some(Slot::Property(name)) => {
                let f = self
                    .candidate
                    .property(&name)
                    .ok_or_else(|| CallError::Unsupported(spec.name.to_owned()))?;
                guarded(spec.name, || f(args))
            },
        }
    }

    /// Invoke an action member; an absent member is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the candidate's error if the member exists and fails.
    pub fn call_action(&self, slot: usize, args: Vec<Dynamic>) -> CallResult<()> {
        match self.call(slot, args) {
            Ok(_) | Err(CallError::Unsupported(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl fmt::Debug for BoundAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundAdapter")
            .field("contract", &self.contract.name)
            .field("type_name", &self.type_name())
            .finish_non_exhaustive()
    }
}

fn guarded<T>(member: &str, f: impl FnOnce() -> CallResult<T>) -> CallResult<T> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(CallError::Panicked {
            member: member.to_owned(),
            message: panic_message(payload.as_ref()),
        })
    })
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
