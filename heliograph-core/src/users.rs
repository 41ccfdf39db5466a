//! Custom user-property mutations.
//!
//! Property changes accumulate in memory as op-coded mutations and are
//! flushed to the collector as a single `user_details` request on an
//! explicit save. The collector applies ops server-side using the
//! `$`-prefixed operator forms.

use std::collections::BTreeMap;

use serde_json::{json, Value};

/// One op-coded mutation of a user property.
#[derive(Debug, Clone, PartialEq)]
pub enum UserPropertyOp {
    /// Overwrite the property
    Set(Value),
    /// Set only if the property has no value yet
    SetOnce(Value),
    /// Add to a numeric property
    Inc(f64),
    /// Multiply a numeric property
    Mul(f64),
    /// Keep the larger of stored and given value
    Max(f64),
    /// Keep the smaller of stored and given value
    Min(f64),
    /// Append to a list property
    Push(Value),
    /// Remove from a list property
    Pull(Value),
    /// Append to a list property, deduplicated
    AddToSet(Value),
}

impl UserPropertyOp {
    /// Render the collector-side representation of this op.
    fn to_value(&self) -> Value {
        match self {
            UserPropertyOp::Set(v) => v.clone(),
            UserPropertyOp::SetOnce(v) => json!({ "$setOnce": v }),
            UserPropertyOp::Inc(n) => json!({ "$inc": n }),
            UserPropertyOp::Mul(n) => json!({ "$mul": n }),
            UserPropertyOp::Max(n) => json!({ "$max": n }),
            UserPropertyOp::Min(n) => json!({ "$min": n }),
            UserPropertyOp::Push(v) => json!({ "$push": v }),
            UserPropertyOp::Pull(v) => json!({ "$pull": v }),
            UserPropertyOp::AddToSet(v) => json!({ "$addToSet": v }),
        }
    }
}

/// Accumulated user-property mutations, one pending op per property.
///
/// A later op on the same property replaces the earlier one.
#[derive(Debug, Default)]
pub struct UserPatch {
    ops: BTreeMap<String, UserPropertyOp>,
}

impl UserPatch {
    /// Create an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a mutation for `property`.
    pub fn apply(&mut self, property: impl Into<String>, op: UserPropertyOp) {
        let property = property.into();
        if property.is_empty() {
            tracing::error!("dropping user property op without a property name");
            return;
        }
        self.ops.insert(property, op);
    }

    /// Whether any mutations are pending.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Render and clear the pending mutations.
    ///
    /// Returns the `user_details` payload, or `None` when nothing is
    /// pending.
    pub fn take_details(&mut self) -> Option<Value> {
        if self.ops.is_empty() {
            return None;
        }

        let custom: serde_json::Map<String, Value> = std::mem::take(&mut self.ops)
            .into_iter()
            .map(|(k, op)| (k, op.to_value()))
            .collect();

        Some(json!({ "custom": custom }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_patch_takes_nothing() {
        let mut patch = UserPatch::new();
        assert!(patch.take_details().is_none());
    }

    #[test]
    fn test_ops_render_operator_forms() {
        let mut patch = UserPatch::new();
        patch.apply("plan", UserPropertyOp::Set(json!("pro")));
        patch.apply("logins", UserPropertyOp::Inc(1.0));
        patch.apply("high_score", UserPropertyOp::Max(420.0));
        patch.apply("tags", UserPropertyOp::AddToSet(json!("beta")));

        let details = patch.take_details().unwrap();
        assert_eq!(details["custom"]["plan"], json!("pro"));
        assert_eq!(details["custom"]["logins"], json!({ "$inc": 1.0 }));
        assert_eq!(details["custom"]["high_score"], json!({ "$max": 420.0 }));
        assert_eq!(details["custom"]["tags"], json!({ "$addToSet": "beta" }));

        // Save clears the patch.
        assert!(patch.is_empty());
        assert!(patch.take_details().is_none());
    }

    #[test]
    fn test_later_op_replaces_earlier() {
        let mut patch = UserPatch::new();
        patch.apply("plan", UserPropertyOp::Set(json!("free")));
        patch.apply("plan", UserPropertyOp::Set(json!("pro")));

        let details = patch.take_details().unwrap();
        assert_eq!(details["custom"]["plan"], json!("pro"));
    }

    #[test]
    fn test_empty_property_name_dropped() {
        let mut patch = UserPatch::new();
        patch.apply("", UserPropertyOp::Inc(1.0));
        assert!(patch.is_empty());
    }
}
