//! Name addressed storage for the realized values of model variables.
//!
//! Values live in one flat buffer. Every variable owns a contiguous
//! allocation in that buffer: its active range followed by a number of
//! inactive padding positions left behind when the value shrank. Updates
//! that fit into the allocation never move other variables.

use std::{
    collections::{BTreeMap, HashMap},
    ops::Range,
    sync::Arc,
};

use arrow::{
    array::{Array, ArrayRef, Float64Builder, ListBuilder, StructArray},
    datatypes::{Field, Fields},
};
use tracing::trace;

use crate::{
    error::{PplError, Result},
    transform::Transform,
    value::Value,
    varname::{VarName, VarSelection},
};

/// How to materialize the values of a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// The logical flat buffer.
    Flat,
    /// Reconstructed values by name.
    Map,
    /// One list valued field per root symbol.
    Record,
}

#[derive(Debug, Clone)]
pub enum Materialized {
    Flat(Vec<f64>),
    Map(BTreeMap<VarName, Value>),
    Record(StructArray),
}

#[derive(Debug, Clone, Default)]
pub struct VarTrace {
    index: HashMap<VarName, usize>,
    names: Vec<VarName>,
    ranges: Vec<Range<usize>>,
    transforms: Vec<Transform>,
    inactive: Vec<usize>,
    resample: Vec<bool>,
    vals: Vec<f64>,
    logp: f64,
    linked: bool,
}

impl VarTrace {
    pub fn new() -> VarTrace {
        VarTrace::default()
    }

    pub fn from_pairs<I, N>(pairs: I) -> Result<VarTrace>
    where
        I: IntoIterator<Item = (N, Value)>,
        N: Into<VarName>,
    {
        let mut trace = VarTrace::new();
        for (name, value) in pairs {
            trace.push(name, value, None)?;
        }
        Ok(trace)
    }

    fn slot(&self, name: &VarName) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| PplError::UnknownName(name.clone()))
    }

    fn active(&self, slot: usize) -> &[f64] {
        &self.vals[self.ranges[slot].clone()]
    }

    /// Logical length: the number of active scalars.
    pub fn len(&self) -> usize {
        self.ranges.iter().map(|r| r.len()).sum()
    }

    /// True if the trace holds no variables.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn num_vars(&self) -> usize {
        self.names.len()
    }

    /// Physical length of the buffer, including padding.
    pub fn buffer_len(&self) -> usize {
        self.vals.len()
    }

    pub fn is_contiguous(&self) -> bool {
        self.inactive.iter().all(|&n| n == 0)
    }

    pub fn contains(&self, name: &VarName) -> bool {
        self.index.contains_key(name)
    }

    /// Names in slot order.
    pub fn keys(&self) -> impl Iterator<Item = &VarName> + '_ {
        self.names.iter()
    }

    pub fn values(&self) -> Result<Vec<Value>> {
        (0..self.names.len())
            .map(|slot| Ok(self.transforms[slot].reconstruct(self.active(slot))?.0))
            .collect()
    }

    pub fn pairs(&self) -> Result<Vec<(VarName, Value)>> {
        self.names
            .iter()
            .zip(self.values()?)
            .map(|(name, value)| Ok((name.clone(), value)))
            .collect()
    }

    /// Buffer range of the active scalars of `name`.
    pub fn range(&self, name: &VarName) -> Result<Range<usize>> {
        Ok(self.ranges[self.slot(name)?].clone())
    }

    /// Number of padding positions after the active range of `name`.
    pub fn num_inactive(&self, name: &VarName) -> Result<usize> {
        Ok(self.inactive[self.slot(name)?])
    }

    pub fn transform(&self, name: &VarName) -> Result<Transform> {
        Ok(self.transforms[self.slot(name)?])
    }

    /// Replace the transform of `name` without touching its stored scalars.
    ///
    /// The new transform must read the same number of scalars.
    pub fn set_transform(&mut self, name: &VarName, transform: Transform) -> Result<()> {
        let slot = self.slot(name)?;
        let len = self.ranges[slot].len();
        if transform.flat_len() != len {
            return Err(PplError::DimensionMismatch {
                expected: len,
                got: transform.flat_len(),
            });
        }
        self.transforms[slot] = transform;
        Ok(())
    }

    pub fn logp(&self) -> f64 {
        self.logp
    }

    pub fn set_logp(&mut self, logp: f64) {
        self.logp = logp;
    }

    pub fn acc_logp(&mut self, delta: f64) {
        self.logp += delta;
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }

    fn append(&mut self, name: VarName, flat: &[f64], transform: Transform) {
        self.append_flagged(name, flat, transform, false);
    }

    fn append_flagged(&mut self, name: VarName, flat: &[f64], transform: Transform, flag: bool) {
        let start = self.vals.len();
        self.vals.extend_from_slice(flat);
        self.index.insert(name.clone(), self.names.len());
        self.names.push(name);
        self.ranges.push(start..self.vals.len());
        self.transforms.push(transform);
        self.inactive.push(0);
        self.resample.push(flag);
    }

    /// Add a new variable at the end of the buffer.
    ///
    /// Without a transform the value is stored as is.
    pub fn push(
        &mut self,
        name: impl Into<VarName>,
        value: Value,
        transform: Option<Transform>,
    ) -> Result<()> {
        let name = name.into();
        if self.contains(&name) {
            return Err(PplError::DuplicateName(name));
        }
        let transform = transform.unwrap_or_else(|| Transform::identity(value.shape()));
        let (flat, _) = transform.flatten(&value)?;
        self.append(name, &flat, transform);
        Ok(())
    }

    /// Set the value of `name`, adding it if it is not present.
    ///
    /// The value may change its length. Without a transform the current
    /// transform is kept, adjusted to the shape of the new value.
    pub fn update(
        &mut self,
        name: impl Into<VarName>,
        value: Value,
        transform: Option<Transform>,
    ) -> Result<()> {
        let name = name.into();
        let Some(&slot) = self.index.get(&name) else {
            return self.push(name, value, transform);
        };
        let transform =
            transform.unwrap_or_else(|| self.transforms[slot].with_shape(value.shape()));
        let (flat, _) = transform.flatten(&value)?;
        self.resize_slot(slot, &flat);
        self.transforms[slot] = transform;
        Ok(())
    }

    /// Overwrite the allocation of `slot` with `flat`, growing the buffer
    /// if it does not fit.
    fn resize_slot(&mut self, slot: usize, flat: &[f64]) {
        let start = self.ranges[slot].start;
        let n_alloc = self.ranges[slot].len() + self.inactive[slot];
        let n_new = flat.len();

        if n_new > n_alloc {
            let shift = n_new - n_alloc;
            let alloc_end = start + n_alloc;
            let old_len = self.vals.len();
            trace!(slot, shift, "growing variable allocation");
            self.vals.resize(old_len + shift, 0.);
            self.vals.copy_within(alloc_end..old_len, alloc_end + shift);
            self.inactive[slot] = 0;
            for range in self.ranges[slot + 1..].iter_mut() {
                *range = range.start + shift..range.end + shift;
            }
        } else {
            if n_new < n_alloc {
                trace!(slot, padding = n_alloc - n_new, "shrinking variable in place");
            }
            self.inactive[slot] = n_alloc - n_new;
        }

        self.ranges[slot] = start..start + n_new;
        self.vals[start..start + n_new].copy_from_slice(flat);
    }

    /// Remove `name` and compact the buffer.
    pub fn delete(&mut self, name: &VarName) -> Result<()> {
        let slot = self.slot(name)?;
        let start = self.ranges[slot].start;
        let n_alloc = self.ranges[slot].len() + self.inactive[slot];
        trace!(var = %name, n_alloc, "removing variable");

        self.vals.drain(start..start + n_alloc);
        self.index.remove(name);
        self.names.remove(slot);
        self.ranges.remove(slot);
        self.transforms.remove(slot);
        self.inactive.remove(slot);
        self.resample.remove(slot);

        for range in self.ranges[slot..].iter_mut() {
            *range = range.start - n_alloc..range.end - n_alloc;
        }
        for (offset, later) in self.names[slot..].iter().enumerate() {
            self.index.insert(later.clone(), slot + offset);
        }
        Ok(())
    }

    /// The value of `name`, reconstructed through its transform.
    pub fn get(&self, name: &VarName) -> Result<Value> {
        Ok(self.get_with_logjac(name)?.0)
    }

    /// The value of `name` and the log Jacobian of reconstructing it from
    /// its stored representation.
    pub fn get_with_logjac(&self, name: &VarName) -> Result<(Value, f64)> {
        let slot = self.slot(name)?;
        self.transforms[slot].reconstruct(self.active(slot))
    }

    /// The stored scalars of `name`.
    pub fn get_raw(&self, name: &VarName) -> Result<&[f64]> {
        Ok(self.active(self.slot(name)?))
    }

    /// Overwrite an existing variable with a value of the same shape.
    pub fn set(&mut self, name: &VarName, value: &Value) -> Result<()> {
        let slot = self.slot(name)?;
        let (flat, _) = self.transforms[slot].flatten(value)?;
        self.set_raw(name, &flat)
    }

    /// Overwrite the stored scalars of an existing variable.
    pub fn set_raw(&mut self, name: &VarName, flat: &[f64]) -> Result<()> {
        let slot = self.slot(name)?;
        let range = self.ranges[slot].clone();
        if range.len() != flat.len() {
            return Err(PplError::DimensionMismatch {
                expected: range.len(),
                got: flat.len(),
            });
        }
        self.vals[range].copy_from_slice(flat);
        Ok(())
    }

    /// Right biased union. The result is contiguous.
    pub fn merge(&self, other: &VarTrace) -> VarTrace {
        let mut out = VarTrace::new();
        for (slot, name) in self.names.iter().enumerate() {
            let (source, slot) = match other.index.get(name) {
                Some(&other_slot) => (other, other_slot),
                None => (self, slot),
            };
            out.append_flagged(
                name.clone(),
                source.active(slot),
                source.transforms[slot],
                source.resample[slot],
            );
        }
        for (slot, name) in other.names.iter().enumerate() {
            if !self.contains(name) {
                out.append_flagged(
                    name.clone(),
                    other.active(slot),
                    other.transforms[slot],
                    other.resample[slot],
                );
            }
        }
        out.logp = other.logp;
        out.linked = self.linked && other.linked;
        out
    }

    /// A contiguous trace with the variables subsumed by any of `names`.
    pub fn subset(&self, names: &[VarName]) -> VarTrace {
        let selection = VarSelection::Names(names.to_vec());
        let mut out = VarTrace::new();
        for (slot, name) in self.names.iter().enumerate() {
            if selection.selects(name) {
                out.append_flagged(
                    name.clone(),
                    self.active(slot),
                    self.transforms[slot],
                    self.resample[slot],
                );
            }
        }
        out.linked = self.linked;
        out
    }

    /// Drop all padding.
    pub fn contiguify(&mut self) {
        if self.is_contiguous() {
            return;
        }
        trace!(from = self.vals.len(), to = self.len(), "contiguify trace");
        let mut vals = Vec::with_capacity(self.len());
        for range in self.ranges.iter_mut() {
            let start = vals.len();
            vals.extend_from_slice(&self.vals[range.clone()]);
            *range = start..vals.len();
        }
        self.vals = vals;
        self.inactive.fill(0);
    }

    /// One sub-trace per root symbol.
    pub fn group_by_symbol(&self) -> BTreeMap<String, VarTrace> {
        let mut groups: BTreeMap<String, VarTrace> = BTreeMap::new();
        for (slot, name) in self.names.iter().enumerate() {
            let group = groups.entry(name.symbol().to_string()).or_insert_with(|| VarTrace {
                linked: self.linked,
                ..VarTrace::default()
            });
            group.append_flagged(
                name.clone(),
                self.active(slot),
                self.transforms[slot],
                self.resample[slot],
            );
        }
        groups
    }

    /// The logical contents of the buffer, padding skipped.
    pub fn to_flat(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.len());
        for range in &self.ranges {
            out.extend_from_slice(&self.vals[range.clone()]);
        }
        out
    }

    /// Overwrite the logical contents of the buffer.
    pub fn set_flat(&mut self, flat: &[f64]) -> Result<()> {
        self.set_selected_flat(&VarSelection::All, flat)
    }

    pub fn selected_len(&self, selection: &VarSelection) -> usize {
        self.names
            .iter()
            .zip(&self.ranges)
            .filter(|(name, _)| selection.selects(name))
            .map(|(_, range)| range.len())
            .sum()
    }

    pub fn selected_flat(&self, selection: &VarSelection) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.selected_len(selection));
        for (name, range) in self.names.iter().zip(&self.ranges) {
            if selection.selects(name) {
                out.extend_from_slice(&self.vals[range.clone()]);
            }
        }
        out
    }

    /// Write `flat` into the selected variables, in slot order.
    pub fn set_selected_flat(&mut self, selection: &VarSelection, flat: &[f64]) -> Result<()> {
        let expected = self.selected_len(selection);
        if flat.len() != expected {
            return Err(PplError::DimensionMismatch {
                expected,
                got: flat.len(),
            });
        }
        let mut offset = 0;
        for (name, range) in self.names.iter().zip(&self.ranges) {
            if selection.selects(name) {
                self.vals[range.clone()].copy_from_slice(&flat[offset..offset + range.len()]);
                offset += range.len();
            }
        }
        Ok(())
    }

    /// Mark selected variables to be drawn again on the next evaluation.
    pub fn flag_for_resample(&mut self, selection: &VarSelection) {
        for (name, flag) in self.names.iter().zip(self.resample.iter_mut()) {
            if selection.selects(name) {
                *flag = true;
            }
        }
    }

    pub fn is_flagged(&self, name: &VarName) -> bool {
        self.index.get(name).is_some_and(|&slot| self.resample[slot])
    }

    pub fn unflag(&mut self, name: &VarName) {
        if let Some(&slot) = self.index.get(name) {
            self.resample[slot] = false;
        }
    }

    /// Store every constrained variable in unconstrained space.
    ///
    /// Slots that are already linked are left alone, so a merge of linked
    /// and unlinked traces links cleanly. Adds the log Jacobian of the
    /// change of variables to `logp`.
    pub fn link(&self) -> Result<VarTrace> {
        let mut out = self.clone();
        for slot in 0..out.names.len() {
            let transform = out.transforms[slot];
            if transform.is_linked() {
                continue;
            }
            let linked = transform.linked();
            if !transform.bijector().is_identity() {
                let (value, _) = transform.reconstruct(out.active(slot))?;
                let (flat, logjac) = linked.flatten(&value)?;
                out.resize_slot(slot, &flat);
                out.logp += logjac;
            }
            out.transforms[slot] = linked;
        }
        out.linked = true;
        tracing::debug!(vars = out.names.len(), logp = out.logp, "linked trace");
        Ok(out)
    }

    /// Inverse of `link`.
    pub fn invlink(&self) -> Result<VarTrace> {
        let mut out = self.clone();
        for slot in 0..out.names.len() {
            let transform = out.transforms[slot];
            if !transform.is_linked() {
                continue;
            }
            let unlinked = transform.unlinked();
            if !transform.bijector().is_identity() {
                let (value, logjac) = transform.reconstruct(out.active(slot))?;
                let (flat, _) = unlinked.flatten(&value)?;
                out.resize_slot(slot, &flat);
                out.logp -= logjac;
            }
            out.transforms[slot] = unlinked;
        }
        out.linked = false;
        tracing::debug!(vars = out.names.len(), logp = out.logp, "invlinked trace");
        Ok(out)
    }

    pub fn values_as(&self, kind: ValueKind) -> Result<Materialized> {
        Ok(match kind {
            ValueKind::Flat => Materialized::Flat(self.to_flat()),
            ValueKind::Map => Materialized::Map(self.pairs()?.into_iter().collect()),
            ValueKind::Record => Materialized::Record(self.to_record()?),
        })
    }

    fn to_record(&self) -> Result<StructArray> {
        let mut fields = Vec::new();
        let mut columns: Vec<ArrayRef> = Vec::new();
        for (symbol, group) in self.group_by_symbol() {
            let mut builder = ListBuilder::new(Float64Builder::new());
            for value in group.values()? {
                builder.values().append_slice(&value.flatten());
            }
            builder.append(true);
            let column = builder.finish();
            fields.push(Arc::new(Field::new(symbol, column.data_type().clone(), false)));
            columns.push(Arc::new(column));
        }
        Ok(StructArray::try_new(Fields::from(fields), columns, None)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        transform::{Bijector, Support},
        value::Shape,
    };
    use approx::assert_abs_diff_eq;
    use arrow::array::ListArray;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn x() -> VarName {
        VarName::new("x")
    }

    fn y() -> VarName {
        VarName::new("y")
    }

    fn xy_trace() -> VarTrace {
        let mut trace = VarTrace::new();
        trace.push(x(), Value::Vector(vec![1., 2.]), None).unwrap();
        trace.push(y(), Value::Vector(vec![3., 4., 5.]), None).unwrap();
        trace
    }

    #[test]
    fn contiguous_growth_and_delete() {
        let mut trace = VarTrace::new();
        trace.push(x(), Value::Scalar(1.), None).unwrap();
        assert_eq!(trace.len(), 1);
        trace.push(y(), Value::Vector(vec![2., 3.]), None).unwrap();
        assert_eq!(trace.len(), 3);
        assert_eq!(trace.to_flat(), vec![1., 2., 3.]);

        trace.delete(&x()).unwrap();
        assert_eq!(trace.len(), 2);
        assert_eq!(trace.buffer_len(), 2);
        assert_eq!(trace.to_flat(), vec![2., 3.]);
        assert_eq!(trace.range(&y()).unwrap(), 0..2);
        assert_eq!(trace.get(&y()).unwrap(), Value::Vector(vec![2., 3.]));
        assert!(!trace.contains(&x()));
    }

    #[test]
    fn update_grows_then_pads() {
        let mut trace = xy_trace();
        trace
            .update(x(), Value::Vector(vec![1., 2., 6., 7., 8.]), None)
            .unwrap();
        assert_eq!(trace.buffer_len(), 8);
        assert_eq!(trace.to_flat(), vec![1., 2., 6., 7., 8., 3., 4., 5.]);
        assert_eq!(trace.range(&y()).unwrap(), 5..8);
        assert_eq!(trace.num_inactive(&x()).unwrap(), 0);

        trace.update(x(), Value::Vector(vec![9.]), None).unwrap();
        assert_eq!(trace.buffer_len(), 8);
        assert_eq!(trace.num_inactive(&x()).unwrap(), 4);
        assert_eq!(trace.range(&x()).unwrap(), 0..1);
        assert_eq!(trace.len(), 4);
        assert_eq!(trace.to_flat(), vec![9., 3., 4., 5.]);
        assert!(!trace.is_contiguous());
        assert_eq!(trace.get(&y()).unwrap(), Value::Vector(vec![3., 4., 5.]));
    }

    #[test]
    fn update_reuses_padding() {
        let mut trace = xy_trace();
        trace.update(x(), Value::Scalar(0.), None).unwrap();
        assert_eq!(trace.num_inactive(&x()).unwrap(), 1);

        // fits exactly into the allocation
        trace.update(x(), Value::Vector(vec![5., 6.]), None).unwrap();
        assert_eq!(trace.num_inactive(&x()).unwrap(), 0);
        assert_eq!(trace.buffer_len(), 5);

        // grows by one past a padded allocation
        trace.update(x(), Value::Scalar(0.), None).unwrap();
        trace.update(x(), Value::Vector(vec![1., 1., 1.]), None).unwrap();
        assert_eq!(trace.buffer_len(), 6);
        assert_eq!(trace.range(&y()).unwrap(), 3..6);
        assert_eq!(trace.to_flat(), vec![1., 1., 1., 3., 4., 5.]);
    }

    #[test]
    fn delete_padded_variable() {
        let mut trace = xy_trace();
        trace.update(x(), Value::Scalar(0.), None).unwrap();
        trace.delete(&x()).unwrap();
        assert_eq!(trace.buffer_len(), 3);
        assert_eq!(trace.range(&y()).unwrap(), 0..3);

        trace.push(x(), Value::Scalar(1.), None).unwrap();
        assert_eq!(trace.keys().cloned().collect::<Vec<_>>(), vec![y(), x()]);
        assert_eq!(trace.range(&x()).unwrap(), 3..4);
    }

    #[test]
    fn errors() {
        let mut trace = xy_trace();
        assert!(matches!(
            trace.push(x(), Value::Scalar(1.), None),
            Err(PplError::DuplicateName(_))
        ));
        let z = VarName::new("z");
        assert!(matches!(trace.delete(&z), Err(PplError::UnknownName(_))));
        assert!(matches!(trace.get(&z), Err(PplError::UnknownName(_))));
        assert!(matches!(
            trace.set(&z, &Value::Scalar(1.)),
            Err(PplError::UnknownName(_))
        ));
        assert!(matches!(
            trace.update(x(), Value::Scalar(1.), Some(Transform::identity(Shape::Vector(2)))),
            Err(PplError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            trace.set_raw(&x(), &[1.]),
            Err(PplError::DimensionMismatch { .. })
        ));
        assert!(matches!(
            trace.set_flat(&[1.]),
            Err(PplError::DimensionMismatch {
                expected: 5,
                got: 1
            })
        ));
    }

    #[test]
    fn merge_is_right_biased() {
        let left = VarTrace::from_pairs([
            ("a", Value::Scalar(1.)),
            ("x", Value::Vector(vec![1., 2.])),
        ])
        .unwrap();
        let mut right = VarTrace::from_pairs([
            ("x", Value::Vector(vec![7., 8., 9.])),
            ("b", Value::Scalar(2.)),
        ])
        .unwrap();
        right.update(x(), Value::Scalar(7.), None).unwrap();

        let merged = left.merge(&right);
        assert_eq!(merged.get(&x()).unwrap(), Value::Scalar(7.));
        assert_eq!(merged.get(&"a".into()).unwrap(), Value::Scalar(1.));
        assert_eq!(merged.get(&"b".into()).unwrap(), Value::Scalar(2.));
        assert!(merged.is_contiguous());
        assert_eq!(merged.buffer_len(), 3);
        // inputs are untouched
        assert_eq!(left.get(&x()).unwrap(), Value::Vector(vec![1., 2.]));
        assert_eq!(right.num_inactive(&x()).unwrap(), 2);
    }

    #[test]
    fn subset_and_groups() {
        let mut trace = VarTrace::new();
        trace.push(VarName::new("m").index([0]), Value::Scalar(1.), None).unwrap();
        trace.push("s", Value::Scalar(2.), None).unwrap();
        trace.push(VarName::new("m").index([1]), Value::Scalar(3.), None).unwrap();

        let sub = trace.subset(&[VarName::new("m")]);
        assert_eq!(sub.num_vars(), 2);
        assert_eq!(sub.to_flat(), vec![1., 3.]);

        let groups = trace.group_by_symbol();
        assert_eq!(groups.keys().cloned().collect::<Vec<_>>(), vec!["m", "s"]);
        assert_eq!(groups["m"].to_flat(), vec![1., 3.]);
        assert_eq!(groups["s"].to_flat(), vec![2.]);
    }

    #[test]
    fn record_materialization() {
        let mut trace = xy_trace();
        trace.push(VarName::new("x").index([5]), Value::Scalar(10.), None).unwrap();
        let Materialized::Record(record) = trace.values_as(ValueKind::Record).unwrap() else {
            panic!("expected a record");
        };
        assert_eq!(record.len(), 1);
        assert_eq!(record.num_columns(), 2);
        let x_col = record
            .column_by_name("x")
            .unwrap()
            .as_any()
            .downcast_ref::<ListArray>()
            .unwrap();
        assert_eq!(x_col.value(0).len(), 3);

        let Materialized::Map(map) = trace.values_as(ValueKind::Map).unwrap() else {
            panic!("expected a map");
        };
        assert_eq!(map[&y()], Value::Vector(vec![3., 4., 5.]));
    }

    #[test]
    fn link_simplex_pads_and_invlink_restores() {
        let mut trace = VarTrace::new();
        let simplex = Transform::for_support(Shape::Vector(3), Support::Simplex).unwrap();
        let positive = Transform::new(Shape::Scalar, Bijector::LowerBound(0.));
        trace
            .push("p", Value::Vector(vec![0.2, 0.3, 0.5]), Some(simplex))
            .unwrap();
        trace.push("s", Value::Scalar(2.), Some(positive)).unwrap();
        trace.push("m", Value::Scalar(-1.), None).unwrap();

        let linked = trace.link().unwrap();
        assert!(linked.is_linked());
        assert_eq!(linked.num_inactive(&"p".into()).unwrap(), 1);
        assert_eq!(linked.len(), 4);
        assert_eq!(linked.buffer_len(), 5);
        assert_abs_diff_eq!(linked.get_raw(&"s".into()).unwrap()[0], 2f64.ln());
        assert_eq!(linked.get(&"m".into()).unwrap(), Value::Scalar(-1.));

        // idempotent
        let twice = linked.link().unwrap();
        assert_eq!(twice.to_flat(), linked.to_flat());
        assert_eq!(twice.logp(), linked.logp());

        let back = linked.invlink().unwrap();
        assert!(!back.is_linked());
        assert_abs_diff_eq!(back.logp(), 0., epsilon = 1e-12);
        for (a, b) in back.to_flat().iter().zip(trace.to_flat().iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
        assert!(back.is_contiguous());
    }

    #[test]
    fn resample_flags() {
        let mut trace = xy_trace();
        trace.flag_for_resample(&VarSelection::names(["y"]));
        assert!(trace.is_flagged(&y()));
        assert!(!trace.is_flagged(&x()));
        trace.unflag(&y());
        assert!(!trace.is_flagged(&y()));
    }

    #[test]
    fn flags_survive_subset_and_groups() {
        let mut trace = xy_trace();
        trace.flag_for_resample(&VarSelection::names(["y"]));

        let sub = trace.subset(&[x(), y()]);
        assert!(sub.is_flagged(&y()));
        assert!(!sub.is_flagged(&x()));

        let groups = trace.group_by_symbol();
        assert!(groups["y"].is_flagged(&y()));
        assert!(!groups["x"].is_flagged(&x()));
    }

    #[test]
    fn mixed_merge_links_per_slot() {
        let positive = Transform::new(Shape::Scalar, Bijector::LowerBound(0.));
        let mut left = VarTrace::new();
        left.push("s", Value::Scalar(2.), Some(positive)).unwrap();
        let left = left.link().unwrap();
        let mut right = VarTrace::new();
        right.push("t", Value::Scalar(3.), Some(positive)).unwrap();

        let merged = left.merge(&right);
        assert!(!merged.is_linked());
        assert_abs_diff_eq!(merged.get_raw(&"s".into()).unwrap()[0], 2f64.ln());

        let back = merged.invlink().unwrap();
        assert!(!back.transform(&"s".into()).unwrap().is_linked());
        assert_abs_diff_eq!(back.get_raw(&"s".into()).unwrap()[0], 2., epsilon = 1e-12);
        assert_eq!(back.get_raw(&"t".into()).unwrap(), &[3.]);

        let linked = merged.link().unwrap();
        assert!(linked.is_linked());
        assert_abs_diff_eq!(linked.get_raw(&"s".into()).unwrap()[0], 2f64.ln());
        assert_abs_diff_eq!(linked.get_raw(&"t".into()).unwrap()[0], 3f64.ln());
    }

    #[test]
    fn transform_swap_keeps_scalars() {
        let mut trace = VarTrace::new();
        let unit = Transform::new(Shape::Scalar, Bijector::Interval(0., 1.)).linked();
        trace.push("u", Value::Scalar(0.5), Some(unit)).unwrap();
        assert_abs_diff_eq!(trace.get_raw(&"u".into()).unwrap()[0], 0., epsilon = 1e-12);

        let wide = Transform::new(Shape::Scalar, Bijector::Interval(0., 10.)).linked();
        trace.set_transform(&"u".into(), wide).unwrap();
        assert_abs_diff_eq!(trace.get_raw(&"u".into()).unwrap()[0], 0., epsilon = 1e-12);
        let (value, logjac) = trace.get_with_logjac(&"u".into()).unwrap();
        assert_abs_diff_eq!(value.as_scalar().unwrap(), 5., epsilon = 1e-12);
        assert_abs_diff_eq!(logjac, 2.5f64.ln(), epsilon = 1e-12);

        let simplex = Transform::for_support(Shape::Vector(3), Support::Simplex).unwrap();
        assert!(matches!(
            trace.set_transform(&"u".into(), simplex.linked()),
            Err(PplError::DimensionMismatch { .. })
        ));
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            (-1e6f64..1e6f64).prop_map(Value::Scalar),
            proptest::collection::vec(-1e6f64..1e6f64, 0..6).prop_map(Value::Vector),
        ]
    }

    proptest! {
        #[test]
        fn push_get_roundtrip(values in proptest::collection::vec(arb_value(), 1..8)) {
            let mut trace = VarTrace::new();
            for (i, value) in values.iter().enumerate() {
                let name = VarName::new("v").index([i]);
                trace.push(name.clone(), value.clone(), None).unwrap();
                prop_assert_eq!(&trace.get(&name).unwrap(), value);
            }
            for (i, value) in values.iter().enumerate() {
                prop_assert_eq!(&trace.get(&VarName::new("v").index([i])).unwrap(), value);
            }
        }

        #[test]
        fn updates_keep_invariants(
            updates in proptest::collection::vec((0usize..4, 0usize..6), 1..20)
        ) {
            let mut trace = VarTrace::new();
            let mut expected: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
            for (step, (var, len)) in updates.into_iter().enumerate() {
                let vals: Vec<f64> = (0..len).map(|i| (step * 10 + i) as f64).collect();
                trace.update(VarName::new("v").index([var]), Value::Vector(vals.clone()), None).unwrap();
                expected.insert(var, vals);

                let mut end = 0;
                for name in trace.keys() {
                    let range = trace.range(name).unwrap();
                    prop_assert!(range.start >= end);
                    end = range.end + trace.num_inactive(name).unwrap();
                }
                prop_assert_eq!(end, trace.buffer_len());
            }
            for (var, vals) in &expected {
                prop_assert_eq!(
                    trace.get(&VarName::new("v").index([*var])).unwrap(),
                    Value::Vector(vals.clone())
                );
            }

            let logical = trace.to_flat();
            trace.contiguify();
            let once = trace.buffer_len();
            prop_assert!(trace.is_contiguous());
            trace.contiguify();
            prop_assert_eq!(trace.buffer_len(), once);
            prop_assert_eq!(trace.buffer_len(), trace.len());
            prop_assert_eq!(trace.to_flat(), logical);
        }
    }
}
