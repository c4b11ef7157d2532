//! Weight porting between network variants.
//!
//! The dense network and the fully-convolutional network hold the same number of values per
//! layer but in different shapes (`[84, 120]` against `[84, 120, 1, 1]`). Porting walks a source
//! [`StateDict`] and reshapes each tensor into a slot of the target dictionary. Which slot is
//! chosen depends on the [`PortStrategy`].

use burn::prelude::*;

use crate::state_dict::{reshape_data, StateDict, StateDictModule};

/// Error raised while porting or loading a state dictionary.
#[derive(thiserror::Error, Debug)]
pub enum PortError {
    #[error("cannot reshape a tensor of shape {from:?} into {to:?}: element counts differ")]
    SizeMismatch { from: Vec<usize>, to: Vec<usize> },

    #[error("shape mismatch for `{name}`: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("parameter `{0}` is missing")]
    MissingName(String),

    #[error("no target slot at position {position} for `{name}` (target has {len} entries)")]
    PositionOutOfRange {
        name: String,
        position: usize,
        len: usize,
    },

    #[error("tensor data error: {0}")]
    Data(String),
}

/// How a source entry picks its destination in the target dictionary.
#[derive(Debug, Clone)]
pub enum PortStrategy {
    /// Reshape the source entry to the target slot at the running position, then write it into
    /// the target entry with the same name.
    ///
    /// The source entry is only considered when its name exists in the target, and the position
    /// only advances after a copy. Both reshapes must keep the element count. The shapes line up
    /// only when both dictionaries list their parameters in the same structural order.
    Positional,
    /// Copy the source entry into the target entry with the same name.
    ByName,
    /// Copy along an explicit, pre-validated list of `(source, target)` pairs.
    Explicit(PortMapping),
}

/// Ordered `(source, target)` name pairs, validated against both dictionaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pairs: Vec<(String, String)>,
}

impl PortMapping {
    /// Build a mapping, failing on the first name that is absent from either side.
    pub fn new<S, T>(
        pairs: impl IntoIterator<Item = (S, T)>,
        source: &StateDict,
        target: &StateDict,
    ) -> Result<Self, PortError>
    where
        S: Into<String>,
        T: Into<String>,
    {
        let pairs = pairs
            .into_iter()
            .map(|(from, to)| (from.into(), to.into()))
            .collect::<Vec<_>>();

        for (from, to) in pairs.iter() {
            if !source.contains(from) {
                return Err(PortError::MissingName(from.clone()));
            }
            if !target.contains(to) {
                return Err(PortError::MissingName(to.clone()));
            }
        }

        Ok(Self { pairs })
    }

    /// The LeNet-5 dense head to fully-convolutional head mapping.
    pub fn dense_to_fcn(source: &StateDict, target: &StateDict) -> Result<Self, PortError> {
        let layers = [
            ("convnet.c1", "convnet.c1"),
            ("convnet.c3", "convnet.c3"),
            ("convnet.c5", "convnet.c5"),
            ("fc.f6", "fc.f6"),
            ("fc.f7", "fc.fc7"),
        ];
        let pairs = layers.iter().flat_map(|(from, to)| {
            ["weight", "bias"]
                .into_iter()
                .map(move |param| (format!("{from}.{param}"), format!("{to}.{param}")))
        });

        Self::new(pairs, source, target)
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }
}

/// Outcome of a port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortReport {
    /// `(source, target)` names of every copy, in copy order.
    pub copied: Vec<(String, String)>,
    /// Source names that were not copied anywhere.
    pub skipped: Vec<String>,
}

/// Copy the values of `source` into `target` according to `strategy`.
///
/// Target entries that receive no copy are left untouched. An error leaves `target` with the
/// copies made before the failing entry.
pub fn port_state_dict(
    source: &StateDict,
    target: &mut StateDict,
    strategy: &PortStrategy,
) -> Result<PortReport, PortError> {
    let mut report = PortReport::default();

    match strategy {
        PortStrategy::Positional => {
            let mut position = 0;

            for (name, data) in source.iter() {
                if !target.contains(name) {
                    report.skipped.push(name.to_string());
                    continue;
                }

                let slot_shape = target
                    .entry_at(position)
                    .map(|(_, current)| current.shape.clone())
                    .ok_or_else(|| PortError::PositionOutOfRange {
                        name: name.to_string(),
                        position,
                        len: target.len(),
                    })?;
                let index = target
                    .position(name)
                    .ok_or_else(|| PortError::MissingName(name.to_string()))?;
                let name_shape = target
                    .entry_at(index)
                    .map(|(_, current)| current.shape.clone())
                    .unwrap_or_default();

                let viewed = reshape_data(data, &slot_shape)?;
                target.replace_at(index, reshape_data(&viewed, &name_shape)?);
                report.copied.push((name.to_string(), name.to_string()));
                position += 1;
            }
        }
        PortStrategy::ByName => {
            for (name, data) in source.iter() {
                let Some(position) = target.position(name) else {
                    report.skipped.push(name.to_string());
                    continue;
                };

                let shape = target
                    .entry_at(position)
                    .map(|(_, current)| current.shape.clone())
                    .unwrap_or_default();

                target.replace_at(position, reshape_data(data, &shape)?);
                report.copied.push((name.to_string(), name.to_string()));
            }
        }
        PortStrategy::Explicit(mapping) => {
            for (from, to) in mapping.pairs() {
                let data = source
                    .get(from)
                    .ok_or_else(|| PortError::MissingName(from.clone()))?;
                let position = target
                    .position(to)
                    .ok_or_else(|| PortError::MissingName(to.clone()))?;
                let shape = target
                    .entry_at(position)
                    .map(|(_, current)| current.shape.clone())
                    .unwrap_or_default();

                target.replace_at(position, reshape_data(data, &shape)?);
                report.copied.push((from.clone(), to.clone()));
            }

            report.skipped = source
                .names()
                .filter(|name| mapping.pairs().iter().all(|(from, _)| from != name))
                .map(str::to_string)
                .collect();
        }
    }

    log::debug!(
        "Ported {} tensors, skipped {}",
        report.copied.len(),
        report.skipped.len()
    );

    Ok(report)
}

/// Port `source` into the parameters of `module`.
pub fn port_into<B, M>(
    module: M,
    source: &StateDict,
    strategy: &PortStrategy,
) -> Result<(M, PortReport), PortError>
where
    B: Backend,
    M: StateDictModule<B>,
{
    let mut target = module.state_dict();
    let report = port_state_dict(source, &mut target, strategy)?;
    let module = module.load_state_dict(&target)?;

    Ok((module, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::TensorData;

    fn values(state: &StateDict, name: &str) -> Vec<f32> {
        state.get(name).unwrap().to_vec::<f32>().unwrap()
    }

    fn dict(entries: &[(&str, Vec<f32>, Vec<usize>)]) -> StateDict {
        let mut state = StateDict::new();
        for (name, values, shape) in entries {
            state.insert(*name, TensorData::new(values.clone(), shape.clone()));
        }
        state
    }

    #[test]
    fn positional_copies_into_positional_slot_shape() {
        let source = dict(&[
            ("w", vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]),
            ("b", vec![7.0, 8.0], vec![2]),
        ]);
        let mut target = dict(&[
            ("w", vec![0.0; 6], vec![2, 3, 1, 1]),
            ("b", vec![0.0; 2], vec![2]),
        ]);

        let report = port_state_dict(&source, &mut target, &PortStrategy::Positional).unwrap();

        assert_eq!(target.get("w").unwrap().shape, vec![2, 3, 1, 1]);
        assert_eq!(values(&target, "w"), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(values(&target, "b"), vec![7.0, 8.0]);
        assert_eq!(report.copied.len(), 2);
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn positional_skips_unknown_names_without_advancing() {
        let source = dict(&[
            ("extra", vec![9.0], vec![1]),
            ("w", vec![1.0, 2.0], vec![2]),
        ]);
        let mut target = dict(&[("w", vec![0.0, 0.0], vec![2, 1]), ("b", vec![5.0], vec![1])]);

        let report = port_state_dict(&source, &mut target, &PortStrategy::Positional).unwrap();

        assert_eq!(values(&target, "w"), vec![1.0, 2.0]);
        assert_eq!(values(&target, "b"), vec![5.0]);
        assert_eq!(report.skipped, vec!["extra".to_string()]);
    }

    #[test]
    fn positional_takes_shape_by_position_and_writes_by_name() {
        let source = dict(&[("b", vec![7.0, 8.0], vec![2]), ("w", vec![1.0, 2.0], vec![2])]);
        let mut target = dict(&[("w", vec![0.0, 0.0], vec![2]), ("b", vec![0.0, 0.0], vec![2])]);

        let report = port_state_dict(&source, &mut target, &PortStrategy::Positional).unwrap();

        assert_eq!(values(&target, "b"), vec![7.0, 8.0]);
        assert_eq!(values(&target, "w"), vec![1.0, 2.0]);
        assert_eq!(
            report.copied,
            vec![
                ("b".to_string(), "b".to_string()),
                ("w".to_string(), "w".to_string())
            ]
        );
    }

    #[test]
    fn positional_fails_when_positional_slot_size_differs() {
        // `b` is viewed with the shape of slot 0 (`w`, 4 values) before being written.
        let source = dict(&[("b", vec![7.0, 8.0], vec![2])]);
        let mut target = dict(&[("w", vec![0.0; 4], vec![2, 2]), ("b", vec![0.0, 0.0], vec![2])]);

        let result = port_state_dict(&source, &mut target, &PortStrategy::Positional);

        assert!(matches!(result, Err(PortError::SizeMismatch { .. })));
        assert_eq!(values(&target, "b"), vec![0.0, 0.0]);
    }

    #[test]
    fn positional_fails_on_element_count_mismatch() {
        let source = dict(&[("w", vec![1.0, 2.0, 3.0], vec![3])]);
        let mut target = dict(&[("w", vec![0.0; 4], vec![2, 2])]);

        let result = port_state_dict(&source, &mut target, &PortStrategy::Positional);

        assert!(matches!(result, Err(PortError::SizeMismatch { .. })));
    }

    #[test]
    fn by_name_copies_into_same_name() {
        let source = dict(&[("b", vec![7.0, 8.0], vec![2]), ("w", vec![1.0, 2.0], vec![2])]);
        let mut target = dict(&[("w", vec![0.0, 0.0], vec![2]), ("b", vec![0.0, 0.0], vec![2])]);

        port_state_dict(&source, &mut target, &PortStrategy::ByName).unwrap();

        assert_eq!(values(&target, "w"), vec![1.0, 2.0]);
        assert_eq!(values(&target, "b"), vec![7.0, 8.0]);
    }

    #[test]
    fn empty_source_is_a_no_op() {
        let source = StateDict::new();
        let mut target = dict(&[("w", vec![3.0, 4.0], vec![2])]);

        for strategy in [PortStrategy::Positional, PortStrategy::ByName] {
            let report = port_state_dict(&source, &mut target, &strategy).unwrap();

            assert_eq!(report, PortReport::default());
            assert_eq!(values(&target, "w"), vec![3.0, 4.0]);
        }
    }

    #[test]
    fn explicit_mapping_fails_fast_on_unknown_name() {
        let source = dict(&[("a", vec![1.0], vec![1])]);
        let target = dict(&[("b", vec![0.0], vec![1])]);

        let missing_target = PortMapping::new([("a", "c")], &source, &target);
        let missing_source = PortMapping::new([("z", "b")], &source, &target);

        assert!(matches!(missing_target, Err(PortError::MissingName(name)) if name == "c"));
        assert!(matches!(missing_source, Err(PortError::MissingName(name)) if name == "z"));
    }

    #[test]
    fn explicit_mapping_copies_across_names() {
        let source = dict(&[("a", vec![1.0, 2.0], vec![2]), ("x", vec![3.0], vec![1])]);
        let mut target = dict(&[("b", vec![0.0, 0.0], vec![1, 2])]);
        let mapping = PortMapping::new([("a", "b")], &source, &target).unwrap();

        let report =
            port_state_dict(&source, &mut target, &PortStrategy::Explicit(mapping)).unwrap();

        assert_eq!(values(&target, "b"), vec![1.0, 2.0]);
        assert_eq!(report.skipped, vec!["x".to_string()]);
    }
}
