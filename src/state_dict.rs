//! Ordered parameter snapshots of a network.
//!
//! A [`StateDict`] lists every learnable tensor of a module under its structural name
//! (`convnet.c1.weight`, `fc.f6.bias`, ...) in layer order, weight before bias. Dense weights are
//! stored output-major (`[d_output, d_input]`), so a dense weight and the 1×1 convolution that
//! replaces it hold their values in the same order.

use burn::{
    module::Param,
    nn::{conv::Conv2d, Linear},
    prelude::*,
    tensor::TensorData,
};

use crate::port::PortError;

/// Ordered mapping from parameter name to tensor data.
#[derive(Debug, Clone, Default)]
pub struct StateDict {
    entries: Vec<(String, TensorData)>,
}

impl StateDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, replacing the value in place when the name is already present.
    pub fn insert(&mut self, name: impl Into<String>, data: TensorData) {
        let name = name.into();
        match self.position(&name) {
            Some(index) => self.entries[index].1 = data,
            None => self.entries.push((name, data)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&TensorData> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, data)| data)
    }

    /// Index of `name` in iteration order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(entry, _)| entry == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Entry at a position in iteration order.
    pub fn entry_at(&self, index: usize) -> Option<(&str, &TensorData)> {
        self.entries
            .get(index)
            .map(|(name, data)| (name.as_str(), data))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TensorData)> {
        self.entries.iter().map(|(name, data)| (name.as_str(), data))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of scalar values over all entries.
    pub fn num_elements(&self) -> usize {
        self.entries
            .iter()
            .map(|(_, data)| data.shape.iter().product::<usize>())
            .sum()
    }

    pub(crate) fn replace_at(&mut self, index: usize, data: TensorData) {
        self.entries[index].1 = data;
    }
}

/// Modules that can export their parameters as a [`StateDict`] and load them back.
pub trait StateDictModule<B: Backend>: Sized {
    /// Snapshot of every parameter, in structural order.
    fn state_dict(&self) -> StateDict;

    /// Replace every parameter with the entry of the same name.
    ///
    /// Parameter ids are kept, so an optimizer created before the load still tracks the
    /// parameters. Fails when a name is missing or a shape differs.
    fn load_state_dict(self, state: &StateDict) -> Result<Self, PortError>;
}

/// Reshape `data` to `shape`, keeping the values in row-major order.
pub fn reshape_data(data: &TensorData, shape: &[usize]) -> Result<TensorData, PortError> {
    let expected = shape.iter().product::<usize>();
    let actual = data.shape.iter().product::<usize>();

    if expected != actual {
        return Err(PortError::SizeMismatch {
            from: data.shape.clone(),
            to: shape.to_vec(),
        });
    }

    let values = data
        .clone()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| PortError::Data(format!("{err:?}")))?;

    Ok(TensorData::new(values, shape.to_vec()))
}

fn snapshot<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> TensorData {
    tensor.into_data().convert::<f32>()
}

pub(crate) fn export_conv<B: Backend>(prefix: &str, conv: &Conv2d<B>, state: &mut StateDict) {
    state.insert(format!("{prefix}.weight"), snapshot(conv.weight.val()));
    if let Some(bias) = &conv.bias {
        state.insert(format!("{prefix}.bias"), snapshot(bias.val()));
    }
}

pub(crate) fn export_linear<B: Backend>(prefix: &str, linear: &Linear<B>, state: &mut StateDict) {
    // burn keeps [d_input, d_output]
    state.insert(
        format!("{prefix}.weight"),
        snapshot(linear.weight.val().transpose()),
    );
    if let Some(bias) = &linear.bias {
        state.insert(format!("{prefix}.bias"), snapshot(bias.val()));
    }
}

pub(crate) fn load_conv<B: Backend>(
    prefix: &str,
    mut conv: Conv2d<B>,
    state: &StateDict,
) -> Result<Conv2d<B>, PortError> {
    conv.weight = load_param(&format!("{prefix}.weight"), conv.weight, state, |t| t)?;
    conv.bias = conv
        .bias
        .map(|bias| load_param(&format!("{prefix}.bias"), bias, state, |t| t))
        .transpose()?;

    Ok(conv)
}

pub(crate) fn load_linear<B: Backend>(
    prefix: &str,
    mut linear: Linear<B>,
    state: &StateDict,
) -> Result<Linear<B>, PortError> {
    linear.weight = load_param(
        &format!("{prefix}.weight"),
        linear.weight,
        state,
        Tensor::transpose,
    )?;
    linear.bias = linear
        .bias
        .map(|bias| load_param(&format!("{prefix}.bias"), bias, state, |t| t))
        .transpose()?;

    Ok(linear)
}

/// Load `name` into `param`, mapping the stored layout to the module layout with `layout`.
fn load_param<B: Backend, const D: usize, F>(
    name: &str,
    param: Param<Tensor<B, D>>,
    state: &StateDict,
    layout: F,
) -> Result<Param<Tensor<B, D>>, PortError>
where
    F: FnOnce(Tensor<B, D>) -> Tensor<B, D>,
{
    let data = state
        .get(name)
        .ok_or_else(|| PortError::MissingName(name.to_string()))?;

    let current = param.val();
    let device = current.device();
    let expected = current.dims().to_vec();

    if data.shape.len() != D {
        return Err(PortError::ShapeMismatch {
            name: name.to_string(),
            expected,
            actual: data.shape.clone(),
        });
    }

    let tensor = layout(Tensor::<B, D>::from_data(
        data.clone().convert::<B::FloatElem>(),
        &device,
    ));

    if tensor.dims().to_vec() != expected {
        return Err(PortError::ShapeMismatch {
            name: name.to_string(),
            expected,
            actual: data.shape.clone(),
        });
    }

    Ok(Param::initialized(param.id, tensor.require_grad()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::nn::{conv::Conv2dConfig, LinearConfig};

    type TestBackend = NdArray<f32>;

    #[test]
    fn insert_keeps_order_and_replaces_in_place() {
        let mut state = StateDict::new();
        state.insert("a", TensorData::new(vec![1.0f32], [1]));
        state.insert("b", TensorData::new(vec![2.0f32], [1]));
        state.insert("a", TensorData::new(vec![3.0f32], [1]));

        assert_eq!(state.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(
            state.get("a").unwrap().to_vec::<f32>().unwrap(),
            vec![3.0f32]
        );
        assert_eq!(state.position("b"), Some(1));
        assert!(!state.contains("c"));
    }

    #[test]
    fn reshape_keeps_row_major_values() {
        let data = TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], [2, 3]);

        let reshaped = reshape_data(&data, &[3, 2, 1, 1]).unwrap();
        let back = reshape_data(&reshaped, &[2, 3]).unwrap();

        assert_eq!(reshaped.shape, vec![3, 2, 1, 1]);
        assert_eq!(
            back.to_vec::<f32>().unwrap(),
            data.to_vec::<f32>().unwrap()
        );
    }

    #[test]
    fn reshape_rejects_size_mismatch() {
        let data = TensorData::new(vec![0.0f32; 6], [2, 3]);

        let result = reshape_data(&data, &[4, 2]);

        assert!(matches!(result, Err(PortError::SizeMismatch { .. })));
    }

    #[test]
    fn linear_weight_is_exported_output_major() {
        let device = Default::default();
        let linear = LinearConfig::new(3, 2).init::<TestBackend>(&device);
        let mut state = StateDict::new();

        export_linear("fc", &linear, &mut state);

        assert_eq!(state.get("fc.weight").unwrap().shape, vec![2, 3]);
        assert_eq!(state.get("fc.bias").unwrap().shape, vec![2]);
    }

    #[test]
    fn linear_load_restores_exported_values() {
        let device = Default::default();
        let source = LinearConfig::new(3, 2).init::<TestBackend>(&device);
        let target = LinearConfig::new(3, 2).init::<TestBackend>(&device);
        let mut state = StateDict::new();
        export_linear("fc", &source, &mut state);

        let target = load_linear("fc", target, &state).unwrap();

        assert_eq!(
            target.weight.val().into_data().to_vec::<f32>().unwrap(),
            source.weight.val().into_data().to_vec::<f32>().unwrap()
        );
    }

    #[test]
    fn conv_load_rejects_wrong_shape() {
        let device = Default::default();
        let conv = Conv2dConfig::new([1, 2], [3, 3]).init::<TestBackend>(&device);
        let mut state = StateDict::new();
        state.insert("c.weight", TensorData::new(vec![0.0f32; 18], [2, 1, 9, 1]));
        state.insert("c.bias", TensorData::new(vec![0.0f32; 2], [2]));

        let result = load_conv("c", conv, &state);

        assert!(matches!(result, Err(PortError::ShapeMismatch { .. })));
    }

    #[test]
    fn conv_load_reports_missing_name() {
        let device = Default::default();
        let conv = Conv2dConfig::new([1, 2], [3, 3]).init::<TestBackend>(&device);

        let result = load_conv("c", conv, &StateDict::new());

        assert!(matches!(result, Err(PortError::MissingName(name)) if name == "c.weight"));
    }
}
