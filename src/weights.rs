/// Weight tensor handling
///
/// Treats a model's weights as an ordered list of rectangular numeric
/// arrays (layers), following the teacher's `parameters: Vec<Vec<f32>>`
/// representation. Aggregation is element-wise and framework-agnostic;
/// only the invariants and the SHA-256 of the serialized artifact are
/// contractually fixed by the rest of the system.
use sha2::{Digest, Sha256};

/// A single dense layer: a weight matrix (rows = inputs, cols = outputs)
/// flattened row-major, plus a bias vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub weights: Vec<f32>,
    pub input_dim: usize,
    pub output_dim: usize,
    pub bias: Vec<f32>,
}

impl Layer {
    pub fn new(weights: Vec<f32>, input_dim: usize, output_dim: usize, bias: Vec<f32>) -> Self {
        Self {
            weights,
            input_dim,
            output_dim,
            bias,
        }
    }
}

/// A full model as submitted by a participant: an ordered list of layers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightSet {
    pub layers: Vec<Layer>,
}

impl WeightSet {
    pub fn new(layers: Vec<Layer>) -> Self {
        Self { layers }
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// mean of mean(|w|) over all nonempty tensors — each layer's weight
    /// matrix and bias vector count as separate tensors, matching a
    /// framework's `layer.get_weights()` returning `[kernel, bias]`.
    pub fn avg_magnitude(&self) -> f64 {
        let magnitudes: Vec<f64> = self.tensor_magnitudes();
        if magnitudes.is_empty() {
            return 0.0;
        }
        magnitudes.iter().sum::<f64>() / magnitudes.len() as f64
    }

    /// variance over per-tensor magnitudes
    pub fn variance(&self) -> f64 {
        let magnitudes = self.tensor_magnitudes();
        if magnitudes.is_empty() {
            return 0.0;
        }
        let mean = magnitudes.iter().sum::<f64>() / magnitudes.len() as f64;
        magnitudes
            .iter()
            .map(|m| (m - mean).powi(2))
            .sum::<f64>()
            / magnitudes.len() as f64
    }

    fn tensor_magnitudes(&self) -> Vec<f64> {
        fn magnitude(tensor: &[f32]) -> Option<f64> {
            if tensor.is_empty() {
                return None;
            }
            let sum: f64 = tensor.iter().map(|w| (*w as f64).abs()).sum();
            Some(sum / tensor.len() as f64)
        }

        self.layers
            .iter()
            .flat_map(|l| [magnitude(&l.weights), magnitude(&l.bias)])
            .flatten()
            .collect()
    }

    pub fn has_nan(&self) -> bool {
        self.layers
            .iter()
            .any(|l| l.weights.iter().any(|w| w.is_nan()) || l.bias.iter().any(|b| b.is_nan()))
    }

    pub fn has_inf(&self) -> bool {
        self.layers
            .iter()
            .any(|l| l.weights.iter().any(|w| w.is_infinite()) || l.bias.iter().any(|b| b.is_infinite()))
    }

    /// Shapes must match exactly between models before an element-wise
    /// weighted sum is valid.
    pub fn same_shape_as(&self, other: &WeightSet) -> bool {
        if self.layers.len() != other.layers.len() {
            return false;
        }
        self.layers.iter().zip(other.layers.iter()).all(|(a, b)| {
            a.input_dim == b.input_dim && a.output_dim == b.output_dim && a.weights.len() == b.weights.len() && a.bias.len() == b.bias.len()
        })
    }
}

/// Element-wise weighted sum of a set of same-shaped weight sets.
///
/// Returns an error string (not `AggregatorError`, to keep this module
/// dependency-free of the crate's error taxonomy) if any two inputs
/// disagree on shape, or if `models` is empty.
pub fn weighted_average(models: &[(&WeightSet, f64)]) -> Result<WeightSet, String> {
    let (first, _) = models.first().ok_or("no models to aggregate")?;
    for (model, _) in models.iter().skip(1) {
        if !model.same_shape_as(first) {
            return Err("layer shape mismatch between accepted models".to_string());
        }
    }

    let num_layers = first.layers.len();
    let mut out_layers = Vec::with_capacity(num_layers);

    for layer_idx in 0..num_layers {
        let input_dim = first.layers[layer_idx].input_dim;
        let output_dim = first.layers[layer_idx].output_dim;
        let weight_len = first.layers[layer_idx].weights.len();
        let bias_len = first.layers[layer_idx].bias.len();

        let mut weights = vec![0.0f32; weight_len];
        let mut bias = vec![0.0f32; bias_len];

        for (model, weight) in models {
            let layer = &model.layers[layer_idx];
            for (acc, w) in weights.iter_mut().zip(layer.weights.iter()) {
                *acc += (*w as f64 * weight) as f32;
            }
            for (acc, b) in bias.iter_mut().zip(layer.bias.iter()) {
                *acc += (*b as f64 * weight) as f32;
            }
        }

        out_layers.push(Layer::new(weights, input_dim, output_dim, bias));
    }

    Ok(WeightSet::new(out_layers))
}

/// The fixed architecture the aggregator materializes: Dense(64, relu) ->
/// Dense(32, relu) -> Dense(1, sigmoid). Input dimension is taken from the
/// first layer's weight rows of the aggregated weights.
pub struct AggregatedModel {
    pub weights: WeightSet,
}

impl AggregatedModel {
    pub fn from_weights(weights: WeightSet) -> Self {
        Self { weights }
    }

    /// Serializes the model to a deterministic byte layout: for each
    /// layer, `input_dim` and `output_dim` as little-endian u32, then the
    /// weight matrix and bias vector as little-endian f32. This crate owns
    /// the encoding (there is no Rust binding for the original's Keras
    /// `.h5` format); the `.h5` filename is kept only for path
    /// compatibility with the blob store and ledger contracts.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(self.weights.layers.len() as u32).to_le_bytes());
        for layer in &self.weights.layers {
            buf.extend_from_slice(&(layer.input_dim as u32).to_le_bytes());
            buf.extend_from_slice(&(layer.output_dim as u32).to_le_bytes());
            buf.extend_from_slice(&(layer.weights.len() as u32).to_le_bytes());
            for w in &layer.weights {
                buf.extend_from_slice(&w.to_le_bytes());
            }
            buf.extend_from_slice(&(layer.bias.len() as u32).to_le_bytes());
            for b in &layer.bias {
                buf.extend_from_slice(&b.to_le_bytes());
            }
        }
        buf
    }
}

/// `sha256(file_bytes).hexdigest()` — lowercase hex, no prefix.
pub fn weight_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Inverse of `AggregatedModel::serialize`. Submitted weight files on disk
/// are expected to use this crate's own layout (there is no shared
/// framework-level wire format in scope — see Design Notes §9).
pub fn deserialize(bytes: &[u8]) -> Result<WeightSet, String> {
    let mut cursor = 0usize;
    let read_u32 = |bytes: &[u8], cursor: &mut usize| -> Result<u32, String> {
        let slice = bytes
            .get(*cursor..*cursor + 4)
            .ok_or("truncated weight file")?;
        *cursor += 4;
        Ok(u32::from_le_bytes(slice.try_into().unwrap()))
    };
    let read_f32 = |bytes: &[u8], cursor: &mut usize| -> Result<f32, String> {
        let slice = bytes
            .get(*cursor..*cursor + 4)
            .ok_or("truncated weight file")?;
        *cursor += 4;
        Ok(f32::from_le_bytes(slice.try_into().unwrap()))
    };

    let num_layers = read_u32(bytes, &mut cursor)?;
    let mut layers = Vec::with_capacity(num_layers as usize);
    for _ in 0..num_layers {
        let input_dim = read_u32(bytes, &mut cursor)? as usize;
        let output_dim = read_u32(bytes, &mut cursor)? as usize;
        let weight_len = read_u32(bytes, &mut cursor)? as usize;
        let mut weights = Vec::with_capacity(weight_len);
        for _ in 0..weight_len {
            weights.push(read_f32(bytes, &mut cursor)?);
        }
        let bias_len = read_u32(bytes, &mut cursor)? as usize;
        let mut bias = Vec::with_capacity(bias_len);
        for _ in 0..bias_len {
            bias.push(read_f32(bytes, &mut cursor)?);
        }
        layers.push(Layer::new(weights, input_dim, output_dim, bias));
    }
    Ok(WeightSet::new(layers))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(weights: Vec<f32>, input_dim: usize, output_dim: usize) -> Layer {
        let bias = vec![0.0; output_dim];
        Layer::new(weights, input_dim, output_dim, bias)
    }

    #[test]
    fn avg_magnitude_is_mean_of_tensor_means() {
        // weight tensor mean(|w|) = 1.5, bias tensor (zeroed by the `layer`
        // helper) mean(|b|) = 0.0 -> averaged across both tensors.
        let ws = WeightSet::new(vec![layer(vec![1.0, -1.0, 2.0, -2.0], 2, 2)]);
        assert_eq!(ws.avg_magnitude(), 0.75);
    }

    #[test]
    fn avg_magnitude_includes_bias_tensor() {
        let l = Layer::new(vec![1.0, 1.0], 1, 2, vec![9.0, 9.0]);
        let ws = WeightSet::new(vec![l]);
        // weight tensor mean = 1.0, bias tensor mean = 9.0 -> avg 5.0
        assert_eq!(ws.avg_magnitude(), 5.0);
    }

    #[test]
    fn empty_weight_set_has_zero_stats() {
        let ws = WeightSet::default();
        assert_eq!(ws.avg_magnitude(), 0.0);
        assert_eq!(ws.variance(), 0.0);
        assert!(!ws.has_nan());
    }

    #[test]
    fn detects_nan_and_inf() {
        let ws_nan = WeightSet::new(vec![layer(vec![f32::NAN, 1.0], 1, 2)]);
        assert!(ws_nan.has_nan());
        let ws_inf = WeightSet::new(vec![layer(vec![f32::INFINITY, 1.0], 1, 2)]);
        assert!(ws_inf.has_inf());
    }

    #[test]
    fn weighted_average_normalizes_per_element() {
        let a = WeightSet::new(vec![layer(vec![1.0, 1.0], 1, 2)]);
        let b = WeightSet::new(vec![layer(vec![3.0, 3.0], 1, 2)]);
        let avg = weighted_average(&[(&a, 0.5), (&b, 0.5)]).unwrap();
        assert_eq!(avg.layers[0].weights, vec![2.0, 2.0]);
    }

    #[test]
    fn weighted_average_rejects_shape_mismatch() {
        let a = WeightSet::new(vec![layer(vec![1.0, 1.0], 1, 2)]);
        let b = WeightSet::new(vec![layer(vec![1.0, 1.0, 1.0], 1, 3)]);
        assert!(weighted_average(&[(&a, 0.5), (&b, 0.5)]).is_err());
    }

    #[test]
    fn weight_hash_is_lowercase_hex_no_prefix() {
        let hash = weight_hash(b"hello");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn serialize_then_deserialize_round_trips() {
        let ws = WeightSet::new(vec![layer(vec![1.0, -2.5, 3.0, 0.25], 2, 2)]);
        let model = AggregatedModel::from_weights(ws.clone());
        let bytes = model.serialize();
        let decoded = deserialize(&bytes).unwrap();
        assert_eq!(decoded, ws);
    }
}
