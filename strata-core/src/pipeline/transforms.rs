//! Built-in transforms
//!
//! Every transform here is registered by `register_builtins` under its type
//! name and built from a parameter struct that rejects unknown fields.
//! Image transforms accept `H x W` or `H x W x C` tensors; a sample whose
//! tensor cannot be transformed is vetoed.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use tracing::debug;

use super::registry::TransformRegistry;
use super::stage::Stage;
use crate::error::{Result, StrataError};
use crate::idx::Tensor;
use crate::record::{Record, Value};

/// Register all built-in transforms
pub fn register_builtins(registry: &mut TransformRegistry) -> Result<()> {
    registry.register_typed("Collect", Collect::new)?;
    registry.register_typed("ToFloat", ToFloat::new)?;
    registry.register_typed("ToTensor", ToFloat::new)?;
    registry.register_typed("ImageToTensor", ImageToTensor::new)?;
    registry.register_typed("Transpose", Transpose::new)?;
    registry.register_typed("Normalize", Normalize::new)?;
    registry.register_typed("Resize", Resize::new)?;
    registry.register_typed("CenterCrop", CenterCrop::new)?;
    registry.register_typed("Pad", Pad::new)?;
    registry.register_typed("RandomCrop", RandomCrop::new)?;
    registry.register_typed("RandomFlip", RandomFlip::new)?;
    Ok(())
}

fn default_image_keys() -> Vec<String> {
    vec![crate::IMAGE_KEY.to_string()]
}

fn invalid(kind: &str, reason: impl Into<String>) -> StrataError {
    StrataError::InvalidParams {
        kind: kind.to_string(),
        reason: reason.into(),
    }
}

fn seeded_rng(seed: Option<u64>) -> Mutex<StdRng> {
    Mutex::new(match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    })
}

/// Replace each tensor field named in `keys`; absent fields are left alone
fn map_tensors(
    mut record: Record,
    keys: &[String],
    f: impl Fn(&Tensor) -> Option<Tensor>,
) -> Option<Record> {
    for key in keys {
        if let Some(Value::Tensor(tensor)) = record.get_mut(key) {
            match f(tensor) {
                Some(out) => *tensor = out,
                None => {
                    debug!("Vetoing sample: field '{}' of shape {:?} not transformable", key, tensor.shape());
                    return None;
                }
            }
        }
    }
    Some(record)
}

/// `(height, width, channels)` of an HW or HWC image
fn image_dims(tensor: &Tensor) -> Option<(usize, usize, usize)> {
    match *tensor.shape() {
        [h, w] => Some((h, w, 1)),
        [h, w, c] => Some((h, w, c)),
        _ => None,
    }
}

/// First image-shaped tensor among `keys`
fn first_image_dims(record: &Record, keys: &[String]) -> Option<(usize, usize, usize)> {
    keys.iter()
        .filter_map(|key| record.tensor(key))
        .find_map(image_dims)
}

/// Build an `out_h x out_w` image whose pixel `(y, x)` is copied from
/// `source(y, x)`, or filled with `fill` when the source is outside the input
fn remap(
    tensor: &Tensor,
    out_h: usize,
    out_w: usize,
    fill: f64,
    source: impl Fn(usize, usize) -> Option<(usize, usize)>,
) -> Option<Tensor> {
    let (h, w, c) = image_dims(tensor)?;
    let mut indices = Vec::with_capacity(out_h * out_w * c);
    for y in 0..out_h {
        for x in 0..out_w {
            let src = source(y, x).filter(|&(sy, sx)| sy < h && sx < w);
            for ch in 0..c {
                indices.push(src.map(|(sy, sx)| (sy * w + sx) * c + ch));
            }
        }
    }
    let shape = if tensor.ndim() == 2 {
        vec![out_h, out_w]
    } else {
        vec![out_h, out_w, c]
    };
    Some(tensor.gather(shape, &indices, fill))
}

fn crop(tensor: &Tensor, top: usize, left: usize, crop_h: usize, crop_w: usize) -> Option<Tensor> {
    let (h, w, _) = image_dims(tensor)?;
    if top + crop_h > h || left + crop_w > w {
        return None;
    }
    remap(tensor, crop_h, crop_w, 0.0, |y, x| Some((y + top, x + left)))
}

/// Target size given as a single edge or `[height, width]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SizeParam {
    Square(usize),
    Pair([usize; 2]),
}

impl SizeParam {
    /// `(height, width)`
    pub fn hw(&self) -> (usize, usize) {
        match *self {
            SizeParam::Square(edge) => (edge, edge),
            SizeParam::Pair([h, w]) => (h, w),
        }
    }

    fn validate(&self, kind: &str) -> Result<(usize, usize)> {
        let (h, w) = self.hw();
        if h == 0 || w == 0 {
            return Err(invalid(kind, format!("size must be positive, got {:?}", self)));
        }
        Ok((h, w))
    }
}

// ========== Collect ==========

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectParams {
    pub keys: Vec<String>,
}

/// Keep only the listed fields; veto records missing any of them
#[derive(Debug, Clone)]
pub struct Collect {
    keys: Vec<String>,
}

impl Collect {
    pub fn new(params: CollectParams) -> Result<Self> {
        Ok(Self { keys: params.keys })
    }
}

impl Stage for Collect {
    fn name(&self) -> String {
        format!("Collect(keys={:?})", self.keys)
    }

    fn apply(&self, mut record: Record) -> Option<Record> {
        if let Some(missing) = self.keys.iter().find(|key| !record.contains_key(key)) {
            debug!("Vetoing sample: missing field '{}'", missing);
            return None;
        }
        record.retain_keys(&self.keys);
        Some(record)
    }
}

// ========== Type conversion ==========

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeysParams {
    pub keys: Vec<String>,
}

/// Convert tensors to `f32`
#[derive(Debug, Clone)]
pub struct ToFloat {
    keys: Vec<String>,
}

impl ToFloat {
    pub fn new(params: KeysParams) -> Result<Self> {
        Ok(Self { keys: params.keys })
    }
}

impl Stage for ToFloat {
    fn name(&self) -> String {
        format!("ToFloat(keys={:?})", self.keys)
    }

    fn apply(&self, record: Record) -> Option<Record> {
        map_tensors(record, &self.keys, |t| Some(t.to_f32()))
    }
}

/// Convert HW or HWC images into channel-first `f32` tensors
#[derive(Debug, Clone)]
pub struct ImageToTensor {
    keys: Vec<String>,
}

impl ImageToTensor {
    pub fn new(params: KeysParams) -> Result<Self> {
        Ok(Self { keys: params.keys })
    }
}

impl Stage for ImageToTensor {
    fn name(&self) -> String {
        format!("ImageToTensor(keys={:?})", self.keys)
    }

    fn apply(&self, record: Record) -> Option<Record> {
        map_tensors(record, &self.keys, |t| match *t.shape() {
            [h, w] => t.to_f32().reshape(vec![1, h, w]).ok(),
            [_, _, _] => t.permute(&[2, 0, 1]).ok().map(|chw| chw.to_f32()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransposeParams {
    pub keys: Vec<String>,
    pub order: Vec<usize>,
}

/// Permute tensor axes
#[derive(Debug, Clone)]
pub struct Transpose {
    keys: Vec<String>,
    order: Vec<usize>,
}

impl Transpose {
    pub fn new(params: TransposeParams) -> Result<Self> {
        let mut sorted = params.order.clone();
        sorted.sort_unstable();
        if sorted.iter().enumerate().any(|(i, &axis)| i != axis) {
            return Err(invalid(
                "Transpose",
                format!("order {:?} is not a permutation", params.order),
            ));
        }
        Ok(Self {
            keys: params.keys,
            order: params.order,
        })
    }
}

impl Stage for Transpose {
    fn name(&self) -> String {
        format!("Transpose(keys={:?}, order={:?})", self.keys, self.order)
    }

    fn apply(&self, record: Record) -> Option<Record> {
        map_tensors(record, &self.keys, |t| t.permute(&self.order).ok())
    }
}

// ========== Normalize ==========

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NormalizeParams {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
    #[serde(default)]
    pub to_rgb: bool,
    #[serde(default = "default_image_keys")]
    pub keys: Vec<String>,
}

/// Per-channel `(x - mean) / std`, producing `f32`
///
/// Channels are the last axis of an HWC image; an HW image is one channel.
/// A single mean/std pair applies to every channel.
#[derive(Debug, Clone)]
pub struct Normalize {
    mean: Vec<f64>,
    std: Vec<f64>,
    to_rgb: bool,
    keys: Vec<String>,
}

impl Normalize {
    pub fn new(params: NormalizeParams) -> Result<Self> {
        if params.mean.is_empty() || params.mean.len() != params.std.len() {
            return Err(invalid(
                "Normalize",
                format!(
                    "mean and std must be non-empty and equal length, got {} and {}",
                    params.mean.len(),
                    params.std.len()
                ),
            ));
        }
        if params.std.iter().any(|&s| s == 0.0) {
            return Err(invalid("Normalize", "std must be non-zero"));
        }
        Ok(Self {
            mean: params.mean,
            std: params.std,
            to_rgb: params.to_rgb,
            keys: params.keys,
        })
    }

    fn normalize(&self, tensor: &Tensor) -> Option<Tensor> {
        let (_, _, channels) = image_dims(tensor)?;
        if self.mean.len() != 1 && self.mean.len() != channels {
            return None;
        }
        let swap = self.to_rgb && channels == 3;
        let src = tensor.data().to_f32_vec();
        let out = (0..src.len())
            .map(|i| {
                let c = i % channels;
                let from = if swap { i - c + (2 - c) } else { i };
                let stat = if self.mean.len() == 1 { 0 } else { c };
                ((src[from] as f64 - self.mean[stat]) / self.std[stat]) as f32
            })
            .collect();
        Tensor::from_f32(tensor.shape().to_vec(), out).ok()
    }
}

impl Stage for Normalize {
    fn name(&self) -> String {
        format!(
            "Normalize(mean={:?}, std={:?}, to_rgb={})",
            self.mean, self.std, self.to_rgb
        )
    }

    fn apply(&self, record: Record) -> Option<Record> {
        map_tensors(record, &self.keys, |t| self.normalize(t))
    }
}

// ========== Geometry ==========

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResizeParams {
    pub size: SizeParam,
    #[serde(default = "default_image_keys")]
    pub keys: Vec<String>,
}

/// Nearest-neighbour resize
#[derive(Debug, Clone)]
pub struct Resize {
    height: usize,
    width: usize,
    keys: Vec<String>,
}

impl Resize {
    pub fn new(params: ResizeParams) -> Result<Self> {
        let (height, width) = params.size.validate("Resize")?;
        Ok(Self {
            height,
            width,
            keys: params.keys,
        })
    }
}

impl Stage for Resize {
    fn name(&self) -> String {
        format!("Resize(size=({}, {}))", self.height, self.width)
    }

    fn apply(&self, record: Record) -> Option<Record> {
        map_tensors(record, &self.keys, |t| {
            let (h, w, _) = image_dims(t)?;
            remap(t, self.height, self.width, 0.0, |y, x| {
                Some((y * h / self.height, x * w / self.width))
            })
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CropParams {
    #[serde(alias = "crop_size")]
    pub size: SizeParam,
    #[serde(default = "default_image_keys")]
    pub keys: Vec<String>,
}

/// Crop the centre window; images smaller than the window are vetoed
#[derive(Debug, Clone)]
pub struct CenterCrop {
    height: usize,
    width: usize,
    keys: Vec<String>,
}

impl CenterCrop {
    pub fn new(params: CropParams) -> Result<Self> {
        let (height, width) = params.size.validate("CenterCrop")?;
        Ok(Self {
            height,
            width,
            keys: params.keys,
        })
    }
}

impl Stage for CenterCrop {
    fn name(&self) -> String {
        format!("CenterCrop(crop_size=({}, {}))", self.height, self.width)
    }

    fn apply(&self, record: Record) -> Option<Record> {
        map_tensors(record, &self.keys, |t| {
            let (h, w, _) = image_dims(t)?;
            let top = h.checked_sub(self.height)? / 2;
            let left = w.checked_sub(self.width)? / 2;
            crop(t, top, left, self.height, self.width)
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PadParams {
    pub size: SizeParam,
    #[serde(default)]
    pub pad_val: f64,
    #[serde(default = "default_image_keys")]
    pub keys: Vec<String>,
}

/// Pad bottom and right edges up to a fixed size
#[derive(Debug, Clone)]
pub struct Pad {
    height: usize,
    width: usize,
    pad_val: f64,
    keys: Vec<String>,
}

impl Pad {
    pub fn new(params: PadParams) -> Result<Self> {
        let (height, width) = params.size.validate("Pad")?;
        Ok(Self {
            height,
            width,
            pad_val: params.pad_val,
            keys: params.keys,
        })
    }
}

impl Stage for Pad {
    fn name(&self) -> String {
        format!(
            "Pad(size=({}, {}), pad_val={})",
            self.height, self.width, self.pad_val
        )
    }

    fn apply(&self, record: Record) -> Option<Record> {
        map_tensors(record, &self.keys, |t| {
            let (h, w, _) = image_dims(t)?;
            if h > self.height || w > self.width {
                return None;
            }
            remap(t, self.height, self.width, self.pad_val, |y, x| Some((y, x)))
        })
    }
}

// ========== Random augmentation ==========

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RandomCropParams {
    pub size: SizeParam,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_image_keys")]
    pub keys: Vec<String>,
}

/// Crop a uniformly placed window, the same one for every listed field
#[derive(Debug)]
pub struct RandomCrop {
    height: usize,
    width: usize,
    keys: Vec<String>,
    rng: Mutex<StdRng>,
}

impl RandomCrop {
    pub fn new(params: RandomCropParams) -> Result<Self> {
        let (height, width) = params.size.validate("RandomCrop")?;
        Ok(Self {
            height,
            width,
            keys: params.keys,
            rng: seeded_rng(params.seed),
        })
    }
}

impl Stage for RandomCrop {
    fn name(&self) -> String {
        format!("RandomCrop(size=({}, {}))", self.height, self.width)
    }

    fn apply(&self, record: Record) -> Option<Record> {
        let Some((h, w, _)) = first_image_dims(&record, &self.keys) else {
            return Some(record);
        };
        let max_top = h.checked_sub(self.height)?;
        let max_left = w.checked_sub(self.width)?;
        let (top, left) = {
            let mut rng = self.rng.lock();
            (rng.gen_range(0..=max_top), rng.gen_range(0..=max_left))
        };
        map_tensors(record, &self.keys, |t| {
            crop(t, top, left, self.height, self.width)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlipDirection {
    #[default]
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RandomFlipParams {
    #[serde(default = "default_flip_prob", alias = "flip_prob")]
    pub prob: f64,
    #[serde(default)]
    pub direction: FlipDirection,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_image_keys")]
    pub keys: Vec<String>,
}

fn default_flip_prob() -> f64 {
    0.5
}

/// Mirror images with the given probability
#[derive(Debug)]
pub struct RandomFlip {
    prob: f64,
    direction: FlipDirection,
    keys: Vec<String>,
    rng: Mutex<StdRng>,
}

impl RandomFlip {
    pub fn new(params: RandomFlipParams) -> Result<Self> {
        if !(0.0..=1.0).contains(&params.prob) {
            return Err(invalid(
                "RandomFlip",
                format!("prob must be in [0, 1], got {}", params.prob),
            ));
        }
        Ok(Self {
            prob: params.prob,
            direction: params.direction,
            keys: params.keys,
            rng: seeded_rng(params.seed),
        })
    }
}

impl Stage for RandomFlip {
    fn name(&self) -> String {
        format!(
            "RandomFlip(flip_prob={}, direction={:?})",
            self.prob, self.direction
        )
    }

    fn apply(&self, record: Record) -> Option<Record> {
        let flip = self.rng.lock().gen::<f64>() < self.prob;
        if !flip {
            return Some(record);
        }
        map_tensors(record, &self.keys, |t| {
            let (h, w, _) = image_dims(t)?;
            match self.direction {
                FlipDirection::Horizontal => remap(t, h, w, 0.0, |y, x| Some((y, w - 1 - x))),
                FlipDirection::Vertical => remap(t, h, w, 0.0, |y, x| Some((h - 1 - y, x))),
            }
        })
    }
}
