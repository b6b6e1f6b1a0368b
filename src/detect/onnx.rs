//! ONNX Runtime backed detector.

use std::path::Path;

use ort::session::Session;
use ort::value::Tensor;

use crate::detect::{preprocess_rgb, Detection, DetectionConfig};
use crate::trace::{trace_event, trace_span};
use crate::util::{RefMatchError, RefMatchResult};

fn inference_error(err: ort::Error) -> RefMatchError {
    RefMatchError::Inference {
        reason: err.to_string(),
    }
}

/// Single-input, single-output detection model.
pub struct OnnxDetector {
    session: Session,
    input_name: String,
    output_name: String,
    config: DetectionConfig,
}

impl OnnxDetector {
    /// Loads a model from disk; the first input and output are used.
    pub fn load<P: AsRef<Path>>(path: P, config: DetectionConfig) -> RefMatchResult<Self> {
        let session = Session::builder()
            .map_err(inference_error)?
            .commit_from_file(path)
            .map_err(inference_error)?;
        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| RefMatchError::Inference {
                reason: "model has no inputs".to_string(),
            })?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| RefMatchError::Inference {
                reason: "model has no outputs".to_string(),
            })?;
        Ok(Self {
            session,
            input_name,
            output_name,
            config,
        })
    }

    /// Active decoding settings.
    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Runs the model and returns the flat output tensor.
    pub fn infer(
        &mut self,
        rgb: &[u8],
        width: usize,
        height: usize,
        channels: usize,
    ) -> RefMatchResult<Vec<f32>> {
        let size = self.config.input_size;
        let _span = trace_span!("onnx_infer", width = width, height = height).entered();
        let data = preprocess_rgb(rgb, width, height, channels, size)?;
        let shape = [1usize, 3, size, size];
        let tensor = Tensor::from_array((shape, data.into_boxed_slice()))
            .map_err(inference_error)?
            .into_dyn();
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(inference_error)?;
        let (_shape, values) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(inference_error)?;
        trace_event!("onnx_output", len = values.len());
        Ok(values.to_vec())
    }

    /// Runs the model and decodes the best detection.
    pub fn detect(
        &mut self,
        rgb: &[u8],
        width: usize,
        height: usize,
        channels: usize,
    ) -> RefMatchResult<Option<Detection>> {
        let output = self.infer(rgb, width, height, channels)?;
        Ok(self.config.decode(&output))
    }
}
