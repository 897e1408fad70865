//! A TensorFlow session over a loaded SavedModel.

use crate::{
    common::*,
    config::{check_model_dir, SessionConfig, TensorName},
};

/// The fetched output tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOutput {
    pub dims: Vec<u64>,
    pub values: Vec<f32>,
}

impl Display for InferenceOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "shape {:?}", self.dims)?;
        match self.dims.last() {
            Some(&width) if width > 0 && self.dims.len() > 1 => {
                for row in self.values.chunks(width as usize) {
                    writeln!(f, "{:?}", row)?;
                }
            }
            _ => writeln!(f, "{:?}", self.values)?,
        }
        Ok(())
    }
}

/// A session bound to a loaded model. Close it with [InferenceSession::close].
pub struct InferenceSession {
    graph: Graph,
    bundle: SavedModelBundle,
    input: TensorName,
    output: TensorName,
}

impl InferenceSession {
    pub fn open(config: &SessionConfig) -> Result<Self> {
        let SessionConfig {
            model_dir,
            tag,
            input,
            output,
        } = config;

        check_model_dir(model_dir)?;

        let mut graph = Graph::new();
        let bundle =
            SavedModelBundle::load(&SessionOptions::new(), [tag], &mut graph, model_dir)
                .with_context(|| format!("failed to load model '{}'", model_dir.display()))?;
        info!("loaded model {} with tag '{}'", model_dir.display(), tag);

        // fail early on unknown tensors
        for name in [input, output] {
            graph
                .operation_by_name_required(&name.op)
                .with_context(|| format!("tensor '{}' is not found in the graph", name))?;
        }

        Ok(Self {
            graph,
            bundle,
            input: input.clone(),
            output: output.clone(),
        })
    }

    /// Run the model on an encoded image file.
    pub fn run_file(&self, path: &Path) -> Result<InferenceOutput> {
        let bytes =
            fs::read(path).with_context(|| format!("failed to read '{}'", path.display()))?;
        self.run(&bytes)
    }

    /// Decode the image and feed it as a `[1, height, width, 3]` uint8 tensor.
    pub fn run(&self, image_bytes: &[u8]) -> Result<InferenceOutput> {
        let input = image_tensor(image_bytes)?;
        debug!("feeding {} with shape {:?}", self.input, input.dims());

        let input_op = self.graph.operation_by_name_required(&self.input.op)?;
        let output_op = self.graph.operation_by_name_required(&self.output.op)?;

        let mut args = SessionRunArgs::new();
        args.add_feed(&input_op, self.input.index, &input);
        let token = args.request_fetch(&output_op, self.output.index);
        self.bundle.session.run(&mut args)?;

        let output: Tensor<f32> = args
            .fetch(token)
            .with_context(|| format!("failed to fetch '{}' as float tensor", self.output))?;

        Ok(InferenceOutput {
            dims: output.dims().to_vec(),
            values: output.to_vec(),
        })
    }

    pub fn close(mut self) -> Result<()> {
        self.bundle.session.close()?;
        Ok(())
    }
}

/// Decode an encoded image into an RGB uint8 batch of one.
pub fn image_tensor(image_bytes: &[u8]) -> Result<Tensor<u8>> {
    let image = image::load_from_memory(image_bytes)
        .context("failed to decode input image")?
        .to_rgb8();
    let (width, height) = image.dimensions();
    let tensor = Tensor::new(&[1, height as u64, width as u64, 3]).with_values(image.as_raw())?;
    Ok(tensor)
}
