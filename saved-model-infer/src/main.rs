use anyhow::Result;
use saved_model_infer::{
    config::{DEFAULT_INPUT_TENSOR, DEFAULT_MODEL_DIR, DEFAULT_OUTPUT_TENSOR, DEFAULT_TAG},
    InferenceSession, SessionConfig, TensorName,
};
use std::{env, path::PathBuf};
use structopt::StructOpt;

#[derive(Debug, Clone, StructOpt)]
/// Run a detection SavedModel on one image
struct Args {
    #[structopt(long, default_value = DEFAULT_MODEL_DIR)]
    /// SavedModel directory
    pub model_dir: PathBuf,
    #[structopt(long, default_value = DEFAULT_INPUT_TENSOR)]
    /// input tensor as op:index
    pub input_tensor: TensorName,
    #[structopt(long, default_value = DEFAULT_OUTPUT_TENSOR)]
    /// output tensor as op:index
    pub output_tensor: TensorName,
    #[structopt(long, default_value = DEFAULT_TAG)]
    /// meta graph tag
    pub tag: String,
    /// input image file
    pub image: PathBuf,
}

impl Args {
    fn into_config(self) -> (SessionConfig, PathBuf) {
        let Args {
            model_dir,
            input_tensor,
            output_tensor,
            tag,
            image,
        } = self;
        let config = SessionConfig {
            model_dir,
            tag,
            input: input_tensor,
            output: output_tensor,
        };
        (config, image)
    }
}

pub fn main() -> Result<()> {
    pretty_env_logger::formatted_builder()
        .parse_filters(&env::var("RUST_LOG").unwrap_or_else(|_| "info".into()))
        .init();

    let (config, image) = Args::from_args().into_config();
    let session = InferenceSession::open(&config)?;
    let output = session.run_file(&image)?;
    print!("{}", output);
    session.close()?;

    Ok(())
}
