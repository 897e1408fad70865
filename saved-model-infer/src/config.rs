//! Model location and tensor names.

use crate::common::*;

pub const DEFAULT_MODEL_DIR: &str = "../saved_model/";
pub const DEFAULT_INPUT_TENSOR: &str = "Placeholder:0";
pub const DEFAULT_OUTPUT_TENSOR: &str = "map_1/TensorArrayStack/TensorArrayGatherV3:0";
pub const DEFAULT_TAG: &str = "serve";

/// Files a SavedModel directory must contain, relative to the directory.
pub const MODEL_FILES: [&str; 3] = [
    "saved_model.pb",
    "variables/variables.index",
    "variables/variables.data-00000-of-00001",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub model_dir: PathBuf,
    pub tag: String,
    pub input: TensorName,
    pub output: TensorName,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
            tag: DEFAULT_TAG.to_owned(),
            input: TensorName::new("Placeholder", 0),
            output: TensorName::new("map_1/TensorArrayStack/TensorArrayGatherV3", 0),
        }
    }
}

/// Verify that `dir` holds a SavedModel graph with its variables.
pub fn check_model_dir(dir: &Path) -> Result<()> {
    ensure!(
        dir.is_dir(),
        "model directory '{}' does not exist",
        dir.display()
    );

    let missing: Vec<_> = MODEL_FILES
        .iter()
        .map(|file| dir.join(file))
        .filter(|path| !path.is_file())
        .collect();
    ensure!(
        missing.is_empty(),
        "invalid model directory '{}', missing {}",
        dir.display(),
        missing.iter().map(|path| path.display()).join(", ")
    );

    Ok(())
}

/// A graph tensor written as `op:index`. The index defaults to 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorName {
    pub op: String,
    pub index: c_int,
}

impl TensorName {
    pub fn new(op: impl Into<String>, index: c_int) -> Self {
        Self {
            op: op.into(),
            index,
        }
    }
}

impl Display for TensorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.op, self.index)
    }
}

impl FromStr for TensorName {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let (op, index) = match text.rsplit_once(':') {
            Some((op, index)) => {
                let index: c_int = index
                    .parse()
                    .with_context(|| format!("invalid tensor index in '{}'", text))?;
                ensure!(index >= 0, "tensor index must be non-negative in '{}'", text);
                (op, index)
            }
            None => (text, 0),
        };
        ensure!(!op.is_empty(), "empty operation name in '{}'", text);
        Ok(Self::new(op, index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tensor_name() -> Result<()> {
        assert_eq!(
            "Placeholder:0".parse::<TensorName>()?,
            TensorName::new("Placeholder", 0)
        );
        assert_eq!(
            "map_1/TensorArrayStack/TensorArrayGatherV3:2".parse::<TensorName>()?,
            TensorName::new("map_1/TensorArrayStack/TensorArrayGatherV3", 2)
        );
        assert_eq!("logits".parse::<TensorName>()?, TensorName::new("logits", 0));
        assert!("logits:x".parse::<TensorName>().is_err());
        assert!("logits:-1".parse::<TensorName>().is_err());
        assert!(":0".parse::<TensorName>().is_err());
        Ok(())
    }

    #[test]
    fn default_names_round_trip() -> Result<()> {
        let config = SessionConfig::default();
        assert_eq!(config.input, DEFAULT_INPUT_TENSOR.parse()?);
        assert_eq!(config.output, DEFAULT_OUTPUT_TENSOR.parse()?);
        assert_eq!(config.output.to_string(), DEFAULT_OUTPUT_TENSOR);
        Ok(())
    }

    #[test]
    fn check_layout() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(check_model_dir(&dir.path().join("absent")).is_err());
        assert!(check_model_dir(dir.path()).is_err());

        fs::create_dir(dir.path().join("variables"))?;
        for file in MODEL_FILES {
            fs::write(dir.path().join(file), b"")?;
        }
        check_model_dir(dir.path())?;

        fs::remove_file(dir.path().join("variables/variables.index"))?;
        let err = check_model_dir(dir.path()).unwrap_err();
        assert!(format!("{}", err).contains("variables.index"));
        Ok(())
    }
}
