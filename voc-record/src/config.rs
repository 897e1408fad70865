//! Conversion configuration and command line arguments.

use crate::{common::*, preprocess::PreprocessOptions};

pub use args::*;
pub use size::*;
pub use split::*;

/// The default resize target.
pub const DEFAULT_RESIZE: PixelSize = PixelSize { w: 960, h: 540 };
/// The default minimum bounding box size.
pub const DEFAULT_MINSIZE: PixelSize = PixelSize { w: 75, h: 75 };

/// The resolved configuration of a conversion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Root directory of the raw dataset.
    pub data_dir: PathBuf,
    /// Directory holding the images. If not set, image paths are derived
    /// from the annotation folder and the annotation file name.
    #[serde(default)]
    pub image_path: Option<PathBuf>,
    /// Output record path, relative to `data_dir`.
    pub output_path: PathBuf,
    /// Label map path, relative to `data_dir`.
    #[serde(default)]
    pub label_map_path: Option<PathBuf>,
    /// The dataset list to convert.
    #[serde(default)]
    pub set: Option<DatasetSet>,
    #[serde(default = "default_split")]
    pub split: SplitRatio,
    #[serde(default = "default_resize")]
    pub resize: PixelSize,
    #[serde(default = "default_minsize")]
    pub minsize: PixelSize,
    #[serde(default)]
    pub grayscale: bool,
    #[serde(default)]
    pub deinterlace: bool,
    /// Optional list of whitelisted labels.
    #[serde(default)]
    pub labels: Option<HashSet<String>>,
    /// Seed of the train/test shuffle.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Config {
    pub fn new(data_dir: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            image_path: None,
            output_path: output_path.into(),
            label_map_path: None,
            set: None,
            split: default_split(),
            resize: DEFAULT_RESIZE,
            minsize: DEFAULT_MINSIZE,
            grayscale: false,
            deinterlace: false,
            labels: None,
            seed: None,
        }
    }

    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let text = fs::read_to_string(path)?;
        let config = json5::from_str(&text)?;
        Ok(config)
    }

    pub fn output_file(&self) -> PathBuf {
        self.data_dir.join(&self.output_path)
    }

    pub fn label_map_file(&self) -> Option<PathBuf> {
        self.label_map_path
            .as_ref()
            .map(|path| self.data_dir.join(path))
    }

    pub fn preprocess_options(&self) -> PreprocessOptions {
        PreprocessOptions {
            target: self.resize,
            deinterlace: self.deinterlace,
            grayscale: self.grayscale,
        }
    }

    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

fn default_split() -> SplitRatio {
    SplitRatio {
        train: r64(0.8),
        test: r64(0.2),
    }
}

fn default_resize() -> PixelSize {
    DEFAULT_RESIZE
}

fn default_minsize() -> PixelSize {
    DEFAULT_MINSIZE
}

/// The dataset list names accepted by `--set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetSet {
    Train,
    Val,
    Trainval,
    Test,
}

impl DatasetSet {
    pub const ALL: [DatasetSet; 4] = [Self::Train, Self::Val, Self::Trainval, Self::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Val => "val",
            Self::Trainval => "trainval",
            Self::Test => "test",
        }
    }

    /// The list file that enumerates the annotation files of this set.
    pub fn list_file_name(&self) -> String {
        format!("{}.txt", self.as_str())
    }
}

impl Display for DatasetSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetSet {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|set| set.as_str() == text)
            .copied()
            .ok_or_else(|| {
                format_err!(
                    "set must be in : [{}], but get '{}'",
                    Self::ALL.iter().join(", "),
                    text
                )
            })
    }
}

mod size {
    use super::*;

    /// Image or box size written as `WxH`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(try_from = "String", into = "String")]
    pub struct PixelSize {
        pub w: u32,
        pub h: u32,
    }

    impl PixelSize {
        pub fn new(w: u32, h: u32) -> Self {
            Self { w, h }
        }

        pub fn to_hw(&self) -> HW<f64> {
            HW::from_hw([self.h as f64, self.w as f64])
        }
    }

    impl Display for PixelSize {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}x{}", self.w, self.h)
        }
    }

    impl FromStr for PixelSize {
        type Err = Error;

        fn from_str(text: &str) -> Result<Self, Self::Err> {
            let (w, h) = text
                .trim()
                .split_once('x')
                .ok_or_else(|| format_err!("expect size in WxH format, but get '{}'", text))?;
            let w: u32 = w
                .trim()
                .parse()
                .with_context(|| format!("invalid width in '{}'", text))?;
            let h: u32 = h
                .trim()
                .parse()
                .with_context(|| format!("invalid height in '{}'", text))?;
            Ok(Self { w, h })
        }
    }

    impl TryFrom<String> for PixelSize {
        type Error = Error;

        fn try_from(text: String) -> Result<Self, Self::Error> {
            text.parse()
        }
    }

    impl From<PixelSize> for String {
        fn from(size: PixelSize) -> Self {
            size.to_string()
        }
    }
}

mod split {
    use super::*;

    /// The fractions of annotation files listed in `train.txt` and `test.txt`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(try_from = "String", into = "String")]
    pub struct SplitRatio {
        pub train: R64,
        pub test: R64,
    }

    impl SplitRatio {
        pub fn new(train: f64, test: f64) -> Result<Self> {
            let train = R64::try_new(train).ok_or_else(|| format_err!("invalid train ratio"))?;
            let test = R64::try_new(test).ok_or_else(|| format_err!("invalid test ratio"))?;
            ensure!(
                (0.0..=1.0).contains(&train.raw()) && (0.0..=1.0).contains(&test.raw()),
                "split ratios must be within [0, 1], but get {} and {}",
                train,
                test
            );
            Ok(Self { train, test })
        }
    }

    impl Display for SplitRatio {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}, {}", self.train, self.test)
        }
    }

    impl FromStr for SplitRatio {
        type Err = Error;

        fn from_str(text: &str) -> Result<Self, Self::Err> {
            let ratios: Vec<f64> = text
                .split(',')
                .map(|item| {
                    item.trim()
                        .parse()
                        .with_context(|| format!("invalid ratio '{}' in '{}'", item, text))
                })
                .try_collect()?;
            match *ratios.as_slice() {
                [train, test] => Self::new(train, test),
                _ => bail!("expect split in 'train, test' format, but get '{}'", text),
            }
        }
    }

    impl TryFrom<String> for SplitRatio {
        type Error = Error;

        fn try_from(text: String) -> Result<Self, Self::Error> {
            text.parse()
        }
    }

    impl From<SplitRatio> for String {
        fn from(ratio: SplitRatio) -> Self {
            ratio.to_string()
        }
    }
}

mod args {
    use super::*;

    #[derive(Debug, Clone, StructOpt)]
    /// Creates TFRecord files from VOC-style annotated data.
    ///
    /// Example: voc-record --data-dir /data --output-path BENTHIC_2017_test.record
    /// --label-map-path benthic_label_map.pbtxt --set test
    pub struct Args {
        #[structopt(long)]
        /// JSON5 configuration file. Command line options override its fields.
        pub config_file: Option<PathBuf>,
        #[structopt(short = "d", long)]
        /// root directory to raw dataset
        pub data_dir: Option<PathBuf>,
        #[structopt(long)]
        /// dataset directory holding the images
        pub image_path: Option<PathBuf>,
        #[structopt(short = "o", long)]
        /// path to output TFRecord, relative to the data directory
        pub output_path: Option<PathBuf>,
        #[structopt(short = "l", long)]
        /// path to label map, relative to the data directory
        pub label_map_path: Option<PathBuf>,
        #[structopt(short = "s", long)]
        /// convert training set, validation set or merged set (train, val, trainval, test)
        pub set: Option<DatasetSet>,
        #[structopt(long)]
        /// train/test split, e.g. "0.8, 0.2"
        pub split: Option<SplitRatio>,
        #[structopt(long)]
        /// resize images to WxH
        pub resize: Option<PixelSize>,
        #[structopt(long)]
        /// minimum size bounding box to include in record, WxH
        pub minsize: Option<PixelSize>,
        #[structopt(long)]
        /// convert images to grayscale
        pub grayscale: bool,
        #[structopt(long)]
        /// deinterlace images that are twice the target size
        pub deinterlace: bool,
        #[structopt(long)]
        /// space separated labels to load, must be in the label map
        pub labels: Option<Vec<String>>,
        #[structopt(long)]
        /// seed of the train/test shuffle
        pub seed: Option<u64>,
    }

    impl Args {
        /// Merge the arguments onto the configuration file, if any.
        pub fn into_config(self) -> Result<Config> {
            let Args {
                config_file,
                data_dir,
                image_path,
                output_path,
                label_map_path,
                set,
                split,
                resize,
                minsize,
                grayscale,
                deinterlace,
                labels,
                seed,
            } = self;

            let mut config = match config_file {
                Some(config_file) => Config::open(&config_file).with_context(|| {
                    format!("failed to load config file '{}'", config_file.display())
                })?,
                None => {
                    let data_dir = data_dir
                        .clone()
                        .ok_or_else(|| format_err!("--data-dir is required"))?;
                    let output_path = output_path
                        .clone()
                        .ok_or_else(|| format_err!("--output-path is required"))?;
                    Config::new(data_dir, output_path)
                }
            };

            if let Some(data_dir) = data_dir {
                config.data_dir = data_dir;
            }
            if let Some(output_path) = output_path {
                config.output_path = output_path;
            }
            if image_path.is_some() {
                config.image_path = image_path;
            }
            if label_map_path.is_some() {
                config.label_map_path = label_map_path;
            }
            if set.is_some() {
                config.set = set;
            }
            if let Some(split) = split {
                config.split = split;
            }
            if let Some(resize) = resize {
                config.resize = resize;
            }
            if let Some(minsize) = minsize {
                config.minsize = minsize;
            }
            if let Some(labels) = labels {
                config.labels = Some(labels.into_iter().collect());
            }
            if seed.is_some() {
                config.seed = seed;
            }
            config.grayscale |= grayscale;
            config.deinterlace |= deinterlace;

            ensure!(
                config.resize.w > 0 && config.resize.h > 0,
                "resize target must be positive, but get {}",
                config.resize
            );

            Ok(config)
        }
    }
}
