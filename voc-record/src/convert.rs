//! The conversion driver writing all records of a dataset into one file.

use crate::{
    annotation::Annotation,
    common::*,
    config::{Config, DatasetSet},
    label_map::LabelMap,
    preprocess::prepare_image,
    record::{BuiltRecord, ImageRecord, RecordBuilder},
    split::{list_files, read_list, split_dataset},
};
use prettytable::{cell, row, Table};

const PROGRESS_INTERVAL: usize = 10;

/// The stage at which an item failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The annotation file cannot be read or parsed.
    Annotation(String),
    /// The image cannot be located, read or resized.
    Image(String),
    /// The record cannot be assembled from the annotation and the image.
    Record(String),
    /// The record cannot be written to the output file.
    Write(String),
}

impl SkipReason {
    fn annotation(err: Error) -> Self {
        Self::Annotation(format!("{:#}", err))
    }

    fn image(err: Error) -> Self {
        Self::Image(format!("{:#}", err))
    }

    fn record(err: Error) -> Self {
        Self::Record(format!("{:#}", err))
    }
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Annotation(msg) => write!(f, "bad annotation: {}", msg),
            Self::Image(msg) => write!(f, "bad image: {}", msg),
            Self::Record(msg) => write!(f, "bad record: {}", msg),
            Self::Write(msg) => write!(f, "write failure: {}", msg),
        }
    }
}

/// The result of converting one annotation or image file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Written {
        source: PathBuf,
        filename: String,
        boxes: usize,
    },
    Skipped {
        source: PathBuf,
        reason: SkipReason,
    },
}

impl ItemOutcome {
    pub fn source(&self) -> &Path {
        match self {
            Self::Written { source, .. } | Self::Skipped { source, .. } => source,
        }
    }

    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written { .. })
    }
}

/// Summary of a conversion run.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionReport {
    pub output_file: PathBuf,
    /// The converted dataset list, or `None` for a directory of images.
    pub set: Option<DatasetSet>,
    pub outcomes: Vec<ItemOutcome>,
    /// Box counts per label map class, in label map order.
    pub class_totals: IndexMap<String, usize>,
    /// Element-wise mean of the per-image channel means. Empty if no image is written.
    pub mean: Vec<f64>,
}

impl ConversionReport {
    pub fn processed(&self) -> usize {
        self.outcomes.len()
    }

    pub fn written(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.is_written()).count()
    }

    pub fn skipped(&self) -> usize {
        self.processed() - self.written()
    }

    /// The mean image scaled to `[0, 1]`.
    pub fn scaled_mean(&self) -> Vec<f64> {
        self.mean.iter().map(|value| value / 255.0).collect()
    }

    pub fn print_summary(&self) {
        info!(
            "wrote {} of {} items to {}",
            self.written(),
            self.processed(),
            self.output_file.display()
        );
        if self.skipped() > 0 {
            warn!("{} items were skipped", self.skipped());
        }
        info!("image mean {:?}", self.mean);
        info!("image mean / 255 {:?}", self.scaled_mean());

        if !self.class_totals.is_empty() {
            let mut table = Table::new();
            table.add_row(row!["class", "boxes"]);
            self.class_totals.iter().for_each(|(name, count)| {
                table.add_row(row![name, count]);
            });
            table.printstd();
        }
    }
}

/// Convert the dataset described by `config`.
///
/// Annotated items are converted when both a label map and a set are
/// configured, otherwise every PNG image in the data directory is stored
/// without boxes. Failing items are skipped and reported.
pub fn run(config: &Config) -> Result<ConversionReport> {
    let label_map = config
        .label_map_file()
        .map(LabelMap::open)
        .transpose()?;

    let output_file = config.output_file();
    if let Some(dir) = output_file.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create directory '{}'", dir.display()))?;
    }
    let mut writer = ExampleWriter::create(&output_file)
        .with_context(|| format!("failed to create '{}'", output_file.display()))?;

    let mut converter = Converter {
        class_totals: label_map
            .iter()
            .flat_map(|label_map| label_map.names())
            .map(|name| (name.to_owned(), 0))
            .collect(),
        outcomes: vec![],
        means: vec![],
    };

    let set = match (label_map, config.set) {
        (Some(label_map), Some(set)) => {
            converter.convert_annotated(config, set, label_map, &mut writer)?;
            Some(set)
        }
        (_, set) => {
            if set.is_some() {
                warn!("no label map is given, the set option is ignored");
            }
            converter.convert_images(config, &mut writer)?;
            None
        }
    };

    writer
        .flush()
        .with_context(|| format!("failed to flush '{}'", output_file.display()))?;

    let Converter {
        outcomes,
        class_totals,
        means,
    } = converter;

    Ok(ConversionReport {
        output_file,
        set,
        outcomes,
        class_totals,
        mean: mean_of_means(&means),
    })
}

struct Converter {
    outcomes: Vec<ItemOutcome>,
    class_totals: IndexMap<String, usize>,
    means: Vec<Vec<f64>>,
}

impl Converter {
    fn convert_annotated<W>(
        &mut self,
        config: &Config,
        set: DatasetSet,
        label_map: LabelMap,
        writer: &mut ExampleWriter<W>,
    ) -> Result<()>
    where
        W: Write,
    {
        let list_file = config.data_dir.join(set.list_file_name());
        if !list_file.exists() {
            info!(
                "{} not found, splitting {}",
                list_file.display(),
                config.data_dir.display()
            );
            let summary = split_dataset(
                &config.data_dir,
                &label_map.name_set(),
                &config.split,
                &mut config.rng(),
            )?;
            info!(
                "split {} annotations into {} train and {} test items",
                summary.candidates,
                summary.train.len(),
                summary.test.len()
            );
        }
        let xml_paths = read_list(&list_file)?;

        if let Some(labels) = &config.labels {
            labels
                .iter()
                .filter(|name| !label_map.contains(name))
                .for_each(|name| warn!("allowed label '{}' is not in the label map", name));
        }

        let builder = RecordBuilder::new(config, label_map);
        let total = xml_paths.len();

        for (index, xml_path) in xml_paths.iter().enumerate() {
            if index % PROGRESS_INTERVAL == 0 {
                info!("processing image {} of {}", index, total);
            }
            let xml_path = config.data_dir.join(xml_path);

            let result = build_annotated(&builder, &xml_path).and_then(|built| {
                let BuiltRecord {
                    record,
                    class_counts,
                    mean,
                    ..
                } = built;
                write_record(&mut *writer, &record)?;

                class_counts.into_iter().for_each(|(name, count)| {
                    *self.class_totals.entry(name).or_insert(0) += count;
                });
                self.means.push(mean);
                Ok(record)
            });
            self.push(xml_path, result);
        }

        Ok(())
    }

    fn convert_images<W>(&mut self, config: &Config, writer: &mut ExampleWriter<W>) -> Result<()>
    where
        W: Write,
    {
        let image_paths = list_files(&config.data_dir, "png")?;
        let total = image_paths.len();
        let options = config.preprocess_options();

        for (index, image_path) in image_paths.into_iter().enumerate() {
            if index % PROGRESS_INTERVAL == 0 {
                info!("processing image {} of {}", index, total);
            }

            let result = prepare_image(&image_path, &options)
                .map_err(SkipReason::image)
                .and_then(|prepared| {
                    let mean = prepared.mean.clone();
                    let record =
                        ImageRecord::from_image(&image_path, prepared).map_err(SkipReason::record)?;
                    write_record(&mut *writer, &record)?;
                    self.means.push(mean);
                    Ok(record)
                });
            self.push(image_path, result);
        }

        Ok(())
    }

    fn push(&mut self, source: PathBuf, result: Result<ImageRecord, SkipReason>) {
        let outcome = match result {
            Ok(record) => ItemOutcome::Written {
                source,
                filename: record.filename,
                boxes: record.boxes.len(),
            },
            Err(reason) => {
                warn!("skip {}: {}", source.display(), reason);
                ItemOutcome::Skipped { source, reason }
            }
        };
        self.outcomes.push(outcome);
    }
}

fn build_annotated(builder: &RecordBuilder, xml_path: &Path) -> Result<BuiltRecord, SkipReason> {
    let annotation = Annotation::open(xml_path).map_err(SkipReason::annotation)?;
    let resolved = builder
        .resolve_image(xml_path, &annotation)
        .map_err(SkipReason::image)?;
    let prepared = prepare_image(&resolved.path, &builder.preprocess).map_err(SkipReason::image)?;
    builder
        .assemble(&annotation, resolved.filename, prepared)
        .map_err(SkipReason::record)
}

fn write_record<W>(writer: &mut ExampleWriter<W>, record: &ImageRecord) -> Result<(), SkipReason>
where
    W: Write,
{
    writer
        .send(record.to_example())
        .map_err(|err| SkipReason::Write(err.to_string()))
}

/// Element-wise mean. Empty input gives an empty mean.
fn mean_of_means(means: &[Vec<f64>]) -> Vec<f64> {
    let num_channels = match means.first() {
        Some(first) => first.len(),
        None => return vec![],
    };
    let count = means.len() as f64;

    (0..num_channels)
        .map(|channel| {
            means
                .iter()
                .map(|mean| mean.get(channel).copied().unwrap_or(0.0))
                .sum::<f64>()
                / count
        })
        .collect()
}
