//! Building and (de)serializing per-image detection records.

use crate::{
    annotation::Annotation,
    common::*,
    config::{Config, PixelSize},
    label_map::LabelMap,
    preprocess::{prepare_image, PreparedImage, PreprocessOptions},
};

pub use keys::*;
pub use record_builder::*;

pub mod keys {
    pub const HEIGHT: &str = "image/height";
    pub const WIDTH: &str = "image/width";
    pub const FILENAME: &str = "image/filename";
    pub const SOURCE_ID: &str = "image/source_id";
    pub const SHA256: &str = "image/key/sha256";
    pub const ENCODED: &str = "image/encoded";
    pub const FORMAT: &str = "image/format";
    pub const BBOX_XMIN: &str = "image/object/bbox/xmin";
    pub const BBOX_XMAX: &str = "image/object/bbox/xmax";
    pub const BBOX_YMIN: &str = "image/object/bbox/ymin";
    pub const BBOX_YMAX: &str = "image/object/bbox/ymax";
    pub const CLASS_TEXT: &str = "image/object/class/text";
    pub const CLASS_LABEL: &str = "image/object/class/label";

    pub const PNG_FORMAT: &str = "png";
}

/// A box with coordinates relative to the image size.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
    pub class_text: String,
}

/// One image and its boxes as stored in the record file.
///
/// `labels` only holds ids of boxes whose class is in the label map,
/// so it can be shorter than `boxes`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub width: u32,
    pub height: u32,
    pub filename: String,
    pub sha256: String,
    pub encoded: Vec<u8>,
    pub boxes: Vec<RecordBox>,
    pub labels: Vec<i64>,
}

impl ImageRecord {
    /// A record without boxes, named after the image file.
    pub fn from_image(path: &Path, prepared: PreparedImage) -> Result<Self> {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| format_err!("invalid image file name '{}'", path.display()))?
            .to_owned();
        let PreparedImage {
            encoded,
            sha256,
            width,
            height,
            ..
        } = prepared;

        Ok(Self {
            width,
            height,
            filename,
            sha256,
            encoded,
            boxes: vec![],
            labels: vec![],
        })
    }

    pub fn to_example(&self) -> Example {
        let Self {
            width,
            height,
            ref filename,
            ref sha256,
            ref encoded,
            ref boxes,
            ref labels,
        } = *self;

        let floats = |f: fn(&RecordBox) -> f32| Feature::from_f32_iter(boxes.iter().map(f));

        let feature: HashMap<String, Feature> = vec![
            (HEIGHT, Feature::from_i64_iter(vec![height as i64])),
            (WIDTH, Feature::from_i64_iter(vec![width as i64])),
            (FILENAME, bytes_feature(filename)),
            (SOURCE_ID, bytes_feature(filename)),
            (SHA256, bytes_feature(sha256)),
            (ENCODED, Feature::from_bytes_iter(vec![encoded.clone()])),
            (FORMAT, bytes_feature(PNG_FORMAT)),
            (BBOX_XMIN, floats(|b: &RecordBox| b.xmin)),
            (BBOX_XMAX, floats(|b: &RecordBox| b.xmax)),
            (BBOX_YMIN, floats(|b: &RecordBox| b.ymin)),
            (BBOX_YMAX, floats(|b: &RecordBox| b.ymax)),
            (
                CLASS_TEXT,
                Feature::from_bytes_iter(
                    boxes
                        .iter()
                        .map(|b| b.class_text.as_bytes().to_vec())
                        .collect::<Vec<_>>(),
                ),
            ),
            (CLASS_LABEL, Feature::from_i64_iter(labels.clone())),
        ]
        .into_iter()
        .map(|(key, feature)| (key.to_owned(), feature))
        .collect();

        Example {
            features: Some(Features { feature }),
        }
    }

    pub fn from_example(example: &Example) -> Result<Self> {
        let height = single(int64_list(example, HEIGHT)?.iter().copied(), HEIGHT)?;
        let width = single(int64_list(example, WIDTH)?.iter().copied(), WIDTH)?;
        let filename = single(string_list(example, FILENAME)?, FILENAME)?;
        let sha256 = single(string_list(example, SHA256)?, SHA256)?;
        let encoded = single(bytes_list(example, ENCODED)?.to_vec(), ENCODED)?;
        let format = single(string_list(example, FORMAT)?, FORMAT)?;
        ensure!(
            format == PNG_FORMAT,
            "expect image format '{}', but get '{}'",
            PNG_FORMAT,
            format
        );

        let xmin = float_list(example, BBOX_XMIN)?;
        let xmax = float_list(example, BBOX_XMAX)?;
        let ymin = float_list(example, BBOX_YMIN)?;
        let ymax = float_list(example, BBOX_YMAX)?;
        let texts = string_list(example, CLASS_TEXT)?;
        let num_boxes = texts.len();
        ensure!(
            [xmin.len(), xmax.len(), ymin.len(), ymax.len()]
                .iter()
                .all(|&len| len == num_boxes),
            "inconsistent number of box coordinates and class texts"
        );

        let boxes = izip!(xmin, xmax, ymin, ymax, texts)
            .map(|(&xmin, &xmax, &ymin, &ymax, class_text)| RecordBox {
                xmin,
                ymin,
                xmax,
                ymax,
                class_text,
            })
            .collect();
        let labels = int64_list(example, CLASS_LABEL)?.to_vec();

        Ok(Self {
            width: u32::try_from(width)?,
            height: u32::try_from(height)?,
            filename,
            sha256,
            encoded,
            boxes,
            labels,
        })
    }
}

fn bytes_feature(text: &str) -> Feature {
    Feature::from_bytes_iter(vec![text.as_bytes().to_vec()])
}

/// The value of a feature. A feature without value reads as `None`.
fn feature_kind<'a>(example: &'a Example, key: &str) -> Result<Option<&'a FeatureKind>> {
    let feature = example
        .features
        .as_ref()
        .and_then(|features| features.feature.get(key))
        .ok_or_else(|| format_err!("feature '{}' is missing", key))?;
    Ok(feature.kind.as_ref())
}

fn bytes_list<'a>(example: &'a Example, key: &str) -> Result<&'a [Vec<u8>]> {
    match feature_kind(example, key)? {
        Some(FeatureKind::BytesList(list)) => Ok(&list.value),
        None => Ok(&[]),
        _ => bail!("feature '{}' is not a bytes list", key),
    }
}

fn string_list(example: &Example, key: &str) -> Result<Vec<String>> {
    bytes_list(example, key)?
        .iter()
        .map(|bytes| {
            String::from_utf8(bytes.clone())
                .with_context(|| format!("feature '{}' is not valid UTF-8", key))
        })
        .try_collect()
}

fn float_list<'a>(example: &'a Example, key: &str) -> Result<&'a [f32]> {
    match feature_kind(example, key)? {
        Some(FeatureKind::FloatList(list)) => Ok(&list.value),
        None => Ok(&[]),
        _ => bail!("feature '{}' is not a float list", key),
    }
}

fn int64_list<'a>(example: &'a Example, key: &str) -> Result<&'a [i64]> {
    match feature_kind(example, key)? {
        Some(FeatureKind::Int64List(list)) => Ok(&list.value),
        None => Ok(&[]),
        _ => bail!("feature '{}' is not an int64 list", key),
    }
}

fn single<T, L>(list: L, key: &str) -> Result<T>
where
    L: IntoIterator<Item = T>,
{
    let mut iter = list.into_iter();
    match (iter.next(), iter.next()) {
        (Some(value), None) => Ok(value),
        _ => bail!("feature '{}' must have exactly one value", key),
    }
}

mod record_builder {
    use super::*;

    /// Where images of annotated items are looked up.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ImageSource {
        /// Images are stored in this directory under the annotated file name.
        Dir(PathBuf),
        /// Images are stored at `<prefix>/<folder>/<stem>.png`, where `prefix` is the
        /// annotation path before the annotated folder name.
        LegacyFolder,
    }

    /// The image file of an annotated item and its name in the record.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ResolvedImage {
        pub path: PathBuf,
        pub filename: String,
    }

    impl ImageSource {
        pub fn resolve(&self, xml_path: &Path, annotation: &Annotation) -> Result<ResolvedImage> {
            match self {
                Self::Dir(dir) => Ok(ResolvedImage {
                    path: dir.join(&annotation.filename),
                    filename: annotation.filename.clone(),
                }),
                Self::LegacyFolder => {
                    let folder = annotation.folder.as_str();
                    ensure!(
                        !folder.is_empty(),
                        "annotation '{}' has no folder to locate its image",
                        xml_path.display()
                    );

                    let file_name = xml_path
                        .file_name()
                        .and_then(|name| name.to_str())
                        .ok_or_else(|| {
                            format_err!("invalid annotation path '{}'", xml_path.display())
                        })?;
                    let root = file_name.split('.').next().unwrap_or(file_name);

                    let path_text = xml_path
                        .to_str()
                        .ok_or_else(|| format_err!("non UTF-8 path '{}'", xml_path.display()))?;
                    let prefix = match path_text.find(folder) {
                        Some(index) => &path_text[..index],
                        None => path_text,
                    };

                    let filename = format!("{}/{}.png", folder, root);
                    Ok(ResolvedImage {
                        path: Path::new(prefix).join(&filename),
                        filename,
                    })
                }
            }
        }
    }

    /// Why an annotated object is not fully represented in a record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum ExclusionKind {
        /// Absent from the label allow-list. The box is dropped.
        NotAllowed,
        /// Smaller than the minimum size in both axes. The box is dropped.
        TooSmall,
        /// Absent from the label map. The box and class text are kept without a numeric label.
        UnknownLabel,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Exclusion {
        /// Index of the object in the annotation.
        pub object: usize,
        pub name: String,
        pub kind: ExclusionKind,
    }

    /// A record together with the statistics of its image.
    #[derive(Debug, Clone, PartialEq)]
    pub struct BuiltRecord {
        pub record: ImageRecord,
        /// Box counts per label map class, in label map order.
        pub class_counts: IndexMap<String, usize>,
        pub mean: Vec<f64>,
        pub exclusions: Vec<Exclusion>,
    }

    /// Turns annotations into records.
    #[derive(Debug, Clone)]
    pub struct RecordBuilder {
        pub image_source: ImageSource,
        pub label_map: LabelMap,
        pub allowed_labels: Option<HashSet<String>>,
        /// Minimum box size in source pixels.
        pub min_size: PixelSize,
        pub preprocess: PreprocessOptions,
    }

    impl RecordBuilder {
        pub fn new(config: &Config, label_map: LabelMap) -> Self {
            let image_source = match &config.image_path {
                Some(dir) => ImageSource::Dir(dir.clone()),
                None => ImageSource::LegacyFolder,
            };

            Self {
                image_source,
                label_map,
                allowed_labels: config.labels.clone(),
                min_size: config.minsize,
                preprocess: config.preprocess_options(),
            }
        }

        pub fn resolve_image(
            &self,
            xml_path: &Path,
            annotation: &Annotation,
        ) -> Result<ResolvedImage> {
            self.image_source.resolve(xml_path, annotation)
        }

        /// Resolve, load and assemble in one step.
        pub fn build(&self, xml_path: &Path, annotation: &Annotation) -> Result<BuiltRecord> {
            let ResolvedImage { path, filename } = self.resolve_image(xml_path, annotation)?;
            let prepared = prepare_image(&path, &self.preprocess)?;
            self.assemble(annotation, filename, prepared)
        }

        /// Attach the annotated boxes to a prepared image.
        pub fn assemble(
            &self,
            annotation: &Annotation,
            filename: String,
            prepared: PreparedImage,
        ) -> Result<BuiltRecord> {
            prepared.ensure_png()?;

            let source_size = annotation.size.to_hw()?;
            let target_size = self.preprocess.target.to_hw();
            let transform = Transform::try_from_sizes_exact(&source_size, &target_size)
                .with_context(|| {
                    format!(
                        "invalid image size {}x{} in annotation",
                        annotation.size.width, annotation.size.height
                    )
                })?;

            let min_w = self.min_size.w as f64;
            let min_h = self.min_size.h as f64;
            let mut class_counts: IndexMap<String, usize> = self
                .label_map
                .names()
                .map(|name| (name.to_owned(), 0))
                .collect();
            let mut boxes = vec![];
            let mut labels = vec![];
            let mut exclusions = vec![];

            for (index, object) in annotation.objects.iter().enumerate() {
                let name = &object.name;
                let exclude = |kind| Exclusion {
                    object: index,
                    name: name.clone(),
                    kind,
                };

                if let Some(allowed) = &self.allowed_labels {
                    if !allowed.contains(name) {
                        debug!("excluding {} not in allowed labels", name);
                        exclusions.push(exclude(ExclusionKind::NotAllowed));
                        continue;
                    }
                }

                let tlbr = object.bndbox.to_tlbr();
                let extent = tlbr.abs_hw();
                if extent.w() < min_w && extent.h() < min_h {
                    info!(
                        "excluding {} {}x{} smaller than {}",
                        name,
                        extent.w(),
                        extent.h(),
                        self.min_size
                    );
                    exclusions.push(exclude(ExclusionKind::TooSmall));
                    continue;
                }

                // scaled to target pixels, then relative to the target size
                let [ymin, xmin, ymax, xmax] = (&transform * &tlbr).normalize_by(&target_size).tlbr();
                boxes.push(RecordBox {
                    xmin: xmin as f32,
                    ymin: ymin as f32,
                    xmax: xmax as f32,
                    ymax: ymax as f32,
                    class_text: name.clone(),
                });

                match self.label_map.get(name) {
                    Some(id) => {
                        labels.push(id);
                        if let Some(count) = class_counts.get_mut(name) {
                            *count += 1;
                        }
                    }
                    None => {
                        warn!("{} not in label map, the box is kept without label", name);
                        exclusions.push(exclude(ExclusionKind::UnknownLabel));
                    }
                }
            }

            let PreparedImage {
                encoded,
                sha256,
                mean,
                width,
                height,
            } = prepared;
            let record = ImageRecord {
                width,
                height,
                filename,
                sha256,
                encoded,
                boxes,
                labels,
            };

            Ok(BuiltRecord {
                record,
                class_counts,
                mean,
                exclusions,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::encode_png;
    use approx::assert_abs_diff_eq;
    use image::Rgb;

    const ANNOTATION: &str = r#"<annotation>
  <folder>D0232_03HD</folder>
  <filename>frame.png</filename>
  <size><width>200</width><height>100</height></size>
  <object>
    <name>Rathbunaster</name>
    <bndbox><xmin>20</xmin><ymin>10</ymin><xmax>100</xmax><ymax>60</ymax></bndbox>
  </object>
  <object>
    <name>Rathbunaster</name>
    <bndbox><xmin>0</xmin><ymin>0</ymin><xmax>5</xmax><ymax>5</ymax></bndbox>
  </object>
  <object>
    <name>Umbellula</name>
    <bndbox><xmin>150</xmin><ymin>0</ymin><xmax>155</xmax><ymax>80</ymax></bndbox>
  </object>
  <object>
    <name>Fish</name>
    <bndbox><xmin>0</xmin><ymin>50</ymin><xmax>200</xmax><ymax>100</ymax></bndbox>
  </object>
</annotation>"#;

    fn builder(allowed: Option<&[&str]>) -> RecordBuilder {
        RecordBuilder {
            image_source: ImageSource::LegacyFolder,
            label_map: LabelMap::from_class_list("Rathbunaster\nUmbellula\n").unwrap(),
            allowed_labels: allowed.map(|names| names.iter().map(|&name| name.to_owned()).collect()),
            min_size: PixelSize::new(10, 10),
            preprocess: PreprocessOptions {
                target: PixelSize::new(100, 50),
                deinterlace: false,
                grayscale: false,
            },
        }
    }

    fn prepared() -> PreparedImage {
        let image = RgbImage::from_pixel(100, 50, Rgb([10, 20, 30]));
        encode_png(&DynamicImage::ImageRgb8(image)).unwrap()
    }

    #[test]
    fn resolve_image_dir() -> Result<()> {
        let annotation = Annotation::parse(ANNOTATION)?;
        let source = ImageSource::Dir(PathBuf::from("/data/images"));
        let resolved = source.resolve(Path::new("/data/xml/frame.xml"), &annotation)?;
        assert_eq!(resolved.path, Path::new("/data/images/frame.png"));
        assert_eq!(resolved.filename, "frame.png");
        Ok(())
    }

    #[test]
    fn resolve_legacy_folder() -> Result<()> {
        let mut annotation = Annotation::parse(ANNOTATION)?;
        let xml_path = Path::new("/data/D0232_03HD/D0232_03HD_00-02-30.xml");
        let resolved = ImageSource::LegacyFolder.resolve(xml_path, &annotation)?;
        assert_eq!(resolved.filename, "D0232_03HD/D0232_03HD_00-02-30.png");
        assert_eq!(
            resolved.path,
            Path::new("/data/D0232_03HD/D0232_03HD_00-02-30.png")
        );

        annotation.folder = String::new();
        assert!(ImageSource::LegacyFolder.resolve(xml_path, &annotation).is_err());
        Ok(())
    }

    #[test]
    fn assemble_filters_and_normalizes() -> Result<()> {
        let annotation = Annotation::parse(ANNOTATION)?;
        let built = builder(None).assemble(&annotation, "frame.png".into(), prepared())?;
        let record = &built.record;

        // the 5x5 box is dropped, the 5x80 box is kept
        let texts: Vec<_> = record.boxes.iter().map(|b| b.class_text.as_str()).collect();
        assert_eq!(texts, ["Rathbunaster", "Umbellula", "Fish"]);
        assert_eq!(record.labels, [1, 2]);
        assert_eq!(built.class_counts["Rathbunaster"], 1);
        assert_eq!(built.class_counts["Umbellula"], 1);
        assert!(!built.class_counts.contains_key("Fish"));

        let kinds: Vec<_> = built.exclusions.iter().map(|ex| (ex.object, ex.kind)).collect();
        assert_eq!(
            kinds,
            [(1, ExclusionKind::TooSmall), (3, ExclusionKind::UnknownLabel)]
        );

        let first = &record.boxes[0];
        assert_abs_diff_eq!(first.xmin, 0.1);
        assert_abs_diff_eq!(first.ymin, 0.1);
        assert_abs_diff_eq!(first.xmax, 0.5);
        assert_abs_diff_eq!(first.ymax, 0.6);

        assert_eq!((record.width, record.height), (100, 50));
        assert_eq!(built.mean.len(), 3);
        assert_abs_diff_eq!(built.mean[2], 30.0);
        Ok(())
    }

    #[test]
    fn assemble_min_size_boundary() -> Result<()> {
        let xml = r#"<annotation>
  <filename>frame.png</filename>
  <size><width>200</width><height>100</height></size>
  <object>
    <name>Rathbunaster</name>
    <bndbox><xmin>0</xmin><ymin>0</ymin><xmax>10</xmax><ymax>5</ymax></bndbox>
  </object>
  <object>
    <name>Rathbunaster</name>
    <bndbox><xmin>20</xmin><ymin>20</ymin><xmax>29</xmax><ymax>29</ymax></bndbox>
  </object>
  <object>
    <name>Umbellula</name>
    <bndbox><xmin>40</xmin><ymin>40</ymin><xmax>49</xmax><ymax>50</ymax></bndbox>
  </object>
</annotation>"#;
        let annotation = Annotation::parse(xml)?;
        let built = builder(None).assemble(&annotation, "frame.png".into(), prepared())?;

        // 10x5 and 9x10 reach the minimum in one axis, 9x9 in none
        assert_eq!(built.record.boxes.len(), 2);
        assert_eq!(built.record.labels, [1, 2]);
        let kinds: Vec<_> = built.exclusions.iter().map(|ex| (ex.object, ex.kind)).collect();
        assert_eq!(kinds, [(1, ExclusionKind::TooSmall)]);
        Ok(())
    }

    #[test]
    fn assemble_with_allow_list() -> Result<()> {
        let annotation = Annotation::parse(ANNOTATION)?;
        let built =
            builder(Some(&["Umbellula"])).assemble(&annotation, "frame.png".into(), prepared())?;

        assert_eq!(built.record.boxes.len(), 1);
        assert_eq!(built.record.labels, [2]);
        assert_eq!(built.class_counts["Rathbunaster"], 0);
        assert_eq!(
            built
                .exclusions
                .iter()
                .filter(|ex| ex.kind == ExclusionKind::NotAllowed)
                .count(),
            3
        );
        Ok(())
    }

    #[test]
    fn assemble_rejects_empty_source_size() -> Result<()> {
        let mut annotation = Annotation::parse(ANNOTATION)?;
        annotation.size.width = 0;
        assert!(builder(None)
            .assemble(&annotation, "frame.png".into(), prepared())
            .is_err());
        Ok(())
    }

    #[test]
    fn assemble_rejects_non_png() -> Result<()> {
        let annotation = Annotation::parse(ANNOTATION)?;
        let mut image = prepared();
        image.encoded = b"GIF89a not a png".to_vec();
        assert!(builder(None)
            .assemble(&annotation, "frame.png".into(), image)
            .is_err());
        Ok(())
    }

    #[test]
    fn example_round_trip_through_file() -> Result<()> {
        let annotation = Annotation::parse(ANNOTATION)?;
        let built = builder(None).assemble(&annotation, "frame.png".into(), prepared())?;

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("frame.record");
        {
            let mut writer = ExampleWriter::create(&path)?;
            writer.send(built.record.to_example())?;
            writer.flush()?;
        }

        let examples: Vec<Example> =
            ExampleIter::open(&path, RecordReaderConfig::default())?.try_collect()?;
        assert_eq!(examples.len(), 1);

        let decoded = ImageRecord::from_example(&examples[0])?;
        assert_eq!(decoded, built.record);
        assert_eq!(
            string_list(&examples[0], SOURCE_ID)?,
            [built.record.filename.clone()]
        );
        Ok(())
    }

    #[test]
    fn image_only_record() -> Result<()> {
        let record = ImageRecord::from_image(Path::new("/data/a/frame_01.png"), prepared())?;
        assert_eq!(record.filename, "frame_01.png");
        assert!(record.boxes.is_empty() && record.labels.is_empty());

        let example = record.to_example();
        assert_eq!(float_list(&example, BBOX_XMIN)?.len(), 0);
        assert_eq!(ImageRecord::from_example(&example)?, record);
        Ok(())
    }
}
