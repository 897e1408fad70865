use anyhow::Result;
use approx::assert_abs_diff_eq;
use image::{Rgb, RgbImage};
use itertools::Itertools;
use std::{fs, path::Path};
use tfrecord::{Example, ExampleIter, RecordReaderConfig};
use voc_record::{
    config::{Config, DatasetSet, PixelSize, SplitRatio},
    ImageRecord, ItemOutcome, SkipReason,
};

const LABEL_MAP: &str = r#"
item {
  id: 1
  name: 'Umbellula'
}
"#;

fn write_annotation(dir: &Path, stem: &str) -> Result<()> {
    let xml = format!(
        r#"<annotation>
  <folder>images</folder>
  <filename>{stem}.png</filename>
  <size><width>200</width><height>100</height><depth>3</depth></size>
  <object>
    <name>Umbellula</name>
    <bndbox><xmin>20</xmin><ymin>10</ymin><xmax>70</xmax><ymax>60</ymax></bndbox>
  </object>
  <object>
    <name>Umbellula</name>
    <bndbox><xmin>100</xmin><ymin>50</ymin><xmax>105</xmax><ymax>55</ymax></bndbox>
  </object>
</annotation>"#
    );
    fs::write(dir.join(format!("{}.xml", stem)), xml)?;
    Ok(())
}

fn write_image(path: &Path, width: u32, height: u32) -> Result<()> {
    RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]))
        .save(path)?;
    Ok(())
}

fn annotated_config(data_dir: &Path) -> Result<Config> {
    let mut config = Config::new(data_dir, "out/umbellula_test.record");
    config.image_path = Some(data_dir.join("images"));
    config.label_map_path = Some("label_map.pbtxt".into());
    config.set = Some(DatasetSet::Test);
    config.split = SplitRatio::new(0.0, 1.0)?;
    config.resize = PixelSize::new(100, 50);
    config.minsize = PixelSize::new(10, 10);
    config.labels = Some(["Umbellula".to_owned()].into_iter().collect());
    config.seed = Some(3);
    Ok(config)
}

fn read_records(path: &Path) -> Result<Vec<ImageRecord>> {
    let examples: Vec<Example> =
        ExampleIter::open(path, RecordReaderConfig::default())?.try_collect()?;
    examples.iter().map(ImageRecord::from_example).collect()
}

#[test]
fn convert_annotated_set() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let data_dir = dir.path();
    fs::create_dir(data_dir.join("images"))?;
    fs::write(data_dir.join("label_map.pbtxt"), LABEL_MAP)?;
    for stem in ["frame_0", "frame_1"] {
        write_annotation(data_dir, stem)?;
        write_image(&data_dir.join("images").join(format!("{}.png", stem)), 200, 100)?;
    }

    let config = annotated_config(data_dir)?;
    let report = voc_record::run(&config)?;

    // test.txt is created by the split
    assert!(data_dir.join("test.txt").exists());
    assert_eq!(report.processed(), 2);
    assert_eq!(report.written(), 2);
    assert_eq!(report.class_totals["Umbellula"], 2);
    assert_eq!(report.mean.len(), 3);
    assert_abs_diff_eq!(report.mean[2], 128.0, epsilon = 1.0);

    let records = read_records(&config.output_file())?;
    assert_eq!(records.len(), 2);
    let filenames: Vec<_> = records.iter().map(|r| r.filename.as_str()).sorted().collect();
    assert_eq!(filenames, ["frame_0.png", "frame_1.png"]);

    for record in &records {
        assert_eq!((record.width, record.height), (100, 50));
        assert_eq!(record.labels, [1]);
        assert_eq!(record.boxes.len(), 1);

        let bbox = &record.boxes[0];
        assert_eq!(bbox.class_text, "Umbellula");
        assert_abs_diff_eq!(bbox.xmin, 0.1, epsilon = 1e-6);
        assert_abs_diff_eq!(bbox.ymin, 0.1, epsilon = 1e-6);
        assert_abs_diff_eq!(bbox.xmax, 0.35, epsilon = 1e-6);
        assert_abs_diff_eq!(bbox.ymax, 0.6, epsilon = 1e-6);

        let decoded = image::load_from_memory(&record.encoded)?;
        assert_eq!((decoded.width(), decoded.height()), (100, 50));
    }
    Ok(())
}

#[test]
fn convert_skips_failing_items() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let data_dir = dir.path();
    fs::create_dir(data_dir.join("images"))?;
    fs::write(data_dir.join("label_map.pbtxt"), LABEL_MAP)?;

    write_annotation(data_dir, "present")?;
    write_image(&data_dir.join("images/present.png"), 100, 50)?;
    write_annotation(data_dir, "missing")?;
    fs::write(data_dir.join("broken.xml"), "<annotation><folder>")?;
    fs::write(data_dir.join("test.txt"), "present.xml\n\nmissing.xml\nbroken.xml\n")?;

    let config = annotated_config(data_dir)?;
    let report = voc_record::run(&config)?;

    assert_eq!(report.processed(), 3);
    assert_eq!(report.written(), 1);
    assert!(matches!(
        &report.outcomes[0],
        ItemOutcome::Written { filename, boxes: 1, .. } if filename == "present.png"
    ));
    assert!(matches!(
        &report.outcomes[1],
        ItemOutcome::Skipped { reason: SkipReason::Image(_), .. }
    ));
    assert!(matches!(
        &report.outcomes[2],
        ItemOutcome::Skipped { reason: SkipReason::Annotation(_), .. }
    ));
    assert_eq!(read_records(&config.output_file())?.len(), 1);
    Ok(())
}

#[test]
fn convert_image_directory() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let data_dir = dir.path();
    write_image(&data_dir.join("a.png"), 64, 32)?;
    write_image(&data_dir.join("b.png"), 32, 16)?;
    fs::write(data_dir.join("c.png"), b"not an image")?;

    let mut config = Config::new(data_dir, "images.record");
    config.resize = PixelSize::new(32, 16);
    let report = voc_record::run(&config)?;

    assert_eq!(report.set, None);
    assert_eq!(report.written(), 2);
    assert!(matches!(
        &report.outcomes[2],
        ItemOutcome::Skipped { reason: SkipReason::Image(_), .. }
    ));
    assert!(report.class_totals.is_empty());

    let records = read_records(&config.output_file())?;
    assert_eq!(
        records.iter().map(|r| r.filename.as_str()).collect::<Vec<_>>(),
        ["a.png", "b.png"]
    );
    assert!(records
        .iter()
        .all(|r| r.boxes.is_empty() && (r.width, r.height) == (32, 16)));
    Ok(())
}

#[test]
fn convert_rejects_missing_label_map() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = annotated_config(dir.path())?;
    assert!(voc_record::run(&config).is_err());
    assert!(!config.output_file().exists());
    Ok(())
}
