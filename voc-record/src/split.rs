//! Train/test splitting of annotation files.

use crate::{annotation::Annotation, common::*, config::SplitRatio};

pub const TRAIN_LIST_FILE: &str = "train.txt";
pub const TEST_LIST_FILE: &str = "test.txt";

/// The result of a dataset split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitSummary {
    /// The number of annotation files that contain at least one wanted label.
    pub candidates: usize,
    pub train: Vec<PathBuf>,
    pub test: Vec<PathBuf>,
}

/// Split the annotation files in `dir` into `train.txt` and `test.txt` in the same directory.
///
/// Only files with at least one object named in `labels` are considered.
/// The train list takes the head of the shuffled files and the test list
/// takes the tail in reverse order. Both counts are rounded independently,
/// so a file may appear in both lists or in neither.
pub fn split_dataset<R>(
    dir: impl AsRef<Path>,
    labels: &HashSet<String>,
    ratio: &SplitRatio,
    rng: &mut R,
) -> Result<SplitSummary>
where
    R: Rng + ?Sized,
{
    let dir = dir.as_ref();
    info!("searching in {}", dir.display());

    let mut annotations: Vec<_> = list_files(dir, "xml")?
        .into_iter()
        .filter(|path| is_valid_annotation(path, labels))
        .collect();
    info!(
        "found {} xml annotations in {}",
        annotations.len(),
        dir.display()
    );

    annotations.shuffle(rng);
    let total = annotations.len();

    if total == 0 {
        return Ok(SplitSummary {
            candidates: 0,
            train: vec![],
            test: vec![],
        });
    }

    let num_train = round_count(ratio.train, total);
    let num_test = round_count(ratio.test, total);
    let train: Vec<_> = annotations.iter().take(num_train).cloned().collect();
    let test: Vec<_> = annotations.iter().rev().take(num_test).cloned().collect();

    fs::create_dir_all(dir)?;
    write_list(dir, TRAIN_LIST_FILE, &train)?;
    write_list(dir, TEST_LIST_FILE, &test)?;

    Ok(SplitSummary {
        candidates: total,
        train,
        test,
    })
}

/// Check if an annotation file is readable and mentions one of `labels`.
///
/// Any read or parse failure counts as invalid.
pub fn is_valid_annotation(path: &Path, labels: &HashSet<String>) -> bool {
    match Annotation::open(path) {
        Ok(annotation) => annotation.has_any_label(labels),
        Err(err) => {
            debug!("ignore invalid annotation {}: {:#}", path.display(), err);
            false
        }
    }
}

/// List the files with `extension` directly under `dir` in sorted order.
pub fn list_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let pattern = format!("{}/*.{}", dir.display(), extension);
    let mut paths: Vec<_> = glob::glob(&pattern)
        .with_context(|| format!("invalid glob pattern '{}'", pattern))?
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(err) => {
                warn!("unable to access {}", err.path().display());
                None
            }
        })
        .collect();
    paths.sort();
    Ok(paths)
}

/// Read a list file with one path per line, relative to the directory of the dataset.
pub fn read_list(path: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let path = path.as_ref();
    let reader = BufReader::new(
        fs::File::open(path)
            .with_context(|| format!("failed to open list file '{}'", path.display()))?,
    );
    let mut list = vec![];
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if !line.is_empty() {
            list.push(PathBuf::from(line));
        }
    }
    Ok(list)
}

/// Write the list with paths relative to `dir`.
fn write_list(dir: &Path, name: &str, list: &[PathBuf]) -> Result<()> {
    let path = dir.join(name);
    let mut writer = BufWriter::new(
        fs::File::create(&path)
            .with_context(|| format!("failed to create list file '{}'", path.display()))?,
    );
    for item in list {
        let item = item.strip_prefix(dir).unwrap_or(item);
        writeln!(writer, "{}", item.display())?;
    }
    writer.flush()?;
    Ok(())
}

/// Round half to even, which is how the split sizes have always been computed.
fn round_count(ratio: R64, total: usize) -> usize {
    (ratio.raw() * total as f64).round_ties_even() as usize
}
