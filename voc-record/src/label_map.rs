//! Class name to class id mapping.

use crate::common::*;

static ITEM_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"item\s*\{([^}]*)\}").unwrap());
static NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bname\s*:\s*(?:"([^"]*)"|'([^']*)')"#).unwrap());
static ID_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bid\s*:\s*(-?\d+)").unwrap());

/// The mapping from class names to the integer ids the detection model predicts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelMap {
    ids: IndexMap<String, i64>,
}

impl LabelMap {
    /// Load a label map file.
    ///
    /// Files with `.pbtxt` extension are read as `StringIntLabelMap` text,
    /// other files as a class list with one name per line.
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read label map '{}'", path.display()))?;

        let label_map = match path.extension().and_then(|ext| ext.to_str()) {
            Some("pbtxt") => Self::from_pbtxt(&text),
            _ => Self::from_class_list(&text),
        }
        .with_context(|| format!("failed to load label map '{}'", path.display()))?;

        info!(
            "loaded {} classes from '{}'",
            label_map.len(),
            path.display()
        );
        Ok(label_map)
    }

    /// Collect the `name` and `id` of each `item { }` block.
    pub fn from_pbtxt(text: &str) -> Result<Self> {
        let ids: IndexMap<String, i64> = ITEM_REGEX
            .captures_iter(text)
            .map(|item| {
                let body = &item[1];
                let name = NAME_REGEX
                    .captures(body)
                    .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
                    .ok_or_else(|| format_err!("label map item without name: {{{}}}", body.trim()))?
                    .as_str()
                    .to_owned();
                let id: i64 = ID_REGEX
                    .captures(body)
                    .ok_or_else(|| format_err!("label map item '{}' without id", name))?[1]
                    .parse()?;
                ensure!(id >= 0, "label map id must be non-negative, but get {}", id);
                Fallible::Ok((name, id))
            })
            .try_collect()?;
        ensure!(!ids.is_empty(), "no items found in label map");
        Ok(Self { ids })
    }

    /// Read one class name per line. Ids are assigned from 1 in line order.
    pub fn from_class_list(text: &str) -> Result<Self> {
        let lines: Vec<_> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        let classes: IndexSet<_> = lines.iter().cloned().collect();
        ensure!(
            lines.len() == classes.len(),
            "duplicated class names found in class list"
        );
        ensure!(!classes.is_empty(), "no classes found in class list");

        let ids = classes
            .into_iter()
            .zip(1..)
            .map(|(name, id)| (name.to_owned(), id))
            .collect();
        Ok(Self { ids })
    }

    pub fn get(&self, name: &str) -> Option<i64> {
        self.ids.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ids.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.ids.keys().map(String::as_str)
    }

    /// The class names as an owned set.
    pub fn name_set(&self) -> HashSet<String> {
        self.ids.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<(String, i64)> for LabelMap {
    fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = (String, i64)>,
    {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PBTXT: &str = r#"
item {
  id: 1
  name: 'Rathbunaster'
}

item {
  name: "Umbellula"
  id: 2
  display_name: "sea pen"
}
"#;

    #[test]
    fn load_pbtxt() -> Result<()> {
        let label_map = LabelMap::from_pbtxt(PBTXT)?;
        assert_eq!(label_map.len(), 2);
        assert_eq!(label_map.get("Rathbunaster"), Some(1));
        assert_eq!(label_map.get("Umbellula"), Some(2));
        assert_eq!(label_map.get("sea pen"), None);
        assert_eq!(
            label_map.names().collect::<Vec<_>>(),
            ["Rathbunaster", "Umbellula"]
        );
        Ok(())
    }

    #[test]
    fn reject_bad_pbtxt() {
        assert!(LabelMap::from_pbtxt("").is_err());
        assert!(LabelMap::from_pbtxt("item { id: 1 }").is_err());
        assert!(LabelMap::from_pbtxt("item { name: 'a' }").is_err());
        assert!(LabelMap::from_pbtxt("item { name: 'a' id: -1 }").is_err());
    }

    #[test]
    fn load_class_list() -> Result<()> {
        let label_map = LabelMap::from_class_list("person\n\ncar\nbicycle\n")?;
        assert_eq!(label_map.get("person"), Some(1));
        assert_eq!(label_map.get("bicycle"), Some(3));
        assert!(LabelMap::from_class_list("a\nb\na\n").is_err());
        assert!(LabelMap::from_class_list("\n").is_err());
        Ok(())
    }

    #[test]
    fn open_by_extension() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let pbtxt = dir.path().join("label_map.pbtxt");
        fs::write(&pbtxt, PBTXT)?;
        let classes = dir.path().join("classes.txt");
        fs::write(&classes, "Rathbunaster\nUmbellula\n")?;

        assert_eq!(LabelMap::open(&pbtxt)?, LabelMap::open(&classes)?);
        assert!(LabelMap::open(dir.path().join("missing.pbtxt")).is_err());
        Ok(())
    }
}
