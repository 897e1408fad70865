//! PASCAL VOC style annotation files.

use crate::common::*;
use serde::de::{self, Deserializer, IgnoredAny, MapAccess, Visitor};

/// The annotation of one image.
///
/// `<object>` elements are collected wherever they appear among the
/// other children of `<annotation>`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    pub folder: String,
    pub filename: String,
    pub size: ImageSize,
    #[serde(rename = "object")]
    pub objects: Vec<ObjectBox>,
}

/// The image size recorded in an annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub depth: Option<u32>,
}

/// An annotated object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectBox {
    pub name: String,
    pub bndbox: BndBox,
}

/// Bounding box corners in source pixel units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BndBox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl BndBox {
    pub fn to_tlbr(&self) -> TLBR<f64> {
        let Self {
            xmin,
            ymin,
            xmax,
            ymax,
        } = *self;
        TLBR::from_tlbr_raw([ymin, xmin, ymax, xmax])
    }
}

impl ImageSize {
    pub fn to_hw(&self) -> Result<HW<f64>> {
        HW::try_from_hw([self.height as f64, self.width as f64])
    }
}

impl<'de> Deserialize<'de> for Annotation {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        const FIELDS: &[&str] = &["folder", "filename", "size", "object"];
        deserializer.deserialize_struct("annotation", FIELDS, AnnotationVisitor)
    }
}

struct AnnotationVisitor;

impl<'de> Visitor<'de> for AnnotationVisitor {
    type Value = Annotation;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("an annotation element")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut folder = None;
        let mut filename = None;
        let mut size = None;
        let mut objects = vec![];

        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "folder" => folder = Some(map.next_value()?),
                "filename" => {
                    if filename.is_some() {
                        return Err(de::Error::duplicate_field("filename"));
                    }
                    filename = Some(map.next_value()?);
                }
                "size" => {
                    if size.is_some() {
                        return Err(de::Error::duplicate_field("size"));
                    }
                    size = Some(map.next_value()?);
                }
                "object" => objects.push(map.next_value()?),
                _ => {
                    map.next_value::<IgnoredAny>()?;
                }
            }
        }

        Ok(Annotation {
            folder: folder.unwrap_or_default(),
            filename: filename.ok_or_else(|| de::Error::missing_field("filename"))?,
            size: size.ok_or_else(|| de::Error::missing_field("size"))?,
            objects,
        })
    }
}

impl Annotation {
    /// Parse the XML text of an annotation file.
    pub fn parse(xml: &str) -> Result<Self> {
        let annotation = serde_xml_rs::from_str(xml)?;
        Ok(annotation)
    }

    /// Read and parse an annotation file.
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let xml = fs::read_to_string(path)
            .with_context(|| format!("failed to read annotation file {}", path.display()))?;
        Self::parse(&xml)
            .with_context(|| format!("failed to parse annotation file {}", path.display()))
    }

    /// Check if any object is named after one of `labels`.
    pub fn has_any_label(&self, labels: &HashSet<String>) -> bool {
        self.objects.iter().any(|obj| labels.contains(&obj.name))
    }
}
