//! Common imports from external crates.

pub use anyhow::{bail, ensure, format_err, Context, Error, Result};
pub use bbox::{prelude::*, Transform, HW, TLBR};
pub use image::{imageops::FilterType, DynamicImage, ImageFormat, RgbImage};
pub use indexmap::{IndexMap, IndexSet};
pub use itertools::{izip, Itertools};
pub use log::{debug, info, warn};
pub use noisy_float::prelude::*;
pub use once_cell::sync::Lazy;
pub use rand::{prelude::*, rngs::StdRng, seq::SliceRandom};
pub use regex::Regex;
pub use serde::{Deserialize, Serialize};
pub use std::{
    collections::{HashMap, HashSet},
    convert::TryFrom,
    fmt::{self, Display},
    fs,
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    str::FromStr,
};
pub use structopt::StructOpt;
pub use tfrecord::{
    protobuf::{feature::Kind as FeatureKind, Features},
    Example, ExampleIter, ExampleWriter, Feature, RecordReaderConfig,
};

pub type Fallible<T> = Result<T, Error>;
