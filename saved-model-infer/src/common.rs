//! Common imports from external crates.

pub use anyhow::{ensure, Context, Error, Result};
pub use itertools::Itertools;
pub use log::{debug, info};
pub use std::{
    fmt::{self, Display},
    fs,
    os::raw::c_int,
    path::{Path, PathBuf},
    str::FromStr,
};
pub use tensorflow::{Graph, SavedModelBundle, SessionOptions, SessionRunArgs, Tensor};
