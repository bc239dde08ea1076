// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Reading and writing tree files, with the format picked by extension.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use lopper_device_tree::dts;
use lopper_device_tree::fdt::Fdt;
use lopper_device_tree::model::DeviceTree;

use crate::error::{CodecError, LopperError, Result};

/// A tree file format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Format {
    /// Flattened device tree blob (`.dtb`).
    Dtb,
    /// Device tree source (`.dts`, `.dtsi`).
    Dts,
    /// Anything else; handled by an assist registered for the extension.
    Other(String),
}

impl Format {
    /// Picks the format from a file name's extension.
    #[must_use]
    pub fn of(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("dtb") => Format::Dtb,
            Some("dts" | "dtsi") => Format::Dts,
            Some(other) => Format::Other(other.to_owned()),
            None => Format::Other(String::new()),
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> LopperError + '_ {
    move |source| LopperError::Io {
        path: path.to_owned(),
        source,
    }
}

fn codec_error(path: &Path) -> impl FnOnce(CodecError) -> LopperError + '_ {
    move |source| LopperError::Codec {
        path: path.to_owned(),
        source,
    }
}

/// Reads a tree from a `.dtb` blob, or from DTS source for any other
/// extension.
///
/// # Errors
///
/// Returns [`LopperError::Io`] if the file cannot be read and
/// [`LopperError::Codec`] if it does not decode.
pub fn read_tree(path: &Path) -> Result<DeviceTree> {
    debug!("reading {}", path.display());
    if Format::of(path) == Format::Dtb {
        let blob = fs::read(path).map_err(io_error(path))?;
        let fdt = Fdt::new(&blob)
            .map_err(CodecError::from)
            .map_err(codec_error(path))?;
        DeviceTree::from_fdt(&fdt)
            .map_err(CodecError::from)
            .map_err(codec_error(path))
    } else {
        let source = fs::read_to_string(path).map_err(io_error(path))?;
        dts::parse(&source)
            .map_err(CodecError::from)
            .map_err(codec_error(path))
    }
}

/// Writes a tree in the format implied by the file name. Returns `false`
/// without touching the file system if the extension is not a native
/// format.
///
/// # Errors
///
/// Returns [`LopperError::Io`] if the file cannot be written.
pub fn write_tree(path: &Path, tree: &DeviceTree) -> Result<bool> {
    let contents = match Format::of(path) {
        Format::Dtb => tree.to_dtb(),
        Format::Dts => tree.to_string().into_bytes(),
        Format::Other(_) => return Ok(false),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    fs::write(path, contents).map_err(io_error(path))?;
    info!("wrote {}", path.display());
    Ok(true)
}

/// Joins `file` onto `outdir` unless it is already absolute.
#[must_use]
pub fn output_path(outdir: &Path, file: &str) -> PathBuf {
    let file = Path::new(file);
    if file.is_absolute() {
        file.to_owned()
    } else {
        outdir.join(file)
    }
}

#[cfg(test)]
mod tests {
    use lopper_device_tree::model::DeviceTreeNode;

    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lopper-io-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn formats() {
        assert_eq!(Format::of(Path::new("a/b.dtb")), Format::Dtb);
        assert_eq!(Format::of(Path::new("b.dtsi")), Format::Dts);
        assert_eq!(Format::of(Path::new("b.yaml")), Format::Other("yaml".into()));
        assert_eq!(Format::of(Path::new("README")), Format::Other(String::new()));
    }

    #[test]
    fn both_formats_read_back() {
        let dir = scratch("formats");
        let mut tree = DeviceTree::new();
        tree.add(DeviceTreeNode::new("uart@1000"), "/soc/uart@1000", false)
            .unwrap();
        tree.sync();

        for name in ["out.dtb", "out.dts"] {
            let path = dir.join(name);
            assert!(write_tree(&path, &tree).unwrap());
            assert_eq!(read_tree(&path).unwrap(), tree);
        }
        assert!(!write_tree(&dir.join("out.cdo"), &tree).unwrap());
        assert!(!dir.join("out.cdo").exists());
    }

    #[test]
    fn missing_and_broken_files() {
        let dir = scratch("broken");
        assert!(matches!(
            read_tree(&dir.join("absent.dts")),
            Err(LopperError::Io { .. })
        ));

        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("broken.dtb");
        fs::write(&path, b"not a blob").unwrap();
        assert!(matches!(
            read_tree(&path),
            Err(LopperError::Codec {
                source: CodecError::Fdt(_),
                ..
            })
        ));
    }

    #[test]
    fn relative_outputs_land_in_outdir() {
        assert_eq!(
            output_path(Path::new("/tmp/out"), "a.dts"),
            PathBuf::from("/tmp/out/a.dts")
        );
        assert_eq!(
            output_path(Path::new("/tmp/out"), "/abs/a.dts"),
            PathBuf::from("/abs/a.dts")
        );
    }
}
