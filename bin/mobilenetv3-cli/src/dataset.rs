use anyhow::{bail, Context, Result};
use log::{info, warn};
use mobilenetv3_classifier::training::ImageItem;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Images from `<root>/<class>/*`, with classes taken from the sorted
/// sub-directory names.
pub struct ImageFolder {
    pub classes: Vec<String>,
    pub items: Vec<ImageItem>,
}

fn class_dirs(root: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(root)
        .with_context(|| format!("cannot read {}", root.display()))?
    {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            dirs.push((name.to_string(), path.clone()));
        }
    }
    dirs.sort();
    return Ok(dirs);
}

fn load_image(path: &Path, image_size: u32, channels: usize) -> Result<Vec<f32>> {
    let img = image::open(path)
        .with_context(|| format!("failed to load image {}", path.display()))?;
    let padded = transforms::img_resize_with_pad(&img, image_size)?;
    return Ok(transforms::img_to_pixels(&padded, channels)?);
}

impl ImageFolder {
    pub fn load(root: &Path, image_size: u32, channels: usize) -> Result<Self> {
        let dirs = class_dirs(root)?;
        if dirs.is_empty() {
            bail!("no class directories found in {}", root.display());
        }

        let classes: Vec<String> = dirs.iter().map(|(name, _)| name.clone()).collect();
        let items = Self::load_items(&dirs, image_size, channels)?;

        info!(
            "loaded {} images in {} classes from {}",
            items.len(),
            classes.len(),
            root.display()
        );
        return Ok(Self { classes, items });
    }

    /// Loads `root` with a class list fixed by a previous call to `load`.
    pub fn load_with_classes(
        root: &Path,
        classes: &[String],
        image_size: u32,
        channels: usize,
    ) -> Result<Self> {
        let dirs = class_dirs(root)?;
        for (name, _) in &dirs {
            if !classes.contains(name) {
                bail!("unknown class directory `{}` in {}", name, root.display());
            }
        }

        let dirs: Vec<(String, PathBuf)> = classes
            .iter()
            .map(|name| (name.clone(), root.join(name)))
            .collect();
        let items = Self::load_items(&dirs, image_size, channels)?;

        return Ok(Self {
            classes: classes.to_vec(),
            items,
        });
    }

    fn load_items(
        dirs: &[(String, PathBuf)],
        image_size: u32,
        channels: usize,
    ) -> Result<Vec<ImageItem>> {
        let mut items = Vec::new();
        for (label, (_, dir)) in dirs.iter().enumerate() {
            if !dir.is_dir() {
                continue;
            }
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                if !path.is_file() {
                    continue;
                }
                match load_image(&path, image_size, channels) {
                    Ok(pixels) => items.push(ImageItem { pixels, label }),
                    Err(err) => warn!("skipping {}: {err:#}", path.display()),
                }
            }
        }
        return Ok(items);
    }
}
