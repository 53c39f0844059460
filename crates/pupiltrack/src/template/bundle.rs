//! On-disk template bundle: a directory with a JSON manifest and one PNG per
//! template.
//!
//! ```text
//! bundle/
//!   manifest.json   {"pupil radii": [...], "pupil centers": [[x, y], ...],
//!                    "window brightnesses": [...], "anti-template count": n,
//!                    "anti-template centers": [[x, y], ...]}
//!   pupil_0.png ... pupil_{k-1}.png
//!   anti_0.png  ... anti_{n-1}.png
//! ```
//!
//! Bundles written before window brightness was recorded lack the
//! `"window brightnesses"` entry. They load with zero brightness and the
//! window-brightness blink path disabled.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use image::{GrayImage, ImageFormat};
use serde::{Deserialize, Serialize};

use super::{Template, TemplateStore};
use crate::error::TrackError;

const MANIFEST_FILE: &str = "manifest.json";
const WINDOW_BRIGHTNESS_KEY: &str = "window brightnesses";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CommonEntries {
    #[serde(rename = "pupil radii")]
    radii: Vec<f64>,
    #[serde(rename = "pupil centers")]
    centers: Vec<[f64; 2]>,
    #[serde(rename = "anti-template count", default)]
    anti_count: usize,
    #[serde(
        rename = "anti-template centers",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    anti_centers: Vec<[f64; 2]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CurrentManifest {
    #[serde(flatten)]
    common: CommonEntries,
    #[serde(rename = "window brightnesses")]
    window_brightnesses: Vec<f64>,
}

/// Manifest variants, selected by probing for the window-brightness entry.
#[derive(Debug, Clone)]
enum BundleSchema {
    Current(CurrentManifest),
    Legacy(CommonEntries),
}

impl BundleSchema {
    fn probe(path: &Path, value: serde_json::Value) -> Result<Self, TrackError> {
        let has_window = value
            .as_object()
            .ok_or_else(|| TrackError::corrupt(path, "manifest is not a JSON object"))?
            .contains_key(WINDOW_BRIGHTNESS_KEY);
        if has_window {
            serde_json::from_value(value)
                .map(Self::Current)
                .map_err(|e| TrackError::corrupt(path, e))
        } else {
            serde_json::from_value(value)
                .map(Self::Legacy)
                .map_err(|e| TrackError::corrupt(path, e))
        }
    }

    fn common(&self) -> &CommonEntries {
        match self {
            Self::Current(m) => &m.common,
            Self::Legacy(c) => c,
        }
    }
}

fn template_file(index: usize) -> String {
    format!("pupil_{}.png", index)
}

fn anti_file(index: usize) -> String {
    format!("anti_{}.png", index)
}

fn write_png(img: &GrayImage, path: &Path) -> Result<(), TrackError> {
    img.save_with_format(path, ImageFormat::Png)
        .map_err(|e| TrackError::Io(std::io::Error::other(e)))
}

fn read_png(dir: &Path, name: &str) -> Result<GrayImage, TrackError> {
    let path = dir.join(name);
    if !path.is_file() {
        return Err(TrackError::corrupt(dir, format!("missing entry {}", name)));
    }
    let img = image::open(&path).map_err(|e| TrackError::corrupt(dir, format!("{}: {}", name, e)))?;
    Ok(img.to_luma8())
}

/// `dir` with `suffix` appended to its final component.
fn sibling(dir: &Path, suffix: &str) -> PathBuf {
    let mut name = dir
        .file_name()
        .map_or_else(|| OsString::from("bundle"), |n| n.to_os_string());
    name.push(suffix);
    dir.with_file_name(name)
}

fn remove_if_present(path: &Path) -> Result<(), TrackError> {
    if path.exists() {
        std::fs::remove_dir_all(path)?;
    }
    Ok(())
}

impl TemplateStore {
    /// Write the template set to `dir`, replacing any previous bundle there.
    ///
    /// Entries are written to a sibling staging directory that is renamed
    /// into place once complete, so an interrupted save leaves the previous
    /// bundle (or a `.previous` sibling of it) intact.
    pub fn save_bundle(&self, dir: &Path) -> Result<(), TrackError> {
        let staging = sibling(dir, ".staging");
        let previous = sibling(dir, ".previous");
        remove_if_present(&staging)?;
        self.write_entries(&staging)?;

        remove_if_present(&previous)?;
        if dir.exists() {
            std::fs::rename(dir, &previous)?;
        }
        std::fs::rename(&staging, dir)?;
        remove_if_present(&previous)?;

        tracing::info!(
            "saved {} templates and {} anti-templates to {}",
            self.templates.len(),
            self.anti_templates.len(),
            dir.display()
        );
        Ok(())
    }

    fn write_entries(&self, dir: &Path) -> Result<(), TrackError> {
        std::fs::create_dir_all(dir)?;
        for (i, t) in self.templates.iter().enumerate() {
            write_png(&t.image, &dir.join(template_file(i)))?;
        }
        for (i, t) in self.anti_templates.iter().enumerate() {
            write_png(&t.image, &dir.join(anti_file(i)))?;
        }

        let common = CommonEntries {
            radii: self
                .templates
                .iter()
                .map(|t| t.radius.unwrap_or(f64::NAN))
                .collect(),
            centers: self.templates.iter().map(|t| t.center).collect(),
            anti_count: self.anti_templates.len(),
            anti_centers: self.anti_templates.iter().map(|t| t.center).collect(),
        };
        let json = if self.window_brightness_available {
            serde_json::to_string_pretty(&CurrentManifest {
                common,
                window_brightnesses: self
                    .templates
                    .iter()
                    .map(|t| t.window_brightness)
                    .collect(),
            })
        } else {
            serde_json::to_string_pretty(&common)
        }
        .map_err(|e| TrackError::Io(std::io::Error::other(e)))?;
        std::fs::write(dir.join(MANIFEST_FILE), json)?;
        Ok(())
    }

    /// Read a bundle from `dir` into a new store.
    pub fn from_bundle(dir: &Path) -> Result<Self, TrackError> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let data = std::fs::read_to_string(&manifest_path)
            .map_err(|e| TrackError::corrupt(&manifest_path, e))?;
        let value: serde_json::Value =
            serde_json::from_str(&data).map_err(|e| TrackError::corrupt(&manifest_path, e))?;
        let schema = BundleSchema::probe(&manifest_path, value)?;
        let common = schema.common();

        let n = common.radii.len();
        if n == 0 {
            return Err(TrackError::corrupt(dir, "bundle holds no templates"));
        }
        if common.centers.len() != n {
            return Err(TrackError::corrupt(
                dir,
                format!("{} radii but {} centers", n, common.centers.len()),
            ));
        }
        if let Some(r) = common.radii.iter().find(|r| !(r.is_finite() && **r > 0.0)) {
            return Err(TrackError::corrupt(dir, format!("invalid pupil radius {}", r)));
        }
        if !common.anti_centers.is_empty() && common.anti_centers.len() != common.anti_count {
            return Err(TrackError::corrupt(
                dir,
                format!(
                    "{} anti-templates but {} anti-template centers",
                    common.anti_count,
                    common.anti_centers.len()
                ),
            ));
        }

        let (window, window_available) = match &schema {
            BundleSchema::Current(m) => {
                if m.window_brightnesses.len() != n {
                    return Err(TrackError::corrupt(
                        dir,
                        format!(
                            "{} radii but {} window brightnesses",
                            n,
                            m.window_brightnesses.len()
                        ),
                    ));
                }
                (m.window_brightnesses.clone(), true)
            }
            BundleSchema::Legacy(_) => {
                tracing::warn!(
                    "{} has no window brightness entry; blink detection by window brightness is disabled",
                    dir.display()
                );
                (vec![0.0; n], false)
            }
        };

        let mut templates = Vec::with_capacity(n);
        for i in 0..n {
            let image = read_png(dir, &template_file(i))?;
            templates.push(Template::new(
                image,
                Some(common.radii[i]),
                common.centers[i],
                window[i],
            ));
        }
        let mut anti_templates = Vec::with_capacity(common.anti_count);
        for i in 0..common.anti_count {
            let image = read_png(dir, &anti_file(i))?;
            let center = common.anti_centers.get(i).copied().unwrap_or([
                f64::from(image.width()) / 2.0,
                f64::from(image.height()) / 2.0,
            ]);
            anti_templates.push(Template::new(image, None, center, 0.0));
        }

        tracing::info!(
            "loaded {} templates and {} anti-templates from {}",
            templates.len(),
            anti_templates.len(),
            dir.display()
        );
        Ok(Self::from_parts(templates, anti_templates, window_available))
    }

    /// Replace this store's contents with the bundle at `dir`.
    ///
    /// On failure the current template set is left untouched.
    pub fn load_bundle(&mut self, dir: &Path) -> Result<(), TrackError> {
        *self = Self::from_bundle(dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{PatchRect, SearchWindow};
    use crate::template::AutoTemplateConfig;
    use crate::test_utils::{pupil_frame, scratch_dir};

    fn custom_store() -> TemplateStore {
        let frame = pupil_frame(80, 60, [40, 30], 7);
        let window = SearchWindow::new(10, 5, 70, 55);
        let mut s = TemplateStore::new(&AutoTemplateConfig::default()).unwrap();
        s.add_template(&frame, PatchRect::centered(40, 30, 10), 7.25, window)
            .unwrap();
        s.add_template(&frame, PatchRect::new(-4, 22, 17, 15), 6.5, window)
            .unwrap();
        s.add_anti_template(&frame, PatchRect::new(74, 0, 12, 9)).unwrap();
        s
    }

    #[test]
    fn bundle_round_trip_is_exact() {
        let dir = scratch_dir("bundle_round_trip");
        let s = custom_store();
        s.save_bundle(&dir).unwrap();
        let loaded = TemplateStore::from_bundle(&dir).unwrap();

        assert!(loaded.is_customized());
        assert!(loaded.window_brightness_available());
        assert_eq!(loaded.templates(), s.templates());
        assert_eq!(loaded.anti_templates(), s.anti_templates());
        for (a, b) in loaded.templates().iter().zip(s.templates()) {
            assert_eq!(a.radius().unwrap().to_bits(), b.radius().unwrap().to_bits());
            assert_eq!(a.center()[0].to_bits(), b.center()[0].to_bits());
            assert_eq!(a.center()[1].to_bits(), b.center()[1].to_bits());
        }
        assert_eq!(loaded.brightness(), s.brightness());
    }

    #[test]
    fn resave_replaces_the_whole_bundle() {
        let dir = scratch_dir("bundle_resave");
        let bundle = dir.join("templates");
        let s = custom_store();
        s.save_bundle(&bundle).unwrap();
        assert!(bundle.join(template_file(1)).is_file());

        // Leftovers from an interrupted save are discarded.
        std::fs::create_dir_all(dir.join("templates.staging")).unwrap();
        std::fs::write(dir.join("templates.staging").join(MANIFEST_FILE), "{").unwrap();

        let mut smaller = s.clone();
        smaller.remove_template(1).unwrap();
        smaller.remove_anti_template(0).unwrap();
        smaller.save_bundle(&bundle).unwrap();

        assert!(!bundle.join(template_file(1)).exists());
        assert!(!bundle.join(anti_file(0)).exists());
        assert!(!dir.join("templates.staging").exists());
        assert!(!dir.join("templates.previous").exists());
        let loaded = TemplateStore::from_bundle(&bundle).unwrap();
        assert_eq!(loaded.templates(), smaller.templates());
        assert!(loaded.anti_templates().is_empty());
    }

    #[test]
    fn legacy_bundle_loads_without_window_brightness() {
        let dir = scratch_dir("bundle_legacy");
        let s = custom_store();
        s.save_bundle(&dir).unwrap();

        let manifest = dir.join(MANIFEST_FILE);
        let mut value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&manifest).unwrap()).unwrap();
        value.as_object_mut().unwrap().remove(WINDOW_BRIGHTNESS_KEY);
        std::fs::write(&manifest, value.to_string()).unwrap();

        let loaded = TemplateStore::from_bundle(&dir).unwrap();
        assert!(!loaded.window_brightness_available());
        assert!(loaded.brightness().window.is_none());
        assert!(loaded.templates().iter().all(|t| t.window_brightness() == 0.0));

        // Re-saving keeps the legacy shape so the disabled state survives.
        let resaved = scratch_dir("bundle_legacy_resaved");
        loaded.save_bundle(&resaved).unwrap();
        let again = TemplateStore::from_bundle(&resaved).unwrap();
        assert!(!again.window_brightness_available());
    }

    #[test]
    fn failed_load_keeps_previous_state() {
        let dir = scratch_dir("bundle_corrupt");
        let s = custom_store();
        s.save_bundle(&dir).unwrap();
        std::fs::remove_file(dir.join(template_file(1))).unwrap();

        let mut target = TemplateStore::new(&AutoTemplateConfig::default()).unwrap();
        let before = target.templates().to_vec();
        let err = target.load_bundle(&dir).unwrap_err();
        assert!(matches!(err, TrackError::CorruptArchive { .. }));
        assert_eq!(target.templates(), before.as_slice());
        assert!(!target.is_customized());
    }

    #[test]
    fn malformed_manifest_is_corrupt_archive() {
        let dir = scratch_dir("bundle_malformed");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(MANIFEST_FILE), "{\"pupil radii\": [1.0]").unwrap();
        assert!(matches!(
            TemplateStore::from_bundle(&dir),
            Err(TrackError::CorruptArchive { .. })
        ));

        std::fs::write(
            dir.join(MANIFEST_FILE),
            "{\"pupil radii\": [1.0, 2.0], \"pupil centers\": [[0.5, 0.5]]}",
        )
        .unwrap();
        assert!(matches!(
            TemplateStore::from_bundle(&dir),
            Err(TrackError::CorruptArchive { .. })
        ));
    }
}
