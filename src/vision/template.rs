//! On-disk template library.
//!
//! Layout: `<root>/<category>/<name>[_<version>].png`, plus a sidecar
//! `<root>/templates.json` mapping `"<category>/<name>_<version>"` to
//! descriptive metadata. Unversioned files carry the `default` version.

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use image::{ImageFormat, RgbaImage};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::platform::Region;
use crate::vision::ScreenMatcher;

pub const DEFAULT_VERSION: &str = "default";

/// Category folders created with a new library.
pub const DEFAULT_CATEGORIES: [&str; 3] = ["buttons", "icons", "status"];

const INDEX_FILE: &str = "templates.json";

/// Accepted template dimensions (inclusive), per axis.
const MIN_SIZE: u32 = 10;
const MAX_SIZE: u32 = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TemplateMetadata {
    name: String,
    category: String,
    version: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    created_at: String,
}

/// A resolved reference image.
#[derive(Debug, Clone)]
pub struct Template {
    pub name: String,
    pub category: String,
    pub version: String,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub description: String,
    pub created_at: Option<String>,
    pub image: Arc<RgbaImage>,
}

impl Template {
    pub fn id(&self) -> String {
        template_id(&self.category, &self.name, &self.version)
    }
}

/// Result of checking a template file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateValidation {
    pub exists: bool,
    pub readable: bool,
    pub size_ok: bool,
    pub width: u32,
    pub height: u32,
    pub errors: Vec<String>,
}

impl TemplateValidation {
    pub fn is_valid(&self) -> bool {
        self.exists && self.readable && self.size_ok
    }
}

fn template_id(category: &str, name: &str, version: &str) -> String {
    format!("{}/{}_{}", category, name, version)
}

fn file_name(name: &str, version: &str) -> String {
    if version == DEFAULT_VERSION {
        format!("{}.png", name)
    } else {
        format!("{}_{}.png", name, version)
    }
}

pub struct TemplateStore {
    root: PathBuf,
    metadata: Mutex<BTreeMap<String, TemplateMetadata>>,
    cache: Mutex<HashMap<String, Template>>,
    version_tag: Regex,
}

impl TemplateStore {
    /// Opens (and if needed creates) the library at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for category in DEFAULT_CATEGORIES {
            fs::create_dir_all(root.join(category))
                .with_context(|| format!("Failed to create {}", root.join(category).display()))?;
        }

        let metadata = match fs::read_to_string(root.join(INDEX_FILE)) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable {}: {}", INDEX_FILE, e);
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };

        Ok(Self {
            root,
            metadata: Mutex::new(metadata),
            cache: Mutex::new(HashMap::new()),
            version_tag: Regex::new(r"^v\d[\w.]*$")?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the best file for `(category, name, version)`: the exact
    /// versioned file, then the unversioned one.
    pub fn resolve(&self, name: &str, category: &str, version: &str) -> Option<PathBuf> {
        let dir = self.root.join(category);
        if version != DEFAULT_VERSION {
            let exact = dir.join(file_name(name, version));
            if exact.is_file() {
                return Some(exact);
            }
        }
        let fallback = dir.join(file_name(name, DEFAULT_VERSION));
        fallback.is_file().then_some(fallback)
    }

    /// Loads a template, decoding its image once and caching it.
    pub fn get(&self, name: &str, category: &str, version: &str) -> Option<Template> {
        let id = template_id(category, name, version);
        if let Some(cached) = self.cache.lock().ok()?.get(&id) {
            return Some(cached.clone());
        }

        let path = self.resolve(name, category, version)?;
        let image = match image::open(&path) {
            Ok(img) => img.to_rgba8(),
            Err(e) => {
                tracing::warn!("Failed to load template {}: {}", path.display(), e);
                return None;
            }
        };

        let resolved_version = if path.file_name()?.to_string_lossy() == file_name(name, version) {
            version.to_string()
        } else {
            DEFAULT_VERSION.to_string()
        };
        let meta = self
            .metadata
            .lock()
            .ok()?
            .get(&template_id(category, name, &resolved_version))
            .cloned();

        let template = Template {
            name: name.to_string(),
            category: category.to_string(),
            version: resolved_version,
            width: image.width(),
            height: image.height(),
            description: meta.as_ref().map(|m| m.description.clone()).unwrap_or_default(),
            created_at: meta.map(|m| m.created_at).filter(|c| !c.is_empty()),
            path,
            image: Arc::new(image),
        };

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(id, template.clone());
        }
        Some(template)
    }

    /// Category folder names, sorted.
    pub fn categories(&self) -> Vec<String> {
        let mut categories: Vec<String> = fs::read_dir(&self.root)
            .map(|entries| {
                entries
                    .flatten()
                    .filter(|e| e.path().is_dir())
                    .map(|e| e.file_name().to_string_lossy().to_string())
                    .collect()
            })
            .unwrap_or_default();
        categories.sort();
        categories
    }

    /// All templates, optionally restricted to one category and/or version.
    pub fn list(&self, category: Option<&str>, version: Option<&str>) -> Vec<Template> {
        let categories = match category {
            Some(c) => vec![c.to_string()],
            None => self.categories(),
        };

        let mut templates = Vec::new();
        for category in categories {
            let Ok(entries) = fs::read_dir(self.root.join(&category)) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let is_png = path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
                if !is_png {
                    continue;
                }
                let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
                    continue;
                };

                let (name, file_version) = self.parse_stem(&category, &stem);
                if version.is_some_and(|v| v != file_version) {
                    continue;
                }
                if let Some(template) = self.get(&name, &category, &file_version) {
                    templates.push(template);
                }
            }
        }

        templates.sort_by(|a, b| {
            (&a.category, &a.name, &a.version).cmp(&(&b.category, &b.name, &b.version))
        });
        templates
    }

    /// Splits a file stem into `(name, version)`.
    ///
    /// The last `_` segment is a version only if it looks like one (`v2`,
    /// `v3.1`) or the index already knows that id; `export_button` stays a
    /// single name.
    fn parse_stem(&self, category: &str, stem: &str) -> (String, String) {
        if let Some((name, version)) = stem.rsplit_once('_') {
            let known = self
                .metadata
                .lock()
                .map(|m| m.contains_key(&template_id(category, name, version)))
                .unwrap_or(false);
            if !name.is_empty() && (known || self.version_tag.is_match(version)) {
                return (name.to_string(), version.to_string());
            }
        }
        (stem.to_string(), DEFAULT_VERSION.to_string())
    }

    /// Copies `source` into the library. Returns `false` on any failure.
    pub fn add(
        &self,
        source: &Path,
        name: &str,
        category: &str,
        version: &str,
        description: &str,
    ) -> bool {
        match self.try_add(source, name, category, version, description) {
            Ok(dest) => {
                tracing::info!("Added template {}", dest.display());
                true
            }
            Err(e) => {
                tracing::warn!("Failed to add template {}/{}: {:#}", category, name, e);
                false
            }
        }
    }

    fn try_add(
        &self,
        source: &Path,
        name: &str,
        category: &str,
        version: &str,
        description: &str,
    ) -> Result<PathBuf> {
        if !source.is_file() {
            return Err(anyhow!("Source image not found: {}", source.display()));
        }
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(anyhow!("Invalid template name '{}'", name));
        }

        let dir = self.root.join(category);
        fs::create_dir_all(&dir)?;
        let dest = dir.join(file_name(name, version));

        let is_png = source
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
        if is_png {
            fs::copy(source, &dest).context("Failed to copy template")?;
        } else {
            image::open(source)
                .context("Failed to decode source image")?
                .save_with_format(&dest, ImageFormat::Png)
                .context("Failed to write template")?;
        }

        if let Ok(mut metadata) = self.metadata.lock() {
            metadata.insert(
                template_id(category, name, version),
                TemplateMetadata {
                    name: name.to_string(),
                    category: category.to_string(),
                    version: version.to_string(),
                    description: description.to_string(),
                    created_at: Local::now().to_rfc3339(),
                },
            );
        }
        self.save_index()?;
        self.invalidate(category, name, version, &dest);
        Ok(dest)
    }

    /// Captures `region` of the screen and adds it as a template.
    ///
    /// The intermediate file is a scoped temporary and is always removed.
    pub fn capture(
        &self,
        screen: &ScreenMatcher,
        name: &str,
        region: Region,
        category: &str,
        version: &str,
        description: &str,
    ) -> bool {
        let image = match screen.capture_screen(Some(region)) {
            Ok(img) => img,
            Err(e) => {
                tracing::warn!("Template capture failed: {:#}", e);
                return false;
            }
        };

        let temp = match tempfile::Builder::new().suffix(".png").tempfile() {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!("Failed to create temporary file: {}", e);
                return false;
            }
        };
        if let Err(e) = image.save(temp.path()) {
            tracing::warn!("Failed to write captured template: {}", e);
            return false;
        }

        self.add(temp.path(), name, category, version, description)
    }

    /// Removes the exact file for `(category, name, version)` and its metadata.
    pub fn delete(&self, name: &str, category: &str, version: &str) -> bool {
        let path = self.root.join(category).join(file_name(name, version));
        if !path.is_file() {
            tracing::warn!("Template not found: {}", path.display());
            return false;
        }
        if let Err(e) = fs::remove_file(&path) {
            tracing::warn!("Failed to delete {}: {}", path.display(), e);
            return false;
        }

        if let Ok(mut metadata) = self.metadata.lock() {
            metadata.remove(&template_id(category, name, version));
        }
        if let Err(e) = self.save_index() {
            tracing::warn!("Failed to update {}: {:#}", INDEX_FILE, e);
        }
        self.invalidate(category, name, version, &path);
        true
    }

    /// Checks that the template exists, decodes, and has sane dimensions.
    /// Every problem found is reported.
    pub fn validate(&self, name: &str, category: &str, version: &str) -> TemplateValidation {
        let mut result = TemplateValidation::default();

        let Some(path) = self.resolve(name, category, version) else {
            result
                .errors
                .push(format!("Template not found: {}/{} ({})", category, name, version));
            return result;
        };
        result.exists = true;

        let image = match image::open(&path) {
            Ok(img) => img,
            Err(e) => {
                result.errors.push(format!("Cannot decode image: {}", e));
                return result;
            }
        };
        result.readable = true;
        result.width = image.width();
        result.height = image.height();

        for (axis, value) in [("width", result.width), ("height", result.height)] {
            if value < MIN_SIZE {
                result
                    .errors
                    .push(format!("Template {} {}px is below {}px", axis, value, MIN_SIZE));
            } else if value > MAX_SIZE {
                result
                    .errors
                    .push(format!("Template {} {}px exceeds {}px", axis, value, MAX_SIZE));
            }
        }
        result.size_ok = result.errors.is_empty();
        result
    }

    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    /// Drops cached entries made stale by writing or removing `path`.
    ///
    /// A lookup of a missing version is cached under its own id but holds the
    /// default file, so the id is evicted as well as the path. Changing the
    /// default file affects every version of the template.
    fn invalidate(&self, category: &str, name: &str, version: &str, path: &Path) {
        let id = template_id(category, name, version);
        let whole_template = version == DEFAULT_VERSION;
        if let Ok(mut cache) = self.cache.lock() {
            cache.retain(|key, t| {
                let same_template = t.category == category && t.name == name;
                !(*key == id || t.path == path || (whole_template && same_template))
            });
        }
    }

    fn save_index(&self) -> Result<()> {
        let metadata = self
            .metadata
            .lock()
            .map_err(|_| anyhow!("Template index lock poisoned"))?;
        let json = serde_json::to_string_pretty(&*metadata)?;
        fs::write(self.root.join(INDEX_FILE), json).context("Failed to write template index")?;
        Ok(())
    }
}
