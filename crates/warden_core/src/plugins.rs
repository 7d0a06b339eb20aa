//! Plugin archives in the server's plugin directory.

use serde::Serialize;
use serde_yaml::Value;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::error::{LauncherError, LauncherResult};

const PLUGIN_EXTENSION: &str = "jar";
const METADATA_ENTRY: &str = "plugin.yml";

/// Metadata read from a plugin archive. Fields the archive does not declare
/// are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PluginDescriptor {
    pub file_name: String,
    pub name: String,
    pub version: String,
    pub author: String,
}

/// Installs, removes and inspects plugin archives.
#[derive(Debug, Clone)]
pub struct PluginStore {
    dir: PathBuf,
}

impl PluginStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File names of installed plugins, sorted. A missing directory has none.
    pub async fn list(&self) -> LauncherResult<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(LauncherError::Io(self.dir.clone(), e)),
        };

        let mut plugins = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| LauncherError::Io(self.dir.clone(), e))?
        {
            let path = entry.path();
            if path.is_file() && is_plugin_archive(&path) {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    plugins.push(name.to_string());
                }
            }
        }
        plugins.sort();
        Ok(plugins)
    }

    /// Copies `source` into the plugin directory. An existing file of the
    /// same name is only replaced when `overwrite` is set.
    pub async fn install(&self, source: &Path, overwrite: bool) -> LauncherResult<PathBuf> {
        if !source.is_file() || !is_plugin_archive(source) {
            return Err(LauncherError::Validation(format!(
                "not a plugin archive: {}",
                source.display()
            )));
        }
        let file_name = source
            .file_name()
            .ok_or_else(|| LauncherError::Validation(format!("invalid plugin path: {}", source.display())))?;

        let target = self.dir.join(file_name);
        if target.exists() && !overwrite {
            return Err(LauncherError::Validation(format!(
                "plugin already installed: {}",
                file_name.to_string_lossy()
            )));
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| LauncherError::Io(self.dir.clone(), e))?;
        tokio::fs::copy(source, &target)
            .await
            .map_err(|e| LauncherError::Io(target.clone(), e))?;

        info!("🔌 Installed plugin {}", target.display());
        Ok(target)
    }

    /// Deletes an installed plugin. Returns whether a file was removed.
    pub async fn remove(&self, file_name: &str) -> LauncherResult<bool> {
        let target = self.resolve(file_name)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => {
                info!("Removed plugin {}", target.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(LauncherError::Io(target, e)),
        }
    }

    /// Reads the descriptor out of an installed plugin.
    pub async fn describe(&self, file_name: &str) -> LauncherResult<PluginDescriptor> {
        let path = self.resolve(file_name)?;
        let archive = path.clone();
        let file_name = file_name.to_string();
        tokio::task::spawn_blocking(move || read_descriptor(&archive, file_name))
            .await
            .map_err(|e| LauncherError::Archive(path, e.to_string()))
    }

    /// Descriptors of every installed plugin, in listing order.
    pub async fn describe_all(&self) -> LauncherResult<Vec<PluginDescriptor>> {
        let mut descriptors = Vec::new();
        for file_name in self.list().await? {
            descriptors.push(self.describe(&file_name).await?);
        }
        Ok(descriptors)
    }

    fn resolve(&self, file_name: &str) -> LauncherResult<PathBuf> {
        let plain = Path::new(file_name)
            .file_name()
            .map(|n| n == file_name)
            .unwrap_or(false);
        if !plain {
            return Err(LauncherError::Validation(format!("invalid plugin file name: {}", file_name)));
        }
        Ok(self.dir.join(file_name))
    }
}

fn is_plugin_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(PLUGIN_EXTENSION))
        .unwrap_or(false)
}

/// Unreadable archives and missing metadata yield a descriptor with only the
/// file name filled in.
fn read_descriptor(path: &Path, file_name: String) -> PluginDescriptor {
    let mut descriptor = PluginDescriptor {
        file_name,
        ..PluginDescriptor::default()
    };

    let metadata = match read_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) => {
            debug!("No readable metadata in {}: {}", path.display(), e);
            return descriptor;
        }
    };

    match serde_yaml::from_str::<Value>(&metadata) {
        Ok(yaml) => {
            descriptor.name = yaml_text(yaml.get("name"));
            descriptor.version = yaml_text(yaml.get("version"));
            descriptor.author = match yaml.get("author") {
                Some(author) => yaml_text(Some(author)),
                None => yaml_text(yaml.get("authors")),
            };
        }
        Err(e) => warn!("Invalid {} in {}: {}", METADATA_ENTRY, path.display(), e),
    }
    descriptor
}

fn read_metadata(path: &Path) -> Result<String, String> {
    let file = File::open(path).map_err(|e| e.to_string())?;
    let mut archive = ZipArchive::new(file).map_err(|e| e.to_string())?;
    let mut entry = archive.by_name(METADATA_ENTRY).map_err(|e| e.to_string())?;
    let mut content = String::new();
    entry.read_to_string(&mut content).map_err(|e| e.to_string())?;
    Ok(content)
}

/// Scalars as text; sequences joined with `", "`.
fn yaml_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Sequence(items)) => items
            .iter()
            .map(|item| yaml_text(Some(item)))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn write_jar(path: &Path, metadata: Option<&str>) {
        let mut writer = ZipWriter::new(File::create(path).unwrap());
        let options = SimpleFileOptions::default();
        writer.start_file("com/example/Main.class", options).unwrap();
        writer.write_all(b"\xca\xfe\xba\xbe").unwrap();
        if let Some(metadata) = metadata {
            writer.start_file(METADATA_ENTRY, options).unwrap();
            writer.write_all(metadata.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[tokio::test]
    async fn test_list_only_archives_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let store = PluginStore::new(dir.path().join("plugins"));
        assert!(store.list().await.unwrap().is_empty());

        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(store.dir().join("WorldEdit.jar"), b"").unwrap();
        std::fs::write(store.dir().join("Essentials.jar"), b"").unwrap();
        std::fs::write(store.dir().join("notes.txt"), b"").unwrap();
        std::fs::create_dir(store.dir().join("Essentials")).unwrap();

        assert_eq!(store.list().await.unwrap(), vec!["Essentials.jar", "WorldEdit.jar"]);
    }

    #[tokio::test]
    async fn test_install_refuses_overwrite_unless_asked() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("Essentials.jar");
        std::fs::write(&source, b"v1").unwrap();
        let store = PluginStore::new(dir.path().join("plugins"));

        let installed = store.install(&source, false).await.unwrap();
        assert_eq!(std::fs::read(&installed).unwrap(), b"v1");

        std::fs::write(&source, b"v2").unwrap();
        assert!(matches!(
            store.install(&source, false).await,
            Err(LauncherError::Validation(_))
        ));
        store.install(&source, true).await.unwrap();
        assert_eq!(std::fs::read(&installed).unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_install_rejects_non_archives() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("readme.md");
        std::fs::write(&source, b"hi").unwrap();
        let store = PluginStore::new(dir.path().join("plugins"));

        assert!(store.install(&source, false).await.is_err());
        assert!(store.install(&dir.path().join("missing.jar"), false).await.is_err());
    }

    #[tokio::test]
    async fn test_remove_reports_whether_anything_was_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let store = PluginStore::new(dir.path());
        std::fs::write(dir.path().join("Old.jar"), b"").unwrap();

        assert!(store.remove("Old.jar").await.unwrap());
        assert!(!store.remove("Old.jar").await.unwrap());
        assert!(store.remove("../escape.jar").await.is_err());
    }

    #[tokio::test]
    async fn test_describe_reads_plugin_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let store = PluginStore::new(dir.path());
        write_jar(
            &dir.path().join("Essentials.jar"),
            Some("name: Essentials\nversion: 2.20.1\nmain: com.earth2me.essentials.Essentials\nauthors: [zenexer, snowleo]\n"),
        );
        write_jar(&dir.path().join("Bare.jar"), None);
        std::fs::write(dir.path().join("Broken.jar"), b"not a zip").unwrap();

        let essentials = store.describe("Essentials.jar").await.unwrap();
        assert_eq!(essentials.name, "Essentials");
        assert_eq!(essentials.version, "2.20.1");
        assert_eq!(essentials.author, "zenexer, snowleo");

        let bare = store.describe("Bare.jar").await.unwrap();
        assert_eq!(bare.file_name, "Bare.jar");
        assert!(bare.name.is_empty());

        let broken = store.describe("Broken.jar").await.unwrap();
        assert!(broken.version.is_empty());

        assert_eq!(store.describe_all().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_numeric_version_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = PluginStore::new(dir.path());
        write_jar(&dir.path().join("Tiny.jar"), Some("name: Tiny\nversion: 1.5\nauthor: someone\n"));

        let tiny = store.describe("Tiny.jar").await.unwrap();
        assert_eq!(tiny.version, "1.5");
        assert_eq!(tiny.author, "someone");
    }
}
