//! Declaration loading.
//!
//! The loader gathers [`SourceFile`]s (added in code or read from `*.json`
//! files), walks their items including nested namespaces, and pairs every
//! exported model declaration with the runtime [`ModelClass`] exported under
//! the same name. A model whose class cannot be resolved is skipped with a
//! warning; the rest of the load goes on.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::class::ModelClass;
use crate::decl::{ClassDecl, SourceFile, SourceItem};
use crate::decorators::class_metadata;
use crate::error::ConfigError;

/// Export table: runtime classes by class name.
#[derive(Debug, Default, Clone)]
pub struct ClassTable {
    classes: HashMap<String, Arc<ModelClass>>,
}

impl ClassTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Exports `class` under its name, replacing a previous export.
    pub fn export(&mut self, class: Arc<ModelClass>) -> &mut Self {
        self.classes.insert(class.name().to_string(), class);
        self
    }

    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Arc<ModelClass>> {
        self.classes.get(name).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

/// A model declaration paired with its runtime class.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub decl: ClassDecl,
    pub class: Arc<ModelClass>,
    /// Path of the source file declaring the model.
    pub source: String,
}

/// Result of a load.
#[derive(Debug, Default, Clone)]
pub struct LoadedSources {
    /// Every class declaration seen, by name; used to resolve superclasses.
    pub classes: HashMap<String, ClassDecl>,
    /// Exported model declarations in load order.
    pub models: Vec<LoadedModel>,
}

/// Collects model sources.
#[derive(Debug, Default)]
pub struct DeclarationLoader {
    sources: Vec<SourceFile>,
}

impl DeclarationLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_source(&mut self, source: SourceFile) -> &mut Self {
        self.sources.push(source);
        self
    }

    /// Reads one JSON source file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] or [`ConfigError::Parse`].
    pub fn load_file(&mut self, path: &Path) -> Result<&mut Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut source: SourceFile =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if source.path.is_empty() {
            source.path = path.display().to_string();
        }
        debug!(path = %path.display(), items = source.items.len(), "model source read");
        self.sources.push(source);
        Ok(self)
    }

    /// Reads every `*.json` file below `dir`, recursively, in path order.
    /// Returns the number of files read.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] or [`ConfigError::Parse`].
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut entries = fs::read_dir(dir)
            .map_err(io_err)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(io_err)?;
        entries.sort();

        let mut count = 0;
        for path in entries {
            if path.is_dir() {
                count += self.load_dir(&path)?;
            } else if path.extension().is_some_and(|ext| ext == "json") {
                self.load_file(&path)?;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Names of every class declared in the collected sources, namespaces
    /// included, in declaration order.
    #[must_use]
    pub fn class_names(&self) -> Vec<String> {
        fn walk(items: &[SourceItem], names: &mut Vec<String>) {
            for item in items {
                match item {
                    SourceItem::Class(decl) => names.push(decl.name.clone()),
                    SourceItem::Namespace { items, .. } => walk(items, names),
                }
            }
        }
        let mut names = Vec::new();
        for source in &self.sources {
            walk(&source.items, &mut names);
        }
        names
    }

    /// Resolves the collected declarations against `table`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidDecorator`] for a malformed model marker.
    pub fn load(&self, table: &ClassTable) -> Result<LoadedSources, ConfigError> {
        let mut loaded = LoadedSources::default();
        for source in &self.sources {
            visit(&source.path, &source.items, table, &mut loaded)?;
        }
        info!(
            classes = loaded.classes.len(),
            models = loaded.models.len(),
            "model declarations loaded"
        );
        Ok(loaded)
    }
}

fn visit(
    path: &str,
    items: &[SourceItem],
    table: &ClassTable,
    loaded: &mut LoadedSources,
) -> Result<(), ConfigError> {
    for item in items {
        match item {
            SourceItem::Namespace { name, items } => {
                debug!(namespace = %name, "visiting namespace");
                visit(path, items, table, loaded)?;
            }
            SourceItem::Class(decl) => {
                loaded.classes.insert(decl.name.clone(), decl.clone());
                if !decl.exported || class_metadata(decl)?.is_none() {
                    continue;
                }
                match table.resolve(&decl.name) {
                    Some(class) => loaded.models.push(LoadedModel {
                        decl: decl.clone(),
                        class,
                        source: path.to_string(),
                    }),
                    None => warn!(
                        class = %decl.name,
                        source = %path,
                        "class not found among exports, skipping model"
                    ),
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl::PropertyDecl;

    fn table(names: &[&str]) -> ClassTable {
        let mut table = ClassTable::new();
        for name in names {
            table.export(ModelClass::plain(*name));
        }
        table
    }

    #[test]
    fn unresolved_exports_are_skipped() {
        let mut loader = DeclarationLoader::new();
        loader.add_source(
            SourceFile::new("a.json")
                .class(ClassDecl::model("User"))
                .class(ClassDecl::model("Ghost")),
        );
        let loaded = loader.load(&table(&["User"])).unwrap();
        assert_eq!(loaded.models.len(), 1);
        assert_eq!(loaded.models[0].decl.name, "User");
        assert!(loaded.classes.contains_key("Ghost"));
    }

    #[test]
    fn non_models_and_private_classes_are_not_loaded() {
        let mut loader = DeclarationLoader::new();
        loader.add_source(
            SourceFile::new("a.json")
                .class(ClassDecl::new("Base").property(PropertyDecl::new("note", "string")))
                .class(ClassDecl::model("Hidden").not_exported())
                .namespace(
                    "billing",
                    vec![SourceItem::Class(ClassDecl::model("Invoice"))],
                ),
        );
        let loaded = loader.load(&table(&["Base", "Hidden", "Invoice"])).unwrap();
        let names: Vec<_> = loaded.models.iter().map(|m| m.decl.name.as_str()).collect();
        assert_eq!(names, vec!["Invoice"]);
        assert_eq!(loaded.classes.len(), 3);
        assert_eq!(loader.class_names(), vec!["Base", "Hidden", "Invoice"]);
    }

    #[test]
    fn directories_are_read_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        fs::create_dir(&nested).unwrap();
        fs::write(
            dir.path().join("user.json"),
            r#"{ "items": [{ "kind": "class", "name": "User", "decorators": [{ "name": "model" }] }] }"#,
        )
        .unwrap();
        fs::write(
            nested.join("pet.json"),
            r#"{ "items": [{ "kind": "class", "name": "Pet", "decorators": [{ "name": "model" }] }] }"#,
        )
        .unwrap();
        fs::write(dir.path().join("README.md"), "ignored").unwrap();

        let mut loader = DeclarationLoader::new();
        assert_eq!(loader.load_dir(dir.path()).unwrap(), 2);
        let loaded = loader.load(&table(&["User", "Pet"])).unwrap();
        assert_eq!(loaded.models.len(), 2);
        assert!(loaded.models.iter().any(|m| m.source.ends_with("pet.json")));
    }

    #[test]
    fn malformed_json_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("broken.json");
        fs::write(&file, "{ nope").unwrap();
        let err = DeclarationLoader::new().load_file(&file).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { path, .. } if path == file));
    }
}
