//! Loads graph files, compiles them and shares the tables.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::core::compiler::{compile, CompileError};
use crate::core::executor::Executor;
use crate::core::host::ConditionCatalog;
use crate::core::settings::{NarrativeSettings, SettingsError};
use crate::core::table::CompiledTable;
use crate::schema::graph::{Graph, SchemaError};

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),
    #[error("graph '{graph}' failed to compile: {source}")]
    Compile {
        graph: String,
        #[source]
        source: CompileError,
    },
    #[error("graph '{0}' is defined more than once")]
    DuplicateGraph(String),
    #[error("failed to load {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: SchemaError,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Every compiled graph of a game, keyed by graph id.
#[derive(Debug, Clone)]
pub struct NarrativeLibrary {
    tables: BTreeMap<String, Arc<CompiledTable>>,
    catalog: ConditionCatalog,
    settings: NarrativeSettings,
}

/// Builder for a `NarrativeLibrary`. Directory and file paths are read in
/// `build`; the `with_*` methods supply content directly.
pub struct NarrativeLibraryBuilder {
    graphs_dir: Option<String>,
    conditions_path: Option<String>,
    settings_path: Option<String>,
    graphs: Vec<Graph>,
    catalog: Option<ConditionCatalog>,
    settings: Option<NarrativeSettings>,
}

impl NarrativeLibrary {
    pub fn builder() -> NarrativeLibraryBuilder {
        NarrativeLibraryBuilder {
            graphs_dir: None,
            conditions_path: None,
            settings_path: None,
            graphs: Vec::new(),
            catalog: None,
            settings: None,
        }
    }

    pub fn get(&self, graph_id: &str) -> Option<Arc<CompiledTable>> {
        self.tables.get(graph_id).cloned()
    }

    /// Graph ids in ascending order.
    pub fn graph_ids(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn catalog(&self) -> &ConditionCatalog {
        &self.catalog
    }

    pub fn settings(&self) -> &NarrativeSettings {
        &self.settings
    }

    /// An executor for one graph, configured with the library settings.
    pub fn executor(&self, graph_id: &str) -> Option<Executor<'_>> {
        self.tables
            .get(graph_id)
            .map(|table| Executor::with_settings(table, self.settings.clone()))
    }
}

impl NarrativeLibraryBuilder {
    /// Load every `.ron` graph in this directory.
    pub fn graphs_dir(mut self, path: &str) -> Self {
        self.graphs_dir = Some(path.to_string());
        self
    }

    /// RON list of condition names the host can evaluate.
    pub fn conditions(mut self, path: &str) -> Self {
        self.conditions_path = Some(path.to_string());
        self
    }

    pub fn settings_path(mut self, path: &str) -> Self {
        self.settings_path = Some(path.to_string());
        self
    }

    /// Add a graph directly (for testing without files).
    pub fn with_graph(mut self, graph: Graph) -> Self {
        self.graphs.push(graph);
        self
    }

    /// Provide the condition catalog directly; merged with any file.
    pub fn with_catalog(mut self, catalog: ConditionCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Provide settings directly; takes precedence over `settings_path`.
    pub fn with_settings(mut self, settings: NarrativeSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn build(self) -> Result<NarrativeLibrary, LibraryError> {
        let settings = match (self.settings, &self.settings_path) {
            (Some(settings), _) => settings,
            (None, Some(path)) if Path::new(path).exists() => {
                NarrativeSettings::load_from_ron(Path::new(path))?
            }
            (None, Some(path)) => {
                tracing::warn!("Settings file '{}' not found, using defaults", path);
                NarrativeSettings::default()
            }
            (None, None) => NarrativeSettings::default(),
        };

        let mut catalog = self.catalog.unwrap_or_default();
        if let Some(ref path) = self.conditions_path {
            if Path::new(path).exists() {
                catalog.merge(ConditionCatalog::load_from_ron(Path::new(path))?);
            } else {
                tracing::warn!("Condition catalog '{}' not found, skipping", path);
            }
        }

        let mut graphs = self.graphs;
        if let Some(ref dir) = self.graphs_dir {
            if Path::new(dir).exists() {
                load_ron_files_from_dir(dir, |path| {
                    let graph = Graph::load_from_ron(path).map_err(|source| LibraryError::File {
                        path: path.to_path_buf(),
                        source,
                    })?;
                    graphs.push(graph);
                    Ok(())
                })?;
            } else {
                tracing::warn!("Graph directory '{}' not found, skipping", dir);
            }
        }

        let mut tables = BTreeMap::new();
        for graph in &graphs {
            if tables.contains_key(graph.id()) {
                return Err(LibraryError::DuplicateGraph(graph.id().to_string()));
            }
            let table = compile(graph, &catalog).map_err(|source| LibraryError::Compile {
                graph: graph.id().to_string(),
                source,
            })?;
            tables.insert(graph.id().to_string(), Arc::new(table));
        }

        tracing::info!(
            "Narrative library ready: {} graph(s), {} known condition(s)",
            tables.len(),
            catalog.len()
        );
        Ok(NarrativeLibrary {
            tables,
            catalog,
            settings,
        })
    }
}

/// Call `loader` for every `.ron` file in `dir`, in file name order.
pub fn load_ron_files_from_dir<F>(dir: &str, mut loader: F) -> Result<(), LibraryError>
where
    F: FnMut(&Path) -> Result<(), LibraryError>,
{
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|s| s.to_str()) == Some("ron") {
            paths.push(path);
        }
    }
    paths.sort();
    for path in &paths {
        loader(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::edge::{Edge, Guard};
    use crate::schema::graph::GraphKind;
    use crate::schema::node::{Node, Outcome};
    use std::sync::Mutex;

    fn greeting(id: &str) -> Graph {
        let mut g = Graph::new(id, GraphKind::Dialogue);
        g.add_node(Node::say("hi", "Innkeeper", "Welcome!")).unwrap();
        g.add_node(Node::say("bye", "Innkeeper", "Safe travels.")).unwrap();
        g.add_edge(Edge::new("e1", "hi", "bye").with_guard(Guard::new("inn_open")))
            .unwrap();
        g.set_entry("hi").unwrap();
        g.mark_terminal("bye", Outcome::Success).unwrap();
        g
    }

    #[test]
    fn builds_from_direct_content() {
        let library = NarrativeLibrary::builder()
            .with_graph(greeting("inn"))
            .with_graph(greeting("tavern"))
            .with_catalog(ConditionCatalog::from_names(["inn_open"]))
            .build()
            .unwrap();
        assert_eq!(library.graph_ids().collect::<Vec<_>>(), vec!["inn", "tavern"]);
        let table = library.get("inn").unwrap();
        assert_eq!(table.node_count(), 2);
        assert!(library.executor("tavern").is_some());
        assert!(library.get("castle").is_none());
    }

    #[test]
    fn compile_failure_names_the_graph() {
        let err = NarrativeLibrary::builder()
            .with_graph(greeting("inn"))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            LibraryError::Compile { ref graph, source: CompileError::InvalidGraph(_) } if graph == "inn"
        ));
    }

    #[test]
    fn duplicate_graph_ids_rejected() {
        let err = NarrativeLibrary::builder()
            .with_graph(greeting("inn"))
            .with_graph(greeting("inn"))
            .with_catalog(ConditionCatalog::from_names(["inn_open"]))
            .build()
            .unwrap_err();
        assert!(matches!(err, LibraryError::DuplicateGraph(id) if id == "inn"));
    }

    #[test]
    fn missing_paths_are_skipped() {
        let library = NarrativeLibrary::builder()
            .graphs_dir("does/not/exist")
            .conditions("does/not/exist.ron")
            .settings_path("does/not/exist.ron")
            .build()
            .unwrap();
        assert!(library.is_empty());
        assert_eq!(library.settings(), &NarrativeSettings::default());
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn warnings_during<T>(f: impl FnOnce() -> T) -> String {
        let buffer = LogBuffer::default();
        let sink = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || sink.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = buffer.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn every_missing_path_is_warned_about() {
        let log = warnings_during(|| {
            NarrativeLibrary::builder()
                .graphs_dir("does/not/exist")
                .conditions("no/conditions.ron")
                .settings_path("no/settings.ron")
                .build()
                .unwrap()
        });
        assert!(log.contains("Graph directory 'does/not/exist' not found"), "{}", log);
        assert!(log.contains("Condition catalog 'no/conditions.ron' not found"), "{}", log);
        assert!(log.contains("Settings file 'no/settings.ron' not found"), "{}", log);
    }

    #[test]
    fn explicit_settings_skip_the_file() {
        let log = warnings_during(|| {
            NarrativeLibrary::builder()
                .settings_path("no/settings.ron")
                .with_settings(NarrativeSettings::default())
                .build()
                .unwrap()
        });
        assert!(!log.contains("Settings file"), "{}", log);
    }

    #[test]
    fn shared_tables_are_the_same_allocation() {
        let library = NarrativeLibrary::builder()
            .with_graph(greeting("inn"))
            .with_catalog(ConditionCatalog::from_names(["inn_open"]))
            .build()
            .unwrap();
        let a = library.get("inn").unwrap();
        let b = library.get("inn").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
