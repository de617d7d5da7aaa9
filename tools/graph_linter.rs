/// Graph Linter — validates dialogue and quest graph files.
///
/// Usage: graph_linter <graph_dir|graph_file> [--conditions <file>] [--settings <file>]
///
/// Prints every validation finding plus authoring warnings, and exits with
/// status 1 if any graph has findings or fails to load.

use narrative_graph::core::host::ConditionCatalog;
use narrative_graph::core::settings::NarrativeSettings;
use narrative_graph::core::validator::{lint_warnings, validate};
use narrative_graph::schema::graph::Graph;
use std::path::{Path, PathBuf};
use std::process;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        println!("Usage: graph_linter <graph_dir|graph_file> [--conditions <file>] [--settings <file>]");
        process::exit(0);
    }

    let graph_path = Path::new(&args[1]);
    let mut conditions_path = None;
    let mut settings_path = None;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--conditions" if i + 1 < args.len() => {
                i += 1;
                conditions_path = Some(args[i].clone());
            }
            "--settings" if i + 1 < args.len() => {
                i += 1;
                settings_path = Some(args[i].clone());
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                process::exit(1);
            }
        }
        i += 1;
    }

    let catalog = match conditions_path {
        Some(ref path) => match ConditionCatalog::load_from_ron(Path::new(path)) {
            Ok(catalog) => catalog,
            Err(e) => {
                eprintln!("ERROR: Failed to load condition catalog: {}", e);
                process::exit(1);
            }
        },
        None => ConditionCatalog::new(),
    };

    let settings = match settings_path {
        Some(ref path) => match NarrativeSettings::load_from_ron(Path::new(path)) {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("ERROR: Failed to load settings: {}", e);
                process::exit(1);
            }
        },
        None => NarrativeSettings::default(),
    };

    let files = if graph_path.is_file() {
        vec![graph_path.to_path_buf()]
    } else if graph_path.is_dir() {
        let mut files = Vec::new();
        collect_graph_files(graph_path, &mut files);
        files.sort();
        files
    } else {
        eprintln!("ERROR: Path '{}' does not exist", graph_path.display());
        process::exit(1);
    };

    println!("Checking {} graph file(s) against {} known condition(s)", files.len(), catalog.len());

    let mut errors = 0;
    let mut warnings = 0;

    for file in &files {
        let graph = match Graph::load_from_ron(file) {
            Ok(graph) => graph,
            Err(e) => {
                println!("ERROR: {}: {}", file.display(), e);
                errors += 1;
                continue;
            }
        };

        println!("\n=== {} ({:?}, {} nodes) ===", graph.id(), graph.kind(), graph.node_count());

        let findings = validate(&graph, &catalog);
        for finding in &findings {
            println!("ERROR: {}", finding);
        }
        errors += findings.len();

        if settings.enable_warnings {
            let lints = lint_warnings(&graph);
            for lint in &lints {
                println!("WARNING: node '{}': {}", lint.node, lint.message);
            }
            warnings += lints.len();
        }

        if findings.is_empty() {
            println!("OK");
        }
    }

    println!("\nSummary: {} errors, {} warnings", errors, warnings);

    if errors == 0 {
        process::exit(0);
    } else {
        process::exit(1);
    }
}

fn collect_graph_files(dir: &Path, files: &mut Vec<PathBuf>) {
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                collect_graph_files(&path, files);
            } else if path.extension().and_then(|s| s.to_str()) == Some("ron") {
                files.push(path);
            }
        }
    }
}
