/// Preview — interactive walk-through of a dialogue or quest graph.
///
/// Usage: preview <graph_file> [--conditions <file>] [--settings <file>] [--seed <n>]
///
/// Commands:
///   look                   show the current node
///   options                list the transitions available right now
///   go <n>                 take option n
///   set <cond> / unset <cond>  toggle a host condition
///   tasks                  list task nodes with their progress
///   task <key> <amount>    progress a task node by key
///   do <task> [amount]     report a task string, e.g. `do kill_rat 1`
///   events                 dispatch and print pending events
///   save <file> / load <file>  persist or restore the walk
///   restart                start again from the entry
///   help                   list commands
///   quit                   exit

use narrative_graph::core::compiler::compile;
use narrative_graph::core::executor::{Advance, Executor, ExecutorState, NodeView, Observation};
use narrative_graph::core::host::{ConditionCatalog, ConditionFlags};
use narrative_graph::core::settings::NarrativeSettings;
use narrative_graph::core::store::StateStore;
use narrative_graph::core::table::{CompiledTable, EventIndex};
use narrative_graph::schema::graph::Graph;
use std::fs::File;
use std::io::{self, BufRead, Write};
use std::path::Path;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage();
        return;
    }

    let graph_path = args[1].clone();
    let mut conditions_path = None;
    let mut settings_path = None;
    let mut seed = None;

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
            "--seed" if i + 1 < args.len() => {
                i += 1;
                seed = args[i].parse::<u64>().ok();
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let graph = match Graph::load_from_ron(Path::new(&graph_path)) {
        Ok(graph) => graph,
        Err(e) => {
            eprintln!("ERROR: Failed to load graph: {}", e);
            std::process::exit(1);
        }
    };

    let catalog = match conditions_path {
        Some(ref path) => ConditionCatalog::load_from_ron(Path::new(path)).unwrap_or_else(|e| {
            eprintln!("ERROR: Failed to load conditions: {}", e);
            std::process::exit(1);
        }),
        None => ConditionCatalog::new(),
    };

    let mut settings = match settings_path {
        Some(ref path) => NarrativeSettings::load_from_ron(Path::new(path)).unwrap_or_else(|e| {
            eprintln!("ERROR: Failed to load settings: {}", e);
            std::process::exit(1);
        }),
        None => NarrativeSettings::default(),
    };
    if let Some(seed) = seed {
        settings.line_seed = seed;
    }

    let table = match compile(&graph, &catalog) {
        Ok(table) => table,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            if let narrative_graph::core::compiler::CompileError::InvalidGraph(findings) = &e {
                for finding in findings {
                    eprintln!("  {}", finding);
                }
            }
            std::process::exit(1);
        }
    };

    println!(
        "Loaded '{}' v{}: {} nodes, {} edges",
        table.graph_id(),
        table.version(),
        table.node_count(),
        table.edges().len()
    );
    println!("Type 'help' for commands.\n");

    let exec = Executor::with_settings(&table, settings);
    let mut flags = ConditionFlags::new(&table);
    let (mut state, observation) = exec.activate();
    print_observation(&observation);

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("preview> ");
        stdout.flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).is_err() || line.is_empty() {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        let cmd = parts[0].to_lowercase();

        match cmd.as_str() {
            "quit" | "exit" | "q" => {
                println!("Goodbye.");
                break;
            }
            "help" | "h" | "?" => print_help(),
            "look" => match exec.observe(&state) {
                Ok(observation) => print_observation(&observation),
                Err(e) => println!("ERROR: {}", e),
            },
            "options" | "o" => print_options(&exec, &state, &flags),
            "go" | "g" => {
                let choice = parts.get(1).and_then(|s| s.parse::<usize>().ok());
                let options = match exec.available_transitions(&state, &flags) {
                    Ok(options) => options,
                    Err(e) => {
                        println!("ERROR: {}", e);
                        continue;
                    }
                };
                let Some(transition) = choice.and_then(|n| n.checked_sub(1)).and_then(|n| options.get(n)) else {
                    println!("Usage: go <n>  (see 'options')");
                    continue;
                };
                match exec.advance(&mut state, transition.edge, &flags) {
                    Ok(Advance::Moved(observation)) => print_observation(&observation),
                    Ok(Advance::Finished { observation, outcome }) => {
                        print_observation(&observation);
                        println!("--- Finished: {:?} ---", outcome);
                    }
                    Err(e) => println!("ERROR: {}", e),
                }
            }
            "set" | "unset" => {
                let Some(name) = parts.get(1) else {
                    println!("Usage: {} <condition>", cmd);
                    continue;
                };
                if flags.set(name, cmd == "set") {
                    println!("{} = {}", name, cmd == "set");
                } else {
                    println!("Condition '{}' is not used by this graph.", name);
                }
            }
            "conditions" => {
                for condition in table.conditions() {
                    println!("  {} = {}", condition.name, flags.get(&condition.name));
                }
            }
            "tasks" => {
                for (key, task) in table.tasks() {
                    match exec.task_progress(&state, task) {
                        Ok(progress) => println!("  {} ({})", key, progress),
                        Err(e) => println!("ERROR: {}", e),
                    }
                }
            }
            "task" => {
                let (Some(key), Some(amount)) = (parts.get(1), parts.get(2).and_then(|s| s.parse::<u32>().ok())) else {
                    println!("Usage: task <key> <amount>");
                    continue;
                };
                let Some(task) = exec.task_index(key) else {
                    println!("Unknown task '{}'", key);
                    continue;
                };
                match exec.progress_task(&mut state, task, amount) {
                    Ok(p) => println!("Task progress: {}/{}{}", p.progress, p.quantity, if p.newly_completed { " (completed)" } else { "" }),
                    Err(e) => println!("ERROR: {}", e),
                }
            }
            "do" => {
                let Some(task_string) = parts.get(1) else {
                    println!("Usage: do <task_string> [amount]");
                    continue;
                };
                let amount = parts.get(2).and_then(|s| s.parse::<u32>().ok()).unwrap_or(1);
                match exec.record_task(&mut state, task_string, amount) {
                    Ok(Some(p)) => println!("Task progress: {}/{}", p.progress, p.quantity),
                    Ok(None) => println!("Logged '{}'; the current node is not waiting for it.", task_string),
                    Err(e) => println!("ERROR: {}", e),
                }
            }
            "events" => {
                let mut sink = |_: EventIndex, name: &str| println!("  event: {}", name);
                match exec.dispatch_events(&mut state, &mut sink) {
                    Ok(0) => println!("No pending events."),
                    Ok(_) => {}
                    Err(e) => println!("ERROR: {}", e),
                }
            }
            "save" => {
                let Some(path) = parts.get(1) else {
                    println!("Usage: save <file>");
                    continue;
                };
                let result = File::create(path)
                    .map_err(|e| e.to_string())
                    .and_then(|file| StateStore::save(&state, &table, file).map_err(|e| e.to_string()));
                match result {
                    Ok(()) => println!("Saved to {}", path),
                    Err(e) => println!("ERROR: {}", e),
                }
            }
            "load" => {
                let Some(path) = parts.get(1) else {
                    println!("Usage: load <file>");
                    continue;
                };
                match load_state(path, &table) {
                    Ok(loaded) => {
                        state = loaded;
                        if let Ok(observation) = exec.observe(&state) {
                            print_observation(&observation);
                        }
                    }
                    Err(e) => println!("ERROR: {}", e),
                }
            }
            "restart" => {
                let (fresh, observation) = exec.activate();
                StateStore::discard(std::mem::replace(&mut state, fresh));
                print_observation(&observation);
            }
            _ => {
                println!("Unknown command: {}. Type 'help' for commands.", cmd);
            }
        }
    }
}

fn load_state(path: &str, table: &CompiledTable) -> Result<ExecutorState, String> {
    let file = File::open(path).map_err(|e| e.to_string())?;
    StateStore::load(file, table).map_err(|e| e.to_string())
}

fn print_observation(observation: &Observation) {
    match &observation.view {
        NodeView::Line { speaker, text } => println!("[{}] {}: {}", observation.id, speaker, text),
        NodeView::Choice { speaker, prompt } => {
            println!("[{}] {}: {}  (choose with 'options' / 'go')", observation.id, speaker, prompt)
        }
        NodeView::Task {
            key,
            description,
            progress,
            quantity,
            hidden,
            optional,
        } => {
            println!(
                "[{}] Task '{}': {} ({}/{}){}{}",
                observation.id,
                key,
                description,
                progress,
                quantity,
                if *optional { " [optional]" } else { "" },
                if *hidden { " [hidden]" } else { "" }
            );
        }
        NodeView::Branch { description } => println!("[{}] Journal: {}", observation.id, description),
        NodeView::Event { event } => println!("[{}] Event fired: {}", observation.id, event),
        NodeView::Gate { condition, negate } => println!(
            "[{}] Waiting for {}{}",
            observation.id,
            if *negate { "not " } else { "" },
            condition
        ),
    }
}

fn print_options(exec: &Executor<'_>, state: &ExecutorState, flags: &ConditionFlags<'_>) {
    match exec.available_transitions(state, flags) {
        Ok(options) if options.is_empty() => {
            if exec.is_terminal(state).unwrap_or(false) {
                println!("The walk has ended.");
            } else {
                println!("No transitions available. Check tasks and conditions.");
            }
        }
        Ok(options) => {
            for (i, option) in options.iter().enumerate() {
                let target = exec
                    .table()
                    .node(option.to)
                    .map(|n| n.id.as_str())
                    .unwrap_or("?");
                match &option.label {
                    Some(label) => println!("  {}. {} -> {}", i + 1, label, target),
                    None => println!("  {}. -> {}", i + 1, target),
                }
            }
        }
        Err(e) => println!("ERROR: {}", e),
    }
}

fn print_usage() {
    println!("Usage: preview <graph_file> [--conditions <file>] [--settings <file>] [--seed <n>]");
}

fn print_help() {
    println!("Commands:");
    println!("  look                     show the current node");
    println!("  options                  list available transitions");
    println!("  go <n>                   take option n");
    println!("  set <cond> / unset <cond>  toggle a condition");
    println!("  conditions               list conditions and their values");
    println!("  tasks                    list task nodes with their progress");
    println!("  task <key> <amount>      progress a task node by key");
    println!("  do <task> [amount]       report a task string");
    println!("  events                   dispatch pending events");
    println!("  save <file> / load <file>  persist or restore the walk");
    println!("  restart                  start again from the entry");
    println!("  quit                     exit");
}
