/// Quest integration tests — task progress, gates and the library loader.

use narrative_graph::core::compiler::compile;
use narrative_graph::core::executor::{Advance, Executor, ExecutorError, ExecutorState, NodeView};
use narrative_graph::core::host::{ConditionCatalog, ConditionFlags};
use narrative_graph::core::library::{LibraryError, NarrativeLibrary};
use narrative_graph::core::table::{CompiledTable, ConditionIndex};
use narrative_graph::schema::graph::Graph;
use narrative_graph::schema::node::Outcome;
use pretty_assertions::assert_eq;
use std::path::Path;

fn rat_quest() -> CompiledTable {
    let graph = Graph::load_from_ron(Path::new("tests/fixtures/graphs/rat_quest.ron")).unwrap();
    let catalog = ConditionCatalog::load_from_ron(Path::new("tests/fixtures/conditions.ron")).unwrap();
    compile(&graph, &catalog).unwrap()
}

fn edge_ids(exec: &Executor<'_>, state: &ExecutorState, flags: &ConditionFlags<'_>) -> Vec<String> {
    exec.available_transitions(state, flags)
        .unwrap()
        .iter()
        .map(|t| exec.table().edge(t.edge).unwrap().id.clone())
        .collect()
}

#[test]
fn kill_three_rats() {
    let table = rat_quest();
    let exec = Executor::new(&table);
    let mut flags = ConditionFlags::new(&table);
    let (mut state, start) = exec.activate();
    assert_eq!(
        start.view,
        NodeView::Branch {
            description: "The elder asked you to clear the cellar.".to_string()
        }
    );

    let to_door = exec.available_transitions(&state, &flags).unwrap();
    exec.advance(&mut state, to_door[0].edge, &flags).unwrap();
    assert!(edge_ids(&exec, &state, &flags).is_empty(), "door is locked");

    flags.set("has_cellar_key", true);
    let enter = exec.available_transitions(&state, &flags).unwrap();
    let observed = exec.advance(&mut state, enter[0].edge, &flags).unwrap();
    assert!(matches!(
        observed.observation().view,
        NodeView::Task { progress: 0, quantity: 3, .. }
    ));

    let kill = exec.task_index("kill_rats").unwrap();
    exec.progress_task(&mut state, kill, 1).unwrap();
    exec.progress_task(&mut state, kill, 1).unwrap();
    assert!(edge_ids(&exec, &state, &flags).is_empty());

    let third = exec.record_task(&mut state, "kill_rat", 1).unwrap().unwrap();
    assert!(third.newly_completed);
    assert_eq!(edge_ids(&exec, &state, &flags), vec!["hunt_king", "finish"]);

    flags.set("player_low_health", true);
    assert_eq!(edge_ids(&exec, &state, &flags), vec!["hunt_king", "finish", "flee"]);

    let finish = exec
        .available_transitions(&state, &flags)
        .unwrap()
        .into_iter()
        .find(|t| table.edge(t.edge).unwrap().id == "finish")
        .unwrap();
    let report = exec.advance(&mut state, finish.edge, &flags).unwrap();
    assert_eq!(
        report.observation().view,
        NodeView::Event {
            event: "cellar_cleared".to_string()
        }
    );
    let report_done = exec.available_transitions(&state, &flags).unwrap()[0].edge;
    let done = exec.advance(&mut state, report_done, &flags);
    assert!(matches!(done, Ok(Advance::Finished { outcome: Outcome::Success, .. })));

    let mut fired: Vec<String> = Vec::new();
    exec.dispatch_events(&mut state, &mut fired).unwrap();
    assert_eq!(fired, vec!["journal_updated".to_string(), "cellar_cleared".to_string()]);
}

#[test]
fn rats_killed_on_the_way_count() {
    let table = rat_quest();
    let exec = Executor::new(&table);
    let mut flags = ConditionFlags::new(&table);
    flags.set("has_cellar_key", true);

    let (mut state, _) = exec.activate();
    assert_eq!(exec.record_task(&mut state, "Kill_Rat", 2).unwrap(), None);
    for _ in 0..2 {
        let next = exec.available_transitions(&state, &flags).unwrap()[0].edge;
        exec.advance(&mut state, next, &flags).unwrap();
    }

    let kill = exec.task_index("kill_rats").unwrap();
    assert_eq!(exec.task_progress(&state, kill), Ok(2));
    assert!(edge_ids(&exec, &state, &flags).is_empty());
    let last = exec.record_task(&mut state, "kill_rat", 1).unwrap().unwrap();
    assert!(last.newly_completed);
    assert_eq!(edge_ids(&exec, &state, &flags), vec!["hunt_king", "finish"]);
    assert_eq!(exec.times_reported(&state, "kill_rat"), Ok(3));
}

#[test]
fn optional_hidden_task_passes_without_progress() {
    let table = rat_quest();
    let exec = Executor::new(&table);
    let (mut state, _) = exec.activate_at("find_king").unwrap();
    let never = |_: ConditionIndex| false;
    match exec.observe(&state).unwrap().view {
        NodeView::Task { hidden, optional, .. } => assert!(hidden && optional),
        other => panic!("expected a task, got {:?}", other),
    }
    let options = exec.available_transitions(&state, &never).unwrap();
    assert_eq!(options.len(), 1);
    exec.advance(&mut state, options[0].edge, &never).unwrap();
}

#[test]
fn task_string_ignores_case_and_spacing() {
    let table = rat_quest();
    let exec = Executor::new(&table);
    let (mut state, _) = exec.activate_at("find_king").unwrap();
    let progress = exec.record_task(&mut state, "Find_Rat King", 1).unwrap();
    assert!(progress.is_some_and(|p| p.completed));
}

#[test]
fn progress_on_branch_is_unknown_task() {
    let table = rat_quest();
    let exec = Executor::new(&table);
    let (mut state, _) = exec.activate();
    let before = state.clone();
    let start = table.node_index("start").unwrap();
    assert_eq!(
        exec.progress_task(&mut state, start, 1),
        Err(ExecutorError::UnknownTask(start))
    );
    assert_eq!(state, before);
}

#[test]
fn library_loads_fixture_directory() {
    let library = NarrativeLibrary::builder()
        .graphs_dir("tests/fixtures/graphs")
        .conditions("tests/fixtures/conditions.ron")
        .settings_path("tests/fixtures/settings.ron")
        .build()
        .unwrap();
    assert_eq!(
        library.graph_ids().collect::<Vec<_>>(),
        vec!["rat_quest", "village_intro"]
    );
    assert!(library.settings().reset_tasks_when_completed);
    assert_eq!(library.settings().line_seed, 1234);

    let table = library.get("rat_quest").unwrap();
    let same = rat_quest();
    assert_eq!(table.fingerprint(), same.fingerprint());

    let exec = library.executor("village_intro").unwrap();
    let (_, greeting) = exec.activate();
    assert_eq!(greeting.id, "greet");
}

#[test]
fn library_rejects_broken_graphs() {
    let err = NarrativeLibrary::builder()
        .graphs_dir("tests/fixtures/broken")
        .build()
        .unwrap_err();
    assert!(matches!(err, LibraryError::Compile { ref graph, .. } if graph == "lost_traveller"));
}

#[test]
fn tables_shared_across_threads() {
    let library = NarrativeLibrary::builder()
        .graphs_dir("tests/fixtures/graphs")
        .conditions("tests/fixtures/conditions.ron")
        .build()
        .unwrap();
    let table = library.get("rat_quest").unwrap();

    let handles: Vec<_> = (0..4)
        .map(|n| {
            let table = std::sync::Arc::clone(&table);
            std::thread::spawn(move || {
                let exec = Executor::new(&table);
                let (mut state, _) = exec.activate_at("kill_rats").unwrap();
                let kill = exec.task_index("kill_rats").unwrap();
                exec.progress_task(&mut state, kill, n).unwrap().progress
            })
        })
        .collect();
    let progress: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(progress, vec![0, 1, 2, 3]);
}
