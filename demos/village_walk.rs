/// Village Walk example — the elder's dialogue hands off to the rat quest.
///
/// Talks the player through the intro, fires the quest offer event, then
/// plays the quest to completion with a save and reload in the middle.
///
/// Run with: cargo run --example village_walk

use narrative_graph::core::executor::{Advance, ExecutorState, NodeView, Observation};
use narrative_graph::core::host::ConditionFlags;
use narrative_graph::core::library::NarrativeLibrary;
use narrative_graph::core::store::StateStore;
use narrative_graph::core::table::EventIndex;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let library = NarrativeLibrary::builder()
        .graphs_dir("tests/fixtures/graphs")
        .conditions("tests/fixtures/conditions.ron")
        .settings_path("tests/fixtures/settings.ron")
        .build()
        .expect("Failed to build narrative library");

    // --- Dialogue: the elder ---
    let intro = library.get("village_intro").expect("missing village_intro");
    let talk = library.executor("village_intro").expect("missing village_intro");
    let mut flags = ConditionFlags::new(&intro);
    flags.set("is_hero", true);

    let (mut state, observation) = talk.activate();
    show(&observation);
    let mut quest_offered = false;
    loop {
        let options = talk
            .available_transitions(&state, &flags)
            .expect("state belongs to this table");
        let Some(first) = options.first() else { break };
        if let Some(label) = &first.label {
            println!("  > {}", label);
        }
        match talk.advance(&mut state, first.edge, &flags).expect("offered edge") {
            Advance::Moved(observation) => show(&observation),
            Advance::Finished { observation, outcome } => {
                show(&observation);
                println!("(conversation ended: {:?})", outcome);
            }
        }
        let mut on_event = |_: EventIndex, name: &str| {
            println!("  [event] {}", name);
            quest_offered |= name == "Rat Quest Offered";
        };
        talk.dispatch_events(&mut state, &mut on_event)
            .expect("state belongs to this table");
    }

    if !quest_offered {
        println!("The elder never offered the quest.");
        return;
    }

    // --- Quest: the cellar ---
    let quest_table = library.get("rat_quest").expect("missing rat_quest");
    let quest = library.executor("rat_quest").expect("missing rat_quest");
    let mut quest_flags = ConditionFlags::new(&quest_table);
    quest_flags.set("has_cellar_key", true);

    let (mut state, observation) = quest.activate();
    show(&observation);
    step(&quest, &mut state, &quest_flags);
    step(&quest, &mut state, &quest_flags);

    for _ in 0..2 {
        if let Ok(Some(p)) = quest.record_task(&mut state, "kill_rat", 1) {
            println!("  Rats: {}/{}", p.progress, p.quantity);
        }
    }

    // Save and reload mid-quest, as a game would across sessions.
    let saved = StateStore::to_bytes(&state, &quest_table).expect("save");
    let mut state = StateStore::from_bytes(&saved, &quest_table).expect("load");
    println!("  (saved {} bytes and reloaded)", saved.len());

    if let Ok(Some(p)) = quest.record_task(&mut state, "kill_rat", 1) {
        println!("  Rats: {}/{}", p.progress, p.quantity);
    }
    while !quest.is_terminal(&state).expect("state belongs to this table") {
        step(&quest, &mut state, &quest_flags);
    }
    println!(
        "Quest finished: {:?}",
        quest.outcome(&state).expect("state belongs to this table")
    );
}

/// Take the last offered transition, skipping optional side tasks.
fn step(
    exec: &narrative_graph::core::executor::Executor<'_>,
    state: &mut ExecutorState,
    flags: &ConditionFlags<'_>,
) {
    let options = exec
        .available_transitions(state, flags)
        .expect("state belongs to this table");
    let Some(option) = options.last() else {
        println!("  (stuck)");
        std::process::exit(1);
    };
    let advance = exec.advance(state, option.edge, flags).expect("offered edge");
    show(advance.observation());
}

fn show(observation: &Observation) {
    match &observation.view {
        NodeView::Line { speaker, text } => println!("{}: {}", speaker, text),
        NodeView::Choice { speaker, prompt } => println!("{}: {}", speaker, prompt),
        NodeView::Task {
            description,
            progress,
            quantity,
            ..
        } => println!("Task: {} ({}/{})", description, progress, quantity),
        NodeView::Branch { description } => println!("Journal: {}", description),
        NodeView::Event { event } => println!("(event node: {})", event),
        NodeView::Gate { condition, .. } => println!("(waiting for {})", condition),
    }
}
