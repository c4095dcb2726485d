use phaselane_core::checkpoint::checkpoints;

use crate::output::{print_json, print_table};

pub fn run(json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(&checkpoints());
    }
    let rows = checkpoints()
        .iter()
        .map(|c| {
            vec![
                c.name.to_string(),
                c.source_phase.to_string(),
                c.reviewing_agent.to_string(),
                c.lane.to_string(),
                c.title.to_string(),
            ]
        })
        .collect();
    print_table(&["NAME", "PHASE", "REVIEWER", "LANE", "TITLE"], rows);
    Ok(())
}
