//! `sheetgate plan`: Show the physical calls an Intent list compiles to.

use super::scenario::Scenario;
use sheetgate_batch::compile;
use std::path::Path;

pub async fn run(file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let scenario = Scenario::load(file)?;
    let batch = compile(&scenario.intents);

    eprintln!(
        "📋 {} intents → {} calls, {} fragments",
        batch.intent_count,
        batch.calls.len(),
        batch.fragment_count()
    );
    println!("{}", serde_json::to_string_pretty(&batch)?);
    Ok(())
}
