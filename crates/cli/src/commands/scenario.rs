//! Input files for `plan` and `simulate`.
//!
//! A file holds either a bare JSON array of Intents or a scenario object that
//! also describes the workbooks to seed before execution:
//!
//! ```json
//! {
//!   "workbooks": [
//!     { "container": "book", "sheets": ["Sheet1"],
//!       "cells": [{ "range": "Sheet1!A1:B1", "values": [["Name", "Qty"]] }] }
//!   ],
//!   "intents": [{ "target": "book", "kind": "read_range", "range": "Sheet1!A1:B2" }]
//! }
//! ```

use serde::Deserialize;
use sheetgate_backend::InMemorySheets;
use sheetgate_core::{A1Range, ContainerId, Grid, Intent};
use std::collections::BTreeSet;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub workbooks: Vec<WorkbookSeed>,
    pub intents: Vec<Intent>,
}

#[derive(Debug, Deserialize)]
pub struct WorkbookSeed {
    pub container: String,
    #[serde(default = "default_sheets")]
    pub sheets: Vec<String>,
    #[serde(default)]
    pub cells: Vec<CellSeed>,
}

#[derive(Debug, Deserialize)]
pub struct CellSeed {
    pub range: A1Range,
    pub values: Grid,
}

fn default_sheets() -> Vec<String> {
    vec![DEFAULT_SHEET.to_string()]
}

const DEFAULT_SHEET: &str = "Sheet1";

#[derive(Deserialize)]
#[serde(untagged)]
enum ScenarioFile {
    Intents(Vec<Intent>),
    Scenario(Scenario),
}

impl Scenario {
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        Ok(match serde_json::from_str::<ScenarioFile>(json)? {
            ScenarioFile::Intents(intents) => Scenario {
                workbooks: Vec::new(),
                intents,
            },
            ScenarioFile::Scenario(scenario) => scenario,
        })
    }

    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
        Ok(Self::parse(&content).map_err(|e| format!("Failed to parse {}: {e}", path.display()))?)
    }

    /// Every container the scenario touches, seeded or targeted.
    pub fn containers(&self) -> BTreeSet<ContainerId> {
        self.workbooks
            .iter()
            .map(|w| ContainerId::new(w.container.clone()))
            .chain(self.intents.iter().map(|i| i.target().clone()))
            .collect()
    }

    /// Create and seed every workbook. Targets without a seed get an empty
    /// workbook with a single default sheet.
    pub async fn seed(&self, sheets: &InMemorySheets) -> Result<(), Box<dyn std::error::Error>> {
        for workbook in &self.workbooks {
            let titles: Vec<&str> = workbook.sheets.iter().map(String::as_str).collect();
            sheets.create_workbook(workbook.container.clone(), &titles).await;
            for cells in &workbook.cells {
                sheets
                    .seed(&workbook.container, &cells.range, &cells.values)
                    .await
                    .map_err(|e| format!("Failed to seed {} {}: {e}", workbook.container, cells.range))?;
            }
        }

        let seeded: BTreeSet<&str> = self.workbooks.iter().map(|w| w.container.as_str()).collect();
        for container in self.containers() {
            if !seeded.contains(container.as_str()) {
                sheets
                    .create_workbook(container.as_str(), &[DEFAULT_SHEET])
                    .await;
            }
        }
        Ok(())
    }

    /// The Intents addressed to one container.
    pub fn intents_for(&self, container: &ContainerId) -> Vec<Intent> {
        self.intents
            .iter()
            .filter(|i| i.target() == container)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetgate_core::IntentKind;

    #[test]
    fn bare_intent_array_is_accepted() {
        let scenario = Scenario::parse(
            r#"[{"target": "book", "kind": "clear_range", "range": "Sheet1!A1:B2"}]"#,
        )
        .unwrap();
        assert!(scenario.workbooks.is_empty());
        assert_eq!(scenario.intents.len(), 1);
        assert!(matches!(scenario.intents[0].kind(), IntentKind::ClearRange { .. }));
    }

    #[test]
    fn scenario_object_with_defaults() {
        let scenario = Scenario::parse(
            r#"{
                "workbooks": [{"container": "book"}],
                "intents": [{"target": "other", "kind": "add_sheet", "title": "Q3"}]
            }"#,
        )
        .unwrap();
        assert_eq!(scenario.workbooks[0].sheets, vec!["Sheet1".to_string()]);
        let containers: Vec<String> = scenario
            .containers()
            .into_iter()
            .map(|c| c.as_str().to_string())
            .collect();
        assert_eq!(containers, vec!["book".to_string(), "other".to_string()]);
    }

    #[test]
    fn unknown_intent_kind_is_rejected() {
        assert!(Scenario::parse(r#"[{"target": "book", "kind": "rename_sheet"}]"#).is_err());
    }

    #[test]
    fn load_reads_scenario_from_disk() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"[{{"target": "book", "kind": "write_range", "range": "Sheet1!A1", "values": [[1]]}}]"#
        )
        .unwrap();
        let scenario = Scenario::load(file.path()).unwrap();
        assert_eq!(scenario.intents.len(), 1);

        let mut broken = tempfile::NamedTempFile::new().unwrap();
        writeln!(broken, "{{ not json").unwrap();
        let err = Scenario::load(broken.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));

        assert!(Scenario::load(std::path::Path::new("/nonexistent/scenario.json")).is_err());
    }

    #[tokio::test]
    async fn seeding_creates_unseeded_targets() {
        let scenario = Scenario::parse(
            r#"{
                "workbooks": [{"container": "book", "cells": [{"range": "Sheet1!A1", "values": [["x"]]}]}],
                "intents": [{"target": "fresh", "kind": "read_range", "range": "Sheet1!A1"}]
            }"#,
        )
        .unwrap();
        let sheets = InMemorySheets::new("memory");
        scenario.seed(&sheets).await.unwrap();

        assert_eq!(sheets.snapshot("book").await.unwrap().len(), 1);
        assert!(sheets.snapshot("fresh").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn seeding_an_unknown_sheet_fails() {
        let scenario = Scenario::parse(
            r#"{
                "workbooks": [{"container": "book", "cells": [{"range": "Missing!A1", "values": [["x"]]}]}],
                "intents": []
            }"#,
        )
        .unwrap();
        let sheets = InMemorySheets::new("memory");
        assert!(scenario.seed(&sheets).await.is_err());
    }
}
