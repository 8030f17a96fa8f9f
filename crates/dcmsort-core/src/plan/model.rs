use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A series reference inside a plan entry, optionally with extra template
/// parameters for that item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlanItem {
    Series(String),
    Parameterized {
        item: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        params: BTreeMap<String, String>,
    },
}

impl PlanItem {
    pub fn series_id(&self) -> &str {
        match self {
            PlanItem::Series(id) => id,
            PlanItem::Parameterized { item, .. } => item,
        }
    }

    pub fn params(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            PlanItem::Series(_) => None,
            PlanItem::Parameterized { params, .. } => Some(params),
        }
    }
}

/// One numbered slot of an entry. A group expands into sub-indexed items
/// that share the slot's `item` number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlanSlot {
    Single(PlanItem),
    Group(Vec<PlanItem>),
}

impl PlanSlot {
    pub fn items(&self) -> &[PlanItem] {
        match self {
            PlanSlot::Single(item) => std::slice::from_ref(item),
            PlanSlot::Group(items) => items,
        }
    }
}

/// `(output template, output types) -> matching series`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub template: String,
    pub outtypes: Vec<String>,
    #[serde(default)]
    pub items: Vec<PlanSlot>,
}

/// The heuristic's conversion plan for one subject/session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlanMapping {
    #[serde(default, rename = "entry")]
    pub entries: Vec<PlanEntry>,
}

impl PlanMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `item` to the entry for `(template, outtypes)`, creating it if needed.
    pub fn push(&mut self, template: &str, outtypes: &[String], item: PlanSlot) {
        self.entry_mut(template, outtypes).items.push(item);
    }

    /// The entry for `(template, outtypes)`, created empty if missing.
    pub fn entry_mut(&mut self, template: &str, outtypes: &[String]) -> &mut PlanEntry {
        let pos = self
            .entries
            .iter()
            .position(|e| e.template == template && e.outtypes == outtypes);
        let pos = match pos {
            Some(p) => p,
            None => {
                self.entries.push(PlanEntry {
                    template: template.to_string(),
                    outtypes: outtypes.to_vec(),
                    items: Vec::new(),
                });
                self.entries.len() - 1
            }
        };
        &mut self.entries[pos]
    }

    /// Every series id the plan refers to, in plan order.
    pub fn series_ids(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .flat_map(|e| e.items.iter())
            .flat_map(|slot| slot.items().iter())
            .map(|item| item.series_id())
    }

    pub fn to_toml(&self) -> Result<String, Error> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn from_toml(text: &str) -> Result<Self, Error> {
        Ok(toml::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hand_written_plan() {
        let text = r#"
[[entry]]
template = "anat/sub-{subject}_T1w"
outtypes = ["nii.gz"]
items = ["2-T1w"]

[[entry]]
template = "func/sub-{subject}_task-{task}_run-{item:02d}_bold"
outtypes = ["nii.gz", "dicom"]
items = [
    { item = "7-BOLD", params = { task = "rest" } },
    ["8-BOLD", "9-BOLD"],
]
"#;
        let plan = PlanMapping::from_toml(text).unwrap();
        assert_eq!(plan.entries.len(), 2);
        let ids: Vec<&str> = plan.series_ids().collect();
        assert_eq!(ids, vec!["2-T1w", "7-BOLD", "8-BOLD", "9-BOLD"]);
        let first_func = &plan.entries[1].items[0].items()[0];
        assert_eq!(
            first_func.params().and_then(|p| p.get("task")).map(String::as_str),
            Some("rest")
        );
        assert!(matches!(plan.entries[1].items[1], PlanSlot::Group(ref g) if g.len() == 2));
    }

    #[test]
    fn test_push_reuses_entry() {
        let mut plan = PlanMapping::new();
        let outtypes = vec!["nii.gz".to_string()];
        plan.push("run{item:03d}", &outtypes, PlanSlot::Single(PlanItem::Series("1-a".into())));
        plan.push("run{item:03d}", &outtypes, PlanSlot::Single(PlanItem::Series("2-b".into())));
        assert_eq!(plan.entries.len(), 1);
        assert_eq!(plan.entries[0].items.len(), 2);
    }

    #[test]
    fn test_toml_round_trip() {
        let mut plan = PlanMapping::new();
        let outtypes = vec!["nii.gz".to_string()];
        plan.push("run{item:03d}", &outtypes, PlanSlot::Single(PlanItem::Series("1-a".into())));
        plan.entry_mut("unused", &outtypes);
        let text = plan.to_toml().unwrap();
        assert_eq!(PlanMapping::from_toml(&text).unwrap(), plan);
    }
}
