use super::filegroup::FileGroup;
use super::model::PlanMapping;
use crate::error::Error;
use crate::template::{self, TemplateParams};
use std::path::{Path, PathBuf};

/// One flat unit of conversion work.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionItem {
    /// Output path without extension.
    pub prefix: PathBuf,
    pub outtypes: Vec<String>,
    pub files: Vec<PathBuf>,
    pub series_id: String,
}

/// BIDS-style `sub-<subject>[_ses-<session>]` prefix.
pub fn bids_subject_session_prefix(subject: &str, session: Option<&str>) -> String {
    match session {
        Some(ses) => format!("sub-{}_ses-{}", subject, ses),
        None => format!("sub-{}", subject),
    }
}

/// BIDS-style `sub-<subject>[/ses-<session>]` directory.
pub fn bids_subject_session_dir(subject: &str, session: Option<&str>) -> String {
    match session {
        Some(ses) => format!("sub-{}/ses-{}", subject, ses),
        None => format!("sub-{}", subject),
    }
}

/// Expand a plan into flat conversion items under `outdir`.
///
/// Each slot of an entry is numbered `item` (1-based); members of a grouped
/// slot are numbered `subindex` (1-based). Item parameters are applied first
/// and the built-in parameters override them. Entries with no items are
/// skipped.
pub fn conversion_items(
    subject: &str,
    outdir: &Path,
    plan: &PlanMapping,
    filegroup: &FileGroup,
    session: Option<&str>,
) -> Result<Vec<ConversionItem>, Error> {
    let mut items = Vec::new();

    for entry in &plan.entries {
        for (idx, slot) in entry.items.iter().enumerate() {
            for (subindex, item) in slot.items().iter().enumerate() {
                let mut params = TemplateParams::new();
                if let Some(extra) = item.params() {
                    for (k, v) in extra {
                        params.set(k.clone(), v.clone());
                    }
                }
                params
                    .set("item", idx + 1)
                    .set("subject", subject)
                    .set("seqitem", item.series_id())
                    .set("subindex", subindex + 1)
                    .set(
                        "bids_subject_session_prefix",
                        bids_subject_session_prefix(subject, session),
                    )
                    .set(
                        "bids_subject_session_dir",
                        bids_subject_session_dir(subject, session),
                    );
                if let Some(ses) = session {
                    params.set("session", format!("ses-{}", ses));
                }

                let files = filegroup.get(item.series_id()).ok_or_else(|| {
                    Error::PlanConfig(format!(
                        "plan refers to series '{}' which is not in the file group",
                        item.series_id()
                    ))
                })?;

                let outprefix = template::render(&entry.template, &params)?;
                items.push(ConversionItem {
                    prefix: outdir.join(outprefix),
                    outtypes: entry.outtypes.clone(),
                    files: files.clone(),
                    series_id: item.series_id().to_string(),
                });
            }
        }
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::model::{PlanItem, PlanSlot};
    use std::collections::BTreeMap;

    fn filegroup() -> FileGroup {
        let mut fg = FileGroup::new();
        fg.insert("2-T1w".into(), vec![PathBuf::from("/raw/t1_1"), PathBuf::from("/raw/t1_2")]);
        fg.insert("7-BOLD".into(), vec![PathBuf::from("/raw/bold_1")]);
        fg.insert("8-BOLD".into(), vec![PathBuf::from("/raw/bold_2")]);
        fg
    }

    #[test]
    fn test_items_numbered_per_entry() {
        let mut plan = PlanMapping::new();
        let nii = vec!["nii.gz".to_string()];
        plan.push("run{item:03d}", &nii, PlanSlot::Single(PlanItem::Series("2-T1w".into())));
        plan.push("run{item:03d}", &nii, PlanSlot::Single(PlanItem::Series("7-BOLD".into())));

        let items = conversion_items("s01", Path::new("/out/s01"), &plan, &filegroup(), None).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].prefix, PathBuf::from("/out/s01/run001"));
        assert_eq!(items[0].files.len(), 2);
        assert_eq!(items[1].prefix, PathBuf::from("/out/s01/run002"));
    }

    #[test]
    fn test_grouped_slot_and_item_params() {
        let mut plan = PlanMapping::new();
        let nii = vec!["nii.gz".to_string()];
        let mut params = BTreeMap::new();
        params.insert("task".to_string(), "rest".to_string());
        plan.push(
            "{bids_subject_session_dir}/func/{bids_subject_session_prefix}_task-{task}_bold{subindex}",
            &nii,
            PlanSlot::Group(vec![
                PlanItem::Parameterized { item: "7-BOLD".into(), params: params.clone() },
                PlanItem::Parameterized { item: "8-BOLD".into(), params },
            ]),
        );

        let items =
            conversion_items("s01", Path::new("/out"), &plan, &filegroup(), Some("pre")).unwrap();
        assert_eq!(
            items[0].prefix,
            PathBuf::from("/out/sub-s01/ses-pre/func/sub-s01_ses-pre_task-rest_bold1")
        );
        assert_eq!(
            items[1].prefix,
            PathBuf::from("/out/sub-s01/ses-pre/func/sub-s01_ses-pre_task-rest_bold2")
        );
    }

    #[test]
    fn test_unresolved_placeholder_fails() {
        let mut plan = PlanMapping::new();
        plan.push(
            "{acq}_T1w",
            &["nii.gz".to_string()],
            PlanSlot::Single(PlanItem::Series("2-T1w".into())),
        );
        let err = conversion_items("s01", Path::new("/out"), &plan, &filegroup(), None).unwrap_err();
        assert!(matches!(err, Error::PlanConfig(_)));
    }

    #[test]
    fn test_session_placeholder_requires_session() {
        let mut plan = PlanMapping::new();
        plan.push(
            "{session}/run{item}",
            &["nii.gz".to_string()],
            PlanSlot::Single(PlanItem::Series("2-T1w".into())),
        );
        assert!(conversion_items("s01", Path::new("/out"), &plan, &filegroup(), None).is_err());
        let items =
            conversion_items("s01", Path::new("/out"), &plan, &filegroup(), Some("1")).unwrap();
        assert_eq!(items[0].prefix, PathBuf::from("/out/ses-1/run1"));
    }

    #[test]
    fn test_unknown_series_fails() {
        let mut plan = PlanMapping::new();
        plan.push(
            "run{item}",
            &["nii.gz".to_string()],
            PlanSlot::Single(PlanItem::Series("99-missing".into())),
        );
        assert!(conversion_items("s01", Path::new("/out"), &plan, &filegroup(), None).is_err());
    }
}
