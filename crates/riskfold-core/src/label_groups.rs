//! Built-in label groups
//!
//! A label group is a named union of individual event-type labels. Each group lists
//! the label sets that resolve to it: Douglas county carries a few diagnosis-based
//! labels that Johnson county has no data for, so most groups have two variants.

use crate::config::PipelineConfig;
use crate::error::{Error, Result};

/// A named outcome concept and the label selections that resolve to it
#[derive(Debug, Clone, Copy)]
pub struct LabelGroup {
    pub name: &'static str,
    pub variants: &'static [&'static [&'static str]],
}

impl LabelGroup {
    /// Snake-cased group name for table names
    pub fn snake_name(&self) -> String {
        snake_case(self.name)
    }
}

pub const LABEL_GROUPS: &[LabelGroup] = &[
    LabelGroup {
        name: "Death only",
        variants: &[&["DEATH BY SUICIDE", "DEATH BY OVERDOSE"]],
    },
    LabelGroup {
        name: "Potentially fatal",
        variants: &[
            &[
                "DEATH BY SUICIDE",
                "SUICIDE ATTEMPT AMBULANCE RUN",
                "DOCO SUICIDE ATTEMPT DIAGNOSIS",
                "DEATH BY OVERDOSE",
                "SUBSTANCE USE AMBULANCE RUN",
                "DOCO DRUG DIAGNOSIS",
            ],
            &[
                "DEATH BY SUICIDE",
                "SUICIDE ATTEMPT AMBULANCE RUN",
                "DEATH BY OVERDOSE",
                "SUBSTANCE USE AMBULANCE RUN",
            ],
        ],
    },
    LabelGroup {
        name: "Suicide-related only",
        variants: &[
            &[
                "DEATH BY SUICIDE",
                "SUICIDE ATTEMPT AMBULANCE RUN",
                "SUICIDAL AMBULANCE RUN",
                "DOCO SUICIDE ATTEMPT DIAGNOSIS",
                "DOCO SUICIDAL DIAGNOSIS",
            ],
            &[
                "DEATH BY SUICIDE",
                "SUICIDE ATTEMPT AMBULANCE RUN",
                "SUICIDAL AMBULANCE RUN",
            ],
        ],
    },
    LabelGroup {
        name: "Drug-related only",
        variants: &[
            &[
                "DEATH BY OVERDOSE",
                "SUBSTANCE USE AMBULANCE RUN",
                "DOCO DRUG DIAGNOSIS",
            ],
            &["DEATH BY OVERDOSE", "SUBSTANCE USE AMBULANCE RUN"],
        ],
    },
    LabelGroup {
        name: "All behavioral crises",
        variants: &[
            &[
                "DEATH BY SUICIDE",
                "SUICIDE ATTEMPT AMBULANCE RUN",
                "DOCO SUICIDE ATTEMPT DIAGNOSIS",
                "SUICIDAL AMBULANCE RUN",
                "DOCO SUICIDAL DIAGNOSIS",
                "DEATH BY OVERDOSE",
                "SUBSTANCE USE AMBULANCE RUN",
                "DOCO DRUG DIAGNOSIS",
                "OTHER BEHAVIORAL CRISIS AMBULANCE RUN",
                "DOCO OTHER MENTAL CRISIS DIAGNOSIS",
            ],
            &[
                "DEATH BY SUICIDE",
                "SUICIDE ATTEMPT AMBULANCE RUN",
                "SUICIDAL AMBULANCE RUN",
                "DEATH BY OVERDOSE",
                "SUBSTANCE USE AMBULANCE RUN",
                "OTHER BEHAVIORAL CRISIS AMBULANCE RUN",
            ],
        ],
    },
];

/// Find the group whose label set equals `selected` (order-insensitive)
pub fn resolve_label_group(selected: &[String]) -> Option<&'static LabelGroup> {
    let mut selected: Vec<&str> = selected.iter().map(String::as_str).collect();
    selected.sort_unstable();
    selected.dedup();

    LABEL_GROUPS.iter().find(|group| {
        group.variants.iter().any(|variant| {
            let mut labels = variant.to_vec();
            labels.sort_unstable();
            labels == selected
        })
    })
}

/// Table name of the training labels, `label_<group>_<county>`.
///
/// An explicit `labels.group_name` takes precedence over the built-in groups.
pub fn label_tablename(config: &PipelineConfig) -> Result<String> {
    let group = match &config.labels.group_name {
        Some(name) => snake_case(name),
        None => resolve_label_group(&config.labels.selected_labels)
            .map(LabelGroup::snake_name)
            .ok_or_else(|| Error::UnknownLabelGroup(config.labels.selected_labels.clone()))?,
    };
    Ok(format!("label_{}_{}", group, config.county))
}

fn snake_case(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}
