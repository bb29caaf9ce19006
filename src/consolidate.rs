//! Merging of response logs into the canonical dataset, and the per-group
//! Benford/Zipf summaries computed from it.

use crate::benford::{self, BenfordSummary};
use crate::classify::{TopicClassifier, TopicOverrides};
use crate::features;
use crate::journal;
use crate::models::{GroupKey, ResponseRecord, UNCLASSIFIED_TOPIC, UnitId};
use crate::zipf::{self, ZipfSummary};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Counts describing one consolidation pass
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ConsolidationReport {
    pub files_read: usize,
    pub unreadable: Vec<PathBuf>,
    pub records_read: usize,
    pub duplicates: usize,
    pub malformed_lines: usize,
    pub kept: usize,
    pub unclassified: usize,
}

impl ConsolidationReport {
    pub fn has_unreadable(&self) -> bool {
        !self.unreadable.is_empty()
    }
}

pub struct Consolidator {
    classifier: Box<dyn TopicClassifier>,
    overrides: TopicOverrides,
}

impl Consolidator {
    pub fn new(classifier: impl TopicClassifier + 'static) -> Self {
        Self {
            classifier: Box::new(classifier),
            overrides: TopicOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: TopicOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Read every log in order, keep the first record seen for each identity
    /// and fill in its topic
    pub fn merge(&self, paths: &[PathBuf]) -> (Vec<ResponseRecord>, ConsolidationReport) {
        let mut report = ConsolidationReport::default();
        let mut seen: HashSet<UnitId> = HashSet::new();
        let mut merged = Vec::new();

        for path in paths {
            let scan = match journal::read_records(path) {
                Ok(scan) => scan,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable log");
                    report.unreadable.push(path.clone());
                    continue;
                }
            };
            report.files_read += 1;
            report.records_read += scan.records.len();
            report.malformed_lines += scan.malformed.len();
            for malformed in &scan.malformed {
                warn!(%malformed, "skipping malformed line");
            }

            for mut record in scan.records {
                if !seen.insert(record.id()) {
                    report.duplicates += 1;
                    continue;
                }
                let topic = self.assign_topic(&record);
                if topic == UNCLASSIFIED_TOPIC {
                    report.unclassified += 1;
                }
                record.topic = Some(topic);
                merged.push(record);
            }
        }

        report.kept = merged.len();
        info!(
            files = report.files_read,
            read = report.records_read,
            duplicates = report.duplicates,
            malformed = report.malformed_lines,
            kept = report.kept,
            "logs merged"
        );
        (merged, report)
    }

    /// Override by prompt id, then by exact prompt text, then the classifier
    fn assign_topic(&self, record: &ResponseRecord) -> String {
        let prompt_text = record.prompt_text.as_deref();
        if let Some(topic) = self.overrides.lookup(&record.prompt_id, prompt_text) {
            return topic.to_string();
        }
        self.classifier
            .classify(prompt_text.unwrap_or_default(), record.topic.as_deref())
            .unwrap_or_else(|| UNCLASSIFIED_TOPIC.to_string())
    }
}

/// Write the canonical dataset, replacing `path` only once the new content is complete
pub fn write_canonical(records: &[ResponseRecord], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let staging = staging_path(path);
    let mut file = std::io::BufWriter::new(
        std::fs::File::create(&staging)
            .with_context(|| format!("Failed to create {}", staging.display()))?,
    );
    for record in records {
        serde_json::to_writer(&mut file, record).context("Failed to serialize record")?;
        file.write_all(b"\n")?;
    }
    let file = file.into_inner().context("Failed to flush canonical dataset")?;
    file.sync_all()?;

    std::fs::rename(&staging, path)
        .with_context(|| format!("Failed to move canonical dataset into {}", path.display()))?;
    debug!(path = %path.display(), records = records.len(), "canonical dataset written");
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(path.file_name().unwrap_or_default());
    name.push(".tmp");
    path.with_file_name(name)
}

/// One line of the summary table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub topic: String,
    pub model: String,
    pub n_responses: usize,
    pub n_numbers: usize,
    pub benford: Option<BenfordSummary>,
    pub zipf: ZipfSummary,
}

#[derive(Default)]
struct GroupStream {
    responses: usize,
    numbers: Vec<String>,
    words: Vec<String>,
}

/// Per-(topic, model) summaries in key order.
///
/// Only records with a non-empty text contribute; each lands in exactly one group.
pub fn summarize(records: &[ResponseRecord]) -> Vec<SummaryRow> {
    let mut groups: BTreeMap<GroupKey, GroupStream> = BTreeMap::new();
    for record in records {
        let Some(text) = record.text() else {
            continue;
        };
        let key = GroupKey {
            topic: record
                .topic
                .clone()
                .unwrap_or_else(|| UNCLASSIFIED_TOPIC.to_string()),
            model_name: record.model_name.clone(),
        };
        let extracted = features::extract(text);
        let group = groups.entry(key).or_default();
        group.responses += 1;
        group.numbers.extend(extracted.numbers);
        group.words.extend(extracted.words);
    }

    groups
        .into_iter()
        .map(|(key, group)| {
            let fit = zipf::fit(&group.words);
            if let Some(fit) = &fit {
                let top: Vec<&str> = fit.ranked.iter().take(5).map(|t| t.token.as_str()).collect();
                debug!(
                    topic = %key.topic,
                    model = %key.model_name,
                    slope = fit.slope,
                    intercept = fit.intercept,
                    ?top,
                    "zipf fit"
                );
            }
            SummaryRow {
                n_responses: group.responses,
                n_numbers: group.numbers.len(),
                benford: benford::analyze(&group.numbers),
                zipf: zipf::summarize(fit.as_ref()),
                topic: key.topic,
                model: key.model_name,
            }
        })
        .collect()
}
