//! Retrospective summary of a training log.
//!
//! [`parse_training_log`] is a pure text transform: it takes the full text of
//! a (possibly incomplete) companion log and extracts dataset shape, problem
//! type, a per-model score table and run totals, plus a human-readable
//! summary. It never looks at live events.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($re).expect("valid regex"));
    };
}

pattern!(SYSTEM_BLOCK, r"(?s)=+ System Info =+\n(?P<body>.+?)\n=+");
pattern!(KEY_VALUE, r"^\s*([^:]+):\s+(.*)$");
pattern!(PRESET_ALIAS, r"Preset alias specified:\s*'([^']+)'\s+maps to\s+'([^']+)'");
pattern!(PRESETS_SPECIFIED, r"Presets specified:\s*(\[[^\]]*\])");
pattern!(HYPERPARAMETER_PRESET, r"Using hyperparameters preset:\s*hyperparameters='([^']+)'");
pattern!(SAVE_DIR, r#"will save models to\s+"([^"]+)""#);
pattern!(TRAIN_ROWS, r"Train Data Rows:\s*(\d+)");
pattern!(TRAIN_COLS, r"Train Data Columns:\s*(\d+)");
pattern!(LABEL_COLUMN, r"Label Column:\s*([^\n]+)");
pattern!(PROBLEM_TYPE, r"Problem Type:\s*([^\n]+)");
pattern!(EVAL_METRIC, r"gauge predictive performance using evaluation metric:\s*'([^']+)'");
pattern!(
    SPLIT,
    r"holdout_frac=([0-9.]+),\s*Train Rows:\s*(\d+),\s*Val Rows:\s*(\d+)"
);
pattern!(
    FEATURE_COUNTS,
    r"(\d+)\s+features in original data used to generate\s+(\d+)\s+features in processed data"
);
pattern!(PROCESSED_MEMORY, r"Train Data \(Processed\) Memory Usage:\s*([0-9.]+)\s*MB");
pattern!(MODEL_START, r"(?m)^Fitting model:\s*([^\s.]+)\s*\.\.\.");
pattern!(
    RESOURCES,
    r"Fitting with cpus=(\d+),\s*gpus=(\d+)(?:,\s*mem=([0-9.]+)/([0-9.]+)\s*GB)?"
);
pattern!(SCORE, r"(-?[0-9.]+)\s*=\s*Validation score\s*\(([^)]+)\)");
pattern!(TRAIN_RUNTIME, r"([0-9.]+)s\s*=\s*Training\s+runtime");
pattern!(VAL_RUNTIME, r"([0-9.]+)s\s*=\s*Validation\s+runtime");
pattern!(ENSEMBLE_WEIGHTS, r"Ensemble Weights:\s*(\{[^}]+\})");
pattern!(
    COMPLETION,
    r"(?s)training complete, total runtime\s*=\s*([0-9.]+)s.*?Best model:\s*([^|]+?)\s*\|\s*Estimated inference throughput:\s*([0-9.]+)\s*rows/s\s*\((\d+)\s*batch size\)"
);
pattern!(PREDICTOR_LOAD, r#"(?s)Predictor saved.*?load\("([^"]+)"\)"#);
pattern!(THRESHOLD_NOTE, r"Disabling decision threshold calibration[^\n]*");

/// Number of models listed in the human-readable summary.
const SUMMARY_TOP_MODELS: usize = 5;

/// Structured summary of a training log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogSummary {
    pub system: BTreeMap<String, String>,
    pub presets: PresetInfo,
    pub paths: PathInfo,
    pub dataset: DatasetInfo,
    pub problem_type: Option<String>,
    pub eval_metric: Option<String>,
    pub split: Option<SplitInfo>,
    pub features: FeatureInfo,
    /// Completed model fits, sorted by descending validation score.
    pub models: Vec<ModelEntry>,
    pub best_model: Option<BestModel>,
    pub runtime: RuntimeInfo,
    pub notes: Vec<String>,
    /// Multi-line human-readable rendering of the fields above.
    pub summary: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresetInfo {
    pub alias: Option<String>,
    pub alias_maps_to: Option<String>,
    pub specified: Option<String>,
    pub hyperparameters: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathInfo {
    pub model_dir: Option<String>,
    pub predictor_load_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub rows: Option<u64>,
    pub cols: Option<u64>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitInfo {
    pub holdout_frac: f64,
    pub train_rows: u64,
    pub val_rows: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureInfo {
    pub original_features: Option<u64>,
    pub processed_features: Option<u64>,
    pub processed_mem_mb: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    pub cpus: u32,
    pub gpus: u32,
    pub mem_used_gb: Option<f64>,
    pub mem_avail_gb: Option<f64>,
}

/// One completed model fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    pub score: f64,
    pub metric: String,
    pub train_runtime_s: f64,
    pub val_runtime_s: Option<f64>,
    pub resources: Resources,
    pub ensemble_weights: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestModel {
    pub name: String,
    /// True when the log has no completion line and the best model was
    /// picked from the highest parsed score.
    pub inferred: bool,
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub total_runtime_s: Option<f64>,
    pub throughput_rows_per_s: Option<f64>,
    pub batch_size: Option<u64>,
}

/// Parse a training log into a structured summary.
pub fn parse_training_log(text: &str) -> LogSummary {
    let mut data = LogSummary::default();

    if let Some(caps) = SYSTEM_BLOCK.captures(text) {
        for line in caps["body"].trim().lines() {
            if let Some(kv) = KEY_VALUE.captures(line) {
                data.system
                    .insert(kv[1].trim().to_string(), kv[2].trim().to_string());
            }
        }
    }

    if let Some(caps) = PRESET_ALIAS.captures(text) {
        data.presets.alias = Some(caps[1].to_string());
        data.presets.alias_maps_to = Some(caps[2].to_string());
    }
    data.presets.specified = first_capture(&PRESETS_SPECIFIED, text);
    data.presets.hyperparameters = first_capture(&HYPERPARAMETER_PRESET, text);
    data.paths.model_dir = first_capture(&SAVE_DIR, text);

    data.dataset.rows = first_parsed(&TRAIN_ROWS, text);
    data.dataset.cols = first_parsed(&TRAIN_COLS, text);
    data.dataset.label = first_capture(&LABEL_COLUMN, text).map(|s| s.trim().to_string());

    data.problem_type = first_capture(&PROBLEM_TYPE, text).map(|s| s.trim().to_string());
    data.eval_metric = first_capture(&EVAL_METRIC, text);

    if let Some(caps) = SPLIT.captures(text) {
        if let (Ok(holdout_frac), Ok(train_rows), Ok(val_rows)) =
            (caps[1].parse(), caps[2].parse(), caps[3].parse())
        {
            data.split = Some(SplitInfo {
                holdout_frac,
                train_rows,
                val_rows,
            });
        }
    }

    if let Some(caps) = FEATURE_COUNTS.captures(text) {
        data.features.original_features = caps[1].parse().ok();
        data.features.processed_features = caps[2].parse().ok();
    }
    data.features.processed_mem_mb = first_parsed(&PROCESSED_MEMORY, text);

    data.models = parse_models(text);

    if let Some(caps) = COMPLETION.captures(text) {
        data.runtime.total_runtime_s = caps[1].parse().ok();
        data.best_model = Some(BestModel {
            name: caps[2].trim().to_string(),
            inferred: false,
            score: None,
        });
        data.runtime.throughput_rows_per_s = caps[3].parse().ok();
        data.runtime.batch_size = caps[4].parse().ok();
    } else if let Some(best) = data.models.first() {
        data.best_model = Some(BestModel {
            name: best.name.clone(),
            inferred: true,
            score: Some(best.score),
        });
        data.notes.push(
            "Best model inferred from available scores (training may be incomplete).".to_string(),
        );
    }

    data.paths.predictor_load_path = first_capture(&PREDICTOR_LOAD, text);

    if let Some(m) = THRESHOLD_NOTE.find(text) {
        data.notes.push(m.as_str().trim().to_string());
    }

    data.summary = render_summary(&data);
    data
}

/// Render a model table, one line per model, optionally limited to `top`.
pub fn format_models(models: &[ModelEntry], top: Option<usize>) -> String {
    if models.is_empty() {
        return String::new();
    }
    let limit = top.filter(|n| *n > 0).unwrap_or(models.len());

    let mut lines = vec!["Validation models:".to_string()];
    for m in models.iter().take(limit) {
        let mut line = format!("• {}: {:.4} ({})", m.name, m.score, m.metric);

        let mut runtimes = vec![format!("train {:.2}s", m.train_runtime_s)];
        if let Some(val) = m.val_runtime_s {
            runtimes.push(format!("val {:.2}s", val));
        }
        line.push_str(&format!(" | {}", runtimes.join(", ")));

        let mut res = format!(" | cpus={} gpus={}", m.resources.cpus, m.resources.gpus);
        if let (Some(used), Some(avail)) = (m.resources.mem_used_gb, m.resources.mem_avail_gb) {
            res.push_str(&format!(" mem={}/{} GB", used, avail));
        }
        line.push_str(&res);

        if let Some(weights) = &m.ensemble_weights {
            line.push_str(&format!(" | weights={}", weights));
        }
        lines.push(line);
    }
    lines.join("\n")
}

fn parse_models(text: &str) -> Vec<ModelEntry> {
    let starts: Vec<(usize, String)> = MODEL_START
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            Some((whole.start(), caps[1].to_string()))
        })
        .collect();

    let mut models = Vec::new();
    for (i, (start, name)) in starts.iter().enumerate() {
        let end = starts.get(i + 1).map_or(text.len(), |(next, _)| *next);
        let block = &text[*start..end];

        // Blocks cut off mid-fit are skipped until all of these are present.
        let Some(res) = RESOURCES.captures(block) else {
            continue;
        };
        let Some(score_caps) = SCORE.captures(block) else {
            continue;
        };
        let Ok(score) = score_caps[1].parse::<f64>() else {
            continue;
        };
        let Some(train_runtime_s) = first_parsed::<f64>(&TRAIN_RUNTIME, block) else {
            continue;
        };

        let resources = Resources {
            cpus: res[1].parse().unwrap_or_default(),
            gpus: res[2].parse().unwrap_or_default(),
            mem_used_gb: res.get(3).and_then(|m| m.as_str().parse().ok()),
            mem_avail_gb: res.get(4).and_then(|m| m.as_str().parse().ok()),
        };

        models.push(ModelEntry {
            name: name.clone(),
            score,
            metric: score_caps[2].trim().to_string(),
            train_runtime_s,
            val_runtime_s: first_parsed(&VAL_RUNTIME, block),
            resources,
            ensemble_weights: first_capture(&ENSEMBLE_WEIGHTS, block),
        });
    }

    models.sort_by(|a, b| b.score.total_cmp(&a.score));
    models
}

fn render_summary(data: &LogSummary) -> String {
    fn fmt<T: ToString>(value: Option<T>) -> String {
        value.map_or_else(|| "?".to_string(), |v| v.to_string())
    }

    let mut parts = vec!["Training run summary".to_string()];

    let ds = &data.dataset;
    if ds.rows.is_some() || ds.cols.is_some() || ds.label.is_some() || data.problem_type.is_some() {
        parts.push(format!(
            "- Dataset: {} rows, {} cols | label='{}' | problem={}",
            fmt(ds.rows),
            fmt(ds.cols),
            fmt(ds.label.as_deref()),
            fmt(data.problem_type.as_deref())
        ));
    }

    let train_rows = data.split.as_ref().map(|s| s.train_rows);
    let val_rows = data.split.as_ref().map(|s| s.val_rows);
    if data.split.is_some() || data.eval_metric.is_some() {
        parts.push(format!(
            "- Split: train={} | val={} | metric={}",
            fmt(train_rows),
            fmt(val_rows),
            fmt(data.eval_metric.as_deref())
        ));
    }

    if let Some(original) = data.features.original_features {
        let mem = data
            .features
            .processed_mem_mb
            .map(|mb| format!(", processed mem ~{} MB", mb))
            .unwrap_or_default();
        parts.push(format!(
            "- Features: {} → {} processed{}",
            original,
            fmt(data.features.processed_features),
            mem
        ));
    }

    if !data.models.is_empty() {
        let top: Vec<String> = data
            .models
            .iter()
            .take(SUMMARY_TOP_MODELS)
            .map(|m| {
                let val = m
                    .val_runtime_s
                    .map(|v| format!(", val {}s", v))
                    .unwrap_or_default();
                format!(
                    "• {}: {:.4} ({}), train {}s{}",
                    m.name, m.score, m.metric, m.train_runtime_s, val
                )
            })
            .collect();
        parts.push(format!("- Validation scores (top):\n  {}", top.join("\n  ")));
    }

    if let Some(best) = &data.best_model {
        parts.push(format!("- Best model: {}", best.name));
    }
    if let Some(total) = data.runtime.total_runtime_s {
        parts.push(format!("- Total training runtime: {}s", total));
    }
    if let Some(dir) = &data.paths.model_dir {
        parts.push(format!("- Models saved to: {}", dir));
    }
    if let Some(throughput) = data.runtime.throughput_rows_per_s {
        let batch = data
            .runtime
            .batch_size
            .map(|b| format!(" @ batch {}", b))
            .unwrap_or_default();
        parts.push(format!(
            "- Inference throughput (est): {} rows/s{}",
            throughput, batch
        ));
    }
    if !data.notes.is_empty() {
        let notes: Vec<String> = data.notes.iter().map(|n| format!("• {}", n)).collect();
        parts.push(format!("- Notes:\n  {}", notes.join("\n  ")));
    }

    parts.join("\n")
}

fn first_capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text).map(|caps| caps[1].to_string())
}

fn first_parsed<T: std::str::FromStr>(re: &Regex, text: &str) -> Option<T> {
    re.captures(text).and_then(|caps| caps[1].trim().parse().ok())
}
