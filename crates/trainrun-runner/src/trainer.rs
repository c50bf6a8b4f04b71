//! The training operation seam.
//!
//! The runner never trains anything itself. It resolves a [`TrainingJob`]
//! from the client's configuration and hands it to a [`Trainer`] on the
//! worker thread. `train` is blocking and may run for a long time.

use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};
use trainrun_core::{companion_log_path, CoreError, DataKind, DataSource, RunConfig, RunId};

use crate::config::RunnerConfig;

/// Target of the records a [`CommandTrainer`] emits for its child's output.
pub const TRAINER_LOG_TARGET: &str = "trainrun::trainer";

/// Prefix of the stdout line a training command uses to report its result.
pub const RESULT_PATH_PREFIX: &str = "RESULT_PATH=";

/// Errors from the training operation.
#[derive(Debug, Error)]
pub enum TrainerError {
    /// Training failed; the text is reported verbatim as the run's error.
    #[error("{0}")]
    Failed(String),

    /// The training command could not be started.
    #[error("failed to spawn training command '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("training command I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode training job: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything the training operation needs, resolved from a [`RunConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingJob {
    pub run_id: RunId,
    pub label: String,
    pub data: DataSource,
    pub data_kind: DataKind,
    pub output_dir: PathBuf,
    /// Companion log the trainer should write its progress to.
    pub log_path: PathBuf,
    pub presets: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hyperparameters: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tuning_data: Option<Value>,
}

impl TrainingJob {
    /// Resolve the typed job for `run_id`. Fails on a malformed optional key.
    pub fn resolve(
        run_id: &RunId,
        cfg: &RunConfig,
        runner: &RunnerConfig,
    ) -> Result<Self, CoreError> {
        cfg.validate()?;
        let label = cfg
            .label()
            .ok_or_else(|| CoreError::Validation("cfg.label is required".to_string()))?;
        let data = cfg
            .data_source()
            .ok_or_else(|| CoreError::Validation("no training data source".to_string()))?;

        let output_dir = cfg
            .output_path()?
            .unwrap_or_else(|| runner.runs_root.join(run_id.as_str()));
        let log_path = companion_log_path(&output_dir);

        Ok(Self {
            run_id: run_id.clone(),
            label: label.to_string(),
            data,
            data_kind: cfg.data_kind()?,
            output_dir,
            log_path,
            presets: cfg
                .presets()?
                .unwrap_or_else(|| runner.default_presets.clone()),
            time_limit_secs: cfg.time_limit_secs()?,
            problem_type: cfg.problem_type()?,
            hyperparameters: cfg.hyperparameters()?,
            tuning_data: cfg.tuning_data().cloned(),
        })
    }
}

/// The opaque, blocking training operation.
pub trait Trainer: Send + Sync + 'static {
    /// Train and return the result artifact path.
    fn train(&self, job: &TrainingJob) -> Result<PathBuf, TrainerError>;
}

impl<F> Trainer for F
where
    F: Fn(&TrainingJob) -> Result<PathBuf, TrainerError> + Send + Sync + 'static,
{
    fn train(&self, job: &TrainingJob) -> Result<PathBuf, TrainerError> {
        self(job)
    }
}

/// Runs training as an external command.
///
/// The job is written to the child's stdin as one JSON document. Each stdout
/// line is logged at INFO and each stderr line at WARN under
/// [`TRAINER_LOG_TARGET`]. A `RESULT_PATH=<path>` line on stdout overrides the
/// result path, which otherwise is the job's output directory.
#[derive(Debug, Clone)]
pub struct CommandTrainer {
    program: String,
    args: Vec<String>,
}

impl CommandTrainer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append arguments passed before any job data.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Trainer for CommandTrainer {
    fn train(&self, job: &TrainingJob) -> Result<PathBuf, TrainerError> {
        info!(
            target: TRAINER_LOG_TARGET,
            program = %self.program,
            output_dir = %job.output_dir.display(),
            "Starting training command"
        );

        let payload = serde_json::to_vec(job)?;
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(existing_dir(&job.output_dir))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| TrainerError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TrainerError::Failed("training command has no stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TrainerError::Failed("training command has no stderr".to_string()))?;

        // Reader threads log under the worker's dispatcher so their records
        // reach the bridge even with a thread-local subscriber.
        let dispatch = tracing::dispatcher::get_default(|d| d.clone());
        let (result_path, last_stderr) = std::thread::scope(|scope| {
            if let Some(mut stdin) = stdin {
                let payload = &payload;
                scope.spawn(move || {
                    let written = stdin
                        .write_all(payload)
                        .and_then(|()| stdin.write_all(b"\n"));
                    // The exit status decides the outcome.
                    if let Err(e) = written {
                        debug!(error = %e, "Training command did not read its job");
                    }
                });
            }

            let err_dispatch = dispatch.clone();
            let stderr_reader = scope.spawn(move || {
                tracing::dispatcher::with_default(&err_dispatch, || {
                    let mut last = None;
                    for line in BufReader::new(stderr).lines() {
                        let Ok(line) = line else { break };
                        let line = line.trim_end().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        warn!(target: TRAINER_LOG_TARGET, "{}", line);
                        last = Some(line);
                    }
                    last
                })
            });

            let mut result_path = None;
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                let line = line.trim_end();
                if let Some(path) = line.strip_prefix(RESULT_PATH_PREFIX) {
                    result_path = Some(PathBuf::from(path.trim()));
                } else if !line.is_empty() {
                    info!(target: TRAINER_LOG_TARGET, "{}", line);
                }
            }

            let last_stderr = stderr_reader.join().unwrap_or(None);
            (result_path, last_stderr)
        });

        let status = child.wait()?;
        debug!(status = %status, "Training command exited");
        if !status.success() {
            return Err(TrainerError::Failed(last_stderr.unwrap_or_else(|| {
                format!("training command exited with {}", status)
            })));
        }

        Ok(result_path.unwrap_or_else(|| job.output_dir.clone()))
    }
}

fn existing_dir(dir: &Path) -> &Path {
    if dir.is_dir() {
        dir
    } else {
        Path::new(".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn runner_config(root: &Path) -> RunnerConfig {
        RunnerConfig {
            runs_root: root.to_path_buf(),
            ..RunnerConfig::default()
        }
    }

    fn job_for(cfg: Value, root: &Path) -> Result<TrainingJob, CoreError> {
        let cfg = RunConfig::from_value(cfg).unwrap();
        TrainingJob::resolve(&RunId::new("r1"), &cfg, &runner_config(root))
    }

    #[test]
    fn test_resolve_defaults() {
        let job = job_for(json!({"label": "y", "train_path": "/data/t.csv"}), Path::new("/runs"))
            .unwrap();
        assert_eq!(job.output_dir, PathBuf::from("/runs/r1"));
        assert_eq!(
            job.log_path,
            PathBuf::from("/runs/r1/logs/predictor_log.txt")
        );
        assert_eq!(job.presets, "medium_quality_faster_train");
        assert_eq!(job.data, DataSource::Path(PathBuf::from("/data/t.csv")));
        assert_eq!(job.data_kind, DataKind::Tabular);
        assert!(job.time_limit_secs.is_none());
    }

    #[test]
    fn test_resolve_overrides() {
        let job = job_for(
            json!({
                "label": "y",
                "train_df": {"x": [1, 2]},
                "path": "/out/custom",
                "presets": "best_quality",
                "time_limit": 30,
                "problem_type": "regression"
            }),
            Path::new("/runs"),
        )
        .unwrap();
        assert_eq!(job.output_dir, PathBuf::from("/out/custom"));
        assert_eq!(job.presets, "best_quality");
        assert_eq!(job.time_limit_secs, Some(30.0));
        assert_eq!(job.problem_type.as_deref(), Some("regression"));
        assert!(matches!(job.data, DataSource::Inline(_)));
    }

    #[test]
    fn test_resolve_rejects_malformed_optional_key() {
        let err = job_for(
            json!({"label": "y", "train_df": [], "time_limit": "soon"}),
            Path::new("/runs"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("time_limit"));
    }

    #[test]
    fn test_closure_trainer() {
        let trainer = |job: &TrainingJob| -> Result<PathBuf, TrainerError> {
            Ok(job.output_dir.join("model"))
        };
        let job = job_for(json!({"label": "y", "train_df": []}), Path::new("/runs")).unwrap();
        assert_eq!(
            trainer.train(&job).unwrap(),
            PathBuf::from("/runs/r1/model")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_command_trainer_result_path() {
        let dir = tempfile::tempdir().unwrap();
        let job = job_for(json!({"label": "y", "train_df": []}), dir.path()).unwrap();
        std::fs::create_dir_all(&job.output_dir).unwrap();

        let trainer = CommandTrainer::new("sh").args([
            "-c",
            "read job; echo fitting; echo RESULT_PATH=/models/best",
        ]);
        assert_eq!(trainer.program(), "sh");
        assert_eq!(
            trainer.train(&job).unwrap(),
            PathBuf::from("/models/best")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_command_trainer_failure_uses_last_stderr_line() {
        let dir = tempfile::tempdir().unwrap();
        let job = job_for(json!({"label": "y", "train_df": []}), dir.path()).unwrap();

        let trainer =
            CommandTrainer::new("sh").args(["-c", "echo warming up >&2; echo disk full >&2; exit 3"]);
        let err = trainer.train(&job).unwrap_err();
        assert_eq!(err.to_string(), "disk full");
    }

    #[test]
    fn test_command_trainer_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let job = job_for(json!({"label": "y", "train_df": []}), dir.path()).unwrap();

        let err = CommandTrainer::new("/nonexistent/trainrun-trainer")
            .train(&job)
            .unwrap_err();
        assert!(matches!(err, TrainerError::Spawn { .. }));
    }
}
