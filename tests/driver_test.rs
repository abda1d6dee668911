// Integration tests for the retraining driver
//
// A scripted backend stands in for the model: it records what it was asked
// to train on and writes a marker weights file, so the precondition, skip,
// staging and metrics behaviour can be checked without loading a network.

mod common;

use anyhow::Result;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use common::{test_config, write_checkpoint, ORIGINAL_WEIGHTS};
use detoxifier::config::RetrainMode;
use detoxifier::curation::{CuratedExample, PreferencePair};
use detoxifier::feedback::{FeedbackRecord, FeedbackStore, PreferenceRecord, PreferenceStore};
use detoxifier::training::{
    Checkpoint, EncodedExample, EncodedPair, FineTuneBackend, PreferenceParams, RetrainReport,
    RetrainingDriver, SupervisedParams, TrainingError, TrainingInputs, TrainingMonitor,
    TrainingSummary,
};

const TRAINED_WEIGHTS: &str = "trained weights";

#[derive(Debug, Default)]
struct Calls {
    supervised: Vec<(usize, usize, f64)>,
    preference: Vec<Vec<EncodedPair>>,
}

struct ScriptedBackend {
    calls: Arc<Mutex<Calls>>,
    fail: bool,
    steps: usize,
}

impl ScriptedBackend {
    fn new(calls: Arc<Mutex<Calls>>) -> Self {
        Self {
            calls,
            fail: false,
            steps: 4,
        }
    }

    fn failing(calls: Arc<Mutex<Calls>>) -> Self {
        Self {
            fail: true,
            ..Self::new(calls)
        }
    }

    fn train(&self, weights_out: &Path, monitor: &mut TrainingMonitor<'_>) -> Result<TrainingSummary> {
        // Half-written output must never reach the live checkpoint
        fs::write(weights_out, "partial")?;
        if self.fail {
            anyhow::bail!("out of memory");
        }
        for step in 0..self.steps {
            monitor.step(1.0 / (step + 1) as f64)?;
        }
        fs::write(weights_out, TRAINED_WEIGHTS)?;
        Ok(TrainingSummary {
            steps: monitor.steps(),
            final_loss: monitor.last().map(|m| m.loss),
            eval_loss: None,
        })
    }
}

impl FineTuneBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn supervised(
        &self,
        _source: &Checkpoint,
        weights_out: &Path,
        train: &[EncodedExample],
        eval: &[EncodedExample],
        params: &SupervisedParams,
        monitor: &mut TrainingMonitor<'_>,
    ) -> Result<TrainingSummary> {
        self.calls
            .lock()
            .unwrap()
            .supervised
            .push((train.len(), eval.len(), params.learning_rate));
        self.train(weights_out, monitor)
    }

    fn preference(
        &self,
        _source: &Checkpoint,
        weights_out: &Path,
        pairs: &[EncodedPair],
        _params: &PreferenceParams,
        monitor: &mut TrainingMonitor<'_>,
    ) -> Result<TrainingSummary> {
        self.calls.lock().unwrap().preference.push(pairs.to_vec());
        self.train(weights_out, monitor)
    }
}

fn examples() -> Vec<CuratedExample> {
    vec![
        CuratedExample::new("you are bad", "you are nice", 3),
        CuratedExample::new("you are bad", "you are nice", 3),
        CuratedExample::new("stop", "please stop", 1),
    ]
}

fn weights(dir: &Path) -> String {
    fs::read_to_string(dir.join("model.safetensors")).unwrap()
}

#[test]
fn test_missing_checkpoint_fails_before_backend() {
    let root = TempDir::new().unwrap();
    let config = test_config(root.path());
    let calls = Arc::new(Mutex::new(Calls::default()));
    let driver = RetrainingDriver::new(Box::new(ScriptedBackend::new(calls.clone())), &config).unwrap();

    let err = driver
        .retrain_on_feedback(&config.paths.checkpoint_dir, &examples())
        .unwrap_err();
    assert!(matches!(err, TrainingError::MissingCheckpoint { .. }), "got {err}");

    // The precondition wins over the empty-data skip too
    let err = driver
        .retrain_on_preferences(&config.paths.checkpoint_dir, &[])
        .unwrap_err();
    assert!(matches!(err, TrainingError::MissingCheckpoint { .. }), "got {err}");

    let calls = calls.lock().unwrap();
    assert!(calls.supervised.is_empty() && calls.preference.is_empty());
}

#[test]
fn test_incomplete_checkpoint_is_rejected() {
    let root = TempDir::new().unwrap();
    let config = test_config(root.path());
    fs::create_dir_all(&config.paths.checkpoint_dir).unwrap();
    fs::write(config.paths.checkpoint_dir.join("config.json"), "{}").unwrap();

    let calls = Arc::new(Mutex::new(Calls::default()));
    let driver = RetrainingDriver::new(Box::new(ScriptedBackend::new(calls)), &config).unwrap();
    let err = driver
        .retrain_on_feedback(&config.paths.checkpoint_dir, &examples())
        .unwrap_err();
    assert!(matches!(err, TrainingError::InvalidCheckpoint { .. }), "got {err}");
}

#[test]
fn test_empty_inputs_are_skipped() {
    let root = TempDir::new().unwrap();
    let config = test_config(root.path());
    write_checkpoint(&config.paths.checkpoint_dir);
    let calls = Arc::new(Mutex::new(Calls::default()));
    let driver = RetrainingDriver::new(Box::new(ScriptedBackend::new(calls.clone())), &config).unwrap();

    let report = driver
        .retrain_on_preferences(&config.paths.checkpoint_dir, &[])
        .unwrap();
    assert!(matches!(report, RetrainReport::Skipped { .. }));

    let report = driver
        .retrain_on_feedback(&config.paths.checkpoint_dir, &[])
        .unwrap();
    assert!(!report.is_trained());

    let calls = calls.lock().unwrap();
    assert!(calls.supervised.is_empty() && calls.preference.is_empty());
    assert_eq!(weights(&config.paths.checkpoint_dir), ORIGINAL_WEIGHTS);
    assert!(!config.paths.metrics_log.exists());
}

#[test]
fn test_feedback_retrain_swaps_checkpoint_and_logs_steps() {
    let root = TempDir::new().unwrap();
    let config = test_config(root.path());
    write_checkpoint(&config.paths.checkpoint_dir);
    let calls = Arc::new(Mutex::new(Calls::default()));
    let driver = RetrainingDriver::new(Box::new(ScriptedBackend::new(calls.clone())), &config).unwrap();

    let report = driver
        .retrain_on_feedback(&config.paths.checkpoint_dir, &examples())
        .unwrap();

    match report {
        RetrainReport::Trained {
            examples,
            steps,
            checkpoint,
            ..
        } => {
            assert_eq!(examples, 3);
            assert_eq!(steps, 4);
            assert_eq!(checkpoint, config.paths.checkpoint_dir);
        }
        other => panic!("expected a trained report, got {other:?}"),
    }

    let dir = &config.paths.checkpoint_dir;
    assert_eq!(weights(dir), TRAINED_WEIGHTS);
    for file in ["config.json", "tokenizer.json", "labels.json"] {
        assert!(dir.join(file).exists(), "{file} was not carried over");
    }
    assert!(!root.path().join("t5-small-detox-finetuned.staging").exists());
    assert!(!root.path().join("t5-small-detox-finetuned.previous").exists());

    // Retraining uses the reduced learning rate
    let calls = calls.lock().unwrap();
    assert_eq!(calls.supervised, vec![(3, 0, config.training.retrain_learning_rate)]);

    // logging_steps = 2
    let log = fs::read_to_string(&config.paths.metrics_log).unwrap();
    assert_eq!(log, "Step 2 - Loss: 0.5000\nStep 4 - Loss: 0.2500\n");
}

#[test]
fn test_failed_backend_keeps_live_checkpoint() {
    let root = TempDir::new().unwrap();
    let config = test_config(root.path());
    write_checkpoint(&config.paths.checkpoint_dir);
    let calls = Arc::new(Mutex::new(Calls::default()));
    let driver = RetrainingDriver::new(Box::new(ScriptedBackend::failing(calls)), &config).unwrap();

    let err = driver
        .retrain_on_feedback(&config.paths.checkpoint_dir, &examples())
        .unwrap_err();
    assert!(matches!(err, TrainingError::Backend(_)), "got {err}");

    assert_eq!(weights(&config.paths.checkpoint_dir), ORIGINAL_WEIGHTS);
    assert!(!root.path().join("t5-small-detox-finetuned.staging").exists());
    assert!(Checkpoint::open(config.paths.checkpoint_dir.clone()).is_ok());
}

#[test]
fn test_retrain_restores_checkpoint_left_aside_by_killed_swap() {
    let root = TempDir::new().unwrap();
    let config = test_config(root.path());
    write_checkpoint(&config.paths.checkpoint_dir);
    let previous = root.path().join("t5-small-detox-finetuned.previous");
    fs::rename(&config.paths.checkpoint_dir, &previous).unwrap();

    let calls = Arc::new(Mutex::new(Calls::default()));
    let driver = RetrainingDriver::new(Box::new(ScriptedBackend::new(calls.clone())), &config).unwrap();
    let report = driver
        .retrain_on_feedback(&config.paths.checkpoint_dir, &examples())
        .unwrap();

    assert!(report.is_trained());
    assert_eq!(weights(&config.paths.checkpoint_dir), TRAINED_WEIGHTS);
    assert!(config.paths.checkpoint_dir.join("labels.json").exists());
    assert!(!previous.exists());
    assert_eq!(calls.lock().unwrap().supervised.len(), 1);
}

#[test]
fn test_preference_retrain_encodes_prefixed_prompts() {
    let root = TempDir::new().unwrap();
    let config = test_config(root.path());
    write_checkpoint(&config.paths.checkpoint_dir);
    let calls = Arc::new(Mutex::new(Calls::default()));
    let driver = RetrainingDriver::new(Box::new(ScriptedBackend::new(calls.clone())), &config).unwrap();

    let pairs = vec![PreferencePair {
        prompt: "you are bad".to_string(),
        chosen: "you are nice".to_string(),
        rejected: "none".to_string(),
    }];
    let report = driver
        .retrain_on_preferences(&config.paths.checkpoint_dir, &pairs)
        .unwrap();
    assert!(report.is_trained());

    let calls = calls.lock().unwrap();
    assert_eq!(
        calls.preference,
        vec![vec![EncodedPair {
            prompt_ids: vec![3, 4, 5, 6, 7],
            chosen_ids: vec![5, 6, 8],
            rejected_ids: vec![9],
        }]]
    );
    assert_eq!(weights(&config.paths.checkpoint_dir), TRAINED_WEIGHTS);
}

#[test]
fn test_initial_training_writes_new_checkpoint() {
    let root = TempDir::new().unwrap();
    let mut config = test_config(root.path());
    config.training.eval_fraction = 0.34;
    let base_dir = root.path().join("t5-small");
    write_checkpoint(&base_dir);
    let calls = Arc::new(Mutex::new(Calls::default()));
    let driver = RetrainingDriver::new(Box::new(ScriptedBackend::new(calls.clone())), &config).unwrap();

    let base = Checkpoint::open(base_dir.clone()).unwrap();
    let output = root.path().join("out/model");
    let report = driver.train_initial(&base, &output, examples()).unwrap();
    assert!(report.is_trained());

    assert_eq!(weights(&output), TRAINED_WEIGHTS);
    assert_eq!(weights(&base_dir), ORIGINAL_WEIGHTS);
    assert!(output.join("tokenizer.json").exists());

    let calls = calls.lock().unwrap();
    let (train, eval, lr) = calls.supervised[0];
    assert_eq!(train + eval, 3);
    assert_eq!(eval, 1);
    assert_eq!(lr, config.training.base_learning_rate);
}

#[test]
fn test_initial_training_requires_data() {
    let root = TempDir::new().unwrap();
    let config = test_config(root.path());
    let base_dir = root.path().join("t5-small");
    write_checkpoint(&base_dir);
    let driver = RetrainingDriver::new(
        Box::new(ScriptedBackend::new(Arc::new(Mutex::new(Calls::default())))),
        &config,
    )
    .unwrap();

    let base = Checkpoint::open(base_dir).unwrap();
    let err = driver
        .train_initial(&base, &root.path().join("out"), Vec::new())
        .unwrap_err();
    assert!(matches!(err, TrainingError::EmptyCorpus(_)));
}

#[test]
fn test_training_inputs_follow_mode() {
    let root = TempDir::new().unwrap();
    let config = test_config(root.path());

    let feedback = FeedbackStore::open(&config.paths.feedback_store).unwrap();
    feedback.append(&FeedbackRecord::new("you are bad", "you are nice", 5)).unwrap();
    feedback.append(&FeedbackRecord::new("you are bad", "none", 1)).unwrap();

    let inputs = TrainingInputs::load(RetrainMode::Ratings, &config).unwrap();
    // Ceiling rating is replicated, floor rating discarded
    assert_eq!(inputs.len(), 3);

    let inputs = TrainingInputs::load(RetrainMode::Preferences, &config).unwrap();
    assert!(inputs.is_empty());

    let preferences = PreferenceStore::open(&config.paths.preference_store).unwrap();
    preferences
        .append(&PreferenceRecord::new("you are bad", "you are nice", vec!["none".to_string()]))
        .unwrap();
    let inputs = TrainingInputs::load(RetrainMode::Preferences, &config).unwrap();
    assert_eq!(inputs.len(), 1);
}
