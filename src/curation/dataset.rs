// Parallel corpus loader for the initial supervised run
//
// Reads ParaDetox-style TSV files: a `toxic` column plus up to three
// `neutral1..neutral3` rewrites, and a second file of inputs that cannot be
// rewritten at all.

use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::Path;
use tracing::{info, warn};

use super::filter::CuratedExample;
use crate::config::constants::CANNOT_REWRITE_TARGET;

const NEUTRAL_COLUMNS: [&str; 3] = ["neutral1", "neutral2", "neutral3"];

/// Load the parallel corpus. Missing files are skipped with a warning; a
/// corpus with no usable rows is an error.
pub fn load_parallel_corpus(
    main_tsv: Option<&Path>,
    cannot_rewrite_tsv: Option<&Path>,
) -> Result<Vec<CuratedExample>> {
    let mut examples = Vec::new();

    if let Some(path) = main_tsv {
        if path.exists() {
            let before = examples.len();
            read_rewrites(path, &mut examples)?;
            info!("Loaded {} pairs from {}", examples.len() - before, path.display());
        } else {
            warn!("Corpus file not found: {}", path.display());
        }
    }

    if let Some(path) = cannot_rewrite_tsv {
        if path.exists() {
            let before = examples.len();
            read_cannot_rewrite(path, &mut examples)?;
            info!(
                "Loaded {} cannot-rewrite rows from {}",
                examples.len() - before,
                path.display()
            );
        } else {
            warn!("Cannot-rewrite file not found: {}", path.display());
        }
    }

    if examples.is_empty() {
        bail!("No training data found. Provide a TSV with 'toxic' and 'neutral1..3' columns.");
    }

    Ok(examples)
}

fn tsv_reader(path: &Path) -> Result<csv::Reader<std::fs::File>> {
    csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))
}

fn read_rewrites(path: &Path, out: &mut Vec<CuratedExample>) -> Result<()> {
    let mut reader = tsv_reader(path)?;
    let headers = reader.headers()?.clone();
    let toxic_idx = column(&headers, "toxic")
        .with_context(|| format!("{} has no 'toxic' column", path.display()))?;
    let neutral_idx: Vec<usize> = NEUTRAL_COLUMNS
        .iter()
        .filter_map(|name| column(&headers, name))
        .collect();

    for row in reader.records() {
        let row = row.with_context(|| format!("Failed to read row of {}", path.display()))?;
        let toxic = row.get(toxic_idx).unwrap_or("").trim();
        if toxic.is_empty() {
            continue;
        }
        for idx in &neutral_idx {
            let neutral = row.get(*idx).unwrap_or("").trim();
            if !neutral.is_empty() {
                out.push(CuratedExample::new(toxic, neutral, 1));
            }
        }
    }
    Ok(())
}

fn read_cannot_rewrite(path: &Path, out: &mut Vec<CuratedExample>) -> Result<()> {
    let mut reader = tsv_reader(path)?;
    let headers = reader.headers()?.clone();
    let toxic_idx = column(&headers, "toxic")
        .with_context(|| format!("{} has no 'toxic' column", path.display()))?;

    for row in reader.records() {
        let row = row.with_context(|| format!("Failed to read row of {}", path.display()))?;
        let toxic = row.get(toxic_idx).unwrap_or("").trim();
        if !toxic.is_empty() {
            out.push(CuratedExample::new(toxic, CANNOT_REWRITE_TARGET, 1));
        }
    }
    Ok(())
}

fn column(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h.trim() == name)
}

/// Shuffle with a fixed seed and hold out `eval_fraction` of the examples.
///
/// The held-out set is empty when the fraction rounds to zero rows; at least
/// one example always stays in the training set.
pub fn split_train_eval(
    mut examples: Vec<CuratedExample>,
    eval_fraction: f64,
    seed: u64,
) -> (Vec<CuratedExample>, Vec<CuratedExample>) {
    let mut rng = StdRng::seed_from_u64(seed);
    examples.shuffle(&mut rng);

    let eval_len = ((examples.len() as f64) * eval_fraction).round() as usize;
    let eval_len = eval_len.min(examples.len().saturating_sub(1));
    let eval = examples.split_off(examples.len() - eval_len);
    (examples, eval)
}
