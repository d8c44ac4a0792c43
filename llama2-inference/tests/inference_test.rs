mod common;

use common::*;
use llama2_inference::{InferenceConfig, InferenceConfigBuilder, Mode, run_inference};
use tempfile::NamedTempFile;

fn config_for(checkpoint: &NamedTempFile, vocabulary: &NamedTempFile) -> InferenceConfigBuilder {
    let checkpoint_path = checkpoint.path().to_string_lossy().into_owned();
    let vocabulary_path = vocabulary.path().to_string_lossy().into_owned();

    InferenceConfig::builder().checkpoint_path(Some(&checkpoint_path)).vocabulary_path(Some(&vocabulary_path))
}

#[test]
fn greedy_generation_prints_decoded_tokens() {
    let checkpoint = write_temp(&ToyWeights::golden().to_bytes());
    let vocabulary = write_temp(&vocabulary_bytes(&["a", "<s>", "c", "d"]));
    let config = config_for(&checkpoint, &vocabulary).temperature(Some(0.0)).steps(Some(3)).build().unwrap();

    let mut out = Vec::new();
    run_inference(config, &mut out).unwrap();

    assert_eq!(String::from_utf8(out).unwrap(), "<s>\naaa\n");
}

#[test]
fn zero_steps_generate_full_context() {
    let checkpoint = write_temp(&ToyWeights::golden().to_bytes());
    let vocabulary = write_temp(&vocabulary_bytes(&["a", "b", "c", "d"]));
    let config = config_for(&checkpoint, &vocabulary).temperature(Some(0.0)).steps(Some(0)).build().unwrap();

    let mut out = Vec::new();
    run_inference(config, &mut out).unwrap();

    assert_eq!(String::from_utf8(out).unwrap(), format!("<s>\n{}\n", "a".repeat(SEQ_LEN)));
}

#[test]
fn sampled_generation_is_reproducible_for_a_seed() {
    let checkpoint = write_temp(&ToyWeights::golden().to_bytes());
    let vocabulary = write_temp(&vocabulary_bytes(&["a", "b", "c", "d"]));

    let run = |seed| {
        let config =
            config_for(&checkpoint, &vocabulary).temperature(Some(50.0)).seed(Some(seed)).build().unwrap();
        let mut out = Vec::new();
        run_inference(config, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    };

    let first = run(42);
    assert_eq!(first, run(42));
    assert_eq!(first.len(), "<s>\n".len() + SEQ_LEN + 1);
}

#[test]
fn evaluate_reports_per_token_loss() {
    let checkpoint = write_temp(&ToyWeights::golden().to_bytes());
    let vocabulary = write_temp(&vocabulary_bytes(&["a", "b", "c", "d"]));
    let tokens = write_temp(b"0 1\n3");
    let tokens_path = tokens.path().to_string_lossy().into_owned();
    let config = config_for(&checkpoint, &vocabulary)
        .mode(Some(Mode::Evaluate))
        .tokens_path(Some(&tokens_path))
        .temperature(Some(1.0))
        .build()
        .unwrap();

    let mut out = Vec::new();
    run_inference(config, &mut out).unwrap();

    let text = String::from_utf8(out).unwrap();
    let lines = text.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("a 0 "));
    assert!(lines[1].starts_with("b 1 "));
    assert!(lines[2].starts_with("d 2 "));
    assert!(lines[3].starts_with("mean loss "));
}

#[test]
fn evaluate_mode_requires_tokens() {
    let checkpoint = write_temp(&ToyWeights::golden().to_bytes());
    let vocabulary = write_temp(&vocabulary_bytes(&["a", "b", "c", "d"]));

    let result = config_for(&checkpoint, &vocabulary).mode(Some(Mode::Evaluate)).build();

    assert!(result.is_err());
}

#[test]
fn short_vocabulary_fails_before_generation() {
    let checkpoint = write_temp(&ToyWeights::golden().to_bytes());
    let vocabulary = write_temp(&vocabulary_bytes(&["a", "b"]));
    let config = config_for(&checkpoint, &vocabulary).build().unwrap();

    let mut out = Vec::new();
    let result = run_inference(config, &mut out);

    assert!(result.is_err());
    assert!(out.is_empty());
}
