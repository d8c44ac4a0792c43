use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use log::error;
use llama2_inference::{InferenceConfigBuilder, Mode, run_inference};

/// Define the generate subcommand.
fn generate_subcommand() -> Command {
    with_model_args(Command::new("generate").about("Generate tokens from the beginning-of-sequence token"))
        .arg(
            Arg::new("temperature")
                .short('t')
                .long("temperature")
                .value_name("FLOAT")
                .help("Temperature for sampling in [0, inf], 0.0 = greedy argmax")
                .default_value("0.9")
                .value_parser(clap::value_parser!(f32)),
        )
        .arg(
            Arg::new("topp")
                .short('p')
                .long("topp")
                .value_name("FLOAT")
                .help("Top-p for nucleus sampling in (0,1), 1.0 = disabled")
                .default_value("1.0")
                .value_parser(clap::value_parser!(f32)),
        )
        .arg(
            Arg::new("steps")
                .short('n')
                .long("steps")
                .value_name("INT")
                .help("Number of steps to run for, 0 = use max sequence length")
                .default_value("256")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("seed")
                .short('s')
                .long("seed")
                .value_name("INT")
                .help("Random seed [default: 1337]")
                .value_parser(clap::value_parser!(u64)),
        )
}

/// Define the evaluate subcommand.
fn evaluate_subcommand() -> Command {
    with_model_args(Command::new("evaluate").about("Report per-token loss of a token id sequence"))
        .arg(
            Arg::new("TOKENS")
                .help("Text file with whitespace-separated token ids")
                .required(true)
                .index(2),
        )
        .arg(
            Arg::new("temperature")
                .short('t')
                .long("temperature")
                .value_name("FLOAT")
                .help("Temperature applied to logits before softmax")
                .default_value("1.0")
                .value_parser(clap::value_parser!(f32)),
        )
}

fn with_model_args(command: Command) -> Command {
    command
        .arg(Arg::new("checkpoint").help("Model checkpoint file").required(true).index(1))
        .arg(
            Arg::new("vocabulary")
                .short('v')
                .long("vocabulary")
                .value_name("PATH")
                .help("Vocabulary file")
                .default_value("tokenizer.bin"),
        )
}

/// Run a subcommand with the provided arguments
fn run_command(mode: Mode, matches: &ArgMatches) -> Result<()> {
    let config = InferenceConfigBuilder::default()
        .mode(Some(mode))
        .checkpoint_path(matches.get_one::<String>("checkpoint"))
        .vocabulary_path(matches.get_one::<String>("vocabulary"))
        .temperature(matches.get_one::<f32>("temperature").copied())
        .topp(matches.try_get_one::<f32>("topp").ok().flatten().copied())
        .steps(matches.try_get_one::<usize>("steps").ok().flatten().copied())
        .seed(matches.try_get_one::<u64>("seed").ok().flatten().copied())
        .tokens_path(matches.try_get_one::<String>("TOKENS").ok().flatten())
        .build()
        .map_err(|e| anyhow::anyhow!(e))?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    run_inference(config, &mut out).map_err(|e| anyhow::anyhow!("Inference failed: {e:#}"))?;

    Ok(())
}

fn execute_commands() -> Result<()> {
    // Initialize logger with clean format (no timestamp/module prefix)
    env_logger::Builder::from_default_env()
        .format(|buf, record| {
            use std::io::Write;
            writeln!(buf, "{}", record.args())
        })
        .init();

    let matches = Command::new("llama2")
        .about("Llama2 CLI: run a Llama-2 style checkpoint on the CPU")
        .subcommand(generate_subcommand())
        .subcommand(evaluate_subcommand())
        .get_matches();

    match matches.subcommand() {
        Some(("generate", matches)) => run_command(Mode::Generate, matches),
        Some(("evaluate", matches)) => run_command(Mode::Evaluate, matches),
        _ => anyhow::bail!("No subcommand specified. Use -h to print help information."),
    }
}

fn main() {
    if let Err(e) = execute_commands() {
        error!("Error: {e}");
        std::process::exit(1);
    }
}
