use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use async_trait::async_trait;
use clap::{Parser, ValueEnum};
use docbatch::config::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_RETRIES};
use docbatch::sink::file::JsonLinesSink;
use docbatch::source::file::{CsvSource, JsonLinesSource};
use docbatch::{
    Backoff, BatchConfig, BatchRunner, CheckpointStore, FileCheckpointStore, Operation,
    PipelineError, RecordSource, RunOutcome, RunStatistics, RunValidator, logging,
    optimal_batch_size,
};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum InputFormat {
    Csv,
    Jsonl,
}

#[derive(Parser)]
#[command(
    name = "docbatch",
    version,
    about = "Load a CSV or JSON Lines file into a document collection in resumable batches"
)]
struct Cli {
    /// Input file
    input: PathBuf,

    /// Collection file the documents are appended to (JSON Lines)
    #[arg(short, long, env = "DOCBATCH_OUTPUT")]
    output: PathBuf,

    /// Input format
    #[arg(long, value_enum, default_value_t = InputFormat::Csv)]
    format: InputFormat,

    /// CSV field delimiter
    #[arg(long, default_value_t = ',')]
    delimiter: char,

    /// Records per batch
    #[arg(long, env = "DOCBATCH_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Pick a smaller batch size for small inputs (never above --batch-size)
    #[arg(long)]
    auto_batch_size: bool,

    /// Extra attempts for a failed batch
    #[arg(long, env = "DOCBATCH_MAX_RETRIES", default_value_t = DEFAULT_MAX_RETRIES)]
    max_retries: u32,

    /// Delay between attempts of the same batch, in milliseconds
    #[arg(long, default_value_t = 0)]
    retry_delay_ms: u64,

    /// Ignore any saved checkpoint and start from the first record
    #[arg(long)]
    no_resume: bool,

    /// Identifier of the run, used to name its checkpoint (default: input file stem)
    #[arg(long, env = "DOCBATCH_RUN_ID")]
    run_id: Option<String>,

    /// Directory holding checkpoint files
    #[arg(long, env = "DOCBATCH_STATE_DIR", default_value = ".")]
    state_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn batch_config(&self) -> anyhow::Result<BatchConfig> {
        let run_id = match &self.run_id {
            Some(run_id) => run_id.clone(),
            None => default_run_id(&self.input)?,
        };
        let backoff = if self.retry_delay_ms > 0 {
            Backoff::Fixed {
                delay_ms: self.retry_delay_ms,
            }
        } else {
            Backoff::None
        };

        let config = BatchConfig::new(run_id)
            .with_batch_size(self.batch_size)
            .with_max_retries(self.max_retries)
            .with_resume(!self.no_resume)
            .with_backoff(backoff);
        config.validate()?;
        Ok(config)
    }

    fn source(&self) -> anyhow::Result<Box<dyn RecordSource>> {
        let source: Box<dyn RecordSource> = match self.format {
            InputFormat::Csv => {
                if !self.delimiter.is_ascii() {
                    bail!("delimiter must be a single ASCII character");
                }
                Box::new(CsvSource::new(&self.input).with_delimiter(self.delimiter as u8))
            }
            InputFormat::Jsonl => Box::new(JsonLinesSource::new(&self.input)),
        };
        Ok(source)
    }
}

/// Passes when the collection file holds one document per input record.
struct OutputLineCount(PathBuf);

#[async_trait]
impl RunValidator for OutputLineCount {
    async fn validate(&self, stats: &RunStatistics) -> docbatch::Result<bool> {
        let contents = tokio::fs::read_to_string(&self.0).await?;
        let documents = contents.lines().filter(|l| !l.trim().is_empty()).count();
        if documents != stats.total_records {
            tracing::warn!(
                documents,
                total_records = stats.total_records,
                "Collection size does not match the input"
            );
        }
        Ok(documents == stats.total_records)
    }
}

fn default_run_id(input: &Path) -> anyhow::Result<String> {
    input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .with_context(|| format!("cannot derive a run id from {}", input.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let mut config = cli.batch_config()?;
    let source = cli.source()?;
    if cli.auto_batch_size {
        let total = source.count_records().await?;
        config.batch_size = optimal_batch_size(total, config.batch_size);
        tracing::info!(
            total_records = total,
            batch_size = config.batch_size,
            "Using derived batch size"
        );
    }
    let store = Arc::new(FileCheckpointStore::new(&cli.state_dir));

    let resuming = config.resume && store.load(&config.run_id).await?.is_some();
    let sink = JsonLinesSink::new(&cli.output).with_truncate(!resuming);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current batch");
            on_signal.cancel();
        }
    });

    let mut runner = BatchRunner::new(Box::new(sink), store.clone())
        .with_validator(Box::new(OutputLineCount(cli.output.clone())))
        .with_cancellation(cancel);
    let result = runner
        .process(source.as_ref(), Operation::Insert, &config)
        .await;
    runner.close().await?;

    if let Err(PipelineError::FatalWrite { stats, .. }) = &result {
        print_statistics(stats, &cli.output);
    }

    let stats = result.with_context(|| {
        format!(
            "run '{}' aborted; its checkpoint in {} was kept so it can be resumed",
            config.run_id,
            cli.state_dir.display()
        )
    })?;
    print_statistics(&stats, &cli.output);

    match stats.outcome {
        RunOutcome::Completed if stats.is_clean() => {
            store.clear(&config.run_id).await?;
            Ok(ExitCode::SUCCESS)
        }
        RunOutcome::Cancelled => {
            println!(
                "Run interrupted at record {}. Re-run the same command to resume.",
                stats.resume_offset
            );
            Ok(ExitCode::from(130))
        }
        RunOutcome::Completed if stats.cumulative_batches_failed() == 0 => {
            println!(
                "Validation of {} failed. The checkpoint was kept; \
                 use --no-resume to reload the whole input.",
                cli.output.display()
            );
            Ok(ExitCode::FAILURE)
        }
        _ => {
            println!(
                "{} batch(es) failed and were skipped. The checkpoint was kept; \
                 use --no-resume to reload the whole input.",
                stats.cumulative_batches_failed()
            );
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_statistics(stats: &RunStatistics, output: &Path) {
    println!("Run '{}' finished: {:?}", stats.run_id, stats.outcome);
    println!("  Collection:       {}", output.display());
    println!("  Records total:    {}", stats.total_records);
    if stats.start_offset > 0 {
        println!("  Resumed at:       {}", stats.start_offset);
    }
    println!("  Records written:  {}", stats.records_written);
    println!("  Batches ok:       {}", stats.batches_succeeded);
    println!("  Batches failed:   {}", stats.batches_failed);
    println!("  Batches retried:  {}", stats.batches_retried);
    println!("  Duration:         {:.2}s", stats.elapsed.as_secs_f64());
    println!("  Throughput:       {:.2} records/sec", stats.records_per_second());
    if let Some(validated) = stats.validated {
        let verdict = if validated { "passed" } else { "failed" };
        println!("  Validation:       {verdict}");
    }
    for batch in stats.batches.iter().filter(|b| !b.succeeded) {
        println!(
            "  Failed batch {}: records {}..{} after {} attempt(s)",
            batch.number,
            batch.offset,
            batch.offset + batch.len,
            batch.attempts
        );
    }
}
