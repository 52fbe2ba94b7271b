use std::path::PathBuf;
use std::process;

use clap::Parser;
use log::{error, LevelFilter};
use simple_logger::SimpleLogger;

use logclust::{format_record, Pipeline, PipelineConfig, Result, RunSummary, SearchHit};

#[derive(Parser)]
#[command(name = "logclust", version, about = "Cluster log lines by event type")]
struct Cli {
    /// TOML run configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log file, or directory of `.log` files, to cluster (overrides the config)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Destination for `<line>|ClusterID: <id>` records
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// SQLite database for dictionaries and results
    #[arg(long)]
    store: Option<PathBuf>,

    #[arg(long)]
    seed: Option<u64>,

    /// Print a JSON run summary on stdout
    #[arg(long)]
    summary_json: bool,

    /// Print the clustered lines containing TERM instead of the summary
    #[arg(long, value_name = "TERM")]
    search: Option<String>,

    /// -v for info, -vv for debug
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn into_config(self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(input) = self.input {
            config.input = input;
        }
        if let Some(output) = self.output {
            config.output = output;
        }
        if let Some(store) = self.store {
            config.store = Some(store);
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        Ok(config)
    }
}

enum Report {
    Summary { summary: RunSummary, json: bool },
    Hits(Vec<SearchHit>),
}

fn run(cli: Cli) -> Result<Report> {
    let json = cli.summary_json;
    let search = cli.search.clone();
    let pipeline = Pipeline::new(cli.into_config()?)?;
    match search {
        Some(term) => Ok(Report::Hits(pipeline.execute_search(&term)?.1)),
        None => Ok(Report::Summary {
            summary: pipeline.execute()?,
            json,
        }),
    }
}

fn main() {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    if let Err(e) = SimpleLogger::new().with_level(level).init() {
        eprintln!("logger: {e}");
    }

    match run(cli) {
        Ok(Report::Hits(hits)) => {
            for hit in hits {
                println!("{}", format_record(&hit.line, hit.label));
            }
        }
        Ok(Report::Summary {
            summary,
            json: true,
        }) => match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                error!("failed to encode summary: {}", e);
                process::exit(1);
            }
        },
        Ok(Report::Summary { summary, .. }) => {
            println!(
                "{} lines, {} templates, {} clusters, {} noise",
                summary.lines, summary.templates, summary.clusters, summary.noise
            );
        }
        Err(e) => {
            eprintln!("logclust: {e}");
            process::exit(1);
        }
    }
}
