//src/bin/kmerclass_cli.rs

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use kmerclass_rs::broker::BrokerServer;
use kmerclass_rs::classifications_stats::summary_path_for;
use kmerclass_rs::config::DEFAULT_BROKER_PORT;
use kmerclass_rs::{
    build_index, classify_reads, ClassifierClient, ClassifierServer, ClientConfiguration,
    Configuration, ServerConfiguration,
};

#[derive(Parser, Debug)]
#[command(name = "kmerclass-rs", version, about = "Classify DNA reads against a k-mer index", arg_required_else_help = true)]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build an index from reference FASTA files or directories
    Index {
        /// Reference FASTA files or directories
        #[arg(required = true)]
        references: Vec<PathBuf>,
        /// Classifier configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Index directory, overrides the configuration
        #[arg(short, long)]
        index: Option<PathBuf>,
        /// Taxonomy database (taxid, parent, name, rank)
        #[arg(long)]
        taxdb: Option<PathBuf>,
        /// Accession to taxid map
        #[arg(long, requires = "taxdb")]
        accessions: Option<PathBuf>,
        #[arg(short, long)]
        kmer_size: Option<usize>,
        #[arg(long)]
        canonical: bool,
        #[arg(short, long)]
        threads: Option<usize>,
    },
    /// Classify query FASTA files, locally or through remote servers
    Classify {
        /// Query FASTA file or directory
        input: PathBuf,
        /// Output file (or directory when the input is one)
        #[arg(short, long)]
        output: PathBuf,
        /// Classifier configuration (JSON)
        #[arg(short, long, conflicts_with = "client")]
        config: Option<PathBuf>,
        /// Index directory, overrides the configuration
        #[arg(short, long, conflicts_with = "client")]
        index: Option<PathBuf>,
        /// Client configuration (JSON); classify through the listed brokers
        #[arg(long)]
        client: Option<PathBuf>,
        #[arg(short, long)]
        threads: Option<usize>,
    },
    /// Answer classification requests from a broker
    Serve {
        /// Server configuration (JSON)
        config: PathBuf,
        #[arg(short, long)]
        index: Option<PathBuf>,
        #[arg(long)]
        broker_host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run a message broker
    Broker {
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
        #[arg(short, long, default_value_t = DEFAULT_BROKER_PORT)]
        port: u16,
    },
}

fn spinner(color: &str, msg: impl Into<String>) -> Result<ProgressBar, Box<dyn Error>> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
            .template(&format!("{{spinner:.{color}}} {{msg}}"))?,
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message(msg.into());
    Ok(pb)
}

fn load_configuration(path: Option<&Path>) -> Result<Configuration, Box<dyn Error>> {
    Ok(match path {
        Some(p) => Configuration::load(p)?,
        None => Configuration::default(),
    })
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Commands::Index {
            references,
            config,
            index,
            taxdb,
            accessions,
            kmer_size,
            canonical,
            threads,
        } => {
            let mut conf = load_configuration(config.as_deref())?;
            if let Some(index) = index {
                conf.index_path = index;
            }
            if let Some(k) = kmer_size {
                conf.kmer_size = k;
            }
            if let Some(t) = threads {
                conf.worker_threads = t;
            }
            conf.canonical_kmers |= canonical;
            conf.validate()?;

            let pb = spinner("blue", format!("Indexing into {}...", conf.index_path.display()))?;
            let summary = build_index(&conf, &references, taxdb.as_deref(), accessions.as_deref())?;
            pb.finish_with_message(format!(
                "Indexed {} records into {} documents ({} failed).",
                summary.records, summary.meta.doc_count, summary.failed
            ));
        }
        Commands::Classify {
            input,
            output,
            config,
            index,
            client,
            threads,
        } => {
            let pb = spinner("green", format!("Classifying {}...", input.display()))?;
            let summaries = match client {
                Some(client_conf) => {
                    let conf = ClientConfiguration::load(&client_conf)?;
                    let client = ClassifierClient::connect(&conf)?;
                    if input.is_dir() {
                        client.classify_path(&input, &output)?
                    } else {
                        let summary_path = summary_path_for(&output);
                        vec![client.classify_file(&input, &output, Some(&summary_path))?]
                    }
                }
                None => {
                    let mut conf = load_configuration(config.as_deref())?;
                    if let Some(index) = index {
                        conf.index_path = index;
                    }
                    if let Some(t) = threads {
                        conf.worker_threads = t;
                    }
                    conf.validate()?;
                    classify_reads(&conf, &input, &output)?
                }
            };
            let total: u64 = summaries.iter().map(|s| s.total).sum();
            let classified: u64 = summaries.iter().map(|s| s.classified).sum();
            pb.finish_with_message(format!(
                "Classified {classified} of {total} queries from {} file(s).",
                summaries.len()
            ));
        }
        Commands::Serve {
            config,
            index,
            broker_host,
            port,
        } => {
            let mut conf = ServerConfiguration::load(&config)?;
            if let Some(index) = index {
                conf.classifier.index_path = index;
            }
            if let Some(host) = broker_host {
                conf.broker_hostname = host;
            }
            if let Some(port) = port {
                conf.broker_port = port;
            }
            let handle = ClassifierServer::serve(&conf)?;
            let served = handle.join();
            log::info!("Broker connection closed after {served} requests");
        }
        Commands::Broker { bind, port } => {
            let server = BrokerServer::bind((bind.as_str(), port))?;
            log::info!("Broker ready on {}", server.local_addr());
            loop {
                thread::park();
            }
        }
    }
    Ok(())
}
